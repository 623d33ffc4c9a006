use thiserror::Error;

use crate::app::runtime::consent::ConsentError;
use crate::app::runtime::engine::EngineError;
use crate::app::session::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Consent(#[from] ConsentError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Task failed: {0}")]
    Task(String),
}

impl Error {
    /// Authorization-class failures resume through the consent flow and are
    /// never reported as send failures.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Error::Engine(EngineError::Unauthorized { .. }))
    }

    /// Providers that must be authorized, for authorization-class errors.
    pub fn missing_providers(&self) -> Option<&[String]> {
        match self {
            Error::Engine(EngineError::Unauthorized { providers }) => Some(providers),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}
