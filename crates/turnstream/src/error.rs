use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize preferences: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid event file at line {line}: {message}")]
    Script { line: usize, message: String },

    #[error(transparent)]
    Core(#[from] turnstream_core::Error),
}

impl From<turnstream_core::app::session::StoreError> for Error {
    fn from(err: turnstream_core::app::session::StoreError) -> Self {
        Error::Core(err.into())
    }
}
