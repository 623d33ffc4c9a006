//! Collaborators consulted before a turn starts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::domain::attachment::Attachment;
use crate::app::domain::types::{AppId, EventId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsentError {
    #[error("Consent check failed: {message}")]
    CheckFailed { message: String },

    #[error("Attachment could not be materialized: {message}")]
    Materialization { message: String },
}

/// What is about to run, as presented to the consent gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDescriptor {
    pub app_id: AppId,
    pub event_id: EventId,
    pub tools: Vec<String>,
    pub offline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCheck {
    pub missing_providers: Vec<String>,
}

impl AuthorizationCheck {
    pub fn is_authorized(&self) -> bool {
        self.missing_providers.is_empty()
    }
}

#[async_trait]
pub trait ConsentGate: Send + Sync {
    async fn check_authorization(
        &self,
        app_id: &AppId,
        descriptor: &ExecutionDescriptor,
    ) -> Result<AuthorizationCheck, ConsentError>;
}

#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn is_offline(&self, app_id: &AppId) -> bool;
}

#[async_trait]
pub trait AttachmentMaterializer: Send + Sync {
    async fn materialize(&self, files: Vec<Attachment>) -> Result<Vec<Attachment>, ConsentError>;
}

/// Gate that never reports missing providers.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl ConsentGate for AllowAll {
    async fn check_authorization(
        &self,
        _app_id: &AppId,
        _descriptor: &ExecutionDescriptor,
    ) -> Result<AuthorizationCheck, ConsentError> {
        Ok(AuthorizationCheck::default())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FixedMode {
    pub offline: bool,
}

#[async_trait]
impl CapabilityProbe for FixedMode {
    async fn is_offline(&self, _app_id: &AppId) -> bool {
        self.offline
    }
}

/// Materializer that returns files unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

#[async_trait]
impl AttachmentMaterializer for Passthrough {
    async fn materialize(&self, files: Vec<Attachment>) -> Result<Vec<Attachment>, ConsentError> {
        Ok(files)
    }
}
