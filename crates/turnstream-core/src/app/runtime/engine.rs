use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::subscription::EventSubscription;
use crate::app::domain::event::StreamEvent;
use crate::app::domain::request::ChatRequest;
use crate::app::domain::types::{
    AppId, EventId, InteractionId, MessageId, SessionId, StreamId, SubscriberId,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Authorization required for providers: {}", providers.join(", "))]
    Unauthorized { providers: Vec<String> },

    #[error("Stream not found: {stream_id}")]
    StreamNotFound { stream_id: String },

    #[error("Stream already completed: {stream_id}")]
    StreamClosed { stream_id: String },

    #[error("History of stream {stream_id} exceeded {limit} buffered events")]
    HistoryTruncated { stream_id: String, limit: usize },

    #[error("Interaction not found: {interaction_id}")]
    InteractionNotFound { interaction_id: String },

    #[error("Execution backend unavailable: {message}")]
    Unavailable { message: String },
}

impl EngineError {
    pub fn stream_not_found(stream_id: &StreamId) -> Self {
        Self::StreamNotFound {
            stream_id: stream_id.to_string(),
        }
    }

    pub fn stream_closed(stream_id: &StreamId) -> Self {
        Self::StreamClosed {
            stream_id: stream_id.to_string(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Errors worth another `execute` attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Which turn a stream belongs to. Recorded at execute time so a later
/// reconnect persists under the same assistant message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub session_id: SessionId,
    pub app_id: AppId,
    pub event_id: EventId,
    pub response_message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub descriptor: StreamDescriptor,
    pub payload: ChatRequest,
    pub offline: bool,
    /// Batches between incremental checkpoints on the consuming side.
    pub checkpoint_interval: usize,
}

/// Contract of the backend that produces event streams.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn has_stream(&self, stream_id: &StreamId) -> bool;

    async fn is_stream_active(&self, stream_id: &StreamId) -> bool;

    async fn is_stream_complete(&self, stream_id: &StreamId) -> bool;

    /// Full buffered history of a stream in delivery order.
    async fn accumulated_events(&self, stream_id: &StreamId)
    -> Result<Vec<StreamEvent>, EngineError>;

    /// Attach a subscriber. The first batch replays any buffered history.
    async fn subscribe(
        &self,
        stream_id: &StreamId,
        subscriber_id: &SubscriberId,
    ) -> Result<EventSubscription, EngineError>;

    /// Detach a subscriber. Unknown streams or subscribers are a no-op.
    async fn unsubscribe(&self, stream_id: &StreamId, subscriber_id: &SubscriberId);

    /// Start a new turn on `stream_id`.
    async fn execute(&self, stream_id: &StreamId, request: ExecutionRequest)
    -> Result<(), EngineError>;

    async fn stream_descriptor(&self, stream_id: &StreamId) -> Option<StreamDescriptor>;

    /// Answer an interaction. Returns false when it was already answered.
    async fn respond_interaction(
        &self,
        interaction_id: &InteractionId,
        value: Value,
    ) -> Result<bool, EngineError>;
}
