use std::sync::Arc;
use tracing::{debug, info};

use super::context::SessionContext;
use super::engine::ExecutionEngine;
use super::ui::{UiEvent, UiSink};
use crate::app::domain::message::Message;
use crate::app::domain::state::AggregationState;
use crate::app::domain::types::{StreamId, SubscriberId};
use crate::app::session::store::SessionStore;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalSave {
    Persisted(Message),
    /// Another subscriber already persisted this stream's terminal.
    AlreadyProcessed,
}

/// Persists in-progress and final turn state.
pub struct CheckpointWriter {
    store: Arc<dyn SessionStore>,
    engine: Arc<dyn ExecutionEngine>,
    context: Arc<SessionContext>,
    ui: UiSink,
}

impl CheckpointWriter {
    pub fn new(
        store: Arc<dyn SessionStore>,
        engine: Arc<dyn ExecutionEngine>,
        context: Arc<SessionContext>,
        ui: UiSink,
    ) -> Self {
        Self {
            store,
            engine,
            context,
            ui,
        }
    }

    /// Periodic save. Skipped once the stream's terminal has been persisted so
    /// a lagging subscriber cannot overwrite the final row.
    pub async fn save_incremental(
        &self,
        stream_id: &StreamId,
        state: &AggregationState,
    ) -> Result<()> {
        let _checkpoint = self.context.checkpoint_lock().await;
        if self.context.ledger.has(stream_id) {
            return Ok(());
        }
        self.persist(state).await?;
        debug!(
            target: "turnstream::checkpoint",
            stream_id = %stream_id,
            message_id = %state.message.id,
            "Incremental checkpoint written"
        );
        Ok(())
    }

    /// Final save, at most once per stream per turn.
    ///
    /// Order: scoped state, then the message, then the preview is cleared,
    /// then the subscription is released. If persisting fails the ledger mark
    /// is withdrawn so the save can be retried.
    pub async fn save_terminal(
        &self,
        stream_id: &StreamId,
        subscriber_id: Option<&SubscriberId>,
        state: &AggregationState,
    ) -> Result<TerminalSave> {
        let checkpoint = self.context.checkpoint_lock().await;
        if !self.context.ledger.try_mark(stream_id) {
            drop(checkpoint);
            debug!(
                target: "turnstream::checkpoint",
                stream_id = %stream_id,
                "Terminal already processed, skipping save"
            );
            self.release(stream_id, subscriber_id).await;
            return Ok(TerminalSave::AlreadyProcessed);
        }

        let message = state.finalized_message();
        if let Err(e) = self.persist(state).await {
            self.context.ledger.clear(stream_id);
            return Err(e);
        }
        drop(checkpoint);

        self.context.commit_preview(message.clone());
        self.ui.emit(UiEvent::PreviewCleared {
            message_id: message.id.clone(),
        });
        self.ui.emit(UiEvent::ScrollToBottom);

        self.release(stream_id, subscriber_id).await;

        info!(
            target: "turnstream::checkpoint",
            stream_id = %stream_id,
            message_id = %message.id,
            "Turn persisted"
        );
        Ok(TerminalSave::Persisted(message))
    }

    async fn persist(&self, state: &AggregationState) -> Result<()> {
        if let Some(local) = &state.local_state {
            self.store.put_local_state(local).await?;
        }
        if let Some(global) = &state.global_state {
            self.store.put_global_state(global).await?;
        }
        self.store.put_message(&state.finalized_message()).await?;
        Ok(())
    }

    /// Unsubscribe and give up the primary slot. Safe to call more than once.
    pub async fn release(&self, stream_id: &StreamId, subscriber_id: Option<&SubscriberId>) {
        if let Some(subscriber_id) = subscriber_id {
            self.engine.unsubscribe(stream_id, subscriber_id).await;
            self.context.subscriptions.release(stream_id, subscriber_id);
        }
    }
}
