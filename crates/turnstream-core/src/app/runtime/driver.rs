//! Single consumer of one stream subscription.

use std::sync::Arc;
use tracing::{debug, error, info};

use super::checkpoint::{CheckpointWriter, TerminalSave};
use super::context::SessionContext;
use super::subscription::EventSubscription;
use super::ui::{UiEvent, UiSink};
use crate::app::domain::message::Message;
use crate::app::domain::reduce::fold;
use crate::app::domain::state::AggregationState;
use crate::error::Result;

pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// This driver persisted the final message.
    Completed(Message),
    /// The terminal was folded but another subscriber had already persisted it.
    AlreadyCompleted,
    /// The subscription closed before a terminal batch arrived.
    Detached,
}

pub struct TurnDriver {
    subscription: EventSubscription,
    state: AggregationState,
    writer: Arc<CheckpointWriter>,
    context: Arc<SessionContext>,
    ui: UiSink,
    checkpoint_interval: usize,
}

impl TurnDriver {
    pub fn new(
        subscription: EventSubscription,
        state: AggregationState,
        writer: Arc<CheckpointWriter>,
        context: Arc<SessionContext>,
        ui: UiSink,
    ) -> Self {
        Self {
            subscription,
            state,
            writer,
            context,
            ui,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }

    /// Batches between incremental checkpoints. Zero disables them.
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn state(&self) -> &AggregationState {
        &self.state
    }

    /// Fold batches until the terminal save or until the subscription closes.
    ///
    /// Failures are reported to the UI as a send failure before being returned.
    /// A driver that ends without persisting the terminal gives up its
    /// subscription and primary slot, so the stream can be resumed by a later
    /// activation.
    pub async fn run(mut self) -> Result<TurnOutcome> {
        let stream_id = self.subscription.stream_id.clone();
        let subscriber_id = self.subscription.subscriber_id.clone();

        match self.drive().await {
            Ok(TurnOutcome::Detached) => {
                self.writer
                    .release(&stream_id, Some(&subscriber_id))
                    .await;
                Ok(TurnOutcome::Detached)
            }
            Ok(outcome) => {
                self.ui.emit(UiEvent::SendingChanged(false));
                Ok(outcome)
            }
            Err(e) => {
                self.writer
                    .release(&stream_id, Some(&subscriber_id))
                    .await;
                error!(
                    target: "turnstream::driver",
                    stream_id = %stream_id,
                    subscriber_id = %subscriber_id,
                    error = %e,
                    "Turn failed"
                );
                self.ui.emit(UiEvent::SendFailed {
                    reason: e.to_string(),
                });
                self.ui.emit(UiEvent::SendingChanged(false));
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<TurnOutcome> {
        let stream_id = self.subscription.stream_id.clone();
        let subscriber_id = self.subscription.subscriber_id.clone();
        let mut batches_since_checkpoint = 0usize;

        while let Some(batch) = self.subscription.recv().await {
            let out = fold(&mut self.state, &batch.events);
            debug!(
                target: "turnstream::driver",
                stream_id = %stream_id,
                seq = batch.seq,
                events = batch.events.len(),
                should_update = out.should_update,
                "Folded batch"
            );

            if out.should_update && self.context.push_preview(self.state.message.clone()) {
                self.ui
                    .emit(UiEvent::PreviewUpdated(self.state.message.clone()));
            }
            for intent in out.navigation {
                self.ui.emit(UiEvent::Navigate(intent));
            }
            for request in out.interactions {
                self.ui.emit(UiEvent::InteractionRequested(request));
            }

            if out.terminal_seen {
                let saved = self
                    .writer
                    .save_terminal(&stream_id, Some(&subscriber_id), &self.state)
                    .await?;
                return Ok(match saved {
                    TerminalSave::Persisted(message) => TurnOutcome::Completed(message),
                    TerminalSave::AlreadyProcessed => TurnOutcome::AlreadyCompleted,
                });
            }

            batches_since_checkpoint += 1;
            if self.checkpoint_interval > 0 && batches_since_checkpoint >= self.checkpoint_interval
            {
                self.writer
                    .save_incremental(&stream_id, &self.state)
                    .await?;
                batches_since_checkpoint = 0;
            }
        }

        info!(
            target: "turnstream::driver",
            stream_id = %stream_id,
            subscriber_id = %subscriber_id,
            "Subscription closed before terminal"
        );
        Ok(TurnOutcome::Detached)
    }
}
