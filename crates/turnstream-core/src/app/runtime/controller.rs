//! Attaches to streams that already exist when a session view activates.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::checkpoint::{CheckpointWriter, TerminalSave};
use super::context::SessionContext;
use super::driver::{DEFAULT_CHECKPOINT_INTERVAL, TurnDriver, TurnOutcome};
use super::engine::{ExecutionEngine, StreamDescriptor};
use super::ui::UiSink;
use crate::app::domain::message::Message;
use crate::app::domain::reduce::fold;
use crate::app::domain::state::AggregationState;
use crate::app::domain::types::{StreamId, SubscriberId, now_millis};
use crate::app::session::store::SessionStore;
use crate::error::{Error, Result};

/// Where a stream stands from this session's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StreamStatus {
    Absent,
    Active,
    CompleteUnprocessed,
    CompleteProcessed,
}

#[derive(Debug)]
pub enum Activation {
    Absent,
    AlreadyProcessed,
    /// A completed stream was folded from its buffered history and persisted.
    Recovered(Message),
    /// A live driver now folds the stream.
    Attached(JoinHandle<Result<TurnOutcome>>),
    /// Another subscriber holds the primary slot, or this controller already
    /// subscribed during the current activation.
    AlreadyAttached,
    /// The stream is active but nothing in the session can display it yet.
    Deferred,
}

/// Builds the fold state for a stream from the descriptor recorded at execute
/// time. The shell keeps the timestamp of any earlier checkpoint so the
/// message does not move in history.
pub(crate) async fn state_for_stream(
    store: &dyn SessionStore,
    descriptor: &StreamDescriptor,
) -> Result<AggregationState> {
    let timestamp = store
        .get_message(&descriptor.response_message_id)
        .await?
        .map_or_else(now_millis, |existing| existing.timestamp);
    let shell = Message::assistant_shell(
        descriptor.response_message_id.clone(),
        descriptor.session_id.clone(),
        descriptor.app_id.clone(),
    )
    .with_timestamp(timestamp);

    let local = store
        .load_local_state(&descriptor.session_id, &descriptor.event_id)
        .await?;
    let global = store
        .load_global_state(&descriptor.app_id, &descriptor.event_id)
        .await?;

    Ok(AggregationState::new(shell, descriptor.event_id.clone()).with_scoped_state(local, global))
}

pub struct SubscriptionController {
    subscriber_id: SubscriberId,
    engine: Arc<dyn ExecutionEngine>,
    store: Arc<dyn SessionStore>,
    context: Arc<SessionContext>,
    writer: Arc<CheckpointWriter>,
    ui: UiSink,
    checkpoint_interval: usize,
    attached: Mutex<Vec<StreamId>>,
}

impl SubscriptionController {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        store: Arc<dyn SessionStore>,
        context: Arc<SessionContext>,
        ui: UiSink,
    ) -> Self {
        let writer = Arc::new(CheckpointWriter::new(
            Arc::clone(&store),
            Arc::clone(&engine),
            Arc::clone(&context),
            ui.clone(),
        ));
        Self {
            subscriber_id: SubscriberId::from_string(format!("reconnect-{}", SubscriberId::new())),
            engine,
            store,
            context,
            writer,
            ui,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            attached: Mutex::new(Vec::new()),
        }
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn subscriber_id(&self) -> &SubscriberId {
        &self.subscriber_id
    }

    fn attached(&self) -> MutexGuard<'_, Vec<StreamId>> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn status(&self, stream_id: &StreamId) -> StreamStatus {
        if !self.engine.has_stream(stream_id).await {
            StreamStatus::Absent
        } else if self.engine.is_stream_active(stream_id).await {
            StreamStatus::Active
        } else if self.context.ledger.has(stream_id) {
            StreamStatus::CompleteProcessed
        } else {
            StreamStatus::CompleteUnprocessed
        }
    }

    pub async fn activate(&self, stream_id: &StreamId) -> Result<Activation> {
        let status = self.status(stream_id).await;
        debug!(
            target: "turnstream::controller",
            stream_id = %stream_id,
            status = %status,
            "Activating"
        );

        match status {
            StreamStatus::Absent => Ok(Activation::Absent),
            StreamStatus::CompleteProcessed => Ok(Activation::AlreadyProcessed),
            StreamStatus::CompleteUnprocessed => self.recover(stream_id).await,
            StreamStatus::Active => self.attach(stream_id).await,
        }
    }

    /// Detach from every stream attached during this activation.
    pub async fn deactivate(&self) {
        let streams = std::mem::take(&mut *self.attached());
        for stream_id in streams {
            self.engine.unsubscribe(&stream_id, &self.subscriber_id).await;
            self.context
                .subscriptions
                .release(&stream_id, &self.subscriber_id);
            self.context
                .reconnect_guard
                .end(&stream_id, &self.subscriber_id);
            debug!(
                target: "turnstream::controller",
                stream_id = %stream_id,
                "Detached"
            );
        }
    }

    async fn descriptor(&self, stream_id: &StreamId) -> Result<StreamDescriptor> {
        self.engine
            .stream_descriptor(stream_id)
            .await
            .ok_or_else(|| {
                Error::InvalidOperation(format!("Stream {stream_id} has no turn descriptor"))
            })
    }

    async fn recover(&self, stream_id: &StreamId) -> Result<Activation> {
        // A live subscriber still owns the stream and will fold its terminal.
        if self.context.subscriptions.has_primary(stream_id) {
            debug!(
                target: "turnstream::controller",
                stream_id = %stream_id,
                "Completed stream is still being folded live"
            );
            return Ok(Activation::AlreadyAttached);
        }

        let descriptor = self.descriptor(stream_id).await?;
        let events = self.engine.accumulated_events(stream_id).await?;
        let mut state = state_for_stream(self.store.as_ref(), &descriptor).await?;
        fold(&mut state, &events);

        if !state.done {
            warn!(
                target: "turnstream::controller",
                stream_id = %stream_id,
                "Completed stream history holds no terminal event"
            );
        }

        match self.writer.save_terminal(stream_id, None, &state).await? {
            TerminalSave::Persisted(message) => {
                info!(
                    target: "turnstream::controller",
                    stream_id = %stream_id,
                    events = events.len(),
                    "Recovered completed stream"
                );
                Ok(Activation::Recovered(message))
            }
            TerminalSave::AlreadyProcessed => Ok(Activation::AlreadyProcessed),
        }
    }

    async fn attach(&self, stream_id: &StreamId) -> Result<Activation> {
        if self.context.subscriptions.has_primary(stream_id) {
            return Ok(Activation::AlreadyAttached);
        }

        let descriptor = self.descriptor(stream_id).await?;
        if !self.context.is_own_turn(stream_id)
            && self
                .store
                .query_messages(&descriptor.session_id)
                .await?
                .is_empty()
        {
            debug!(
                target: "turnstream::controller",
                stream_id = %stream_id,
                "No history to attach to yet"
            );
            return Ok(Activation::Deferred);
        }

        if !self
            .context
            .reconnect_guard
            .try_begin(stream_id, &self.subscriber_id)
        {
            return Ok(Activation::AlreadyAttached);
        }
        if !self
            .context
            .subscriptions
            .claim_primary(stream_id, &self.subscriber_id)
        {
            self.context
                .reconnect_guard
                .end(stream_id, &self.subscriber_id);
            return Ok(Activation::AlreadyAttached);
        }

        let attached = async {
            let state = state_for_stream(self.store.as_ref(), &descriptor).await?;
            let subscription = self.engine.subscribe(stream_id, &self.subscriber_id).await?;
            Ok::<_, Error>((state, subscription))
        }
        .await;
        let (state, subscription) = match attached {
            Ok(parts) => parts,
            Err(e) => {
                self.context
                    .subscriptions
                    .release(stream_id, &self.subscriber_id);
                self.context
                    .reconnect_guard
                    .end(stream_id, &self.subscriber_id);
                return Err(e);
            }
        };

        self.attached().push(stream_id.clone());
        let driver = TurnDriver::new(
            subscription,
            state,
            Arc::clone(&self.writer),
            Arc::clone(&self.context),
            self.ui.clone(),
        )
        .with_checkpoint_interval(self.checkpoint_interval);

        info!(
            target: "turnstream::controller",
            stream_id = %stream_id,
            subscriber_id = %self.subscriber_id,
            "Reattached to active stream"
        );
        Ok(Activation::Attached(tokio::spawn(driver.run())))
    }
}
