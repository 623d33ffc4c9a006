//! In-process execution engine.
//!
//! Streams live in a shared table guarded by a synchronous mutex; no lock is
//! held across an await. Publishing appends to the stream's bounded history
//! and fans the batch out to every subscriber, so a subscriber attached at any
//! point sees history and live batches without gaps or repeats.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::engine::{EngineError, ExecutionEngine, ExecutionRequest, StreamDescriptor};
use super::subscription::{EventSubscription, StreamBatch};
use crate::app::domain::event::StreamEvent;
use crate::app::domain::types::{InteractionId, StreamId, SubscriberId};

pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 10_000;

/// Produces the events of a turn started through [`LocalExecutionEngine`].
#[async_trait]
pub trait ExecutionHandler: Send + Sync {
    /// Checked before the stream is opened; an error fails `execute`.
    fn admit(&self, _request: &ExecutionRequest) -> Result<(), EngineError> {
        Ok(())
    }

    async fn run(
        &self,
        request: ExecutionRequest,
        producer: StreamProducer,
    ) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamStatus {
    Active,
    Complete,
}

struct StreamEntry {
    status: StreamStatus,
    history: Vec<StreamEvent>,
    truncated: bool,
    next_seq: u64,
    subscribers: IndexMap<SubscriberId, mpsc::UnboundedSender<StreamBatch>>,
    descriptor: Option<StreamDescriptor>,
}

impl StreamEntry {
    fn new(descriptor: Option<StreamDescriptor>) -> Self {
        Self {
            status: StreamStatus::Active,
            history: Vec::new(),
            truncated: false,
            next_seq: 1,
            subscribers: IndexMap::new(),
            descriptor,
        }
    }
}

#[derive(Default)]
struct EngineState {
    streams: HashMap<StreamId, StreamEntry>,
    interactions: HashMap<InteractionId, Option<Value>>,
}

type SharedState = Arc<Mutex<EngineState>>;

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write handle for one stream.
#[derive(Clone)]
pub struct StreamProducer {
    stream_id: StreamId,
    state: SharedState,
    max_buffered_events: usize,
}

impl StreamProducer {
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Append a batch and deliver it to current subscribers. A batch holding a
    /// terminal event completes the stream and closes every subscription.
    pub fn publish(&self, events: Vec<StreamEvent>) -> Result<(), EngineError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut guard = lock(&self.state);
        let EngineState {
            streams,
            interactions,
        } = &mut *guard;
        let entry = streams
            .get_mut(&self.stream_id)
            .ok_or_else(|| EngineError::stream_not_found(&self.stream_id))?;

        if entry.status == StreamStatus::Complete {
            return Err(EngineError::stream_closed(&self.stream_id));
        }

        for event in &events {
            if let StreamEvent::InteractionRequest(request) = event {
                interactions.entry(request.id.clone()).or_insert(None);
            }
        }

        if !entry.truncated {
            if entry.history.len() + events.len() > self.max_buffered_events {
                warn!(
                    target: "turnstream::engine",
                    stream_id = %self.stream_id,
                    limit = self.max_buffered_events,
                    "Stream history exceeded its bound, buffering stopped"
                );
                entry.truncated = true;
                entry.history.clear();
                entry.history.shrink_to_fit();
            } else {
                entry.history.extend(events.iter().cloned());
            }
        }

        let batch = StreamBatch {
            seq: entry.next_seq,
            events,
        };
        entry.next_seq += 1;
        let terminal = batch.has_terminal();

        entry.subscribers.retain(|subscriber_id, tx| {
            let delivered = tx.send(batch.clone()).is_ok();
            if !delivered {
                debug!(
                    target: "turnstream::engine",
                    subscriber_id = %subscriber_id,
                    "Dropping closed subscriber"
                );
            }
            delivered
        });

        if terminal {
            entry.status = StreamStatus::Complete;
            entry.subscribers.clear();
        }

        Ok(())
    }

    pub fn finish(&self) -> Result<(), EngineError> {
        self.publish(vec![StreamEvent::terminal()])
    }

    /// The answer recorded for an interaction, if any.
    pub fn interaction_response(&self, interaction_id: &InteractionId) -> Option<Value> {
        lock(&self.state)
            .interactions
            .get(interaction_id)
            .cloned()
            .flatten()
    }
}

pub struct LocalExecutionEngine {
    state: SharedState,
    handler: Option<Arc<dyn ExecutionHandler>>,
    max_buffered_events: usize,
}

impl LocalExecutionEngine {
    pub fn new(max_buffered_events: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            handler: None,
            max_buffered_events: max_buffered_events.max(1),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn ExecutionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Open (or reset) a stream and return its producer.
    pub fn open_stream(
        &self,
        stream_id: &StreamId,
        descriptor: Option<StreamDescriptor>,
    ) -> StreamProducer {
        let mut guard = lock(&self.state);
        // Replacing the entry drops the previous turn's senders.
        guard
            .streams
            .insert(stream_id.clone(), StreamEntry::new(descriptor));
        drop(guard);
        self.producer(stream_id)
    }

    /// Producer for an existing stream. Publishing fails if the stream is unknown.
    pub fn producer(&self, stream_id: &StreamId) -> StreamProducer {
        StreamProducer {
            stream_id: stream_id.clone(),
            state: Arc::clone(&self.state),
            max_buffered_events: self.max_buffered_events,
        }
    }

    pub fn subscriber_count(&self, stream_id: &StreamId) -> usize {
        lock(&self.state)
            .streams
            .get(stream_id)
            .map_or(0, |entry| entry.subscribers.len())
    }

    fn status(&self, stream_id: &StreamId) -> Option<StreamStatus> {
        lock(&self.state)
            .streams
            .get(stream_id)
            .map(|entry| entry.status)
    }
}

impl Default for LocalExecutionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERED_EVENTS)
    }
}

#[async_trait]
impl ExecutionEngine for LocalExecutionEngine {
    async fn has_stream(&self, stream_id: &StreamId) -> bool {
        self.status(stream_id).is_some()
    }

    async fn is_stream_active(&self, stream_id: &StreamId) -> bool {
        self.status(stream_id) == Some(StreamStatus::Active)
    }

    async fn is_stream_complete(&self, stream_id: &StreamId) -> bool {
        self.status(stream_id) == Some(StreamStatus::Complete)
    }

    async fn accumulated_events(
        &self,
        stream_id: &StreamId,
    ) -> Result<Vec<StreamEvent>, EngineError> {
        let guard = lock(&self.state);
        let entry = guard
            .streams
            .get(stream_id)
            .ok_or_else(|| EngineError::stream_not_found(stream_id))?;
        if entry.truncated {
            return Err(EngineError::HistoryTruncated {
                stream_id: stream_id.to_string(),
                limit: self.max_buffered_events,
            });
        }
        Ok(entry.history.clone())
    }

    async fn subscribe(
        &self,
        stream_id: &StreamId,
        subscriber_id: &SubscriberId,
    ) -> Result<EventSubscription, EngineError> {
        let mut guard = lock(&self.state);
        let entry = guard
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| EngineError::stream_not_found(stream_id))?;
        if entry.truncated {
            return Err(EngineError::HistoryTruncated {
                stream_id: stream_id.to_string(),
                limit: self.max_buffered_events,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if !entry.history.is_empty() {
            // Receiver is alive, send cannot fail.
            let _ = tx.send(StreamBatch {
                seq: 0,
                events: entry.history.clone(),
            });
        }
        if entry.status == StreamStatus::Active {
            entry.subscribers.insert(subscriber_id.clone(), tx);
        }

        debug!(
            target: "turnstream::engine",
            stream_id = %stream_id,
            subscriber_id = %subscriber_id,
            replayed = entry.history.len(),
            "Subscriber attached"
        );

        Ok(EventSubscription::new(
            stream_id.clone(),
            subscriber_id.clone(),
            rx,
        ))
    }

    async fn unsubscribe(&self, stream_id: &StreamId, subscriber_id: &SubscriberId) {
        let mut guard = lock(&self.state);
        if let Some(entry) = guard.streams.get_mut(stream_id)
            && entry.subscribers.shift_remove(subscriber_id).is_some()
        {
            debug!(
                target: "turnstream::engine",
                stream_id = %stream_id,
                subscriber_id = %subscriber_id,
                "Subscriber detached"
            );
        }
    }

    async fn execute(
        &self,
        stream_id: &StreamId,
        request: ExecutionRequest,
    ) -> Result<(), EngineError> {
        if let Some(handler) = &self.handler {
            handler.admit(&request)?;
        }

        let producer = self.open_stream(stream_id, Some(request.descriptor.clone()));

        if let Some(handler) = self.handler.clone() {
            let stream_id = stream_id.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.run(request, producer).await {
                    warn!(
                        target: "turnstream::engine",
                        stream_id = %stream_id,
                        error = %e,
                        "Execution handler failed"
                    );
                }
            });
        }

        Ok(())
    }

    async fn stream_descriptor(&self, stream_id: &StreamId) -> Option<StreamDescriptor> {
        lock(&self.state)
            .streams
            .get(stream_id)
            .and_then(|entry| entry.descriptor.clone())
    }

    async fn respond_interaction(
        &self,
        interaction_id: &InteractionId,
        value: Value,
    ) -> Result<bool, EngineError> {
        let mut guard = lock(&self.state);
        let slot = guard.interactions.get_mut(interaction_id).ok_or_else(|| {
            EngineError::InteractionNotFound {
                interaction_id: interaction_id.to_string(),
            }
        })?;
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(value);
        Ok(true)
    }
}
