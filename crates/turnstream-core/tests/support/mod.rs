use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

use turnstream_core::app::domain::{
    AppId, EventId, GlobalSessionState, LocalSessionState, Message, MessageId, Role, SessionId,
    StreamEvent, StreamId,
};
use turnstream_core::app::runtime::{
    EngineError, ExecutionEngine, ExecutionHandler, ExecutionRequest, LocalExecutionEngine,
    SendOrchestrator, SessionContext, StreamProducer, SubscriptionController, TurnConfig, UiEvent,
    UiSink,
};
use turnstream_core::app::session::{InMemorySessionStore, SessionStore, StoreError};

pub type Feed = mpsc::UnboundedSender<Vec<StreamEvent>>;

/// Handler whose batches are pushed by the test, one feed per executed turn.
#[derive(Default)]
pub struct GatedHandler {
    feeds: Mutex<VecDeque<mpsc::UnboundedReceiver<Vec<StreamEvent>>>>,
    rejections: Mutex<VecDeque<EngineError>>,
    attempts: AtomicUsize,
}

impl GatedHandler {
    /// Feed for the next turn that gets executed.
    pub fn next_turn(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().push_back(rx);
        tx
    }

    pub fn reject_next(&self, error: EngineError) {
        self.rejections.lock().unwrap().push_back(error);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionHandler for GatedHandler {
    fn admit(&self, _request: &ExecutionRequest) -> Result<(), EngineError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.rejections.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn run(
        &self,
        _request: ExecutionRequest,
        producer: StreamProducer,
    ) -> Result<(), EngineError> {
        let feed = self.feeds.lock().unwrap().pop_front();
        let Some(mut feed) = feed else {
            return producer.finish();
        };
        while let Some(batch) = feed.recv().await {
            let terminal = batch.iter().any(StreamEvent::is_terminal);
            producer.publish(batch)?;
            if terminal {
                break;
            }
        }
        Ok(())
    }
}

/// In-memory store that can fail or stall message writes.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemorySessionStore,
    failing_replies: AtomicUsize,
    slow_content: Mutex<Option<String>>,
    /// Notified when a stalled write begins.
    pub writing: Notify,
}

impl FaultyStore {
    /// Fail the next `count` assistant message writes.
    pub fn fail_replies(&self, count: usize) {
        self.failing_replies.store(count, Ordering::SeqCst);
    }

    /// Stall writes of messages whose content is exactly `content`.
    pub fn stall_on(&self, content: &str) {
        *self.slow_content.lock().unwrap() = Some(content.to_string());
    }
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn put_message(&self, message: &Message) -> Result<(), StoreError> {
        if message.role == Role::Assistant
            && self
                .failing_replies
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::database("disk full"));
        }
        let stall = self.slow_content.lock().unwrap().as_deref() == Some(message.content.as_str());
        if stall {
            self.writing.notify_one();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.inner.put_message(message).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        self.inner.get_message(id).await
    }

    async fn query_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.inner.query_messages(session_id).await
    }

    async fn put_local_state(&self, state: &LocalSessionState) -> Result<(), StoreError> {
        self.inner.put_local_state(state).await
    }

    async fn put_global_state(&self, state: &GlobalSessionState) -> Result<(), StoreError> {
        self.inner.put_global_state(state).await
    }

    async fn load_local_state(
        &self,
        session_id: &SessionId,
        event_id: &EventId,
    ) -> Result<Option<LocalSessionState>, StoreError> {
        self.inner.load_local_state(session_id, event_id).await
    }

    async fn load_global_state(
        &self,
        app_id: &AppId,
        event_id: &EventId,
    ) -> Result<Option<GlobalSessionState>, StoreError> {
        self.inner.load_global_state(app_id, event_id).await
    }
}

pub fn session() -> SessionId {
    SessionId::from_string("session-1")
}

pub fn stream() -> StreamId {
    StreamId::for_session(&session())
}

pub fn app() -> AppId {
    AppId::from_string("app-1")
}

pub fn event() -> EventId {
    EventId::from_string("chat")
}

pub struct Harness {
    pub engine: Arc<LocalExecutionEngine>,
    pub handler: Arc<GatedHandler>,
    pub store: Arc<dyn SessionStore>,
    pub context: Arc<SessionContext>,
    pub ui: UiSink,
    pub ui_rx: mpsc::UnboundedReceiver<UiEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemorySessionStore::new()))
    }

    pub fn with_store(store: Arc<dyn SessionStore>) -> Self {
        let handler = Arc::new(GatedHandler::default());
        let engine = Arc::new(LocalExecutionEngine::default().with_handler(handler.clone()));
        let (ui, ui_rx) = UiSink::channel();
        Self {
            engine,
            handler,
            store,
            context: Arc::new(SessionContext::new()),
            ui,
            ui_rx,
        }
    }

    pub fn config(&self) -> TurnConfig {
        TurnConfig::new(app(), event())
    }

    pub fn orchestrator(&self) -> SendOrchestrator {
        self.orchestrator_with(self.config())
    }

    pub fn orchestrator_with(&self, config: TurnConfig) -> SendOrchestrator {
        SendOrchestrator::new(
            session(),
            config,
            self.engine.clone(),
            self.store.clone(),
            self.context.clone(),
            self.ui.clone(),
        )
    }

    pub fn controller(&self) -> SubscriptionController {
        SubscriptionController::new(
            self.engine.clone(),
            self.store.clone(),
            self.context.clone(),
            self.ui.clone(),
        )
    }

    pub fn drain_ui(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.ui_rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn wait_until_complete(&self, stream_id: &StreamId) {
        while !self.engine.is_stream_complete(stream_id).await {
            tokio::task::yield_now().await;
        }
    }
}

/// Preview contents in emission order with consecutive repeats collapsed.
pub fn preview_contents(events: &[UiEvent]) -> Vec<String> {
    let mut contents: Vec<String> = Vec::new();
    for event in events {
        if let UiEvent::PreviewUpdated(message) = event
            && contents.last() != Some(&message.content)
        {
            contents.push(message.content.clone());
        }
    }
    contents
}
