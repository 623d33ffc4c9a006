use super::Command;
use crate::error::Error;
use crate::script::{load_batches, rebatch};
use async_trait::async_trait;
use eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use turnstream_core::app::domain::{AppId, EventId, Message, SessionId, StreamEvent};
use turnstream_core::app::runtime::{
    EngineError, ExecutionHandler, ExecutionRequest, LocalExecutionEngine, SendArgs,
    SendOrchestrator, SendOutcome, SessionContext, StreamProducer, TurnOutcome, UiEvent, UiSink,
};
use turnstream_core::app::session::{InMemorySessionStore, SessionStore, SqliteSessionStore};
use turnstream_core::preferences::StreamingPreferences;

/// Publishes a fixed list of batches, then finishes the stream if the script
/// did not.
pub struct ScriptHandler {
    batches: Mutex<Vec<Vec<StreamEvent>>>,
}

impl ScriptHandler {
    pub fn new(batches: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            batches: Mutex::new(batches),
        }
    }
}

#[async_trait]
impl ExecutionHandler for ScriptHandler {
    async fn run(
        &self,
        request: ExecutionRequest,
        producer: StreamProducer,
    ) -> std::result::Result<(), EngineError> {
        let batches = std::mem::take(
            &mut *self
                .batches
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        debug!(
            target: "turnstream::cli",
            history = request.payload.messages.len(),
            batches = batches.len(),
            "Replaying script"
        );

        for batch in batches {
            let terminal = batch.iter().any(StreamEvent::is_terminal);
            producer.publish(batch)?;
            if terminal {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
        producer.finish()
    }
}

pub struct ReplayCommand {
    pub events: PathBuf,
    pub batch_size: Option<usize>,
    pub session: Option<SessionId>,
    pub message: String,
    /// `None` keeps the turn in memory.
    pub store_path: Option<PathBuf>,
    pub streaming: StreamingPreferences,
}

#[async_trait]
impl Command for ReplayCommand {
    async fn execute(&self) -> Result<()> {
        let messages = self.run().await?;
        let mut stdout = std::io::stdout();
        for message in &messages {
            writeln!(stdout, "{}", serde_json::to_string(message)?)?;
        }
        Ok(())
    }
}

impl ReplayCommand {
    /// Run the turn and return the session's persisted messages.
    pub async fn run(&self) -> std::result::Result<Vec<Message>, Error> {
        let mut batches = load_batches(&self.events)?;
        if let Some(size) = self.batch_size {
            batches = rebatch(batches, size);
        }

        let store: Arc<dyn SessionStore> = match &self.store_path {
            Some(path) => Arc::new(SqliteSessionStore::new(path).await?),
            None => Arc::new(InMemorySessionStore::new()),
        };
        let engine = Arc::new(
            LocalExecutionEngine::new(self.streaming.max_buffered_events)
                .with_handler(Arc::new(ScriptHandler::new(batches))),
        );
        let session_id = self.session.clone().unwrap_or_default();
        let (ui, mut ui_rx) = UiSink::channel();
        let orchestrator = SendOrchestrator::new(
            session_id.clone(),
            self.streaming
                .turn_config(AppId::from_string("cli"), EventId::from_string("replay")),
            engine,
            Arc::clone(&store),
            Arc::new(SessionContext::new()),
            ui,
        );

        let outcome = match orchestrator.send(SendArgs::text(self.message.clone())).await {
            Ok(SendOutcome::Started(turn)) => turn.wait().await.map_err(Error::from)?,
            Ok(SendOutcome::AuthorizationPending { providers }) => {
                return Err(Error::Config(format!(
                    "Authorization required for providers: {}",
                    providers.join(", ")
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut previews = 0usize;
        while let Ok(event) = ui_rx.try_recv() {
            if matches!(event, UiEvent::PreviewUpdated(_)) {
                previews += 1;
            }
        }
        info!(
            target: "turnstream::cli",
            session_id = %session_id,
            previews,
            completed = matches!(outcome, TurnOutcome::Completed(_)),
            "Replay finished"
        );

        Ok(store.query_messages(&session_id).await?)
    }
}
