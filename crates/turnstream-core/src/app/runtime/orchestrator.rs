//! Starts turns: consent, user message, outbound request, live subscription.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::checkpoint::CheckpointWriter;
use super::consent::{
    AllowAll, AttachmentMaterializer, CapabilityProbe, ConsentGate, ExecutionDescriptor,
    FixedMode, Passthrough,
};
use super::context::SessionContext;
use super::driver::{DEFAULT_CHECKPOINT_INTERVAL, TurnDriver, TurnOutcome};
use super::engine::{EngineError, ExecutionEngine, ExecutionRequest, StreamDescriptor};
use super::ui::{UiEvent, UiSink};
use crate::app::domain::attachment::Attachment;
use crate::app::domain::message::{Message, MessageUpdate};
use crate::app::domain::request::{DEFAULT_HISTORY_WINDOW, build_chat_request};
use crate::app::domain::state::AggregationState;
use crate::app::domain::types::{
    AppId, EventId, InteractionId, MessageId, SessionId, StreamId, SubscriberId,
};
use crate::app::session::store::{SessionStore, update_message};
use crate::error::{Error, Result};

/// Arguments of one send call, kept verbatim while authorization is pending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendArgs {
    pub content: String,
    #[serde(default)]
    pub files: Vec<Attachment>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub bypass_consent: bool,
}

impl SendArgs {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Bounded retry for `execute`. Only transient engine errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(250),
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from `backoff`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
    pub app_id: AppId,
    pub event_id: EventId,
    pub history_window: usize,
    pub checkpoint_interval: usize,
    pub retry: RetryPolicy,
}

impl TurnConfig {
    pub fn new(app_id: AppId, event_id: EventId) -> Self {
        Self {
            app_id,
            event_id,
            history_window: DEFAULT_HISTORY_WINDOW,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct TurnHandle {
    pub stream_id: StreamId,
    pub user_message: Message,
    pub response_message_id: MessageId,
    handle: JoinHandle<Result<TurnOutcome>>,
}

impl TurnHandle {
    /// Wait for the driver folding this turn.
    pub async fn wait(self) -> Result<TurnOutcome> {
        self.handle.await?
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    /// Nothing was committed; the arguments wait in the pending-retry slot.
    AuthorizationPending { providers: Vec<String> },
    Started(TurnHandle),
}

struct PendingSend {
    args: SendArgs,
    /// Set when the engine refused the turn after the user message was stored,
    /// so the replay reuses it instead of writing a second one.
    user_message: Option<Message>,
}

pub struct SendOrchestrator {
    session_id: SessionId,
    config: TurnConfig,
    subscriber_id: SubscriberId,
    engine: Arc<dyn ExecutionEngine>,
    store: Arc<dyn SessionStore>,
    consent: Arc<dyn ConsentGate>,
    probe: Arc<dyn CapabilityProbe>,
    materializer: Arc<dyn AttachmentMaterializer>,
    context: Arc<SessionContext>,
    writer: Arc<CheckpointWriter>,
    ui: UiSink,
    pending: Mutex<Option<PendingSend>>,
}

impl SendOrchestrator {
    pub fn new(
        session_id: SessionId,
        config: TurnConfig,
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
            session_id,
            config,
            subscriber_id: SubscriberId::from_string(format!("send-{}", SubscriberId::new())),
            engine,
            store,
            consent: Arc::new(AllowAll),
            probe: Arc::new(FixedMode::default()),
            materializer: Arc::new(Passthrough),
            context,
            writer,
            ui,
            pending: Mutex::new(None),
        }
    }

    pub fn with_consent_gate(mut self, consent: Arc<dyn ConsentGate>) -> Self {
        self.consent = consent;
        self
    }

    pub fn with_capability_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn AttachmentMaterializer>) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn stream_id(&self) -> StreamId {
        StreamId::for_session(&self.session_id)
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingSend>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arguments waiting for an authorization grant.
    pub fn pending_retry(&self) -> Option<SendArgs> {
        self.pending().as_ref().map(|p| p.args.clone())
    }

    pub async fn send(&self, args: SendArgs) -> Result<SendOutcome> {
        self.send_with(args, None).await
    }

    /// Replay the stashed call with consent bypassed. Returns `None` when
    /// nothing was pending.
    pub async fn on_authorization_granted(&self) -> Result<Option<SendOutcome>> {
        let Some(pending) = self.pending().take() else {
            return Ok(None);
        };
        info!(
            target: "turnstream::orchestrator",
            session_id = %self.session_id,
            "Authorization granted, replaying send"
        );
        let args = SendArgs {
            bypass_consent: true,
            ..pending.args
        };
        self.send_with(args, pending.user_message).await.map(Some)
    }

    pub async fn respond_to_interaction(
        &self,
        interaction_id: &InteractionId,
        value: Value,
    ) -> Result<bool> {
        let accepted = self
            .engine
            .respond_interaction(interaction_id, value)
            .await?;
        if accepted {
            self.ui.emit(UiEvent::InteractionResolved {
                id: interaction_id.clone(),
            });
        }
        Ok(accepted)
    }

    pub async fn update_message(&self, id: &MessageId, update: MessageUpdate) -> Result<Message> {
        Ok(update_message(self.store.as_ref(), id, update).await?)
    }

    async fn send_with(&self, args: SendArgs, stored_user: Option<Message>) -> Result<SendOutcome> {
        self.ui.emit(UiEvent::SendingChanged(true));

        let offline = self.probe.is_offline(&self.config.app_id).await;

        if !args.bypass_consent {
            let descriptor = ExecutionDescriptor {
                app_id: self.config.app_id.clone(),
                event_id: self.config.event_id.clone(),
                tools: args.tools.clone(),
                offline,
            };
            let check = self
                .consent
                .check_authorization(&self.config.app_id, &descriptor)
                .await
                .map_err(|e| self.fail(e.into()))?;
            if !check.is_authorized() {
                return Ok(self.suspend(args, None, check.missing_providers));
            }
        }

        let files = self
            .materializer
            .materialize(args.files.clone())
            .await
            .map_err(|e| self.fail(e.into()))?;

        let user = match stored_user {
            Some(user) => user,
            None => self
                .new_user_message(&args, files.clone())
                .await
                .map_err(|e| self.fail(e))?,
        };
        self.store
            .put_message(&user)
            .await
            .map_err(|e| self.fail(e.into()))?;

        match self.start_turn(&args, user.clone(), files, offline).await {
            Ok(handle) => Ok(SendOutcome::Started(handle)),
            Err(e) if e.is_authorization() => {
                let providers = e.missing_providers().map(<[String]>::to_vec).unwrap_or_default();
                Ok(self.suspend(args, Some(user), providers))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// The user message sorts after everything already in the session, even
    /// when the previous reply was stamped ahead of the clock.
    async fn new_user_message(&self, args: &SendArgs, files: Vec<Attachment>) -> Result<Message> {
        let latest = self
            .store
            .query_messages(&self.session_id)
            .await?
            .last()
            .map(|m| m.timestamp);
        let user = Message::user(
            self.session_id.clone(),
            self.config.app_id.clone(),
            args.content.clone(),
            files,
            args.tools.clone(),
        );
        let timestamp = latest.map_or(user.timestamp, |ts| user.timestamp.max(ts + 1));
        Ok(user.with_timestamp(timestamp))
    }

    async fn start_turn(
        &self,
        args: &SendArgs,
        user: Message,
        files: Vec<Attachment>,
        offline: bool,
    ) -> Result<TurnHandle> {
        let stream_id = self.stream_id();
        self.context.ledger.clear(&stream_id);

        let history = self.store.query_messages(&self.session_id).await?;
        let local = self
            .store
            .load_local_state(&self.session_id, &self.config.event_id)
            .await?;
        let global = self
            .store
            .load_global_state(&self.config.app_id, &self.config.event_id)
            .await?;
        let payload = build_chat_request(
            &self.session_id,
            &history,
            self.config.history_window,
            local.as_ref(),
            global.as_ref(),
            args.tools.clone(),
            files,
        );

        let shell = Message::assistant_shell(
            MessageId::new(),
            self.session_id.clone(),
            self.config.app_id.clone(),
        )
        .with_timestamp(user.timestamp + 1);
        let response_message_id = shell.id.clone();
        if self.context.push_preview(shell.clone()) {
            self.ui.emit(UiEvent::PreviewUpdated(shell.clone()));
        }

        if !self
            .context
            .subscriptions
            .claim_primary(&stream_id, &self.subscriber_id)
        {
            self.rollback(&stream_id, &response_message_id);
            return Err(Error::InvalidOperation(format!(
                "Stream {stream_id} is still being folded by another subscriber"
            )));
        }
        self.context.mark_own_turn(&stream_id);

        let request = ExecutionRequest {
            descriptor: StreamDescriptor {
                session_id: self.session_id.clone(),
                app_id: self.config.app_id.clone(),
                event_id: self.config.event_id.clone(),
                response_message_id: response_message_id.clone(),
            },
            payload,
            offline,
            checkpoint_interval: self.config.checkpoint_interval,
        };

        let subscription = match self.execute_with_retry(&stream_id, request).await {
            Ok(()) => self.engine.subscribe(&stream_id, &self.subscriber_id).await,
            Err(e) => Err(e),
        };
        let subscription = match subscription {
            Ok(subscription) => subscription,
            Err(e) => {
                self.rollback(&stream_id, &response_message_id);
                return Err(e.into());
            }
        };

        let state = AggregationState::new(shell, self.config.event_id.clone())
            .with_scoped_state(local, global);
        let driver = TurnDriver::new(
            subscription,
            state,
            Arc::clone(&self.writer),
            Arc::clone(&self.context),
            self.ui.clone(),
        )
        .with_checkpoint_interval(self.config.checkpoint_interval);

        info!(
            target: "turnstream::orchestrator",
            session_id = %self.session_id,
            stream_id = %stream_id,
            message_id = %response_message_id,
            "Turn started"
        );

        Ok(TurnHandle {
            stream_id,
            user_message: user,
            response_message_id,
            handle: tokio::spawn(driver.run()),
        })
    }

    async fn execute_with_retry(
        &self,
        stream_id: &StreamId,
        request: ExecutionRequest,
    ) -> std::result::Result<(), EngineError> {
        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            match self.engine.execute(stream_id, request.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        target: "turnstream::orchestrator",
                        stream_id = %stream_id,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Execute failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn suspend(
        &self,
        args: SendArgs,
        user_message: Option<Message>,
        providers: Vec<String>,
    ) -> SendOutcome {
        debug!(
            target: "turnstream::orchestrator",
            session_id = %self.session_id,
            providers = ?providers,
            "Send waiting for authorization"
        );
        *self.pending() = Some(PendingSend { args, user_message });
        self.ui.emit(UiEvent::AuthorizationRequired {
            providers: providers.clone(),
        });
        self.ui.emit(UiEvent::SendingChanged(false));
        SendOutcome::AuthorizationPending { providers }
    }

    fn rollback(&self, stream_id: &StreamId, message_id: &MessageId) {
        self.context.discard_preview();
        self.ui.emit(UiEvent::PreviewCleared {
            message_id: message_id.clone(),
        });
        self.context
            .subscriptions
            .release(stream_id, &self.subscriber_id);
    }

    fn fail(&self, e: Error) -> Error {
        error!(
            target: "turnstream::orchestrator",
            session_id = %self.session_id,
            error = %e,
            "Send failed"
        );
        self.ui.emit(UiEvent::SendFailed {
            reason: e.to_string(),
        });
        self.ui.emit(UiEvent::SendingChanged(false));
        e
    }
}
