use indexmap::IndexMap;
use std::collections::HashSet;

use super::attachment::AttachmentSet;
use super::interaction::{InteractionRequest, NavigationIntent};
use super::message::{GlobalSessionState, LocalSessionState, Message};
use super::response::Response;
use super::types::{AppId, EventId, InteractionId, SessionId, Timestamp};

/// Identity used when a scoped state record is created lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateScope {
    pub session_id: SessionId,
    pub app_id: AppId,
    pub event_id: EventId,
}

/// Fold accumulator for one in-flight turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationState {
    pub scope: StateScope,
    pub accumulated_response: Response,
    pub message: Message,
    pub attachments: AttachmentSet,
    pub local_state: Option<LocalSessionState>,
    pub global_state: Option<GlobalSessionState>,
    pub done: bool,
    /// Latest logical timestamp seen in plan snapshots or terminal payloads.
    pub last_timestamp: Option<Timestamp>,
    pub(crate) seen_navigation: HashSet<NavigationIntent>,
    pub(crate) seen_interactions: HashSet<InteractionId>,
    pub(crate) active_interactions: IndexMap<InteractionId, InteractionRequest>,
}

impl AggregationState {
    /// Start folding into `message`, an assistant shell owned by this turn.
    pub fn new(message: Message, event_id: EventId) -> Self {
        let scope = StateScope {
            session_id: message.session_id.clone(),
            app_id: message.app_id.clone(),
            event_id,
        };
        let mut attachments = AttachmentSet::new();
        attachments.extend(message.files.iter().cloned());

        Self {
            scope,
            accumulated_response: Response::new(),
            message,
            attachments,
            local_state: None,
            global_state: None,
            done: false,
            last_timestamp: None,
            seen_navigation: HashSet::new(),
            seen_interactions: HashSet::new(),
            active_interactions: IndexMap::new(),
        }
    }

    /// Seed scoped state loaded from durable storage.
    pub fn with_scoped_state(
        mut self,
        local: Option<LocalSessionState>,
        global: Option<GlobalSessionState>,
    ) -> Self {
        self.local_state = local;
        self.global_state = global;
        self
    }

    pub fn active_interactions(&self) -> impl Iterator<Item = &InteractionRequest> {
        self.active_interactions.values()
    }

    /// Drop an interaction from the active set once answered. Later duplicate
    /// deliveries of the same id stay suppressed.
    pub fn resolve_interaction(&mut self, id: &InteractionId) -> bool {
        self.active_interactions.shift_remove(id).is_some()
    }

    /// The message as it should be persisted: content is taken from the
    /// latest assistant entry of the accumulated response when there is one.
    pub fn finalized_message(&self) -> Message {
        let mut message = self.message.clone();
        if let Some(content) = self.accumulated_response.last_assistant_content() {
            message.content = content.to_string();
        }
        message
    }

    pub(crate) fn observe_timestamp(&mut self, timestamp: Option<Timestamp>) {
        if let Some(ts) = timestamp {
            self.last_timestamp = Some(self.last_timestamp.map_or(ts, |last| last.max(ts)));
        }
    }
}
