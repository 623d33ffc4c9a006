use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use super::attachment::Attachment;
use super::plan::PlanStep;
use super::types::{AppId, EventId, MessageId, SessionId, Timestamp, now_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonType {
    Outline,
    Primary,
}

/// A follow-up the user can trigger from a completed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatAction {
    Button(String, ButtonType),
    Form(String, Value),
}

/// One durable row per turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub app_id: AppId,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub files: Vec<Attachment>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ChatAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_steps: Option<Vec<PlanStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_settings: Option<Value>,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn user(
        session_id: SessionId,
        app_id: AppId,
        content: impl Into<String>,
        files: Vec<Attachment>,
        tools: Vec<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            app_id,
            role: Role::User,
            content: content.into(),
            files,
            tools,
            actions: Vec::new(),
            plan_steps: None,
            current_step_id: None,
            rating: None,
            rating_settings: None,
            timestamp: now_millis(),
        }
    }

    /// Empty assistant shell that a stream fills in.
    pub fn assistant_shell(id: MessageId, session_id: SessionId, app_id: AppId) -> Self {
        Self {
            id,
            session_id,
            app_id,
            role: Role::Assistant,
            content: String::new(),
            files: Vec::new(),
            tools: Vec::new(),
            actions: Vec::new(),
            plan_steps: None,
            current_step_id: None,
            rating: None,
            rating_settings: None,
            timestamp: now_millis(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// User-editable fields of a stored message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_settings: Option<Value>,
}

impl MessageUpdate {
    pub fn apply(self, message: &mut Message) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(rating) = self.rating {
            message.rating = Some(rating);
        }
        if let Some(settings) = self.rating_settings {
            message.rating_settings = Some(settings);
        }
    }
}

/// Scoped state keyed by (session, event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSessionState {
    pub session_id: SessionId,
    pub event_id: EventId,
    #[serde(default)]
    pub patch: Map<String, Value>,
}

/// Scoped state keyed by (app, event), shared by every session of the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSessionState {
    pub app_id: AppId,
    pub event_id: EventId,
    #[serde(default)]
    pub patch: Map<String, Value>,
}

/// Shallow merge: top-level keys of `incoming` overwrite those in `target`.
pub fn merge_patch(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        target.insert(key, value);
    }
}

/// Collapse adjacent same-role messages where the later one strictly extends
/// the earlier by length; only the later one is kept.
///
/// Content length is measured in UTF-8 bytes.
pub fn dedup_consecutive(messages: &[Message]) -> Vec<&Message> {
    let mut kept: Vec<&Message> = Vec::with_capacity(messages.len());
    for message in messages {
        if let Some(last) = kept.last_mut()
            && last.role == message.role
            && message.content.len() > last.content.len()
        {
            *last = message;
            continue;
        }
        kept.push(message);
    }
    kept
}
