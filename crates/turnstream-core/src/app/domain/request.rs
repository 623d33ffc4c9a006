//! Outbound payload for a new turn.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::attachment::Attachment;
use super::message::{
    ChatAction, GlobalSessionState, LocalSessionState, Message, Role, dedup_consecutive,
};
use super::types::SessionId;

pub const DEFAULT_HISTORY_WINDOW: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub sub: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub chat_id: SessionId,
    pub messages: Vec<HistoryMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_session: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_session: Option<Value>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ChatAction>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Build the request from the session's durable history (already ordered by
/// timestamp) and its current scoped state.
///
/// History is deduplicated first, then cut to the last `window` messages.
pub fn build_chat_request(
    session_id: &SessionId,
    history: &[Message],
    window: usize,
    local: Option<&LocalSessionState>,
    global: Option<&GlobalSessionState>,
    tools: Vec<String>,
    attachments: Vec<Attachment>,
) -> ChatRequest {
    let deduped = dedup_consecutive(history);
    let start = deduped.len().saturating_sub(window);

    let messages = deduped[start..]
        .iter()
        .map(|m| HistoryMessage {
            role: m.role,
            content: m.content.clone(),
            files: m.files.clone(),
        })
        .collect();

    ChatRequest {
        chat_id: session_id.clone(),
        messages,
        local_session: local.map(|s| Value::Object(s.patch.clone())),
        global_session: global.map(|s| Value::Object(s.patch.clone())),
        tools,
        actions: Vec::new(),
        attachments,
        user: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::domain::types::{AppId, EventId};
    use serde_json::json;

    fn msg(role: Role, content: &str, ts: u64) -> Message {
        let mut m = Message::user(
            SessionId::from_string("s1"),
            AppId::from_string("app"),
            content,
            vec![],
            vec![],
        )
        .with_timestamp(ts);
        m.role = role;
        m
    }

    #[test]
    fn keeps_only_the_last_window_of_history() {
        let history: Vec<_> = (0..8)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                msg(role, &format!("m{i}"), i)
            })
            .collect();

        let request = build_chat_request(
            &SessionId::from_string("s1"),
            &history,
            DEFAULT_HISTORY_WINDOW,
            None,
            None,
            vec![],
            vec![],
        );

        let contents: Vec<_> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5", "m6", "m7"]);
    }

    #[test]
    fn dedup_runs_before_the_window_cut() {
        let history = vec![
            msg(Role::User, "a", 1),
            msg(Role::Assistant, "He", 2),
            msg(Role::Assistant, "Hello", 3),
            msg(Role::User, "b", 4),
        ];
        let request = build_chat_request(
            &SessionId::from_string("s1"),
            &history,
            3,
            None,
            None,
            vec![],
            vec![],
        );

        let contents: Vec<_> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "Hello", "b"]);
    }

    #[test]
    fn scoped_state_is_forwarded_as_objects() {
        let local = LocalSessionState {
            session_id: SessionId::from_string("s1"),
            event_id: EventId::from_string("chat"),
            patch: json!({"step": 2}).as_object().cloned().unwrap(),
        };
        let request = build_chat_request(
            &SessionId::from_string("s1"),
            &[],
            5,
            Some(&local),
            None,
            vec!["search".into()],
            vec![],
        );

        assert_eq!(request.local_session, Some(json!({"step": 2})));
        assert!(request.global_session.is_none());
        assert_eq!(request.tools, vec!["search"]);
    }
}
