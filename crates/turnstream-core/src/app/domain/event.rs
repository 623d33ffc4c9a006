//! Stream event records.
//!
//! On the wire every event is `{"event_type": "<tag>", "payload": {...}}`.
//! Decoding is total: an unrecognized tag, or a known tag whose payload does not
//! have the expected shape, becomes [`StreamEvent::Unknown`], which the fold
//! ignores.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::attachment::Attachment;
use super::interaction::{InteractionRequest, NavigationIntent};
use super::message::ChatAction;
use super::plan::PlanSnapshot;
use super::response::{Response, ResponseChunk};
use super::types::Timestamp;

pub const PARTIAL_DELTA: &str = "partial_delta";
pub const FULL_SNAPSHOT: &str = "full_snapshot";
pub const TERMINAL: &str = "terminal";
pub const SESSION_LOCAL_PATCH: &str = "session_local_patch";
pub const SESSION_GLOBAL_PATCH: &str = "session_global_patch";
pub const NAVIGATION_INTENT: &str = "navigation_intent";
pub const INTERACTION_REQUEST: &str = "interaction_request";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ResponseChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullSnapshot {
    pub response: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ChatAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ChatAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    PartialDelta(PartialDelta),
    FullSnapshot(FullSnapshot),
    Terminal(TerminalPayload),
    SessionLocalPatch(Map<String, Value>),
    SessionGlobalPatch(Map<String, Value>),
    NavigationIntent(NavigationIntent),
    InteractionRequest(InteractionRequest),
    Unknown { event_type: String },
}

impl StreamEvent {
    /// Decode one wire record. Never fails.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut record) = value else {
            return Self::unknown("");
        };

        let event_type = match record.remove("event_type") {
            Some(Value::String(tag)) => tag,
            _ => return Self::unknown(""),
        };
        let payload = match record.remove("payload") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(payload) => payload,
        };

        let decoded = match event_type.as_str() {
            PARTIAL_DELTA => serde_json::from_value(payload).map(Self::PartialDelta),
            FULL_SNAPSHOT => serde_json::from_value(payload).map(Self::FullSnapshot),
            TERMINAL => serde_json::from_value(payload).map(Self::Terminal),
            SESSION_LOCAL_PATCH => serde_json::from_value(payload).map(Self::SessionLocalPatch),
            SESSION_GLOBAL_PATCH => serde_json::from_value(payload).map(Self::SessionGlobalPatch),
            NAVIGATION_INTENT => serde_json::from_value(payload).map(Self::NavigationIntent),
            INTERACTION_REQUEST => serde_json::from_value(payload).map(Self::InteractionRequest),
            _ => return Self::Unknown { event_type },
        };

        match decoded {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(
                    target: "turnstream::event",
                    event_type = %event_type,
                    error = %e,
                    "Malformed event payload, treating as unknown"
                );
                Self::Unknown { event_type }
            }
        }
    }

    fn unknown(event_type: &str) -> Self {
        Self::Unknown {
            event_type: event_type.to_string(),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::PartialDelta(_) => PARTIAL_DELTA,
            Self::FullSnapshot(_) => FULL_SNAPSHOT,
            Self::Terminal(_) => TERMINAL,
            Self::SessionLocalPatch(_) => SESSION_LOCAL_PATCH,
            Self::SessionGlobalPatch(_) => SESSION_GLOBAL_PATCH,
            Self::NavigationIntent(_) => NAVIGATION_INTENT,
            Self::InteractionRequest(_) => INTERACTION_REQUEST,
            Self::Unknown { event_type } => event_type,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub fn text_delta(text: &str) -> Self {
        Self::PartialDelta(PartialDelta {
            chunk: Some(ResponseChunk::from_text(text)),
            ..PartialDelta::default()
        })
    }

    pub fn terminal() -> Self {
        Self::Terminal(TerminalPayload::default())
    }
}

impl Serialize for StreamEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("StreamEvent", 2)?;
        record.serialize_field("event_type", self.event_type())?;
        match self {
            Self::PartialDelta(p) => record.serialize_field("payload", p)?,
            Self::FullSnapshot(p) => record.serialize_field("payload", p)?,
            Self::Terminal(p) => record.serialize_field("payload", p)?,
            Self::SessionLocalPatch(p) | Self::SessionGlobalPatch(p) => {
                record.serialize_field("payload", p)?;
            }
            Self::NavigationIntent(p) => record.serialize_field("payload", p)?,
            Self::InteractionRequest(p) => record.serialize_field("payload", p)?,
            Self::Unknown { .. } => record.serialize_field("payload", &Map::new())?,
        }
        record.end()
    }
}

impl<'de> Deserialize<'de> for StreamEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}
