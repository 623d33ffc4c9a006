pub mod attachment;
pub mod event;
pub mod interaction;
pub mod message;
pub mod plan;
pub mod preview;
pub mod reduce;
pub mod request;
pub mod response;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

pub use attachment::{Attachment, AttachmentSet, ComplexAttachment};
pub use event::{FullSnapshot, PartialDelta, StreamEvent, TerminalPayload};
pub use interaction::{InteractionKind, InteractionRequest, NavigationIntent};
pub use message::{
    ButtonType, ChatAction, GlobalSessionState, LocalSessionState, Message, MessageUpdate, Role,
    dedup_consecutive,
};
pub use plan::{PlanSnapshot, PlanStatus, PlanStep};
pub use preview::{PreviewPhase, PreviewSlot};
pub use reduce::{FoldOutput, fold};
pub use request::{ChatRequest, HistoryMessage, build_chat_request};
pub use response::{Response, ResponseChunk};
pub use state::{AggregationState, StateScope};
pub use types::{
    AppId, EventId, InteractionId, MessageId, SessionId, StreamId, SubscriberId, Timestamp,
    now_millis,
};
