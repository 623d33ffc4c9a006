use tokio::sync::mpsc;
use tracing::trace;

use crate::app::domain::interaction::{InteractionRequest, NavigationIntent};
use crate::app::domain::message::Message;
use crate::app::domain::types::{InteractionId, MessageId};

/// Signals for whatever renders the session.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    PreviewUpdated(Message),
    PreviewCleared { message_id: MessageId },
    ScrollToBottom,
    AuthorizationRequired { providers: Vec<String> },
    SendFailed { reason: String },
    SendingChanged(bool),
    Navigate(NavigationIntent),
    InteractionRequested(InteractionRequest),
    InteractionResolved { id: InteractionId },
}

/// Fire-and-forget sender; a dropped receiver is not an error.
#[derive(Debug, Clone)]
pub struct UiSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiSink {
    pub fn new(tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            trace!(target: "turnstream::ui", "UI receiver dropped");
        }
    }
}
