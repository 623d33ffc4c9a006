use super::message::Message;
use super::types::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPhase {
    Empty,
    Previewing,
    Committed,
}

/// Optimistic view of the in-flight assistant message.
///
/// Holds the durable value and the in-flight preview side by side; once the
/// durable value is present it is what [`PreviewSlot::visible`] returns.
#[derive(Debug, Clone)]
pub struct PreviewSlot {
    phase: PreviewPhase,
    durable: Option<Message>,
    preview: Option<Message>,
}

impl Default for PreviewSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewSlot {
    pub fn new() -> Self {
        Self {
            phase: PreviewPhase::Empty,
            durable: None,
            preview: None,
        }
    }

    pub fn phase(&self) -> PreviewPhase {
        self.phase
    }

    /// Returns false when the push was ignored because that message has
    /// already been committed.
    pub fn push(&mut self, message: Message) -> bool {
        if let Some(durable) = &self.durable
            && durable.id == message.id
        {
            return false;
        }
        if self.durable.is_some() {
            // A different message id starts a new turn.
            self.durable = None;
        }
        self.preview = Some(message);
        self.phase = PreviewPhase::Previewing;
        true
    }

    /// Record the persisted value and drop the preview.
    pub fn commit(&mut self, message: Message) {
        self.durable = Some(message);
        self.preview = None;
        self.phase = PreviewPhase::Committed;
    }

    /// Drop the preview without committing, e.g. after a failed send.
    pub fn discard(&mut self) {
        self.preview = None;
        if self.durable.is_none() {
            self.phase = PreviewPhase::Empty;
        }
    }

    pub fn visible(&self) -> Option<&Message> {
        self.durable.as_ref().or(self.preview.as_ref())
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.visible().map(|m| &m.id)
    }
}
