//! Per-session runtime registries.
//!
//! One [`SessionContext`] is shared (via `Arc`) by the send orchestrator and the
//! subscription controller of a session. Separate sessions get separate
//! contexts and never observe each other's state.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::ledger::CompletionLedger;
use crate::app::domain::message::Message;
use crate::app::domain::preview::PreviewSlot;
use crate::app::domain::types::{StreamId, SubscriberId};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stream → the subscriber currently folding it.
#[derive(Debug, Default)]
pub struct ActiveSubscriptions {
    primaries: Mutex<HashMap<StreamId, SubscriberId>>,
}

impl ActiveSubscriptions {
    /// Claim the primary slot. Succeeds if the slot is free or already held by
    /// `subscriber_id`.
    pub fn claim_primary(&self, stream_id: &StreamId, subscriber_id: &SubscriberId) -> bool {
        let mut primaries = guard(&self.primaries);
        match primaries.get(stream_id) {
            Some(holder) => holder == subscriber_id,
            None => {
                primaries.insert(stream_id.clone(), subscriber_id.clone());
                true
            }
        }
    }

    /// Release the slot if `subscriber_id` holds it.
    pub fn release(&self, stream_id: &StreamId, subscriber_id: &SubscriberId) -> bool {
        let mut primaries = guard(&self.primaries);
        if primaries.get(stream_id) == Some(subscriber_id) {
            primaries.remove(stream_id);
            return true;
        }
        false
    }

    pub fn has_primary(&self, stream_id: &StreamId) -> bool {
        guard(&self.primaries).contains_key(stream_id)
    }

    pub fn primary(&self, stream_id: &StreamId) -> Option<SubscriberId> {
        guard(&self.primaries).get(stream_id).cloned()
    }
}

/// (stream, subscriber) pairs that have already subscribed during the current
/// controller activation.
#[derive(Debug, Default)]
pub struct ReconnectGuard {
    attempted: Mutex<HashSet<(StreamId, SubscriberId)>>,
}

impl ReconnectGuard {
    pub fn try_begin(&self, stream_id: &StreamId, subscriber_id: &SubscriberId) -> bool {
        guard(&self.attempted).insert((stream_id.clone(), subscriber_id.clone()))
    }

    pub fn end(&self, stream_id: &StreamId, subscriber_id: &SubscriberId) {
        guard(&self.attempted).remove(&(stream_id.clone(), subscriber_id.clone()));
    }
}

#[derive(Debug, Default)]
pub struct SessionContext {
    pub ledger: CompletionLedger,
    pub subscriptions: ActiveSubscriptions,
    pub reconnect_guard: ReconnectGuard,
    own_turns: Mutex<HashSet<StreamId>>,
    preview: Mutex<PreviewSlot>,
    checkpoint: tokio::sync::Mutex<()>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the orchestrator of this session started a turn on `stream_id`.
    pub fn mark_own_turn(&self, stream_id: &StreamId) {
        guard(&self.own_turns).insert(stream_id.clone());
    }

    pub fn is_own_turn(&self, stream_id: &StreamId) -> bool {
        guard(&self.own_turns).contains(stream_id)
    }

    /// Returns false if the preview was ignored because that message is
    /// already committed.
    pub fn push_preview(&self, message: Message) -> bool {
        guard(&self.preview).push(message)
    }

    pub fn commit_preview(&self, message: Message) {
        guard(&self.preview).commit(message);
    }

    pub fn discard_preview(&self) {
        guard(&self.preview).discard();
    }

    pub fn visible_message(&self) -> Option<Message> {
        guard(&self.preview).visible().cloned()
    }

    /// Held across each checkpoint write. An incremental write that has
    /// started always lands before the terminal write of the same session.
    pub(crate) async fn checkpoint_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.checkpoint.lock().await
    }

    pub fn preview_phase(&self) -> crate::app::domain::preview::PreviewPhase {
        guard(&self.preview).phase()
    }
}
