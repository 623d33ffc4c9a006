use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::app::domain::types::StreamId;

/// Streams whose terminal event has already been persisted in this process.
///
/// Not persisted across restarts. Check and mark happen under one lock with
/// no suspension in between.
#[derive(Debug, Default)]
pub struct CompletionLedger {
    processed: Mutex<HashSet<StreamId>>,
}

impl CompletionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashSet<StreamId>> {
        self.processed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has(&self, stream_id: &StreamId) -> bool {
        self.entries().contains(stream_id)
    }

    pub fn mark(&self, stream_id: &StreamId) {
        self.entries().insert(stream_id.clone());
    }

    /// Mark unless already marked. Returns true only for the caller that marked.
    pub fn try_mark(&self, stream_id: &StreamId) -> bool {
        self.entries().insert(stream_id.clone())
    }

    pub fn clear(&self, stream_id: &StreamId) {
        self.entries().remove(stream_id);
    }
}
