//! Dialogue history (§5): process-wide, guarded by a mutex. A Turn reads a
//! snapshot before it starts and the pipeline appends to it only once the
//! Turn reaches `complete`, so a Turn never observes its own in-flight
//! exchange.

use crate::adapters::{DialogueRole, HistoryEntry};
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared, cloneable handle onto the conversation's history.
#[derive(Clone, Default)]
pub struct DialogueHistory {
    entries: Arc<Mutex<Vec<HistoryEntry>>>,
}

impl DialogueHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a copy of the history as it stands right now. Cheap relative
    /// to a Turn's adapter calls; the lock is held only for the clone.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.lock().clone()
    }

    /// Appends the user/assistant exchange for one completed Turn.
    pub fn record_turn(&self, user_text: &str, assistant_text: &str) {
        let mut guard = self.entries.lock();
        guard.push(HistoryEntry {
            role: DialogueRole::User,
            text: user_text.to_owned(),
        });
        guard.push(HistoryEntry {
            role: DialogueRole::Assistant,
            text: assistant_text.to_owned(),
        });
    }
}
