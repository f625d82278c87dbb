//! In-memory id → roster entry lookup built by the last whitelist rebuild.

use crate::types::{PersonId, RosterEntry};
use std::collections::HashMap;
use std::sync::RwLock;

/// Roster snapshot keyed by remote person id.
///
/// Owned by the sync engine and shared (via `Arc`) with the session side,
/// which only reads it.
#[derive(Default)]
pub struct RosterCache {
    entries: RwLock<HashMap<PersonId, RosterEntry>>,
}

impl RosterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole snapshot. Entries without a remote id are skipped.
    pub fn replace(&self, entries: Vec<RosterEntry>) {
        let map = entries
            .into_iter()
            .filter_map(|e| e.remote_id.map(|id| (id, e)))
            .collect();
        if let Ok(mut guard) = self.entries.write() {
            *guard = map;
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            guard.clear();
        }
    }

    pub fn get(&self, id: &PersonId) -> Option<RosterEntry> {
        self.entries.read().ok()?.get(id).cloned()
    }

    pub fn find_by_key(&self, identity_key: &str) -> Option<RosterEntry> {
        self.entries
            .read()
            .ok()?
            .values()
            .find(|e| e.identity_key == identity_key)
            .cloned()
    }

    /// Insert or overwrite one entry (must carry a remote id).
    pub fn upsert(&self, entry: RosterEntry) {
        let Some(id) = entry.remote_id else {
            return;
        };
        if let Ok(mut guard) = self.entries.write() {
            guard.insert(id, entry);
        }
    }

    pub fn remove(&self, id: &PersonId) -> Option<RosterEntry> {
        self.entries.write().ok()?.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
