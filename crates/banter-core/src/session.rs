//! Per-owner single-flight turn admission.
//!
//! An owner may have at most one turn in flight. Admission hands out an RAII
//! guard; dropping the guard releases the owner on every exit path, including
//! unwinding and task abort.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Registry of owners with a turn currently in flight.
///
/// Implementations must make `try_begin` an atomic check-and-insert under
/// concurrent callers.
pub trait TurnRegistry: Send + Sync {
    /// Mark `owner_id` as busy. Returns false when a turn is already in
    /// flight for this owner.
    fn try_begin(&self, owner_id: i64) -> bool;

    /// Clear the busy marker for `owner_id`, if any.
    fn finish(&self, owner_id: i64);

    /// Whether `owner_id` currently has a turn in flight.
    fn is_busy(&self, owner_id: i64) -> bool;
}

/// In-memory registry backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryTurnRegistry {
    entries: DashMap<i64, ()>,
}

impl InMemoryTurnRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnRegistry for InMemoryTurnRegistry {
    fn try_begin(&self, owner_id: i64) -> bool {
        match self.entries.entry(owner_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(());
                true
            }
        }
    }

    fn finish(&self, owner_id: i64) {
        self.entries.remove(&owner_id);
    }

    fn is_busy(&self, owner_id: i64) -> bool {
        self.entries.contains_key(&owner_id)
    }
}

/// RAII permit for one turn. Holding the guard means the owner is admitted;
/// dropping it releases the owner.
pub struct SessionGuard {
    registry: Arc<dyn TurnRegistry>,
    owner_id: i64,
}

impl SessionGuard {
    /// Try to begin a turn for `owner_id`. Returns `None` while another turn
    /// for the same owner is still in flight.
    pub fn try_acquire(registry: Arc<dyn TurnRegistry>, owner_id: i64) -> Option<Self> {
        if registry.try_begin(owner_id) {
            Some(Self { registry, owner_id })
        } else {
            None
        }
    }

    pub fn owner_id(&self) -> i64 {
        self.owner_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.finish(self.owner_id);
    }
}
