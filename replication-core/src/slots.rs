use std::collections::HashSet;
use std::sync::Mutex;

/// Cluster-unique reservation of named submission slots. A held slot means an
/// active non-terminal task with that name exists or is being created.
///
/// The arbiter has its own synchronization and is safe to call both from the
/// leader append path and from the applier while the status write lock is
/// held.
#[derive(Debug, Default)]
pub struct SlotArbiter {
    slots: Mutex<HashSet<String>>,
}

impl SlotArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserves `slot`. Returns true iff it was not already held.
    pub fn assign_slot(&self, slot: &str) -> bool {
        self.slots
            .lock()
            .expect("slot arbiter lock poisoned")
            .insert(slot.to_string())
    }

    /// Releases `slot`. Idempotent.
    pub fn release_slot(&self, slot: &str) {
        self.slots
            .lock()
            .expect("slot arbiter lock poisoned")
            .remove(slot);
    }

    /// True if `slot` is currently held. Only a hint under concurrency;
    /// `assign_slot` is the authoritative check.
    pub fn is_assigned(&self, slot: &str) -> bool {
        self.slots
            .lock()
            .expect("slot arbiter lock poisoned")
            .contains(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_is_exclusive() {
        let arbiter = SlotArbiter::new();
        assert!(arbiter.assign_slot("s"));
        assert!(!arbiter.assign_slot("s"));
        assert!(arbiter.assign_slot("other"));
    }

    #[test]
    fn release_frees_the_slot() {
        let arbiter = SlotArbiter::new();
        assert!(arbiter.assign_slot("s"));
        arbiter.release_slot("s");
        assert!(arbiter.assign_slot("s"));
    }

    #[test]
    fn assignment_is_visible() {
        let arbiter = SlotArbiter::new();
        assert!(!arbiter.is_assigned("s"));
        arbiter.assign_slot("s");
        assert!(arbiter.is_assigned("s"));
        arbiter.release_slot("s");
        assert!(!arbiter.is_assigned("s"));
    }

    #[test]
    fn release_is_idempotent() {
        let arbiter = SlotArbiter::new();
        arbiter.release_slot("never-held");
        assert!(arbiter.assign_slot("never-held"));
    }
}
