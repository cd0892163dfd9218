use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Largest id the registry stores or hands out. Anything above it in a
/// document is treated as missing.
pub const MAX_ID: u64 = i64::MAX as u64;

/// Identity allocator and dirty flag shared by a registry and its databases.
#[derive(Debug)]
pub struct RegistryState {
    next_id: AtomicU64,
    dirty: AtomicBool,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            dirty: AtomicBool::new(false),
        }
    }
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next allocation will hand out.
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Hands out a fresh id and marks the registry dirty so it gets written.
    pub fn allocate_id(&self) -> u64 {
        let id = match self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| next.checked_add(1))
        {
            Ok(id) | Err(id) => id,
        };
        self.mark_dirty();
        id
    }

    /// Records an id read from storage; the allocator never goes backwards.
    pub fn observe_id(&self, id: u64) {
        if id > MAX_ID {
            log::warn!("ignoring out-of-range database id {id}");
            return;
        }
        self.raise_next_id(id + 1);
    }

    pub fn raise_next_id(&self, floor: u64) {
        self.next_id.fetch_max(floor.min(MAX_ID + 1), Ordering::SeqCst);
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_monotonic_and_marks_dirty() {
        let state = RegistryState::new();
        assert!(!state.is_dirty());
        assert_eq!(state.allocate_id(), 1);
        assert_eq!(state.allocate_id(), 2);
        assert!(state.is_dirty());
    }

    #[test]
    fn observed_ids_only_raise_the_counter() {
        let state = RegistryState::new();
        state.observe_id(42);
        assert_eq!(state.next_id(), 43);
        state.observe_id(7);
        state.raise_next_id(10);
        assert_eq!(state.next_id(), 43);
        assert!(!state.is_dirty());
    }

    #[test]
    fn huge_ids_never_wrap_the_counter() {
        let state = RegistryState::new();
        state.observe_id(u64::MAX);
        state.raise_next_id(u64::MAX);
        assert_eq!(state.next_id(), MAX_ID + 1);

        state.observe_id(MAX_ID);
        let first = state.allocate_id();
        let second = state.allocate_id();
        assert_eq!(first, MAX_ID + 1);
        assert!(second > first);
        assert!(state.next_id() > second);
    }
}
