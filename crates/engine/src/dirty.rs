use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared "unsaved work" flag for the host. Each editor holds a
/// registration and the flag is set while any registration is dirty.
#[derive(Debug, Clone, Default)]
pub struct DirtyState {
    dirty: Arc<AtomicUsize>,
}

impl DirtyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire) > 0
    }

    /// Number of registrations currently dirty.
    pub fn dirty_count(&self) -> usize {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn register(&self) -> DirtyRegistration {
        DirtyRegistration {
            dirty: Arc::clone(&self.dirty),
            set: false,
        }
    }
}

/// One participant's contribution to a [`DirtyState`]. Dropping it clears
/// the contribution.
#[derive(Debug)]
pub struct DirtyRegistration {
    dirty: Arc<AtomicUsize>,
    set: bool,
}

impl DirtyRegistration {
    pub fn set(&mut self, dirty: bool) {
        if dirty == self.set {
            return;
        }
        if dirty {
            self.dirty.fetch_add(1, Ordering::AcqRel);
        } else {
            self.dirty.fetch_sub(1, Ordering::AcqRel);
        }
        self.set = dirty;
    }

    pub fn is_set(&self) -> bool {
        self.set
    }
}

impl Drop for DirtyRegistration {
    fn drop(&mut self) {
        self.set(false);
    }
}
