use std::sync::{Arc, RwLock};

use super::TargetSet;

/// Swappable handle to the current [`TargetSet`].
///
/// Readers take a cheap `Arc` snapshot; reconfiguration replaces the whole
/// set and never mutates one that is already shared.
#[derive(Debug, Clone, Default)]
pub struct SharedTargets {
    inner: Arc<RwLock<Arc<TargetSet>>>,
}

impl SharedTargets {
    pub fn new(set: TargetSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(set))),
        }
    }

    pub fn snapshot(&self) -> Arc<TargetSet> {
        self.inner.read().expect("target set lock poisoned").clone()
    }

    pub fn replace(&self, set: TargetSet) {
        *self.inner.write().expect("target set lock poisoned") = Arc::new(set);
    }
}
