//! Process-wide best-effort last-known voltage.

use std::sync::{Arc, Mutex};

/// Shared, mutable, optional last-known voltage.
///
/// A plain mutex rather than an `AtomicI64` with a sentinel: `None` is a
/// real third state ("never observed"), not just "zero", and readers need
/// an atomic read-or-absent rather than a racy "is it still the sentinel"
/// check. Cloning shares the same cell.
#[derive(Debug, Clone, Default)]
pub struct VoltageState {
    inner: Arc<Mutex<Option<i64>>>,
}

impl VoltageState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed voltage, or `None` if never set.
    pub fn get(&self) -> Option<i64> {
        *self.inner.lock().expect("voltage state mutex poisoned")
    }

    /// Commit a newly-observed voltage.
    pub fn set(&self, v: i64) {
        *self.inner.lock().expect("voltage state mutex poisoned") = Some(v);
        tracing::debug!(voltage = v, "updated last-known voltage");
    }
}
