//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Process-wide termination flag (spec §5 "Cancellation", §9 "a lock-free
//! atomic flag for termination is acceptable"). Every loop in the workspace
//! (capture, reopener, async workers) reads this cooperatively.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Termination(Arc<AtomicBool>);

impl Termination {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches() {
        let t = Termination::new();
        assert!(!t.is_requested());
        t.request();
        assert!(t.is_requested());
        let cloned = t.clone();
        assert!(cloned.is_requested());
    }
}
