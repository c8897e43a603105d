// SPDX-License-Identifier: Apache-2.0

//! Global abort flag (spec.md §5 "Cancellation semantics").
//!
//! A single atomic flag shared by every thread in a run. Set by a signal
//! handler or a fatal error; every suspension point (barrier wait, task
//! wait, throttle sleep) observes it and unwinds cooperatively rather than
//! being killed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for AbortFlag {
    fn default() -> Self {
        Self::new()
    }
}
