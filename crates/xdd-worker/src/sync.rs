// SPDX-License-Identifier: Apache-2.0

//! Tiny counting semaphore used for the per-worker and any-worker
//! availability signals (spec.md §4.6/§4.7: "post it", "any_worker_available
//! semaphore", "this_worker_available semaphore").

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use xdd_types::AbortFlag;

pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Semaphore { count: Mutex::new(initial), cond: Condvar::new() }
    }

    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }

    /// Block until a permit is available or the abort flag is set, in
    /// which case this returns `false` without consuming a permit.
    pub fn wait(&self, abort: &AbortFlag) -> bool {
        let mut count = self.count.lock();
        loop {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            if abort.is_set() {
                return false;
            }
            let _ = self.cond.wait_for(&mut count, Duration::from_millis(200));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_then_wait_consumes_one_permit() {
        let sem = Semaphore::new(0);
        sem.post();
        let abort = AbortFlag::new();
        assert!(sem.wait(&abort));
    }

    #[test]
    fn abort_unblocks_wait_without_a_permit() {
        let sem = Semaphore::new(0);
        let abort = AbortFlag::new();
        abort.set();
        assert!(!sem.wait(&abort));
    }
}
