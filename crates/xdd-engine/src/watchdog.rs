// SPDX-License-Identifier: Apache-2.0

//! Barrier watchdog (spec.md §4.2: "a per-barrier occupant chain so a
//! watchdog can diagnose a stuck barrier"). Periodically scans every
//! registered barrier and logs which occupants have been waiting the
//! longest, without ever treating a stall as fatal on its own — only
//! `max_errors`/`stop_on_error` at the target level do that.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use xdd_barrier::BarrierRegistry;
use xdd_types::AbortFlag;

pub struct Watchdog {
    join: Option<JoinHandle<()>>,
    stop: AbortFlag,
}

impl Watchdog {
    pub fn spawn(registry: Arc<BarrierRegistry>, interval: Duration, abort: AbortFlag) -> Self {
        let stop = AbortFlag::new();
        let thread_stop = stop.clone();
        let join = thread::Builder::new()
            .name("xdd-watchdog".into())
            .spawn(move || {
                while !thread_stop.is_set() && !abort.is_set() {
                    thread::sleep(interval);
                    if thread_stop.is_set() || abort.is_set() {
                        break;
                    }
                    registry.log_stuck_occupants();
                }
            })
            .expect("failed to spawn watchdog thread");
        Watchdog { join: Some(join), stop }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.set();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
