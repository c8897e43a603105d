// SPDX-License-Identifier: Apache-2.0

//! Barrier fabric (spec.md §4.2, component C2).
//!
//! A named N-way rendezvous: `init`, `pass-start`, `pass-complete`, and
//! `final` all use this same primitive with a different occupant count.
//! Every barrier keeps a chain of occupant records (who entered, when, and
//! when they left) so a watchdog can report which occupants are stuck
//! rather than just reporting "the barrier never completed". All barriers
//! built through a [`BarrierRegistry`] are chained together there so a
//! shutdown can tear down every barrier in one pass (DESIGN NOTES, spec.md
//! §9 "Cyclic barrier chain").

pub mod error;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use xdd_clock::Clock;
use xdd_types::AbortFlag;

pub use error::Error;

/// What kind of participant is entering a barrier, used only for
/// diagnostics (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupantKind {
    Target,
    Worker,
    Support,
    Main,
}

#[derive(Debug, Clone)]
struct Occupant {
    name: String,
    kind: OccupantKind,
    enter_ns: u64,
    exit_ns: Option<u64>,
}

struct State {
    generation: u64,
    arrived: usize,
    occupants: Vec<Occupant>,
}

/// A single named rendezvous point for exactly `participants` occupants.
pub struct Barrier {
    name: String,
    participants: usize,
    clock: Clock,
    state: Mutex<State>,
    cond: Condvar,
    abort: AbortFlag,
}

impl Barrier {
    pub fn new(name: impl Into<String>, participants: usize, clock: Clock, abort: AbortFlag) -> Self {
        Barrier {
            name: name.into(),
            participants,
            clock,
            state: Mutex::new(State {
                generation: 0,
                arrived: 0,
                occupants: Vec::new(),
            }),
            cond: Condvar::new(),
            abort,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until `participants` occupants have called `enter`, then
    /// release all of them simultaneously. Returns early (without treating
    /// it as an error) if the abort flag becomes set while waiting, per
    /// spec.md §5: "Barriers unblock all waiters once the flag is set".
    pub fn enter(&self, occupant_name: impl Into<String>, kind: OccupantKind) -> Result<(), Error> {
        let mut state = self.state.lock();
        let generation = state.generation;
        let enter_ns = self.clock.now();
        state.occupants.push(Occupant {
            name: occupant_name.into(),
            kind,
            enter_ns,
            exit_ns: None,
        });
        state.arrived += 1;

        if state.arrived >= self.participants {
            state.arrived = 0;
            state.generation += 1;
            let exit_ns = self.clock.now();
            for occ in state.occupants.iter_mut() {
                if occ.exit_ns.is_none() {
                    occ.exit_ns = Some(exit_ns);
                }
            }
            self.cond.notify_all();
            return Ok(());
        }

        loop {
            if self.abort.is_set() {
                return Ok(());
            }
            if state.generation != generation {
                return Ok(());
            }
            let timed_out = self
                .cond
                .wait_for(&mut state, Duration::from_millis(200))
                .timed_out();
            if timed_out && self.abort.is_set() {
                return Ok(());
            }
        }
    }

    /// Occupants currently waiting at this barrier, for watchdog reporting.
    pub fn stuck_occupants(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .occupants
            .iter()
            .filter(|o| o.exit_ns.is_none())
            .map(|o| format!("{} ({:?}) waiting since {}ns", o.name, o.kind, o.enter_ns))
            .collect()
    }

    /// Tear down this barrier. An abort in progress means stuck occupants
    /// are expected and must not be logged as an error (spec.md §4.2:
    /// "Barrier destruction after a user abort must not diagnose
    /// 'unfinished' barriers as errors").
    pub fn destroy(&self) {
        if !self.abort.is_set() {
            let stuck = self.stuck_occupants();
            if !stuck.is_empty() {
                tracing::warn!(barrier = %self.name, ?stuck, "barrier destroyed with unfinished occupants");
            }
        }
    }
}

/// Registry of every barrier in a run, used for total teardown (spec.md §9
/// "Cyclic barrier chain" -> "a registry owned by the run").
#[derive(Default)]
pub struct BarrierRegistry {
    barriers: Mutex<Vec<Arc<Barrier>>>,
}

impl BarrierRegistry {
    pub fn new() -> Self {
        BarrierRegistry::default()
    }

    pub fn register(&self, barrier: Arc<Barrier>) {
        self.barriers.lock().push(barrier);
    }

    /// Destroy every registered barrier, in reverse registration order, the
    /// way the orchestrator tears down in the reverse of build order
    /// (spec.md §5 "Shared resource policy").
    pub fn destroy_all(&self) {
        let barriers = self.barriers.lock();
        for barrier in barriers.iter().rev() {
            barrier.destroy();
        }
    }

    /// Log occupants still waiting at any registered barrier, for a
    /// watchdog thread (spec.md §4.2 "a watchdog can diagnose a stuck
    /// barrier").
    pub fn log_stuck_occupants(&self) {
        let barriers = self.barriers.lock();
        for barrier in barriers.iter() {
            let stuck = barrier.stuck_occupants();
            if !stuck.is_empty() {
                tracing::warn!(barrier = %barrier.name(), ?stuck, "barrier has occupants waiting");
            }
        }
    }
}

/// Watchdog snapshot helper: time spent so far in the current generation.
pub fn elapsed_since(start: Instant) -> Duration {
    start.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn releases_all_participants_once_full() {
        let clock = Clock::new();
        let abort = AbortFlag::new();
        let barrier = StdArc::new(Barrier::new("test", 3, clock, abort));

        let mut handles = Vec::new();
        for i in 0..3 {
            let b = barrier.clone();
            handles.push(thread::spawn(move || {
                b.enter(format!("occupant-{i}"), OccupantKind::Worker).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn abort_releases_waiters_without_full_count() {
        let clock = Clock::new();
        let abort = AbortFlag::new();
        let barrier = StdArc::new(Barrier::new("test", 2, clock, abort.clone()));

        let b2 = barrier.clone();
        let handle = thread::spawn(move || {
            b2.enter("only-one", OccupantKind::Worker).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        abort.set();
        handle.join().unwrap();
    }

    #[test]
    fn destroy_after_abort_does_not_panic_on_stuck_occupants() {
        let clock = Clock::new();
        let abort = AbortFlag::new();
        let barrier = Barrier::new("test", 5, clock, abort.clone());
        barrier.enter("lone", OccupantKind::Target).ok();
        abort.set();
        barrier.destroy();
    }
}
