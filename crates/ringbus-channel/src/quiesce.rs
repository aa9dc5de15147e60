use std::sync::{Condvar, Mutex, PoisonError};

use tracing::trace;

use crate::event::lock;

/// Consumer phase as observed through the quiesce gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderPhase {
    /// Waiting for work; safe for external state mutation while held.
    Idle,
    /// Inside a drain cycle.
    Draining,
    /// Exited; the thread is gone or about to be.
    Parked,
}

#[derive(Debug)]
struct GateState {
    phase: ReaderPhase,
    requested: bool,
}

/// Request/acknowledge handshake that parks the consumer observably idle.
///
/// A controller acquires the gate; the consumer finishes its current drain
/// cycle, acknowledges by leaving the Draining phase, and does not start a
/// new cycle until the guard is dropped. Shared positions may only be
/// mutated out of protocol while a guard is held.
#[derive(Debug)]
pub(crate) struct QuiesceGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl QuiesceGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                phase: ReaderPhase::Parked,
                requested: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Consumer side: about to scan for work. Blocks while a quiesce is
    /// held.
    pub fn enter_drain(&self) {
        let mut state = lock(&self.state);
        while state.requested {
            state = self
                .cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.phase = ReaderPhase::Draining;
        self.cv.notify_all();
    }

    /// Consumer side: the drain cycle is over.
    pub fn enter_idle(&self) {
        let mut state = lock(&self.state);
        state.phase = ReaderPhase::Idle;
        self.cv.notify_all();
    }

    /// Consumer side: leaving the dispatch loop for good.
    pub fn enter_parked(&self) {
        let mut state = lock(&self.state);
        state.phase = ReaderPhase::Parked;
        self.cv.notify_all();
    }

    pub fn phase(&self) -> ReaderPhase {
        lock(&self.state).phase
    }

    /// Controller side: hold the consumer out of the Draining phase.
    ///
    /// Blocks until the current drain cycle, if any, completes. The caller
    /// must have drained the ring first if it needs `read_pos == write_pos`;
    /// acquiring with records still queued parks them until release.
    pub fn acquire(&self) -> QuiesceGuard<'_> {
        let mut state = lock(&self.state);
        state.requested = true;
        while state.phase == ReaderPhase::Draining {
            state = self
                .cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        trace!(phase = ?state.phase, "quiesce acquired");
        QuiesceGuard { gate: self }
    }
}

/// Releases the quiesce hold on drop.
pub(crate) struct QuiesceGuard<'a> {
    gate: &'a QuiesceGate,
}

impl Drop for QuiesceGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.gate.state);
        state.requested = false;
        self.gate.cv.notify_all();
    }
}
