use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use tracing::trace;

use crate::event::Event;

/// Backpressure state shared between the producer and the consumer.
///
/// The producer stalls instead of overwriting unread slots. Small
/// shortfalls are spin-polled for latency; large ones arm `signal_threshold`
/// and sleep on `space_freed` until the consumer has advanced far enough.
#[derive(Debug)]
pub(crate) struct FlowControl {
    /// Consumer is inside a drain cycle.
    busy: AtomicBool,
    /// A producer is sleeping until `signal_threshold` slots are freed.
    signal_enabled: AtomicBool,
    /// Slots the consumer must still free before posting `space_freed`.
    signal_threshold: AtomicI64,
    /// Wakes the consumer out of idle.
    wakeup: Event,
    /// Wakes a producer blocked on a large-shortfall stall.
    space_freed: Event,
}

impl FlowControl {
    pub fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            signal_enabled: AtomicBool::new(false),
            signal_threshold: AtomicI64::new(0),
            wakeup: Event::new(),
            space_freed: Event::new(),
        }
    }

    pub fn set_busy(&self, busy: bool, order: Ordering) {
        self.busy.store(busy, order);
    }

    pub fn is_busy(&self, order: Ordering) -> bool {
        self.busy.load(order)
    }

    /// Signal the consumer's wakeup event.
    pub fn wake_consumer(&self) {
        self.wakeup.set();
    }

    /// Consumer idle wait; consumes one wakeup signal.
    pub fn wait_for_wakeup(&self) {
        self.wakeup.wait();
    }

    /// Producer side: arm the release signal before sleeping.
    ///
    /// The consumer will post `space_freed` once it has advanced by
    /// `threshold` slots in total since arming.
    pub fn arm_signal(&self, threshold: u64) {
        self.signal_threshold
            .store(threshold as i64, Ordering::Release);
        self.signal_enabled.store(true, Ordering::SeqCst);
        trace!(threshold, "space-freed signal armed");
    }

    /// Producer side: drop the armed signal after the stall resolves.
    pub fn disarm_signal(&self) {
        self.signal_enabled.store(false, Ordering::SeqCst);
        self.signal_threshold.store(0, Ordering::Release);
    }

    /// Producer side: sleep until the consumer posts the armed signal.
    pub fn wait_space_freed(&self) {
        self.space_freed.wait();
    }

    /// Wake a producer regardless of the threshold. Used by cancellation.
    pub fn release_space_waiter(&self) {
        self.space_freed.set();
    }

    /// Consumer side: account an advance of `slots` against an armed signal.
    pub fn note_advance(&self, slots: u64) {
        if self.signal_enabled.load(Ordering::Acquire) {
            let remaining = self
                .signal_threshold
                .fetch_sub(slots as i64, Ordering::AcqRel)
                - slots as i64;
            if remaining <= 0 {
                self.signal_enabled.store(false, Ordering::SeqCst);
                self.space_freed.set();
            }
        }
    }

    /// Consumer side: the ring is fully drained, so any armed signal is
    /// satisfiable now regardless of its remaining threshold.
    pub fn service_drained(&self) {
        if self.signal_enabled.swap(false, Ordering::SeqCst) {
            self.signal_threshold.store(0, Ordering::Release);
            self.space_freed.set();
        }
    }
}
