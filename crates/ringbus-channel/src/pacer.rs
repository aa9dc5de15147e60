use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::event::Event;

/// Bounds how many frame boundaries the producer may queue ahead of the
/// consumer.
///
/// The producer increments `pending` before publishing each boundary
/// record; the consumer decrements it when the boundary is dispatched.
/// With queue depth `n`, `pending` never exceeds `n + 1`: the `+ 1` is the
/// boundary the producer is blocked on.
#[derive(Debug)]
pub(crate) struct FramePacer {
    pending: AtomicU32,
    listener_waiting: AtomicBool,
    frame_drained: Event,
}

impl FramePacer {
    pub fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            listener_waiting: AtomicBool::new(false),
            frame_drained: Event::new(),
        }
    }

    /// Producer side: account a new boundary. Returns the prior count; a
    /// prior count at or above the queue depth means the producer must wait.
    pub fn begin_frame(&self) -> u32 {
        self.pending.fetch_add(1, Ordering::SeqCst)
    }

    /// Producer side: roll back `begin_frame` when the record never made it
    /// into the ring.
    pub fn abort_frame(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn pending(&self, order: Ordering) -> u32 {
        self.pending.load(order)
    }

    /// Producer side: announce that it is about to sleep on `frame_drained`.
    pub fn arm_listener(&self) {
        self.listener_waiting.store(true, Ordering::SeqCst);
    }

    pub fn clear_listener(&self) {
        self.listener_waiting.store(false, Ordering::SeqCst);
    }

    /// Producer side: sleep until the consumer dispatches a boundary.
    pub fn wait_frame_drained(&self) {
        self.frame_drained.wait();
    }

    /// Wake the producer regardless of the backlog. Used by cancellation.
    pub fn release_listener(&self) {
        self.frame_drained.set();
    }

    /// Consumer side: a boundary record was dispatched.
    ///
    /// The decrement and the producer's `arm_listener` store are both
    /// SeqCst: either the producer's backlog re-check sees the decrement,
    /// or this swap sees the armed listener and posts. No interleaving
    /// strands a sleeping producer.
    pub fn note_frame_dispatched(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        if self.listener_waiting.swap(false, Ordering::SeqCst) {
            self.frame_drained.set();
        }
    }

    /// Consumer side: the ring is fully drained; release a listener that
    /// armed itself after its boundary was already consumed.
    pub fn service_drained(&self) {
        if self.listener_waiting.swap(false, Ordering::SeqCst) {
            self.frame_drained.set();
        }
    }

    /// Zero the backlog. Only valid under quiesce.
    pub fn reset(&self) {
        self.pending.store(0, Ordering::SeqCst);
        self.listener_waiting.store(false, Ordering::SeqCst);
    }

    /// Restore a captured backlog. Only valid under quiesce.
    pub fn restore(&self, pending: u32) {
        self.pending.store(pending, Ordering::SeqCst);
        self.listener_waiting.store(false, Ordering::SeqCst);
    }
}
