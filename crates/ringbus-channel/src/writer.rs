//! Producer-side interface: sends, reservations, stalls and drain waits.

use std::hint;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use ringbus_record::record::{self, Slot, SLOT_BYTES};
use ringbus_record::{opcode, RecordError, RecordShape};
use tracing::trace;

use crate::channel::Shared;
use crate::error::{ChannelError, Result};

/// Producer handle. Exactly one exists per channel.
///
/// Every send either completes fully (space reserved, slots written,
/// position published) or returns before any partial write becomes
/// visible. Sends block when the ring lacks space; frame boundaries
/// additionally block when the pacing queue is full.
pub struct Writer {
    shared: Arc<Shared>,
    /// Slots published since the consumer was last woken.
    tally: u64,
}

impl Writer {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared, tally: 0 }
    }

    /// Send a one-slot record carrying three data words.
    pub fn send_inline(&mut self, opcode: u32, data: [u32; 3]) -> Result<()> {
        self.check_user_shape(opcode, RecordShape::Inline)?;
        self.publish_slot(record::encode_inline(opcode, data))
    }

    /// Send a one-slot record carrying a borrowed handle.
    ///
    /// The referent must stay alive and unmoved until the consumer has
    /// dispatched this record. Sends that need a result written back
    /// through the handle must follow up with
    /// [`wait_until_drained`](Self::wait_until_drained) before touching
    /// the referent again.
    pub fn send_pointer(&mut self, opcode: u32, data0: u32, handle: u64) -> Result<()> {
        self.check_user_shape(opcode, RecordShape::Pointer)?;
        self.publish_slot(record::encode_pointer(opcode, data0, handle))
    }

    /// Reserve ring space for a payload of at most `max_bytes` and return
    /// a cursor to fill and commit. Dropping the cursor uncommitted
    /// abandons the reservation without publishing anything.
    pub fn reserve(&mut self, opcode: u32, max_bytes: usize) -> Result<Reservation<'_>> {
        self.check_user_shape(opcode, RecordShape::Data)?;
        let declared_slots = record::slots_for_bytes(max_bytes);
        let span = 1 + u64::from(declared_slots);
        if span >= self.shared.ring.capacity() {
            return Err(RecordError::ReservationTooLarge {
                slots: declared_slots,
                capacity: self.shared.ring.capacity(),
            }
            .into());
        }
        let start = self.stall_for(span)?;
        // SAFETY: stall_for reserved [start, start + span); nothing in that
        // range is published yet.
        unsafe {
            self.shared
                .ring
                .write_slot(start, record::encode_data_header(opcode, declared_slots, 0));
        }
        Ok(Reservation {
            writer: self,
            opcode,
            start,
            declared_slots,
            bytes_written: 0,
        })
    }

    /// Copy a complete payload as one Data record.
    pub fn send_data(&mut self, opcode: u32, payload: &[u8]) -> Result<()> {
        let mut reservation = self.reserve(opcode, payload.len())?;
        reservation.write_bytes(payload)?;
        reservation.commit()
    }

    /// Publish a frame boundary and yield to pacing: blocks while more
    /// than `queue_depth` boundaries are undrained.
    pub fn frame_boundary(&mut self, field: u32) -> Result<()> {
        let prior = self.shared.pacer.begin_frame();
        if let Err(err) = self.send_control_inline(opcode::FRAME_BOUNDARY, [field, 0, 0]) {
            self.shared.pacer.abort_frame();
            return Err(err);
        }
        self.flush();
        let depth = self.shared.config.queue_depth;
        if prior < depth {
            return Ok(());
        }
        trace!(pending = prior + 1, "frame queue full, pacing producer");
        let result = loop {
            if let Some(fault) = self.shared.fault.take() {
                break Err(fault);
            }
            if self.shared.is_cancelled() {
                break Err(ChannelError::Cancelled);
            }
            if self.shared.pacer.pending(Ordering::SeqCst) <= depth {
                break Ok(());
            }
            self.shared.pacer.arm_listener();
            if self.shared.pacer.pending(Ordering::SeqCst) <= depth {
                break Ok(());
            }
            self.shared.pacer.wait_frame_drained();
        };
        self.shared.pacer.clear_listener();
        result
    }

    /// Wake the consumer regardless of the batching tally.
    pub fn flush(&mut self) {
        self.shared.flow.wake_consumer();
        self.tally = 0;
    }

    /// Block until every record published so far has been dispatched.
    pub fn wait_until_drained(&mut self) -> Result<()> {
        let target = self.shared.ring.write_pos(Ordering::Relaxed);
        self.wait_for_read_pos(target)
    }

    /// Free slots as currently visible to the producer.
    pub fn free_slots(&self) -> u64 {
        let ring = &self.shared.ring;
        ring.capacity() - (ring.write_pos(Ordering::Relaxed) - ring.read_pos(Ordering::Acquire))
    }

    /// Undrained frame boundaries.
    pub fn pending_frames(&self) -> u32 {
        self.shared.pacer.pending(Ordering::SeqCst)
    }

    pub(crate) fn send_control_inline(&mut self, opcode_word: u32, data: [u32; 3]) -> Result<()> {
        debug_assert_eq!(opcode::control_shape(opcode_word), Some(RecordShape::Inline));
        self.publish_slot(record::encode_inline(opcode_word, data))
    }

    pub(crate) fn send_control_pointer(
        &mut self,
        opcode_word: u32,
        data0: u32,
        handle: u64,
    ) -> Result<()> {
        debug_assert_eq!(opcode::control_shape(opcode_word), Some(RecordShape::Pointer));
        self.publish_slot(record::encode_pointer(opcode_word, data0, handle))
    }

    pub(crate) fn reset_tally(&mut self) {
        self.tally = 0;
    }

    fn check_user_shape(&self, opcode_word: u32, actual: RecordShape) -> Result<()> {
        if opcode::is_reserved(opcode_word) {
            return Err(RecordError::ReservedOpcode {
                opcode: opcode_word,
            }
            .into());
        }
        let position = self.shared.ring.write_pos(Ordering::Relaxed);
        let expected = self.shared.registered_shape(opcode_word, position)?;
        if expected != actual {
            return Err(RecordError::ShapeMismatch {
                opcode: opcode_word,
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    fn publish_slot(&mut self, slot: Slot) -> Result<()> {
        let start = self.stall_for(1)?;
        // SAFETY: stall_for reserved this slot; it is not published yet.
        unsafe { self.shared.ring.write_slot(start, slot) };
        self.publish(start + 1)
    }

    /// Publish `write_pos = end` and run the post-publish duties: batched
    /// wakeup, and the full drain wait in synchronous mode.
    fn publish(&mut self, end: u64) -> Result<()> {
        let span = end - self.shared.ring.write_pos(Ordering::Relaxed);
        // SeqCst pairs with the consumer's pre-sleep WritePos re-check; one
        // side always observes the other.
        self.shared.ring.store_write_pos(end, Ordering::SeqCst);
        self.tally += span;
        if self.tally > self.shared.config.wakeup_tally_slots {
            if !self.shared.flow.is_busy(Ordering::SeqCst) {
                self.shared.flow.wake_consumer();
            }
            self.tally = 0;
        }
        if self.shared.config.synchronous {
            self.wait_for_read_pos(end)?;
        }
        Ok(())
    }

    /// Block until `span` slots are free beyond the one kept in reserve,
    /// then return the record's start position.
    fn stall_for(&mut self, span: u64) -> Result<u64> {
        self.shared.check_cancelled()?;
        debug_assert!(span < self.shared.ring.capacity());
        if self.free_slots() <= span {
            self.stall_slow(span)?;
        }
        Ok(self.shared.ring.write_pos(Ordering::Relaxed))
    }

    fn stall_slow(&mut self, span: u64) -> Result<()> {
        let spin_limit = self.shared.config.spin_threshold_slots;
        trace!(
            span,
            free = self.free_slots(),
            "producer stalling for ring space"
        );
        self.flush();
        loop {
            if let Some(fault) = self.shared.fault.take() {
                return Err(fault);
            }
            self.shared.check_cancelled()?;
            let free = self.free_slots();
            if free > span {
                return Ok(());
            }
            let shortfall = span + 1 - free;
            if shortfall <= spin_limit {
                if !self.shared.flow.is_busy(Ordering::SeqCst) {
                    self.shared.flow.wake_consumer();
                }
                hint::spin_loop();
                thread::yield_now();
            } else {
                self.shared.flow.arm_signal(shortfall);
                // The consumer may have freed everything between the free
                // computation and the arm; never sleep on stale space.
                if self.free_slots() > span {
                    self.shared.flow.disarm_signal();
                    return Ok(());
                }
                if !self.shared.flow.is_busy(Ordering::SeqCst) {
                    self.shared.flow.wake_consumer();
                }
                self.shared.flow.wait_space_freed();
            }
        }
    }

    /// Block until the consumer's ReadPos reaches `target`. Rethrows a
    /// pending fault before waiting and after every wake.
    fn wait_for_read_pos(&mut self, target: u64) -> Result<()> {
        if self.shared.ring.read_pos(Ordering::SeqCst) >= target {
            // The consumer stores a fault before it advances past the
            // faulting record, so checking positions first is safe.
            if let Some(fault) = self.shared.fault.take() {
                return Err(fault);
            }
            return Ok(());
        }
        self.flush();
        let result = loop {
            if let Some(fault) = self.shared.fault.take() {
                break Err(fault);
            }
            if self.shared.ring.read_pos(Ordering::SeqCst) >= target {
                if let Some(fault) = self.shared.fault.take() {
                    break Err(fault);
                }
                break Ok(());
            }
            if self.shared.is_cancelled() {
                break Err(ChannelError::Cancelled);
            }
            self.shared.drain_waiter.store(true, Ordering::SeqCst);
            if self.shared.ring.read_pos(Ordering::SeqCst) >= target {
                continue;
            }
            self.shared.progress.wait();
        };
        self.shared.drain_waiter.store(false, Ordering::SeqCst);
        result
    }
}

/// An uncommitted Data record: a header slot plus reserved payload slots.
///
/// Filled incrementally with [`write_bytes`](Self::write_bytes), made
/// visible atomically by [`commit`](Self::commit). The committed record
/// spans only the slots the payload actually used; untouched reserved
/// slots return to the ring.
pub struct Reservation<'a> {
    writer: &'a mut Writer,
    opcode: u32,
    start: u64,
    declared_slots: u32,
    bytes_written: usize,
}

impl Reservation<'_> {
    /// Append payload bytes after any previously written ones. A copy
    /// crossing the physical end of storage splits into two contiguous
    /// runs, tail of the array first.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let limit = self.declared_slots as usize * SLOT_BYTES;
        if self.bytes_written + bytes.len() > limit {
            return Err(RecordError::PayloadOverrun {
                bytes: self.bytes_written + bytes.len(),
                slots: self.declared_slots,
            }
            .into());
        }
        // SAFETY: bounds-checked against the reserved, unpublished region.
        unsafe {
            self.writer
                .shared
                .ring
                .copy_in(self.start + 1, self.bytes_written, bytes);
        }
        self.bytes_written += bytes.len();
        Ok(())
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Back-patch the header with the true payload size and publish the
    /// record. The consumer observes header and payload as one unit.
    pub fn commit(self) -> Result<()> {
        let actual_slots = record::slots_for_bytes(self.bytes_written);
        let header =
            record::encode_data_header(self.opcode, actual_slots, self.bytes_written as u32);
        // SAFETY: the header slot stays producer-owned until the publish
        // below makes the whole record visible.
        unsafe { self.writer.shared.ring.write_slot(self.start, header) };
        self.writer.publish(self.start + 1 + u64::from(actual_slots))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::config::ChannelConfig;

    const INLINE_OP: u32 = opcode::USER_OPCODE_START;
    const POINTER_OP: u32 = opcode::USER_OPCODE_START + 1;
    const DATA_OP: u32 = opcode::USER_OPCODE_START + 2;

    fn test_shapes() -> Vec<RecordShape> {
        vec![RecordShape::Inline, RecordShape::Pointer, RecordShape::Data]
    }

    fn writer_with(config: ChannelConfig) -> Writer {
        Writer::new(Arc::new(Shared::new(config.with_user_shapes(test_shapes()))))
    }

    #[test]
    fn rejects_reserved_opcodes_on_the_user_interface() {
        let mut writer = writer_with(ChannelConfig::default());
        let err = writer
            .send_inline(opcode::RESET, [0; 3])
            .expect_err("reserved opcode should be rejected");
        assert!(matches!(
            err,
            ChannelError::Corruption(RecordError::ReservedOpcode { .. })
        ));
    }

    #[test]
    fn rejects_shape_mismatches() {
        let mut writer = writer_with(ChannelConfig::default());
        let err = writer
            .send_inline(POINTER_OP, [0; 3])
            .expect_err("inline send of a pointer opcode should be rejected");
        assert!(matches!(
            err,
            ChannelError::Corruption(RecordError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unregistered_opcodes() {
        let mut writer = writer_with(ChannelConfig::default());
        let err = writer
            .send_inline(opcode::USER_OPCODE_START + 40, [0; 3])
            .expect_err("unregistered opcode should be rejected");
        assert!(matches!(
            err,
            ChannelError::Corruption(RecordError::UnknownOpcode { .. })
        ));
    }

    #[test]
    fn oversized_reservation_fails_fast() {
        let mut writer = writer_with(ChannelConfig::default().with_capacity_slots(8));
        // 7 payload slots + 1 header can never leave a slot spare in an
        // 8-slot ring.
        let err = writer
            .reserve(DATA_OP, 7 * SLOT_BYTES)
            .err()
            .expect("oversized reservation should fail");
        assert!(matches!(
            err,
            ChannelError::Corruption(RecordError::ReservationTooLarge { .. })
        ));
    }

    #[test]
    fn payload_overrun_is_rejected_at_write_time() {
        let mut writer = writer_with(ChannelConfig::default());
        let mut reservation = writer
            .reserve(DATA_OP, 16)
            .expect("one-slot reservation should succeed");
        reservation
            .write_bytes(&[0u8; 16])
            .expect("declared bytes should fit");
        let err = reservation
            .write_bytes(&[0u8; 1])
            .expect_err("overrun should be rejected");
        assert!(matches!(
            err,
            ChannelError::Corruption(RecordError::PayloadOverrun { .. })
        ));
    }

    #[test]
    fn commit_trims_unused_reserved_slots() {
        let mut writer = writer_with(ChannelConfig::default());
        let reservation = {
            let mut r = writer
                .reserve(DATA_OP, 4 * SLOT_BYTES)
                .expect("reservation should succeed");
            r.write_bytes(&[7u8; 10]).expect("payload should fit");
            r
        };
        reservation.commit().expect("commit should succeed");
        // Header plus one payload slot, not the four declared.
        assert_eq!(writer.shared.ring.write_pos(Ordering::Relaxed), 2);
    }

    #[test]
    fn dropped_reservation_publishes_nothing() {
        let mut writer = writer_with(ChannelConfig::default());
        {
            let mut reservation = writer
                .reserve(DATA_OP, 32)
                .expect("reservation should succeed");
            reservation
                .write_bytes(b"goes nowhere")
                .expect("write should succeed");
        }
        assert_eq!(writer.shared.ring.write_pos(Ordering::Relaxed), 0);
        writer
            .send_inline(INLINE_OP, [1, 2, 3])
            .expect("abandoned slots should be reusable");
        assert_eq!(writer.shared.ring.write_pos(Ordering::Relaxed), 1);
    }

    #[test]
    fn batched_wakeup_fires_once_the_tally_crosses() {
        let mut writer = writer_with(ChannelConfig {
            wakeup_tally_slots: 2,
            ..ChannelConfig::default()
        });
        let shared = writer.shared.clone();
        let (tx, rx) = mpsc::channel();
        let waiter = std::thread::spawn(move || {
            shared.flow.wait_for_wakeup();
            tx.send(()).expect("probe channel should be open");
        });

        writer
            .send_inline(INLINE_OP, [0; 3])
            .expect("send should succeed");
        writer
            .send_inline(INLINE_OP, [0; 3])
            .expect("send should succeed");
        assert!(
            rx.try_recv().is_err(),
            "two slots must not cross a tally of 2"
        );

        writer
            .send_inline(INLINE_OP, [0; 3])
            .expect("send should succeed");
        rx.recv_timeout(Duration::from_secs(1))
            .expect("third slot should wake the consumer");
        waiter.join().expect("probe thread should finish");
    }

    #[test]
    fn send_fails_after_cancellation() {
        let mut writer = writer_with(ChannelConfig::default());
        writer.shared.cancel_internal();
        let err = writer
            .send_inline(INLINE_OP, [0; 3])
            .expect_err("cancelled channel should reject sends");
        assert!(matches!(err, ChannelError::Cancelled));
    }
}
