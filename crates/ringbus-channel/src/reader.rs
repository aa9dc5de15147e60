//! Consumer-side dispatch loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use ringbus_record::record::{self, Record, SLOT_BYTES};
use ringbus_record::{opcode, FreezeMode, RecordError};
use tracing::{debug, error, trace};

use crate::channel::Shared;
use crate::error::ChannelError;
use crate::handler::{Backend, BackendError, Dispatch, Payload};
use crate::snapshot::FreezeRequest;

/// Dispatched records retained for corruption diagnostics.
const TRACE_DEPTH: usize = 16;

/// Rolling window of the most recently dispatched records.
struct RecentTrace {
    entries: [(u64, u32); TRACE_DEPTH],
    len: usize,
    next: usize,
}

impl RecentTrace {
    fn new() -> Self {
        Self {
            entries: [(0, 0); TRACE_DEPTH],
            len: 0,
            next: 0,
        }
    }

    fn record(&mut self, position: u64, opcode_word: u32) {
        self.entries[self.next] = (position, opcode_word);
        self.next = (self.next + 1) % TRACE_DEPTH;
        self.len = (self.len + 1).min(TRACE_DEPTH);
    }

    /// Entries oldest first.
    fn entries(&self) -> Vec<(u64, u32)> {
        let mut out = Vec::with_capacity(self.len);
        let start = (self.next + TRACE_DEPTH - self.len) % TRACE_DEPTH;
        for i in 0..self.len {
            out.push(self.entries[(start + i) % TRACE_DEPTH]);
        }
        out
    }

    fn describe(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|(position, op)| format!("{position}:{}({op:#06x})", opcode::opcode_name(op)))
            .collect()
    }
}

struct DispatchStep {
    span: u64,
    stop: bool,
}

/// The consumer thread's state: the shared channel core, the backend being
/// driven, and the diagnostic trace.
pub(crate) struct ReaderCore {
    shared: Arc<Shared>,
    backend: Box<dyn Backend>,
    trace: RecentTrace,
}

impl ReaderCore {
    pub fn new(shared: Arc<Shared>, backend: Box<dyn Backend>) -> Self {
        Self {
            shared,
            backend,
            trace: RecentTrace::new(),
        }
    }

    /// Thread body. Returns the backend so the channel can reuse it across
    /// close/open cycles.
    pub fn run(mut self) -> Box<dyn Backend> {
        debug!("consumer thread running");
        if let Err(fault) = self.backend.open() {
            error!(error = %fault, "backend failed to open");
            self.capture_fault(fault);
            self.shared.cancel_internal();
            self.shared.gate.enter_parked();
            return self.backend;
        }
        self.shared.open_done.set();

        loop {
            // Only entered from Idle: quiesce acquirers block this
            // transition, never a mid-cycle one.
            self.shared.gate.enter_drain();
            let mut stop;
            loop {
                self.shared.flow.set_busy(true, Ordering::SeqCst);
                stop = self.drain_cycle();
                self.shared.flow.set_busy(false, Ordering::SeqCst);
                if stop {
                    break;
                }
                // Pre-sleep re-check, SeqCst against the producer's
                // publish: a record committed while we were going idle
                // must not strand until the next wakeup.
                if self.shared.ring.write_pos(Ordering::SeqCst)
                    == self.shared.ring.read_pos(Ordering::Relaxed)
                {
                    break;
                }
            }
            self.shared.gate.enter_idle();
            if stop || self.should_stop() {
                break;
            }
            self.shared.flow.wait_for_wakeup();
            if self.should_stop() {
                break;
            }
        }

        self.backend.close();
        self.shared.gate.enter_parked();
        debug!("consumer thread stopped");
        self.backend
    }

    fn should_stop(&self) -> bool {
        self.shared.is_cancelled() || self.shared.park.load(Ordering::SeqCst)
    }

    /// Drain until ReadPos catches WritePos, dispatching every record in
    /// order. Returns true when the thread must stop.
    fn drain_cycle(&mut self) -> bool {
        loop {
            let write_pos = self.shared.ring.write_pos(Ordering::Acquire);
            let mut pos = self.shared.ring.read_pos(Ordering::Relaxed);
            if pos == write_pos {
                self.shared.flow.service_drained();
                self.shared.pacer.service_drained();
                if self.shared.drain_waiter.load(Ordering::SeqCst) {
                    self.shared.progress.set();
                }
                return false;
            }
            while pos != write_pos {
                if self.shared.is_cancelled() {
                    return true;
                }
                match self.dispatch_at(pos, write_pos) {
                    Ok(step) => {
                        pos += step.span;
                        self.shared.ring.store_read_pos(pos, Ordering::SeqCst);
                        self.shared.flow.note_advance(step.span);
                        if self.shared.drain_waiter.load(Ordering::SeqCst) {
                            self.shared.progress.set();
                        }
                        if step.stop {
                            return true;
                        }
                    }
                    Err(err) => {
                        self.abort_for_corruption(err);
                        return true;
                    }
                }
            }
        }
    }

    /// Decode, validate and dispatch the record at `position`.
    fn dispatch_at(
        &mut self,
        position: u64,
        write_pos: u64,
    ) -> std::result::Result<DispatchStep, RecordError> {
        // SAFETY: position < write_pos, loaded with acquire; the header
        // slot is published.
        let header = unsafe { self.shared.ring.read_slot(position) };
        let opcode_word = record::opcode_of(&header);
        let shape = self.shared.registered_shape(opcode_word, position)?;
        let decoded = record::decode(&header, shape);
        let span = decoded.span();
        if position + span > write_pos {
            let declared = match decoded {
                Record::Data { slots, .. } => slots,
                _ => 0,
            };
            return Err(RecordError::Truncated {
                position,
                declared,
                available: write_pos - position - 1,
            });
        }
        if let Record::Data { slots, bytes, .. } = decoded {
            if u64::from(bytes) > u64::from(slots) * SLOT_BYTES as u64 {
                return Err(RecordError::PayloadOverrun {
                    bytes: bytes as usize,
                    slots,
                });
            }
        }
        self.trace.record(position, opcode_word);
        trace!(
            position,
            opcode = format_args!("{:#06x}", opcode_word),
            name = opcode::opcode_name(opcode_word),
            "dispatching record"
        );

        let mut stop = false;
        match decoded {
            Record::Inline {
                opcode: opcode::RESET,
                ..
            } => {
                debug!("hard reset dispatched to backend");
                if let Err(fault) = self.backend.reset() {
                    self.capture_fault(fault);
                }
            }
            Record::Inline {
                opcode: opcode::SOFT_RESET,
                data,
            } => {
                debug!(mask = format_args!("{:#010x}", data[0]), "soft reset dispatched");
                if let Err(fault) = self.backend.soft_reset(data[0]) {
                    self.capture_fault(fault);
                }
            }
            Record::Inline {
                opcode: opcode::FRAME_BOUNDARY,
                data,
            } => {
                let result = self.backend.handle(Dispatch::Inline {
                    opcode: opcode::FRAME_BOUNDARY,
                    data,
                });
                self.shared.pacer.note_frame_dispatched();
                if let Err(fault) = result {
                    self.capture_fault(fault);
                }
            }
            Record::Inline {
                opcode: opcode::CANCEL,
                ..
            } => {
                debug!("cancel record dispatched, stopping consumer");
                self.shared.cancel_internal();
                stop = true;
            }
            Record::Pointer {
                opcode: opcode::FREEZE,
                data0,
                handle,
            } => {
                self.handle_freeze(position, data0, handle)?;
            }
            Record::Inline { opcode, data } => {
                if let Err(fault) = self.backend.handle(Dispatch::Inline { opcode, data }) {
                    self.capture_fault(fault);
                }
            }
            Record::Pointer {
                opcode,
                data0,
                handle,
            } => {
                if let Err(fault) = self.backend.handle(Dispatch::Pointer {
                    opcode,
                    data0,
                    handle,
                }) {
                    self.capture_fault(fault);
                }
            }
            Record::Data { opcode, bytes, .. } => {
                // SAFETY: the payload slots sit behind the acquire-loaded
                // write_pos and stay unreclaimed until ReadPos advances
                // past this record.
                let (head, tail) =
                    unsafe { self.shared.ring.payload_slices(position + 1, bytes as usize) };
                let payload = Payload::new(head, tail);
                if let Err(fault) = self.backend.handle(Dispatch::Data { opcode, payload }) {
                    self.capture_fault(fault);
                }
            }
        }
        Ok(DispatchStep { span, stop })
    }

    fn handle_freeze(
        &mut self,
        position: u64,
        mode_word: u32,
        handle: u64,
    ) -> std::result::Result<(), RecordError> {
        let Some(mode) = FreezeMode::from_word(mode_word) else {
            return Err(RecordError::InvalidFreezeMode {
                position,
                mode: mode_word,
            });
        };
        // SAFETY: freeze records are built only by the channel's own
        // freeze/thaw paths, which keep the request alive and untouched
        // until their wait-until-drained returns.
        let request = unsafe { &mut *(handle as *mut FreezeRequest) };
        match mode {
            FreezeMode::Measure => request.size = self.backend.register_state_size(),
            FreezeMode::Save => {
                request.registers = self.backend.save_registers();
                request.size = request.registers.len();
                debug!(bytes = request.size, "device registers captured");
            }
            FreezeMode::Load => {
                debug!(bytes = request.registers.len(), "device registers restored");
                if let Err(fault) = self.backend.load_registers(&request.registers) {
                    self.capture_fault(fault);
                }
            }
        }
        Ok(())
    }

    fn capture_fault(&self, fault: BackendError) {
        self.shared.fault.capture(ChannelError::ConsumerFault(fault));
    }

    fn abort_for_corruption(&mut self, err: RecordError) {
        error!(
            error = %err,
            recent = ?self.trace.describe(),
            "ring corrupted, aborting dispatch"
        );
        self.shared.fault.capture(ChannelError::Corruption(err));
        self.shared.cancel_internal();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::config::ChannelConfig;
    use crate::writer::Writer;
    use ringbus_record::RecordShape;

    const INLINE_OP: u32 = opcode::USER_OPCODE_START;
    const POINTER_OP: u32 = opcode::USER_OPCODE_START + 1;
    const DATA_OP: u32 = opcode::USER_OPCODE_START + 2;

    #[derive(Debug, PartialEq, Eq)]
    enum Seen {
        Opened,
        Closed,
        Inline { opcode: u32, data: [u32; 3] },
        Pointer { opcode: u32, data0: u32 },
        Payload { opcode: u32, bytes: Vec<u8> },
        Reset,
        SoftReset(u32),
        Loaded(Vec<u8>),
    }

    struct Recorder {
        seen: mpsc::Sender<Seen>,
        fail_opcode: Option<u32>,
        registers: Vec<u8>,
    }

    impl Recorder {
        fn new(seen: mpsc::Sender<Seen>) -> Self {
            Self {
                seen,
                fail_opcode: None,
                registers: vec![0xC0, 0xFF, 0xEE],
            }
        }
    }

    impl Backend for Recorder {
        fn open(&mut self) -> Result<(), BackendError> {
            self.seen.send(Seen::Opened).expect("probe should be open");
            Ok(())
        }

        fn close(&mut self) {
            self.seen.send(Seen::Closed).expect("probe should be open");
        }

        fn handle(&mut self, dispatch: Dispatch<'_>) -> Result<(), BackendError> {
            if Some(dispatch.opcode()) == self.fail_opcode {
                return Err(format!("injected failure on {:#06x}", dispatch.opcode()).into());
            }
            let seen = match dispatch {
                Dispatch::Inline { opcode, data } => Seen::Inline { opcode, data },
                Dispatch::Pointer { opcode, data0, .. } => Seen::Pointer { opcode, data0 },
                Dispatch::Data { opcode, payload } => Seen::Payload {
                    opcode,
                    bytes: payload.to_bytes(),
                },
            };
            self.seen.send(seen).expect("probe should be open");
            Ok(())
        }

        fn reset(&mut self) -> Result<(), BackendError> {
            self.seen.send(Seen::Reset).expect("probe should be open");
            Ok(())
        }

        fn soft_reset(&mut self, mask: u32) -> Result<(), BackendError> {
            self.seen
                .send(Seen::SoftReset(mask))
                .expect("probe should be open");
            Ok(())
        }

        fn save_registers(&mut self) -> Vec<u8> {
            self.registers.clone()
        }

        fn register_state_size(&self) -> usize {
            self.registers.len()
        }

        fn load_registers(&mut self, registers: &[u8]) -> Result<(), BackendError> {
            self.seen
                .send(Seen::Loaded(registers.to_vec()))
                .expect("probe should be open");
            Ok(())
        }
    }

    fn harness(capacity: u64) -> (Writer, ReaderCore, mpsc::Receiver<Seen>) {
        let config = ChannelConfig::default()
            .with_capacity_slots(capacity)
            .with_user_shapes(vec![
                RecordShape::Inline,
                RecordShape::Pointer,
                RecordShape::Data,
            ]);
        let shared = Arc::new(Shared::new(config));
        let (tx, rx) = mpsc::channel();
        let reader = ReaderCore::new(shared.clone(), Box::new(Recorder::new(tx)));
        (Writer::new(shared), reader, rx)
    }

    fn drain(reader: &mut ReaderCore) -> bool {
        reader.shared.flow.set_busy(true, Ordering::SeqCst);
        let stop = reader.drain_cycle();
        reader.shared.flow.set_busy(false, Ordering::SeqCst);
        stop
    }

    #[test]
    fn dispatches_mixed_records_in_send_order() {
        let (mut writer, mut reader, rx) = harness(64);
        writer
            .send_inline(INLINE_OP, [1, 2, 3])
            .expect("send should succeed");
        writer
            .send_pointer(POINTER_OP, 9, 0xDEAD_BEEF)
            .expect("send should succeed");
        writer
            .send_data(DATA_OP, b"forty-two bytes of draw commands, roughly")
            .expect("send should succeed");

        assert!(!drain(&mut reader));

        assert_eq!(
            rx.try_recv().expect("first record"),
            Seen::Inline {
                opcode: INLINE_OP,
                data: [1, 2, 3]
            }
        );
        assert_eq!(
            rx.try_recv().expect("second record"),
            Seen::Pointer {
                opcode: POINTER_OP,
                data0: 9
            }
        );
        assert_eq!(
            rx.try_recv().expect("third record"),
            Seen::Payload {
                opcode: DATA_OP,
                bytes: b"forty-two bytes of draw commands, roughly".to_vec()
            }
        );
        let ring = &reader.shared.ring;
        assert_eq!(
            ring.read_pos(Ordering::Relaxed),
            ring.write_pos(Ordering::Relaxed)
        );
    }

    #[test]
    fn payload_straddling_the_physical_end_round_trips() {
        let (mut writer, mut reader, rx) = harness(8);
        // Park the positions near the top of storage so the next payload
        // wraps.
        for _ in 0..6 {
            writer
                .send_inline(INLINE_OP, [0; 3])
                .expect("send should succeed");
        }
        assert!(!drain(&mut reader));
        for _ in 0..6 {
            rx.try_recv().expect("prelude record");
        }

        let payload: Vec<u8> = (0u8..48).collect();
        writer
            .send_data(DATA_OP, &payload)
            .expect("wrapping payload should fit");
        assert!(!drain(&mut reader));
        assert_eq!(
            rx.try_recv().expect("wrapped record"),
            Seen::Payload {
                opcode: DATA_OP,
                bytes: payload
            }
        );
    }

    #[test]
    fn frame_boundary_reaches_backend_and_pacer() {
        let (mut writer, mut reader, rx) = harness(64);
        writer.frame_boundary(1).expect("boundary should enqueue");
        assert_eq!(writer.pending_frames(), 1);

        assert!(!drain(&mut reader));
        assert_eq!(
            rx.try_recv().expect("boundary record"),
            Seen::Inline {
                opcode: opcode::FRAME_BOUNDARY,
                data: [1, 0, 0]
            }
        );
        assert_eq!(writer.pending_frames(), 0);
    }

    #[test]
    fn reset_and_soft_reset_reach_the_backend() {
        let (mut writer, mut reader, rx) = harness(64);
        writer
            .send_control_inline(opcode::RESET, [0; 3])
            .expect("send should succeed");
        writer
            .send_control_inline(opcode::SOFT_RESET, [0b101, 0, 0])
            .expect("send should succeed");

        assert!(!drain(&mut reader));
        assert_eq!(rx.try_recv().expect("reset"), Seen::Reset);
        assert_eq!(rx.try_recv().expect("soft reset"), Seen::SoftReset(0b101));
    }

    #[test]
    fn freeze_save_and_load_round_trip_through_the_handle() {
        let (mut writer, mut reader, rx) = harness(64);

        let mut request = FreezeRequest::default();
        writer
            .send_control_pointer(
                opcode::FREEZE,
                FreezeMode::Save.as_word(),
                &mut request as *mut FreezeRequest as u64,
            )
            .expect("send should succeed");
        assert!(!drain(&mut reader));
        assert_eq!(request.registers, vec![0xC0, 0xFF, 0xEE]);
        assert_eq!(request.size, 3);

        writer
            .send_control_pointer(
                opcode::FREEZE,
                FreezeMode::Load.as_word(),
                &mut request as *mut FreezeRequest as u64,
            )
            .expect("send should succeed");
        assert!(!drain(&mut reader));
        assert_eq!(
            rx.try_recv().expect("load callback"),
            Seen::Loaded(vec![0xC0, 0xFF, 0xEE])
        );
    }

    #[test]
    fn freeze_measure_fills_only_the_size() {
        let (mut writer, mut reader, _rx) = harness(64);
        let mut request = FreezeRequest::default();
        writer
            .send_control_pointer(
                opcode::FREEZE,
                FreezeMode::Measure.as_word(),
                &mut request as *mut FreezeRequest as u64,
            )
            .expect("send should succeed");
        assert!(!drain(&mut reader));
        assert_eq!(request.size, 3);
        assert!(request.registers.is_empty());
    }

    #[test]
    fn cancel_record_stops_the_consumer_at_its_boundary() {
        let (mut writer, mut reader, rx) = harness(64);
        writer
            .send_control_inline(opcode::CANCEL, [0; 3])
            .expect("send should succeed");
        writer
            .send_inline(INLINE_OP, [7, 7, 7])
            .expect("send should succeed");

        assert!(drain(&mut reader), "cancel should stop the drain");
        assert!(reader.shared.is_cancelled());
        // The record behind the cancel is never dispatched.
        assert!(rx.try_recv().is_err());
        assert_eq!(reader.shared.ring.read_pos(Ordering::Relaxed), 1);
    }

    #[test]
    fn handler_fault_is_captured_and_the_drain_continues() {
        let config = ChannelConfig::default().with_user_shapes(vec![RecordShape::Inline]);
        let shared = Arc::new(Shared::new(config));
        let (tx, rx) = mpsc::channel();
        let mut backend = Recorder::new(tx);
        backend.fail_opcode = Some(INLINE_OP);
        let mut reader = ReaderCore::new(shared.clone(), Box::new(backend));
        let mut writer = Writer::new(shared.clone());

        writer
            .send_inline(INLINE_OP, [0; 3])
            .expect("send should succeed");
        writer
            .send_inline(INLINE_OP, [1, 1, 1])
            .expect("send should succeed");

        assert!(!drain(&mut reader), "faults do not stop the drain");
        let ring = &shared.ring;
        assert_eq!(
            ring.read_pos(Ordering::Relaxed),
            ring.write_pos(Ordering::Relaxed)
        );
        // First fault wins; the second was dropped.
        let fault = shared.fault.take().expect("fault should be pending");
        assert!(matches!(fault, ChannelError::ConsumerFault(_)));
        assert!(shared.fault.take().is_none());
        assert!(!shared.is_cancelled(), "handler faults do not cancel");
        assert!(rx.try_recv().is_err(), "failing handler records nothing");
    }

    #[test]
    fn unknown_opcode_aborts_with_corruption() {
        let (mut writer, mut reader, _rx) = harness(64);
        writer
            .send_inline(INLINE_OP, [0; 3])
            .expect("send should succeed");
        // Forge a record the registry does not know.
        unsafe {
            reader
                .shared
                .ring
                .write_slot(1, record::encode_inline(opcode::USER_OPCODE_START + 50, [0; 3]));
        }
        reader.shared.ring.store_write_pos(2, Ordering::SeqCst);

        assert!(drain(&mut reader), "corruption should stop the drain");
        assert!(reader.shared.is_cancelled());
        let fault = reader.shared.fault.take().expect("fault should be pending");
        assert!(matches!(
            fault,
            ChannelError::Corruption(RecordError::UnknownOpcode { position: 1, .. })
        ));
        // The good record before the forged one was dispatched.
        assert_eq!(reader.shared.ring.read_pos(Ordering::Relaxed), 1);
    }

    #[test]
    fn truncated_data_record_is_fatal() {
        let (_writer, mut reader, _rx) = harness(64);
        unsafe {
            reader
                .shared
                .ring
                .write_slot(0, record::encode_data_header(DATA_OP, 3, 48));
        }
        // Publish the header but none of the declared payload slots.
        reader.shared.ring.store_write_pos(1, Ordering::SeqCst);

        assert!(drain(&mut reader));
        let fault = reader.shared.fault.take().expect("fault should be pending");
        assert!(matches!(
            fault,
            ChannelError::Corruption(RecordError::Truncated {
                position: 0,
                declared: 3,
                available: 0,
            })
        ));
    }

    #[test]
    fn recent_trace_keeps_the_last_sixteen() {
        let mut trace = RecentTrace::new();
        for i in 0..20u64 {
            trace.record(i, INLINE_OP);
        }
        let entries = trace.entries();
        assert_eq!(entries.len(), TRACE_DEPTH);
        assert_eq!(entries.first(), Some(&(4, INLINE_OP)));
        assert_eq!(entries.last(), Some(&(19, INLINE_OP)));
    }
}
