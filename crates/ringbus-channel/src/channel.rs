//! Channel lifecycle: construction, open/close, reset, snapshot,
//! cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ringbus_record::{opcode, FreezeMode, RecordError, RecordShape};
use tracing::{debug, error, warn};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::event::Event;
use crate::fault::FaultSlot;
use crate::flow::FlowControl;
use crate::handler::Backend;
use crate::pacer::FramePacer;
use crate::quiesce::{QuiesceGate, ReaderPhase};
use crate::reader::ReaderCore;
use crate::ring::RingStore;
use crate::snapshot::{FreezeRequest, Snapshot};
use crate::writer::Writer;

/// Lifecycle state of a channel. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Cancelled,
}

/// State shared between the producer handle, the consumer thread and the
/// lifecycle controller. Allocated once at construction.
pub(crate) struct Shared {
    pub config: ChannelConfig,
    pub ring: RingStore,
    pub flow: FlowControl,
    pub pacer: FramePacer,
    pub fault: FaultSlot,
    pub gate: QuiesceGate,
    /// Posted by the consumer whenever ReadPos advances and a drain waiter
    /// announced itself.
    pub progress: Event,
    /// Posted once the backend has opened on the consumer thread.
    pub open_done: Event,
    /// A producer is blocked in a wait-until-drained.
    pub drain_waiter: AtomicBool,
    /// The consumer should exit its loop at the next idle point.
    pub park: AtomicBool,
    cancelled: AtomicBool,
}

impl Shared {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            ring: RingStore::new(config.capacity_slots),
            flow: FlowControl::new(),
            pacer: FramePacer::new(),
            fault: FaultSlot::new(),
            gate: QuiesceGate::new(),
            progress: Event::new(),
            open_done: Event::new(),
            drain_waiter: AtomicBool::new(false),
            park: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            config,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }
        Ok(())
    }

    /// Mark the channel cancelled and release every blocked waiter. Safe to
    /// call from either thread; only the first call does anything.
    pub fn cancel_internal(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("channel cancelled, releasing waiters");
        self.flow.wake_consumer();
        self.flow.release_space_waiter();
        self.pacer.release_listener();
        self.progress.set();
        self.open_done.set();
    }

    /// Resolve an opcode to its registered record shape.
    ///
    /// Control opcodes have fixed shapes; user opcodes index the shape
    /// table supplied at construction. Anything else is framing desync and
    /// always fatal, in release builds too.
    pub fn registered_shape(
        &self,
        opcode_word: u32,
        position: u64,
    ) -> std::result::Result<RecordShape, RecordError> {
        if let Some(shape) = opcode::control_shape(opcode_word) {
            return Ok(shape);
        }
        if opcode::is_reserved(opcode_word) {
            return Err(RecordError::UnknownOpcode {
                opcode: opcode_word,
                position,
            });
        }
        let index = (opcode_word - opcode::USER_OPCODE_START) as usize;
        self.config
            .user_shapes
            .get(index)
            .copied()
            .ok_or(RecordError::UnknownOpcode {
                opcode: opcode_word,
                position,
            })
    }
}

/// One producer/consumer command channel.
///
/// The channel owns the producer [`Writer`], the consumer thread and the
/// backend driven by it. Lifecycle calls and sends both go through this
/// object on the producer side; the consumer side lives on the spawned
/// thread for as long as the channel is open.
///
/// ```no_run
/// # use ringbus_channel::{Channel, ChannelConfig, Backend, BackendError, Dispatch};
/// # struct Renderer;
/// # impl Backend for Renderer {
/// #     fn open(&mut self) -> Result<(), BackendError> { Ok(()) }
/// #     fn close(&mut self) {}
/// #     fn handle(&mut self, _: Dispatch<'_>) -> Result<(), BackendError> { Ok(()) }
/// #     fn reset(&mut self) -> Result<(), BackendError> { Ok(()) }
/// # }
/// # fn main() -> ringbus_channel::Result<()> {
/// let config = ChannelConfig::default()
///     .with_user_shapes(vec![ringbus_record::RecordShape::Data]);
/// let mut channel = Channel::new(config, Box::new(Renderer))?;
/// channel.open()?;
/// channel.writer().send_data(64, b"draw list")?;
/// channel.writer().frame_boundary(0)?;
/// channel.shutdown()?;
/// # Ok(())
/// # }
/// ```
pub struct Channel {
    shared: Arc<Shared>,
    writer: Writer,
    state: ChannelState,
    backend: Option<Box<dyn Backend>>,
    reader: Option<JoinHandle<Box<dyn Backend>>>,
}

impl Channel {
    /// Build a closed channel around `backend`. Storage and counters are
    /// allocated here and live until the channel is dropped.
    pub fn new(config: ChannelConfig, backend: Box<dyn Backend>) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared::new(config));
        let writer = Writer::new(shared.clone());
        Ok(Self {
            shared,
            writer,
            state: ChannelState::Closed,
            backend: Some(backend),
            reader: None,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// The producer handle. Sends block per the flow-control protocol and
    /// surface consumer faults at their next wait.
    pub fn writer(&mut self) -> &mut Writer {
        &mut self.writer
    }

    /// Consumer phase as observed through the quiesce gate.
    pub fn reader_phase(&self) -> ReaderPhase {
        self.shared.gate.phase()
    }

    pub fn read_pos(&self) -> u64 {
        self.shared.ring.read_pos(Ordering::SeqCst)
    }

    pub fn write_pos(&self) -> u64 {
        self.shared.ring.write_pos(Ordering::SeqCst)
    }

    pub fn is_drained(&self) -> bool {
        self.read_pos() == self.write_pos()
    }

    pub fn pending_frames(&self) -> u32 {
        self.shared.pacer.pending(Ordering::SeqCst)
    }

    /// Spawn the consumer thread and block until the backend has opened.
    ///
    /// The wait is bounded: after `open_timeout` a warning escalates the
    /// bound once to `open_timeout_extended`, after which the open fails
    /// fatally with the last known positions.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            ChannelState::Closed => {}
            ChannelState::Opening | ChannelState::Open => return Err(ChannelError::AlreadyOpen),
            ChannelState::Cancelled => return Err(ChannelError::Cancelled),
        }
        let backend = self.backend.take().ok_or(ChannelError::ReaderPanicked)?;
        self.state = ChannelState::Opening;

        let core = ReaderCore::new(self.shared.clone(), backend);
        let handle = thread::Builder::new()
            .name("ringbus-reader".to_string())
            .spawn(move || core.run())?;
        self.reader = Some(handle);

        let first = self.shared.config.open_timeout;
        if !self.shared.open_done.wait_timeout(first) {
            warn!(waited = ?first, "consumer slow to signal readiness, extending wait");
            let extended = self.shared.config.open_timeout_extended;
            if !self.shared.open_done.wait_timeout(extended) {
                let err = ChannelError::OpenTimeout {
                    waited: first + extended,
                    read_pos: self.read_pos(),
                    write_pos: self.write_pos(),
                };
                error!(error = %err, "open handshake failed");
                self.shared.cancel_internal();
                self.state = ChannelState::Cancelled;
                // The thread is stuck inside the backend's open; joining it
                // would hang the opener too.
                self.reader = None;
                return Err(err);
            }
        }

        if self.shared.is_cancelled() {
            self.state = ChannelState::Cancelled;
            self.backend = Some(self.join_reader()?);
            return Err(self
                .shared
                .fault
                .take()
                .unwrap_or(ChannelError::Cancelled));
        }
        self.state = ChannelState::Open;
        debug!("channel open");
        Ok(())
    }

    /// Suspend: drain outstanding records, park the consumer thread and
    /// recover the backend so [`open`](Self::open) can resume later.
    pub fn close(&mut self) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen { state: self.state });
        }
        let drained = self.writer.wait_until_drained();
        self.shared.park.store(true, Ordering::SeqCst);
        self.shared.flow.wake_consumer();
        let joined = self.join_reader();
        self.shared.park.store(false, Ordering::SeqCst);
        match joined {
            Ok(backend) => self.backend = Some(backend),
            Err(err) => {
                self.state = ChannelState::Cancelled;
                return Err(err);
            }
        }
        self.state = if self.shared.is_cancelled() {
            ChannelState::Cancelled
        } else {
            ChannelState::Closed
        };
        debug!(state = ?self.state, "channel closed");
        drained
    }

    /// Cooperative cancellation through the record stream: everything
    /// queued ahead of the cancel record is still dispatched, then the
    /// consumer stops at that record boundary.
    pub fn cancel(&mut self) -> Result<()> {
        if self.state != ChannelState::Open {
            self.shared.cancel_internal();
            self.state = ChannelState::Cancelled;
            return Ok(());
        }
        match self.writer.send_control_inline(opcode::CANCEL, [0; 3]) {
            // Sync-mode publishes race the consumer's own cancellation.
            Ok(()) | Err(ChannelError::Cancelled) => {}
            Err(err) => return Err(err),
        }
        self.writer.flush();
        self.backend = Some(self.join_reader()?);
        self.state = ChannelState::Cancelled;
        Ok(())
    }

    /// Immediate teardown: cancel, release every waiter and join the
    /// consumer thread. A consumer panic surfaces here.
    pub fn shutdown(mut self) -> Result<()> {
        self.shared.cancel_internal();
        self.state = ChannelState::Cancelled;
        if let Some(handle) = self.reader.take() {
            handle.join().map_err(|_| ChannelError::ReaderPanicked)?;
        }
        Ok(())
    }

    /// Notify the backend, drain, and rezero both positions together under
    /// the quiesce handshake.
    pub fn reset(&mut self) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen { state: self.state });
        }
        self.writer.send_control_inline(opcode::RESET, [0; 3])?;
        self.writer.flush();
        self.writer.wait_until_drained()?;

        let _guard = self.shared.gate.acquire();
        self.shared.ring.store_read_pos(0, Ordering::SeqCst);
        self.shared.ring.store_write_pos(0, Ordering::SeqCst);
        self.shared.pacer.reset();
        self.writer.reset_tally();
        debug!("channel reset, positions rezeroed");
        Ok(())
    }

    /// Partial backend reset with a backend-defined path mask.
    pub fn soft_reset(&mut self, mask: u32) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen { state: self.state });
        }
        self.writer
            .send_control_inline(opcode::SOFT_RESET, [mask, 0, 0])?;
        self.writer.flush();
        Ok(())
    }

    /// Capture positions, pacing debt and the backend's register state as
    /// one unit, under quiesce on a drained channel.
    pub fn freeze(&mut self) -> Result<Snapshot> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen { state: self.state });
        }
        let mut request = FreezeRequest::default();
        self.send_freeze(FreezeMode::Save, &mut request)?;

        let _guard = self.shared.gate.acquire();
        Ok(Snapshot {
            read_pos: self.shared.ring.read_pos(Ordering::SeqCst),
            write_pos: self.shared.ring.write_pos(Ordering::SeqCst),
            pending_frames: self.shared.pacer.pending(Ordering::SeqCst),
            registers: request.registers,
        })
    }

    /// Restore a snapshot captured by [`freeze`](Self::freeze).
    pub fn thaw(&mut self, snapshot: &Snapshot) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen { state: self.state });
        }
        if snapshot.read_pos != snapshot.write_pos {
            return Err(ChannelError::NotDrained {
                read_pos: snapshot.read_pos,
                write_pos: snapshot.write_pos,
            });
        }
        let mut request = FreezeRequest {
            registers: snapshot.registers.clone(),
            size: 0,
        };
        self.send_freeze(FreezeMode::Load, &mut request)?;

        let _guard = self.shared.gate.acquire();
        self.shared
            .ring
            .store_read_pos(snapshot.read_pos, Ordering::SeqCst);
        self.shared
            .ring
            .store_write_pos(snapshot.write_pos, Ordering::SeqCst);
        self.shared.pacer.restore(snapshot.pending_frames);
        self.writer.reset_tally();
        debug!(
            position = snapshot.read_pos,
            pending = snapshot.pending_frames,
            "snapshot restored"
        );
        Ok(())
    }

    /// Size in bytes a freeze would capture, without capturing.
    pub fn register_state_size(&mut self) -> Result<usize> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen { state: self.state });
        }
        let mut request = FreezeRequest::default();
        self.send_freeze(FreezeMode::Measure, &mut request)?;
        Ok(request.size)
    }

    /// Freeze records carry a borrowed pointer to `request`; the matching
    /// wait-until-drained bounds that borrow before `request` can move.
    fn send_freeze(&mut self, mode: FreezeMode, request: &mut FreezeRequest) -> Result<()> {
        self.writer.wait_until_drained()?;
        self.writer.send_control_pointer(
            opcode::FREEZE,
            mode.as_word(),
            request as *mut FreezeRequest as u64,
        )?;
        self.writer.flush();
        self.writer.wait_until_drained()
    }

    fn join_reader(&mut self) -> Result<Box<dyn Backend>> {
        let handle = self.reader.take().ok_or(ChannelError::ReaderPanicked)?;
        handle.join().map_err(|_| ChannelError::ReaderPanicked)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shared.cancel_internal();
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}
