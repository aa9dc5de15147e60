//! Single-producer single-consumer command channel with backpressure and
//! frame pacing.
//!
//! The channel decouples a real-time simulation thread from a rendering
//! thread: the producer writes fixed-slot records into a ring, the consumer
//! thread drains them in FIFO order into a [`Backend`]. The producer stalls
//! instead of overwriting unread data, frame boundaries are paced against a
//! configured queue depth, and consumer-side failures surface back at the
//! producer's next blocking wait.
//!
//! # Layers
//!
//! - [`channel`] — lifecycle: open/close, reset, snapshot, cancellation
//! - [`writer`] — producer sends, reservations, drain waits
//! - [`handler`] — the [`Backend`] trait the consumer thread drives
//! - [`config`] — construction parameters and tuning knobs
//! - [`error`] — the channel error taxonomy

pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod writer;

mod event;
mod fault;
mod flow;
mod pacer;
mod quiesce;
mod reader;
mod ring;
mod snapshot;

pub use channel::{Channel, ChannelState};
pub use config::{
    ChannelConfig, DEFAULT_CAPACITY_SLOTS, DEFAULT_QUEUE_DEPTH, DEFAULT_SPIN_THRESHOLD_SLOTS,
    DEFAULT_WAKEUP_TALLY_SLOTS,
};
pub use error::{ChannelError, Result};
pub use handler::{Backend, BackendError, Dispatch, Payload};
pub use quiesce::ReaderPhase;
pub use snapshot::Snapshot;
pub use writer::{Reservation, Writer};
