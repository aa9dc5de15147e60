//! Emulator command-ring channel.
//!
//! ringbus moves work from a real-time hardware-simulation thread to a
//! rendering thread through a fixed-slot ring with backpressure, frame
//! pacing and fault propagation.
//!
//! # Crate Structure
//!
//! - [`record`] — slot layout, record framing, opcode registry
//! - [`channel`] — the channel itself: writer, consumer loop, lifecycle

/// Re-export framing types.
pub mod record {
    pub use ringbus_record::*;
}

/// Re-export channel types.
pub mod channel {
    pub use ringbus_channel::*;
}
