//! Fixed-slot record framing for an emulator command ring.
//!
//! The command ring moves work from a hardware-simulation thread to a
//! rendering thread in fixed 16-byte slots. Every record starts with a
//! one-slot header:
//! - Inline records carry their whole payload in the header slot.
//! - Pointer records carry a borrowed native-width handle.
//! - Data records declare a payload slot count and are followed by that
//!   many raw slots.
//!
//! This crate owns the slot layout, the opcode registry, and the framing
//! error taxonomy. It knows nothing about storage or threads.

pub mod error;
pub mod opcode;
pub mod record;

pub use error::{RecordError, Result};
pub use opcode::{
    control_shape, is_control, is_reserved, opcode_name, FreezeMode, CANCEL, FRAME_BOUNDARY,
    FREEZE, RESET, SOFT_RESET, USER_OPCODE_START,
};
pub use record::{
    decode, encode_data_header, encode_inline, encode_pointer, opcode_of, slots_for_bytes, Record,
    RecordShape, Slot, EMPTY_SLOT, SLOT_BYTES,
};
