use crate::record::RecordShape;

/// Errors that can occur while framing or decoding ring records.
///
/// Every variant is a framing invariant violation. None of them are
/// retryable: a channel that produced one is no longer trustworthy.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// A reservation asked for more payload slots than the ring can ever hold.
    #[error("reservation of {slots} payload slots can never fit (capacity {capacity} slots)")]
    ReservationTooLarge { slots: u32, capacity: u64 },

    /// More payload bytes were written than the reservation declared.
    #[error("{bytes} payload bytes do not fit in the {slots} reserved slots")]
    PayloadOverrun { bytes: usize, slots: u32 },

    /// An opcode outside the reserved and registered ranges was encountered.
    #[error("unknown opcode {opcode:#06x} at ring position {position}")]
    UnknownOpcode { opcode: u32, position: u64 },

    /// A control opcode was sent through the open user-record interface.
    #[error("opcode {opcode:#06x} is reserved for control records")]
    ReservedOpcode { opcode: u32 },

    /// A freeze record carried a mode word outside the defined set.
    #[error("freeze record at position {position} carries undefined mode {mode}")]
    InvalidFreezeMode { position: u64, mode: u32 },

    /// An opcode was sent with a record shape other than its registered one.
    #[error("opcode {opcode:#06x} is registered as {expected:?}, sent as {actual:?}")]
    ShapeMismatch {
        opcode: u32,
        expected: RecordShape,
        actual: RecordShape,
    },

    /// A decoded header declares more slots than are published behind it.
    #[error("record at position {position} declares {declared} payload slots, only {available} published")]
    Truncated {
        position: u64,
        declared: u32,
        available: u64,
    },
}

pub type Result<T> = std::result::Result<T, RecordError>;
