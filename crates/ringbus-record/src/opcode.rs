//! Reserved control opcodes.
//!
//! Opcodes 0-63 are reserved for records the channel handles internally.
//! Opcodes 64 and up are available for backend-defined commands, registered
//! at channel construction.

use crate::record::RecordShape;

/// Hard reset: notifies the backend before positions are rezeroed.
pub const RESET: u32 = 0;

/// Soft reset: forwards a path mask to the backend.
pub const SOFT_RESET: u32 = 1;

/// End-of-frame marker, consumed by the frame pacer.
pub const FRAME_BOUNDARY: u32 = 2;

/// Snapshot exchange; pointer record, result written through the handle.
pub const FREEZE: u32 = 3;

/// Cooperative cancellation marker.
pub const CANCEL: u32 = 4;

/// First backend-defined opcode.
pub const USER_OPCODE_START: u32 = 64;

/// Returns a human-readable name for an opcode.
pub fn opcode_name(opcode: u32) -> &'static str {
    match opcode {
        RESET => "RESET",
        SOFT_RESET => "SOFT_RESET",
        FRAME_BOUNDARY => "FRAME_BOUNDARY",
        FREEZE => "FREEZE",
        CANCEL => "CANCEL",
        5..=63 => "RESERVED",
        _ => "USER",
    }
}

/// Returns true if the opcode is in the reserved control range.
pub fn is_reserved(opcode: u32) -> bool {
    opcode < USER_OPCODE_START
}

/// Returns true if the opcode is a control record handled inside the channel.
pub fn is_control(opcode: u32) -> bool {
    opcode <= CANCEL
}

/// The fixed record shape of a control opcode, if it is one.
pub fn control_shape(opcode: u32) -> Option<RecordShape> {
    match opcode {
        RESET | SOFT_RESET | FRAME_BOUNDARY | CANCEL => Some(RecordShape::Inline),
        FREEZE => Some(RecordShape::Pointer),
        _ => None,
    }
}

/// What a [`FREEZE`] record asks the consumer to do with the request its
/// handle points at. Travels as the record's `data0` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeMode {
    /// Capture device registers into the request buffer.
    Save,
    /// Restore device registers from the request buffer.
    Load,
    /// Report the register state size without touching the buffer.
    Measure,
}

impl FreezeMode {
    pub fn as_word(self) -> u32 {
        match self {
            FreezeMode::Save => 0,
            FreezeMode::Load => 1,
            FreezeMode::Measure => 2,
        }
    }

    pub fn from_word(word: u32) -> Option<Self> {
        match word {
            0 => Some(FreezeMode::Save),
            1 => Some(FreezeMode::Load),
            2 => Some(FreezeMode::Measure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_opcodes_are_reserved() {
        assert!(is_reserved(RESET));
        assert!(is_reserved(CANCEL));
        assert!(is_reserved(USER_OPCODE_START - 1));
        assert!(!is_reserved(USER_OPCODE_START));
    }

    #[test]
    fn control_shapes_match_layout() {
        assert_eq!(control_shape(FRAME_BOUNDARY), Some(RecordShape::Inline));
        assert_eq!(control_shape(FREEZE), Some(RecordShape::Pointer));
        assert_eq!(control_shape(USER_OPCODE_START), None);
        assert_eq!(control_shape(17), None);
    }

    #[test]
    fn names_cover_every_range() {
        assert_eq!(opcode_name(RESET), "RESET");
        assert_eq!(opcode_name(FREEZE), "FREEZE");
        assert_eq!(opcode_name(40), "RESERVED");
        assert_eq!(opcode_name(USER_OPCODE_START + 3), "USER");
    }

    #[test]
    fn freeze_mode_words_round_trip() {
        for mode in [FreezeMode::Save, FreezeMode::Load, FreezeMode::Measure] {
            assert_eq!(FreezeMode::from_word(mode.as_word()), Some(mode));
        }
        assert_eq!(FreezeMode::from_word(3), None);
    }
}
