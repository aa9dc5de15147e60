use bytes::{Buf, BufMut};

/// Slot width in bytes. Every record occupies a whole number of slots.
pub const SLOT_BYTES: usize = 16;

/// Raw storage for one slot.
pub type Slot = [u8; SLOT_BYTES];

/// Zeroed slot, the initial content of ring storage.
pub const EMPTY_SLOT: Slot = [0; SLOT_BYTES];

/// The three record layouts that fit the 16-byte slot grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    /// Opcode plus three inline data words, one slot.
    Inline,
    /// Opcode, one data word, and a borrowed native-width handle, one slot.
    Pointer,
    /// Header slot followed by the declared number of payload slots.
    Data,
}

/// One decoded record header.
///
/// Slot layout, all fields little-endian:
/// ```text
/// Inline   │ opcode (4B) │ data0 (4B)    │ data1 (4B) │ data2 (4B) │
/// Pointer  │ opcode (4B) │ data0 (4B)    │ handle (8B)             │
/// Data     │ opcode (4B) │ slots (4B)    │ bytes (4B) │ zero (4B)  │
/// ```
/// A Data header is followed by `slots` raw payload slots carrying `bytes`
/// payload bytes; the final slot may be partially filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Inline { opcode: u32, data: [u32; 3] },
    Pointer { opcode: u32, data0: u32, handle: u64 },
    Data { opcode: u32, slots: u32, bytes: u32 },
}

impl Record {
    /// The record's opcode.
    pub fn opcode(&self) -> u32 {
        match *self {
            Record::Inline { opcode, .. }
            | Record::Pointer { opcode, .. }
            | Record::Data { opcode, .. } => opcode,
        }
    }

    /// Total slot span of the record, header included.
    pub fn span(&self) -> u64 {
        match *self {
            Record::Data { slots, .. } => 1 + u64::from(slots),
            _ => 1,
        }
    }

    /// The shape this record was decoded as.
    pub fn shape(&self) -> RecordShape {
        match *self {
            Record::Inline { .. } => RecordShape::Inline,
            Record::Pointer { .. } => RecordShape::Pointer,
            Record::Data { .. } => RecordShape::Data,
        }
    }
}

/// Encode an inline record into one slot.
pub fn encode_inline(opcode: u32, data: [u32; 3]) -> Slot {
    let mut slot = EMPTY_SLOT;
    let mut buf = &mut slot[..];
    buf.put_u32_le(opcode);
    buf.put_u32_le(data[0]);
    buf.put_u32_le(data[1]);
    buf.put_u32_le(data[2]);
    slot
}

/// Encode a pointer record into one slot. The handle is borrowed, not owned.
pub fn encode_pointer(opcode: u32, data0: u32, handle: u64) -> Slot {
    let mut slot = EMPTY_SLOT;
    let mut buf = &mut slot[..];
    buf.put_u32_le(opcode);
    buf.put_u32_le(data0);
    buf.put_u64_le(handle);
    slot
}

/// Encode a Data record header.
///
/// Written once with the declared slot count at reservation, then rewritten
/// with the true slot and byte counts when the record commits.
pub fn encode_data_header(opcode: u32, slots: u32, bytes: u32) -> Slot {
    let mut slot = EMPTY_SLOT;
    let mut buf = &mut slot[..];
    buf.put_u32_le(opcode);
    buf.put_u32_le(slots);
    buf.put_u32_le(bytes);
    slot
}

/// The opcode word of a header slot, shape-independent.
pub fn opcode_of(slot: &Slot) -> u32 {
    u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]])
}

/// Decode a header slot as the given shape.
///
/// The shape comes from the opcode registry; the slot itself does not carry
/// it. Callers resolve the opcode first, then decode.
pub fn decode(slot: &Slot, shape: RecordShape) -> Record {
    let mut buf = &slot[..];
    let opcode = buf.get_u32_le();
    match shape {
        RecordShape::Inline => Record::Inline {
            opcode,
            data: [buf.get_u32_le(), buf.get_u32_le(), buf.get_u32_le()],
        },
        RecordShape::Pointer => Record::Pointer {
            opcode,
            data0: buf.get_u32_le(),
            handle: buf.get_u64_le(),
        },
        RecordShape::Data => Record::Data {
            opcode,
            slots: buf.get_u32_le(),
            bytes: buf.get_u32_le(),
        },
    }
}

/// Payload slots needed to carry `bytes` payload bytes.
pub fn slots_for_bytes(bytes: usize) -> u32 {
    bytes.div_ceil(SLOT_BYTES) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_roundtrip() {
        let slot = encode_inline(7, [1, 2, 0xFFFF_FFFF]);
        let record = decode(&slot, RecordShape::Inline);
        assert_eq!(
            record,
            Record::Inline {
                opcode: 7,
                data: [1, 2, 0xFFFF_FFFF]
            }
        );
        assert_eq!(record.span(), 1);
    }

    #[test]
    fn test_pointer_roundtrip() {
        let slot = encode_pointer(3, 2, 0xDEAD_BEEF_CAFE_F00D);
        let record = decode(&slot, RecordShape::Pointer);
        assert_eq!(
            record,
            Record::Pointer {
                opcode: 3,
                data0: 2,
                handle: 0xDEAD_BEEF_CAFE_F00D
            }
        );
        assert_eq!(record.span(), 1);
    }

    #[test]
    fn test_data_header_roundtrip() {
        let slot = encode_data_header(64, 12, 190);
        let record = decode(&slot, RecordShape::Data);
        assert_eq!(
            record,
            Record::Data {
                opcode: 64,
                slots: 12,
                bytes: 190
            }
        );
        assert_eq!(record.span(), 13);
    }

    #[test]
    fn test_data_header_rewrite_on_commit() {
        // Declared 8 slots at reservation, committed with 3 slots / 40 bytes.
        let mut slot = encode_data_header(64, 8, 0);
        assert_eq!(
            decode(&slot, RecordShape::Data),
            Record::Data {
                opcode: 64,
                slots: 8,
                bytes: 0
            }
        );

        slot = encode_data_header(64, 3, 40);
        assert_eq!(
            decode(&slot, RecordShape::Data),
            Record::Data {
                opcode: 64,
                slots: 3,
                bytes: 40
            }
        );
    }

    #[test]
    fn test_layout_is_little_endian() {
        let slot = encode_inline(0x0102_0304, [0x0A0B_0C0D, 0, 0]);
        assert_eq!(&slot[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&slot[4..8], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(opcode_of(&slot), 0x0102_0304);
    }

    #[test]
    fn test_opcode_word_is_shape_independent() {
        let inline = encode_inline(9, [0; 3]);
        let pointer = encode_pointer(9, 0, 0);
        let data = encode_data_header(9, 1, 16);
        assert_eq!(opcode_of(&inline), 9);
        assert_eq!(opcode_of(&pointer), 9);
        assert_eq!(opcode_of(&data), 9);
    }

    #[test]
    fn test_slots_for_bytes_rounds_up() {
        assert_eq!(slots_for_bytes(0), 0);
        assert_eq!(slots_for_bytes(1), 1);
        assert_eq!(slots_for_bytes(16), 1);
        assert_eq!(slots_for_bytes(17), 2);
        assert_eq!(slots_for_bytes(160), 10);
    }
}
