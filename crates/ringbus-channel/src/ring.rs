use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use ringbus_record::record::{Slot, EMPTY_SLOT, SLOT_BYTES};

/// Fixed-capacity slot storage with unwrapped monotonic positions.
///
/// `read_pos` and `write_pos` only ever grow; `pos & mask` addresses
/// storage. Comparing the raw counters gives an unambiguous fill level, so
/// no slot has to be sacrificed to tell "full" from "empty".
///
/// The producer publishes `write_pos` with at least release ordering after
/// filling slots; the consumer loads it with acquire before reading them.
/// The mirror-image protocol covers `read_pos` and slot reuse.
pub(crate) struct RingStore {
    slots: Box<[UnsafeCell<Slot>]>,
    mask: u64,
    read_pos: CachePadded<AtomicU64>,
    write_pos: CachePadded<AtomicU64>,
}

// SAFETY: slots are only written by the producer inside a reservation that
// precedes the matching write_pos publish, and only read by the consumer
// after an acquire load of write_pos that covers them. The position
// protocol keeps the two sides on disjoint slot ranges at all times.
unsafe impl Send for RingStore {}
unsafe impl Sync for RingStore {}

impl RingStore {
    /// Allocate zeroed storage. `capacity_slots` must be a power of two.
    pub fn new(capacity_slots: u64) -> Self {
        debug_assert!(capacity_slots.is_power_of_two());
        let slots = (0..capacity_slots)
            .map(|_| UnsafeCell::new(EMPTY_SLOT))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity_slots - 1,
            read_pos: CachePadded::new(AtomicU64::new(0)),
            write_pos: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    pub fn read_pos(&self, order: Ordering) -> u64 {
        self.read_pos.load(order)
    }

    pub fn write_pos(&self, order: Ordering) -> u64 {
        self.write_pos.load(order)
    }

    pub fn store_read_pos(&self, pos: u64, order: Ordering) {
        self.read_pos.store(pos, order);
    }

    pub fn store_write_pos(&self, pos: u64, order: Ordering) {
        self.write_pos.store(pos, order);
    }

    /// Byte pointer to the start of the slot at physical index `idx`.
    ///
    /// Derived from the slice pointer, so it may be offset across the whole
    /// allocation.
    unsafe fn byte_ptr(&self, idx: usize) -> *mut u8 {
        UnsafeCell::raw_get(self.slots.as_ptr().add(idx)).cast::<u8>()
    }

    /// Overwrite the slot at logical position `pos`.
    ///
    /// # Safety
    /// The slot must be owned by the caller: at or past `write_pos`, within
    /// a reservation that has not yet been published.
    pub unsafe fn write_slot(&self, pos: u64, slot: Slot) {
        *self.slots[(pos & self.mask) as usize].get() = slot;
    }

    /// Copy out the slot at logical position `pos`.
    ///
    /// # Safety
    /// The slot must be published: `read_pos <= pos < write_pos` under the
    /// acquire/release protocol.
    pub unsafe fn read_slot(&self, pos: u64) -> Slot {
        *self.slots[(pos & self.mask) as usize].get()
    }

    /// Copy `src` into payload storage starting `byte_offset` bytes after
    /// the slot at `start_slot`.
    ///
    /// A region crossing the physical end of storage is written as two
    /// contiguous copies, the tail of the array first, then the head.
    ///
    /// # Safety
    /// Every touched slot must be inside an unpublished reservation held by
    /// the caller.
    pub unsafe fn copy_in(&self, start_slot: u64, byte_offset: usize, src: &[u8]) {
        let first = start_slot + (byte_offset / SLOT_BYTES) as u64;
        let within = byte_offset % SLOT_BYTES;
        let idx = (first & self.mask) as usize;
        let until_end = (self.slots.len() - idx) * SLOT_BYTES - within;

        let head = src.len().min(until_end);
        ptr::copy_nonoverlapping(src.as_ptr(), self.byte_ptr(idx).add(within), head);
        if head < src.len() {
            ptr::copy_nonoverlapping(src.as_ptr().add(head), self.byte_ptr(0), src.len() - head);
        }
    }

    /// Borrow `len` payload bytes starting at the slot at `start_slot` as
    /// up to two contiguous runs. The second run is empty unless the region
    /// wraps.
    ///
    /// # Safety
    /// The covered slots must be published and must stay unreclaimed for
    /// the lifetime of the returned slices; callers drop them before
    /// advancing `read_pos` past the record.
    pub unsafe fn payload_slices(&self, start_slot: u64, len: usize) -> (&[u8], &[u8]) {
        let idx = (start_slot & self.mask) as usize;
        let until_end = (self.slots.len() - idx) * SLOT_BYTES;

        let head = len.min(until_end);
        let head_slice = std::slice::from_raw_parts(self.byte_ptr(idx), head);
        let tail_slice = std::slice::from_raw_parts(self.byte_ptr(0), len - head);
        (head_slice, tail_slice)
    }
}
