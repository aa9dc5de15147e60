//! The backend trait implemented by record consumers.
//!
//! A [`Backend`] owns the device being driven (a software renderer, a
//! protocol encoder, a trace sink). The consumer thread calls it
//! strictly single-threaded: `open`, then any number of `handle` and
//! control calls, then `close`.

use ringbus_record::opcode;

/// Errors produced by backend implementations. The channel does not
/// interpret these beyond treating any of them as fatal.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// A decoded record as seen by the backend.
#[derive(Debug)]
pub enum Dispatch<'a> {
    /// A self-contained fixed-size record.
    Inline { opcode: u32, data: [u32; 3] },
    /// A record referencing producer-owned memory. The handle is only
    /// meaningful to the backend that agreed on the opcode.
    Pointer { opcode: u32, data0: u32, handle: u64 },
    /// A record with a payload copied through the ring.
    Data { opcode: u32, payload: Payload<'a> },
}

impl Dispatch<'_> {
    pub fn opcode(&self) -> u32 {
        match self {
            Dispatch::Inline { opcode, .. } => *opcode,
            Dispatch::Pointer { opcode, .. } => *opcode,
            Dispatch::Data { opcode, .. } => *opcode,
        }
    }

    pub fn opcode_name(&self) -> &'static str {
        opcode::opcode_name(self.opcode())
    }
}

/// A payload borrowed from the ring for the duration of one dispatch.
/// Wraparound splits it into two runs; `head` is never empty unless
/// the payload itself is.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    head: &'a [u8],
    tail: &'a [u8],
}

impl<'a> Payload<'a> {
    pub(crate) fn new(head: &'a [u8], tail: &'a [u8]) -> Self {
        Self { head, tail }
    }

    pub fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty() && self.tail.is_empty()
    }

    /// The payload as at most two contiguous runs, in order.
    pub fn as_slices(&self) -> (&'a [u8], &'a [u8]) {
        (self.head, self.tail)
    }

    /// Copy the payload into a single owned buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(self.head);
        out.extend_from_slice(self.tail);
        out
    }
}

/// The device driven by the consumer thread.
///
/// All methods run on the consumer thread. An error returned from
/// `open` cancels the channel; an error from any later call is captured
/// and surfaces at the producer's next blocking wait while dispatch
/// continues.
pub trait Backend: Send {
    /// Runs on the consumer thread before the first dispatch. The
    /// channel's `open` does not return until this has.
    fn open(&mut self) -> Result<(), BackendError>;

    /// Runs on the consumer thread after the last dispatch, on both
    /// orderly close and cancellation.
    fn close(&mut self);

    /// Handle one user record. Frame boundaries are also delivered
    /// here, as `Inline` with [`opcode::FRAME_BOUNDARY`], before the
    /// pacer credits the frame.
    fn handle(&mut self, dispatch: Dispatch<'_>) -> Result<(), BackendError>;

    /// Drop all queued device state.
    fn reset(&mut self) -> Result<(), BackendError>;

    /// Partial reset. The mask bits are backend-defined.
    fn soft_reset(&mut self, mask: u32) -> Result<(), BackendError> {
        let _ = mask;
        self.reset()
    }

    /// Serialize the device registers for a snapshot.
    fn save_registers(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Size in bytes `save_registers` would produce.
    fn register_state_size(&self) -> usize {
        0
    }

    /// Restore device registers captured by `save_registers`.
    fn load_registers(&mut self, registers: &[u8]) -> Result<(), BackendError> {
        let _ = registers;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_reports_split_slices() {
        let head = [1u8, 2, 3];
        let tail = [4u8, 5];
        let payload = Payload::new(&head, &tail);
        assert_eq!(payload.len(), 5);
        assert!(!payload.is_empty());
        assert_eq!(payload.as_slices(), (&head[..], &tail[..]));
        assert_eq!(payload.to_bytes(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn empty_payload() {
        let payload = Payload::new(&[], &[]);
        assert!(payload.is_empty());
        assert_eq!(payload.len(), 0);
        assert!(payload.to_bytes().is_empty());
    }

    #[test]
    fn dispatch_names_reserved_opcodes() {
        let d = Dispatch::Inline {
            opcode: opcode::FRAME_BOUNDARY,
            data: [0; 3],
        };
        assert_eq!(d.opcode_name(), "FRAME_BOUNDARY");
    }
}
