//! Snapshot plumbing for freeze/thaw.

use serde::{Deserialize, Serialize};

/// Producer-owned request a freeze record points at. The producer keeps it
/// alive and unmoved until the consumer has drained past the record.
#[derive(Debug, Default)]
pub(crate) struct FreezeRequest {
    pub registers: Vec<u8>,
    pub size: usize,
}

/// Captured channel state. Restoring it with `thaw` on a drained channel
/// reproduces the captured positions, pacing debt and device registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub read_pos: u64,
    pub write_pos: u64,
    pub pending_frames: u32,
    pub registers: Vec<u8>,
}
