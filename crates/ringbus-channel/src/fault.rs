use std::sync::Mutex;

use tracing::warn;

use crate::error::ChannelError;
use crate::event::lock;

/// Single-occupancy capture of a consumer-side failure.
///
/// The consumer stores at most one error here and keeps draining. The
/// producer takes it at its next blocking wait, so a fault is observed
/// exactly once. A second fault arriving while one is pending is dropped:
/// first fault wins.
#[derive(Debug, Default)]
pub(crate) struct FaultSlot {
    slot: Mutex<Option<ChannelError>>,
}

impl FaultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumer side. Returns false when an earlier fault is still pending.
    pub fn capture(&self, fault: ChannelError) -> bool {
        let mut slot = lock(&self.slot);
        match *slot {
            None => {
                *slot = Some(fault);
                true
            }
            Some(_) => {
                warn!(dropped = %fault, "fault already pending, keeping the first");
                false
            }
        }
    }

    /// Producer side. Takes and clears the pending fault, if any.
    pub fn take(&self) -> Option<ChannelError> {
        lock(&self.slot).take()
    }
}
