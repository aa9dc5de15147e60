use std::time::Duration;

use ringbus_record::RecordShape;

use crate::error::{ChannelError, Result};

/// Default ring capacity: 32768 slots, 512 KiB of storage.
pub const DEFAULT_CAPACITY_SLOTS: u64 = 1 << 15;

/// Default frame-pacing queue depth.
pub const DEFAULT_QUEUE_DEPTH: u32 = 2;

/// Default largest shortfall the producer spin-polls through.
pub const DEFAULT_SPIN_THRESHOLD_SLOTS: u64 = 0x80;

/// Default unflushed-slot tally that forces an idle-consumer wakeup.
pub const DEFAULT_WAKEUP_TALLY_SLOTS: u64 = 0x2000;

/// Channel construction parameters. Read once at `Channel::new`.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Ring capacity in slots. Must be a power of two, at least 8.
    pub capacity_slots: u64,
    /// Frame boundaries the producer may queue ahead of the consumer.
    pub queue_depth: u32,
    /// Serialize every publish against the consumer. Deterministic and
    /// slow; meant for diagnostics.
    pub synchronous: bool,
    /// Largest shortfall the producer spin-polls through. Larger
    /// shortfalls arm the space-freed signal and sleep.
    pub spin_threshold_slots: u64,
    /// Unflushed slots accumulated before an idle consumer is woken.
    pub wakeup_tally_slots: u64,
    /// First bound on consumer readiness while opening.
    pub open_timeout: Duration,
    /// Extended bound applied once after the first open timeout.
    pub open_timeout_extended: Duration,
    /// Shapes of backend-defined opcodes, indexed from
    /// `USER_OPCODE_START`. An opcode outside this table is rejected.
    pub user_shapes: Vec<RecordShape>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity_slots: DEFAULT_CAPACITY_SLOTS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            synchronous: false,
            spin_threshold_slots: DEFAULT_SPIN_THRESHOLD_SLOTS,
            wakeup_tally_slots: DEFAULT_WAKEUP_TALLY_SLOTS,
            open_timeout: Duration::from_secs(2),
            open_timeout_extended: Duration::from_secs(12),
            user_shapes: Vec::new(),
        }
    }
}

impl ChannelConfig {
    pub fn with_capacity_slots(mut self, capacity_slots: u64) -> Self {
        self.capacity_slots = capacity_slots;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: u32) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_user_shapes(mut self, user_shapes: Vec<RecordShape>) -> Self {
        self.user_shapes = user_shapes;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.capacity_slots.is_power_of_two() || self.capacity_slots < 8 {
            return Err(ChannelError::Config(format!(
                "capacity_slots must be a power of two >= 8, got {}",
                self.capacity_slots
            )));
        }
        if self.queue_depth == 0 {
            return Err(ChannelError::Config(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        if self.wakeup_tally_slots == 0 {
            return Err(ChannelError::Config(
                "wakeup_tally_slots must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        ChannelConfig::default()
            .validate()
            .expect("default config should be valid");
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let err = ChannelConfig::default()
            .with_capacity_slots(100)
            .validate()
            .expect_err("capacity 100 should be rejected");
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[test]
    fn rejects_tiny_capacity() {
        let err = ChannelConfig::default()
            .with_capacity_slots(4)
            .validate()
            .expect_err("capacity 4 should be rejected");
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[test]
    fn rejects_zero_queue_depth() {
        let err = ChannelConfig::default()
            .with_queue_depth(0)
            .validate()
            .expect_err("queue depth 0 should be rejected");
        assert!(matches!(err, ChannelError::Config(_)));
    }
}
