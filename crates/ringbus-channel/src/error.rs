use std::time::Duration;

use ringbus_record::RecordError;

use crate::channel::ChannelState;
use crate::handler::BackendError;

/// Channel-level errors. `Corruption` and `ConsumerFault` are fatal:
/// the consumer has stopped and the channel must be torn down.
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    /// A framing rule was violated on either side of the ring.
    #[error("protocol corruption: {0}")]
    Corruption(#[from] RecordError),

    /// The backend returned an error while handling a record.
    #[error("consumer fault: {0}")]
    ConsumerFault(BackendError),

    /// The consumer thread did not signal readiness within the
    /// extended open bound.
    #[error(
        "consumer not ready after {waited:?} (read_pos={read_pos}, write_pos={write_pos})"
    )]
    OpenTimeout {
        waited: Duration,
        read_pos: u64,
        write_pos: u64,
    },

    /// A reset was requested while records were still in flight.
    #[error("channel not drained: read_pos={read_pos}, write_pos={write_pos}")]
    NotDrained { read_pos: u64, write_pos: u64 },

    /// The operation requires an open channel.
    #[error("channel not open (state: {state:?})")]
    NotOpen { state: ChannelState },

    /// `open` was called on a channel that is already running.
    #[error("channel already open")]
    AlreadyOpen,

    /// The channel was cancelled and accepts no further work.
    #[error("channel cancelled")]
    Cancelled,

    /// The consumer thread panicked; its backend is lost.
    #[error("consumer thread panicked")]
    ReaderPanicked,

    /// The consumer thread could not be spawned.
    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Construction-time parameter validation failed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ringbus_record::RecordError;

    #[test]
    fn corruption_wraps_record_error() {
        let err = ChannelError::from(RecordError::UnknownOpcode {
            opcode: 99,
            position: 1234,
        });
        assert!(matches!(err, ChannelError::Corruption(_)));
        let text = err.to_string();
        assert!(text.contains("protocol corruption"), "got: {text}");
        assert!(text.contains("99"), "got: {text}");
    }

    #[test]
    fn not_drained_reports_positions() {
        let err = ChannelError::NotDrained {
            read_pos: 10,
            write_pos: 14,
        };
        let text = err.to_string();
        assert!(text.contains("read_pos=10"), "got: {text}");
        assert!(text.contains("write_pos=14"), "got: {text}");
    }

    #[test]
    fn consumer_fault_preserves_backend_message() {
        let err = ChannelError::ConsumerFault("draw target lost".into());
        assert!(err.to_string().contains("draw target lost"));
    }
}
