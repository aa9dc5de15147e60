use std::fmt;

use ringbus_channel::ChannelError;

// Exit code constants shared across subcommands.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    let code = match &err {
        ChannelError::Corruption(_) => DATA_INVALID,
        ChannelError::ConsumerFault(_) => FAILURE,
        ChannelError::OpenTimeout { .. } => TIMEOUT,
        ChannelError::Config(_)
        | ChannelError::NotOpen { .. }
        | ChannelError::AlreadyOpen
        | ChannelError::NotDrained { .. } => USAGE,
        ChannelError::Cancelled => FAILURE,
        ChannelError::ReaderPanicked | ChannelError::Spawn(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_maps_to_data_invalid() {
        let err = channel_error(
            "soak failed",
            ChannelError::Corruption(ringbus_record::RecordError::UnknownOpcode {
                opcode: 99,
                position: 7,
            }),
        );
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.contains("soak failed"));
    }

    #[test]
    fn config_errors_map_to_usage() {
        let err = channel_error("bad flags", ChannelError::Config("capacity".to_string()));
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn open_timeout_maps_to_timeout() {
        let err = channel_error(
            "open failed",
            ChannelError::OpenTimeout {
                waited: std::time::Duration::from_secs(14),
                read_pos: 0,
                write_pos: 0,
            },
        );
        assert_eq!(err.code, TIMEOUT);
    }
}
