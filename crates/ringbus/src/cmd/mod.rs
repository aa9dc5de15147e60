use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod envinfo;
pub mod pace;
pub mod soak;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive a producer/consumer pair hard and print throughput statistics.
    Soak(SoakArgs),
    /// Demonstrate frame pacing against a simulated render backend.
    Pace(PaceArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Print build and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Soak(args) => soak::run(args, format),
        Command::Pace(args) => pace::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct SoakArgs {
    /// Ring capacity in slots (power of two).
    #[arg(long, default_value_t = 4096)]
    pub capacity: u64,
    /// Data records to send.
    #[arg(long, default_value_t = 100_000)]
    pub records: u64,
    /// Payload bytes per record (minimum 8, carries a sequence number).
    #[arg(long, default_value_t = 64)]
    pub payload: usize,
    /// Serialize every publish against the consumer.
    #[arg(long)]
    pub synchronous: bool,
    /// Insert a frame boundary every N records (0 disables).
    #[arg(long, default_value_t = 0)]
    pub frame_every: u64,
}

#[derive(Args, Debug)]
pub struct PaceArgs {
    /// Frame-pacing queue depth.
    #[arg(long, default_value_t = 2)]
    pub depth: u32,
    /// Frame boundaries to submit.
    #[arg(long, default_value_t = 120)]
    pub frames: u32,
    /// Simulated render time per frame, milliseconds.
    #[arg(long, default_value_t = 4)]
    pub frame_ms: u64,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {}
