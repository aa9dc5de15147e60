use std::thread;
use std::time::{Duration, Instant};

use ringbus_channel::{Backend, BackendError, Channel, ChannelConfig, Dispatch};
use ringbus_record::opcode;
use serde::Serialize;
use tracing::info;

use crate::cmd::PaceArgs;
use crate::exit::{channel_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_report, OutputFormat};

/// Simulates a renderer that takes a fixed time per frame, so the pacer
/// has something real to push back against.
struct SlowRenderer {
    frame_time: Duration,
}

impl Backend for SlowRenderer {
    fn open(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn handle(&mut self, dispatch: Dispatch<'_>) -> Result<(), BackendError> {
        if dispatch.opcode() == opcode::FRAME_BOUNDARY {
            thread::sleep(self.frame_time);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct PaceReport {
    schema_id: &'static str,
    frames: u32,
    depth: u32,
    bound: u32,
    max_pending: u32,
    frame_ms: u64,
    elapsed_ms: u64,
    avg_frame_ms: f64,
}

pub fn run(args: PaceArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ChannelConfig::default()
        .with_capacity_slots(1024)
        .with_queue_depth(args.depth);
    let backend = SlowRenderer {
        frame_time: Duration::from_millis(args.frame_ms),
    };
    let mut channel = Channel::new(config, Box::new(backend))
        .map_err(|err| channel_error("channel construction failed", err))?;
    channel
        .open()
        .map_err(|err| channel_error("open failed", err))?;

    let start = Instant::now();
    let mut max_pending = 0;
    for frame in 0..args.frames {
        channel
            .writer()
            .frame_boundary(frame & 1)
            .map_err(|err| channel_error("frame boundary failed", err))?;
        max_pending = max_pending.max(channel.pending_frames());
    }
    channel
        .writer()
        .wait_until_drained()
        .map_err(|err| channel_error("drain failed", err))?;
    let elapsed = start.elapsed();
    channel
        .shutdown()
        .map_err(|err| channel_error("shutdown failed", err))?;

    let report = PaceReport {
        schema_id: "https://schemas.ringbus.dev/cli/v1/pace-report.schema.json",
        frames: args.frames,
        depth: args.depth,
        bound: args.depth + 1,
        max_pending,
        frame_ms: args.frame_ms,
        elapsed_ms: elapsed.as_millis() as u64,
        avg_frame_ms: elapsed.as_secs_f64() * 1000.0 / f64::from(args.frames.max(1)),
    };
    info!(
        frames = report.frames,
        max_pending = report.max_pending,
        "pace run complete"
    );

    let rows = [
        ("frames", report.frames.to_string()),
        ("queue depth", report.depth.to_string()),
        ("pacing bound", report.bound.to_string()),
        ("max pending", report.max_pending.to_string()),
        ("frame ms", report.frame_ms.to_string()),
        ("elapsed ms", report.elapsed_ms.to_string()),
        ("avg frame ms", format!("{:.2}", report.avg_frame_ms)),
    ];
    print_report(&report, &rows, &report.max_pending.to_string(), format);

    if report.max_pending > report.bound {
        return Err(CliError::new(
            FAILURE,
            format!(
                "pacing bound violated: {} pending frames, bound {}",
                report.max_pending, report.bound
            ),
        ));
    }
    Ok(SUCCESS)
}
