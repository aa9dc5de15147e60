use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ringbus_channel::{Backend, BackendError, Channel, ChannelConfig, Dispatch};
use ringbus_record::{opcode, slots_for_bytes, RecordShape};
use serde::Serialize;
use tracing::info;

use crate::cmd::SoakArgs;
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat};

const DATA_OP: u32 = opcode::USER_OPCODE_START;

/// Consumes soak records, verifying the sequence number each payload
/// carries so reordering or loss surfaces as a ConsumerFault.
struct Sink {
    expected_seq: u64,
}

impl Backend for Sink {
    fn open(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn handle(&mut self, dispatch: Dispatch<'_>) -> Result<(), BackendError> {
        if let Dispatch::Data { payload, .. } = dispatch {
            let bytes = payload.to_bytes();
            let seq = u64::from_le_bytes(
                bytes[0..8]
                    .try_into()
                    .map_err(|_| BackendError::from("payload shorter than sequence header"))?,
            );
            if seq != self.expected_seq {
                return Err(format!(
                    "sequence break: expected {}, got {seq}",
                    self.expected_seq
                )
                .into());
            }
            self.expected_seq += 1;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        self.expected_seq = 0;
        Ok(())
    }
}

#[derive(Serialize)]
struct SoakReport {
    schema_id: &'static str,
    records: u64,
    payload_bytes: usize,
    total_bytes: u64,
    frames: u64,
    elapsed_ms: u64,
    records_per_sec: u64,
    mib_per_sec: f64,
    synchronous: bool,
    capacity_slots: u64,
    interrupted: bool,
}

pub fn run(args: SoakArgs, format: OutputFormat) -> CliResult<i32> {
    let payload_len = args.payload.max(8);
    let span = 1 + u64::from(slots_for_bytes(payload_len));
    if span >= args.capacity {
        return Err(CliError::new(
            USAGE,
            format!(
                "payload of {payload_len} bytes spans {span} slots and can never fit a \
                 {}-slot ring",
                args.capacity
            ),
        ));
    }

    let config = ChannelConfig::default()
        .with_capacity_slots(args.capacity)
        .with_synchronous(args.synchronous)
        .with_user_shapes(vec![RecordShape::Data]);
    let mut channel = Channel::new(config, Box::new(Sink { expected_seq: 0 }))
        .map_err(|err| channel_error("channel construction failed", err))?;
    channel
        .open()
        .map_err(|err| channel_error("open failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let start = Instant::now();
    let mut payload = vec![0u8; payload_len];
    let mut sent = 0u64;
    let mut frames = 0u64;
    for seq in 0..args.records {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        payload[..8].copy_from_slice(&seq.to_le_bytes());
        channel
            .writer()
            .send_data(DATA_OP, &payload)
            .map_err(|err| channel_error("send failed", err))?;
        sent += 1;
        if args.frame_every > 0 && sent % args.frame_every == 0 {
            channel
                .writer()
                .frame_boundary(0)
                .map_err(|err| channel_error("frame boundary failed", err))?;
            frames += 1;
        }
    }
    channel
        .writer()
        .wait_until_drained()
        .map_err(|err| channel_error("drain failed", err))?;
    let elapsed = start.elapsed();
    channel
        .shutdown()
        .map_err(|err| channel_error("shutdown failed", err))?;

    let secs = elapsed.as_secs_f64().max(1e-9);
    let total_bytes = sent * payload_len as u64;
    let report = SoakReport {
        schema_id: "https://schemas.ringbus.dev/cli/v1/soak-report.schema.json",
        records: sent,
        payload_bytes: payload_len,
        total_bytes,
        frames,
        elapsed_ms: elapsed.as_millis() as u64,
        records_per_sec: (sent as f64 / secs) as u64,
        mib_per_sec: total_bytes as f64 / secs / (1024.0 * 1024.0),
        synchronous: args.synchronous,
        capacity_slots: args.capacity,
        interrupted: sent < args.records,
    };
    info!(
        records = report.records,
        elapsed_ms = report.elapsed_ms,
        "soak complete"
    );

    let rows = [
        ("records", report.records.to_string()),
        ("payload bytes", report.payload_bytes.to_string()),
        ("frames", report.frames.to_string()),
        ("elapsed ms", report.elapsed_ms.to_string()),
        ("records/s", report.records_per_sec.to_string()),
        ("MiB/s", format!("{:.2}", report.mib_per_sec)),
        ("synchronous", report.synchronous.to_string()),
        ("interrupted", report.interrupted.to_string()),
    ];
    print_report(&report, &rows, &report.records_per_sec.to_string(), format);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
