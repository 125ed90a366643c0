//! frame-replay: decode captured sensor-values notifications offline.
//!
//! Reads one notification per line as hex (`#` starts a comment), decodes it
//! with the configured product line, side and ranges, and prints one JSON
//! object per line on stdout.
//!
//! ```text
//! frame-replay [--settings <file>] [capture.txt]
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use gait_link::domain::clock::{Clock, SystemClock};
use gait_link::domain::models::{ControlEvent, SampleBatch};
use gait_link::domain::settings::{Settings, SettingsService};
use gait_link::infrastructure::bluetooth::frame::{self, DecodeContext, DecodedFrame};
use gait_link::infrastructure::bluetooth::protocol::DeviceProfile;
use gait_link::infrastructure::logging::init_logger;
use serde::Serialize;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::{info, warn};

/// Decode captured sensor-values notifications offline
#[derive(Parser, Debug)]
#[command(name = "frame-replay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Settings file to use instead of the one in the config directory
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Capture file, one hex-encoded notification per line (stdin if omitted)
    input: Option<PathBuf>,
}

/// Bytes of one capture line, or `None` for blank and comment-only lines.
fn parse_hex_line(line: &str) -> anyhow::Result<Option<Vec<u8>>> {
    let content = line.split('#').next().unwrap_or("");
    let digits: String = content
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    if digits.is_empty() {
        return Ok(None);
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair)?;
            u8::from_str_radix(text, 16).with_context(|| format!("bad hex byte {:?}", text))
        })
        .collect::<anyhow::Result<Vec<u8>>>()
        .map(Some)
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayRecord {
    Samples { line: usize, batch: SampleBatch },
    Control { line: usize, event: ControlEvent },
}

fn decode_context(settings: &Settings, clock: &dyn Clock) -> DecodeContext {
    let profile = DeviceProfile::for_line(settings.product_line);
    DecodeContext {
        product_line: settings.product_line,
        side_position: settings.side_position,
        acc_range: settings.acc_range,
        gyro_range: settings.gyro_range,
        calibrated_pressure: settings.calibrated_pressure,
        serial_interval: profile.serial_interval(),
        host_now: clock.now(),
    }
}

fn replay(
    reader: impl BufRead,
    settings: &Settings,
    clock: &dyn Clock,
    out: &mut impl Write,
) -> anyhow::Result<(usize, usize)> {
    let mut decoded = 0;
    let mut failed = 0;
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line?;
        let bytes = match parse_hex_line(&line) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(e) => {
                warn!("line {}: {}", line_no, e);
                failed += 1;
                continue;
            }
        };

        let ctx = decode_context(settings, clock);
        let record = match frame::decode(&bytes, &ctx) {
            Ok(DecodedFrame::Samples(batch)) => ReplayRecord::Samples {
                line: line_no,
                batch,
            },
            Ok(DecodedFrame::Control(event)) => ReplayRecord::Control {
                line: line_no,
                event,
            },
            Err(e) => {
                warn!("line {}: {}", line_no, e);
                failed += 1;
                continue;
            }
        };
        serde_json::to_writer(&mut *out, &record)?;
        writeln!(out)?;
        decoded += 1;
    }
    Ok((decoded, failed))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings_service = match &args.settings {
        Some(path) => SettingsService::from_path(path.clone()),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();
    let _log_guard = init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Replaying {:?} frames ({:?}, settings {})",
        settings.product_line,
        settings.side_position,
        settings_service.path().display()
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let (decoded, failed) = match &args.input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("cannot open {}", path.display()))?;
            replay(BufReader::new(file), &settings, &SystemClock, &mut out)?
        }
        None => replay(io::stdin().lock(), &settings, &SystemClock, &mut out)?,
    };
    out.flush()?;

    info!("Decoded {} frames, {} failed", decoded, failed);
    Ok(())
}
