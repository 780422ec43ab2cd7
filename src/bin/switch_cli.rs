use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use switch_scan::audio::ScriptedSource;
use switch_scan::calibration::{CalibrationRecord, Calibrator, DEFAULT_RECORD_PATH};
use switch_scan::config::AppConfig;
use switch_scan::events::SwitchEvent;
use switch_scan::scan::{KeyLayout, ScanController, ScanMode, ScanTiming};

#[derive(Parser, Debug)]
#[command(
    name = "switch_cli",
    about = "Offline calibration and scan tooling for the switch interface"
)]
struct Cli {
    /// Override path of the runtime config file
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the calibration analysis over a recorded WAV clip
    Calibrate {
        #[arg(long)]
        wav: PathBuf,
        /// Presses prompted for in the recording
        #[arg(long)]
        target_presses: Option<usize>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load and normalize a persisted calibration record
    CheckRecord {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Drive the scan state machine with scripted press times
    Simulate {
        #[arg(long)]
        layout: PathBuf,
        /// Dwell interval in seconds
        #[arg(long)]
        dwell: Option<f64>,
        #[arg(long)]
        row_column: bool,
        /// Comma-separated press offsets in seconds, e.g. "0.65,1.9"
        #[arg(long)]
        presses: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Calibrate {
            wav,
            target_presses,
            output,
        } => run_calibrate(config, &wav, target_presses, output),
        Commands::CheckRecord { path } => run_check_record(path),
        Commands::Simulate {
            layout,
            dwell,
            row_column,
            presses,
        } => run_simulate(config, &layout, dwell, row_column, &presses),
    }
}

fn run_calibrate(
    mut config: AppConfig,
    wav: &PathBuf,
    target_presses: Option<usize>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    if let Some(target) = target_presses {
        config.calibration.target_press_count = target;
    }

    let source = ScriptedSource::from_wav(wav, config.audio.blocksize)
        .with_context(|| format!("reading {}", wav.display()))?;
    let sample_rate = {
        use switch_scan::audio::FrameSource;
        source.sample_rate()
    };
    let samples = source.into_samples();

    let calibrator = Calibrator::new(config.detector, config.calibration);
    let result = calibrator.analyze_clip(&samples, sample_rate);

    let json = serde_json::to_string_pretty(&result)?;
    if let Some(path) = output {
        std::fs::write(&path, &json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }

    if result.is_usable() {
        Ok(ExitCode::from(0))
    } else {
        Ok(ExitCode::from(2))
    }
}

fn run_check_record(path: Option<PathBuf>) -> Result<ExitCode> {
    let path = path.unwrap_or_else(|| DEFAULT_RECORD_PATH.clone());
    match CalibrationRecord::load(&path) {
        Ok(record) => {
            if record.version < switch_scan::calibration::RECORD_VERSION {
                eprintln!(
                    "Legacy record (version {}): quality fields defaulted",
                    record.version
                );
            }
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::from(0))
        }
        Err(err) => {
            use switch_scan::ErrorCode;
            eprintln!("{}", err.message());
            Ok(ExitCode::from(2))
        }
    }
}

fn run_simulate(
    config: AppConfig,
    layout_path: &PathBuf,
    dwell: Option<f64>,
    row_column: bool,
    presses: &str,
) -> Result<ExitCode> {
    let layout = KeyLayout::from_file(layout_path)
        .map_err(|e| anyhow::anyhow!("{}", switch_scan::ErrorCode::message(&e)))?;

    let mut scan_config = config.scan;
    if let Some(dwell) = dwell {
        scan_config.dwell_interval = dwell;
    }
    scan_config.row_column_scan = row_column;

    let mode = if row_column {
        ScanMode::RowColumn
    } else {
        ScanMode::Linear
    };
    let mut controller = ScanController::new(
        &layout,
        mode,
        ScanTiming::from_config(&scan_config),
    )
    .map_err(|e| anyhow::anyhow!("{}", switch_scan::ErrorCode::message(&e)))?;

    let mut press_times: Vec<Duration> = presses
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map(Duration::from_secs_f64)
                .with_context(|| format!("invalid press offset '{}'", part))
        })
        .collect::<Result<_>>()?;
    press_times.sort();

    // Virtual clock: everything runs against offsets from a fixed origin,
    // so the simulation finishes instantly and deterministically
    let origin = Instant::now();
    let end = press_times
        .last()
        .copied()
        .unwrap_or(Duration::ZERO)
        + Duration::from_secs_f64(scan_config.dwell_interval * 2.0);

    controller.start(origin);
    let mut presses = press_times.into_iter().peekable();
    let mut activations = Vec::new();

    loop {
        let next_deadline = controller.next_deadline();
        let next_press = presses.peek().map(|offset| origin + *offset);

        let (event_time, is_press) = match (next_deadline, next_press) {
            (Some(deadline), Some(press)) if press <= deadline => (press, true),
            (Some(deadline), _) => (deadline, false),
            (None, Some(press)) => (press, true),
            (None, None) => break,
        };
        if event_time > origin + end {
            break;
        }

        if is_press {
            let offset = presses.next().unwrap();
            let event = SwitchEvent::press(offset);
            if let Some(activation) = controller.handle_event(event, event_time) {
                println!("{}", serde_json::to_string(&activation)?);
                activations.push(activation);
            }
        } else {
            controller.on_timer(event_time);
        }
    }

    eprintln!("{} activation(s)", activations.len());
    Ok(ExitCode::from(0))
}
