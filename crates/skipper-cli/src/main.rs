//! `skipper` – pan/tilt face-tracking head controller.
//!
//! ```bash
//! skipper calibrate          # measure travel limits, write ~/.skipper/calibration.toml
//! skipper track              # follow detections arriving on UDP until Ctrl-C
//! skipper track --sim        # same, against an in-process simulated head
//! skipper status             # one-shot firmware readiness probe
//! skipper stop               # emergency stop
//! ```
//!
//! Ctrl-C (or SIGTERM) always triggers an emergency stop: the tracking loop
//! abandons any in-flight move and the firmware halts every axis.
//!
//! Exit codes: `0` success, `1` firmware unreachable or homing failed,
//! `2` invalid configuration or calibration.

mod calibrate;
mod calibration;
mod config;

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use skipper_hal::{MoonrakerBridge, MotionBridge, SimBridge};
use skipper_runtime::{
    StopHandle, TrackerState, TrackerStatus, TrackingLoop, UdpDetectionSource, detection_channel,
    init_tracing, stop_channel,
};
use skipper_types::{
    Axis, AxisCalibration, ConfigError, ConnectionError, MotionError, PerAxis, Readiness,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::calibrate::CalibrationError;
use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "skipper")]
#[command(about = "Pan/tilt face-tracking head controller", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow detections until stopped
    Track {
        /// Drive a simulated head instead of the firmware
        #[arg(long)]
        sim: bool,
        /// Shut down gracefully after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
    /// Measure axis limits interactively and write the calibration store
    Calibrate {
        #[arg(long)]
        sim: bool,
    },
    /// Probe firmware readiness once
    Status,
    /// Send an emergency stop to the firmware
    Stop,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("homing {axis} failed: {source}")]
    Homing { axis: Axis, source: MotionError },

    #[error(transparent)]
    Motion(#[from] MotionError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("cannot listen for detections on {addr}: {source}")]
    Listen { addr: String, source: std::io::Error },
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Config(_) | CliError::Calibration(CalibrationError::Config(_)) => {
                ExitCode::from(2)
            }
            _ => ExitCode::from(1),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing("skipper");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start async runtime: {e}", "error:".red().bold());
            return ExitCode::from(1);
        }
    };

    let (stop, _) = stop_channel();
    let handler_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\n{}", "⚠  Interrupt received – emergency stop".yellow().bold());
        handler_stop.trigger();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; emergency stop on Ctrl-C unavailable");
    }

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Track { sim, duration } => track(sim, duration.map(Duration::from_secs), stop).await,
            Commands::Calibrate { sim } => run_calibration(sim, stop).await,
            Commands::Status => status().await,
            Commands::Stop => emergency_stop().await,
        }
    });
    // A prompt may still be blocked reading stdin.
    runtime.shutdown_timeout(Duration::from_millis(500));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            e.exit_code()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Head wiring
// ─────────────────────────────────────────────────────────────────────────────

/// The bridge the loop drives, plus the concrete firmware client when there
/// is one, so an emergency stop can be confirmed before exit.
struct Head {
    bridge: Arc<dyn MotionBridge>,
    moonraker: Option<Arc<MoonrakerBridge>>,
}

impl Head {
    fn new(cfg: &Config, calibration: PerAxis<AxisCalibration>, sim: bool) -> Self {
        if sim {
            info!("using simulated head");
            return Self {
                bridge: Arc::new(SimBridge::new(calibration)),
                moonraker: None,
            };
        }
        let moonraker = Arc::new(MoonrakerBridge::new(cfg.moonraker(), calibration));
        Self {
            bridge: moonraker.clone(),
            moonraker: Some(moonraker),
        }
    }

    async fn halt(&self) {
        self.bridge.emergency_stop();
        if let Some(m) = &self.moonraker {
            if let Err(e) = m.emergency_stop_confirmed().await {
                warn!(error = %e, "emergency stop not confirmed by firmware");
            }
        }
    }

    /// Connect, then home both axes. A failed homing powers down whatever
    /// the earlier steps energized.
    async fn connect_and_home(&self) -> Result<(), CliError> {
        self.bridge.connect().await?;
        for axis in Axis::ALL {
            if let Err(source) = self.bridge.home(axis).await {
                self.power_down().await;
                return Err(CliError::Homing { axis, source });
            }
        }
        Ok(())
    }

    async fn power_down(&self) {
        for axis in Axis::ALL {
            if let Err(e) = self.bridge.enable(axis, false).await {
                warn!(%axis, error = %e, "failed to disable axis");
            }
        }
    }
}

/// Load and validate the config, writing the defaults on first run.
fn load_config() -> Result<Config, ConfigError> {
    let path = config::config_path();
    if !path.exists() {
        config::save(&Config::default())?;
        println!(
            "  {} Wrote default configuration to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        );
    }
    let cfg = config::load()?;
    cfg.validate()?;
    Ok(cfg)
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

async fn track(sim: bool, duration: Option<Duration>, stop: StopHandle) -> Result<(), CliError> {
    let cfg = load_config()?;
    let calibration = calibration::load()?;
    let head = Head::new(&cfg, calibration, sim);

    // Bound before homing so a taken port never leaves the drivers energized.
    let addr = cfg.vision.listen_addr.clone();
    let source = UdpDetectionSource::bind(&addr)
        .await
        .map_err(|source| CliError::Listen { addr, source })?;

    let mut interrupted = stop.signal();
    tokio::select! {
        ready = head.connect_and_home() => ready?,
        _ = interrupted.stopped() => {
            head.halt().await;
            return Ok(());
        }
    }
    println!("  {} Head homed and ready", "✓".green().bold());

    let (events_tx, events_rx) = detection_channel();
    let (ingest_stop, ingest_signal) = stop_channel();
    let ingest = tokio::spawn(source.run(events_tx, ingest_signal));

    if let Some(limit) = duration {
        let ingest_stop = ingest_stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            info!(?limit, "run time elapsed; shutting down");
            ingest_stop.trigger();
        });
    }

    let tracker = TrackingLoop::new(head.bridge.clone(), cfg.loop_config());
    tokio::spawn(report_status(tracker.subscribe_status()));
    let final_state = tracker.run(events_rx, stop.signal()).await;

    ingest_stop.trigger();
    if let Err(e) = ingest.await {
        warn!(error = %e, "detection ingestion task failed");
    }
    if stop.is_triggered() {
        head.halt().await;
    }
    println!("  Tracking ended in state {final_state:?}");
    Ok(())
}

async fn run_calibration(sim: bool, stop: StopHandle) -> Result<(), CliError> {
    let cfg = load_config()?;
    let base = calibration::load()?;
    let head = Head::new(&cfg, calibrate::probe_envelope(&base), sim);
    let store = calibration::calibration_path();
    let input = tokio::io::BufReader::new(tokio::io::stdin());

    let mut interrupted = stop.signal();
    tokio::select! {
        result = calibrate::run(head.bridge.as_ref(), base, &store, input, std::io::stdout()) => {
            result?;
        }
        _ = interrupted.stopped() => head.halt().await,
    }
    Ok(())
}

async fn status() -> Result<(), CliError> {
    let cfg = load_config()?;
    let calibration = calibration::load()?;
    let bridge = MoonrakerBridge::new(cfg.moonraker(), calibration);

    print!("  Firmware at {} … ", cfg.firmware.url.dimmed());
    let _ = std::io::stdout().flush();
    match bridge.probe().await? {
        Readiness::Ready => println!("{}", "ready".green()),
        Readiness::NotReady(state) => println!("{} ({state})", "not ready".yellow()),
    }
    for axis in Axis::ALL {
        let l = calibration[axis].limits;
        println!(
            "  {:<5} {:>6.1}° to {:>6.1}°  max {:.1}°/s",
            axis.to_string().bold(),
            l.position_min_deg,
            l.position_max_deg,
            l.max_speed_deg_s
        );
    }
    Ok(())
}

async fn emergency_stop() -> Result<(), CliError> {
    let cfg = load_config()?;
    let bridge = MoonrakerBridge::new(cfg.moonraker(), calibration::load()?);
    bridge.emergency_stop_confirmed().await?;
    println!("  {} Emergency stop sent", "✓".green().bold());
    Ok(())
}

/// Print tracker state transitions until the loop goes away.
async fn report_status(mut status: watch::Receiver<TrackerStatus>) {
    let mut last = status.borrow().state;
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        if current.state == last {
            continue;
        }
        last = current.state;
        let label = match current.state {
            TrackerState::Idle => "idle".dimmed(),
            TrackerState::Tracking => "tracking".green(),
            TrackerState::Faulted => "faulted".red().bold(),
            TrackerState::Stopped => "stopped".yellow(),
        };
        match &current.last_error {
            Some(err) if current.state == TrackerState::Faulted => {
                println!("  state → {label}: {err}")
            }
            _ => println!("  state → {label}"),
        }
    }
}
