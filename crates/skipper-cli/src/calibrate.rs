//! Interactive calibration procedure.
//!
//! The operator jogs each axis by hand to find its usable travel, then the
//! procedure applies a safety margin, asks for speeds, validates the result
//! and writes the calibration store. Motors are always powered down at the
//! end, whether the procedure succeeded or not.
//!
//! Input is read asynchronously so an emergency stop can interrupt a prompt.

use std::io::Write;
use std::path::Path;

use colored::Colorize;
use skipper_hal::MotionBridge;
use skipper_types::{
    Axis, AxisCalibration, AxisLimits, ConfigError, ConnectionError, HomingMode, MotionCommand,
    MotionError, PerAxis,
};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

use crate::calibration;

/// Half-width of the travel allowed while probing for limits.
pub const PROBE_RANGE_DEG: f64 = 90.0;

const DIRECTION_TEST_DEG: f64 = 2.0;
const DEFAULT_MARGIN_DEG: f64 = 2.0;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Motion(#[from] MotionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("calibration aborted: input closed")]
    Aborted,
}

/// Envelope the bridge enforces while probing: wide travel, the speeds of
/// `base`, and `set_zero` homing so the starting pose becomes zero.
pub fn probe_envelope(base: &PerAxis<AxisCalibration>) -> PerAxis<AxisCalibration> {
    base.map(|_, cal| AxisCalibration {
        limits: AxisLimits {
            position_min_deg: -PROBE_RANGE_DEG,
            position_max_deg: PROBE_RANGE_DEG,
            ..cal.limits
        },
        homing: HomingMode::SetZero,
    })
}

/// Run the procedure against `bridge` and write the result to `store`.
///
/// `base` supplies default speeds and the homing mode to keep.
pub async fn run<R, W>(
    bridge: &dyn MotionBridge,
    base: PerAxis<AxisCalibration>,
    store: &Path,
    input: R,
    out: W,
) -> Result<PerAxis<AxisCalibration>, CalibrationError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut session = Session {
        bridge,
        input,
        out,
        positions: PerAxis::new(0.0, 0.0),
    };
    let result = session.calibrate(base, store).await;

    for axis in Axis::ALL {
        if let Err(e) = bridge.enable(axis, false).await {
            warn!(%axis, error = %e, "failed to disable axis after calibration");
        }
    }
    if result.is_ok() {
        writeln!(session.out, "\n{} Motors disabled. Calibration complete!", "✓".green().bold())?;
    }
    result
}

struct Session<'a, R, W> {
    bridge: &'a dyn MotionBridge,
    input: R,
    out: W,
    positions: PerAxis<f64>,
}

impl<R, W> Session<'_, R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    async fn calibrate(
        &mut self,
        base: PerAxis<AxisCalibration>,
        store: &Path,
    ) -> Result<PerAxis<AxisCalibration>, CalibrationError> {
        self.heading("Skipper head calibration")?;
        writeln!(self.out, "Jog each axis to the edge of its safe travel.")?;
        writeln!(
            self.out,
            "{}",
            "Watch the head closely and stop before it reaches any hard stop.".yellow()
        )?;
        self.line("\nPress ENTER when ready to start...").await?;

        writeln!(self.out, "\nConnecting to the motion controller...")?;
        self.bridge.connect().await?;
        for axis in Axis::ALL {
            self.bridge.home(axis).await?;
        }
        writeln!(self.out, "{} Connected; the current pose is zero.", "✓".green())?;

        self.direction_test(&base).await?;

        let mut found = PerAxis::new((0.0, 0.0), (0.0, 0.0));
        for axis in Axis::ALL {
            self.heading(&format!("{axis} limits"))?;
            let speed = base[axis].limits.homing_speed_deg_s;
            writeln!(self.out, "1. Find the NEGATIVE limit (use moves like -5):")?;
            let low = self.jog(axis, speed).await?;
            writeln!(self.out, "{} recorded {low:.1}°", "✓".green())?;
            writeln!(self.out, "2. Find the POSITIVE limit (use moves like +5):")?;
            let high = self.jog(axis, speed).await?;
            writeln!(self.out, "{} recorded {high:.1}°", "✓".green())?;
            self.move_axis(axis, 0.0, speed).await?;
            found[axis] = (low.min(high), low.max(high));
        }

        self.heading("Safety margin and speeds")?;
        let margin = self
            .float("Safety margin in degrees", DEFAULT_MARGIN_DEG)
            .await?
            .abs();
        let mut result = base;
        for axis in Axis::ALL {
            let (low, high) = found[axis];
            let defaults = base[axis].limits;
            let max_speed = self
                .float(&format!("{axis} max speed (deg/s)"), defaults.max_speed_deg_s)
                .await?;
            let homing_speed = self
                .float(&format!("{axis} homing speed (deg/s)"), defaults.homing_speed_deg_s)
                .await?;
            result[axis].limits = AxisLimits {
                position_min_deg: low + margin,
                position_max_deg: high - margin,
                max_speed_deg_s: max_speed,
                homing_speed_deg_s: homing_speed,
            };
        }

        if let Err(e) = calibration::validate(&result) {
            writeln!(self.out, "{} {e}", "✗".red().bold())?;
            return Err(e.into());
        }

        self.heading("Calibration result")?;
        for axis in Axis::ALL {
            let l = result[axis].limits;
            writeln!(
                self.out,
                "  {axis:<5} {:>6.1}° to {:>6.1}°  max {:.1}°/s  homing {:.1}°/s",
                l.position_min_deg, l.position_max_deg, l.max_speed_deg_s, l.homing_speed_deg_s
            )?;
        }
        calibration::save_to(&result, store)?;
        writeln!(self.out, "{} Saved to {}", "✓".green().bold(), store.display())?;

        if self.yes("\nVisit each limit now? (yes/no): ").await? {
            self.visit_limits(&result).await?;
        }
        Ok(result)
    }

    async fn direction_test(&mut self, base: &PerAxis<AxisCalibration>) -> Result<(), CalibrationError> {
        let speed = base.pan.limits.homing_speed_deg_s;
        writeln!(
            self.out,
            "\nDirection check: pan will move +{DIRECTION_TEST_DEG}°."
        )?;
        self.line("Press ENTER to test...").await?;
        self.move_axis(Axis::Pan, DIRECTION_TEST_DEG, speed).await?;
        let turned_left = self.yes("Did the head turn LEFT? (yes/no): ").await?;
        self.move_axis(Axis::Pan, 0.0, speed).await?;
        if !turned_left {
            writeln!(
                self.out,
                "{}",
                "Direction looks reversed: invert the pan stepper's dir_pin in the firmware config."
                    .yellow()
            )?;
        }
        Ok(())
    }

    /// Jog until the operator types `done`; returns the final position.
    async fn jog(&mut self, axis: Axis, speed: f64) -> Result<f64, CalibrationError> {
        writeln!(
            self.out,
            "   +N / -N move by N degrees, 0 returns to zero, done records the limit"
        )?;
        loop {
            let position = self.positions[axis];
            let command = self
                .line(&format!("{axis} at {position:.1}° > "))
                .await?
                .to_lowercase();
            match command.as_str() {
                "done" => return Ok(position),
                "0" => self.move_axis(axis, 0.0, speed).await?,
                c if c.starts_with('+') || c.starts_with('-') => match c.parse::<f64>() {
                    Ok(delta) if delta.is_finite() => {
                        let target = self.bridge.limits(axis).clamp(position + delta);
                        self.move_axis(axis, target, speed).await?;
                        writeln!(self.out, "moved to {:.1}°", self.positions[axis])?;
                    }
                    _ => writeln!(self.out, "Invalid move. Use a form like +5 or -10")?,
                },
                _ => writeln!(self.out, "Invalid command")?,
            }
        }
    }

    async fn visit_limits(&mut self, result: &PerAxis<AxisCalibration>) -> Result<(), CalibrationError> {
        let (pan, tilt) = (result.pan.limits, result.tilt.limits);
        let stops = [
            ("center", 0.0, 0.0),
            ("pan min", pan.position_min_deg, 0.0),
            ("center", 0.0, 0.0),
            ("pan max", pan.position_max_deg, 0.0),
            ("center", 0.0, 0.0),
            ("tilt min", 0.0, tilt.position_min_deg),
            ("center", 0.0, 0.0),
            ("tilt max", 0.0, tilt.position_max_deg),
            ("center", 0.0, 0.0),
        ];
        for (name, pan_deg, tilt_deg) in stops {
            writeln!(self.out, "  → {name}: ({pan_deg:.1}°, {tilt_deg:.1}°)")?;
            let (p, t) = tokio::join!(
                self.bridge.move_to(command(Axis::Pan, pan_deg, pan.max_speed_deg_s)),
                self.bridge.move_to(command(Axis::Tilt, tilt_deg, tilt.max_speed_deg_s)),
            );
            p?;
            t?;
            self.positions = PerAxis::new(pan_deg, tilt_deg);
        }
        writeln!(self.out, "{} Limit test complete", "✓".green())?;
        Ok(())
    }

    /// Move and track the position. Transient failures are reported and
    /// leave the position unchanged.
    async fn move_axis(&mut self, axis: Axis, target: f64, speed: f64) -> Result<(), CalibrationError> {
        match self.bridge.move_to(command(axis, target, speed)).await {
            Ok(()) => {
                self.positions[axis] = target;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                writeln!(self.out, "{} move failed ({e}); try again", "!".yellow())?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn heading(&mut self, text: &str) -> Result<(), CalibrationError> {
        let rule = "=".repeat(60);
        writeln!(self.out, "\n{rule}\n  {}\n{rule}", text.bold().cyan())?;
        Ok(())
    }

    async fn line(&mut self, prompt: &str) -> Result<String, CalibrationError> {
        write!(self.out, "{prompt}")?;
        self.out.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Err(CalibrationError::Aborted);
        }
        Ok(line.trim().to_string())
    }

    async fn yes(&mut self, prompt: &str) -> Result<bool, CalibrationError> {
        let answer = self.line(prompt).await?.to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    /// Prompt for a number; empty input takes `default`.
    async fn float(&mut self, label: &str, default: f64) -> Result<f64, CalibrationError> {
        loop {
            let answer = self.line(&format!("{label} [{default}]: ")).await?;
            if answer.is_empty() {
                return Ok(default);
            }
            match answer.parse::<f64>() {
                Ok(v) if v.is_finite() => return Ok(v),
                _ => writeln!(self.out, "Please enter a number")?,
            }
        }
    }
}

fn command(axis: Axis, target: f64, speed_deg_s: f64) -> MotionCommand {
    MotionCommand {
        axis,
        target_position_deg: target,
        feedrate_deg_per_min: speed_deg_s * 60.0,
    }
}
