//! Per-axis rate controller.
//!
//! An [`AxisController`] turns a stream of pixel errors into bounded
//! positional moves. It never talks to hardware: the caller supplies the
//! error and the current time, and receives an [`AxisDecision`] it can hand
//! to a [`MotionBridge`][skipper_hal::MotionBridge].
//!
//! Each step with a valid error:
//!
//! 1. errors inside the deadband reset the smoothed rate to zero and hold;
//! 2. otherwise the raw step rate `gain · |error|` is clamped to
//!    `[min_rate_hz, max_rate_hz]` and blended into the smoothed rate with
//!    weight `smoothing` on the previous value;
//! 3. the commanded position advances by `rate / rate_scale · dt` degrees in
//!    the direction of the error and is clamped to the axis limits.
//!
//! A step without a valid error holds position. Once nothing valid has
//! arrived for `idle_timeout_s`, an enabled axis asks to be powered down,
//! exactly once.
//!
//! # Example
//!
//! ```rust
//! use skipper_runtime::axis_controller::{AxisController, AxisDecision, ControllerTuning};
//! use skipper_types::{Axis, AxisLimits};
//!
//! let limits = AxisLimits {
//!     position_min_deg: -180.0,
//!     position_max_deg: 180.0,
//!     max_speed_deg_s: 30.0,
//!     homing_speed_deg_s: 5.0,
//! };
//! let mut pan = AxisController::new(Axis::Pan, ControllerTuning::default(), limits, false);
//! pan.set_enabled(true);
//!
//! match pan.step(Some(50), 0.033) {
//!     AxisDecision::Move(cmd) => assert!(cmd.target_position_deg > 0.0),
//!     other => panic!("expected a move, got {other:?}"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use skipper_types::{Axis, AxisLimits, ConfigError, DetectionEvent, Direction, MotionCommand};

// ─────────────────────────────────────────────────────────────────────────────
// Tuning
// ─────────────────────────────────────────────────────────────────────────────

/// Gains and thresholds shared by both axis controllers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerTuning {
    /// Errors with `|error| < deadband_px` are treated as centred.
    pub deadband_px: u32,
    /// Step-rate gain in Hz per pixel of error.
    pub gain: f64,
    pub min_rate_hz: f64,
    pub max_rate_hz: f64,
    /// Weight of the previous rate in the exponential blend, in `[0, 1)`.
    pub smoothing: f64,
    /// Step rate (Hz) that corresponds to one degree per second of travel.
    pub rate_scale: f64,
    /// Seconds without a valid detection before an axis powers down.
    pub idle_timeout_s: f64,
    /// Detections covering less of the frame than this are ignored.
    pub min_target_area: f64,
    /// Upper bound on the time step, so a long gap cannot produce a jump.
    pub max_dt_s: f64,
}

impl Default for ControllerTuning {
    fn default() -> Self {
        Self {
            deadband_px: 16,
            gain: 3.0,
            min_rate_hz: 40.0,
            max_rate_hz: 1200.0,
            smoothing: 0.35,
            rate_scale: 40.0,
            idle_timeout_s: 2.0,
            min_target_area: 0.01,
            max_dt_s: 0.1,
        }
    }
}

impl ControllerTuning {
    /// # Errors
    ///
    /// [`ConfigError::InvalidTuning`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidTuning(msg));
        let finite = [
            ("gain", self.gain),
            ("min_rate_hz", self.min_rate_hz),
            ("max_rate_hz", self.max_rate_hz),
            ("smoothing", self.smoothing),
            ("rate_scale", self.rate_scale),
            ("idle_timeout_s", self.idle_timeout_s),
            ("min_target_area", self.min_target_area),
            ("max_dt_s", self.max_dt_s),
        ];
        if let Some((name, _)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return invalid(format!("{name} must be a finite number"));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return invalid(format!("smoothing {} must be in [0, 1)", self.smoothing));
        }
        if self.min_rate_hz <= 0.0 || self.min_rate_hz > self.max_rate_hz {
            return invalid(format!(
                "rate bounds must satisfy 0 < min_rate_hz ({}) <= max_rate_hz ({})",
                self.min_rate_hz, self.max_rate_hz
            ));
        }
        if self.gain <= 0.0 {
            return invalid(format!("gain {} must be positive", self.gain));
        }
        if self.rate_scale <= 0.0 {
            return invalid(format!("rate_scale {} must be positive", self.rate_scale));
        }
        if self.idle_timeout_s <= 0.0 {
            return invalid(format!(
                "idle_timeout_s {} must be positive",
                self.idle_timeout_s
            ));
        }
        if self.max_dt_s <= 0.0 {
            return invalid(format!("max_dt_s {} must be positive", self.max_dt_s));
        }
        if !(0.0..=1.0).contains(&self.min_target_area) {
            return invalid(format!(
                "min_target_area {} must be in [0, 1]",
                self.min_target_area
            ));
        }
        Ok(())
    }

    /// Raw step rate for `error_px`, before smoothing.
    pub fn raw_rate(&self, error_px: i32) -> f64 {
        (self.gain * f64::from(error_px.unsigned_abs())).clamp(self.min_rate_hz, self.max_rate_hz)
    }

    /// Whether `event` is large enough to count as a detection.
    pub fn accepts(&self, event: &DetectionEvent) -> bool {
        event.target_area_fraction >= self.min_target_area
    }

    fn in_deadband(&self, error_px: i32) -> bool {
        error_px.unsigned_abs() < self.deadband_px
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State & decisions
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime state of one axis. Owned exclusively by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisState {
    pub commanded_position_deg: f64,
    pub smoothed_rate_hz: f64,
    pub direction: Direction,
    /// Time of the last step that carried a valid error.
    pub last_update_time: f64,
    pub enabled: bool,
    /// Start of the current stretch without valid detections.
    pub idle_since: Option<f64>,
}

/// What the caller should do with the axis after a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisDecision {
    Hold,
    Move(MotionCommand),
    /// Power the driver down; the target has been gone too long.
    Disable,
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AxisController {
    axis: Axis,
    tuning: ControllerTuning,
    limits: AxisLimits,
    inverted: bool,
    state: AxisState,
    fault: Option<String>,
}

impl AxisController {
    /// Create a controller resting at the park position, disabled.
    pub fn new(axis: Axis, tuning: ControllerTuning, limits: AxisLimits, inverted: bool) -> Self {
        Self {
            axis,
            tuning,
            limits,
            inverted,
            state: AxisState {
                commanded_position_deg: limits.park_position(),
                smoothed_rate_hz: 0.0,
                direction: Direction::None,
                last_update_time: 0.0,
                enabled: false,
                idle_since: None,
            },
            fault: None,
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn state(&self) -> &AxisState {
        &self.state
    }

    pub fn limits(&self) -> &AxisLimits {
        &self.limits
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn fault_reason(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Record that the driver was powered on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
    }

    /// Stop emitting commands until [`reset`][Self::reset].
    pub fn fault(&mut self, reason: impl Into<String>) {
        self.fault = Some(reason.into());
        self.state.smoothed_rate_hz = 0.0;
        self.state.direction = Direction::None;
        self.state.enabled = false;
    }

    /// Clear any fault and forget the rate history. Position is kept.
    pub fn reset(&mut self) {
        self.fault = None;
        self.state.smoothed_rate_hz = 0.0;
        self.state.direction = Direction::None;
        self.state.idle_since = None;
    }

    /// Advance the controller by one tick.
    ///
    /// `error_px` is `None` when there is no fresh valid detection. `now` is
    /// in seconds on a monotonic clock shared by both axes.
    pub fn step(&mut self, error_px: Option<i32>, now: f64) -> AxisDecision {
        if self.fault.is_some() {
            return AxisDecision::Hold;
        }
        match error_px {
            None => self.step_without_target(now),
            Some(error) => self.step_with_error(error, now),
        }
    }

    /// Move to the park position at homing speed, if not already there.
    pub fn park(&mut self) -> Option<MotionCommand> {
        let target = self.limits.park_position();
        self.state.smoothed_rate_hz = 0.0;
        self.state.direction = Direction::None;
        if self.fault.is_some() || self.state.commanded_position_deg == target {
            return None;
        }
        self.state.commanded_position_deg = target;
        Some(MotionCommand {
            axis: self.axis,
            target_position_deg: target,
            feedrate_deg_per_min: self.limits.homing_speed_deg_s * 60.0,
        })
    }

    fn step_without_target(&mut self, now: f64) -> AxisDecision {
        let since = *self
            .state
            .idle_since
            .get_or_insert(self.state.last_update_time);
        if self.state.enabled && now - since >= self.tuning.idle_timeout_s {
            self.state.enabled = false;
            self.state.smoothed_rate_hz = 0.0;
            self.state.direction = Direction::None;
            return AxisDecision::Disable;
        }
        AxisDecision::Hold
    }

    fn step_with_error(&mut self, error: i32, now: f64) -> AxisDecision {
        let dt = (now - self.state.last_update_time).clamp(0.0, self.tuning.max_dt_s);
        self.state.last_update_time = now;
        self.state.idle_since = None;

        if self.tuning.in_deadband(error) {
            self.state.smoothed_rate_hz = 0.0;
            self.state.direction = Direction::None;
            return AxisDecision::Hold;
        }

        let raw = self.tuning.raw_rate(error);
        let s = self.tuning.smoothing;
        let rate = s * self.state.smoothed_rate_hz + (1.0 - s) * raw;
        self.state.smoothed_rate_hz = rate;

        let direction = Direction::from_error(error);
        self.state.direction = if self.inverted {
            direction.reversed()
        } else {
            direction
        };

        let speed_deg_s = rate / self.tuning.rate_scale;
        let previous = self.state.commanded_position_deg;
        let target = self
            .limits
            .clamp(previous + self.state.direction.sign() * speed_deg_s * dt);
        if target == previous {
            // Pinned at a limit, or no time has passed.
            return AxisDecision::Hold;
        }
        self.state.commanded_position_deg = target;

        AxisDecision::Move(MotionCommand {
            axis: self.axis,
            target_position_deg: target,
            feedrate_deg_per_min: speed_deg_s * 60.0,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
