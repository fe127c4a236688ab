//! `skipper-types` – shared data model for the Skipper pan/tilt tracker.
//!
//! Every crate in the workspace speaks in these types: the vision
//! collaborator produces [`DetectionEvent`]s, the axis controllers emit
//! [`MotionCommand`]s, the motion bridge enforces [`AxisLimits`], and all
//! failures are expressed through the error enums at the bottom of this file.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Axes
// ─────────────────────────────────────────────────────────────────────────────

/// One rotational degree of freedom of the pan/tilt head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Left/right rotation (azimuth).
    Pan,
    /// Up/down rotation (altitude).
    Tilt,
}

impl Axis {
    /// Both axes, in dispatch order.
    pub const ALL: [Axis; 2] = [Axis::Pan, Axis::Tilt];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Pan => write!(f, "pan"),
            Axis::Tilt => write!(f, "tilt"),
        }
    }
}

/// A value held once per axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerAxis<T> {
    pub pan: T,
    pub tilt: T,
}

impl<T> PerAxis<T> {
    pub fn new(pan: T, tilt: T) -> Self {
        Self { pan, tilt }
    }

    /// Apply `f` to both entries, keeping the axis association.
    pub fn map<U>(self, mut f: impl FnMut(Axis, T) -> U) -> PerAxis<U> {
        PerAxis {
            pan: f(Axis::Pan, self.pan),
            tilt: f(Axis::Tilt, self.tilt),
        }
    }
}

impl<T> Index<Axis> for PerAxis<T> {
    type Output = T;

    fn index(&self, axis: Axis) -> &T {
        match axis {
            Axis::Pan => &self.pan,
            Axis::Tilt => &self.tilt,
        }
    }
}

impl<T> IndexMut<Axis> for PerAxis<T> {
    fn index_mut(&mut self, axis: Axis) -> &mut T {
        match axis {
            Axis::Pan => &mut self.pan,
            Axis::Tilt => &mut self.tilt,
        }
    }
}

/// Direction of travel commanded on an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Positive,
    Negative,
    #[default]
    None,
}

impl Direction {
    /// Direction implied by the sign of a pixel error.
    pub fn from_error(error_px: i32) -> Self {
        match error_px.signum() {
            1 => Direction::Positive,
            -1 => Direction::Negative,
            _ => Direction::None,
        }
    }

    /// `+1.0`, `-1.0` or `0.0`.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
            Direction::None => 0.0,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
            Direction::None => Direction::None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vision input
// ─────────────────────────────────────────────────────────────────────────────

/// One detection produced by the vision pipeline.
///
/// `dx_px` / `dy_px` are signed offsets of the target from the frame centre.
/// `target_area_fraction` is the share of the frame covered by the target
/// (`0.0..=1.0`). `timestamp` is seconds on the producer's clock and is only
/// used to order events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub dx_px: i32,
    pub dy_px: i32,
    pub target_area_fraction: f64,
    pub timestamp: f64,
}

impl DetectionEvent {
    /// Pixel error along `axis`: `dx` drives pan, `dy` drives tilt.
    pub fn error_px(&self, axis: Axis) -> i32 {
        match axis {
            Axis::Pan => self.dx_px,
            Axis::Tilt => self.dy_px,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Limits & calibration
// ─────────────────────────────────────────────────────────────────────────────

/// Travel and speed envelope of one axis, produced by calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub position_min_deg: f64,
    pub position_max_deg: f64,
    pub max_speed_deg_s: f64,
    pub homing_speed_deg_s: f64,
}

impl AxisLimits {
    /// Check the invariants of a calibrated envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidLimits`] when the range is empty or
    /// inverted, or when a speed is not strictly positive.
    pub fn validate(&self, axis: Axis) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidLimits { axis, reason };
        let values = [
            self.position_min_deg,
            self.position_max_deg,
            self.max_speed_deg_s,
            self.homing_speed_deg_s,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(invalid("all limits must be finite numbers".into()));
        }
        if self.position_min_deg >= self.position_max_deg {
            return Err(invalid(format!(
                "position_min_deg {} must be below position_max_deg {}",
                self.position_min_deg, self.position_max_deg
            )));
        }
        if self.max_speed_deg_s <= 0.0 {
            return Err(invalid(format!(
                "max_speed_deg_s {} must be positive",
                self.max_speed_deg_s
            )));
        }
        if self.homing_speed_deg_s <= 0.0 {
            return Err(invalid(format!(
                "homing_speed_deg_s {} must be positive",
                self.homing_speed_deg_s
            )));
        }
        Ok(())
    }

    /// Clamp `deg` into `[position_min_deg, position_max_deg]`.
    ///
    /// Values already in range are returned unchanged.
    pub fn clamp(&self, deg: f64) -> f64 {
        deg.max(self.position_min_deg).min(self.position_max_deg)
    }

    /// Highest feedrate the axis accepts, in degrees per minute.
    pub fn max_feedrate_deg_per_min(&self) -> f64 {
        self.max_speed_deg_s * 60.0
    }

    /// Clamp both the target position and the feedrate of `command`.
    pub fn clamp_command(&self, command: MotionCommand) -> MotionCommand {
        MotionCommand {
            target_position_deg: self.clamp(command.target_position_deg),
            feedrate_deg_per_min: command
                .feedrate_deg_per_min
                .max(0.0)
                .min(self.max_feedrate_deg_per_min()),
            ..command
        }
    }

    /// Position the axis rests at after homing: zero, pulled into range.
    pub fn park_position(&self) -> f64 {
        self.clamp(0.0)
    }
}

/// How the firmware establishes the reference position of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HomingMode {
    /// No endstop: declare the current physical position to be zero.
    #[default]
    SetZero,
    /// Drive toward a limit switch, then declare its known position.
    Endstop {
        endstop_position_deg: f64,
        toward_max: bool,
    },
}

/// Complete persisted calibration of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisCalibration {
    #[serde(flatten)]
    pub limits: AxisLimits,
    #[serde(default)]
    pub homing: HomingMode,
}

impl AxisCalibration {
    /// Validate the limits. A `set_zero` axis must also have zero in range,
    /// since that is where homing leaves it.
    pub fn validate(&self, axis: Axis) -> Result<(), ConfigError> {
        self.limits.validate(axis)?;
        if self.homing == HomingMode::SetZero && self.limits.park_position() != 0.0 {
            return Err(ConfigError::InvalidLimits {
                axis,
                reason: format!(
                    "set_zero homing needs 0 deg inside [{}, {}]",
                    self.limits.position_min_deg, self.limits.position_max_deg
                ),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands & session
// ─────────────────────────────────────────────────────────────────────────────

/// One positional move handed to the motion bridge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    pub axis: Axis,
    pub target_position_deg: f64,
    pub feedrate_deg_per_min: f64,
}

/// Firmware readiness as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Reachable but not yet operational (e.g. still starting up).
    NotReady(String),
}

/// Process-wide connection state, written only by the motion bridge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerSession {
    pub connected: bool,
    pub homed: PerAxis<bool>,
    pub last_error: Option<String>,
}

impl ControllerSession {
    /// `true` once every axis has been homed.
    pub fn fully_homed(&self) -> bool {
        self.homed.pan && self.homed.tilt
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// The firmware could not be brought to a ready state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("firmware unreachable after {attempts} attempt(s): {details}")]
    Unreachable { attempts: u32, details: String },

    #[error("firmware not ready after {attempts} attempt(s): state '{state}'")]
    NotReady { attempts: u32, state: String },

    #[error("firmware reports state '{state}': {message}")]
    Firmware { state: String, message: String },
}

/// A motion request failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    #[error("{0} axis has not been homed")]
    NotHomed(Axis),

    #[error("motion bridge is not connected")]
    NotConnected,

    /// A single request failed; the next tick may proceed.
    #[error("transient motion failure: {0}")]
    Transient(String),

    /// The firmware reports an unrecoverable condition.
    #[error("fatal motion failure: {0}")]
    Fatal(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl MotionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, MotionError::Fatal(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, MotionError::Transient(_) | MotionError::Timeout(_))
    }
}

/// Invalid configuration or calibration data. Only ever raised at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {axis} limits: {reason}")]
    InvalidLimits { axis: Axis, reason: String },

    #[error("invalid tracking tuning: {0}")]
    InvalidTuning(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {details}")]
    Parse { path: String, details: String },

    #[error("failed to serialize: {0}")]
    Serialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(min: f64, max: f64) -> AxisLimits {
        AxisLimits {
            position_min_deg: min,
            position_max_deg: max,
            max_speed_deg_s: 30.0,
            homing_speed_deg_s: 5.0,
        }
    }

    #[test]
    fn clamp_is_idempotent_in_range() {
        let l = limits(-180.0, 180.0);
        assert_eq!(l.clamp(12.5), 12.5);
        assert_eq!(l.clamp(l.clamp(400.0)), 180.0);
        assert_eq!(l.clamp(-400.0), -180.0);
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let err = limits(10.0, -10.0).validate(Axis::Tilt).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLimits { axis: Axis::Tilt, .. }));
        assert!(limits(5.0, 5.0).validate(Axis::Pan).is_err());
        assert!(limits(-5.0, 5.0).validate(Axis::Pan).is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_speed_and_nan() {
        let mut l = limits(-5.0, 5.0);
        l.max_speed_deg_s = 0.0;
        assert!(l.validate(Axis::Pan).is_err());

        let mut l = limits(-5.0, 5.0);
        l.position_max_deg = f64::NAN;
        assert!(l.validate(Axis::Pan).is_err());
    }

    #[test]
    fn clamp_command_bounds_position_and_feedrate() {
        let l = limits(-13.0, 13.0);
        let cmd = MotionCommand {
            axis: Axis::Pan,
            target_position_deg: 40.0,
            feedrate_deg_per_min: 10_000.0,
        };
        let clamped = l.clamp_command(cmd);
        assert_eq!(clamped.axis, Axis::Pan);
        assert_eq!(clamped.target_position_deg, 13.0);
        assert_eq!(clamped.feedrate_deg_per_min, 30.0 * 60.0);
    }

    #[test]
    fn park_position_pulls_zero_into_range() {
        assert_eq!(limits(-4.0, 4.0).park_position(), 0.0);
        assert_eq!(limits(2.0, 8.0).park_position(), 2.0);
    }

    #[test]
    fn direction_from_error_sign() {
        assert_eq!(Direction::from_error(50), Direction::Positive);
        assert_eq!(Direction::from_error(-3), Direction::Negative);
        assert_eq!(Direction::from_error(0), Direction::None);
        assert_eq!(Direction::Positive.reversed().sign(), -1.0);
    }

    #[test]
    fn per_axis_indexing() {
        let mut homed = PerAxis::new(false, false);
        homed[Axis::Tilt] = true;
        assert!(!homed[Axis::Pan]);
        assert!(homed.tilt);
        let labels = homed.map(|axis, h| format!("{axis}:{h}"));
        assert_eq!(labels.pan, "pan:false");
    }

    #[test]
    fn detection_event_from_json() {
        let json = r#"{"dx_px":-42,"dy_px":7,"target_area_fraction":0.08,"timestamp":12.5}"#;
        let ev: DetectionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.error_px(Axis::Pan), -42);
        assert_eq!(ev.error_px(Axis::Tilt), 7);
    }

    #[test]
    fn axis_calibration_flattens_limits_in_toml_shape() {
        let json = r#"{
            "position_min_deg": -13.0,
            "position_max_deg": 13.0,
            "max_speed_deg_s": 30.0,
            "homing_speed_deg_s": 5.0,
            "homing": { "mode": "endstop", "endstop_position_deg": -14.0, "toward_max": false }
        }"#;
        let cal: AxisCalibration = serde_json::from_str(json).unwrap();
        assert_eq!(cal.limits.position_max_deg, 13.0);
        assert!(matches!(cal.homing, HomingMode::Endstop { toward_max: false, .. }));
        // The switch sits past the soft limit; that is fine.
        assert!(cal.validate(Axis::Pan).is_ok());
    }

    #[test]
    fn set_zero_calibration_needs_zero_in_range() {
        let cal = AxisCalibration {
            limits: limits(2.0, 8.0),
            homing: HomingMode::SetZero,
        };
        assert!(cal.validate(Axis::Tilt).is_err());
    }

    #[test]
    fn motion_error_classification() {
        assert!(MotionError::Fatal("shutdown".into()).is_fatal());
        assert!(MotionError::Transient("reset".into()).is_transient());
        assert!(MotionError::Timeout(std::time::Duration::from_secs(1)).is_transient());
        assert!(!MotionError::NotHomed(Axis::Pan).is_fatal());
        assert!(MotionError::NotHomed(Axis::Pan).to_string().contains("pan"));
    }
}
