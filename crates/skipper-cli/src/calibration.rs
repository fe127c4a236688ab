//! Limits & calibration store – reads/writes `~/.skipper/calibration.toml`.
//!
//! ```toml
//! [pan]
//! position_min_deg = -13.0
//! position_max_deg = 13.0
//! max_speed_deg_s = 30.0
//! homing_speed_deg_s = 10.0
//!
//! [tilt]
//! position_min_deg = -4.0
//! position_max_deg = 4.0
//! max_speed_deg_s = 3.0
//! homing_speed_deg_s = 2.0
//! homing = { mode = "set_zero" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use skipper_types::{Axis, AxisCalibration, AxisLimits, ConfigError, HomingMode, PerAxis};

use crate::config::{skipper_dir, write_private};

#[derive(Serialize, Deserialize)]
struct CalibrationFile {
    pan: AxisCalibration,
    tilt: AxisCalibration,
}

/// Conservative envelope used until the head has been calibrated.
pub fn defaults() -> PerAxis<AxisCalibration> {
    PerAxis::new(
        AxisCalibration {
            limits: AxisLimits {
                position_min_deg: -13.0,
                position_max_deg: 13.0,
                max_speed_deg_s: 30.0,
                homing_speed_deg_s: 10.0,
            },
            homing: HomingMode::SetZero,
        },
        AxisCalibration {
            limits: AxisLimits {
                position_min_deg: -4.0,
                position_max_deg: 4.0,
                max_speed_deg_s: 3.0,
                homing_speed_deg_s: 2.0,
            },
            homing: HomingMode::SetZero,
        },
    )
}

pub fn calibration_path() -> PathBuf {
    skipper_dir().join("calibration.toml")
}

/// Validate both axes.
pub fn validate(calibration: &PerAxis<AxisCalibration>) -> Result<(), ConfigError> {
    for axis in Axis::ALL {
        calibration[axis].validate(axis)?;
    }
    Ok(())
}

pub fn load() -> Result<PerAxis<AxisCalibration>, ConfigError> {
    load_from(&calibration_path())
}

/// Load and validate the store at `path`, or the defaults if it is absent.
pub(crate) fn load_from(path: &Path) -> Result<PerAxis<AxisCalibration>, ConfigError> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no calibration found; using conservative defaults");
        return Ok(defaults());
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let file: CalibrationFile = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    let calibration = PerAxis::new(file.pan, file.tilt);
    validate(&calibration)?;
    Ok(calibration)
}

/// Validate, then write. Invalid data never reaches the disk.
pub(crate) fn save_to(
    calibration: &PerAxis<AxisCalibration>,
    path: &Path,
) -> Result<(), ConfigError> {
    validate(calibration)?;
    let file = CalibrationFile {
        pan: calibration.pan,
        tilt: calibration.tilt,
    };
    let raw = toml::to_string_pretty(&file).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    write_private(path, &raw)
}
