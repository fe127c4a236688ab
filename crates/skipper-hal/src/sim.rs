//! In-process simulated motion bridge for tests and dry runs.
//!
//! [`SimBridge`] implements [`MotionBridge`] without any hardware or network.
//! It records every call in order, tracks per-axis position and power state,
//! and can be scripted to fail specific moves so that fault handling can be
//! exercised deterministically.
//!
//! # Example
//!
//! ```rust
//! use skipper_hal::{MotionBridge, SimBridge};
//! use skipper_types::{Axis, AxisLimits, MotionCommand, PerAxis};
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let limits = AxisLimits {
//!         position_min_deg: -10.0,
//!         position_max_deg: 10.0,
//!         max_speed_deg_s: 30.0,
//!         homing_speed_deg_s: 5.0,
//!     };
//!     let sim = SimBridge::with_limits(PerAxis::new(limits, limits));
//!     sim.connect().await.unwrap();
//!     sim.home(Axis::Pan).await.unwrap();
//!     sim.move_to(MotionCommand {
//!         axis: Axis::Pan,
//!         target_position_deg: 25.0,
//!         feedrate_deg_per_min: 600.0,
//!     })
//!     .await
//!     .unwrap();
//!     assert_eq!(sim.position(Axis::Pan), 10.0);
//! });
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use skipper_types::{
    Axis, AxisCalibration, AxisLimits, ConnectionError, ControllerSession, HomingMode,
    MotionCommand, MotionError, PerAxis, Readiness,
};
use tracing::debug;

use crate::bridge::MotionBridge;
use crate::session::SessionCell;

/// One call observed by the [`SimBridge`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCall {
    Connect,
    Home(Axis),
    Enable(Axis, bool),
    /// The move as transmitted, i.e. after clamping.
    Move(MotionCommand),
    EmergencyStop,
}

#[derive(Debug, Default)]
struct SimState {
    calls: Vec<BridgeCall>,
    positions: PerAxis<f64>,
    enabled: PerAxis<bool>,
    scripted_failures: PerAxis<VecDeque<MotionError>>,
    firmware_starting: bool,
}

/// A simulated pan/tilt head. Always succeeds unless told otherwise.
pub struct SimBridge {
    calibration: PerAxis<AxisCalibration>,
    session: SessionCell,
    move_latency: Option<Duration>,
    state: Mutex<SimState>,
}

impl SimBridge {
    pub fn new(calibration: PerAxis<AxisCalibration>) -> Self {
        Self {
            calibration,
            session: SessionCell::new(),
            move_latency: None,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Simulated head with `set_zero` homing on both axes.
    pub fn with_limits(limits: PerAxis<AxisLimits>) -> Self {
        Self::new(limits.map(|_, limits| AxisCalibration {
            limits,
            homing: HomingMode::SetZero,
        }))
    }

    /// Make every move take `latency` before it is acknowledged.
    pub fn with_move_latency(mut self, latency: Duration) -> Self {
        self.move_latency = Some(latency);
        self
    }

    /// Report the firmware as still starting up on `connect`.
    pub fn set_firmware_starting(&self, starting: bool) {
        self.lock().firmware_starting = starting;
    }

    /// Fail the next move on `axis` with `error`. Failures queue up.
    pub fn fail_next_move(&self, axis: Axis, error: MotionError) {
        self.lock().scripted_failures[axis].push_back(error);
    }

    /// Every call observed so far.
    pub fn calls(&self) -> Vec<BridgeCall> {
        self.lock().calls.clone()
    }

    /// Moves transmitted for `axis`, in order.
    pub fn moves(&self, axis: Axis) -> Vec<MotionCommand> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BridgeCall::Move(m) if m.axis == axis => Some(*m),
                _ => None,
            })
            .collect()
    }

    /// Last acknowledged position of `axis`.
    pub fn position(&self, axis: Axis) -> f64 {
        self.lock().positions[axis]
    }

    pub fn is_enabled(&self, axis: Axis) -> bool {
        self.lock().enabled[axis]
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A poisoned lock only means a test panicked mid-call; the state is
        // still usable for inspection.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn require_homed(&self, axis: Axis) -> Result<(), MotionError> {
        let session = self.session.snapshot();
        if !session.connected {
            return Err(MotionError::NotConnected);
        }
        if !session.homed[axis] {
            return Err(MotionError::NotHomed(axis));
        }
        Ok(())
    }
}

#[async_trait]
impl MotionBridge for SimBridge {
    async fn connect(&self) -> Result<Readiness, ConnectionError> {
        let starting = {
            let mut state = self.lock();
            state.calls.push(BridgeCall::Connect);
            state.firmware_starting
        };
        if starting {
            return Err(ConnectionError::NotReady {
                attempts: 1,
                state: "startup".to_string(),
            });
        }
        self.session.set_connected(true);
        Ok(Readiness::Ready)
    }

    async fn home(&self, axis: Axis) -> Result<(), MotionError> {
        if !self.session.snapshot().connected {
            return Err(MotionError::NotConnected);
        }
        {
            let mut state = self.lock();
            state.calls.push(BridgeCall::Home(axis));
            state.positions[axis] = match self.calibration[axis].homing {
                HomingMode::SetZero => 0.0,
                HomingMode::Endstop { .. } => self.calibration[axis].limits.park_position(),
            };
            state.enabled[axis] = true;
        }
        self.session.set_homed(axis, true);
        Ok(())
    }

    async fn enable(&self, axis: Axis, on: bool) -> Result<(), MotionError> {
        if on {
            self.require_homed(axis)?;
        }
        let mut state = self.lock();
        state.calls.push(BridgeCall::Enable(axis, on));
        state.enabled[axis] = on;
        Ok(())
    }

    async fn move_to(&self, command: MotionCommand) -> Result<(), MotionError> {
        let axis = command.axis;
        self.require_homed(axis)?;
        let command = self.calibration[axis].limits.clamp_command(command);
        if command.feedrate_deg_per_min <= 0.0 {
            return Err(MotionError::Transient(format!("{axis} move has no feedrate")));
        }

        if let Some(latency) = self.move_latency {
            tokio::time::sleep(latency).await;
        }

        let failure = {
            let mut state = self.lock();
            state.calls.push(BridgeCall::Move(command));
            let failure = state.scripted_failures[axis].pop_front();
            if failure.is_none() {
                state.positions[axis] = command.target_position_deg;
            }
            failure
        };

        match failure {
            Some(err) => {
                if err.is_fatal() {
                    self.session.record_error(&err);
                }
                Err(err)
            }
            None => {
                debug!(%axis, target = command.target_position_deg, "sim move");
                Ok(())
            }
        }
    }

    fn emergency_stop(&self) {
        {
            let mut state = self.lock();
            state.calls.push(BridgeCall::EmergencyStop);
            state.enabled = PerAxis::new(false, false);
        }
        self.session.record_error("emergency stop");
        self.session.set_connected(false);
    }

    fn session(&self) -> ControllerSession {
        self.session.snapshot()
    }

    fn limits(&self, axis: Axis) -> AxisLimits {
        self.calibration[axis].limits
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> PerAxis<AxisLimits> {
        let l = AxisLimits {
            position_min_deg: -180.0,
            position_max_deg: 180.0,
            max_speed_deg_s: 30.0,
            homing_speed_deg_s: 5.0,
        };
        PerAxis::new(l, l)
    }

    fn cmd(axis: Axis, target: f64) -> MotionCommand {
        MotionCommand {
            axis,
            target_position_deg: target,
            feedrate_deg_per_min: 600.0,
        }
    }

    #[tokio::test]
    async fn full_sequence_records_calls_in_order() {
        let sim = SimBridge::with_limits(limits());
        sim.connect().await.unwrap();
        sim.home(Axis::Pan).await.unwrap();
        sim.enable(Axis::Pan, true).await.unwrap();
        sim.move_to(cmd(Axis::Pan, 12.0)).await.unwrap();

        assert_eq!(
            sim.calls(),
            vec![
                BridgeCall::Connect,
                BridgeCall::Home(Axis::Pan),
                BridgeCall::Enable(Axis::Pan, true),
                BridgeCall::Move(cmd(Axis::Pan, 12.0)),
            ]
        );
        assert_eq!(sim.position(Axis::Pan), 12.0);
    }

    #[tokio::test]
    async fn moves_before_homing_are_rejected() {
        let sim = SimBridge::with_limits(limits());
        assert_eq!(sim.move_to(cmd(Axis::Tilt, 1.0)).await, Err(MotionError::NotConnected));
        sim.connect().await.unwrap();
        assert_eq!(
            sim.move_to(cmd(Axis::Tilt, 1.0)).await,
            Err(MotionError::NotHomed(Axis::Tilt))
        );
        assert_eq!(
            sim.enable(Axis::Tilt, true).await,
            Err(MotionError::NotHomed(Axis::Tilt))
        );
        assert!(sim.enable(Axis::Tilt, false).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_failure_leaves_position_untouched() {
        let sim = SimBridge::with_limits(limits());
        sim.connect().await.unwrap();
        sim.home(Axis::Pan).await.unwrap();
        sim.fail_next_move(Axis::Pan, MotionError::Fatal("stall".into()));

        let result = sim.move_to(cmd(Axis::Pan, 5.0)).await;
        assert!(matches!(result, Err(MotionError::Fatal(_))));
        assert_eq!(sim.position(Axis::Pan), 0.0);
        assert!(sim.session().last_error.is_some());

        sim.move_to(cmd(Axis::Pan, 5.0)).await.unwrap();
        assert_eq!(sim.position(Axis::Pan), 5.0);
    }

    #[tokio::test]
    async fn zero_feedrate_is_refused_and_position_kept() {
        let sim = SimBridge::with_limits(limits());
        sim.connect().await.unwrap();
        sim.home(Axis::Pan).await.unwrap();
        let stalled = MotionCommand {
            feedrate_deg_per_min: 0.0,
            ..cmd(Axis::Pan, 5.0)
        };
        assert!(sim.move_to(stalled).await.unwrap_err().is_transient());
        assert_eq!(sim.position(Axis::Pan), 0.0);
        assert!(sim.moves(Axis::Pan).is_empty());
    }

    #[tokio::test]
    async fn emergency_stop_disables_everything() {
        let sim = SimBridge::with_limits(limits());
        sim.connect().await.unwrap();
        sim.home(Axis::Pan).await.unwrap();
        sim.home(Axis::Tilt).await.unwrap();
        sim.emergency_stop();

        assert!(!sim.is_enabled(Axis::Pan));
        assert!(!sim.is_enabled(Axis::Tilt));
        assert!(!sim.session().connected);
        assert_eq!(sim.calls().last(), Some(&BridgeCall::EmergencyStop));
    }

    #[tokio::test]
    async fn starting_firmware_is_not_ready() {
        let sim = SimBridge::with_limits(limits());
        sim.set_firmware_starting(true);
        assert!(matches!(
            sim.connect().await,
            Err(ConnectionError::NotReady { .. })
        ));
        sim.set_firmware_starting(false);
        assert_eq!(sim.connect().await.unwrap(), Readiness::Ready);
    }
}
