//! The `MotionBridge` trait: the only way Skipper moves hardware.
//!
//! Implementations own the network channel to the firmware and the
//! [`ControllerSession`]. The control loop only ever talks to the trait, so
//! the real firmware client and the simulator are interchangeable.

use async_trait::async_trait;
use skipper_types::{
    Axis, AxisLimits, ConnectionError, ControllerSession, MotionCommand, MotionError, Readiness,
};

/// Client for an external motion-control service driving a pan/tilt head.
///
/// # Contract
///
/// * Calls for the same axis are never issued concurrently by the caller, so
///   implementations may assume per-axis ordering.
/// * `move_to` clamps the target to the axis limits and the feedrate to the
///   axis maximum **before** transmission, regardless of what the caller
///   already did.
/// * A failed move is never retried by the bridge: the caller computes a
///   fresh target on its next tick instead.
#[async_trait]
pub trait MotionBridge: Send + Sync {
    /// Poll the firmware until it reports an operational state.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the firmware stays unreachable or not
    /// ready for the configured number of attempts, or immediately when it
    /// reports a fault state.
    async fn connect(&self) -> Result<Readiness, ConnectionError>;

    /// Run the homing sequence of `axis` and wait for confirmation.
    ///
    /// # Errors
    ///
    /// [`MotionError::Timeout`] when the firmware does not confirm in time,
    /// [`MotionError::NotConnected`] before a successful
    /// [`connect`][Self::connect].
    async fn home(&self, axis: Axis) -> Result<(), MotionError>;

    /// Power the driver of `axis` on or off.
    ///
    /// Disabling never fails with [`MotionError::NotHomed`]; enabling an axis
    /// that has not been homed does.
    async fn enable(&self, axis: Axis, on: bool) -> Result<(), MotionError>;

    /// Send one bounded positional move.
    async fn move_to(&self, command: MotionCommand) -> Result<(), MotionError>;

    /// Halt and disable every axis. Fire-and-forget: never blocks, never fails.
    fn emergency_stop(&self);

    /// Snapshot of the current session state.
    fn session(&self) -> ControllerSession;

    /// The limits this bridge enforces for `axis`.
    fn limits(&self, axis: Axis) -> AxisLimits;
}
