//! [`TrackingLoop`] – the supervisor that turns detections into motion.
//!
//! Each tick the loop:
//!
//! 1. **Observe** – takes the newest [`DetectionEvent`], if one arrived since
//!    the last tick, and drops it when the target is too small.
//! 2. **Decide** – steps the pan and tilt [`AxisController`]s with the pixel
//!    errors. Deciding is synchronous and touches no I/O.
//! 3. **Act** – dispatches both axes' decisions to the [`MotionBridge`]
//!    concurrently, so a slow tilt move never delays pan.
//! 4. **Supervise** – applies the results: a fatal error faults the loop and
//!    powers everything down; a transient one is logged and tracking goes on.
//!
//! # States
//!
//! ```text
//!            valid detection            idle timeout
//!   Idle ─────────────────────▶ Tracking ───────────▶ Idle
//!     ▲                            │
//!     │ reset()                    │ fatal motion error
//!     └──────── Faulted ◀──────────┘
//!
//!   any state ── stop signal ──▶ Stopped (emergency stop)
//! ```
//!
//! While `Idle` both axes are disabled. Homing leaves the drivers powered,
//! so the first `Idle` tick without a target switches them off. Entering
//! `Tracking` powers them on before the first move is sent.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skipper_hal::MotionBridge;
use skipper_types::{Axis, DetectionEvent, Direction, MotionError, PerAxis};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::axis_controller::{AxisController, AxisDecision, ControllerTuning};
use crate::ingest::DetectionReceiver;
use crate::stop::StopSignal;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`TrackingLoop`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub tuning: ControllerTuning,
    /// Longest the loop waits for a detection before ticking without one.
    pub tick_interval: Duration,
    /// Return both axes to their park position on a graceful shutdown.
    pub park_on_shutdown: bool,
    /// Axes whose positive pixel error maps to negative travel.
    pub inverted: PerAxis<bool>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tuning: ControllerTuning::default(),
            tick_interval: Duration::from_millis(100),
            park_on_shutdown: true,
            inverted: PerAxis::new(false, false),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Idle,
    Tracking,
    Faulted,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisStatus {
    pub position_deg: f64,
    pub rate_hz: f64,
    pub direction: Direction,
    pub enabled: bool,
    pub faulted: bool,
}

/// Snapshot published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerStatus {
    pub state: TrackerState,
    pub axes: PerAxis<AxisStatus>,
    pub last_error: Option<String>,
    pub last_event_timestamp: Option<f64>,
}

/// Result of dispatching one axis decision.
enum Dispatch {
    Nothing,
    Moved(Result<(), MotionError>),
    Disabled(Result<(), MotionError>),
}

// ─────────────────────────────────────────────────────────────────────────────
// TrackingLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct TrackingLoop {
    bridge: Arc<dyn MotionBridge>,
    config: LoopConfig,
    axes: PerAxis<AxisController>,
    state: TrackerState,
    last_error: Option<String>,
    last_event_timestamp: Option<f64>,
    status_tx: watch::Sender<TrackerStatus>,
}

impl TrackingLoop {
    /// Build a loop over `bridge`, taking the axis limits from it.
    ///
    /// The bridge is expected to be connected and homed already. Homing
    /// leaves the drivers powered, so both axes start out enabled and the
    /// first idle tick powers them down.
    pub fn new(bridge: Arc<dyn MotionBridge>, config: LoopConfig) -> Self {
        let axes = PerAxis::new(Axis::Pan, Axis::Tilt).map(|_, axis| {
            let mut controller = AxisController::new(
                axis,
                config.tuning,
                bridge.limits(axis),
                config.inverted[axis],
            );
            controller.set_enabled(true);
            controller
        });
        let (status_tx, _) = watch::channel(idle_status());
        let this = Self {
            bridge,
            config,
            axes,
            state: TrackerState::Idle,
            last_error: None,
            last_event_timestamp: None,
            status_tx,
        };
        this.publish();
        this
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn axis(&self, axis: Axis) -> &AxisController {
        &self.axes[axis]
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            state: self.state,
            axes: self.axes.clone().map(|_, c| AxisStatus {
                position_deg: c.state().commanded_position_deg,
                rate_hz: c.state().smoothed_rate_hz,
                direction: c.state().direction,
                enabled: c.state().enabled,
                faulted: c.is_faulted(),
            }),
            last_error: self.last_error.clone(),
            last_event_timestamp: self.last_event_timestamp,
        }
    }

    /// Change feed of [`TrackerStatus`], updated after every tick.
    pub fn subscribe_status(&self) -> watch::Receiver<TrackerStatus> {
        self.status_tx.subscribe()
    }

    /// Leave `Faulted` for `Idle`. Returns `false` in any other state.
    pub fn reset(&mut self) -> bool {
        if self.state != TrackerState::Faulted {
            return false;
        }
        for axis in Axis::ALL {
            self.axes[axis].reset();
        }
        self.state = TrackerState::Idle;
        self.last_error = None;
        info!("tracking fault cleared");
        self.publish();
        true
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Run one observe/decide/act cycle.
    ///
    /// `event` is the detection that arrived since the previous tick, if any.
    /// `now` is seconds on a monotonic clock.
    pub async fn tick(&mut self, event: Option<DetectionEvent>, now: f64) -> TrackerState {
        if matches!(self.state, TrackerState::Stopped | TrackerState::Faulted) {
            return self.state;
        }

        let valid = event.filter(|e| {
            let accepted = self.config.tuning.accepts(e);
            if !accepted {
                debug!(area = e.target_area_fraction, "target too small; ignoring");
            }
            accepted
        });
        if let Some(ev) = valid {
            self.last_event_timestamp = Some(ev.timestamp);
            if self.state == TrackerState::Idle {
                self.acquire().await;
            }
        } else if self.state == TrackerState::Idle && self.any_enabled() {
            info!("idle with drivers powered; disabling axes");
            self.disable_all().await;
        }

        let tracking = self.state == TrackerState::Tracking;
        let decisions = PerAxis::new(Axis::Pan, Axis::Tilt).map(|_, axis| {
            let error = valid.filter(|_| tracking).map(|e| e.error_px(axis));
            self.axes[axis].step(error, now)
        });

        let (pan, tilt) = tokio::join!(
            self.dispatch(Axis::Pan, decisions.pan),
            self.dispatch(Axis::Tilt, decisions.tilt),
        );
        self.apply(Axis::Pan, pan).await;
        self.apply(Axis::Tilt, tilt).await;

        if self.state == TrackerState::Tracking && !self.any_enabled() {
            self.state = TrackerState::Idle;
            info!("target lost; axes powered down");
        }

        self.publish();
        self.state
    }

    fn any_enabled(&self) -> bool {
        Axis::ALL.iter().any(|&a| self.axes[a].state().enabled)
    }

    /// Idle → Tracking: power both axes before the first move.
    async fn acquire(&mut self) {
        let bridge = &self.bridge;
        let (pan, tilt) = tokio::join!(
            bridge.enable(Axis::Pan, true),
            bridge.enable(Axis::Tilt, true),
        );
        let mut all_enabled = true;
        for (axis, result) in [(Axis::Pan, pan), (Axis::Tilt, tilt)] {
            match result {
                Ok(()) => self.axes[axis].set_enabled(true),
                Err(e) if is_fault(&e) => {
                    self.enter_fault(axis, e).await;
                    return;
                }
                Err(e) => {
                    warn!(%axis, error = %e, "enable failed; will retry on next detection");
                    self.last_error = Some(e.to_string());
                    all_enabled = false;
                }
            }
        }
        if all_enabled {
            self.state = TrackerState::Tracking;
            info!("target acquired; tracking");
        }
    }

    async fn dispatch(&self, axis: Axis, decision: AxisDecision) -> Dispatch {
        match decision {
            AxisDecision::Hold => Dispatch::Nothing,
            AxisDecision::Move(command) => {
                debug!(
                    %axis,
                    target = command.target_position_deg,
                    feedrate = command.feedrate_deg_per_min,
                    "move"
                );
                Dispatch::Moved(self.bridge.move_to(command).await)
            }
            AxisDecision::Disable => {
                info!(%axis, "idle timeout; disabling axis");
                Dispatch::Disabled(self.bridge.enable(axis, false).await)
            }
        }
    }

    async fn apply(&mut self, axis: Axis, outcome: Dispatch) {
        match outcome {
            Dispatch::Nothing | Dispatch::Moved(Ok(())) | Dispatch::Disabled(Ok(())) => {}
            Dispatch::Moved(Err(e)) if is_fault(&e) => self.enter_fault(axis, e).await,
            Dispatch::Moved(Err(e)) => {
                // The commanded position is kept: the next tick computes a
                // fresh target from it.
                warn!(%axis, error = %e, "move failed; continuing");
                self.last_error = Some(e.to_string());
            }
            Dispatch::Disabled(Err(e)) => {
                warn!(%axis, error = %e, "disable failed");
                self.last_error = Some(e.to_string());
            }
        }
    }

    /// Fault `axis`, halt tracking and power down every axis.
    async fn enter_fault(&mut self, axis: Axis, err: MotionError) {
        if self.state == TrackerState::Faulted {
            return;
        }
        error!(%axis, error = %err, "fatal motion error; tracking halted");
        self.axes[axis].fault(err.to_string());
        self.last_error = Some(format!("{axis}: {err}"));
        self.state = TrackerState::Faulted;
        self.disable_all().await;
    }

    async fn disable_all(&mut self) {
        let bridge = &self.bridge;
        let (pan, tilt) = tokio::join!(
            bridge.enable(Axis::Pan, false),
            bridge.enable(Axis::Tilt, false),
        );
        for (axis, result) in [(Axis::Pan, pan), (Axis::Tilt, tilt)] {
            if let Err(e) = result {
                warn!(%axis, error = %e, "failed to disable axis");
            }
            self.axes[axis].set_enabled(false);
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Halt everything immediately. Never blocks.
    pub fn emergency_stop(&mut self) {
        warn!("emergency stop");
        self.bridge.emergency_stop();
        for axis in Axis::ALL {
            self.axes[axis].set_enabled(false);
        }
        self.state = TrackerState::Stopped;
        self.publish();
    }

    /// Park (if configured and possible), power down, and stop.
    pub async fn shutdown(&mut self) {
        if self.state == TrackerState::Stopped {
            return;
        }
        let session = self.bridge.session();
        let can_park = self.config.park_on_shutdown
            && self.state != TrackerState::Faulted
            && session.connected
            && session.fully_homed();
        if can_park {
            let moves = PerAxis::new(Axis::Pan, Axis::Tilt).map(|_, axis| self.axes[axis].park());
            let needs_power = Axis::ALL
                .iter()
                .any(|&a| moves[a].is_some() && !self.axes[a].state().enabled);
            if needs_power {
                for axis in Axis::ALL {
                    if let Err(e) = self.bridge.enable(axis, true).await {
                        warn!(%axis, error = %e, "could not power axis for parking");
                    }
                }
            }
            let bridge = &self.bridge;
            let park = |command: Option<_>| async move {
                match command {
                    Some(command) => bridge.move_to(command).await,
                    None => Ok(()),
                }
            };
            let (pan, tilt) = tokio::join!(park(moves.pan), park(moves.tilt));
            for (axis, result) in [(Axis::Pan, pan), (Axis::Tilt, tilt)] {
                if let Err(e) = result {
                    warn!(%axis, error = %e, "park move failed");
                }
            }
        }
        self.disable_all().await;
        self.state = TrackerState::Stopped;
        info!("tracking stopped");
        self.publish();
    }

    // -------------------------------------------------------------------------
    // Event loop
    // -------------------------------------------------------------------------

    /// Drive the loop until stopped.
    ///
    /// Ticks whenever a new detection arrives, and at least every
    /// `tick_interval` otherwise. A `stop` signal preempts an in-flight tick
    /// and triggers an emergency stop. Closure of `events` triggers a
    /// graceful [`shutdown`][Self::shutdown].
    pub async fn run(mut self, mut events: DetectionReceiver, mut stop: StopSignal) -> TrackerState {
        let started = Instant::now();
        info!(state = ?self.state, "tracking loop running");
        self.publish();

        loop {
            let event = tokio::select! {
                biased;
                _ = stop.stopped() => {
                    self.emergency_stop();
                    break;
                }
                changed = events.changed() => match changed {
                    Ok(()) => *events.borrow_and_update(),
                    Err(_) => {
                        info!("detection source closed; shutting down");
                        self.shutdown().await;
                        break;
                    }
                },
                _ = tokio::time::sleep(self.config.tick_interval) => None,
            };

            let now = started.elapsed().as_secs_f64();
            let preempted = tokio::select! {
                biased;
                _ = stop.stopped() => true,
                _ = self.tick(event, now) => false,
            };
            if preempted {
                self.emergency_stop();
                break;
            }
        }
        self.state
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }
}

fn is_fault(error: &MotionError) -> bool {
    matches!(
        error,
        MotionError::Fatal(_) | MotionError::NotHomed(_) | MotionError::NotConnected
    )
}

fn idle_status() -> TrackerStatus {
    let idle = AxisStatus {
        position_deg: 0.0,
        rate_hz: 0.0,
        direction: Direction::None,
        enabled: false,
        faulted: false,
    };
    TrackerStatus {
        state: TrackerState::Idle,
        axes: PerAxis::new(idle, idle),
        last_error: None,
        last_event_timestamp: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use skipper_hal::{BridgeCall, SimBridge};
    use skipper_types::AxisLimits;

    use super::*;
    use crate::ingest::detection_channel;
    use crate::stop::stop_channel;

    const DT: f64 = 0.033;

    fn limits() -> PerAxis<AxisLimits> {
        PerAxis::new(
            AxisLimits {
                position_min_deg: -13.0,
                position_max_deg: 13.0,
                max_speed_deg_s: 30.0,
                homing_speed_deg_s: 5.0,
            },
            AxisLimits {
                position_min_deg: -4.0,
                position_max_deg: 4.0,
                max_speed_deg_s: 3.0,
                homing_speed_deg_s: 2.0,
            },
        )
    }

    async fn homed_sim() -> Arc<SimBridge> {
        let sim = Arc::new(SimBridge::with_limits(limits()));
        sim.connect().await.unwrap();
        sim.home(Axis::Pan).await.unwrap();
        sim.home(Axis::Tilt).await.unwrap();
        sim
    }

    fn detection(dx: i32, dy: i32, timestamp: f64) -> DetectionEvent {
        DetectionEvent {
            dx_px: dx,
            dy_px: dy,
            target_area_fraction: 0.1,
            timestamp,
        }
    }

    fn enable_calls(sim: &SimBridge, on: bool) -> usize {
        sim.calls()
            .iter()
            .filter(|c| matches!(c, BridgeCall::Enable(_, o) if *o == on))
            .count()
    }

    #[tokio::test]
    async fn first_detection_enables_then_moves() {
        let sim = homed_sim().await;
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        assert_eq!(tracker.state(), TrackerState::Idle);

        let state = tracker.tick(Some(detection(200, -200, 1.0)), DT).await;
        assert_eq!(state, TrackerState::Tracking);

        let calls = sim.calls();
        let first_move = calls
            .iter()
            .position(|c| matches!(c, BridgeCall::Move(_)))
            .expect("a move was sent");
        let enables: Vec<_> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, BridgeCall::Enable(_, true)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(enables.len(), 2);
        assert!(enables.iter().all(|&i| i < first_move));
        assert!(sim.position(Axis::Pan) > 0.0);
        assert!(sim.position(Axis::Tilt) < 0.0);
    }

    #[tokio::test]
    async fn centred_target_tracks_without_moving() {
        let sim = homed_sim().await;
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        for i in 1..=5 {
            tracker.tick(Some(detection(10, -8, i as f64)), i as f64 * DT).await;
        }
        assert_eq!(tracker.state(), TrackerState::Tracking);
        assert!(sim.moves(Axis::Pan).is_empty());
        assert!(sim.moves(Axis::Tilt).is_empty());
        assert_eq!(tracker.axis(Axis::Pan).state().smoothed_rate_hz, 0.0);
    }

    #[tokio::test]
    async fn small_target_does_not_start_tracking() {
        let sim = homed_sim().await;
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        let tiny = DetectionEvent {
            target_area_fraction: 0.001,
            ..detection(300, 300, 1.0)
        };
        assert_eq!(tracker.tick(Some(tiny), DT).await, TrackerState::Idle);
        assert_eq!(enable_calls(&sim, true), 0);
        assert!(sim.moves(Axis::Pan).is_empty());
    }

    #[tokio::test]
    async fn lost_target_powers_down_once_and_returns_to_idle() {
        let sim = homed_sim().await;
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        tracker.tick(Some(detection(100, 100, 1.0)), 1.0).await;
        assert_eq!(tracker.state(), TrackerState::Tracking);

        let mut t = 1.0;
        while t < 6.0 {
            t += 0.1;
            tracker.tick(None, t).await;
        }
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(enable_calls(&sim, false), 2);
        assert!(!sim.is_enabled(Axis::Pan));

        // A new detection re-acquires.
        tracker.tick(Some(detection(100, 100, 7.0)), t + DT).await;
        assert_eq!(tracker.state(), TrackerState::Tracking);
        assert_eq!(enable_calls(&sim, true), 4);
    }

    #[tokio::test]
    async fn small_targets_while_tracking_hold_then_power_down_once() {
        let sim = homed_sim().await;
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        tracker.tick(Some(detection(100, 100, 1.0)), 1.0).await;
        assert_eq!(tracker.state(), TrackerState::Tracking);
        let moves_before = sim.moves(Axis::Pan).len() + sim.moves(Axis::Tilt).len();

        let mut t = 1.0;
        while t < 4.0 {
            t += 0.1;
            let tiny = DetectionEvent {
                target_area_fraction: 0.001,
                ..detection(300, 300, t)
            };
            tracker.tick(Some(tiny), t).await;
        }
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(
            sim.moves(Axis::Pan).len() + sim.moves(Axis::Tilt).len(),
            moves_before
        );
        assert_eq!(enable_calls(&sim, false), 2);
        assert!(!sim.is_enabled(Axis::Pan) && !sim.is_enabled(Axis::Tilt));
    }

    #[tokio::test]
    async fn homed_head_is_powered_down_when_no_target_appears() {
        let sim = homed_sim().await;
        assert!(sim.is_enabled(Axis::Pan) && sim.is_enabled(Axis::Tilt));
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());

        let mut t = 0.0;
        while t < 30.0 {
            t += 0.1;
            assert_eq!(tracker.tick(None, t).await, TrackerState::Idle);
        }
        assert!(!sim.is_enabled(Axis::Pan));
        assert!(!sim.is_enabled(Axis::Tilt));
        assert!(!tracker.axis(Axis::Pan).state().enabled);
        assert_eq!(enable_calls(&sim, false), 2);
        assert!(sim.moves(Axis::Pan).is_empty());

        // A target after the power-down re-enables before moving.
        tracker.tick(Some(detection(200, 0, 31.0)), t + DT).await;
        assert_eq!(tracker.state(), TrackerState::Tracking);
        assert!(sim.is_enabled(Axis::Pan));
    }

    #[tokio::test]
    async fn fatal_tilt_error_faults_and_disables_both_axes() {
        let sim = homed_sim().await;
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        tracker.tick(Some(detection(300, 300, 1.0)), DT).await;
        let pan_moves = sim.moves(Axis::Pan).len();

        sim.fail_next_move(Axis::Tilt, MotionError::Fatal("MCU shutdown".into()));
        let state = tracker.tick(Some(detection(300, 300, 2.0)), 2.0 * DT).await;
        assert_eq!(state, TrackerState::Faulted);
        assert!(tracker.axis(Axis::Tilt).is_faulted());
        assert!(!sim.is_enabled(Axis::Pan));
        assert!(!sim.is_enabled(Axis::Tilt));
        assert!(tracker.status().last_error.unwrap().contains("MCU shutdown"));

        // No further commands while faulted.
        let before = sim.calls().len();
        tracker.tick(Some(detection(300, 300, 3.0)), 3.0 * DT).await;
        assert_eq!(sim.calls().len(), before);
        assert_eq!(sim.moves(Axis::Pan).len(), pan_moves + 1);

        assert!(tracker.reset());
        assert_eq!(tracker.state(), TrackerState::Idle);
        tracker.tick(Some(detection(300, 300, 4.0)), 4.0 * DT).await;
        assert_eq!(tracker.state(), TrackerState::Tracking);
    }

    #[tokio::test]
    async fn transient_error_keeps_tracking() {
        let sim = homed_sim().await;
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        tracker.tick(Some(detection(300, 0, 1.0)), DT).await;
        sim.fail_next_move(Axis::Pan, MotionError::Transient("connection reset".into()));

        assert_eq!(
            tracker.tick(Some(detection(300, 0, 2.0)), 2.0 * DT).await,
            TrackerState::Tracking
        );
        assert_eq!(
            tracker.tick(Some(detection(300, 0, 3.0)), 3.0 * DT).await,
            TrackerState::Tracking
        );
        assert_eq!(sim.moves(Axis::Pan).len(), 3);
        assert!(sim.position(Axis::Pan) > 0.0);
    }

    #[tokio::test]
    async fn graceful_shutdown_parks_then_disables() {
        let sim = homed_sim().await;
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        for i in 1..=5 {
            tracker.tick(Some(detection(400, 0, i as f64)), i as f64 * DT).await;
        }
        assert!(sim.position(Axis::Pan) > 0.0);

        tracker.shutdown().await;
        assert_eq!(tracker.state(), TrackerState::Stopped);
        assert_eq!(sim.position(Axis::Pan), 0.0);
        let calls = sim.calls();
        let tail = &calls[calls.len() - 2..];
        assert!(tail.iter().all(|c| matches!(c, BridgeCall::Enable(_, false))));
    }

    #[tokio::test]
    async fn status_feed_reports_each_tick() {
        let sim = homed_sim().await;
        let mut tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        let mut status = tracker.subscribe_status();
        tracker.tick(Some(detection(120, 0, 5.0)), DT).await;
        assert!(status.has_changed().unwrap());
        let snapshot = status.borrow_and_update().clone();
        assert_eq!(snapshot.state, TrackerState::Tracking);
        assert_eq!(snapshot.last_event_timestamp, Some(5.0));
        assert!(snapshot.axes.pan.position_deg > 0.0);
        assert_eq!(snapshot.axes.pan.direction, Direction::Positive);
    }

    #[tokio::test]
    async fn stop_preempts_an_in_flight_move() {
        let sim = Arc::new(
            SimBridge::with_limits(limits()).with_move_latency(Duration::from_secs(30)),
        );
        sim.connect().await.unwrap();
        sim.home(Axis::Pan).await.unwrap();
        sim.home(Axis::Tilt).await.unwrap();

        let tracker = TrackingLoop::new(sim.clone(), LoopConfig::default());
        let (mut tx, rx) = detection_channel();
        let (stop, signal) = stop_channel();
        let task = tokio::spawn(tracker.run(rx, signal));

        tx.publish(detection(400, 400, 1.0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.trigger();

        let state = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("emergency stop must not wait for the move")
            .unwrap();
        assert_eq!(state, TrackerState::Stopped);
        assert_eq!(sim.calls().last(), Some(&BridgeCall::EmergencyStop));
        assert!(!sim.session().connected);
        drop(tx);
    }

    #[tokio::test]
    async fn closed_source_shuts_down_gracefully() {
        let sim = homed_sim().await;
        let config = LoopConfig {
            tick_interval: Duration::from_millis(10),
            ..LoopConfig::default()
        };
        let tracker = TrackingLoop::new(sim.clone(), config);
        let mut status = tracker.subscribe_status();
        let (mut tx, rx) = detection_channel();
        let (_stop, signal) = stop_channel();
        let task = tokio::spawn(tracker.run(rx, signal));

        tx.publish(detection(400, 0, 1.0));
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.state == TrackerState::Tracking),
        )
        .await
        .expect("never started tracking")
        .unwrap();
        drop(tx);

        let state = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop did not exit")
            .unwrap();
        assert_eq!(state, TrackerState::Stopped);
        assert!(!sim.calls().contains(&BridgeCall::EmergencyStop));
        assert!(!sim.is_enabled(Axis::Pan) && !sim.is_enabled(Axis::Tilt));
    }
}
