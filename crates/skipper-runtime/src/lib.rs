//! `skipper-runtime` – the tracking engine.
//!
//! Everything between a detection arriving and a move leaving for the
//! firmware lives here.
//!
//! # Modules
//!
//! - [`axis_controller`] – [`AxisController`]: per-axis deadband, rate
//!   smoothing and limit clamping. Pure, no I/O.
//! - [`tracking_loop`] – [`TrackingLoop`]: the Idle/Tracking/Faulted/Stopped
//!   supervisor that owns both controllers and drives a
//!   [`MotionBridge`][skipper_hal::MotionBridge].
//! - [`ingest`] – latest-value detection channel and the UDP listener that
//!   feeds it.
//! - [`stop`] – the one-shot stop signal used for emergency stops and
//!   shutdown.
//! - [`telemetry`] – [`init_tracing`]: global `tracing` subscriber with an
//!   optional OTLP span exporter.

pub mod axis_controller;
pub mod ingest;
pub mod stop;
pub mod telemetry;
pub mod tracking_loop;

pub use axis_controller::{AxisController, AxisDecision, AxisState, ControllerTuning};
pub use ingest::{
    DetectionReceiver, DetectionSender, IngestError, UdpDetectionSource, detection_channel,
};
pub use stop::{StopHandle, StopSignal, stop_channel};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use tracking_loop::{AxisStatus, LoopConfig, TrackerState, TrackerStatus, TrackingLoop};
