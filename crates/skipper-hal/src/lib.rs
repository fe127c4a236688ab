//! `skipper-hal` – Motion Bridge to the external motion-control firmware.
//!
//! The rest of Skipper never speaks HTTP or G-code directly; it talks to the
//! [`MotionBridge`] trait. Two implementations are provided:
//!
//! - [`MoonrakerBridge`][moonraker::MoonrakerBridge] – drives two Klipper
//!   `manual_stepper` objects through the Moonraker HTTP API.
//! - [`SimBridge`][sim::SimBridge] – an in-process stand-in that records every
//!   call, used by tests and by the `--sim` dry-run mode.
//!
//! # Modules
//!
//! - [`bridge`] – the [`MotionBridge`] trait and its contract.
//! - [`session`] – [`SessionCell`], the single-writer holder of the
//!   [`ControllerSession`][skipper_types::ControllerSession].
//! - [`retry`] – [`Backoff`], the capped exponential retry policy.

pub mod bridge;
pub mod moonraker;
pub mod retry;
pub mod session;
pub mod sim;

pub use bridge::MotionBridge;
pub use moonraker::{MoonrakerBridge, MoonrakerConfig};
pub use retry::Backoff;
pub use session::SessionCell;
pub use sim::{BridgeCall, SimBridge};
