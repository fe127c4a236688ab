//! [`SessionCell`] – single-writer holder of the [`ControllerSession`].
//!
//! The bridge that owns the cell is the only writer. Everyone else gets a
//! cheap snapshot via [`SessionCell::snapshot`] or a change feed via
//! [`SessionCell::subscribe`].

use skipper_types::{Axis, ControllerSession};
use tokio::sync::watch;

#[derive(Debug)]
pub struct SessionCell {
    tx: watch::Sender<ControllerSession>,
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ControllerSession::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> ControllerSession {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerSession> {
        self.tx.subscribe()
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_modify(|s| {
            s.connected = connected;
            if !connected {
                s.homed.pan = false;
                s.homed.tilt = false;
            }
        });
    }

    pub fn set_homed(&self, axis: Axis, homed: bool) {
        self.tx.send_modify(|s| s.homed[axis] = homed);
    }

    pub fn record_error(&self, error: impl ToString) {
        let message = error.to_string();
        self.tx.send_modify(|s| s.last_error = Some(message));
    }

    pub fn clear_error(&self) {
        self.tx.send_modify(|s| s.last_error = None);
    }
}
