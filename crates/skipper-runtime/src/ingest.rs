//! Detection ingestion.
//!
//! The vision pipeline pushes one JSON [`DetectionEvent`] per UDP datagram.
//! Ingestion keeps only the most recent event in a `watch` channel, so a
//! slow control loop always sees the latest detection and never a backlog.
//!
//! ```text
//! vision ──UDP──▶ UdpDetectionSource ──▶ DetectionSender ──watch──▶ TrackingLoop
//! ```

use std::net::SocketAddr;

use skipper_types::DetectionEvent;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::stop::StopSignal;

/// Largest datagram accepted. Detection events are well under 200 bytes.
const MAX_DATAGRAM: usize = 2048;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("malformed detection: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("detection out of range: {0}")]
    OutOfRange(String),
}

/// Receiving end of the detection channel, as consumed by the loop.
pub type DetectionReceiver = watch::Receiver<Option<DetectionEvent>>;

/// Create a latest-value detection channel.
pub fn detection_channel() -> (DetectionSender, DetectionReceiver) {
    let (tx, rx) = watch::channel(None);
    (
        DetectionSender {
            tx,
            last_timestamp: None,
        },
        rx,
    )
}

/// Publishing end of the detection channel. Dropping it closes the channel,
/// which the loop treats as a request for a graceful shutdown.
#[derive(Debug)]
pub struct DetectionSender {
    tx: watch::Sender<Option<DetectionEvent>>,
    last_timestamp: Option<f64>,
}

impl DetectionSender {
    /// Publish `event` unless it is not newer than the last one accepted.
    ///
    /// Returns whether the event was published.
    pub fn publish(&mut self, event: DetectionEvent) -> bool {
        if self.last_timestamp.is_some_and(|last| event.timestamp <= last) {
            debug!(timestamp = event.timestamp, last = ?self.last_timestamp, "dropping stale detection");
            return false;
        }
        self.last_timestamp = Some(event.timestamp);
        self.tx.send_replace(Some(event));
        true
    }
}

/// Decode and range-check one datagram.
///
/// # Errors
///
/// [`IngestError::Malformed`] for bad JSON, [`IngestError::OutOfRange`] for
/// a non-finite timestamp or an area fraction outside `[0, 1]`.
pub fn parse_datagram(bytes: &[u8]) -> Result<DetectionEvent, IngestError> {
    let event: DetectionEvent = serde_json::from_slice(bytes)?;
    if !event.timestamp.is_finite() {
        return Err(IngestError::OutOfRange("timestamp must be finite".into()));
    }
    if !(0.0..=1.0).contains(&event.target_area_fraction) {
        return Err(IngestError::OutOfRange(format!(
            "target_area_fraction {} not in [0, 1]",
            event.target_area_fraction
        )));
    }
    Ok(event)
}

/// UDP listener feeding a [`DetectionSender`].
pub struct UdpDetectionSource {
    socket: UdpSocket,
}

impl UdpDetectionSource {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until `shutdown` fires, then drop `sender`.
    pub async fn run(self, mut sender: DetectionSender, mut shutdown: StopSignal) {
        let mut buf = [0u8; MAX_DATAGRAM];
        if let Ok(addr) = self.socket.local_addr() {
            info!(%addr, "listening for detections");
        }
        loop {
            tokio::select! {
                _ = shutdown.stopped() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => match parse_datagram(&buf[..len]) {
                        Ok(event) => {
                            sender.publish(event);
                        }
                        Err(e) => warn!(%peer, error = %e, "dropping detection datagram"),
                    },
                    Err(e) => warn!(error = %e, "detection socket receive failed"),
                },
            }
        }
        info!("detection ingestion stopped");
    }
}
