//! [`MoonrakerBridge`] – Motion Bridge for a Klipper host reached through
//! the Moonraker HTTP API.
//!
//! Each axis is a Klipper `manual_stepper` whose `rotation_distance` is set
//! so that one unit equals one degree. Commands are G-code scripts posted to
//! `/printer/gcode/script`; readiness comes from `/printer/info`.
//!
//! # Error mapping
//!
//! | Failure | Result |
//! |---|---|
//! | connection refused, reset, 5xx other than 503 | [`MotionError::Transient`] |
//! | request timed out | [`MotionError::Timeout`] (moves report it as `Transient`) |
//! | 503 (Klippy shut down / disconnected) | [`MotionError::Fatal`] |
//! | G-code error mentioning homing | [`MotionError::NotHomed`] |
//! | any other G-code error (e.g. "Move out of range") | [`MotionError::Fatal`] |

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skipper_types::{
    Axis, AxisCalibration, AxisLimits, ConnectionError, ControllerSession, HomingMode,
    MotionCommand, MotionError, PerAxis, Readiness,
};
use tracing::{debug, error, info, warn};

use crate::bridge::MotionBridge;
use crate::retry::Backoff;
use crate::session::SessionCell;

/// Extra travel past the calibrated range when seeking an endstop.
const HOMING_OVERTRAVEL_DEG: f64 = 5.0;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings for [`MoonrakerBridge`].
#[derive(Debug, Clone)]
pub struct MoonrakerConfig {
    /// Base URL of the Moonraker instance, e.g. `http://localhost:7125`.
    pub base_url: String,
    /// Timeout applied to every status, enable and move request.
    pub request_timeout: Duration,
    /// Timeout for a complete homing sequence.
    pub homing_timeout: Duration,
    /// Retry policy for `connect` and for enabling an axis.
    pub backoff: Backoff,
    /// Klipper `manual_stepper` name of each axis.
    pub steppers: PerAxis<String>,
}

impl Default for MoonrakerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7125".to_string(),
            request_timeout: Duration::from_secs(2),
            homing_timeout: Duration::from_secs(30),
            backoff: Backoff::default(),
            steppers: PerAxis::new("stepper_0".to_string(), "stepper_1".to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GcodeRequest<'a> {
    script: &'a str,
}

#[derive(Deserialize)]
struct InfoResponse {
    result: InfoResult,
}

#[derive(Deserialize)]
struct InfoResult {
    state: String,
    #[serde(default)]
    state_message: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// MoonrakerBridge
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client for a Klipper/Moonraker motion controller.
pub struct MoonrakerBridge {
    config: MoonrakerConfig,
    calibration: PerAxis<AxisCalibration>,
    client: reqwest::Client,
    session: SessionCell,
}

impl MoonrakerBridge {
    pub fn new(config: MoonrakerConfig, calibration: PerAxis<AxisCalibration>) -> Self {
        Self {
            config,
            calibration,
            client: reqwest::Client::new(),
            session: SessionCell::new(),
        }
    }

    /// Change feed of the session for observers such as a status display.
    pub fn subscribe_session(&self) -> tokio::sync::watch::Receiver<ControllerSession> {
        self.session.subscribe()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Query `/printer/info` once.
    ///
    /// `ready` maps to [`Readiness::Ready`], `startup` to
    /// [`Readiness::NotReady`]; `shutdown` and `error` are firmware faults.
    pub async fn probe(&self) -> Result<Readiness, ConnectionError> {
        let unreachable = |details: String| ConnectionError::Unreachable {
            attempts: 1,
            details,
        };
        let response = self
            .client
            .get(self.url("/printer/info"))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unreachable(format!("HTTP {}", response.status())));
        }

        let info: InfoResponse = response
            .json()
            .await
            .map_err(|e| unreachable(format!("unexpected /printer/info response: {e}")))?;

        match info.result.state.as_str() {
            "ready" => Ok(Readiness::Ready),
            "startup" => Ok(Readiness::NotReady(info.result.state)),
            _ => Err(ConnectionError::Firmware {
                state: info.result.state,
                message: info.result.state_message.trim().to_string(),
            }),
        }
    }

    /// Post `script` and wait for the firmware to acknowledge it.
    async fn send_gcode(
        &self,
        axis: Option<Axis>,
        script: &str,
        timeout: Duration,
    ) -> Result<(), MotionError> {
        debug!(script, "sending gcode");
        let response = self
            .client
            .post(self.url("/printer/gcode/script"))
            .timeout(timeout)
            .json(&GcodeRequest { script })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MotionError::Timeout(timeout)
                } else {
                    MotionError::Transient(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_failure(status, &body, axis);
        if err.is_fatal() {
            self.session.record_error(&err);
            if status == 503 {
                self.session.set_connected(false);
            }
        }
        Err(err)
    }

    fn require_connected(&self) -> Result<ControllerSession, MotionError> {
        let session = self.session.snapshot();
        if !session.connected {
            return Err(MotionError::NotConnected);
        }
        Ok(session)
    }

    /// Send the emergency stop and wait for Moonraker to accept it.
    pub async fn emergency_stop_confirmed(&self) -> Result<(), MotionError> {
        let response = self
            .client
            .post(self.url("/printer/emergency_stop"))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| MotionError::Transient(e.to_string()))?;
        self.session.set_connected(false);
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(classify_failure(status, &body, None))
        }
    }
}

#[async_trait]
impl MotionBridge for MoonrakerBridge {
    async fn connect(&self) -> Result<Readiness, ConnectionError> {
        let attempts = self.config.backoff.max_attempts();
        let mut last = ConnectionError::Unreachable {
            attempts,
            details: "no attempt made".to_string(),
        };

        for attempt in 1..=attempts {
            match self.probe().await {
                Ok(Readiness::Ready) => {
                    self.session.set_connected(true);
                    self.session.clear_error();
                    info!(url = %self.config.base_url, attempt, "firmware ready");
                    return Ok(Readiness::Ready);
                }
                Ok(Readiness::NotReady(state)) => {
                    warn!(attempt, %state, "firmware not ready yet");
                    last = ConnectionError::NotReady { attempts, state };
                }
                Err(err @ ConnectionError::Firmware { .. }) => {
                    error!(error = %err, "firmware reports a fault state");
                    self.session.record_error(&err);
                    return Err(err);
                }
                Err(ConnectionError::Unreachable { details, .. })
                | Err(ConnectionError::NotReady { state: details, .. }) => {
                    warn!(attempt, %details, "firmware unreachable");
                    last = ConnectionError::Unreachable { attempts, details };
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.backoff.delay(attempt)).await;
            }
        }

        self.session.record_error(&last);
        Err(last)
    }

    async fn home(&self, axis: Axis) -> Result<(), MotionError> {
        self.require_connected()?;
        self.session.set_homed(axis, false);
        let script = homing_script(&self.config.steppers[axis], &self.calibration[axis]);
        info!(%axis, "homing");
        match self.send_gcode(Some(axis), &script, self.config.homing_timeout).await {
            Ok(()) => {
                self.session.set_homed(axis, true);
                info!(%axis, "homed");
                Ok(())
            }
            Err(e) => {
                error!(%axis, error = %e, "homing failed");
                self.session.record_error(&e);
                Err(e)
            }
        }
    }

    async fn enable(&self, axis: Axis, on: bool) -> Result<(), MotionError> {
        let script = format!(
            "MANUAL_STEPPER STEPPER={} ENABLE={}",
            self.config.steppers[axis],
            u8::from(on)
        );

        if !on {
            return self
                .send_gcode(Some(axis), &script, self.config.request_timeout)
                .await;
        }

        let session = self.require_connected()?;
        if !session.homed[axis] {
            return Err(MotionError::NotHomed(axis));
        }

        let attempts = self.config.backoff.max_attempts();
        let mut failures = 0;
        loop {
            match self
                .send_gcode(Some(axis), &script, self.config.request_timeout)
                .await
            {
                Err(e) if e.is_transient() && failures + 1 < attempts => {
                    failures += 1;
                    warn!(%axis, error = %e, failures, "enable failed, retrying");
                    tokio::time::sleep(self.config.backoff.delay(failures)).await;
                }
                other => return other,
            }
        }
    }

    async fn move_to(&self, command: MotionCommand) -> Result<(), MotionError> {
        let axis = command.axis;
        let session = self.require_connected()?;
        if !session.homed[axis] {
            return Err(MotionError::NotHomed(axis));
        }

        let command = self.calibration[axis].limits.clamp_command(command);
        let speed_deg_s = command.feedrate_deg_per_min / 60.0;
        if speed_deg_s <= 0.0 {
            return Err(MotionError::Transient(format!(
                "{axis} move to {:.3} deg has no feedrate; not sent",
                command.target_position_deg
            )));
        }

        let script = format!(
            "MANUAL_STEPPER STEPPER={} MOVE={:.3} SPEED={:.3}",
            self.config.steppers[axis], command.target_position_deg, speed_deg_s
        );
        self.send_gcode(Some(axis), &script, self.config.request_timeout)
            .await
            .map_err(|e| match e {
                MotionError::Timeout(d) => {
                    MotionError::Transient(format!("move timed out after {d:?}"))
                }
                other => other,
            })
    }

    fn emergency_stop(&self) {
        let url = self.url("/printer/emergency_stop");
        let client = self.client.clone();
        let timeout = self.config.request_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.post(&url).timeout(timeout).send().await {
                        error!(error = %e, "emergency stop request failed");
                    }
                });
            }
            Err(_) => error!("no async runtime available; emergency stop not sent"),
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

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// G-code sequence that homes `stepper` according to its calibration.
pub(crate) fn homing_script(stepper: &str, calibration: &AxisCalibration) -> String {
    let limits = &calibration.limits;
    let speed = limits.homing_speed_deg_s;
    let enable = format!("MANUAL_STEPPER STEPPER={stepper} ENABLE=1");
    match calibration.homing {
        HomingMode::SetZero => {
            format!("{enable}\nMANUAL_STEPPER STEPPER={stepper} SET_POSITION=0")
        }
        HomingMode::Endstop {
            endstop_position_deg,
            toward_max,
        } => {
            let travel =
                limits.position_max_deg - limits.position_min_deg + HOMING_OVERTRAVEL_DEG;
            let seek = if toward_max { travel } else { -travel };
            [
                enable,
                format!("MANUAL_STEPPER STEPPER={stepper} SET_POSITION=0"),
                format!(
                    "MANUAL_STEPPER STEPPER={stepper} MOVE={seek:.3} SPEED={speed:.3} STOP_ON_ENDSTOP=1"
                ),
                format!("MANUAL_STEPPER STEPPER={stepper} SET_POSITION={endstop_position_deg:.3}"),
                format!(
                    "MANUAL_STEPPER STEPPER={stepper} MOVE={:.3} SPEED={speed:.3}",
                    limits.park_position()
                ),
            ]
            .join("\n")
        }
    }
}

/// Map a non-success HTTP reply to a [`MotionError`].
pub(crate) fn classify_failure(status: u16, body: &str, axis: Option<Axis>) -> MotionError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    let lower = message.to_lowercase();

    if let Some(axis) = axis
        && (lower.contains("must home") || lower.contains("not homed"))
    {
        return MotionError::NotHomed(axis);
    }
    match status {
        503 => MotionError::Fatal(format!("firmware unavailable: {message}")),
        500..=599 => MotionError::Transient(format!("HTTP {status}: {message}")),
        _ => MotionError::Fatal(format!("firmware rejected command: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // ------------------------------------------------------------------
    // Fake Moonraker
    // ------------------------------------------------------------------

    #[derive(Debug, Clone)]
    struct Recorded {
        method: String,
        path: String,
        body: String,
    }

    type Responder = dyn Fn(&Recorded) -> (u16, String) + Send + Sync;

    /// Serve one request per connection, answering with `responder`.
    async fn spawn_fake(responder: Arc<Responder>) -> (String, Arc<Mutex<Vec<Recorded>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_task = Arc::clone(&log);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let responder = Arc::clone(&responder);
                let log = Arc::clone(&log_task);
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut stream).await else {
                        return;
                    };
                    let (status, body) = responder(&request);
                    log.lock().unwrap().push(request);
                    let reply = format!(
                        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(reply.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (format!("http://{addr}"), log)
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<Recorded> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let mut request_line = head.lines().next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let path = request_line.next()?.to_string();
        let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
        Some(Recorded { method, path, body })
    }

    fn calibration() -> PerAxis<AxisCalibration> {
        let cal = |min: f64, max: f64, speed: f64| AxisCalibration {
            limits: AxisLimits {
                position_min_deg: min,
                position_max_deg: max,
                max_speed_deg_s: speed,
                homing_speed_deg_s: 5.0,
            },
            homing: HomingMode::SetZero,
        };
        PerAxis::new(cal(-13.0, 13.0, 30.0), cal(-4.0, 4.0, 3.0))
    }

    fn bridge_for(base_url: String) -> MoonrakerBridge {
        let config = MoonrakerConfig {
            base_url,
            request_timeout: Duration::from_millis(500),
            homing_timeout: Duration::from_secs(1),
            backoff: Backoff {
                attempts: 3,
                initial: Duration::from_millis(5),
                ceiling: Duration::from_millis(10),
            },
            ..MoonrakerConfig::default()
        };
        MoonrakerBridge::new(config, calibration())
    }

    fn info(state: &str) -> (u16, String) {
        (
            200,
            format!(r#"{{"result":{{"state":"{state}","state_message":"msg"}}}}"#),
        )
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn connect_retries_through_startup() {
        let calls = Arc::new(Mutex::new(0u32));
        let calls_in = Arc::clone(&calls);
        let (url, log) = spawn_fake(Arc::new(move |_req: &Recorded| {
            let mut n = calls_in.lock().unwrap();
            *n += 1;
            if *n < 2 { info("startup") } else { info("ready") }
        }))
        .await;
        let bridge = bridge_for(url);

        assert_eq!(bridge.connect().await.unwrap(), Readiness::Ready);
        assert!(bridge.session().connected);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|r| r.method == "GET" && r.path == "/printer/info"));
    }

    #[tokio::test]
    async fn connect_surfaces_firmware_shutdown_immediately() {
        let (url, log) = spawn_fake(Arc::new(|_req: &Recorded| info("shutdown"))).await;
        let bridge = bridge_for(url);

        let err = bridge.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Firmware { ref state, .. } if state == "shutdown"));
        assert_eq!(log.lock().unwrap().len(), 1, "fault states are never retried");
        assert!(bridge.session().last_error.is_some());
    }

    #[tokio::test]
    async fn connect_gives_up_when_never_ready() {
        let (url, log) = spawn_fake(Arc::new(|_req: &Recorded| info("startup"))).await;
        let bridge = bridge_for(url);

        let err = bridge.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::NotReady { attempts: 3, .. }));
        assert_eq!(log.lock().unwrap().len(), 3);
        assert!(!bridge.session().connected);
    }

    #[tokio::test]
    async fn connect_unreachable_after_bounded_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let bridge = bridge_for(format!("http://{addr}"));

        let err = bridge.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Unreachable { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn move_requires_connection_and_homing() {
        let (url, _log) = spawn_fake(Arc::new(|req: &Recorded| {
            if req.path == "/printer/info" { info("ready") } else { (200, r#"{"result":"ok"}"#.into()) }
        }))
        .await;
        let bridge = bridge_for(url);
        let cmd = MotionCommand {
            axis: Axis::Pan,
            target_position_deg: 1.0,
            feedrate_deg_per_min: 60.0,
        };

        assert_eq!(bridge.move_to(cmd).await, Err(MotionError::NotConnected));
        bridge.connect().await.unwrap();
        assert_eq!(bridge.move_to(cmd).await, Err(MotionError::NotHomed(Axis::Pan)));
        assert_eq!(
            bridge.enable(Axis::Pan, true).await,
            Err(MotionError::NotHomed(Axis::Pan))
        );
        // Disabling is always allowed.
        assert!(bridge.enable(Axis::Pan, false).await.is_ok());
    }

    #[tokio::test]
    async fn move_is_clamped_before_transmission() {
        let (url, log) = spawn_fake(Arc::new(|req: &Recorded| {
            if req.path == "/printer/info" { info("ready") } else { (200, r#"{"result":"ok"}"#.into()) }
        }))
        .await;
        let bridge = bridge_for(url);
        bridge.connect().await.unwrap();
        bridge.home(Axis::Pan).await.unwrap();
        assert!(bridge.session().homed.pan);

        bridge
            .move_to(MotionCommand {
                axis: Axis::Pan,
                target_position_deg: 90.0,
                feedrate_deg_per_min: 100_000.0,
            })
            .await
            .unwrap();

        let log = log.lock().unwrap();
        let last = log.last().unwrap();
        assert_eq!(last.path, "/printer/gcode/script");
        assert!(last.body.contains("STEPPER=stepper_0 MOVE=13.000 SPEED=30.000"), "{}", last.body);
    }

    #[tokio::test]
    async fn zero_feedrate_move_is_refused_without_sending() {
        let (url, log) = spawn_fake(Arc::new(|req: &Recorded| {
            if req.path == "/printer/info" { info("ready") } else { (200, r#"{"result":"ok"}"#.into()) }
        }))
        .await;
        let bridge = bridge_for(url);
        bridge.connect().await.unwrap();
        bridge.home(Axis::Tilt).await.unwrap();
        let sent_before = log.lock().unwrap().len();

        let err = bridge
            .move_to(MotionCommand {
                axis: Axis::Tilt,
                target_position_deg: 2.0,
                feedrate_deg_per_min: 0.0,
            })
            .await
            .unwrap_err();
        assert!(err.is_transient(), "{err:?}");
        assert_eq!(log.lock().unwrap().len(), sent_before);
    }

    #[tokio::test]
    async fn gcode_errors_are_classified() {
        let (url, _log) = spawn_fake(Arc::new(|req: &Recorded| {
            if req.path == "/printer/info" {
                info("ready")
            } else if req.body.contains("ENABLE=1") || req.body.contains("SET_POSITION") {
                (200, r#"{"result":"ok"}"#.into())
            } else if req.body.contains("stepper_0") {
                (400, r#"{"error":{"code":400,"message":"Move out of range"}}"#.into())
            } else {
                (500, "internal".into())
            }
        }))
        .await;
        let bridge = bridge_for(url);
        bridge.connect().await.unwrap();
        bridge.home(Axis::Pan).await.unwrap();
        bridge.home(Axis::Tilt).await.unwrap();

        let pan = bridge
            .move_to(MotionCommand {
                axis: Axis::Pan,
                target_position_deg: 2.0,
                feedrate_deg_per_min: 60.0,
            })
            .await;
        assert!(matches!(pan, Err(MotionError::Fatal(ref m)) if m.contains("out of range")));

        let tilt = bridge
            .move_to(MotionCommand {
                axis: Axis::Tilt,
                target_position_deg: 2.0,
                feedrate_deg_per_min: 60.0,
            })
            .await;
        assert!(matches!(tilt, Err(MotionError::Transient(_))));
    }

    #[test]
    fn classify_failure_table() {
        assert_eq!(
            classify_failure(400, r#"{"error":{"message":"Must home axis first"}}"#, Some(Axis::Tilt)),
            MotionError::NotHomed(Axis::Tilt)
        );
        assert!(classify_failure(503, "Klippy Disconnected", None).is_fatal());
        assert!(classify_failure(502, "", None).is_transient());
        assert!(classify_failure(400, "garbage", None).is_fatal());
    }

    #[test]
    fn set_zero_homing_script() {
        let cal = calibration().pan;
        let script = homing_script("stepper_0", &cal);
        assert_eq!(
            script,
            "MANUAL_STEPPER STEPPER=stepper_0 ENABLE=1\nMANUAL_STEPPER STEPPER=stepper_0 SET_POSITION=0"
        );
    }

    #[test]
    fn endstop_homing_script_seeks_past_travel() {
        let mut cal = calibration().pan;
        cal.homing = HomingMode::Endstop {
            endstop_position_deg: -14.0,
            toward_max: false,
        };
        let script = homing_script("stepper_0", &cal);
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[2].contains("MOVE=-31.000 SPEED=5.000 STOP_ON_ENDSTOP=1"));
        assert!(lines[3].ends_with("SET_POSITION=-14.000"));
        assert!(lines[4].contains("MOVE=0.000"));
    }
}
