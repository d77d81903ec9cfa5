//! Client for the relay's configuration API, plus the port editor that
//! debounces operator input before committing it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::BoxFuture;
use futures::FutureExt;
use mavrelay_proto::{ConfigReport, PortStatus};
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const PORT_MIN: u16 = 1;
pub const PORT_MAX: u16 = u16::MAX;
pub const COMMIT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortInputError {
    #[error("value is not a number")]
    NotANumber,
    #[error("number is not an integer")]
    NotAnInteger,
    #[error("number is less than the minimum allowed")]
    BelowMinimum,
    #[error("number is greater than the maximum allowed")]
    AboveMaximum,
}

/// Checks what the operator typed into the port field.
pub fn validate_port_input(input: &str) -> Result<u16, PortInputError> {
    let v: f64 = input.trim().parse().map_err(|_| PortInputError::NotANumber)?;
    if !v.is_finite() {
        return Err(PortInputError::NotANumber);
    }
    if v.fract() != 0.0 {
        return Err(PortInputError::NotAnInteger);
    }
    if v < PORT_MIN as f64 {
        return Err(PortInputError::BelowMinimum);
    }
    if v > PORT_MAX as f64 {
        return Err(PortInputError::AboveMaximum);
    }
    Ok(v as u16)
}

#[derive(Debug, Error)]
pub enum SettingsError {
    /// The relay answered with an error body.
    #[error("{message}")]
    Rejected { message: String, status: Option<PortStatus> },
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed maps api key")]
    MalformedKey,
}

/// Reverses the relay's key obfuscation: the characters are reversed, then
/// base64-decoded.
pub fn deobfuscate_key(published: &str) -> Result<String, SettingsError> {
    let b64: String = published.chars().rev().collect();
    let bytes = STANDARD.decode(b64.as_bytes()).map_err(|_| SettingsError::MalformedKey)?;
    String::from_utf8(bytes).map_err(|_| SettingsError::MalformedKey)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsParams {
    pub api_key: String,
    pub map_id: String,
}

pub trait ConfigClient: Send + Sync + 'static {
    fn get_config(&self) -> BoxFuture<'static, Result<ConfigReport, SettingsError>>;
    fn set_port(&self, port: u16) -> BoxFuture<'static, Result<ConfigReport, SettingsError>>;
}

/// Talks to `/api/*` on the relay's HTTP port.
#[derive(Debug, Clone)]
pub struct HttpConfigClient {
    base: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(default)]
    mavlink_status: Option<PortStatus>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapsBody {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    map_id: String,
}

impl HttpConfigClient {
    /// `base` is the relay's HTTP root, e.g. `http://localhost:8080`.
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into().trim_end_matches('/').to_string(), http: reqwest::Client::new() }
    }

    pub async fn maps_params(&self) -> Result<MapsParams, SettingsError> {
        let body: MapsBody = self
            .http
            .get(format!("{}/api/maps-params", self.base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(MapsParams { api_key: deobfuscate_key(&body.api_key)?, map_id: body.map_id })
    }
}

async fn read_report(resp: reqwest::Response) -> Result<ConfigReport, SettingsError> {
    if resp.status().is_success() {
        return Ok(resp.json().await?);
    }
    let code = resp.status();
    match resp.json::<ErrorBody>().await {
        Ok(body) => Err(SettingsError::Rejected { message: body.error.message, status: body.mavlink_status }),
        Err(_) => Err(SettingsError::Rejected { message: format!("relay answered {}", code), status: None }),
    }
}

impl ConfigClient for HttpConfigClient {
    fn get_config(&self) -> BoxFuture<'static, Result<ConfigReport, SettingsError>> {
        let req = self.http.get(format!("{}/api/config", self.base));
        async move { read_report(req.send().await?).await }.boxed()
    }

    fn set_port(&self, port: u16) -> BoxFuture<'static, Result<ConfigReport, SettingsError>> {
        let req = self
            .http
            .post(format!("{}/api/config", self.base))
            .json(&serde_json::json!({ "mavlinkPort": port }));
        async move { read_report(req.send().await?).await }.boxed()
    }
}

/// What the settings view shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsState {
    /// Last valid port entered (or reported by the relay).
    pub port: u16,
    pub status: PortStatus,
    /// Input or relay error, cleared by the next successful commit.
    pub error: Option<String>,
    pub updated_at: Option<OffsetDateTime>,
}

/// Debounced editor for the relay's MAVLink port.
///
/// Valid edits are committed `delay` after the last one. Starting a commit
/// cancels the one still in flight, and only the newest commit's answer is
/// shown.
#[derive(Clone)]
pub struct PortEditor {
    inner: Arc<EditorInner>,
}

struct EditorInner {
    client: Arc<dyn ConfigClient>,
    delay: Duration,
    attempt: AtomicU64,
    state: watch::Sender<SettingsState>,
    pending: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    timer: Option<JoinHandle<()>>,
    request: Option<JoinHandle<()>>,
}

impl PortEditor {
    pub fn new(client: Arc<dyn ConfigClient>, port: u16, delay: Duration) -> Self {
        let (state, _) = watch::channel(SettingsState {
            port,
            status: PortStatus::Unset,
            error: None,
            updated_at: None,
        });
        Self {
            inner: Arc::new(EditorInner {
                client,
                delay,
                attempt: AtomicU64::new(0),
                state,
                pending: Mutex::new(Pending::default()),
            }),
        }
    }

    /// Fetches the relay's current port and status.
    pub async fn load(&self) -> Result<ConfigReport, SettingsError> {
        match self.inner.client.get_config().await {
            Ok(report) => {
                self.inner.state.send_modify(|s| {
                    s.port = report.mavlink_port;
                    s.status = report.mavlink_status;
                    s.error = (report.mavlink_status == PortStatus::Error)
                        .then(|| "Mavlink connection is down.".to_string());
                    s.updated_at = Some(OffsetDateTime::now_utc());
                });
                Ok(report)
            }
            Err(e) => {
                let msg = format!("Unable to receive Mavlink port status. {}", e);
                self.inner.state.send_modify(|s| s.error = Some(msg));
                Err(e)
            }
        }
    }

    /// Takes raw field input. Valid input schedules a commit; invalid input
    /// is shown as an error and nothing is sent.
    pub fn edit(&self, input: &str) -> Result<u16, PortInputError> {
        let port = match validate_port_input(input) {
            Ok(p) => p,
            Err(e) => {
                self.inner.state.send_modify(|s| s.error = Some(e.to_string()));
                return Err(e);
            }
        };
        self.inner.state.send_modify(|s| {
            s.port = port;
            s.status = PortStatus::Unset;
            s.error = None;
        });

        let inner = self.inner.clone();
        let mut pending = self.inner.pending();
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;
            inner.commit(port);
        }));
        Ok(port)
    }

    /// Commits `port` now, skipping the debounce.
    pub fn commit_now(&self, port: u16) {
        if let Some(timer) = self.inner.pending().timer.take() {
            timer.abort();
        }
        self.inner.commit(port);
    }

    pub fn state(&self) -> SettingsState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SettingsState> {
        self.inner.state.subscribe()
    }
}

impl EditorInner {
    fn commit(self: &Arc<Self>, port: u16) {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = self.pending();
        if let Some(previous) = pending.request.take() {
            // dropping the request future cancels it
            previous.abort();
            debug!("settings: cancelled in-flight port change");
        }
        let request = self.client.set_port(port);
        let inner = self.clone();
        pending.request = Some(tokio::spawn(async move {
            let result = request.await;
            inner.apply(attempt, port, result);
        }));
    }

    fn apply(&self, attempt: u64, port: u16, result: Result<ConfigReport, SettingsError>) {
        if self.attempt.load(Ordering::SeqCst) != attempt {
            debug!(port, "settings: stale answer ignored");
            return;
        }
        self.state.send_modify(|s| {
            match &result {
                Ok(report) => {
                    s.port = report.mavlink_port;
                    s.status = report.mavlink_status;
                    s.error = None;
                    info!("Switched Mavlink to port {}", report.mavlink_port);
                }
                Err(SettingsError::Rejected { message, status }) => {
                    s.status = status.unwrap_or(PortStatus::Error);
                    s.error = Some(message.clone());
                    warn!("settings: port {} rejected: {}", port, message);
                }
                Err(e) => {
                    s.status = PortStatus::Error;
                    s.error = Some(e.to_string());
                    warn!("settings: port {} not applied: {}", port, e);
                }
            }
            s.updated_at = Some(OffsetDateTime::now_utc());
        });
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for EditorInner {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(t) = pending.timer.take() {
            t.abort();
        }
        if let Some(r) = pending.request.take() {
            r.abort();
        }
    }
}
