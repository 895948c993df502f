//! Session controller
//!
//! Wires the capture engine, the diagnostic bridge and the session recorder
//! together. The engine's sink fans out to the recorder and to the caller's
//! inspector-broadcast function; state transitions are pushed over a
//! broadcast channel.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::capture::engine::{BodySaver, EngineOptions, EventSink};
use crate::capture::event::{CaptureEvent, RequestEvent, ResponseEvent};
use crate::capture::types::SavedBody;
use crate::capture::CaptureEngine;
use crate::cdp::{DiagnosticBridge, DiagnosticChannel};
use crate::config::Config;
use crate::fsutil::now_ms;
use crate::recording::CaptureSession;
use crate::{Result, WebtapError};

/// Capacity of the state broadcast channel
const STATE_CHANNEL_CAPACITY: usize = 16;

/// The navigation host's attachment surface
///
/// Host glue installs the engine's lifecycle callbacks and routes its
/// request events through them.
pub trait NavigationHost: Send + Sync {
    /// Install the lifecycle hooks
    ///
    /// # Errors
    ///
    /// Returns error when the host cannot register the callbacks
    fn install(&self, hooks: LifecycleHooks) -> Result<()>;

    /// Remove previously installed hooks
    fn uninstall(&self);
}

/// Cloneable handle exposing the engine's five lifecycle callbacks
#[derive(Clone)]
pub struct LifecycleHooks {
    engine: CaptureEngine,
}

impl LifecycleHooks {
    fn new(engine: CaptureEngine) -> Self {
        Self { engine }
    }

    /// A request was created
    pub fn on_before_request(&self, id: &str, method: &str, url: &str, body: Option<&[u8]>) {
        self.engine.on_before_request(id, method, url, body);
    }

    /// Request headers are about to be sent
    pub fn on_before_send_headers(&self, id: &str, headers: &[(String, String)]) {
        self.engine.on_before_send_headers(id, headers);
    }

    /// Response headers arrived
    pub fn on_headers_received(
        &self,
        id: &str,
        status: u16,
        status_text: &str,
        headers: &[(String, String)],
    ) {
        self.engine.on_headers_received(id, status, status_text, headers);
    }

    /// One response body chunk passed through the tap
    pub fn on_body_chunk(&self, id: &str, chunk: &[u8]) {
        self.engine.on_body_chunk(id, chunk);
    }

    /// Terminal completion
    pub fn on_completed(&self, id: &str, from_cache: bool) {
        self.engine.on_completed(id, from_cache);
    }

    /// Terminal error
    pub fn on_error(&self, id: &str, error: &str) {
        self.engine.on_error(id, error);
    }
}

/// Function shipping `(channel, payload)` pairs to the inspector UI
pub type InspectorSink = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Snapshot of the controller's capture state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureState {
    /// True while a session is recording
    pub capturing: bool,
    /// Base directory of the active session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
    /// Session start, milliseconds since epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
}

/// Tagged result of a control operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResult {
    /// Whether the operation took effect
    pub ok: bool,
    /// Why it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// State after the operation
    pub state: CaptureState,
}

/// A `{channel, payload}` pair delivered from the guest side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Event channel name
    pub channel: String,
    /// Event payload
    pub payload: Value,
}

struct ActiveCapture {
    session: Arc<CaptureSession>,
    engine: CaptureEngine,
    bridge: DiagnosticBridge,
    started_at_ms: u64,
}

/// User-visible capture control surface
pub struct SessionController {
    config: Config,
    host: Option<Arc<dyn NavigationHost>>,
    diagnostic: Option<Arc<dyn DiagnosticChannel>>,
    inspector: InspectorSink,
    active: Mutex<Option<ActiveCapture>>,
    state_tx: broadcast::Sender<CaptureState>,
}

impl SessionController {
    /// Create a controller over an optional navigation host and diagnostic
    /// channel
    pub fn new(
        config: Config,
        host: Option<Arc<dyn NavigationHost>>,
        diagnostic: Option<Arc<dyn DiagnosticChannel>>,
        inspector: InspectorSink,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);

        Self {
            config,
            host,
            diagnostic,
            inspector,
            active: Mutex::new(None),
            state_tx,
        }
    }

    /// Start capturing
    ///
    /// A second start while capturing returns the current state without
    /// side effects.
    ///
    /// # Errors
    ///
    /// Returns error when no navigation host is present or the session's
    /// artifacts cannot be created
    pub fn start(&self) -> Result<ControlResult> {
        let Some(host) = self.host.clone() else {
            return Err(WebtapError::NoHost);
        };

        let mut active = self.lock_active();
        if active.is_some() {
            return Ok(ControlResult {
                ok: true,
                reason: Some("already-running".to_string()),
                state: self.state_of(active.as_ref()),
            });
        }

        let session = Arc::new(CaptureSession::new(
            &self.config.output_folder,
            self.config.redact_secrets,
        )?);

        let stamp = session
            .base_dir()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let txn_path = session.base_dir().join(format!("txns-{stamp}.ndjson"));
        if let Err(e) = session.start_ndjson(&txn_path) {
            warn!("Transactions stream unavailable: {e}");
        }

        let sink = self.build_sink(Arc::clone(&session));
        let saver = Self::build_saver(Arc::clone(&session));
        let engine = CaptureEngine::attach(
            EngineOptions::from_config(&self.config),
            Arc::clone(&sink),
            Some(saver),
        );

        if let Err(e) = host.install(LifecycleHooks::new(engine.clone())) {
            engine.detach();
            session.stop().ok();
            return Err(e);
        }

        let diagnostic = self.config.enable_cdp.then(|| self.diagnostic.clone()).flatten();
        let bridge = DiagnosticBridge::attach(diagnostic, sink);

        let started_at_ms = now_ms();
        *active = Some(ActiveCapture {
            session,
            engine,
            bridge,
            started_at_ms,
        });

        let state = self.state_of(active.as_ref());
        drop(active);

        info!("Capture started");
        self.broadcast(&state);
        Ok(ControlResult {
            ok: true,
            reason: None,
            state,
        })
    }

    /// Stop capturing, flushing all artifacts
    pub fn stop(&self) -> ControlResult {
        let taken = self.lock_active().take();

        let Some(capture) = taken else {
            return ControlResult {
                ok: false,
                reason: Some("not-running".to_string()),
                state: self.state(),
            };
        };

        capture.bridge.detach();
        if let Some(host) = &self.host {
            host.uninstall();
        }
        capture.engine.detach();
        if let Err(e) = capture.session.stop() {
            warn!("Archive finalization failed: {e}");
        }

        let state = self.state();
        info!("Capture stopped");
        self.broadcast(&state);
        ControlResult {
            ok: true,
            reason: None,
            state,
        }
    }

    /// Current capture state
    pub fn state(&self) -> CaptureState {
        let active = self.lock_active();
        self.state_of(active.as_ref())
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureState> {
        self.state_tx.subscribe()
    }

    /// Route a guest-originated event envelope
    ///
    /// Known REST and WebSocket channels are forwarded to the recorder and
    /// the inspector; anything else goes to the inspector only.
    pub fn from_webview(&self, envelope: &Envelope) {
        let session = self.lock_active().as_ref().map(|a| Arc::clone(&a.session));

        if let Some(session) = session {
            match envelope.channel.as_str() {
                "ws:open" | "ws:msg" | "ws:close" | "ws:error" => {
                    let kind = envelope.channel.trim_start_matches("ws:");
                    session.on_ws_event(kind, &envelope.payload);
                }
                "rest:request" => {
                    match serde_json::from_value::<RequestEvent>(envelope.payload.clone()) {
                        Ok(event) => session.on_rest_request(&event),
                        Err(e) => warn!("Malformed guest rest:request envelope: {e}"),
                    }
                }
                "rest:response" => {
                    match serde_json::from_value::<ResponseEvent>(envelope.payload.clone()) {
                        Ok(event) => session.on_rest_response(&event),
                        Err(e) => warn!("Malformed guest rest:response envelope: {e}"),
                    }
                }
                _ => {}
            }
        }

        (self.inspector)(&envelope.channel, &envelope.payload);
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveCapture>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state_of(&self, active: Option<&ActiveCapture>) -> CaptureState {
        match active {
            Some(capture) => CaptureState {
                capturing: true,
                base_dir: Some(capture.session.base_dir().to_string_lossy().into_owned()),
                started_at_ms: Some(capture.started_at_ms),
            },
            None => CaptureState {
                capturing: false,
                base_dir: None,
                started_at_ms: None,
            },
        }
    }

    fn broadcast(&self, state: &CaptureState) {
        self.state_tx.send(state.clone()).ok();
    }

    /// Sink fanning events out to the recorder and the inspector
    fn build_sink(&self, session: Arc<CaptureSession>) -> EventSink {
        let inspector = Arc::clone(&self.inspector);

        Arc::new(move |event: &CaptureEvent| {
            match event {
                CaptureEvent::Request(payload) | CaptureEvent::BeforeSendHeaders(payload) => {
                    session.on_rest_request(payload);
                }
                CaptureEvent::Response(payload) => {
                    if let Some(path) = &payload.body_file {
                        session.note_response_body(
                            &payload.method,
                            &payload.url,
                            SavedBody {
                                path: path.clone(),
                                size: payload.body_size,
                                content_type: payload.res_headers.get("content-type").cloned(),
                            },
                        );
                    }
                    session.on_rest_response(payload);
                }
                CaptureEvent::Transaction(txn) => {
                    session.push_txn_ndjson(txn);
                }
                CaptureEvent::Error(_)
                | CaptureEvent::WsFrame(_)
                | CaptureEvent::Initiator(_) => {}
            }

            inspector(event.channel(), &event.payload_json());
        })
    }

    /// Persistence callback backed by the session's bodies directory
    fn build_saver(session: Arc<CaptureSession>) -> BodySaver {
        Arc::new(move |id, bytes, content_type| session.save_body(id, bytes, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeHost {
        hooks: StdMutex<Option<LifecycleHooks>>,
        installed: StdMutex<bool>,
    }

    impl NavigationHost for FakeHost {
        fn install(&self, hooks: LifecycleHooks) -> Result<()> {
            *self.hooks.lock().unwrap() = Some(hooks);
            *self.installed.lock().unwrap() = true;
            Ok(())
        }

        fn uninstall(&self) {
            *self.installed.lock().unwrap() = false;
        }
    }

    fn collecting_inspector() -> (InspectorSink, Arc<StdMutex<Vec<String>>>) {
        let channels = Arc::new(StdMutex::new(Vec::new()));
        let sink_channels = Arc::clone(&channels);
        let inspector: InspectorSink = Arc::new(move |channel: &str, _payload: &Value| {
            sink_channels.lock().unwrap().push(channel.to_string());
        });
        (inspector, channels)
    }

    fn controller_with_host(temp_dir: &TempDir) -> (SessionController, Arc<FakeHost>) {
        let mut config = Config::default();
        config.output_folder = temp_dir.path().to_path_buf();

        let host = Arc::new(FakeHost::default());
        let (inspector, _) = collecting_inspector();
        let controller =
            SessionController::new(config, Some(Arc::clone(&host) as _), None, inspector);
        (controller, host)
    }

    #[test]
    fn test_start_without_host_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.output_folder = temp_dir.path().to_path_buf();

        let (inspector, _) = collecting_inspector();
        let controller = SessionController::new(config, None, None, inspector);

        assert!(matches!(controller.start(), Err(WebtapError::NoHost)));
    }

    #[test]
    fn test_stop_when_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let (controller, _host) = controller_with_host(&temp_dir);

        let result = controller.stop();
        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some("not-running"));
        assert!(!result.state.capturing);
    }

    #[test]
    fn test_start_is_idempotent_while_running() {
        let temp_dir = TempDir::new().unwrap();
        let (controller, host) = controller_with_host(&temp_dir);

        let first = controller.start().unwrap();
        assert!(first.ok);
        assert!(first.state.capturing);
        assert!(*host.installed.lock().unwrap());

        let second = controller.start().unwrap();
        assert!(second.ok);
        assert_eq!(second.reason.as_deref(), Some("already-running"));
        assert_eq!(second.state.base_dir, first.state.base_dir);

        controller.stop();
    }

    #[test]
    fn test_stop_uninstalls_and_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let (controller, host) = controller_with_host(&temp_dir);

        controller.start().unwrap();
        let hooks = host.hooks.lock().unwrap().clone().unwrap();

        hooks.on_before_request("r1", "GET", "https://api.test/a", None);
        hooks.on_headers_received("r1", 200, "OK", &[]);
        hooks.on_completed("r1", false);

        let result = controller.stop();
        assert!(result.ok);
        assert!(!*host.installed.lock().unwrap());

        // Callbacks after stop produce nothing
        hooks.on_before_request("r2", "GET", "https://api.test/b", None);

        // The archive landed on disk with one entry
        let har_path = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.is_dir())
            .map(|dir| {
                std::fs::read_dir(dir)
                    .unwrap()
                    .map(|e| e.unwrap().path())
                    .find(|p| p.extension().is_some_and(|ext| ext == "har"))
                    .unwrap()
            })
            .unwrap();
        let har: Value =
            serde_json::from_str(&std::fs::read_to_string(har_path).unwrap()).unwrap();
        assert_eq!(har["log"]["entries"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_broadcast() {
        let temp_dir = TempDir::new().unwrap();
        let (controller, _host) = controller_with_host(&temp_dir);

        let mut rx = controller.subscribe();
        controller.start().unwrap();
        controller.stop();

        let started = rx.recv().await.unwrap();
        assert!(started.capturing);
        let stopped = rx.recv().await.unwrap();
        assert!(!stopped.capturing);
    }

    #[test]
    fn test_envelope_routing() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.output_folder = temp_dir.path().to_path_buf();

        let host = Arc::new(FakeHost::default());
        let (inspector, channels) = collecting_inspector();
        let controller =
            SessionController::new(config, Some(host as _), None, inspector);

        controller.start().unwrap();
        controller.from_webview(&Envelope {
            channel: "ws:open".to_string(),
            payload: serde_json::json!({"ts": 1, "id": "w1", "url": "wss://a.test"}),
        });
        controller.from_webview(&Envelope {
            channel: "custom:thing".to_string(),
            payload: serde_json::json!({"x": 1}),
        });

        let base_dir = controller.state().base_dir.unwrap();
        controller.stop();

        // Both envelopes reached the inspector
        let seen = channels.lock().unwrap();
        assert!(seen.contains(&"ws:open".to_string()));
        assert!(seen.contains(&"custom:thing".to_string()));
        drop(seen);

        // Only the WS one reached the archive
        let ws_path = std::fs::read_dir(base_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.to_string_lossy().ends_with(".wslog.ndjson"))
            .unwrap();
        let content = std::fs::read_to_string(ws_path).unwrap();
        assert_eq!(content.lines().count(), 1);
        let line: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(line["type"], "open");
    }

    #[test]
    fn test_envelope_without_session_goes_to_inspector() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.output_folder = temp_dir.path().to_path_buf();

        let (inspector, channels) = collecting_inspector();
        let controller = SessionController::new(config, None, None, inspector);

        controller.from_webview(&Envelope {
            channel: "ws:msg".to_string(),
            payload: serde_json::json!({"ts": 1}),
        });

        assert_eq!(*channels.lock().unwrap(), vec!["ws:msg".to_string()]);
    }
}
