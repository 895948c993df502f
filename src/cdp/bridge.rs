//! Bridge from debugger-style messages to capture events
//!
//! Recovers initiator, redirect chains and WebSocket frame payloads. The
//! bridge is strictly additive: losing it degrades observability but never
//! corrupts REST capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::capture::event::{CaptureEvent, InitiatorEvent, RedirectHop, WsFrameEvent};
use crate::capture::EventSink;
use crate::fsutil::now_ms;
use crate::Result;

/// A debugger-style channel exposed by the navigation host
pub trait DiagnosticChannel: Send + Sync {
    /// Subscribe the handler to every channel message
    ///
    /// # Errors
    ///
    /// Returns error when the channel cannot attach (already claimed by
    /// another consumer, or protocol version mismatch)
    fn attach(&self, handler: Arc<dyn Fn(&Value) + Send + Sync>) -> Result<()>;

    /// Remove the subscription
    fn detach(&self);
}

/// Per-request initiator and redirect-chain state
struct RequestTrace {
    url: String,
    redirect_chain: Vec<RedirectHop>,
    initiator: Option<Value>,
}

/// Bridge between the diagnostic channel and the event sink
#[derive(Clone)]
pub struct DiagnosticBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    sink: EventSink,
    channel: Option<Arc<dyn DiagnosticChannel>>,
    requests: DashMap<String, RequestTrace>,
    ws_urls: DashMap<String, String>,
    attached: AtomicBool,
}

impl DiagnosticBridge {
    /// Attach to a diagnostic channel, degrading to a no-op on failure
    ///
    /// When `channel` is `None` or its attach fails, the returned bridge is
    /// already detached and ignores everything; the capture engine
    /// continues without it.
    pub fn attach(channel: Option<Arc<dyn DiagnosticChannel>>, sink: EventSink) -> Self {
        let bridge = Self {
            inner: Arc::new(BridgeInner {
                sink,
                channel: channel.clone(),
                requests: DashMap::new(),
                ws_urls: DashMap::new(),
                attached: AtomicBool::new(false),
            }),
        };

        let Some(channel) = channel else {
            debug!("No diagnostic channel configured");
            return bridge;
        };

        let handler_bridge = bridge.clone();
        let handler: Arc<dyn Fn(&Value) + Send + Sync> =
            Arc::new(move |message| handler_bridge.on_message(message));

        match channel.attach(handler) {
            Ok(()) => {
                bridge.inner.attached.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                warn!("Diagnostic channel unavailable, continuing without it: {e}");
            }
        }

        bridge
    }

    /// True while the channel subscription is live
    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::SeqCst)
    }

    /// Detach from the channel and clear state; idempotent
    pub fn detach(&self) {
        if !self.inner.attached.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(channel) = &self.inner.channel {
            channel.detach();
        }
        self.inner.requests.clear();
        self.inner.ws_urls.clear();
        debug!("Diagnostic bridge detached");
    }

    /// Invoke the sink, discarding anything it throws
    fn emit(&self, event: &CaptureEvent) {
        let sink = &self.inner.sink;
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink(event))).is_err() {
            warn!("Event sink panicked on {}; discarded", event.channel());
        }
    }

    /// Dispatch one channel message
    ///
    /// Unknown message kinds are ignored; malformed payloads degrade to
    /// whatever fields are present.
    pub fn on_message(&self, message: &Value) {
        if !self.is_attached() {
            return;
        }

        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return;
        };
        let params = message.get("params").unwrap_or(&Value::Null);

        match method {
            "Network.requestWillBeSent" => self.on_request_will_be_sent(params),
            "Network.webSocketCreated" => self.on_web_socket_created(params),
            "Network.webSocketFrameSent" => self.on_web_socket_frame(params, "out"),
            "Network.webSocketFrameReceived" => self.on_web_socket_frame(params, "in"),
            _ => {}
        }
    }

    fn on_request_will_be_sent(&self, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let url = params
            .pointer("/request/url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let initiator = params.get("initiator").filter(|v| !v.is_null()).cloned();

        let mut trace = self
            .inner
            .requests
            .entry(request_id.to_string())
            .or_insert_with(|| RequestTrace {
                url: url.clone(),
                redirect_chain: Vec::new(),
                initiator: None,
            });

        if let Some(redirect) = params.get("redirectResponse").filter(|v| !v.is_null()) {
            let status = redirect.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
            let from = trace.url.clone();
            trace.redirect_chain.push(RedirectHop {
                from,
                to: url.clone(),
                status,
            });
        }

        trace.url.clone_from(&url);
        if initiator.is_some() {
            trace.initiator = initiator;
        }

        let event = InitiatorEvent {
            request_id: request_id.to_string(),
            url,
            redirect_chain: trace.redirect_chain.clone(),
            initiator: trace.initiator.clone(),
        };
        drop(trace);

        self.emit(&CaptureEvent::Initiator(event));
    }

    fn on_web_socket_created(&self, params: &Value) {
        let (Some(request_id), Some(url)) = (
            params.get("requestId").and_then(Value::as_str),
            params.get("url").and_then(Value::as_str),
        ) else {
            return;
        };

        self.inner
            .ws_urls
            .insert(request_id.to_string(), url.to_string());
    }

    fn on_web_socket_frame(&self, params: &Value, direction: &str) {
        let url = params
            .get("requestId")
            .and_then(Value::as_str)
            .and_then(|id| self.inner.ws_urls.get(id).map(|entry| entry.value().clone()));

        let op_code = params
            .pointer("/response/opcode")
            .and_then(Value::as_u64)
            .map(|op| op as u8);
        let data = params
            .pointer("/response/payloadData")
            .and_then(Value::as_str)
            .map(str::to_string);

        self.emit(&CaptureEvent::WsFrame(WsFrameEvent {
            ts: now_ms(),
            direction: direction.to_string(),
            url,
            op_code,
            data,
        }));
    }
}
