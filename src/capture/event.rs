//! Emitted event payloads
//!
//! Events are a tagged union; the channel string is a rendering concern at
//! the IPC boundary, not part of the core types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{CorsAllow, SetCookie, Transaction};
use crate::token::JwtInfo;

/// Payload for `rest:request` and `rest:before-send-headers`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    /// Milliseconds since epoch
    pub ts: u64,
    /// Full URL
    pub url: String,
    /// Normalized method
    pub method: String,
    /// Whitelisted request headers
    pub req_headers: BTreeMap<String, String>,
    /// UTF-8 body preview, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_body: Option<String>,
    /// Full body length in bytes; the preview may be truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_len: Option<usize>,
    /// Redacted bearer-token info, once detected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtInfo>,
}

/// Payload for `rest:response`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    /// Milliseconds since epoch at completion
    pub ts: u64,
    /// Full URL
    pub url: String,
    /// Normalized method
    pub method: String,
    /// Status code
    pub status: u16,
    /// Status text
    pub status_text: String,
    /// Whitelisted response headers
    pub res_headers: BTreeMap<String, String>,
    /// Decoded body size in bytes
    pub body_size: usize,
    /// Total duration in milliseconds
    pub timing_ms: u64,
    /// Parsed `Set-Cookie` lines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_cookies: Vec<SetCookie>,
    /// Grouped CORS allow fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_allow: Option<CorsAllow>,
    /// Path of the persisted body file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_file: Option<String>,
    /// Redacted bearer-token info found in the body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtInfo>,
}

/// Payload for `rest:error`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Milliseconds since epoch
    pub ts: u64,
    /// Full URL, when known
    pub url: String,
    /// Normalized method
    pub method: String,
    /// Whitelisted request headers
    pub req_headers: BTreeMap<String, String>,
    /// Host-reported error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for `ws:frame`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsFrameEvent {
    /// Milliseconds since epoch
    pub ts: u64,
    /// `"in"` or `"out"`
    pub direction: String,
    /// Socket URL, when the creation event was observed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// WebSocket opcode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_code: Option<u8>,
    /// Frame payload data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// One hop of a redirect chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectHop {
    /// URL redirected from
    pub from: String,
    /// URL redirected to
    pub to: String,
    /// Redirect status code
    pub status: u16,
}

/// Payload for `cdp:initiator`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatorEvent {
    /// Host-assigned request id
    pub request_id: String,
    /// Current URL of the request
    pub url: String,
    /// Accumulated redirect chain
    #[serde(default)]
    pub redirect_chain: Vec<RedirectHop>,
    /// Initiator descriptor, as reported by the diagnostic channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator: Option<Value>,
}

/// Every event the pipeline can emit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CaptureEvent {
    /// A request was created
    Request(RequestEvent),
    /// Request headers are about to be sent
    BeforeSendHeaders(RequestEvent),
    /// A response completed
    Response(ResponseEvent),
    /// A request terminated with an error
    Error(ErrorEvent),
    /// An aggregated transaction completed
    Transaction(Box<Transaction>),
    /// A WebSocket frame was observed on the diagnostic channel
    WsFrame(WsFrameEvent),
    /// Initiator / redirect-chain metadata arrived
    Initiator(InitiatorEvent),
}

impl CaptureEvent {
    /// Serialize the inner payload (without the tag) for the IPC boundary
    ///
    /// A payload that cannot serialize is replaced with a sentinel object
    /// rather than failing the emission.
    pub fn payload_json(&self) -> Value {
        let result = match self {
            Self::Request(p) | Self::BeforeSendHeaders(p) => serde_json::to_value(p),
            Self::Response(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
            Self::Transaction(p) => serde_json::to_value(p),
            Self::WsFrame(p) => serde_json::to_value(p),
            Self::Initiator(p) => serde_json::to_value(p),
        };
        result.unwrap_or_else(|_| serde_json::json!({"_unserializable": true}))
    }

    /// Channel name used at the IPC boundary
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Request(_) => "rest:request",
            Self::BeforeSendHeaders(_) => "rest:before-send-headers",
            Self::Response(_) => "rest:response",
            Self::Error(_) => "rest:error",
            Self::Transaction(_) => "rest:txn",
            Self::WsFrame(_) => "ws:frame",
            Self::Initiator(_) => "cdp:initiator",
        }
    }
}
