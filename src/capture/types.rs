//! Captured-traffic data model
//!
//! Plain records keyed by the host-assigned request id. The engine's maps
//! and the aggregator never share references: values are cloned across the
//! boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::token::JwtInfo;

/// Normalized HTTP method
///
/// Methods outside this set are coerced to `Get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
}

impl Method {
    /// Normalize a raw method string, coercing unknown methods to GET
    pub fn normalize(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            _ => Self::Get,
        }
    }

    /// Canonical upper-case rendering
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response timing in milliseconds since epoch
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    /// Populated on request creation
    pub start_ts: u64,
    /// Set when the first response byte arrives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_byte_ts: Option<u64>,
    /// Set on terminal completion or error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<u64>,
}

/// CORS metadata attached to a request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorsInfo {
    /// True when a matching preflight preceded this request
    pub preflight: bool,
    /// Origin advertised by the preflight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Grouped `Access-Control-Allow-*` response fields
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorsAllow {
    /// `Access-Control-Allow-Origin`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// `Access-Control-Allow-Methods`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<String>,
    /// `Access-Control-Allow-Headers`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<String>,
    /// `Access-Control-Allow-Credentials`, parsed as boolean
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<bool>,
}

impl CorsAllow {
    /// True when no allow field was present
    pub fn is_empty(&self) -> bool {
        self.origin.is_none()
            && self.methods.is_none()
            && self.headers.is_none()
            && self.credentials.is_none()
    }
}

/// A cookie flag value: bare flags are booleans, valued flags are strings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CookieFlag {
    /// Bare flag such as `Secure` or `HttpOnly`
    Bool(bool),
    /// Valued flag such as `Path=/` or `Max-Age=60`
    Str(String),
}

/// One parsed `Set-Cookie` line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetCookie {
    /// Cookie name
    pub name: String,
    /// Cookie value (redacted when secret redaction is enabled)
    pub value: String,
    /// Cookie flags, names lowercased
    pub flags: BTreeMap<String, CookieFlag>,
}

/// A captured request, identified by the host-assigned request id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    /// Stable request id assigned by the navigation host
    pub id: String,
    /// Normalized method
    pub method: Method,
    /// Full URL
    pub url: String,
    /// Host, including port when present
    pub host: String,
    /// URL path
    pub path: String,
    /// Parsed query mapping
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    /// Whitelisted headers, keys lowercased
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Timing triple
    pub timing: Timing,
    /// Raw upload bytes, when synchronously available; never serialized
    #[serde(skip)]
    pub body: Option<Vec<u8>>,
    /// UTF-8 preview of the body, at most 512 characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
    /// CORS correlation metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsInfo>,
    /// Redacted bearer-token info found in the authorization header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtInfo>,
}

/// A captured response, sharing its id with the request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedResponse {
    /// Request id
    pub id: String,
    /// Status code
    pub status: u16,
    /// Status text
    pub status_text: String,
    /// Whitelisted headers, keys lowercased
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Content type, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Body size in bytes after content decoding
    pub body_size: usize,
    /// Decoded body bytes, when the tap observed them; never serialized
    #[serde(skip)]
    pub body: Option<Vec<u8>>,
    /// UTF-8 preview of the decoded body, at most 512 characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
    /// Timing triple (with first byte when streamed)
    pub timing: Timing,
    /// True when the host served the response from cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<bool>,
    /// Path of the persisted body file, when one was saved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_file: Option<String>,
    /// Grouped CORS allow fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_allow: Option<CorsAllow>,
    /// Parsed `Set-Cookie` lines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_cookies: Vec<SetCookie>,
    /// Redacted bearer-token info found in the response body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtInfo>,
}

/// Aggregate of a request and its optional response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Request id
    pub id: String,
    /// Normalized method
    pub method: Method,
    /// Host, including port when present
    pub host: String,
    /// URL path
    pub path: String,
    /// Route key grouping requests that differ only in variable segments
    pub route_key: String,
    /// Raw query string, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// The request (owned by value)
    pub request: CapturedRequest,
    /// The response, once it arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,
    /// Total duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Time to first byte in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<u64>,
    /// Receive duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive_ms: Option<u64>,
}

/// Descriptor for a persisted response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedBody {
    /// Absolute path of the saved file
    pub path: String,
    /// Size in bytes
    pub size: usize,
    /// Content type, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Extract a UTF-8 preview of at most 512 characters
pub fn body_preview(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    let text = String::from_utf8_lossy(bytes);
    Some(text.chars().take(super::PREVIEW_MAX_CHARS).collect())
}
