//! HAR 1.2 archive model
//!
//! One page per session, one entry per completed REST transaction. Two
//! custom extensions: `response.content._file` references a saved body
//! relative to the archive base, and `response._redacted` marks entries
//! written with secret redaction enabled.

use serde::{Deserialize, Serialize};

/// Archive creator name
pub const CREATOR_NAME: &str = "webtap";

/// The navigation host does not expose the negotiated protocol version;
/// known limitation.
pub const HTTP_VERSION: &str = "HTTP/2.0";

/// Top-level HAR object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Har {
    /// Main log object
    pub log: Log,
}

/// Main HAR log object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    /// Format version
    pub version: String,
    /// Producing tool
    pub creator: Creator,
    /// Browsed pages (always exactly one per session)
    pub pages: Vec<Page>,
    /// One entry per completed REST transaction
    pub entries: Vec<Entry>,
}

/// Creator information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creator {
    /// Tool name
    pub name: String,
    /// Tool version
    pub version: String,
}

/// Page information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// RFC 3339 session start
    #[serde(rename = "startedDateTime")]
    pub started_date_time: String,
    /// Page id referenced by entries
    pub id: String,
    /// Page title
    pub title: String,
    /// Page timings (unknown; zeroed)
    #[serde(rename = "pageTimings")]
    pub page_timings: PageTimings,
}

/// Page timing information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageTimings {
    /// Content-load offset
    #[serde(rename = "onContentLoad")]
    pub on_content_load: f64,
    /// Load offset
    #[serde(rename = "onLoad")]
    pub on_load: f64,
}

/// One HTTP transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Owning page id
    pub pageref: String,
    /// RFC 3339 request start
    #[serde(rename = "startedDateTime")]
    pub started_date_time: String,
    /// Total elapsed milliseconds
    pub time: f64,
    /// Request half
    pub request: Request,
    /// Response half
    pub response: Response,
    /// Cache info (unused)
    pub cache: serde_json::Value,
    /// Phase timings; missing phases are zero, never null
    pub timings: Timings,
}

/// HTTP request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Method
    pub method: String,
    /// Full URL
    pub url: String,
    /// Protocol version
    #[serde(rename = "httpVersion")]
    pub http_version: String,
    /// Request cookies (not captured separately)
    pub cookies: Vec<Cookie>,
    /// Whitelisted headers
    pub headers: Vec<Header>,
    /// Parsed query parameters
    #[serde(rename = "queryString")]
    pub query_string: Vec<Header>,
    /// Body, when captured
    #[serde(rename = "postData", skip_serializing_if = "Option::is_none")]
    pub post_data: Option<PostData>,
    /// Header bytes (unknown)
    #[serde(rename = "headersSize")]
    pub headers_size: i64,
    /// Body bytes
    #[serde(rename = "bodySize")]
    pub body_size: i64,
}

/// HTTP response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Status code
    pub status: i64,
    /// Status text
    #[serde(rename = "statusText")]
    pub status_text: String,
    /// Protocol version
    #[serde(rename = "httpVersion")]
    pub http_version: String,
    /// Parsed (and possibly redacted) cookies
    pub cookies: Vec<Cookie>,
    /// Whitelisted headers
    pub headers: Vec<Header>,
    /// Body descriptor
    pub content: Content,
    /// Redirect target
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    /// Header bytes (unknown)
    #[serde(rename = "headersSize")]
    pub headers_size: i64,
    /// Body bytes
    #[serde(rename = "bodySize")]
    pub body_size: i64,
    /// Set when secret redaction was enabled for this session
    #[serde(rename = "_redacted", skip_serializing_if = "Option::is_none")]
    pub redacted: Option<bool>,
}

/// Name/value pair for headers and query parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    /// Name
    pub name: String,
    /// Value
    pub value: String,
}

/// Cookie record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value (redacted when enabled)
    pub value: String,
}

/// Request body descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostData {
    /// Content type
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Body text (redacted when enabled)
    pub text: String,
}

/// Response body descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    /// Decoded size in bytes
    pub size: i64,
    /// Content type
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Path of the saved body, relative to the archive base
    #[serde(rename = "_file", skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Har {
    /// Create an empty archive with its single page
    pub fn new(page_id: &str, started: &str, title: &str) -> Self {
        Self {
            log: Log {
                version: "1.2".to_string(),
                creator: Creator {
                    name: CREATOR_NAME.to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                pages: vec![Page {
                    started_date_time: started.to_string(),
                    id: page_id.to_string(),
                    title: title.to_string(),
                    page_timings: PageTimings::default(),
                }],
                entries: Vec::new(),
            },
        }
    }
}

/// Build HAR phase timings from a total duration and optional first-byte
/// offset; missing phases are zero
pub fn timings_from(duration_ms: u64, ttfb_ms: Option<u64>) -> Timings {
    match ttfb_ms {
        Some(ttfb) => Timings {
            send: 0.0,
            wait: ttfb as f64,
            receive: duration_ms.saturating_sub(ttfb) as f64,
        },
        None => Timings {
            send: 0.0,
            wait: duration_ms as f64,
            receive: 0.0,
        },
    }
}

/// Phase timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timings {
    /// Send phase
    pub send: f64,
    /// Wait (time to first byte)
    pub wait: f64,
    /// Receive phase
    pub receive: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_har_has_one_page() {
        let har = Har::new("page_1", "2024-01-01T00:00:00Z", "session");
        assert_eq!(har.log.version, "1.2");
        assert_eq!(har.log.pages.len(), 1);
        assert!(har.log.entries.is_empty());
    }

    #[test]
    fn test_timings_without_first_byte() {
        let timings = timings_from(120, None);
        assert_eq!(timings.send, 0.0);
        assert_eq!(timings.wait, 120.0);
        assert_eq!(timings.receive, 0.0);
    }

    #[test]
    fn test_timings_with_first_byte() {
        let timings = timings_from(120, Some(30));
        assert_eq!(timings.wait, 30.0);
        assert_eq!(timings.receive, 90.0);
    }

    #[test]
    fn test_custom_extension_field_names() {
        let response = Response {
            status: 200,
            status_text: "OK".to_string(),
            http_version: HTTP_VERSION.to_string(),
            cookies: Vec::new(),
            headers: Vec::new(),
            content: Content {
                size: 5,
                mime_type: "text/plain".to_string(),
                file: Some("bodies-x/1_r1.bin".to_string()),
            },
            redirect_url: String::new(),
            headers_size: -1,
            body_size: 5,
            redacted: Some(true),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["_redacted"], true);
        assert_eq!(json["content"]["_file"], "bodies-x/1_r1.bin");
        assert_eq!(json["httpVersion"], "HTTP/2.0");
    }
}
