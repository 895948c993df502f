//! Capture session recorder
//!
//! Owns one session's on-disk artifacts: the HAR archive for REST
//! transactions, an append stream of WebSocket events, an optional append
//! stream of aggregated transactions, and a directory of saved response
//! bodies. All writes are single-writer: the HAR is appended only from
//! `on_rest_response`, the WS stream only from `on_ws_event`.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::har::{self, Har};
use super::redact::{
    redact_bearer_substrings, redact_body_text, redact_header_value, COOKIE_SENTINEL,
};
use crate::capture::event::{RequestEvent, ResponseEvent};
use crate::capture::types::{SavedBody, Transaction};
use crate::fsutil::{ensure_directory, now_ms, open_append_stream, sanitize_file_id, timestamp, write_json_line};
use crate::{Result, WebtapError};

/// Lock a mutex, recovering the data if a writer panicked mid-update
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A request remembered for pairing with its response
#[derive(Debug, Clone)]
struct PendingRequest {
    ts: u64,
    headers: Vec<(String, String)>,
    body_preview: Option<String>,
    body_len: Option<usize>,
    content_type: Option<String>,
}

/// Recorder for one capture session's artifacts
pub struct CaptureSession {
    base_dir: PathBuf,
    bodies_dir: PathBuf,
    har_path: PathBuf,
    redact: bool,
    har: Mutex<Har>,
    ws_stream: Mutex<Option<File>>,
    txn_stream: Mutex<Option<File>>,
    pending: Mutex<HashMap<(String, String), PendingRequest>>,
    saved: Mutex<HashMap<(String, String), SavedBody>>,
}

impl CaptureSession {
    /// Create the session's directory tree and open its streams
    ///
    /// Produces `<output>/<timestamp>/` containing `rest-<timestamp>.har`,
    /// `ws-<timestamp>.wslog.ndjson` and `bodies-<timestamp>/`.
    ///
    /// # Errors
    ///
    /// Returns error if directories or streams cannot be created
    pub fn new(output_folder: &Path, redact: bool) -> Result<Self> {
        let stamp = timestamp();
        let base_dir = output_folder.join(&stamp);
        let bodies_dir = base_dir.join(format!("bodies-{stamp}"));
        ensure_directory(&bodies_dir)?;

        let har_path = base_dir.join(format!("rest-{stamp}.har"));
        let ws_path = base_dir.join(format!("ws-{stamp}.wslog.ndjson"));
        let ws_stream = open_append_stream(&ws_path)?;

        let started = Utc::now().to_rfc3339();
        let har = Har::new("page_1", &started, &format!("capture {stamp}"));

        info!("Capture session recording to {}", base_dir.display());

        Ok(Self {
            base_dir,
            bodies_dir,
            har_path,
            redact,
            har: Mutex::new(har),
            ws_stream: Mutex::new(Some(ws_stream)),
            txn_stream: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            saved: Mutex::new(HashMap::new()),
        })
    }

    /// Session base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the HAR archive
    pub fn har_path(&self) -> &Path {
        &self.har_path
    }

    /// Number of entries currently in the archive
    pub fn entry_count(&self) -> usize {
        self.lock_har().log.entries.len()
    }

    fn lock_har(&self) -> std::sync::MutexGuard<'_, Har> {
        lock(&self.har)
    }

    /// Remember a request for pairing with the next response of the same
    /// `(method, url)`; retries overwrite
    pub fn on_rest_request(&self, event: &RequestEvent) {
        let key = (event.method.clone(), event.url.clone());
        let pending = PendingRequest {
            ts: event.ts,
            headers: event
                .req_headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            body_preview: event.req_body.clone(),
            body_len: event.body_len,
            content_type: event.req_headers.get("content-type").cloned(),
        };

        lock(&self.pending).insert(key, pending);
    }

    /// Write bytes to the bodies directory and return a descriptor
    ///
    /// # Errors
    ///
    /// Propagates I/O failure; the caller must not attach the descriptor
    /// when this fails
    pub fn save_body(
        &self,
        id_hint: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<SavedBody> {
        let file_name = format!("{}_{}.bin", now_ms(), sanitize_file_id(id_hint));
        let path = self.bodies_dir.join(file_name);
        std::fs::write(&path, bytes)?;

        debug!("Saved response body ({} bytes) to {}", bytes.len(), path.display());

        Ok(SavedBody {
            path: path.to_string_lossy().into_owned(),
            size: bytes.len(),
            content_type: content_type.map(str::to_string),
        })
    }

    /// Record a descriptor to be attached to the next matching response
    pub fn note_response_body(&self, method: &str, url: &str, descriptor: SavedBody) {
        lock(&self.saved).insert((method.to_string(), url.to_string()), descriptor);
    }

    /// Append a HAR entry for a completed response
    ///
    /// Pairs with the most recent request of the same `(method, url)`. If
    /// no request was seen, the entry start time is reconstructed as
    /// `ts - timingMs`. The pending request and any saved-body descriptor
    /// are consumed.
    pub fn on_rest_response(&self, event: &ResponseEvent) {
        let key = (event.method.clone(), event.url.clone());
        let pending = lock(&self.pending).remove(&key);
        let descriptor = lock(&self.saved).remove(&key);

        let started_ts = pending
            .as_ref()
            .map_or_else(|| event.ts.saturating_sub(event.timing_ms), |p| p.ts);

        let entry = self.build_entry(event, pending.as_ref(), descriptor.as_ref(), started_ts);
        self.lock_har().log.entries.push(entry);
    }

    fn build_entry(
        &self,
        event: &ResponseEvent,
        pending: Option<&PendingRequest>,
        descriptor: Option<&SavedBody>,
        started_ts: u64,
    ) -> har::Entry {
        let query_string = Url::parse(&event.url)
            .map(|url| {
                url.query_pairs()
                    .map(|(name, value)| har::Header {
                        name: name.into_owned(),
                        value: value.into_owned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let req_headers = pending
            .map(|p| {
                p.headers
                    .iter()
                    .map(|(name, value)| har::Header {
                        name: name.clone(),
                        value: if self.redact {
                            redact_header_value(name, value)
                        } else {
                            value.clone()
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        let post_data = pending.and_then(|p| {
            let text = p.body_preview.as_ref()?;
            let text = if self.redact {
                redact_body_text(text, p.content_type.as_deref())
            } else {
                text.clone()
            };
            Some(har::PostData {
                mime_type: p.content_type.clone().unwrap_or_default(),
                text,
            })
        });

        let res_headers = event
            .res_headers
            .iter()
            .map(|(name, value)| har::Header {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();

        let cookies = event
            .set_cookies
            .iter()
            .map(|cookie| har::Cookie {
                name: cookie.name.clone(),
                value: if self.redact {
                    COOKIE_SENTINEL.to_string()
                } else {
                    cookie.value.clone()
                },
            })
            .collect();

        let mime_type = event
            .res_headers
            .get("content-type")
            .cloned()
            .unwrap_or_default();

        // Saved-body references are relative to the archive base
        let file = descriptor.map(|saved| {
            Path::new(&saved.path)
                .strip_prefix(&self.base_dir)
                .map_or_else(|_| saved.path.clone(), |p| p.to_string_lossy().into_owned())
        });

        har::Entry {
            pageref: "page_1".to_string(),
            started_date_time: rfc3339_ms(started_ts),
            time: event.timing_ms as f64,
            request: har::Request {
                method: event.method.clone(),
                url: event.url.clone(),
                http_version: har::HTTP_VERSION.to_string(),
                cookies: Vec::new(),
                headers: req_headers,
                query_string,
                post_data,
                headers_size: -1,
                // The preview may be truncated; prefer the full byte length
                body_size: pending
                    .and_then(|p| p.body_len.or_else(|| p.body_preview.as_ref().map(String::len)))
                    .map_or(0, |len| len as i64),
            },
            response: har::Response {
                status: i64::from(event.status),
                status_text: event.status_text.clone(),
                http_version: har::HTTP_VERSION.to_string(),
                cookies,
                headers: res_headers,
                content: har::Content {
                    size: event.body_size as i64,
                    mime_type,
                    file,
                },
                redirect_url: String::new(),
                headers_size: -1,
                body_size: event.body_size as i64,
                redacted: self.redact.then_some(true),
            },
            cache: serde_json::json!({}),
            // The per-event payload carries no first-byte stamp; missing
            // phases are zero, never null
            timings: har::timings_from(event.timing_ms, None),
        }
    }

    /// Append one WebSocket event as a JSON line `{type, ...payload}`
    ///
    /// Errors are swallowed and logged; a closed stream drops the event.
    pub fn on_ws_event(&self, kind: &str, payload: &Value) {
        let mut line = match payload {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other.clone());
                map
            }
        };
        line.insert("type".to_string(), Value::String(kind.to_string()));

        let mut guard = lock(&self.ws_stream);
        match guard.as_mut() {
            Some(stream) => write_json_line(stream, &Value::Object(line)),
            None => debug!("WS stream closed, dropping {kind} event"),
        }
    }

    /// Open the aggregated-transactions NDJSON stream
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be opened
    pub fn start_ndjson(&self, path: &Path) -> Result<()> {
        let stream = open_append_stream(path)?;
        *lock(&self.txn_stream) = Some(stream);
        Ok(())
    }

    /// Append one transaction per line; a silent no-op while no stream is
    /// open
    pub fn push_txn_ndjson(&self, txn: &Transaction) {
        let mut guard = lock(&self.txn_stream);
        let Some(stream) = guard.as_mut() else {
            return;
        };

        if !self.redact {
            write_json_line(stream, txn);
            return;
        }

        let mut txn = txn.clone();
        if let Some(preview) = txn.request.body_preview.take() {
            let content_type = txn.request.headers.get("content-type").map(String::as_str);
            txn.request.body_preview = Some(redact_body_text(&preview, content_type));
        }
        if let Some(response) = txn.response.as_mut() {
            if let Some(preview) = response.body_preview.take() {
                response.body_preview = Some(redact_bearer_substrings(&preview));
            }
        }
        write_json_line(stream, &txn);
    }

    /// Close the aggregated-transactions stream
    pub fn stop_ndjson(&self) {
        *lock(&self.txn_stream) = None;
    }

    /// Flush the HAR archive and close all streams
    ///
    /// Each close and write is independently guarded; a failing archive
    /// write still closes the streams.
    pub fn stop(&self) -> Result<()> {
        let result = self.write_har();

        *lock(&self.ws_stream) = None;
        self.stop_ndjson();
        lock(&self.pending).clear();
        lock(&self.saved).clear();

        info!("Capture session stopped, archive at {}", self.har_path.display());
        result
    }

    fn write_har(&self) -> Result<()> {
        let har = self.lock_har();
        let json = serde_json::to_string_pretty(&*har)
            .map_err(|e| WebtapError::ArchiveError(format!("HAR serialization failed: {e}")))?;

        if let Err(e) = std::fs::write(&self.har_path, json) {
            warn!("Failed to write HAR archive: {e}");
            return Err(e.into());
        }
        Ok(())
    }
}

/// Render epoch milliseconds as RFC 3339
fn rfc3339_ms(ts: u64) -> String {
    Utc.timestamp_millis_opt(ts as i64)
        .single()
        .map_or_else(String::new, |dt| dt.to_rfc3339())
}
