//! In-memory transaction correlation
//!
//! One open transaction per request id until its response (or terminal
//! error) arrives. Route keys group requests whose paths differ only in
//! variable segments; the host is included so sites do not collapse
//! together.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::capture::types::{CapturedRequest, CapturedResponse, Transaction};
use crate::token::JwtInfo;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("valid uuid pattern")
});

static LONG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{8,}").expect("valid long pattern"));

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid id pattern"));

/// Digit runs are tokenized before this rule fires, so it matches the
/// substituted shape of an ISO-8601 date, optionally with a time part.
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?::long|:id)-:id-:id(?:T:id(?:::id){1,2}(?:\.:id)?Z?)?")
        .expect("valid date pattern")
});

/// Normalize a path by collapsing volatile segments
///
/// Applies, in order: UUIDs to `:uuid`, runs of 8+ digits to `:long`,
/// remaining digit runs to `:id`, ISO-8601-like dates to `:date`.
/// Idempotent: applying it to its own output is a fixed point.
pub fn compute_route_key(path: &str) -> String {
    let step = UUID_RE.replace_all(path, ":uuid");
    let step = LONG_RE.replace_all(&step, ":long");
    let step = ID_RE.replace_all(&step, ":id");
    DATE_RE.replace_all(&step, ":date").into_owned()
}

/// Derive the `#<operation>` suffix for a JSON RPC-over-HTTP request
///
/// Recognizes the GraphQL shape: an `operationName` field, or a persisted
/// query hash under `extensions.persistedQuery.sha256Hash`.
fn rpc_operation_suffix(content_type: Option<&str>, body_text: Option<&str>) -> Option<String> {
    if !content_type?.contains("json") {
        return None;
    }

    let value: Value = serde_json::from_str(body_text?).ok()?;

    if let Some(name) = value.get("operationName").and_then(Value::as_str) {
        if !name.is_empty() {
            return Some(format!("#{name}"));
        }
    }

    let hash = value
        .get("extensions")?
        .get("persistedQuery")?
        .get("sha256Hash")?
        .as_str()?;
    let prefix: String = hash.chars().take(8).collect();
    (!prefix.is_empty()).then(|| format!("#persisted:{prefix}"))
}

/// Route key for a request: host + normalized path + RPC operation suffix
fn derive_route_key(
    host: &str,
    path: &str,
    content_type: Option<&str>,
    body_text: Option<&str>,
) -> String {
    let mut route_key = format!("{host}{}", compute_route_key(path));
    if let Some(suffix) = rpc_operation_suffix(content_type, body_text) {
        route_key.push_str(&suffix);
    }
    route_key
}

/// Correlator of requests and responses by request id
#[derive(Debug, Default)]
pub struct TransactionAggregator {
    index: HashMap<String, usize>,
    ordered: Vec<Transaction>,
}

impl TransactionAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction for a request and return a copy of it
    ///
    /// A repeated id (redirect retry) updates the existing transaction in
    /// place without disturbing the insertion order.
    pub fn on_request(&mut self, req: &CapturedRequest) -> Transaction {
        let route_key = derive_route_key(
            &req.host,
            &req.path,
            req.headers.get("content-type").map(String::as_str),
            req.body_preview.as_deref(),
        );

        let query = Url::parse(&req.url)
            .ok()
            .and_then(|u| u.query().map(str::to_string));

        let txn = Transaction {
            id: req.id.clone(),
            method: req.method,
            host: req.host.clone(),
            path: req.path.clone(),
            route_key,
            query,
            request: req.clone(),
            response: None,
            duration_ms: None,
            ttfb_ms: None,
            receive_ms: None,
        };

        match self.index.get(&req.id) {
            Some(&pos) => {
                self.ordered[pos] = txn.clone();
            }
            None => {
                self.index.insert(req.id.clone(), self.ordered.len());
                self.ordered.push(txn.clone());
            }
        }

        txn
    }

    /// Attach bearer-token info to an open transaction's request
    ///
    /// Idempotent; a missing id is ignored.
    pub fn patch_request_token(&mut self, id: &str, jwt: JwtInfo) {
        if let Some(&pos) = self.index.get(id) {
            self.ordered[pos].request.jwt = Some(jwt);
        }
    }

    /// Attach the filtered headers to an open transaction's request and
    /// re-derive its route key
    ///
    /// Headers (and with them the content type) only become known at the
    /// before-send-headers stage, after the transaction was opened; the
    /// RPC operation suffix can first be computed here. Idempotent; a
    /// missing id is ignored.
    pub fn patch_request_headers(
        &mut self,
        id: &str,
        headers: &std::collections::BTreeMap<String, String>,
    ) {
        if let Some(&pos) = self.index.get(id) {
            let txn = &mut self.ordered[pos];
            txn.request.headers = headers.clone();
            txn.route_key = derive_route_key(
                &txn.host,
                &txn.path,
                headers.get("content-type").map(String::as_str),
                txn.request.body_preview.as_deref(),
            );
        }
    }

    /// Attach a response and derive timings; returns a copy of the
    /// completed transaction
    ///
    /// A response with no matching request is silently dropped (late or
    /// duplicate delivery).
    pub fn on_response(&mut self, resp: &CapturedResponse) -> Option<Transaction> {
        let Some(&pos) = self.index.get(&resp.id) else {
            debug!("Dropping response for unknown request id {}", resp.id);
            return None;
        };

        let txn = &mut self.ordered[pos];
        let timing = resp.timing;
        txn.response = Some(resp.clone());

        if let Some(end) = timing.end_ts {
            let start = timing.start_ts;
            let duration = end.saturating_sub(start);
            txn.duration_ms = Some(duration);

            if let Some(first_byte) = timing.first_byte_ts {
                let ttfb = first_byte.saturating_sub(start);
                txn.ttfb_ms = Some(ttfb);
                txn.receive_ms = Some(duration.saturating_sub(ttfb));
            }
        }

        Some(txn.clone())
    }

    /// All transactions in request-creation order
    pub fn transactions(&self) -> &[Transaction] {
        &self.ordered
    }

    /// Number of open and completed transactions
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// True when no transaction has been recorded
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Clear all state; called at session boundaries
    pub fn reset(&mut self) {
        self.index.clear();
        self.ordered.clear();
    }
}
