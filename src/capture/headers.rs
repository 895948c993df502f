//! Header whitelisting, cookie parsing and CORS extraction

use std::collections::BTreeMap;

use super::types::{CookieFlag, CorsAllow, SetCookie};

/// Request headers retained by default
const REQUEST_WHITELIST: &[&str] = &[
    "content-type",
    "content-length",
    "accept",
    "accept-encoding",
    "user-agent",
    "origin",
    "referer",
    "host",
    "cache-control",
    "pragma",
];

/// Headers that join the retained set only when redaction is disabled
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie"];

fn is_whitelisted(name: &str, redact: bool) -> bool {
    REQUEST_WHITELIST.contains(&name) || (!redact && SENSITIVE_HEADERS.contains(&name))
}

/// Filter request headers through the whitelist, lowercasing keys
pub fn filter_request_headers(
    headers: &[(String, String)],
    redact: bool,
) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            is_whitelisted(&name, redact).then(|| (name, value.clone()))
        })
        .collect()
}

/// Filter response headers: the request whitelist plus `vary` and every
/// `access-control-allow-*` header
///
/// `set-cookie` is always dropped here; raw lines are captured separately.
pub fn filter_response_headers(
    headers: &[(String, String)],
    redact: bool,
) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            let keep = is_whitelisted(&name, redact)
                || name == "vary"
                || name.starts_with("access-control-allow-");
            keep.then(|| (name, value.clone()))
        })
        .collect()
}

/// Collect all raw `Set-Cookie` lines from a response header list
pub fn raw_set_cookie_lines(headers: &[(String, String)]) -> Vec<String> {
    headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
        .map(|(_, value)| value.clone())
        .collect()
}

/// Find a header value by case-insensitive name
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parse one `Set-Cookie` line into name, value and flags
///
/// Flag names are lowercased. Bare flags become `true`; valued flags keep
/// their value, except `samesite` whose value is lowercased.
pub fn parse_set_cookie(line: &str) -> Option<SetCookie> {
    let mut parts = line.split(';');

    let pair = parts.next()?.trim();
    let eq = pair.find('=')?;
    let name = pair[..eq].trim().to_string();
    let value = pair[eq + 1..].trim().to_string();
    if name.is_empty() {
        return None;
    }

    let mut flags = BTreeMap::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        match part.find('=') {
            Some(eq) => {
                let flag_name = part[..eq].trim().to_ascii_lowercase();
                let mut flag_value = part[eq + 1..].trim().to_string();
                if flag_name == "samesite" {
                    flag_value = flag_value.to_ascii_lowercase();
                }
                flags.insert(flag_name, CookieFlag::Str(flag_value));
            }
            None => {
                flags.insert(part.to_ascii_lowercase(), CookieFlag::Bool(true));
            }
        }
    }

    Some(SetCookie { name, value, flags })
}

/// Extract `Access-Control-Allow-*` headers into a grouped structure
///
/// Returns `None` when no allow field is present. Credentials are parsed as
/// boolean from case-insensitive `"true"`.
pub fn extract_cors_allow(headers: &[(String, String)]) -> Option<CorsAllow> {
    let mut allow = CorsAllow::default();

    for (name, value) in headers {
        match name.to_ascii_lowercase().as_str() {
            "access-control-allow-origin" => allow.origin = Some(value.clone()),
            "access-control-allow-methods" => allow.methods = Some(value.clone()),
            "access-control-allow-headers" => allow.headers = Some(value.clone()),
            "access-control-allow-credentials" => {
                allow.credentials = Some(value.eq_ignore_ascii_case("true"));
            }
            _ => {}
        }
    }

    (!allow.is_empty()).then_some(allow)
}
