//! Filesystem helpers for session archives

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::Result;

/// Sentinel line written when a value cannot be serialized
const UNSERIALIZABLE: &str = r#"{"_error":"unserializable"}"#;

/// Maximum length of a sanitized file identifier
const MAX_FILE_ID_LEN: usize = 64;

/// Idempotently create a directory, including parents
///
/// # Errors
///
/// Returns error only on permission or I/O failure
pub fn ensure_directory(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Filesystem-safe rendering of the current wall clock
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Current wall clock in milliseconds since epoch
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Open a write stream in append mode, creating parent directories
///
/// The caller owns the stream and is responsible for closing it.
///
/// # Errors
///
/// Returns error if directories cannot be created or the file cannot be opened
pub fn open_append_stream(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(file)
}

/// Serialize a value to JSON and append it as one line
///
/// On serialization failure a sentinel line is written instead; I/O failures
/// are logged and swallowed. This function never propagates to the caller.
pub fn write_json_line<W: Write, T: Serialize>(stream: &mut W, value: &T) {
    let line = serde_json::to_string(value).unwrap_or_else(|_| UNSERIALIZABLE.to_string());

    if let Err(e) = writeln!(stream, "{line}") {
        warn!("Failed to append JSON line: {e}");
    }
}

/// Restrict an identifier to `[A-Za-z0-9._-]`, truncating to 64 characters
///
/// Characters outside the set are replaced with `_`.
pub fn sanitize_file_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_ID_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_directory_nested() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b/c");

        ensure_directory(&nested).unwrap();
        assert!(nested.is_dir());

        // Idempotent
        ensure_directory(&nested).unwrap();
    }

    #[test]
    fn test_timestamp_is_filesystem_safe() {
        let ts = timestamp();
        assert!(!ts.is_empty());
        assert!(ts
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_open_append_stream_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/session/events.ndjson");

        let mut stream = open_append_stream(&path).unwrap();
        stream.write_all(b"first\n").unwrap();
        drop(stream);

        // Reopening appends rather than truncates
        let mut stream = open_append_stream(&path).unwrap();
        stream.write_all(b"second\n").unwrap();
        drop(stream);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_write_json_line() {
        let mut buf = Vec::new();
        write_json_line(&mut buf, &serde_json::json!({"type": "open", "id": "r1"}));
        write_json_line(&mut buf, &serde_json::json!({"type": "close"}));

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }

    #[test]
    fn test_write_json_line_unserializable() {
        struct Broken;

        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(
                &self,
                _serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("nope"))
            }
        }

        let mut buf = Vec::new();
        write_json_line(&mut buf, &Broken);

        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.trim(), r#"{"_error":"unserializable"}"#);
    }

    #[test]
    fn test_write_json_line_swallows_io_errors() {
        struct FailingWriter;

        impl Write for FailingWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        // Must not panic or propagate
        write_json_line(&mut FailingWriter, &serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_sanitize_file_id() {
        assert_eq!(sanitize_file_id("req-123.bin"), "req-123.bin");
        assert_eq!(sanitize_file_id("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_file_id("id with spaces"), "id_with_spaces");

        let long = "x".repeat(200);
        assert_eq!(sanitize_file_id(&long).len(), 64);
    }
}
