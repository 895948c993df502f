//! Session recording: HAR archive, WebSocket NDJSON and saved bodies

pub mod har;
pub mod redact;
pub mod session;

pub use har::Har;
pub use session::CaptureSession;
