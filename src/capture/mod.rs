//! Network capture pipeline
//!
//! The engine registers on the navigation host's request lifecycle and emits
//! typed events to a caller-supplied sink.

pub mod decode;
pub mod engine;
pub mod event;
pub mod headers;
pub mod types;

pub use engine::{BodySaver, CaptureEngine, EngineOptions, EventSink};
pub use event::CaptureEvent;
pub use types::{
    CapturedRequest, CapturedResponse, CookieFlag, CorsAllow, CorsInfo, Method, SavedBody,
    SetCookie, Timing, Transaction,
};

/// How long a preflight record may wait for its real request
pub const PREFLIGHT_WINDOW_MS: u64 = 3000;

/// Maximum characters kept in a body preview
pub const PREVIEW_MAX_CHARS: usize = 512;
