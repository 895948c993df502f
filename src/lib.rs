//! Webtap - network observability engine for embedded browsing surfaces
//!
//! Intercepts every HTTP(S) and WebSocket transaction a browsing session
//! produces, correlates preflights with their real requests, extracts
//! security-relevant artifacts, and records sessions to HAR + NDJSON archives.

#![deny(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::missing_panics_doc,
    clippy::multiple_crate_versions
)]

pub mod aggregator;
pub mod capture;
pub mod cdp;
pub mod config;
pub mod controller;
pub mod error;
pub mod fsutil;
pub mod recording;
pub mod token;

pub use error::{Result, WebtapError};
