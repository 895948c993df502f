//! Diagnostic channel bridge
//!
//! Optional attachment to the navigation host's debugger-style channel for
//! metadata the primary lifecycle callbacks cannot observe.

pub mod bridge;

pub use bridge::{DiagnosticBridge, DiagnosticChannel};
