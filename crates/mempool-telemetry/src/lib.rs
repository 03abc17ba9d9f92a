#![allow(clippy::uninlined_format_args)]
#![allow(clippy::float_cmp)]
#![allow(clippy::cast_precision_loss)]

//! Telemetry for the memory pool benchmark
//!
//! This crate provides:
//! - Structured logging with tracing
//! - A named CPU/GPU timing profiler with a rolling sample window

pub mod logging;
pub mod profiler;

pub use logging::*;
pub use profiler::*;

use thiserror::Error;

/// Telemetry error types
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),

    /// Logging error
    #[error("Logging error: {0}")]
    Logging(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;
