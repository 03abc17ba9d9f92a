#![allow(clippy::collapsible_if)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::field_reassign_with_default)]

//! Configuration for the memory pool benchmark
//!
//! This crate provides:
//! - The settings registry read and written every frame
//! - The application setting set and its typed snapshot
//! - File-based run configuration (TOML) with environment overrides
//! - Run configuration validation

pub mod app_settings;
pub mod config;
pub mod settings;
pub mod validate;

pub use app_settings::*;
pub use config::*;
pub use settings::*;
pub use validate::*;

use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid value
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Error message
        message: String,
    },

    /// Environment variable error
    #[error("Environment variable error: {0}")]
    EnvVar(String),

    /// A setting with this name is already registered
    #[error("Setting already registered: {0}")]
    DuplicateSetting(String),

    /// No setting with this name
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    /// The setting holds a different kind of value
    #[error("Setting {name} is {actual}, not {expected}")]
    TypeMismatch {
        /// Setting name
        name: String,
        /// Requested kind
        expected: &'static str,
        /// Registered kind
        actual: &'static str,
    },

    /// The declared domain cannot hold any value
    #[error("Invalid domain for {name}: {message}")]
    InvalidDomain {
        /// Setting name
        name: String,
        /// Error message
        message: String,
    },
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
