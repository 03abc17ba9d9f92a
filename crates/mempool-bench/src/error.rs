//! Error types for the benchmark core

use mempool_config::ConfigError;
use mempool_gpu::HeapDescriptor;
use mempool_telemetry::TelemetryError;
use thiserror::Error;

/// Result type for benchmark operations
pub type Result<T> = std::result::Result<T, BenchError>;

/// Benchmark errors
#[derive(Debug, Error)]
pub enum BenchError {
    /// Device error outside resource provisioning
    #[error("GPU error: {0}")]
    Gpu(#[from] mempool_gpu::Error),

    /// Registry or run configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging or profiler error
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// Report or thread I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A resource for the given heap configuration could not be created
    #[error("Failed to create {resource} for heap {descriptor}: {source}")]
    Provision {
        /// Which resource failed
        resource: &'static str,
        /// Heap configuration in effect
        descriptor: HeapDescriptor,
        /// Device error
        #[source]
        source: mempool_gpu::Error,
    },

    /// A call that breaks a frame-ordering rule
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl BenchError {
    pub(crate) fn provision(
        resource: &'static str,
        descriptor: HeapDescriptor,
    ) -> impl FnOnce(mempool_gpu::Error) -> Self {
        move |source| Self::Provision {
            resource,
            descriptor,
            source,
        }
    }

    /// Check if the error must end the run
    ///
    /// Provisioning failures are always fatal: a sweep with a missing
    /// configuration would produce a report that cannot be compared.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Gpu(e) => e.is_fatal(),
            Self::Provision { .. } => true,
            Self::Config(_) | Self::Telemetry(_) | Self::Io(_) | Self::InvalidOperation(_) => false,
        }
    }
}
