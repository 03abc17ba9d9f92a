//! Error types for GPU device operations

/// Result type for GPU operations
pub type Result<T> = std::result::Result<T, Error>;

/// GPU device errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device creation or adapter selection failed
    #[error("Failed to initialize device '{adapter}': {message}")]
    DeviceInit {
        /// Adapter name
        adapter: String,
        /// Error message
        message: String,
    },

    /// Heap or buffer allocation exceeded the memory segment budget
    #[error("GPU memory allocation failed: {requested} bytes requested, {available} bytes available in {segment}")]
    OutOfMemory {
        /// Requested size
        requested: u64,
        /// Bytes still available in the segment
        available: u64,
        /// Memory segment name ("local" or "non-local")
        segment: &'static str,
    },

    /// Invalid buffer size
    #[error("Invalid buffer size: requested {requested}, maximum {maximum}")]
    InvalidBufferSize {
        /// Requested size
        requested: u64,
        /// Maximum allowed
        maximum: u64,
    },

    /// No free slot left in the shader-visible descriptor heap
    #[error("Descriptor heap full: all {capacity} persistent slots are allocated")]
    DescriptorHeapFull {
        /// Heap capacity
        capacity: usize,
    },

    /// A required device feature is missing
    #[error("Missing device capability: {0}")]
    MissingCapability(String),

    /// Heap properties the device cannot create
    #[error("Invalid heap configuration: {0}")]
    InvalidHeapConfiguration(String),

    /// Kernel compilation failed
    #[error("Shader compilation failed for '{entry_point}': {message}")]
    ShaderCompile {
        /// Kernel entry point
        entry_point: String,
        /// Compiler diagnostic
        message: String,
    },

    /// A handle that does not name a live object
    #[error("Invalid {kind} handle: {id}")]
    InvalidHandle {
        /// Object kind ("buffer", "heap", "pipeline", "descriptor")
        kind: &'static str,
        /// Raw handle value
        id: u64,
    },

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Fence or queue synchronization error
    #[error("Synchronization error: {0}")]
    Synchronization(String),
}

impl Error {
    /// Create an out-of-memory error
    #[inline]
    pub fn out_of_memory(requested: u64, available: u64, segment: &'static str) -> Self {
        Self::OutOfMemory {
            requested,
            available,
            segment,
        }
    }

    /// Create an invalid handle error
    #[inline]
    pub fn invalid_handle(kind: &'static str, id: u64) -> Self {
        Self::InvalidHandle { kind, id }
    }

    /// Create a missing capability error
    #[inline]
    pub fn missing_capability(name: impl Into<String>) -> Self {
        Self::MissingCapability(name.into())
    }

    /// Check if error must abort the benchmark
    ///
    /// Resource exhaustion and capability mismatches leave no reduced mode
    /// that would still produce comparable timings.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceInit { .. }
                | Self::OutOfMemory { .. }
                | Self::DescriptorHeapFull { .. }
                | Self::MissingCapability(_)
                | Self::InvalidHeapConfiguration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::out_of_memory(1024 * 1024, 512 * 1024, "local");
        assert!(err.to_string().contains("1048576"));
        assert!(err.to_string().contains("524288"));
        assert!(err.to_string().contains("local"));
    }

    #[test]
    fn test_error_fatal() {
        assert!(Error::out_of_memory(100, 50, "local").is_fatal());
        assert!(Error::DescriptorHeapFull { capacity: 8 }.is_fatal());
        assert!(Error::missing_capability("Enhanced Barriers").is_fatal());
        assert!(!Error::InvalidOperation("test".into()).is_fatal());
        assert!(!Error::invalid_handle("buffer", 3).is_fatal());
    }

    #[test]
    fn test_descriptor_heap_full_error() {
        let err = Error::DescriptorHeapFull { capacity: 1024 };
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn test_missing_capability_names_feature() {
        let err = Error::missing_capability("Shader Model 6.6");
        assert_eq!(err.to_string(), "Missing device capability: Shader Model 6.6");
    }

    #[test]
    fn test_shader_compile_error() {
        let err = Error::ShaderCompile {
            entry_point: "ComputeJob".into(),
            message: "missing macro".into(),
        };
        assert!(err.to_string().contains("ComputeJob"));
        assert!(err.to_string().contains("missing macro"));
    }

    #[test]
    fn test_invalid_handle_error() {
        let err = Error::invalid_handle("pipeline", 42);
        assert!(err.to_string().contains("pipeline"));
        assert!(err.to_string().contains("42"));
    }
}
