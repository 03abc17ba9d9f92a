//! Startup capability check

use crate::Result;
use mempool_gpu::{AdapterInfo, Architecture, Error};
use tracing::info;

/// Lowest shader model with dynamic resource indexing
pub const REQUIRED_SHADER_MODEL: (u32, u32) = (6, 6);

/// Adapter features the benchmark adapts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    pub architecture: Architecture,
    pub gpu_upload_heap_supported: bool,
}

/// Reject adapters the benchmark cannot run on
///
/// Enhanced barriers and shader model 6.6 are hard requirements; every
/// other difference is handled by gating settings.
pub fn check_capabilities(info: &AdapterInfo) -> Result<DeviceCaps> {
    if !info.enhanced_barriers_supported {
        return Err(Error::missing_capability("Enhanced Barriers").into());
    }
    if info.shader_model < REQUIRED_SHADER_MODEL {
        let (major, minor) = REQUIRED_SHADER_MODEL;
        return Err(Error::missing_capability(format!(
            "Shader Model {major}.{minor} (adapter supports {}.{})",
            info.shader_model.0, info.shader_model.1
        ))
        .into());
    }

    info!(
        "Adapter '{}': UMA {}, cache-coherent UMA {}, GPU upload heaps {}",
        info.name,
        info.architecture.uma,
        info.architecture.cache_coherent_uma,
        info.gpu_upload_heap_supported
    );

    Ok(DeviceCaps {
        architecture: info.architecture,
        gpu_upload_heap_supported: info.gpu_upload_heap_supported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BenchError;

    fn adapter() -> AdapterInfo {
        AdapterInfo {
            name: "Test Adapter".into(),
            architecture: Architecture::default(),
            gpu_upload_heap_supported: false,
            enhanced_barriers_supported: true,
            shader_model: (6, 6),
            descriptor_capacity: 16,
        }
    }

    #[test]
    fn test_accepts_required_features() {
        let caps = check_capabilities(&adapter()).unwrap();
        assert!(!caps.gpu_upload_heap_supported);
    }

    #[test]
    fn test_missing_barriers_is_named() {
        let mut info = adapter();
        info.enhanced_barriers_supported = false;
        let err = check_capabilities(&info).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Enhanced Barriers"));
    }

    #[test]
    fn test_old_shader_model_rejected() {
        let mut info = adapter();
        info.shader_model = (6, 5);
        match check_capabilities(&info) {
            Err(BenchError::Gpu(Error::MissingCapability(name))) => {
                assert!(name.starts_with("Shader Model 6.6"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
