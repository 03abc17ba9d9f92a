//! Scoped GPU timestamp queries

use crate::{GpuDevice, Result};
use tracing::warn;

/// RAII guard that brackets recorded GPU work with a named timestamp pair
///
/// The end timestamp is recorded when the guard drops, so early returns
/// between construction and drop still close the scope.
#[must_use = "the scope ends when the guard is dropped"]
pub struct GpuTimestampScope<'a, D: GpuDevice + ?Sized> {
    device: &'a D,
    name: &'static str,
}

impl<'a, D: GpuDevice + ?Sized> GpuTimestampScope<'a, D> {
    /// Record the start timestamp and return the guard
    pub fn begin(device: &'a D, name: &'static str) -> Result<Self> {
        device.begin_timestamp(name)?;
        Ok(Self { device, name })
    }

    /// Scope name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<D: GpuDevice + ?Sized> Drop for GpuTimestampScope<'_, D> {
    fn drop(&mut self) {
        if let Err(err) = self.device.end_timestamp(self.name) {
            warn!("Failed to close GPU timestamp scope '{}': {}", self.name, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimDevice, SimDeviceConfig};

    #[test]
    fn test_scope_resolves_after_frame() {
        let device = SimDevice::new(SimDeviceConfig::default()).unwrap();
        device.begin_frame().unwrap();
        {
            let scope = GpuTimestampScope::begin(&device, "Compute Job").unwrap();
            assert_eq!(scope.name(), "Compute Job");
        }
        device.end_frame().unwrap();

        let timings = device.resolved_timings();
        assert_eq!(timings.len(), 1);
        assert_eq!(timings[0].name, "Compute Job");
        assert!(timings[0].milliseconds >= 0.0);
    }

    #[test]
    fn test_scope_through_trait_object() {
        let device = SimDevice::new(SimDeviceConfig::default()).unwrap();
        let dynamic: &dyn GpuDevice = &device;
        dynamic.begin_frame().unwrap();
        drop(GpuTimestampScope::begin(dynamic, "Upload Buffer").unwrap());
        dynamic.end_frame().unwrap();
        assert_eq!(dynamic.resolved_timings()[0].name, "Upload Buffer");
    }
}
