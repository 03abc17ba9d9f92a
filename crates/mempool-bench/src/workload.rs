//! Compute job kernel compilation and pipeline swapping

use crate::Result;
use mempool_config::LiveSettings;
use mempool_gpu::{
    BufferRepresentation, CompileOptions, CompiledKernel, GpuDevice, KernelSource, PipelineId,
    macros,
};
use tracing::{debug, info};

/// The read kernel, embedded at build time
pub const COMPUTE_JOB: KernelSource = KernelSource::compute(
    "ComputeJob.hlsl",
    "ComputeJob",
    include_str!("../shaders/ComputeJob.hlsl"),
);

/// Macro set for the current work shape
///
/// `num_input_elems` is the element count of the provisioned input, which
/// can differ from the requested size after clamping.
pub fn compile_options(settings: &LiveSettings, num_input_elems: u64) -> CompileOptions {
    let repr = settings.input_buffer_type;
    let mut options = CompileOptions::new();
    options
        .define_int(macros::ELEMS_PER_THREAD, i64::from(settings.elems_per_thread))
        .define_int(macros::THREAD_ELEM_OFFSET, i64::from(settings.thread_elem_offset))
        .define_int(macros::GROUP_ELEM_OFFSET, i64::from(settings.group_elem_offset))
        .define_int(macros::NUM_INPUT_BUFFER_ELEMS, num_input_elems as i64)
        .define_int(macros::THREAD_ELEM_STRIDE, i64::from(settings.thread_elem_stride))
        .define_flag(macros::RAW_BUFFER, repr == BufferRepresentation::Raw)
        .define_flag(macros::FORMATTED_BUFFER, repr == BufferRepresentation::Formatted)
        .define_flag(macros::STRUCTURED_BUFFER, repr == BufferRepresentation::Structured)
        .define_flag(macros::CONSTANT_BUFFER, repr == BufferRepresentation::Constant);
    options
}

/// Owns the compiled compute job and its pipeline
#[derive(Debug, Default)]
pub struct WorkloadCompiler {
    kernel: Option<CompiledKernel>,
    pipeline: Option<PipelineId>,
    compiles: u64,
}

impl WorkloadCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile for `options` and swap in a new pipeline
    ///
    /// A failed compile leaves the old one in place.
    pub fn rebuild<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        options: &CompileOptions,
    ) -> Result<PipelineId> {
        let kernel = device.compile_kernel(&COMPUTE_JOB, options)?;
        self.install(device, kernel)
    }

    /// Create the pipeline for `kernel`, then retire the old one
    ///
    /// The old pipeline goes to deferred release since frames in flight may
    /// still reference it. If pipeline creation fails nothing changes.
    pub fn install<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        kernel: CompiledKernel,
    ) -> Result<PipelineId> {
        let pipeline = device.create_pipeline(&kernel)?;
        if let Some(old) = self.pipeline.replace(pipeline) {
            device.release_pipeline(old);
        }

        self.compiles += 1;
        if self.compiles == 1 {
            info!("Compiled compute job ({})", kernel.hash);
        } else {
            debug!("Recompiled compute job ({})", kernel.hash);
        }

        self.kernel = Some(kernel);
        Ok(pipeline)
    }

    pub fn pipeline(&self) -> Option<PipelineId> {
        self.pipeline
    }

    pub fn kernel(&self) -> Option<&CompiledKernel> {
        self.kernel.as_ref()
    }

    /// Kernels compiled so far
    pub fn compiles(&self) -> u64 {
        self.compiles
    }

    pub fn release<D: GpuDevice + ?Sized>(&mut self, device: &D) {
        if let Some(pipeline) = self.pipeline.take() {
            device.release_pipeline(pipeline);
        }
        self.kernel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempool_config::{SettingsRegistry, WorkloadConfig, register_app_settings};
    use mempool_gpu::{KernelShape, SimDevice, SimDeviceConfig};

    fn live() -> LiveSettings {
        let mut registry = SettingsRegistry::new();
        register_app_settings(&mut registry, &WorkloadConfig::default(), "Benchmark.csv").unwrap();
        LiveSettings::read(&registry).unwrap()
    }

    #[test]
    fn test_options_carry_shape() {
        let mut settings = live();
        settings.elems_per_thread = 4;
        settings.thread_elem_stride = 2;
        settings.input_buffer_type = BufferRepresentation::Structured;

        let options = compile_options(&settings, 1000);
        let shape = KernelShape::from_options("ComputeJob", &options).unwrap();
        assert_eq!(shape.elems_per_thread, 4);
        assert_eq!(shape.thread_elem_stride, 2);
        assert_eq!(shape.num_input_elems, 1000);
        assert_eq!(shape.representation, BufferRepresentation::Structured);
    }

    #[test]
    fn test_options_are_deterministic() {
        let settings = live();
        assert_eq!(compile_options(&settings, 64), compile_options(&settings, 64));
        assert_ne!(compile_options(&settings, 64), compile_options(&settings, 65));
    }

    #[test]
    fn test_kernel_source_is_embedded() {
        assert!(COMPUTE_JOB.text.contains("void ComputeJob"));
        assert_eq!(COMPUTE_JOB.entry_point, "ComputeJob");
    }

    #[test]
    fn test_rebuild_retires_old_pipeline() {
        let device = SimDevice::new(SimDeviceConfig::default()).unwrap();
        let mut compiler = WorkloadCompiler::new();
        let settings = live();

        let first = compiler.rebuild(&device, &compile_options(&settings, 64)).unwrap();
        let second = compiler.rebuild(&device, &compile_options(&settings, 128)).unwrap();
        assert_ne!(first, second);
        assert_eq!(compiler.compiles(), 2);

        device.flush_gpu().unwrap();
        assert_eq!(device.live_objects().2, 1);

        compiler.release(&device);
        device.flush_gpu().unwrap();
        assert_eq!(device.live_objects().2, 0);
        assert!(compiler.pipeline().is_none());
    }

    #[test]
    fn test_failed_compile_keeps_pipeline() {
        let device = SimDevice::new(SimDeviceConfig::default()).unwrap();
        let mut compiler = WorkloadCompiler::new();
        let pipeline = compiler.rebuild(&device, &compile_options(&live(), 64)).unwrap();

        assert!(compiler.rebuild(&device, &CompileOptions::new()).is_err());
        assert_eq!(compiler.pipeline(), Some(pipeline));
    }

    #[test]
    fn test_failed_pipeline_keeps_old_one() {
        let device = SimDevice::new(SimDeviceConfig::default()).unwrap();
        let mut compiler = WorkloadCompiler::new();
        let pipeline = compiler.rebuild(&device, &compile_options(&live(), 64)).unwrap();
        let hash = compiler.kernel().unwrap().hash;

        let unshaped = CompiledKernel {
            entry_point: COMPUTE_JOB.entry_point.to_string(),
            options: CompileOptions::new(),
            hash,
        };
        assert!(compiler.install(&device, unshaped).is_err());
        assert_eq!(compiler.pipeline(), Some(pipeline));
        assert_eq!(compiler.kernel().unwrap().options, compile_options(&live(), 64));
        assert_eq!(compiler.compiles(), 1);

        device.flush_gpu().unwrap();
        assert_eq!(device.live_objects().2, 1);
    }
}
