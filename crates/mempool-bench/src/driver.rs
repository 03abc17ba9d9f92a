//! Per-frame buffer update and compute dispatch

use crate::provision::BufferSet;
use crate::{BenchError, Result};
use mempool_config::UploadPath;
use mempool_gpu::{Barrier, DispatchBindings, GpuDevice, GpuTimestampScope, PipelineId};
use mempool_telemetry::Profiler;
use tracing::trace;

/// CPU time spent getting the payload to the GPU
pub const UPDATE_BUFFER_SCOPE: &str = "Update Buffer";
/// CPU time spent reading the mapped input back
pub const READ_BUFFER_SCOPE: &str = "Read From Buffer";
/// GPU time of the graphics-queue copy
pub const UPLOAD_BUFFER_SCOPE: &str = "Upload Buffer";
/// GPU time of the read kernel
pub const COMPUTE_JOB_SCOPE: &str = "Compute Job";

/// How the payload reaches the input buffer this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Direct write through the CPU mapping
    Mapped,
    /// Staging write plus an unsynchronized copy-queue copy
    FastCopyQueue,
    /// Upload ring copy on the copy queue, waited on by the graphics queue
    CopyQueue,
    /// Staging write plus a copy on the graphics queue
    DirectQueue,
}

impl UploadStrategy {
    pub fn select(cpu_writable: bool, path: UploadPath) -> Self {
        match (cpu_writable, path) {
            (true, _) => Self::Mapped,
            (false, UploadPath::FastUploadCopyQueue) => Self::FastCopyQueue,
            (false, UploadPath::UploadCopyQueue) => Self::CopyQueue,
            (false, UploadPath::DirectQueue) => Self::DirectQueue,
        }
    }
}

/// Upload this frame's payload and optionally read the mapped copy back
///
/// Upload work is timed under [`UPDATE_BUFFER_SCOPE`], the readback under
/// [`READ_BUFFER_SCOPE`].
pub fn update_buffer<D: GpuDevice + ?Sized>(
    device: &D,
    profiler: &Profiler,
    buffers: &mut BufferSet,
    path: UploadPath,
    read_from_gpu_mem: bool,
) -> Result<()> {
    let frame = device.current_frame();
    let strategy = UploadStrategy::select(buffers.cpu_writable, path);

    {
        let _scope = profiler.start_cpu(UPDATE_BUFFER_SCOPE);
        upload(device, buffers, strategy, frame)?;
    }

    if buffers.cpu_writable && read_from_gpu_mem {
        let _scope = profiler.start_cpu(READ_BUFFER_SCOPE);
        let offset = buffers.layout.copy_offset(buffers.input_ring.current());
        device.read_buffer(buffers.input, offset, &mut buffers.readback)?;
    }

    Ok(())
}

fn upload<D: GpuDevice + ?Sized>(
    device: &D,
    buffers: &mut BufferSet,
    strategy: UploadStrategy,
    frame: u64,
) -> Result<()> {
    let size = buffers.layout.copy_size;

    match strategy {
        UploadStrategy::Mapped => {
            let slot = buffers.input_ring.cycle(frame)?;
            device.write_buffer(buffers.input, buffers.layout.copy_offset(slot), &buffers.shadow)?;
        }
        UploadStrategy::FastCopyQueue => {
            let staging = staging_buffer(buffers)?;
            let slot = buffers.staging_ring.cycle(frame)?;
            let src_offset = buffers.layout.copy_offset(slot);
            device.write_buffer(staging, src_offset, &buffers.shadow)?;
            // Lands after this frame's dispatch; the race is what this path measures
            device.queue_fast_upload(staging, src_offset, buffers.input, 0, size)?;
        }
        UploadStrategy::CopyQueue => {
            let mut ctx = device.upload_begin(size)?;
            device.upload_write(&ctx, 0, &buffers.shadow)?;
            let slot = buffers.input_ring.cycle(frame)?;
            ctx.copy_to(buffers.input, buffers.layout.copy_offset(slot), 0, size);
            device.upload_end(ctx, true)?;
        }
        UploadStrategy::DirectQueue => {
            let _gpu_scope = GpuTimestampScope::begin(device, UPLOAD_BUFFER_SCOPE)?;
            let staging = staging_buffer(buffers)?;
            let src_slot = buffers.staging_ring.cycle(frame)?;
            let src_offset = buffers.layout.copy_offset(src_slot);
            device.write_buffer(staging, src_offset, &buffers.shadow)?;

            let dst_slot = buffers.input_ring.cycle(frame)?;
            device.copy_buffer_region(
                buffers.input,
                buffers.layout.copy_offset(dst_slot),
                staging,
                src_offset,
                size,
            )?;
            device.barrier(buffers.input, Barrier::CopyToShaderRead)?;
        }
    }

    trace!("Frame {}: {:?} upload of {} bytes", frame, strategy, size);
    Ok(())
}

fn staging_buffer(buffers: &BufferSet) -> Result<mempool_gpu::BufferId> {
    buffers.staging.ok_or_else(|| {
        BenchError::InvalidOperation("input is not CPU-writable but has no upload buffer".into())
    })
}

/// Record the read kernel over every thread group
pub fn run_compute<D: GpuDevice + ?Sized>(
    device: &D,
    buffers: &BufferSet,
    pipeline: PipelineId,
    num_thread_groups: u32,
) -> Result<()> {
    let _scope = GpuTimestampScope::begin(device, COMPUTE_JOB_SCOPE)?;
    device.dispatch(
        pipeline,
        &DispatchBindings {
            input: buffers.input_binding(),
            output: buffers.output_slot,
        },
        num_thread_groups,
    )?;
    device.barrier(buffers.output, Barrier::WriteToWrite)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::ProvisionRequest;
    use crate::workload::{WorkloadCompiler, compile_options};
    use mempool_config::{LiveSettings, SettingsRegistry, WorkloadConfig, register_app_settings};
    use mempool_gpu::{
        BufferRepresentation, HeapDescriptor, HeapType, SimDevice, SimDeviceConfig,
        THREAD_GROUP_SIZE,
    };

    struct Fixture {
        device: SimDevice,
        profiler: Profiler,
        buffers: BufferSet,
        pipeline: PipelineId,
    }

    fn fixture(heap_type: HeapType, representation: BufferRepresentation) -> Fixture {
        let device = SimDevice::new(SimDeviceConfig::default()).unwrap();
        let mut registry = SettingsRegistry::new();
        register_app_settings(&mut registry, &WorkloadConfig::default(), "Benchmark.csv").unwrap();

        let buffers = BufferSet::provision(
            &device,
            &ProvisionRequest {
                descriptor: HeapDescriptor::builtin(heap_type),
                representation,
                size: 4096,
                num_thread_groups: 1,
            },
            &mut registry,
        )
        .unwrap();

        let mut settings = LiveSettings::read(&registry).unwrap();
        settings.input_buffer_type = representation;
        let pipeline = WorkloadCompiler::new()
            .rebuild(&device, &compile_options(&settings, buffers.layout.num_elems))
            .unwrap();

        Fixture {
            device,
            profiler: Profiler::new(),
            buffers,
            pipeline,
        }
    }

    fn output_sums(fixture: &Fixture) -> Vec<f32> {
        fixture
            .device
            .debug_read_buffer(fixture.buffers.output)
            .unwrap()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn run_frame(fixture: &mut Fixture, path: UploadPath, read_back: bool) {
        fixture.device.begin_frame().unwrap();
        update_buffer(&fixture.device, &fixture.profiler, &mut fixture.buffers, path, read_back)
            .unwrap();
        run_compute(&fixture.device, &fixture.buffers, fixture.pipeline, 1).unwrap();
        fixture.device.end_frame().unwrap();
    }

    #[test]
    fn test_strategy_selection() {
        for path in [
            UploadPath::DirectQueue,
            UploadPath::UploadCopyQueue,
            UploadPath::FastUploadCopyQueue,
        ] {
            assert_eq!(UploadStrategy::select(true, path), UploadStrategy::Mapped);
        }
        assert_eq!(
            UploadStrategy::select(false, UploadPath::FastUploadCopyQueue),
            UploadStrategy::FastCopyQueue
        );
        assert_eq!(
            UploadStrategy::select(false, UploadPath::UploadCopyQueue),
            UploadStrategy::CopyQueue
        );
        assert_eq!(
            UploadStrategy::select(false, UploadPath::DirectQueue),
            UploadStrategy::DirectQueue
        );
    }

    #[test]
    fn test_mapped_upload_reaches_kernel() {
        let mut fixture = fixture(HeapType::Upload, BufferRepresentation::Raw);
        run_frame(&mut fixture, UploadPath::FastUploadCopyQueue, true);

        let sums = output_sums(&fixture);
        assert_eq!(sums.len(), THREAD_GROUP_SIZE as usize);
        assert!(sums.iter().all(|s| *s == 4.0));
        assert_eq!(fixture.buffers.readback, fixture.buffers.shadow);
        assert!(fixture.profiler.latest_cpu_time(READ_BUFFER_SCOPE) >= 0.0);
    }

    #[test]
    fn test_mapped_upload_alternates_copies() {
        let mut fixture = fixture(HeapType::Upload, BufferRepresentation::Structured);
        run_frame(&mut fixture, UploadPath::DirectQueue, false);
        assert_eq!(fixture.buffers.input_ring.current(), 0);
        run_frame(&mut fixture, UploadPath::DirectQueue, false);
        assert_eq!(fixture.buffers.input_ring.current(), 1);
        assert!(output_sums(&fixture).iter().all(|s| *s == 4.0));
    }

    #[test]
    fn test_direct_queue_upload_reaches_kernel() {
        let mut fixture = fixture(HeapType::Default, BufferRepresentation::Formatted);
        run_frame(&mut fixture, UploadPath::DirectQueue, false);
        assert!(output_sums(&fixture).iter().all(|s| *s == 4.0));

        let timings = fixture.device.resolved_timings();
        let names: Vec<&str> = timings.iter().map(|t| t.name).collect();
        assert!(names.contains(&UPLOAD_BUFFER_SCOPE));
        assert!(names.contains(&COMPUTE_JOB_SCOPE));
    }

    #[test]
    fn test_copy_queue_upload_lands_before_dispatch() {
        let mut fixture = fixture(HeapType::Default, BufferRepresentation::Raw);
        run_frame(&mut fixture, UploadPath::UploadCopyQueue, false);
        assert!(output_sums(&fixture).iter().all(|s| *s == 4.0));
        assert_eq!(fixture.device.statistics().copy_submissions, 1);
    }

    #[test]
    fn test_fast_upload_lands_after_dispatch() {
        let mut fixture = fixture(HeapType::Default, BufferRepresentation::Raw);

        run_frame(&mut fixture, UploadPath::FastUploadCopyQueue, false);
        assert!(output_sums(&fixture).iter().all(|s| *s == 0.0));

        run_frame(&mut fixture, UploadPath::FastUploadCopyQueue, false);
        assert!(output_sums(&fixture).iter().all(|s| *s == 4.0));
    }

    #[test]
    fn test_constant_buffer_binding() {
        let mut fixture = fixture(HeapType::Upload, BufferRepresentation::Constant);
        run_frame(&mut fixture, UploadPath::FastUploadCopyQueue, false);
        assert!(output_sums(&fixture).iter().all(|s| *s == 4.0));
    }

    #[test]
    fn test_update_is_profiled() {
        let mut fixture = fixture(HeapType::Upload, BufferRepresentation::Raw);
        run_frame(&mut fixture, UploadPath::FastUploadCopyQueue, false);
        let names: Vec<&str> = fixture.profiler.snapshot().iter().map(|e| e.name).collect();
        assert!(names.contains(&UPDATE_BUFFER_SCOPE));
        assert!(!names.contains(&READ_BUFFER_SCOPE));
    }
}
