//! The benchmark application: settings, resources and the frame loop

use crate::caps::{DeviceCaps, check_capabilities};
use crate::driver::{self, COMPUTE_JOB_SCOPE, READ_BUFFER_SCOPE, UPDATE_BUFFER_SCOPE};
use crate::hud::{AppCommand, HudSnapshot};
use crate::provision::{BufferSet, ProvisionRequest};
use crate::report::BenchmarkReport;
use crate::state::{BenchmarkRunner, BenchmarkSample, FrameProtocol, TickOutcome};
use crate::streaming::BackgroundStreamer;
use crate::sweep::{self, BenchmarkConfig};
use crate::workload::{WorkloadCompiler, compile_options};
use crate::{BenchError, Result};
use mempool_config::{
    BenchConfig, ConfigError, LiveSettings, REBUILD_SETTINGS, RECOMPILE_SETTINGS, SettingsRegistry,
    names, register_app_settings,
};
use mempool_gpu::{GpuDevice, GpuTimestampScope, HeapType, MemoryPool, PipelineId};
use mempool_telemetry::Profiler;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CPU scope around a whole frame
pub const FRAME_SCOPE: &str = "Frame";
/// CPU scope around command recording
pub const RENDER_SCOPE: &str = "Render";
/// GPU scope around everything recorded in a frame
pub const RENDER_TOTAL_SCOPE: &str = "Render Total";

/// Heap types selectable without GPU upload heap support
const HEAP_TYPES_WITHOUT_GPU_UPLOAD: usize = 3;

/// Owns the device-side state of the benchmark and advances it one frame
/// at a time
pub struct MemPoolApp<D: GpuDevice + 'static> {
    device: Arc<D>,
    caps: DeviceCaps,
    registry: SettingsRegistry,
    profiler: Arc<Profiler>,
    buffers: Option<BufferSet>,
    compiler: WorkloadCompiler,
    runner: BenchmarkRunner,
    streamer: Option<BackgroundStreamer<D>>,
    /// Last state pushed to the device
    stable_power_state: bool,
    background_processing: bool,
    rebuilds: u64,
    last_report: Option<String>,
    shut_down: bool,
}

impl<D: GpuDevice + 'static> MemPoolApp<D> {
    /// Check the adapter, register settings and create the initial resources
    pub fn new(device: Arc<D>, config: &BenchConfig) -> Result<Self> {
        let caps = check_capabilities(device.adapter_info())?;

        let csv_name = config.benchmark.output.to_str().ok_or_else(|| ConfigError::InvalidValue {
            field: "benchmark.output".to_string(),
            message: format!("{} is not valid UTF-8", config.benchmark.output.display()),
        })?;
        let mut registry = SettingsRegistry::new();
        register_app_settings(&mut registry, &config.workload, csv_name)?;
        if !caps.gpu_upload_heap_supported {
            registry.clamp_num_values(names::HEAP_TYPE, HEAP_TYPES_WITHOUT_GPU_UPLOAD)?;
        }
        if caps.architecture.uma {
            registry.clamp_num_values(names::MEMORY_POOL, 1)?;
        }

        let configs = sweep::enumerate(&config.sweep, &caps);
        let runner = BenchmarkRunner::new(FrameProtocol::from(&config.benchmark), configs);

        let mut app = Self {
            device,
            caps,
            registry,
            profiler: Arc::new(Profiler::new()),
            buffers: None,
            compiler: WorkloadCompiler::new(),
            runner,
            streamer: None,
            stable_power_state: false,
            background_processing: true,
            rebuilds: 0,
            last_report: None,
            shut_down: false,
        };

        let live = app.gate_settings()?;
        app.rebuild_buffers(&live)?;
        app.recompile(&live)?;
        app.registry.end_cycle();

        let streamer = BackgroundStreamer::spawn(Arc::clone(&app.device))?;
        streamer.set_upload_size_mb(live.background_upload_size_mb);
        streamer.set_wait_ms(live.background_upload_wait_ms);
        app.streamer = Some(streamer);

        info!(
            "Benchmark ready: {} configurations, {} warmup + {} measured frames each",
            app.runner.configs().len(),
            config.benchmark.warmup_frames,
            config.benchmark.measure_frames
        );
        Ok(app)
    }

    /// Run one frame: update settings and resources, then record the work
    ///
    /// The frame is always closed, even when update or recording fails.
    pub fn frame(&mut self) -> Result<()> {
        if self.shut_down {
            return Err(BenchError::InvalidOperation("application is shut down".into()));
        }

        let profiler = Arc::clone(&self.profiler);
        let _frame_scope = profiler.start_cpu(FRAME_SCOPE);

        self.device.begin_frame()?;
        for timing in self.device.resolved_timings() {
            self.profiler.record_gpu(timing.name, timing.milliseconds);
        }

        let result = self.update().and_then(|()| self.render());
        let end = self.device.end_frame();
        result?;
        end?;
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        self.device.set_vsync(self.registry.bool(names::ENABLE_VSYNC)?);

        let sample = self.sample()?;
        let outcome = self.runner.tick(&mut self.registry, sample)?;
        if outcome == TickOutcome::Finished {
            self.write_report()?;
        }

        let live = LiveSettings::read(&self.registry)?;
        if live.stable_power_state != self.stable_power_state {
            self.device.set_stable_power_state(live.stable_power_state)?;
            self.stable_power_state = live.stable_power_state;
        }
        if live.driver_background_threads != self.background_processing {
            self.device.set_background_processing(live.driver_background_threads)?;
            self.background_processing = live.driver_background_threads;
        }

        let mut live = self.gate_settings()?;
        if let TickOutcome::Applied { index } = outcome {
            // The previous configuration's pool may have clamped the page property
            if let Some(config) = self.runner.configs().get(index)
                && live.cpu_page_property != config.cpu_page_property
            {
                self.registry.set_enum(names::CPU_PAGE_PROPERTY, config.cpu_page_property)?;
                live = LiveSettings::read(&self.registry)?;
            }
        }
        let changes = self.registry.changes();
        if changes.any(REBUILD_SETTINGS) {
            self.rebuild_buffers(&live)?;
        }
        if changes.any(RECOMPILE_SETTINGS) {
            self.recompile(&live)?;
        }
        if changes.contains(names::BUFFER_UPLOAD_PATH) {
            self.device.flush_gpu()?;
        }

        if let Some(streamer) = &self.streamer {
            streamer.set_upload_size_mb(live.background_upload_size_mb);
            streamer.set_wait_ms(live.background_upload_wait_ms);
        }

        self.registry.end_cycle();
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let live = LiveSettings::read(&self.registry)?;
        let device = Arc::clone(&self.device);
        let profiler = Arc::clone(&self.profiler);

        let _cpu_scope = profiler.start_cpu(RENDER_SCOPE);
        let _gpu_scope = GpuTimestampScope::begin(device.as_ref(), RENDER_TOTAL_SCOPE)?;

        let pipeline = self.pipeline()?;
        let buffers = self.buffers.as_mut().ok_or_else(not_provisioned)?;
        driver::update_buffer(
            device.as_ref(),
            &profiler,
            buffers,
            live.upload_path,
            live.read_from_gpu_mem,
        )?;
        driver::run_compute(device.as_ref(), buffers, pipeline, live.num_thread_groups)
    }

    /// Show or restrict the custom heap settings for the current heap type
    fn gate_settings(&mut self) -> Result<LiveSettings> {
        let live = LiveSettings::read(&self.registry)?;
        let custom = live.heap_type == HeapType::Custom;
        self.registry.set_visible(names::CPU_PAGE_PROPERTY, custom)?;
        self.registry.set_visible(names::MEMORY_POOL, custom)?;

        let page_values = if !self.caps.architecture.uma && live.memory_pool == MemoryPool::L1 {
            1
        } else {
            3
        };
        self.registry.clamp_num_values(names::CPU_PAGE_PROPERTY, page_values)?;

        // The clamp may have moved the page property
        Ok(LiveSettings::read(&self.registry)?)
    }

    fn rebuild_buffers(&mut self, live: &LiveSettings) -> Result<()> {
        if let Some(old) = self.buffers.take() {
            old.release(self.device.as_ref());
        }
        self.device.flush_gpu()?;

        let request = ProvisionRequest {
            descriptor: live.heap_descriptor(),
            representation: live.input_buffer_type,
            size: live.input_buffer_size(),
            num_thread_groups: live.num_thread_groups,
        };
        self.buffers = Some(BufferSet::provision(
            self.device.as_ref(),
            &request,
            &mut self.registry,
        )?);
        self.rebuilds += 1;
        debug!("Provisioned buffers for {:?}", request);
        Ok(())
    }

    fn recompile(&mut self, live: &LiveSettings) -> Result<()> {
        let num_elems = self
            .buffers
            .as_ref()
            .ok_or_else(not_provisioned)?
            .layout
            .num_elems;
        self.compiler
            .rebuild(self.device.as_ref(), &compile_options(live, num_elems))?;
        Ok(())
    }

    /// Timings of the most recent completed frame
    fn sample(&self) -> Result<BenchmarkSample> {
        let cpu_writable = self.buffers.as_ref().is_some_and(|b| b.cpu_writable);
        let reading = cpu_writable && self.registry.bool(names::READ_FROM_GPU_MEM)?;
        Ok(BenchmarkSample {
            compute_ms: self.profiler.latest_gpu_time(COMPUTE_JOB_SCOPE),
            update_ms: self.profiler.latest_cpu_time(UPDATE_BUFFER_SCOPE),
            read_ms: if reading {
                self.profiler.latest_cpu_time(READ_BUFFER_SCOPE)
            } else {
                0.0
            },
        })
    }

    fn write_report(&mut self) -> Result<()> {
        let path = PathBuf::from(self.registry.text(names::BENCHMARK_CSV_NAME)?);
        let text = self.runner.report().write_to(&path)?;
        self.last_report = Some(text);
        Ok(())
    }

    fn pipeline(&self) -> Result<PipelineId> {
        self.compiler
            .pipeline()
            .ok_or_else(|| BenchError::InvalidOperation("compute job is not compiled".into()))
    }

    /// Run the whole sweep, calling `on_progress(current, total)` whenever a
    /// configuration starts
    pub fn run_benchmark(
        &mut self,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<BenchmarkReport> {
        self.runner.start()?;

        let mut reported = None;
        while self.runner.is_running() {
            let progress = self.runner.progress();
            if reported != Some(progress.0) {
                on_progress(progress.0, progress.1);
                reported = Some(progress.0);
            }
            self.frame()?;
        }

        let (_, total) = self.runner.progress();
        on_progress(total, total);
        Ok(self.runner.report())
    }

    /// Apply a user command, returning any text it produces
    pub fn handle(&mut self, command: AppCommand) -> Result<Option<String>> {
        match command {
            AppCommand::StartBenchmark => {
                self.runner.start()?;
                Ok(None)
            }
            AppCommand::CopyReport => Ok(self.last_report.clone()),
            AppCommand::CopyTestInfo => Ok(Some(self.hud()?.to_string())),
            AppCommand::SetReportName(name) => {
                self.registry.set_text(names::BENCHMARK_CSV_NAME, name)?;
                Ok(None)
            }
        }
    }

    /// Current test information
    pub fn hud(&self) -> Result<HudSnapshot> {
        let live = LiveSettings::read(&self.registry)?;
        let buffers = self.buffers.as_ref().ok_or_else(not_provisioned)?;
        let config = BenchmarkConfig::from(&live);
        let resolved = buffers.descriptor.resolve(&self.caps.architecture);
        let info = self.device.adapter_info();

        Ok(HudSnapshot {
            adapter: info.name.clone(),
            uma: self.caps.architecture.uma,
            cache_coherent_uma: self.caps.architecture.cache_coherent_uma,
            memory: self.device.memory_budget(),
            heap_type: buffers.descriptor.heap_type,
            cpu_writable: buffers.cpu_writable,
            cpu_page_property: resolved.cpu_page_property,
            memory_pool: resolved.memory_pool,
            input_buffer_size: buffers.layout.copy_size,
            num_input_elems: buffers.layout.num_elems,
            bytes_read: config.bytes_read(),
            unique_bytes_read: config.unique_bytes_read(),
            total_threads: buffers.num_threads,
            frame_ms: self.profiler.avg_cpu_time(FRAME_SCOPE),
            compute_ms: self.profiler.avg_gpu_time(COMPUTE_JOB_SCOPE),
            update_ms: self.profiler.avg_cpu_time(UPDATE_BUFFER_SCOPE),
            read_ms: (buffers.cpu_writable && live.read_from_gpu_mem)
                .then(|| self.profiler.avg_cpu_time(READ_BUFFER_SCOPE)),
            benchmark_progress: self.runner.is_running().then(|| self.runner.progress()),
        })
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn registry(&self) -> &SettingsRegistry {
        &self.registry
    }

    /// Settings written here take effect in the next frame's update
    pub fn registry_mut(&mut self) -> &mut SettingsRegistry {
        &mut self.registry
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn runner(&self) -> &BenchmarkRunner {
        &self.runner
    }

    pub fn buffers(&self) -> Option<&BufferSet> {
        self.buffers.as_ref()
    }

    pub fn streamer(&self) -> Option<&BackgroundStreamer<D>> {
        self.streamer.as_ref()
    }

    /// Buffer sets provisioned so far, including the initial one
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Kernels compiled so far, including the initial one
    pub fn recompiles(&self) -> u64 {
        self.compiler.compiles()
    }

    pub fn last_report(&self) -> Option<&str> {
        self.last_report.as_deref()
    }

    /// Stop the streamer, drain the GPU and release every resource
    ///
    /// Called by drop; calling it again does nothing.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        // Joined before anything it may copy into is released
        if let Some(streamer) = self.streamer.take() {
            streamer.shutdown();
        }
        self.device.flush_gpu()?;

        if let Some(buffers) = self.buffers.take() {
            buffers.release(self.device.as_ref());
        }
        self.compiler.release(self.device.as_ref());
        self.device.flush_gpu()?;

        info!("Benchmark shut down");
        Ok(())
    }
}

impl<D: GpuDevice + 'static> Drop for MemPoolApp<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Shutdown failed: {}", e);
        }
    }
}

fn not_provisioned() -> BenchError {
    BenchError::InvalidOperation("buffers are not provisioned".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempool_config::SweepConfig;
    use mempool_gpu::{BufferRepresentation, SimDevice, SimDeviceConfig};

    fn small_config() -> BenchConfig {
        let mut config = BenchConfig::default();
        config.workload.input_buffer_size_mb = 0;
        config.workload.input_buffer_size_kb = 64;
        config.workload.num_thread_groups = 4;
        config.benchmark.warmup_frames = 1;
        config.benchmark.measure_frames = 2;
        config
    }

    fn app(config: &BenchConfig) -> MemPoolApp<SimDevice> {
        let device = Arc::new(SimDevice::new(SimDeviceConfig::default()).unwrap());
        MemPoolApp::new(device, config).unwrap()
    }

    #[test]
    fn test_initial_resources() {
        let app = app(&small_config());
        assert_eq!(app.rebuilds(), 1);
        assert_eq!(app.recompiles(), 1);
        assert!(app.registry().changes().is_empty());
        assert!(app.registry().int(names::OUTPUT_BUFFER_IDX).unwrap() >= 0);
        assert!(app.streamer().is_some_and(|s| s.is_running()));
    }

    #[test]
    fn test_frames_apply_device_controls() {
        let mut app = app(&small_config());
        app.frame().unwrap();
        // vsync, stable power state, background processing
        assert_eq!(app.device().controls(), (true, true, false));
        assert_eq!(app.device().statistics().frames_completed, 1);
    }

    #[test]
    fn test_recompile_without_rebuild() {
        let mut app = app(&small_config());
        app.frame().unwrap();
        app.registry_mut().set_int(names::ELEMS_PER_THREAD, 4).unwrap();
        app.frame().unwrap();
        assert_eq!(app.rebuilds(), 1);
        assert_eq!(app.recompiles(), 2);
    }

    #[test]
    fn test_representation_change_rebuilds_and_recompiles() {
        let mut app = app(&small_config());
        app.registry_mut()
            .set_enum(names::INPUT_BUFFER_TYPE, BufferRepresentation::Constant)
            .unwrap();
        app.frame().unwrap();
        assert_eq!(app.rebuilds(), 2);
        assert_eq!(app.recompiles(), 2);
        // Constant inputs are clamped to one constant buffer
        assert_eq!(app.buffers().unwrap().layout.copy_size, 64 * 1024);
        assert_eq!(app.registry().int(names::INPUT_BUFFER_IDX).unwrap(), -1);
    }

    #[test]
    fn test_custom_heap_gating() {
        let mut app = app(&small_config());
        assert!(!app.registry().is_visible(names::CPU_PAGE_PROPERTY).unwrap());

        app.registry_mut().set_enum(names::HEAP_TYPE, HeapType::Custom).unwrap();
        app.registry_mut().set_enum(names::MEMORY_POOL, MemoryPool::L1).unwrap();
        app.frame().unwrap();
        assert!(app.registry().is_visible(names::CPU_PAGE_PROPERTY).unwrap());
        assert_eq!(app.registry().num_values(names::CPU_PAGE_PROPERTY).unwrap(), 1);
        assert!(!app.buffers().unwrap().cpu_writable);

        app.registry_mut().set_enum(names::MEMORY_POOL, MemoryPool::L0).unwrap();
        app.frame().unwrap();
        assert_eq!(app.registry().num_values(names::CPU_PAGE_PROPERTY).unwrap(), 3);
    }

    #[test]
    fn test_gpu_upload_clamped_without_support() {
        let device = Arc::new(
            SimDevice::new(SimDeviceConfig {
                gpu_upload_heap_supported: false,
                ..SimDeviceConfig::default()
            })
            .unwrap(),
        );
        let app = MemPoolApp::new(device, &small_config()).unwrap();
        assert_eq!(app.registry().num_values(names::HEAP_TYPE).unwrap(), 3);
        assert!(
            app.runner()
                .configs()
                .iter()
                .all(|c| c.heap_type != HeapType::GpuUpload)
        );
    }

    #[test]
    fn test_missing_capability_is_fatal() {
        let device = Arc::new(
            SimDevice::new(SimDeviceConfig {
                shader_model: (6, 5),
                ..SimDeviceConfig::default()
            })
            .unwrap(),
        );
        let err = MemPoolApp::new(device, &small_config()).err().unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Shader Model 6.6"));
    }

    #[test]
    fn test_commands() {
        let mut config = small_config();
        config.sweep = SweepConfig {
            heap_types: vec![HeapType::Upload],
            input_buffer_sizes: vec![4096],
            thread_group_counts: vec![1],
            ..SweepConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("commands.csv");

        let mut app = app(&config);
        assert_eq!(app.handle(AppCommand::CopyReport).unwrap(), None);
        app.handle(AppCommand::SetReportName(csv.to_string_lossy().into_owned()))
            .unwrap();
        app.handle(AppCommand::StartBenchmark).unwrap();
        assert!(app.runner().is_running());

        while app.runner().is_running() {
            app.frame().unwrap();
        }
        let report = app.handle(AppCommand::CopyReport).unwrap().unwrap();
        assert_eq!(report.lines().count(), 2);
        assert_eq!(std::fs::read_to_string(&csv).unwrap(), report);

        let info = app.handle(AppCommand::CopyTestInfo).unwrap().unwrap();
        assert!(info.contains("Adapter: Software Reference Adapter"));
    }

    #[test]
    fn test_overlong_report_name_is_rejected() {
        let mut app = app(&small_config());
        let long = format!("{}/{}", "d".repeat(200), "r".repeat(135));
        assert!(app.handle(AppCommand::SetReportName(long.clone())).is_err());
        assert_eq!(app.registry().text(names::BENCHMARK_CSV_NAME).unwrap(), "Benchmark.csv");

        let mut config = small_config();
        config.benchmark.output = PathBuf::from(long);
        let device = Arc::new(SimDevice::new(SimDeviceConfig::default()).unwrap());
        assert!(matches!(
            MemPoolApp::new(device, &config),
            Err(BenchError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_hud_tracks_live_state() {
        let mut app = app(&small_config());
        for _ in 0..3 {
            app.frame().unwrap();
        }
        let hud = app.hud().unwrap();
        assert_eq!(hud.heap_type, HeapType::Upload);
        assert!(hud.cpu_writable);
        assert_eq!(hud.input_buffer_size, 64 * 1024);
        assert_eq!(hud.total_threads, 4 * 256);
        assert_eq!(hud.bytes_read, 16 * 4 * 256);
        assert_eq!(hud.read_ms, None);
        assert_eq!(hud.benchmark_progress, None);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut app = app(&small_config());
        app.frame().unwrap();
        app.shutdown().unwrap();
        assert_eq!(app.device().live_objects(), (0, 0, 0));
        assert!(app.frame().is_err());
        app.shutdown().unwrap();
    }
}
