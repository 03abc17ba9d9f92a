//! Run Configuration Loading
//!
//! Provides configuration loading from multiple sources with priority:
//! 1. Default values
//! 2. Environment variables
//! 3. Configuration files (highest priority)

use crate::app_settings::UploadPath;
use crate::settings::SettingEnum;
use crate::{ConfigError, Result};
use mempool_gpu::{
    Architecture, BufferRepresentation, CpuPageProperty, HeapType, MemoryPool, SimDeviceConfig,
    UploadRingConfig,
};
use mempool_telemetry::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MIB: u64 = 1024 * 1024;

/// Configuration source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Load from a file
    File(PathBuf),
    /// Load from environment variables
    Env,
    /// Use default values
    Default,
    /// Load from in-memory string (for testing)
    Memory(String),
}

/// Frame protocol and report destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSection {
    /// Frames run after applying a configuration before sampling
    pub warmup_frames: u32,
    /// Frames sampled per configuration
    pub measure_frames: u32,
    /// Report file, relative to the working directory
    pub output: PathBuf,
}

impl Default for BenchmarkSection {
    fn default() -> Self {
        Self {
            warmup_frames: 8,
            measure_frames: 64,
            output: PathBuf::from("Benchmark.csv"),
        }
    }
}

impl BenchmarkSection {
    pub const fn total_frames(&self) -> u32 {
        self.warmup_frames + self.measure_frames
    }
}

/// Axes of the scripted configuration sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub heap_types: Vec<HeapType>,
    pub cpu_page_properties: Vec<CpuPageProperty>,
    pub memory_pools: Vec<MemoryPool>,
    /// Custom heaps are reachable interactively; the sweep skips them unless set
    pub include_custom_heap: bool,
    pub buffer_representations: Vec<BufferRepresentation>,
    pub thread_group_counts: Vec<u32>,
    /// Input sizes in bytes
    pub input_buffer_sizes: Vec<u64>,
    pub elems_per_thread: Vec<u32>,
    pub thread_elem_strides: Vec<u32>,
    pub group_elem_offsets: Vec<u32>,
    pub thread_elem_offsets: Vec<u32>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            heap_types: HeapType::ALL.to_vec(),
            cpu_page_properties: CpuPageProperty::ALL.to_vec(),
            memory_pools: MemoryPool::ALL.to_vec(),
            include_custom_heap: false,
            buffer_representations: vec![BufferRepresentation::Raw],
            thread_group_counts: vec![32768],
            input_buffer_sizes: vec![32 * MIB, 64 * MIB, 96 * MIB, 128 * MIB],
            elems_per_thread: vec![1],
            thread_elem_strides: vec![1],
            group_elem_offsets: vec![1],
            thread_elem_offsets: vec![1],
        }
    }
}

impl SweepConfig {
    /// Every heap type and every representation
    pub fn full() -> Self {
        Self {
            include_custom_heap: true,
            buffer_representations: BufferRepresentation::ALL.to_vec(),
            ..Self::default()
        }
    }
}

/// Initial values of the interactive settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub heap_type: HeapType,
    pub cpu_page_property: CpuPageProperty,
    pub memory_pool: MemoryPool,
    pub input_buffer_type: BufferRepresentation,
    pub input_buffer_size_mb: i64,
    pub input_buffer_size_kb: i64,
    pub input_buffer_size_bytes: i64,
    pub elems_per_thread: i64,
    pub thread_elem_stride: i64,
    pub group_elem_offset: i64,
    pub thread_elem_offset: i64,
    pub num_thread_groups: i64,
    pub read_from_gpu_mem: bool,
    pub upload_path: UploadPath,
    pub background_upload_size_mb: i64,
    pub background_upload_wait_ms: i64,
    pub vsync: bool,
    pub stable_power_state: bool,
    pub driver_background_threads: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            heap_type: HeapType::Upload,
            cpu_page_property: CpuPageProperty::NotAvailable,
            memory_pool: MemoryPool::L0,
            input_buffer_type: BufferRepresentation::Raw,
            input_buffer_size_mb: 16,
            input_buffer_size_kb: 0,
            input_buffer_size_bytes: 0,
            elems_per_thread: 1,
            thread_elem_stride: 1,
            group_elem_offset: 1,
            thread_elem_offset: 1,
            num_thread_groups: 4096,
            read_from_gpu_mem: false,
            upload_path: UploadPath::FastUploadCopyQueue,
            background_upload_size_mb: 0,
            background_upload_wait_ms: 0,
            vsync: true,
            stable_power_state: true,
            driver_background_threads: false,
        }
    }
}

/// Software device parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub adapter_name: String,
    /// Unified memory architecture
    pub uma: bool,
    pub cache_coherent_uma: bool,
    pub gpu_upload_heap_supported: bool,
    pub enhanced_barriers_supported: bool,
    pub shader_model_major: u32,
    pub shader_model_minor: u32,
    pub local_memory_mb: u64,
    pub non_local_memory_mb: u64,
    pub descriptor_capacity: usize,
    pub upload_ring_mb: u64,
    pub upload_ring_max_submissions: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let sim = SimDeviceConfig::default();
        Self {
            adapter_name: sim.adapter_name,
            uma: sim.architecture.uma,
            cache_coherent_uma: sim.architecture.cache_coherent_uma,
            gpu_upload_heap_supported: sim.gpu_upload_heap_supported,
            enhanced_barriers_supported: sim.enhanced_barriers_supported,
            shader_model_major: sim.shader_model.0,
            shader_model_minor: sim.shader_model.1,
            local_memory_mb: sim.local_memory_bytes / MIB,
            non_local_memory_mb: sim.non_local_memory_bytes / MIB,
            descriptor_capacity: sim.descriptor_capacity,
            upload_ring_mb: sim.upload_ring.capacity / MIB,
            upload_ring_max_submissions: sim.upload_ring.max_submissions,
        }
    }
}

impl DeviceConfig {
    pub fn sim_config(&self) -> SimDeviceConfig {
        SimDeviceConfig {
            adapter_name: self.adapter_name.clone(),
            architecture: Architecture {
                uma: self.uma,
                cache_coherent_uma: self.cache_coherent_uma,
            },
            gpu_upload_heap_supported: self.gpu_upload_heap_supported,
            enhanced_barriers_supported: self.enhanced_barriers_supported,
            shader_model: (self.shader_model_major, self.shader_model_minor),
            local_memory_bytes: self.local_memory_mb * MIB,
            non_local_memory_bytes: self.non_local_memory_mb * MIB,
            descriptor_capacity: self.descriptor_capacity,
            upload_ring: UploadRingConfig {
                capacity: self.upload_ring_mb * MIB,
                max_submissions: self.upload_ring_max_submissions,
            },
        }
    }
}

/// Top-level run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BenchConfig {
    pub benchmark: BenchmarkSection,
    pub sweep: SweepConfig,
    pub workload: WorkloadConfig,
    pub device: DeviceConfig,
    pub log: LogConfig,
}

/// Configuration loader
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: vec![ConfigSource::Default],
            env_prefix: None,
        }
    }

    /// Add a file source
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.sources
            .push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Add an in-memory TOML source
    pub fn with_str(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Memory(toml.into()));
        self
    }

    /// Add environment variable source with prefix
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.sources.push(ConfigSource::Env);
        self
    }

    /// Load configuration from all sources
    pub fn load(&self) -> Result<BenchConfig> {
        let mut config = BenchConfig::default();

        for source in &self.sources {
            match source {
                ConfigSource::Default => {}
                ConfigSource::File(path) => {
                    let content = std::fs::read_to_string(path)?;
                    config = Self::parse(&content)?;
                    tracing::debug!(path = %path.display(), "Loaded configuration file");
                }
                ConfigSource::Env => {
                    if let Some(prefix) = &self.env_prefix {
                        Self::apply_env_overrides(&mut config, prefix)?;
                    }
                }
                ConfigSource::Memory(content) => {
                    config = Self::parse(content)?;
                }
            }
        }

        Self::expand_paths(&mut config);
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(toml: &str) -> Result<BenchConfig> {
        let mut config = Self::parse(toml)?;
        Self::expand_paths(&mut config);
        Ok(config)
    }

    /// Get default configuration
    #[must_use]
    pub fn default_config() -> BenchConfig {
        BenchConfig::default()
    }

    fn parse(toml: &str) -> Result<BenchConfig> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn expand_paths(config: &mut BenchConfig) {
        config.benchmark.output = Self::expand_path(&config.benchmark.output);
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(config: &mut BenchConfig, prefix: &str) -> Result<()> {
        // Benchmark overrides
        if let Some(val) = env_parse(prefix, "BENCHMARK_WARMUP_FRAMES")? {
            config.benchmark.warmup_frames = val;
        }
        if let Some(val) = env_parse(prefix, "BENCHMARK_MEASURE_FRAMES")? {
            config.benchmark.measure_frames = val;
        }
        if let Some(val) = env_var(prefix, "BENCHMARK_OUTPUT") {
            config.benchmark.output = PathBuf::from(val);
        }

        // Sweep overrides
        if let Some(val) = env_parse(prefix, "SWEEP_INCLUDE_CUSTOM_HEAP")? {
            config.sweep.include_custom_heap = val;
        }

        // Workload overrides
        if let Some(val) = env_enum(prefix, "WORKLOAD_HEAP_TYPE")? {
            config.workload.heap_type = val;
        }
        if let Some(val) = env_enum(prefix, "WORKLOAD_INPUT_BUFFER_TYPE")? {
            config.workload.input_buffer_type = val;
        }
        if let Some(val) = env_enum(prefix, "WORKLOAD_UPLOAD_PATH")? {
            config.workload.upload_path = val;
        }
        if let Some(val) = env_parse(prefix, "WORKLOAD_NUM_THREAD_GROUPS")? {
            config.workload.num_thread_groups = val;
        }
        if let Some(val) = env_parse(prefix, "WORKLOAD_READ_FROM_GPU_MEM")? {
            config.workload.read_from_gpu_mem = val;
        }
        if let Some(val) = env_parse(prefix, "WORKLOAD_BACKGROUND_UPLOAD_SIZE_MB")? {
            config.workload.background_upload_size_mb = val;
        }
        if let Some(val) = env_parse(prefix, "WORKLOAD_BACKGROUND_UPLOAD_WAIT_MS")? {
            config.workload.background_upload_wait_ms = val;
        }

        // Device overrides
        if let Some(val) = env_var(prefix, "DEVICE_ADAPTER_NAME") {
            config.device.adapter_name = val;
        }
        if let Some(val) = env_parse(prefix, "DEVICE_UMA")? {
            config.device.uma = val;
        }
        if let Some(val) = env_parse(prefix, "DEVICE_GPU_UPLOAD_HEAP_SUPPORTED")? {
            config.device.gpu_upload_heap_supported = val;
        }
        if let Some(val) = env_parse(prefix, "DEVICE_ENHANCED_BARRIERS_SUPPORTED")? {
            config.device.enhanced_barriers_supported = val;
        }

        // Log overrides
        if let Some(val) = env_var(prefix, "LOG_LEVEL") {
            config.log.level = val.parse().map_err(|e| ConfigError::InvalidValue {
                field: "log.level".to_string(),
                message: format!("{e}"),
            })?;
        }
        if let Some(val) = env_var(prefix, "LOG_FORMAT") {
            config.log.format = val.parse().map_err(|e| ConfigError::InvalidValue {
                field: "log.format".to_string(),
                message: format!("{e}"),
            })?;
        }

        Ok(())
    }

    /// Expand path with tilde
    fn expand_path(path: &Path) -> PathBuf {
        if let Some(path_str) = path.to_str() {
            if let Some(rest) = path_str.strip_prefix("~/") {
                if let Some(home) = dirs::home_dir() {
                    return home.join(rest);
                }
            }
        }
        path.to_path_buf()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn env_var(prefix: &str, key: &str) -> Option<String> {
    std::env::var(format!("{prefix}_{key}")).ok()
}

fn env_parse<T: FromStr>(prefix: &str, key: &str) -> Result<Option<T>> {
    env_var(prefix, key)
        .map(|val| {
            val.parse()
                .map_err(|_| ConfigError::EnvVar(format!("Invalid {prefix}_{key} value: {val}")))
        })
        .transpose()
}

fn env_enum<T: SettingEnum>(prefix: &str, key: &str) -> Result<Option<T>> {
    env_var(prefix, key)
        .map(|val| {
            T::parse(&val)
                .ok_or_else(|| ConfigError::EnvVar(format!("Invalid {prefix}_{key} value: {val}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempool_telemetry::LogLevel;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_benchmark_defaults() {
        let config = BenchConfig::default();
        assert_eq!(config.benchmark.warmup_frames, 8);
        assert_eq!(config.benchmark.measure_frames, 64);
        assert_eq!(config.benchmark.total_frames(), 72);
        assert_eq!(config.benchmark.output, PathBuf::from("Benchmark.csv"));
    }

    #[test]
    fn test_sweep_defaults_are_reduced() {
        let sweep = SweepConfig::default();
        assert!(!sweep.include_custom_heap);
        assert_eq!(sweep.buffer_representations, vec![BufferRepresentation::Raw]);
        assert_eq!(sweep.thread_group_counts, vec![32768]);
        assert_eq!(
            sweep.input_buffer_sizes,
            vec![32 * MIB, 64 * MIB, 96 * MIB, 128 * MIB]
        );
        assert_eq!(sweep.heap_types.len(), 4);

        let full = SweepConfig::full();
        assert!(full.include_custom_heap);
        assert_eq!(full.buffer_representations.len(), 4);
    }

    #[test]
    fn test_device_config_round_trips_to_sim() {
        let device = DeviceConfig::default();
        let sim = device.sim_config();
        assert_eq!(sim, SimDeviceConfig::default());
    }

    #[test]
    fn test_load_from_str_sections() {
        let toml = r#"
            [benchmark]
            warmup_frames = 2
            measure_frames = 4
            output = "out.csv"

            [sweep]
            heap_types = ["upload", "gpu_upload"]
            include_custom_heap = true
            buffer_representations = ["raw", "constant"]
            input_buffer_sizes = [65536]

            [workload]
            upload_path = "direct_queue"
            num_thread_groups = 16

            [device]
            uma = true

            [log]
            level = "debug"
        "#;
        let config = ConfigLoader::load_from_str(toml).unwrap();
        assert_eq!(config.benchmark.total_frames(), 6);
        assert_eq!(config.sweep.heap_types, vec![HeapType::Upload, HeapType::GpuUpload]);
        assert!(config.sweep.include_custom_heap);
        assert_eq!(config.sweep.input_buffer_sizes, vec![65536]);
        assert_eq!(config.sweep.thread_group_counts, vec![32768]);
        assert_eq!(config.workload.upload_path, UploadPath::DirectQueue);
        assert_eq!(config.workload.num_thread_groups, 16);
        assert_eq!(config.workload.input_buffer_size_mb, 16);
        assert!(config.device.uma);
        assert_eq!(config.log.level, LogLevel::Debug);
    }

    #[test]
    fn test_load_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[benchmark]\nmeasure_frames = 10\n")
            .unwrap();

        let config = ConfigLoader::new().with_file(temp_file.path()).load().unwrap();
        assert_eq!(config.benchmark.measure_frames, 10);
        assert_eq!(config.benchmark.warmup_frames, 8);
    }

    #[test]
    fn test_load_missing_file() {
        let loader = ConfigLoader::new().with_file("/nonexistent/mempool.toml");
        assert!(matches!(loader.load(), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        assert!(matches!(
            ConfigLoader::load_from_str("invalid toml {{"),
            Err(ConfigError::Parse(_))
        ));
        assert!(ConfigLoader::load_from_str("[sweep]\nheap_types = [\"huge\"]").is_err());
    }

    #[test]
    fn test_memory_source() {
        let config = ConfigLoader::new()
            .with_str("[workload]\nread_from_gpu_mem = true")
            .load()
            .unwrap();
        assert!(config.workload.read_from_gpu_mem);
    }

    #[test]
    fn test_env_overrides() {
        // Unique prefix per test, tests run in parallel
        unsafe {
            std::env::set_var("MPENV_BENCHMARK_MEASURE_FRAMES", "12");
            std::env::set_var("MPENV_WORKLOAD_UPLOAD_PATH", "upload_copy_queue");
            std::env::set_var("MPENV_WORKLOAD_HEAP_TYPE", "Default");
            std::env::set_var("MPENV_DEVICE_UMA", "true");
            std::env::set_var("MPENV_LOG_LEVEL", "error");
        }
        let config = ConfigLoader::new().with_env_prefix("MPENV").load().unwrap();
        assert_eq!(config.benchmark.measure_frames, 12);
        assert_eq!(config.workload.upload_path, UploadPath::UploadCopyQueue);
        assert_eq!(config.workload.heap_type, HeapType::Default);
        assert!(config.device.uma);
        assert_eq!(config.log.level, LogLevel::Error);
        unsafe {
            std::env::remove_var("MPENV_BENCHMARK_MEASURE_FRAMES");
            std::env::remove_var("MPENV_WORKLOAD_UPLOAD_PATH");
            std::env::remove_var("MPENV_WORKLOAD_HEAP_TYPE");
            std::env::remove_var("MPENV_DEVICE_UMA");
            std::env::remove_var("MPENV_LOG_LEVEL");
        }
    }

    #[test]
    fn test_env_override_invalid() {
        unsafe {
            std::env::set_var("MPBAD_WORKLOAD_UPLOAD_PATH", "carrier_pigeon");
        }
        let result = ConfigLoader::new().with_env_prefix("MPBAD").load();
        assert!(matches!(result, Err(ConfigError::EnvVar(_))));
        unsafe {
            std::env::remove_var("MPBAD_WORKLOAD_UPLOAD_PATH");
        }
    }

    #[test]
    fn test_file_overrides_env() {
        unsafe {
            std::env::set_var("MPFILE_BENCHMARK_WARMUP_FRAMES", "3");
        }
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[benchmark]\nwarmup_frames = 5\n").unwrap();

        let config = ConfigLoader::new()
            .with_env_prefix("MPFILE")
            .with_file(temp_file.path())
            .load()
            .unwrap();
        assert_eq!(config.benchmark.warmup_frames, 5);
        unsafe {
            std::env::remove_var("MPFILE_BENCHMARK_WARMUP_FRAMES");
        }
    }

    #[test]
    fn test_path_expansion() {
        let expanded = ConfigLoader::expand_path(Path::new("~/reports/bench.csv"));
        if dirs::home_dir().is_some() {
            assert!(!expanded.to_string_lossy().contains('~'));
        }
        let absolute = PathBuf::from("/tmp/bench.csv");
        assert_eq!(ConfigLoader::expand_path(&absolute), absolute);
    }

    #[test]
    fn test_toml_serialization_roundtrip() {
        let config = BenchConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: BenchConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
