//! Run configuration validation

use crate::app_settings::{
    BACKGROUND_UPLOAD_SIZE_RANGE, BACKGROUND_UPLOAD_WAIT_RANGE, ELEMS_PER_THREAD_RANGE,
    GROUP_ELEM_OFFSET_RANGE, INPUT_BUFFER_SIZE_BYTES_RANGE, INPUT_BUFFER_SIZE_KB_RANGE,
    INPUT_BUFFER_SIZE_MB_RANGE, MAX_CSV_NAME_LEN, MAX_EXPRESSIBLE_INPUT_SIZE, NUM_THREAD_GROUPS_RANGE,
    THREAD_ELEM_OFFSET_RANGE, THREAD_ELEM_STRIDE_RANGE,
};
use crate::config::{BenchConfig, BenchmarkSection, DeviceConfig, SweepConfig, WorkloadConfig};
use mempool_gpu::{
    BufferRepresentation, CpuPageProperty, HeapType, MAX_BUFFER_SIZE, MAX_CONSTANT_BUFFER_SIZE,
    MemoryPool,
};
use mempool_telemetry::{LogConfig, LogOutput};
use std::fmt;
use std::ops::RangeInclusive;

/// Result of configuration validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Errors that prevent the configuration from being used
    pub errors: Vec<ValidationError>,
    /// Non-blocking warnings
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Merges another validation result into this one
    pub fn merge(&mut self, other: Self) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Validation error details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The configuration field that failed validation
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Error classification code
    pub code: ErrorCode,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.code, self.field, self.message)
    }
}

/// Validation warning details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    /// Optional suggestion for resolving the warning
    pub suggestion: Option<String>,
}

impl ValidationWarning {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(
        field: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[WARNING] {}: {}", self.field, self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (Suggestion: {s})")?;
        }
        Ok(())
    }
}

/// Error code classifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A required field is missing or empty
    Required,
    /// A value is outside the acceptable range
    OutOfRange,
    /// Configuration values are in conflict with each other
    Conflict,
}

/// Main configuration validator
#[derive(Debug, Default)]
pub struct Validator {
    /// Report more warnings
    strict_mode: bool,
}

impl Validator {
    #[must_use]
    pub const fn new() -> Self {
        Self { strict_mode: false }
    }

    #[must_use]
    pub const fn with_strict_mode(mut self, enabled: bool) -> Self {
        self.strict_mode = enabled;
        self
    }

    /// Validates a complete `BenchConfig`
    #[must_use]
    pub fn validate(&self, config: &BenchConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        result.merge(self.validate_benchmark(&config.benchmark));
        result.merge(self.validate_sweep(&config.sweep));
        result.merge(self.validate_workload(&config.workload));
        result.merge(self.validate_device(&config.device));
        result.merge(self.validate_log(&config.log));

        result.merge(ConsistencyRule.validate(config));
        result
    }

    #[must_use]
    pub fn validate_benchmark(&self, config: &BenchmarkSection) -> ValidationResult {
        let mut result = ValidationResult::new();

        if config.measure_frames == 0 {
            result.add_error(ValidationError::new(
                "benchmark.measure_frames",
                "At least one measurement frame is required",
                ErrorCode::OutOfRange,
            ));
        }

        match config.output.to_str() {
            Some("") => result.add_error(ValidationError::new(
                "benchmark.output",
                "Report file name must not be empty",
                ErrorCode::Required,
            )),
            Some(name) if name.chars().count() > MAX_CSV_NAME_LEN => {
                result.add_error(ValidationError::new(
                    "benchmark.output",
                    format!(
                        "Report file name is {} characters, the limit is {MAX_CSV_NAME_LEN}",
                        name.chars().count()
                    ),
                    ErrorCode::OutOfRange,
                ));
            }
            Some(_) => {}
            None => result.add_error(ValidationError::new(
                "benchmark.output",
                "Report file name must be valid UTF-8",
                ErrorCode::Conflict,
            )),
        }

        if (config.warmup_frames as usize) < mempool_gpu::RENDER_LATENCY {
            result.add_warning(ValidationWarning::with_suggestion(
                "benchmark.warmup_frames",
                format!(
                    "{} warmup frames is less than the render latency, samples may include the previous configuration",
                    config.warmup_frames
                ),
                format!("Use at least {} warmup frames", mempool_gpu::RENDER_LATENCY),
            ));
        }
        result
    }

    #[must_use]
    pub fn validate_sweep(&self, config: &SweepConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        let axes = [
            ("sweep.heap_types", config.heap_types.is_empty()),
            ("sweep.cpu_page_properties", config.cpu_page_properties.is_empty()),
            ("sweep.memory_pools", config.memory_pools.is_empty()),
            ("sweep.buffer_representations", config.buffer_representations.is_empty()),
            ("sweep.thread_group_counts", config.thread_group_counts.is_empty()),
            ("sweep.input_buffer_sizes", config.input_buffer_sizes.is_empty()),
            ("sweep.elems_per_thread", config.elems_per_thread.is_empty()),
            ("sweep.thread_elem_strides", config.thread_elem_strides.is_empty()),
            ("sweep.group_elem_offsets", config.group_elem_offsets.is_empty()),
            ("sweep.thread_elem_offsets", config.thread_elem_offsets.is_empty()),
        ];
        for (field, empty) in axes {
            if empty {
                result.add_error(ValidationError::new(
                    field,
                    "Sweep axis must list at least one value",
                    ErrorCode::Required,
                ));
            }
        }

        let int_axes: [(&str, &[u32], &RangeInclusive<i64>); 5] = [
            ("sweep.thread_group_counts", &config.thread_group_counts, &NUM_THREAD_GROUPS_RANGE),
            ("sweep.elems_per_thread", &config.elems_per_thread, &ELEMS_PER_THREAD_RANGE),
            ("sweep.thread_elem_strides", &config.thread_elem_strides, &THREAD_ELEM_STRIDE_RANGE),
            ("sweep.group_elem_offsets", &config.group_elem_offsets, &GROUP_ELEM_OFFSET_RANGE),
            ("sweep.thread_elem_offsets", &config.thread_elem_offsets, &THREAD_ELEM_OFFSET_RANGE),
        ];
        for (field, values, range) in int_axes {
            for value in values {
                if !range.contains(&i64::from(*value)) {
                    result.add_error(out_of_range(field, i64::from(*value), range));
                }
            }
        }

        let max_size = MAX_BUFFER_SIZE.min(MAX_EXPRESSIBLE_INPUT_SIZE);
        for size in &config.input_buffer_sizes {
            if *size == 0 || *size > max_size {
                result.add_error(ValidationError::new(
                    "sweep.input_buffer_sizes",
                    format!("Input size {size} is outside 1..={max_size}"),
                    ErrorCode::OutOfRange,
                ));
            }
        }

        if config.buffer_representations.contains(&BufferRepresentation::Constant) {
            let filtered = config
                .input_buffer_sizes
                .iter()
                .filter(|size| **size > MAX_CONSTANT_BUFFER_SIZE)
                .count();
            if filtered > 0 {
                result.add_warning(ValidationWarning::new(
                    "sweep.buffer_representations",
                    format!(
                        "{filtered} input sizes exceed the {MAX_CONSTANT_BUFFER_SIZE} byte constant buffer maximum and are skipped for the constant representation"
                    ),
                ));
            }
        }

        if config.heap_types.contains(&HeapType::Custom) && !config.include_custom_heap {
            if self.strict_mode {
                result.add_warning(ValidationWarning::with_suggestion(
                    "sweep.heap_types",
                    "Custom heaps are listed but excluded from the sweep",
                    "Set include_custom_heap = true to sweep them",
                ));
            }
        }

        if config.include_custom_heap && !config.heap_types.contains(&HeapType::Custom) {
            result.add_warning(ValidationWarning::new(
                "sweep.include_custom_heap",
                "include_custom_heap is set but heap_types does not list custom",
            ));
        }
        result
    }

    #[must_use]
    pub fn validate_workload(&self, config: &WorkloadConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        let fields: [(&str, i64, &RangeInclusive<i64>); 10] = [
            ("workload.input_buffer_size_mb", config.input_buffer_size_mb, &INPUT_BUFFER_SIZE_MB_RANGE),
            ("workload.input_buffer_size_kb", config.input_buffer_size_kb, &INPUT_BUFFER_SIZE_KB_RANGE),
            ("workload.input_buffer_size_bytes", config.input_buffer_size_bytes, &INPUT_BUFFER_SIZE_BYTES_RANGE),
            ("workload.elems_per_thread", config.elems_per_thread, &ELEMS_PER_THREAD_RANGE),
            ("workload.thread_elem_stride", config.thread_elem_stride, &THREAD_ELEM_STRIDE_RANGE),
            ("workload.group_elem_offset", config.group_elem_offset, &GROUP_ELEM_OFFSET_RANGE),
            ("workload.thread_elem_offset", config.thread_elem_offset, &THREAD_ELEM_OFFSET_RANGE),
            ("workload.num_thread_groups", config.num_thread_groups, &NUM_THREAD_GROUPS_RANGE),
            ("workload.background_upload_size_mb", config.background_upload_size_mb, &BACKGROUND_UPLOAD_SIZE_RANGE),
            ("workload.background_upload_wait_ms", config.background_upload_wait_ms, &BACKGROUND_UPLOAD_WAIT_RANGE),
        ];
        for (field, value, range) in fields {
            if !range.contains(&value) {
                result.add_error(out_of_range(field, value, range));
            }
        }

        if config.input_buffer_size_mb == 0
            && config.input_buffer_size_kb == 0
            && config.input_buffer_size_bytes == 0
        {
            result.add_warning(ValidationWarning::new(
                "workload.input_buffer_size_mb",
                "Input size is zero and will be raised to one byte",
            ));
        }
        result
    }

    #[must_use]
    pub fn validate_device(&self, config: &DeviceConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        if config.adapter_name.trim().is_empty() {
            result.add_error(ValidationError::new(
                "device.adapter_name",
                "Adapter name must not be empty",
                ErrorCode::Required,
            ));
        }
        if config.local_memory_mb == 0 {
            result.add_error(ValidationError::new(
                "device.local_memory_mb",
                "Local memory budget must be greater than 0",
                ErrorCode::OutOfRange,
            ));
        }
        if config.descriptor_capacity == 0 {
            result.add_error(ValidationError::new(
                "device.descriptor_capacity",
                "Descriptor heap needs at least one slot",
                ErrorCode::OutOfRange,
            ));
        }
        if config.upload_ring_mb == 0 || config.upload_ring_max_submissions == 0 {
            result.add_error(ValidationError::new(
                "device.upload_ring_mb",
                "Upload ring needs a non-zero capacity and submission count",
                ErrorCode::OutOfRange,
            ));
        }
        if config.cache_coherent_uma && !config.uma {
            result.add_error(ValidationError::new(
                "device.cache_coherent_uma",
                "Cache-coherent UMA requires uma = true",
                ErrorCode::Conflict,
            ));
        }
        let shader_model = (config.shader_model_major, config.shader_model_minor);
        if !config.enhanced_barriers_supported || shader_model < (6, 6) {
            result.add_warning(ValidationWarning::new(
                "device",
                "The device lacks a required capability and startup will fail",
            ));
        }
        result
    }

    #[must_use]
    pub fn validate_log(&self, config: &LogConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        let file = match &config.output {
            LogOutput::File(path) | LogOutput::Both { file: path, .. } => Some(path),
            LogOutput::Stdout | LogOutput::Stderr => None,
        };
        if let Some(path) = file {
            if path.as_os_str().is_empty() {
                result.add_error(ValidationError::new(
                    "log.output",
                    "Log file path must not be empty",
                    ErrorCode::Required,
                ));
            }
        }
        if config.output == LogOutput::Stdout {
            result.add_warning(ValidationWarning::with_suggestion(
                "log.output",
                "Logs share stdout with printed reports",
                "Log to stderr or a file",
            ));
        }
        result
    }
}

fn out_of_range(field: &str, value: i64, range: &RangeInclusive<i64>) -> ValidationError {
    ValidationError::new(
        field,
        format!("{value} is outside {}..={}", range.start(), range.end()),
        ErrorCode::OutOfRange,
    )
}

/// Cross-section validation rule
pub trait ValidationRule {
    fn validate(&self, config: &BenchConfig) -> ValidationResult;

    fn name(&self) -> &'static str;
}

/// Sweep axes the configured device can never run
pub struct ConsistencyRule;

impl ValidationRule for ConsistencyRule {
    fn validate(&self, config: &BenchConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let sweep = &config.sweep;
        let device = &config.device;

        if sweep.heap_types.contains(&HeapType::GpuUpload) && !device.gpu_upload_heap_supported {
            result.add_warning(ValidationWarning::new(
                "sweep.heap_types",
                "GPU upload heaps are unsupported on this device and are skipped",
            ));
        }
        if sweep.include_custom_heap && device.uma && sweep.memory_pools == [MemoryPool::L1] {
            result.add_warning(ValidationWarning::new(
                "sweep.memory_pools",
                "Only L1 is listed but L1 is invalid on UMA, no custom heap configuration remains",
            ));
        }
        if config.workload.heap_type == HeapType::GpuUpload && !device.gpu_upload_heap_supported {
            result.add_error(ValidationError::new(
                "workload.heap_type",
                "GPU upload heap selected but unsupported by the device",
                ErrorCode::Conflict,
            ));
        }
        if config.workload.heap_type == HeapType::Custom
            && ((device.uma && config.workload.memory_pool == MemoryPool::L1)
                || (!device.uma
                    && config.workload.memory_pool == MemoryPool::L1
                    && config.workload.cpu_page_property == CpuPageProperty::WriteBack))
        {
            result.add_warning(ValidationWarning::new(
                "workload.memory_pool",
                "Initial custom heap is invalid for this architecture and will be clamped",
            ));
        }
        result
    }

    fn name(&self) -> &'static str {
        "ConsistencyRule"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validation_result_operations() {
        let mut result = ValidationResult::new();
        assert!(result.is_valid());
        assert!(!result.has_warnings());

        result.add_error(ValidationError::new("test", "error", ErrorCode::Required));
        assert!(!result.is_valid());

        result.add_warning(ValidationWarning::new("test", "warning"));
        assert!(result.has_warnings());

        let mut other = ValidationResult::new();
        other.merge(result);
        assert_eq!(other.errors.len(), 1);
        assert_eq!(other.warnings.len(), 1);
    }

    #[test]
    fn test_error_and_warning_display() {
        let error = ValidationError::new("sweep.heap_types", "empty", ErrorCode::Required);
        assert_eq!(error.to_string(), "[Required] sweep.heap_types: empty");

        let warning = ValidationWarning::with_suggestion("log.output", "shared", "use stderr");
        assert_eq!(
            warning.to_string(),
            "[WARNING] log.output: shared (Suggestion: use stderr)"
        );
    }

    #[test]
    fn test_default_config_is_valid() {
        let result = Validator::new().validate(&BenchConfig::default());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(!result.has_warnings(), "{:?}", result.warnings);
    }

    #[test]
    fn test_benchmark_errors() {
        let section = BenchmarkSection {
            warmup_frames: 0,
            measure_frames: 0,
            output: PathBuf::new(),
        };
        let result = Validator::new().validate_benchmark(&section);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_report_name_length() {
        let validator = Validator::new();
        let mut section = BenchmarkSection::default();

        section.output = PathBuf::from("r".repeat(MAX_CSV_NAME_LEN));
        assert!(validator.validate_benchmark(&section).is_valid());

        section.output = PathBuf::from(format!("{}/{}", "d".repeat(200), "r".repeat(135)));
        let result = validator.validate_benchmark(&section);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "benchmark.output");
        assert_eq!(result.errors[0].code, ErrorCode::OutOfRange);
    }

    #[cfg(unix)]
    #[test]
    fn test_report_name_must_be_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let section = BenchmarkSection {
            output: PathBuf::from(OsStr::from_bytes(b"bench\xff.csv")),
            ..BenchmarkSection::default()
        };
        let result = Validator::new().validate_benchmark(&section);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "benchmark.output");
    }

    #[test]
    fn test_sweep_axis_errors() {
        let mut sweep = SweepConfig::default();
        sweep.heap_types.clear();
        sweep.thread_group_counts = vec![0, 70000];
        sweep.input_buffer_sizes = vec![0, 2 * 1024 * 1024 * 1024];
        sweep.elems_per_thread = vec![65];

        let result = Validator::new().validate_sweep(&sweep);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"sweep.heap_types"));
        assert_eq!(fields.iter().filter(|f| **f == "sweep.thread_group_counts").count(), 2);
        assert_eq!(fields.iter().filter(|f| **f == "sweep.input_buffer_sizes").count(), 2);
        assert!(fields.contains(&"sweep.elems_per_thread"));
    }

    #[test]
    fn test_constant_representation_warning() {
        let mut sweep = SweepConfig::default();
        sweep.buffer_representations.push(BufferRepresentation::Constant);
        let result = Validator::new().validate_sweep(&sweep);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].message.starts_with("4 input sizes"));
    }

    #[test]
    fn test_strict_mode_reports_custom_exclusion() {
        let sweep = SweepConfig::default();
        assert!(!Validator::new().validate_sweep(&sweep).has_warnings());
        assert!(
            Validator::new()
                .with_strict_mode(true)
                .validate_sweep(&sweep)
                .has_warnings()
        );
    }

    #[test]
    fn test_workload_ranges() {
        let mut workload = WorkloadConfig::default();
        workload.num_thread_groups = 0;
        workload.background_upload_wait_ms = 101;
        let result = Validator::new().validate_workload(&workload);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.code == ErrorCode::OutOfRange));
    }

    #[test]
    fn test_device_conflicts() {
        let mut device = DeviceConfig::default();
        device.cache_coherent_uma = true;
        device.shader_model_minor = 5;
        let result = Validator::new().validate_device(&device);
        assert_eq!(result.errors[0].code, ErrorCode::Conflict);
        assert!(result.has_warnings());
    }

    #[test]
    fn test_log_file_path_required() {
        let mut log = LogConfig::default();
        log.output = LogOutput::File(PathBuf::new());
        assert!(!Validator::new().validate_log(&log).is_valid());
    }

    #[test]
    fn test_consistency_rule() {
        let mut config = BenchConfig::default();
        config.device.gpu_upload_heap_supported = false;
        config.workload.heap_type = HeapType::GpuUpload;

        let rule = ConsistencyRule;
        let result = rule.validate(&config);
        assert_eq!(rule.name(), "ConsistencyRule");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }
}
