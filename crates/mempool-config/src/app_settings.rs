//! The benchmark's setting set
//!
//! Registers every tunable the frame loop reads and offers [`LiveSettings`],
//! a typed copy of them taken once per update cycle.

use crate::config::WorkloadConfig;
use crate::settings::{SettingDef, SettingEnum, SettingsRegistry};
use crate::Result;
use mempool_gpu::{
    BufferRepresentation, CpuPageProperty, HeapDescriptor, HeapType, MemoryPool,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Setting names
pub mod names {
    pub const HEAP_TYPE: &str = "HeapType";
    pub const CPU_PAGE_PROPERTY: &str = "CPUPageProperty";
    pub const MEMORY_POOL: &str = "MemoryPool";
    pub const INPUT_BUFFER_TYPE: &str = "InputBufferType";
    pub const INPUT_BUFFER_SIZE_MB: &str = "InputBufferSizeMB";
    pub const INPUT_BUFFER_SIZE_KB: &str = "InputBufferSizeKB";
    pub const INPUT_BUFFER_SIZE_BYTES: &str = "InputBufferSizeBytes";
    pub const ELEMS_PER_THREAD: &str = "ElemsPerThread";
    pub const THREAD_ELEM_STRIDE: &str = "ThreadElemStride";
    pub const GROUP_ELEM_OFFSET: &str = "GroupElemOffset";
    pub const THREAD_ELEM_OFFSET: &str = "ThreadElemOffset";
    pub const NUM_THREAD_GROUPS: &str = "NumThreadGroups";
    pub const READ_FROM_GPU_MEM: &str = "ReadFromGPUMem";
    pub const BUFFER_UPLOAD_PATH: &str = "BufferUploadPath";
    pub const BACKGROUND_UPLOAD_SIZE: &str = "BackgroundUploadSize";
    pub const BACKGROUND_UPLOAD_WAIT_TIME: &str = "BackgroundUploadWaitTime";
    pub const NUM_INPUT_BUFFER_ELEMS: &str = "NumInputBufferElems";
    pub const INPUT_BUFFER_IDX: &str = "InputBufferIdx";
    pub const OUTPUT_BUFFER_IDX: &str = "OutputBufferIdx";
    pub const ENABLE_VSYNC: &str = "EnableVSync";
    pub const STABLE_POWER_STATE: &str = "StablePowerState";
    pub const ENABLE_DRIVER_BACKGROUND_THREADS: &str = "EnableDriverBackgroundThreads";
    pub const BENCHMARK_CSV_NAME: &str = "BenchmarkCSVName";
}

/// Settings group shown first
pub const GROUP_TEST_CONFIG: &str = "Test Config";
/// Device toggles
pub const GROUP_DEBUG: &str = "Debug";

pub const INPUT_BUFFER_SIZE_MB_RANGE: RangeInclusive<i64> = 0..=256;
pub const INPUT_BUFFER_SIZE_KB_RANGE: RangeInclusive<i64> = 0..=1024;
pub const INPUT_BUFFER_SIZE_BYTES_RANGE: RangeInclusive<i64> = 0..=1024;
pub const ELEMS_PER_THREAD_RANGE: RangeInclusive<i64> = 1..=64;
pub const THREAD_ELEM_STRIDE_RANGE: RangeInclusive<i64> = 1..=64;
pub const GROUP_ELEM_OFFSET_RANGE: RangeInclusive<i64> = 0..=16;
pub const THREAD_ELEM_OFFSET_RANGE: RangeInclusive<i64> = 0..=16;
pub const NUM_THREAD_GROUPS_RANGE: RangeInclusive<i64> = 1..=65535;
pub const BACKGROUND_UPLOAD_SIZE_RANGE: RangeInclusive<i64> = 0..=256;
pub const BACKGROUND_UPLOAD_WAIT_RANGE: RangeInclusive<i64> = 0..=100;
/// Longest report file name, in characters
pub const MAX_CSV_NAME_LEN: usize = 255;

const MIB: u64 = 1024 * 1024;
const KIB: u64 = 1024;

/// Largest input size the three size settings can express
pub const MAX_EXPRESSIBLE_INPUT_SIZE: u64 = *INPUT_BUFFER_SIZE_MB_RANGE.end() as u64 * MIB
    + *INPUT_BUFFER_SIZE_KB_RANGE.end() as u64 * KIB
    + *INPUT_BUFFER_SIZE_BYTES_RANGE.end() as u64;

/// Changes that require the input, staging and output buffers to be rebuilt
pub const REBUILD_SETTINGS: &[&str] = &[
    names::INPUT_BUFFER_SIZE_MB,
    names::INPUT_BUFFER_SIZE_KB,
    names::INPUT_BUFFER_SIZE_BYTES,
    names::NUM_THREAD_GROUPS,
    names::HEAP_TYPE,
    names::CPU_PAGE_PROPERTY,
    names::MEMORY_POOL,
    names::INPUT_BUFFER_TYPE,
];

/// Changes that require the compute kernel to be recompiled
pub const RECOMPILE_SETTINGS: &[&str] = &[
    names::INPUT_BUFFER_SIZE_MB,
    names::INPUT_BUFFER_SIZE_KB,
    names::INPUT_BUFFER_SIZE_BYTES,
    names::ELEMS_PER_THREAD,
    names::THREAD_ELEM_STRIDE,
    names::GROUP_ELEM_OFFSET,
    names::THREAD_ELEM_OFFSET,
    names::INPUT_BUFFER_TYPE,
];

/// How the payload reaches an input buffer the CPU cannot write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPath {
    /// Staging copy recorded on the graphics command list
    DirectQueue,
    /// Copy queue submission the graphics queue waits on
    UploadCopyQueue,
    /// Copy queue batch with no graphics queue wait
    FastUploadCopyQueue,
}

impl UploadPath {
    pub const fn label(self) -> &'static str {
        match self {
            Self::DirectQueue => "DIRECT Queue",
            Self::UploadCopyQueue => "Upload COPY Queue",
            Self::FastUploadCopyQueue => "Fast Upload COPY Queue",
        }
    }
}

impl fmt::Display for UploadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl SettingEnum for UploadPath {
    const VARIANTS: &'static [Self] = &[
        Self::DirectQueue,
        Self::UploadCopyQueue,
        Self::FastUploadCopyQueue,
    ];

    fn label(self) -> &'static str {
        UploadPath::label(self)
    }

    fn key(self) -> &'static str {
        match self {
            Self::DirectQueue => "direct_queue",
            Self::UploadCopyQueue => "upload_copy_queue",
            Self::FastUploadCopyQueue => "fast_upload_copy_queue",
        }
    }
}

fn range_def(
    name: &'static str,
    group: &'static str,
    label: &'static str,
    default: i64,
    range: &RangeInclusive<i64>,
) -> SettingDef {
    SettingDef::int(name, group, label, default, *range.start(), *range.end())
}

/// Register the full setting set with initial values from `workload`
pub fn register_app_settings(
    registry: &mut SettingsRegistry,
    workload: &WorkloadConfig,
    csv_name: &str,
) -> Result<()> {
    use names::*;

    let test = GROUP_TEST_CONFIG;
    let debug = GROUP_DEBUG;

    registry.register(SettingDef::enumeration(HEAP_TYPE, test, "Heap Type", workload.heap_type))?;
    registry.register(
        SettingDef::enumeration(
            CPU_PAGE_PROPERTY,
            test,
            "Heap CPUPageProperty",
            workload.cpu_page_property,
        )
        .hidden(),
    )?;
    registry.register(
        SettingDef::enumeration(MEMORY_POOL, test, "Heap MemoryPool", workload.memory_pool)
            .hidden(),
    )?;
    registry.register(SettingDef::enumeration(
        INPUT_BUFFER_TYPE,
        test,
        "Input Buffer Type",
        workload.input_buffer_type,
    ))?;

    registry.register(range_def(
        INPUT_BUFFER_SIZE_MB,
        test,
        "Input Buffer Size MB",
        workload.input_buffer_size_mb,
        &INPUT_BUFFER_SIZE_MB_RANGE,
    ))?;
    registry.register(range_def(
        INPUT_BUFFER_SIZE_KB,
        test,
        "Input Buffer Size KB",
        workload.input_buffer_size_kb,
        &INPUT_BUFFER_SIZE_KB_RANGE,
    ))?;
    registry.register(range_def(
        INPUT_BUFFER_SIZE_BYTES,
        test,
        "Input Buffer Size Bytes",
        workload.input_buffer_size_bytes,
        &INPUT_BUFFER_SIZE_BYTES_RANGE,
    ))?;
    registry.register(range_def(
        ELEMS_PER_THREAD,
        test,
        "Elems Per Thread",
        workload.elems_per_thread,
        &ELEMS_PER_THREAD_RANGE,
    ))?;
    registry.register(range_def(
        THREAD_ELEM_STRIDE,
        test,
        "Thread Elem Stride",
        workload.thread_elem_stride,
        &THREAD_ELEM_STRIDE_RANGE,
    ))?;
    registry.register(range_def(
        GROUP_ELEM_OFFSET,
        test,
        "Group Elem Offset",
        workload.group_elem_offset,
        &GROUP_ELEM_OFFSET_RANGE,
    ))?;
    registry.register(range_def(
        THREAD_ELEM_OFFSET,
        test,
        "Thread Elem Offset",
        workload.thread_elem_offset,
        &THREAD_ELEM_OFFSET_RANGE,
    ))?;
    registry.register(range_def(
        NUM_THREAD_GROUPS,
        test,
        "Num Thread Groups",
        workload.num_thread_groups,
        &NUM_THREAD_GROUPS_RANGE,
    ))?;

    registry.register(SettingDef::boolean(
        READ_FROM_GPU_MEM,
        test,
        "Read From GPU Memory",
        workload.read_from_gpu_mem,
    ))?;
    registry.register(SettingDef::enumeration(
        BUFFER_UPLOAD_PATH,
        test,
        "Buffer Upload Path",
        workload.upload_path,
    ))?;
    registry.register(range_def(
        BACKGROUND_UPLOAD_SIZE,
        test,
        "Background Upload Size (MB)",
        workload.background_upload_size_mb,
        &BACKGROUND_UPLOAD_SIZE_RANGE,
    ))?;
    registry.register(range_def(
        BACKGROUND_UPLOAD_WAIT_TIME,
        test,
        "Background Upload Size Wait Time (ms)",
        workload.background_upload_wait_ms,
        &BACKGROUND_UPLOAD_WAIT_RANGE,
    ))?;

    // Published for the kernel, never edited
    let i32_range = i64::from(i32::MIN)..=i64::from(i32::MAX);
    registry.register(
        range_def(NUM_INPUT_BUFFER_ELEMS, test, "Num Input Buffer Elems", 0, &i32_range).hidden(),
    )?;
    registry.register(
        range_def(INPUT_BUFFER_IDX, test, "Input Buffer Idx", -1, &i32_range).hidden(),
    )?;
    registry.register(
        range_def(OUTPUT_BUFFER_IDX, test, "Output Buffer Idx", -1, &i32_range).hidden(),
    )?;

    registry.register(SettingDef::boolean(ENABLE_VSYNC, debug, "Enable VSync", workload.vsync))?;
    registry.register(SettingDef::boolean(
        STABLE_POWER_STATE,
        debug,
        "Stable Power State",
        workload.stable_power_state,
    ))?;
    registry.register(SettingDef::boolean(
        ENABLE_DRIVER_BACKGROUND_THREADS,
        debug,
        "Enable Driver Background Threads",
        workload.driver_background_threads,
    ))?;
    registry.register(SettingDef::text(BENCHMARK_CSV_NAME, test, "Benchmark CSV Name", csv_name, MAX_CSV_NAME_LEN))?;

    Ok(())
}

/// Split a byte count into the MB/KB/B settings
pub const fn split_input_size(bytes: u64) -> (i64, i64, i64) {
    let mb = bytes / MIB;
    let kb = (bytes % MIB) / KIB;
    let b = bytes % KIB;
    (mb as i64, kb as i64, b as i64)
}

/// Typed view of the registry for one update cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSettings {
    pub heap_type: HeapType,
    pub cpu_page_property: CpuPageProperty,
    pub memory_pool: MemoryPool,
    pub input_buffer_type: BufferRepresentation,
    pub input_buffer_size_mb: u64,
    pub input_buffer_size_kb: u64,
    pub input_buffer_size_bytes: u64,
    pub elems_per_thread: u32,
    pub thread_elem_stride: u32,
    pub group_elem_offset: u32,
    pub thread_elem_offset: u32,
    pub num_thread_groups: u32,
    pub read_from_gpu_mem: bool,
    pub upload_path: UploadPath,
    pub background_upload_size_mb: u32,
    pub background_upload_wait_ms: u32,
    pub vsync: bool,
    pub stable_power_state: bool,
    pub driver_background_threads: bool,
    pub csv_name: String,
}

impl LiveSettings {
    pub fn read(registry: &SettingsRegistry) -> Result<Self> {
        use names::*;

        // Every int setting has a non-negative range that fits u32
        let uint = |name: &str| -> Result<u32> {
            Ok(u32::try_from(registry.int(name)?.max(0)).unwrap_or(u32::MAX))
        };

        Ok(Self {
            heap_type: registry.enum_value(HEAP_TYPE)?,
            cpu_page_property: registry.enum_value(CPU_PAGE_PROPERTY)?,
            memory_pool: registry.enum_value(MEMORY_POOL)?,
            input_buffer_type: registry.enum_value(INPUT_BUFFER_TYPE)?,
            input_buffer_size_mb: u64::from(uint(INPUT_BUFFER_SIZE_MB)?),
            input_buffer_size_kb: u64::from(uint(INPUT_BUFFER_SIZE_KB)?),
            input_buffer_size_bytes: u64::from(uint(INPUT_BUFFER_SIZE_BYTES)?),
            elems_per_thread: uint(ELEMS_PER_THREAD)?,
            thread_elem_stride: uint(THREAD_ELEM_STRIDE)?,
            group_elem_offset: uint(GROUP_ELEM_OFFSET)?,
            thread_elem_offset: uint(THREAD_ELEM_OFFSET)?,
            num_thread_groups: uint(NUM_THREAD_GROUPS)?,
            read_from_gpu_mem: registry.bool(READ_FROM_GPU_MEM)?,
            upload_path: registry.enum_value(BUFFER_UPLOAD_PATH)?,
            background_upload_size_mb: uint(BACKGROUND_UPLOAD_SIZE)?,
            background_upload_wait_ms: uint(BACKGROUND_UPLOAD_WAIT_TIME)?,
            vsync: registry.bool(ENABLE_VSYNC)?,
            stable_power_state: registry.bool(STABLE_POWER_STATE)?,
            driver_background_threads: registry.bool(ENABLE_DRIVER_BACKGROUND_THREADS)?,
            csv_name: registry.text(BENCHMARK_CSV_NAME)?.to_string(),
        })
    }

    /// Requested input size before representation clamping
    pub fn input_buffer_size(&self) -> u64 {
        self.input_buffer_size_mb * MIB + self.input_buffer_size_kb * KIB + self.input_buffer_size_bytes
    }

    pub fn heap_descriptor(&self) -> HeapDescriptor {
        HeapDescriptor::new(self.heap_type, self.cpu_page_property, self.memory_pool)
    }
}
