//! Graphics device abstraction
//!
//! This module defines the narrow interface the benchmark core needs from a
//! graphics API. Each device implements the `GpuDevice` trait to provide:
//! - Adapter information and memory budgets
//! - Resource creation with explicit heap placement
//! - Persistent descriptor slots and kernel pipelines
//! - Command recording on the graphics queue
//! - Copy-queue uploads through an upload ring
//! - Frame pacing, GPU drains and deferred release
//!
//! All methods take `&self`: the device is shared between the main thread
//! and the background streaming thread, which only uses the upload methods.
//!
//! # Example
//!
//! ```
//! use mempool_gpu::{GpuDevice, SimDevice, SimDeviceConfig};
//!
//! let device = SimDevice::new(SimDeviceConfig::default())?;
//! println!("Using adapter: {}", device.adapter_info().name);
//! # Ok::<(), mempool_gpu::Error>(())
//! ```

use crate::heap::{Architecture, HeapDescriptor, HeapType};
use crate::kernel::{CompileOptions, CompiledKernel, KernelSource};
use crate::view::ViewDesc;
use crate::Result;
use std::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

define_handle!(
    /// Handle of a heap object
    HeapId
);
define_handle!(
    /// Handle of a buffer resource
    BufferId
);
define_handle!(
    /// Handle of a compute pipeline
    PipelineId
);

/// Stable index of a persistent shader-visible descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorIndex(pub u32);

impl fmt::Display for DescriptorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Adapter capabilities returned by devices
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Adapter name (e.g., "NVIDIA GeForce RTX 4090")
    pub name: String,
    /// Memory architecture
    pub architecture: Architecture,
    /// GPU upload heaps (CPU-visible VRAM) can be created
    pub gpu_upload_heap_supported: bool,
    /// Enhanced barriers are available
    pub enhanced_barriers_supported: bool,
    /// Highest supported shader model
    pub shader_model: (u32, u32),
    /// Number of persistent descriptor slots
    pub descriptor_capacity: usize,
}

/// Memory usage against the OS-provided budget of each segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBudget {
    /// Bytes in use in video memory
    pub local_usage: u64,
    /// Video memory budget
    pub local_budget: u64,
    /// Bytes in use in system memory visible to the GPU
    pub non_local_usage: u64,
    /// System memory budget
    pub non_local_budget: u64,
}

/// Creation parameters of a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapDesc {
    /// Heap size in bytes, a multiple of the placement alignment
    pub size: u64,
    /// Heap type, page property and memory pool
    pub descriptor: HeapDescriptor,
}

/// Creation parameters of a buffer resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// Debug name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// The buffer may be bound for unordered access
    pub allow_unordered_access: bool,
}

impl BufferDesc {
    /// Describe a read-only buffer
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            allow_unordered_access: false,
        }
    }

    /// Allow unordered access
    pub fn with_unordered_access(mut self) -> Self {
        self.allow_unordered_access = true;
        self
    }
}

/// Resource state transition recorded on the graphics queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// Copy destination becomes shader-readable
    CopyToShaderRead,
    /// Unordered-access writes complete before the next writes
    WriteToWrite,
}

/// How the kernel reaches its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBinding {
    /// Descriptor slot and the per-frame handle within it
    View {
        /// Persistent slot
        slot: DescriptorIndex,
        /// Handle (buffer copy) inside the slot
        handle: usize,
    },
    /// Root constant buffer at a byte offset of a buffer
    ConstantBuffer {
        /// Bound buffer
        buffer: BufferId,
        /// Byte offset of the bound copy
        offset: u64,
    },
}

/// Resources bound for one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchBindings {
    /// Input buffer binding
    pub input: InputBinding,
    /// Output unordered-access slot
    pub output: DescriptorIndex,
}

/// Open copy-queue upload from [`GpuDevice::upload_begin`]
#[derive(Debug)]
pub struct UploadContext {
    pub(crate) submission: u64,
    pub(crate) ring_offset: u64,
    pub(crate) size: u64,
    pub(crate) copies: Vec<(BufferId, u64, u64, u64)>,
}

impl UploadContext {
    /// Usable staging size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Record a copy from staging offset `src_offset` into `dst` at `dst_offset`
    pub fn copy_to(&mut self, dst: BufferId, dst_offset: u64, src_offset: u64, size: u64) {
        self.copies.push((dst, dst_offset, src_offset, size));
    }
}

/// One resolved GPU timestamp pair
#[derive(Debug, Clone, PartialEq)]
pub struct GpuTiming {
    /// Frame the scope was recorded in
    pub frame: u64,
    /// Scope name
    pub name: &'static str,
    /// Elapsed GPU time in milliseconds
    pub milliseconds: f64,
}

/// Counters exposed for diagnostics and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStatistics {
    pub heaps_created: u64,
    pub buffers_created: u64,
    pub pipelines_created: u64,
    pub kernels_compiled: u64,
    pub descriptors_allocated: u64,
    pub deferred_releases: u64,
    pub flushes: u64,
    pub frames_completed: u64,
    pub dispatches: u64,
    pub copy_submissions: u64,
    pub fast_uploads: u64,
}

/// Abstract graphics device
///
/// Object-safe so the core can hold `Arc<dyn GpuDevice>` as readily as a
/// concrete device.
pub trait GpuDevice: Send + Sync {
    // =========================================================================
    // Adapter Information
    // =========================================================================

    /// Get adapter information
    fn adapter_info(&self) -> &AdapterInfo;

    /// Query current memory usage and budgets
    fn memory_budget(&self) -> MemoryBudget;

    /// Get device counters
    fn statistics(&self) -> DeviceStatistics;

    // =========================================================================
    // Device Controls
    // =========================================================================

    /// Enable or disable waiting for vertical sync on present
    fn set_vsync(&self, enabled: bool);

    /// Lock or unlock GPU clocks at their stable rate
    fn set_stable_power_state(&self, enabled: bool) -> Result<()>;

    /// Allow or forbid driver background processing
    fn set_background_processing(&self, allowed: bool) -> Result<()>;

    // =========================================================================
    // Resources
    // =========================================================================

    /// Create a heap with explicit properties
    fn create_heap(&self, desc: &HeapDesc) -> Result<HeapId>;

    /// Place a buffer inside a heap at `offset`
    fn create_placed_buffer(&self, heap: HeapId, offset: u64, desc: &BufferDesc) -> Result<BufferId>;

    /// Create a buffer with its own implicit heap of a built-in type
    fn create_committed_buffer(&self, heap_type: HeapType, desc: &BufferDesc) -> Result<BufferId>;

    /// Size of a buffer in bytes
    fn buffer_size(&self, buffer: BufferId) -> Result<u64>;

    /// Write through the buffer's persistent CPU mapping
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()>;

    /// Read through the buffer's persistent CPU mapping
    fn read_buffer(&self, buffer: BufferId, offset: u64, out: &mut [u8]) -> Result<()>;

    /// Release a heap once the GPU is done with the current frame
    fn release_heap(&self, heap: HeapId);

    /// Release a buffer once the GPU is done with the current frame
    fn release_buffer(&self, buffer: BufferId);

    // =========================================================================
    // Descriptors and Pipelines
    // =========================================================================

    /// Allocate a persistent descriptor slot
    fn allocate_descriptor(&self) -> Result<DescriptorIndex>;

    /// Write a view into one handle of a slot
    fn write_descriptor(
        &self,
        slot: DescriptorIndex,
        handle: usize,
        buffer: BufferId,
        view: &ViewDesc,
    ) -> Result<()>;

    /// Free a descriptor slot once the GPU is done with the current frame
    fn free_descriptor(&self, slot: DescriptorIndex);

    /// Compile a kernel with the given macro set
    fn compile_kernel(&self, source: &KernelSource, options: &CompileOptions) -> Result<CompiledKernel>;

    /// Create a compute pipeline from a compiled kernel
    fn create_pipeline(&self, kernel: &CompiledKernel) -> Result<PipelineId>;

    /// Release a pipeline once the GPU is done with the current frame
    fn release_pipeline(&self, pipeline: PipelineId);

    // =========================================================================
    // Graphics Queue Commands
    // =========================================================================

    /// Record a buffer-to-buffer copy
    fn copy_buffer_region(
        &self,
        dst: BufferId,
        dst_offset: u64,
        src: BufferId,
        src_offset: u64,
        size: u64,
    ) -> Result<()>;

    /// Record a barrier on a buffer
    fn barrier(&self, buffer: BufferId, barrier: Barrier) -> Result<()>;

    /// Record a compute dispatch of `groups` thread groups
    fn dispatch(&self, pipeline: PipelineId, bindings: &DispatchBindings, groups: u32) -> Result<()>;

    /// Record the start of a named timestamp scope
    fn begin_timestamp(&self, name: &'static str) -> Result<()>;

    /// Record the end of a named timestamp scope
    fn end_timestamp(&self, name: &'static str) -> Result<()>;

    /// Take timings resolved since the previous call
    fn resolved_timings(&self) -> Vec<GpuTiming>;

    // =========================================================================
    // Copy Queue
    // =========================================================================

    /// Reserve `size` bytes of upload ring memory for a copy-queue upload
    fn upload_begin(&self, size: u64) -> Result<UploadContext>;

    /// Write CPU data into the staging memory of an open upload
    fn upload_write(&self, ctx: &UploadContext, offset: u64, data: &[u8]) -> Result<()>;

    /// Submit an upload; with `sync_on_graphics_queue` the next graphics
    /// submission waits for it
    fn upload_end(&self, ctx: UploadContext, sync_on_graphics_queue: bool) -> Result<u64>;

    /// Queue a copy for the fast batch submitted at frame end without any
    /// graphics queue wait
    fn queue_fast_upload(
        &self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> Result<()>;

    // =========================================================================
    // Frame Pacing and Synchronization
    // =========================================================================

    /// Start a frame, waiting for the frame `RENDER_LATENCY` frames back
    fn begin_frame(&self) -> Result<u64>;

    /// Submit the frame's commands and present
    fn end_frame(&self) -> Result<()>;

    /// Index of the frame being recorded
    fn current_frame(&self) -> u64;

    /// Wait for every queue to go idle and release everything deferred
    fn flush_gpu(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(BufferId(7).to_string(), "BufferId#7");
        assert_eq!(HeapId(1).to_string(), "HeapId#1");
        assert_eq!(DescriptorIndex(12).to_string(), "12");
    }

    #[test]
    fn test_buffer_desc_builder() {
        let desc = BufferDesc::new("Output Buffer", 1024).with_unordered_access();
        assert_eq!(desc.size, 1024);
        assert!(desc.allow_unordered_access);
        assert!(!BufferDesc::new("Input", 16).allow_unordered_access);
    }

    #[test]
    fn test_upload_context_records_copies() {
        let mut ctx = UploadContext {
            submission: 0,
            ring_offset: 0,
            size: 256,
            copies: Vec::new(),
        };
        ctx.copy_to(BufferId(3), 128, 0, 128);
        assert_eq!(ctx.size(), 256);
        assert_eq!(ctx.copies, vec![(BufferId(3), 128, 0, 128)]);
    }
}
