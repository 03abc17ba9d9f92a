//! Graphics device primitives for the memory pool benchmark
//!
//! This crate provides the collaborator layer the benchmark core runs on:
//! - **Heap descriptors**: heap type, CPU page property and memory pool,
//!   resolved against the adapter's memory architecture
//! - **Device contract**: the object-safe `GpuDevice` trait covering resource
//!   placement, descriptors, kernels, command recording, copy-queue uploads,
//!   frame pacing and deferred release
//! - **Upload ring**: fence-retired staging memory for copy-queue uploads
//! - **Timestamp scopes**: RAII guards around recorded GPU work
//! - **Software device**: `SimDevice`, a host implementation of the contract
//!
//! # Architecture
//!
//! The design follows these principles:
//! 1. **Explicit placement**: heaps are sized and created by the caller,
//!    buffers are placed at explicit offsets
//! 2. **Deferred release**: nothing is destroyed while a recorded frame may
//!    still reference it
//! 3. **Exhaustive enums**: heap types, representations and barriers are
//!    closed sets matched without fallbacks
//!
//! # Example
//!
//! ```
//! use mempool_gpu::{
//!     BufferDesc, GpuDevice, HeapDesc, HeapDescriptor, HeapType, SimDevice, SimDeviceConfig,
//!     RESOURCE_PLACEMENT_ALIGNMENT,
//! };
//!
//! let device = SimDevice::new(SimDeviceConfig::default())?;
//! let heap = device.create_heap(&HeapDesc {
//!     size: RESOURCE_PLACEMENT_ALIGNMENT,
//!     descriptor: HeapDescriptor::builtin(HeapType::Upload),
//! })?;
//! let buffer = device.create_placed_buffer(heap, 0, &BufferDesc::new("Staging", 1024))?;
//! device.write_buffer(buffer, 0, &[0u8; 1024])?;
//! # Ok::<(), mempool_gpu::Error>(())
//! ```

#![allow(clippy::field_reassign_with_default)]

pub mod backends;
pub mod device;
pub mod error;
pub mod heap;
pub mod kernel;
pub mod queue;
pub mod timestamp;
pub mod upload;
pub mod view;

pub use device::{
    AdapterInfo, Barrier, BufferDesc, BufferId, DescriptorIndex, DeviceStatistics,
    DispatchBindings, GpuDevice, GpuTiming, HeapDesc, HeapId, InputBinding, MemoryBudget,
    PipelineId, UploadContext,
};
pub use error::{Error, Result};
pub use heap::{
    Architecture, CONSTANT_BUFFER_ALIGNMENT, CpuPageProperty, HeapDescriptor, HeapProperties,
    HeapType, MAX_BUFFER_SIZE, MAX_CONSTANT_BUFFER_SIZE, MemoryPool, MemorySegment,
    RENDER_LATENCY, RESOURCE_PLACEMENT_ALIGNMENT, align_to,
};
pub use kernel::{
    CompileOptions, CompiledKernel, KernelHash, KernelShape, KernelSource, ShaderStage,
    THREAD_GROUP_SIZE, macros,
};
pub use timestamp::GpuTimestampScope;
pub use upload::{UploadRing, UploadRingConfig, UploadRingStatistics};
pub use view::{BufferRepresentation, INPUT_ELEMENT_SIZE, ViewAccess, ViewDesc};

pub use backends::sim::{SimDevice, SimDeviceConfig};
