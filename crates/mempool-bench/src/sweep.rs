//! Benchmark configuration space and its enumeration

use crate::caps::DeviceCaps;
use mempool_config::{LiveSettings, SweepConfig};
use mempool_gpu::{
    BufferRepresentation, CpuPageProperty, HeapDescriptor, HeapType, INPUT_ELEMENT_SIZE,
    MAX_CONSTANT_BUFFER_SIZE, MemoryPool, THREAD_GROUP_SIZE,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One point of the sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub heap_type: HeapType,
    pub cpu_page_property: CpuPageProperty,
    pub memory_pool: MemoryPool,
    pub input_buffer_type: BufferRepresentation,
    pub num_thread_groups: u32,
    /// Input size in bytes
    pub input_buffer_size: u64,
    pub elems_per_thread: u32,
    pub thread_elem_stride: u32,
    pub group_elem_offset: u32,
    pub thread_elem_offset: u32,
}

impl BenchmarkConfig {
    pub fn heap_descriptor(&self) -> HeapDescriptor {
        HeapDescriptor::new(self.heap_type, self.cpu_page_property, self.memory_pool)
    }

    /// Same predicate the live path uses
    pub fn is_cpu_writable(&self) -> bool {
        self.heap_descriptor().is_cpu_writable()
    }

    pub fn total_threads(&self) -> u64 {
        u64::from(THREAD_GROUP_SIZE) * u64::from(self.num_thread_groups)
    }

    /// Bytes all threads read, counting repeats
    pub fn bytes_read(&self) -> u64 {
        u64::from(self.elems_per_thread) * INPUT_ELEMENT_SIZE * self.total_threads()
    }

    /// Bytes of distinct input the kernel touches
    ///
    /// A zero thread offset makes a group's threads share one span, a zero
    /// group offset makes all groups share one span.
    pub fn unique_bytes_read(&self) -> u64 {
        let threads_per_span = if self.thread_elem_offset > 0 {
            u64::from(THREAD_GROUP_SIZE)
        } else {
            1
        };
        let per_group = u64::from(self.elems_per_thread) * INPUT_ELEMENT_SIZE * threads_per_span;
        let groups = if self.group_elem_offset > 0 {
            u64::from(self.num_thread_groups)
        } else {
            1
        };
        (per_group * groups).min(self.input_buffer_size)
    }
}

impl From<&LiveSettings> for BenchmarkConfig {
    fn from(live: &LiveSettings) -> Self {
        Self {
            heap_type: live.heap_type,
            cpu_page_property: live.cpu_page_property,
            memory_pool: live.memory_pool,
            input_buffer_type: live.input_buffer_type,
            num_thread_groups: live.num_thread_groups,
            input_buffer_size: live.input_buffer_size(),
            elems_per_thread: live.elems_per_thread,
            thread_elem_stride: live.thread_elem_stride,
            group_elem_offset: live.group_elem_offset,
            thread_elem_offset: live.thread_elem_offset,
        }
    }
}

/// Whether the sweep may visit `heap_type` with `page`/`pool` on this device
fn heap_allowed(
    sweep: &SweepConfig,
    caps: &DeviceCaps,
    heap_type: HeapType,
    page: CpuPageProperty,
    pool: MemoryPool,
) -> bool {
    let supported = match heap_type {
        HeapType::GpuUpload => caps.gpu_upload_heap_supported,
        HeapType::Custom => sweep.include_custom_heap,
        HeapType::Upload | HeapType::Default => true,
    };
    // Page property and pool are fixed by the platform for built-in types
    let meaningful = heap_type == HeapType::Custom
        || (page == CpuPageProperty::NotAvailable && pool == MemoryPool::L0);
    let uma = caps.architecture.uma;
    let valid_pool = !(uma && pool == MemoryPool::L1);
    // Discrete VRAM has no CPU-visible pages; the live settings clamp these away
    let valid_pages = uma || pool == MemoryPool::L0 || page == CpuPageProperty::NotAvailable;

    supported && meaningful && valid_pool && valid_pages
}

/// Every configuration of `sweep` valid on the device, in nested axis order
///
/// Axes nest, outermost first: heap type, page property, memory pool,
/// representation, thread groups, input size, elements per thread, stride,
/// group offset, thread offset.
pub fn enumerate(sweep: &SweepConfig, caps: &DeviceCaps) -> Vec<BenchmarkConfig> {
    let mut configs = Vec::new();

    for &heap_type in &sweep.heap_types {
        for &cpu_page_property in &sweep.cpu_page_properties {
            for &memory_pool in &sweep.memory_pools {
                if !heap_allowed(sweep, caps, heap_type, cpu_page_property, memory_pool) {
                    continue;
                }
                for &input_buffer_type in &sweep.buffer_representations {
                    for &num_thread_groups in &sweep.thread_group_counts {
                        for &input_buffer_size in &sweep.input_buffer_sizes {
                            if input_buffer_type == BufferRepresentation::Constant
                                && input_buffer_size > MAX_CONSTANT_BUFFER_SIZE
                            {
                                continue;
                            }
                            for &elems_per_thread in &sweep.elems_per_thread {
                                for &thread_elem_stride in &sweep.thread_elem_strides {
                                    for &group_elem_offset in &sweep.group_elem_offsets {
                                        for &thread_elem_offset in &sweep.thread_elem_offsets {
                                            configs.push(BenchmarkConfig {
                                                heap_type,
                                                cpu_page_property,
                                                memory_pool,
                                                input_buffer_type,
                                                num_thread_groups,
                                                input_buffer_size,
                                                elems_per_thread,
                                                thread_elem_stride,
                                                group_elem_offset,
                                                thread_elem_offset,
                                            });
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    debug!("Enumerated {} benchmark configurations", configs.len());
    configs
}
