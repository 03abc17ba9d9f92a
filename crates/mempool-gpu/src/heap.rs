//! Heap descriptors and their resolution against the adapter architecture
//!
//! A heap descriptor is the tuple (heap type, CPU page property, memory pool).
//! Only custom heaps select the last two explicitly; the built-in heap types
//! take whatever the platform implies, which [`HeapDescriptor::resolve`]
//! reports so the HUD and the report can show what was actually allocated.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of frames the CPU may run ahead of the GPU
pub const RENDER_LATENCY: usize = 2;

/// Placement granularity for resources inside a heap (64 KiB)
pub const RESOURCE_PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

/// Required alignment of constant buffer views
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Largest constant buffer a kernel can bind (4096 float4 elements)
pub const MAX_CONSTANT_BUFFER_SIZE: u64 = 4096 * 16;

/// Largest non-constant input buffer
pub const MAX_BUFFER_SIZE: u64 = 1024 * 1024 * 1024;

/// Platform class of a GPU memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapType {
    /// CPU-writable, GPU-readable system memory
    Upload,
    /// GPU-local memory without CPU access
    Default,
    /// Explicit CPU page property and memory pool
    Custom,
    /// CPU-writable video memory (resizable BAR)
    GpuUpload,
}

impl HeapType {
    /// All heap types in declaration order
    pub const ALL: [HeapType; 4] = [
        HeapType::Upload,
        HeapType::Default,
        HeapType::Custom,
        HeapType::GpuUpload,
    ];

    /// Human-readable label
    pub const fn label(self) -> &'static str {
        match self {
            HeapType::Upload => "Upload",
            HeapType::Default => "Default",
            HeapType::Custom => "Custom",
            HeapType::GpuUpload => "GPU Upload",
        }
    }

    /// True for the platform-defined heap types
    pub const fn is_builtin(self) -> bool {
        !matches!(self, HeapType::Custom)
    }
}

/// CPU access mode of a custom heap's pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuPageProperty {
    /// No CPU access
    NotAvailable,
    /// Uncached, write-combined
    WriteCombine,
    /// Cached
    WriteBack,
}

impl CpuPageProperty {
    /// All page properties in declaration order
    pub const ALL: [CpuPageProperty; 3] = [
        CpuPageProperty::NotAvailable,
        CpuPageProperty::WriteCombine,
        CpuPageProperty::WriteBack,
    ];

    /// Human-readable label
    pub const fn label(self) -> &'static str {
        match self {
            CpuPageProperty::NotAvailable => "Not Available (No CPU Access)",
            CpuPageProperty::WriteCombine => "Write-Combined (Uncached)",
            CpuPageProperty::WriteBack => "Write-Back (Cached)",
        }
    }
}

/// Physical memory preference of a custom heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPool {
    /// System memory
    L0,
    /// Dedicated video memory
    L1,
}

impl MemoryPool {
    /// All memory pools in declaration order
    pub const ALL: [MemoryPool; 2] = [MemoryPool::L0, MemoryPool::L1];

    /// Human-readable label
    pub const fn label(self) -> &'static str {
        match self {
            MemoryPool::L0 => "L0 (CPU RAM)",
            MemoryPool::L1 => "L1 (VRAM)",
        }
    }
}

macro_rules! impl_display_label {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.label())
                }
            }
        )*
    };
}

impl_display_label!(HeapType, CpuPageProperty, MemoryPool);

/// Memory architecture flags of the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Architecture {
    /// System and video memory are one physical pool
    pub uma: bool,
    /// UMA with CPU caches coherent with the GPU
    pub cache_coherent_uma: bool,
}

/// Memory segment a heap is charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySegment {
    /// Video memory (all memory on UMA)
    Local,
    /// System memory visible to a discrete GPU
    NonLocal,
}

impl MemorySegment {
    /// Segment name used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            MemorySegment::Local => "local",
            MemorySegment::NonLocal => "non-local",
        }
    }
}

/// Heap properties after platform resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapProperties {
    /// Effective CPU page property
    pub cpu_page_property: CpuPageProperty,
    /// Effective memory pool
    pub memory_pool: MemoryPool,
}

impl HeapProperties {
    /// Segment this heap's bytes are charged against
    pub fn segment(&self, arch: &Architecture) -> MemorySegment {
        match (arch.uma, self.memory_pool) {
            (true, _) | (false, MemoryPool::L1) => MemorySegment::Local,
            (false, MemoryPool::L0) => MemorySegment::NonLocal,
        }
    }

    /// Whether the CPU can map the heap
    pub fn cpu_accessible(&self) -> bool {
        self.cpu_page_property != CpuPageProperty::NotAvailable
    }
}

/// Heap type with its explicit page property and memory pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapDescriptor {
    /// Heap class
    pub heap_type: HeapType,
    /// Page property, meaningful for custom heaps
    pub cpu_page_property: CpuPageProperty,
    /// Memory pool, meaningful for custom heaps
    pub memory_pool: MemoryPool,
}

impl HeapDescriptor {
    /// Create a descriptor
    pub const fn new(
        heap_type: HeapType,
        cpu_page_property: CpuPageProperty,
        memory_pool: MemoryPool,
    ) -> Self {
        Self {
            heap_type,
            cpu_page_property,
            memory_pool,
        }
    }

    /// Descriptor for a built-in heap type with the neutral custom axes
    pub const fn builtin(heap_type: HeapType) -> Self {
        Self::new(heap_type, CpuPageProperty::NotAvailable, MemoryPool::L0)
    }

    /// Whether a buffer placed in this heap can be written through a CPU mapping
    pub fn is_cpu_writable(&self) -> bool {
        match self.heap_type {
            HeapType::Upload | HeapType::GpuUpload => true,
            HeapType::Default => false,
            HeapType::Custom => self.cpu_page_property != CpuPageProperty::NotAvailable,
        }
    }

    /// Reject combinations the device cannot create
    pub fn validate(&self, arch: &Architecture) -> Result<()> {
        if self.heap_type != HeapType::Custom {
            return Ok(());
        }

        match (arch.uma, self.memory_pool, self.cpu_page_property) {
            (true, MemoryPool::L1, _) => Err(Error::InvalidHeapConfiguration(
                "memory pool L1 is not available on a UMA adapter".into(),
            )),
            (false, MemoryPool::L1, CpuPageProperty::WriteBack) => {
                Err(Error::InvalidHeapConfiguration(
                    "write-back pages cannot live in L1 on a discrete adapter".into(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Effective page property and pool the platform uses for this descriptor
    pub fn resolve(&self, arch: &Architecture) -> HeapProperties {
        let local_pool = if arch.uma { MemoryPool::L0 } else { MemoryPool::L1 };
        let (cpu_page_property, memory_pool) = match self.heap_type {
            HeapType::Upload => {
                let page = if arch.cache_coherent_uma {
                    CpuPageProperty::WriteBack
                } else {
                    CpuPageProperty::WriteCombine
                };
                (page, MemoryPool::L0)
            }
            HeapType::Default => (CpuPageProperty::NotAvailable, local_pool),
            HeapType::GpuUpload => (CpuPageProperty::WriteCombine, local_pool),
            HeapType::Custom => (self.cpu_page_property, self.memory_pool),
        };

        HeapProperties {
            cpu_page_property,
            memory_pool,
        }
    }
}

impl fmt::Display for HeapDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {}",
            self.heap_type, self.cpu_page_property, self.memory_pool
        )
    }
}

/// Round `value` up to a multiple of `alignment` (alignment of 0 or 1 is a no-op)
#[inline]
pub const fn align_to(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}
