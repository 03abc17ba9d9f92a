//! Input, staging and output buffer provisioning
//!
//! The input buffer lives alone in an explicitly created heap so that the
//! heap type, page property and memory pool under test are exactly the
//! ones the buffer is read from. Every copy the CPU may write while the
//! GPU still reads an older one gets its own region of that heap.

use crate::ring::RingIndex;
use crate::{BenchError, Result};
use mempool_config::{SettingsRegistry, names};
use mempool_gpu::{
    BufferDesc, BufferId, BufferRepresentation, DescriptorIndex, GpuDevice, HeapDesc,
    HeapDescriptor, HeapId, HeapType, INPUT_ELEMENT_SIZE, InputBinding, RENDER_LATENCY,
    RESOURCE_PLACEMENT_ALIGNMENT, THREAD_GROUP_SIZE, ViewDesc, align_to,
};
use tracing::debug;

/// Value every input float is initialised to
pub const PAYLOAD_VALUE: f32 = 1.0;

/// Sizes derived from a requested input size and representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLayout {
    pub representation: BufferRepresentation,
    /// Size of one copy after clamping and alignment
    pub copy_size: u64,
    /// Distance between consecutive copies in the buffer
    pub copy_stride: u64,
    /// Whole float4 elements in one copy
    pub num_elems: u64,
    /// Size of the dedicated heap
    pub heap_size: u64,
}

impl InputLayout {
    pub fn new(requested: u64, representation: BufferRepresentation) -> Self {
        let copy_size = align_to(
            requested.clamp(1, representation.max_size()),
            representation.alignment(),
        );
        let copy_stride = align_to(copy_size, INPUT_ELEMENT_SIZE);
        Self {
            representation,
            copy_size,
            copy_stride,
            num_elems: copy_size / INPUT_ELEMENT_SIZE,
            heap_size: align_to(copy_stride * RENDER_LATENCY as u64, RESOURCE_PLACEMENT_ALIGNMENT),
        }
    }

    /// Bytes covered by all copies
    pub fn total_size(&self) -> u64 {
        self.copy_stride * RENDER_LATENCY as u64
    }

    /// Byte offset of copy `index`
    pub fn copy_offset(&self, index: usize) -> u64 {
        self.copy_stride * index as u64
    }
}

/// Everything [`BufferSet::provision`] needs to know
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub descriptor: HeapDescriptor,
    pub representation: BufferRepresentation,
    /// Requested size of one copy in bytes
    pub size: u64,
    pub num_thread_groups: u32,
}

/// How the kernel reaches the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputViews {
    /// Descriptor slot with one view per copy
    PerCopy(DescriptorIndex),
    /// Descriptor slot with one view of the first copy
    Shared(DescriptorIndex),
    /// Root constant buffer, no descriptor
    RootConstant,
}

/// Live input, staging and output resources for one configuration
#[derive(Debug)]
pub struct BufferSet {
    pub layout: InputLayout,
    pub descriptor: HeapDescriptor,
    pub cpu_writable: bool,
    pub heap: HeapId,
    pub input: BufferId,
    pub views: InputViews,
    /// Upload-heap copy source when the CPU cannot write the input
    pub staging: Option<BufferId>,
    pub output: BufferId,
    pub output_slot: DescriptorIndex,
    pub num_threads: u64,
    pub input_ring: RingIndex,
    pub staging_ring: RingIndex,
    /// CPU-side payload of one copy
    pub shadow: Vec<u8>,
    /// Destination of CPU reads from the mapped input
    pub readback: Vec<u8>,
}

impl BufferSet {
    /// Create the resources and publish their descriptor indices
    ///
    /// The caller must have drained the GPU of any frame that used the
    /// previous set before releasing it.
    pub fn provision<D: GpuDevice + ?Sized>(
        device: &D,
        request: &ProvisionRequest,
        registry: &mut SettingsRegistry,
    ) -> Result<Self> {
        let descriptor = request.descriptor;
        let layout = InputLayout::new(request.size, request.representation);
        let cpu_writable = descriptor.is_cpu_writable();

        let heap = device
            .create_heap(&HeapDesc {
                size: layout.heap_size,
                descriptor,
            })
            .map_err(BenchError::provision("input heap", descriptor))?;
        let input = device
            .create_placed_buffer(heap, 0, &BufferDesc::new("Input Buffer", layout.total_size()))
            .map_err(BenchError::provision("input buffer", descriptor))?;

        let views = create_input_views(device, input, &layout, cpu_writable)
            .map_err(BenchError::provision("input views", descriptor))?;

        let staging = if cpu_writable {
            None
        } else {
            Some(
                device
                    .create_committed_buffer(
                        HeapType::Upload,
                        &BufferDesc::new("Upload Buffer", layout.total_size()),
                    )
                    .map_err(BenchError::provision("upload buffer", descriptor))?,
            )
        };

        let num_threads = u64::from(THREAD_GROUP_SIZE) * u64::from(request.num_thread_groups);
        let output = device
            .create_committed_buffer(
                HeapType::Default,
                &BufferDesc::new("Output Buffer", num_threads * 4).with_unordered_access(),
            )
            .map_err(BenchError::provision("output buffer", descriptor))?;
        let output_slot = device
            .allocate_descriptor()
            .and_then(|slot| {
                device.write_descriptor(slot, 0, output, &ViewDesc::output(num_threads))?;
                Ok(slot)
            })
            .map_err(BenchError::provision("output view", descriptor))?;

        let input_idx = match views {
            InputViews::PerCopy(slot) | InputViews::Shared(slot) => i64::from(slot.0),
            InputViews::RootConstant => -1,
        };
        registry.set_int(names::NUM_INPUT_BUFFER_ELEMS, layout.num_elems as i64)?;
        registry.set_int(names::INPUT_BUFFER_IDX, input_idx)?;
        registry.set_int(names::OUTPUT_BUFFER_IDX, i64::from(output_slot.0))?;

        debug!(
            "Provisioned {} input: {} bytes per copy, {} elements, heap {} bytes, CPU-writable {}",
            layout.representation, layout.copy_size, layout.num_elems, layout.heap_size, cpu_writable
        );

        Ok(Self {
            layout,
            descriptor,
            cpu_writable,
            heap,
            input,
            views,
            staging,
            output,
            output_slot,
            num_threads,
            input_ring: RingIndex::new(RENDER_LATENCY),
            staging_ring: RingIndex::new(RENDER_LATENCY),
            shadow: payload(layout.copy_size),
            readback: vec![0u8; layout.copy_size as usize],
        })
    }

    /// Input binding for the copy the last upload targeted
    pub fn input_binding(&self) -> InputBinding {
        match self.views {
            InputViews::PerCopy(slot) => InputBinding::View {
                slot,
                handle: self.input_ring.current(),
            },
            InputViews::Shared(slot) => InputBinding::View { slot, handle: 0 },
            InputViews::RootConstant => InputBinding::ConstantBuffer {
                buffer: self.input,
                offset: self.layout.copy_offset(self.input_ring.current()),
            },
        }
    }

    /// Hand every resource to the device's deferred release
    pub fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        match self.views {
            InputViews::PerCopy(slot) | InputViews::Shared(slot) => device.free_descriptor(slot),
            InputViews::RootConstant => {}
        }
        device.free_descriptor(self.output_slot);
        device.release_buffer(self.input);
        if let Some(staging) = self.staging {
            device.release_buffer(staging);
        }
        device.release_buffer(self.output);
        device.release_heap(self.heap);
    }
}

fn create_input_views<D: GpuDevice + ?Sized>(
    device: &D,
    input: BufferId,
    layout: &InputLayout,
    cpu_writable: bool,
) -> mempool_gpu::Result<InputViews> {
    if layout.representation == BufferRepresentation::Constant {
        return Ok(InputViews::RootConstant);
    }

    let slot = device.allocate_descriptor()?;
    let stride_elems = layout.copy_stride / INPUT_ELEMENT_SIZE;
    // Copies the CPU writes directly get one view each; copy-queue uploads
    // all go through the first view
    let handles = if cpu_writable { RENDER_LATENCY } else { 1 };
    for handle in 0..handles {
        let first = if cpu_writable { stride_elems * handle as u64 } else { 0 };
        let view = ViewDesc::input(layout.representation, first, layout.num_elems).ok_or_else(|| {
            mempool_gpu::Error::InvalidOperation(format!(
                "{} input has no shader resource view",
                layout.representation
            ))
        })?;
        device.write_descriptor(slot, handle, input, &view)?;
    }

    Ok(if cpu_writable {
        InputViews::PerCopy(slot)
    } else {
        InputViews::Shared(slot)
    })
}

/// One copy worth of `PAYLOAD_VALUE` floats, zero-padded to `size`
pub fn payload(size: u64) -> Vec<u8> {
    let mut bytes = vec![0u8; size as usize];
    for word in bytes.chunks_exact_mut(4) {
        word.copy_from_slice(&PAYLOAD_VALUE.to_le_bytes());
    }
    bytes
}
