//! Software reference device
//!
//! `SimDevice` implements every [`GpuDevice`] contract on the CPU. Buffers
//! are host allocations, heaps are charged against configurable memory
//! budgets, and the compute job kernel is emulated from its macro set with
//! rayon. Graphics commands are recorded and executed when the frame is
//! submitted, so GPU timestamps measure real work on the host.
//!
//! Copy-queue submissions execute as soon as they are submitted. The fast
//! upload batch executes after the frame's graphics commands, which
//! reproduces the race of the fast path: the dispatch reads the input
//! buffer before that frame's upload lands.

use crate::device::{
    AdapterInfo, Barrier, BufferDesc, BufferId, DescriptorIndex, DeviceStatistics,
    DispatchBindings, GpuDevice, GpuTiming, HeapDesc, HeapId, InputBinding, MemoryBudget,
    PipelineId, UploadContext,
};
use crate::heap::{
    Architecture, HeapDescriptor, HeapProperties, HeapType, MemorySegment,
    RENDER_LATENCY, RESOURCE_PLACEMENT_ALIGNMENT, align_to,
};
use crate::kernel::{
    CompileOptions, CompiledKernel, KernelHash, KernelShape, KernelSource, THREAD_GROUP_SIZE,
};
use crate::queue::{CopyQueue, CopyRegion, QueueFence};
use crate::upload::{RingAllocation, UploadRing, UploadRingConfig};
use crate::view::{BufferRepresentation, INPUT_ELEMENT_SIZE, ViewAccess, ViewDesc};
use crate::{Error, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Attempts to get upload ring space before giving up
const UPLOAD_RETRY_LIMIT: usize = 100_000;

/// Configuration of the software device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDeviceConfig {
    /// Reported adapter name
    pub adapter_name: String,
    /// Memory architecture
    pub architecture: Architecture,
    /// GPU upload heaps can be created
    pub gpu_upload_heap_supported: bool,
    /// Enhanced barriers are reported
    pub enhanced_barriers_supported: bool,
    /// Reported shader model
    pub shader_model: (u32, u32),
    /// Video memory budget in bytes
    pub local_memory_bytes: u64,
    /// System memory budget in bytes
    pub non_local_memory_bytes: u64,
    /// Persistent descriptor slots
    pub descriptor_capacity: usize,
    /// Upload ring configuration
    pub upload_ring: UploadRingConfig,
}

impl Default for SimDeviceConfig {
    fn default() -> Self {
        Self {
            adapter_name: "Software Reference Adapter".to_string(),
            architecture: Architecture::default(),
            gpu_upload_heap_supported: true,
            enhanced_barriers_supported: true,
            shader_model: (6, 6),
            local_memory_bytes: 8 * 1024 * 1024 * 1024,
            non_local_memory_bytes: 16 * 1024 * 1024 * 1024,
            descriptor_capacity: 1024,
            upload_ring: UploadRingConfig::default(),
        }
    }
}

struct SimHeap {
    desc: HeapDesc,
    segment: MemorySegment,
    properties: HeapProperties,
}

struct SimBuffer {
    name: String,
    data: Vec<u8>,
    cpu_accessible: bool,
    allow_unordered_access: bool,
    /// Segment and bytes charged by a committed buffer
    committed_charge: Option<(MemorySegment, u64)>,
}

type DescriptorSlot = [Option<(BufferId, ViewDesc)>; RENDER_LATENCY];

enum Command {
    Copy(CopyRegion),
    Barrier(BufferId, Barrier),
    Dispatch {
        pipeline: PipelineId,
        bindings: DispatchBindings,
        groups: u32,
    },
    TimestampBegin(&'static str),
    TimestampEnd(&'static str),
}

enum Deferred {
    Heap(HeapId),
    Buffer(BufferId),
    Pipeline(PipelineId),
    Descriptor(DescriptorIndex),
}

struct DeviceControls {
    vsync: bool,
    stable_power_state: bool,
    background_processing: bool,
}

struct SimState {
    next_id: u64,
    heaps: HashMap<HeapId, SimHeap>,
    buffers: HashMap<BufferId, SimBuffer>,
    pipelines: HashMap<PipelineId, KernelShape>,
    descriptors: Vec<Option<DescriptorSlot>>,
    local_usage: u64,
    non_local_usage: u64,
    commands: Vec<Command>,
    frame_open: bool,
    graphics: QueueFence,
    frame: u64,
    deferred: Vec<(u64, Deferred)>,
    timings: Vec<GpuTiming>,
    copy: CopyQueue,
    controls: DeviceControls,
    statistics: DeviceStatistics,
}

impl SimState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn usage_mut(&mut self, segment: MemorySegment) -> &mut u64 {
        match segment {
            MemorySegment::Local => &mut self.local_usage,
            MemorySegment::NonLocal => &mut self.non_local_usage,
        }
    }

    fn buffer(&self, id: BufferId) -> Result<&SimBuffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| Error::invalid_handle("buffer", id.0))
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut SimBuffer> {
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| Error::invalid_handle("buffer", id.0))
    }

    fn descriptor(&self, slot: DescriptorIndex, handle: usize) -> Result<(BufferId, ViewDesc)> {
        self.descriptors
            .get(slot.0 as usize)
            .and_then(Option::as_ref)
            .and_then(|handles| handles.get(handle).copied().flatten())
            .ok_or_else(|| Error::invalid_handle("descriptor", slot.0 as u64))
    }

    fn release(&mut self, item: Deferred) {
        match item {
            Deferred::Heap(id) => {
                if let Some(heap) = self.heaps.remove(&id) {
                    let usage = self.usage_mut(heap.segment);
                    *usage = usage.saturating_sub(heap.desc.size);
                }
            }
            Deferred::Buffer(id) => {
                if let Some(buffer) = self.buffers.remove(&id)
                    && let Some((segment, bytes)) = buffer.committed_charge
                {
                    let usage = self.usage_mut(segment);
                    *usage = usage.saturating_sub(bytes);
                }
            }
            Deferred::Pipeline(id) => {
                self.pipelines.remove(&id);
            }
            Deferred::Descriptor(slot) => {
                if let Some(entry) = self.descriptors.get_mut(slot.0 as usize) {
                    *entry = None;
                }
            }
        }
        self.statistics.deferred_releases += 1;
    }

    /// Release everything deferred during frames up to and including `frame`
    fn process_deferred(&mut self, frame: u64) {
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|(tag, _)| *tag <= frame);
        self.deferred = pending;
        for (_, item) in ready {
            self.release(item);
        }
    }

    fn copy_between(&mut self, region: &CopyRegion) -> Result<()> {
        if region.src == region.dst {
            return Err(Error::InvalidOperation(format!(
                "copy source and destination are the same buffer {}",
                region.src
            )));
        }

        let mut dst_data = std::mem::take(&mut self.buffer_mut(region.dst)?.data);
        let result: Result<()> = (|| {
            let src = &self.buffer(region.src)?.data;
            let src_end = region.src_offset + region.size;
            let dst_end = region.dst_offset + region.size;
            if src_end > src.len() as u64 || dst_end > dst_data.len() as u64 {
                return Err(Error::InvalidBufferSize {
                    requested: src_end.max(dst_end),
                    maximum: (src.len() as u64).min(dst_data.len() as u64),
                });
            }
            dst_data[region.dst_offset as usize..dst_end as usize]
                .copy_from_slice(&src[region.src_offset as usize..src_end as usize]);
            Ok(())
        })();
        self.buffer_mut(region.dst)?.data = dst_data;
        result
    }

    fn run_dispatch(
        &mut self,
        pipeline: PipelineId,
        bindings: &DispatchBindings,
        groups: u32,
    ) -> Result<()> {
        let shape = *self
            .pipelines
            .get(&pipeline)
            .ok_or_else(|| Error::invalid_handle("pipeline", pipeline.0))?;

        let (input_id, input_offset, input_len) = match bindings.input {
            InputBinding::View { slot, handle } => {
                let (buffer, view) = self.descriptor(slot, handle)?;
                if view.representation != shape.representation {
                    return Err(Error::InvalidOperation(format!(
                        "pipeline expects a {} input, descriptor {} holds a {} view",
                        shape.representation, slot, view.representation
                    )));
                }
                (buffer, view.byte_offset(), view.byte_len())
            }
            InputBinding::ConstantBuffer { buffer, offset } => {
                if shape.representation != BufferRepresentation::Constant {
                    return Err(Error::InvalidOperation(format!(
                        "pipeline expects a {} input, got a constant buffer binding",
                        shape.representation
                    )));
                }
                let size = self.buffer(buffer)?.data.len() as u64;
                let len = shape.num_input_elems * INPUT_ELEMENT_SIZE;
                (buffer, offset, len.min(size.saturating_sub(offset)))
            }
        };

        let (output_id, output_view) = self.descriptor(bindings.output, 0)?;
        if output_view.access != ViewAccess::ReadWrite {
            return Err(Error::InvalidOperation(format!(
                "descriptor {} is not an unordered-access view",
                bindings.output
            )));
        }
        if output_id == input_id {
            return Err(Error::InvalidOperation(
                "input and output of a dispatch alias the same buffer".into(),
            ));
        }

        let mut output = std::mem::take(&mut self.buffer_mut(output_id)?.data);
        let result: Result<()> = (|| {
            let input = &self.buffer(input_id)?.data;
            let end = (input_offset + input_len).min(input.len() as u64);
            let window = &input[input_offset.min(end) as usize..end as usize];
            emulate_dispatch(&shape, window, &mut output, groups);
            Ok(())
        })();
        self.buffer_mut(output_id)?.data = output;
        self.statistics.dispatches += 1;
        result
    }
}

/// Run the compute job kernel over `groups` thread groups on the host
///
/// Each thread sums the four floats of every element it reads and stores
/// the sum as one 32-bit float in its output slot. Reads outside `input`
/// return zero, as out-of-bounds view reads do on hardware.
pub fn emulate_dispatch(shape: &KernelShape, input: &[u8], output: &mut [u8], groups: u32) {
    let group_bytes = THREAD_GROUP_SIZE as usize * 4;
    let element_size = INPUT_ELEMENT_SIZE as usize;

    output
        .par_chunks_mut(group_bytes)
        .take(groups as usize)
        .enumerate()
        .for_each(|(group, chunk)| {
            for (thread, slot) in chunk.chunks_exact_mut(4).enumerate() {
                let mut sum = 0.0f32;
                for i in 0..shape.elems_per_thread {
                    let start = shape.element_index(group as u64, thread as u64, i) as usize
                        * element_size;
                    if let Some(element) = input.get(start..start + element_size) {
                        for lane in element.chunks_exact(4) {
                            sum += f32::from_le_bytes([lane[0], lane[1], lane[2], lane[3]]);
                        }
                    }
                }
                slot.copy_from_slice(&sum.to_le_bytes());
            }
        });
}

/// Software implementation of [`GpuDevice`]
pub struct SimDevice {
    info: AdapterInfo,
    config: SimDeviceConfig,
    state: Mutex<SimState>,
    ring: Mutex<UploadRing>,
}

impl SimDevice {
    /// Create a software device
    pub fn new(config: SimDeviceConfig) -> Result<Self> {
        if config.descriptor_capacity == 0 {
            return Err(Error::DeviceInit {
                adapter: config.adapter_name.clone(),
                message: "descriptor heap capacity must be > 0".into(),
            });
        }
        let ring = UploadRing::new(config.upload_ring.clone()).map_err(|e| Error::DeviceInit {
            adapter: config.adapter_name.clone(),
            message: e.to_string(),
        })?;

        let info = AdapterInfo {
            name: config.adapter_name.clone(),
            architecture: config.architecture,
            gpu_upload_heap_supported: config.gpu_upload_heap_supported,
            enhanced_barriers_supported: config.enhanced_barriers_supported,
            shader_model: config.shader_model,
            descriptor_capacity: config.descriptor_capacity,
        };

        info!(
            "Software device initialized: {} (UMA: {}, GPU upload heaps: {})",
            info.name, info.architecture.uma, info.gpu_upload_heap_supported
        );

        let state = SimState {
            next_id: 0,
            heaps: HashMap::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            descriptors: vec![None; config.descriptor_capacity],
            local_usage: 0,
            non_local_usage: 0,
            commands: Vec::new(),
            frame_open: false,
            graphics: QueueFence::new("graphics"),
            frame: 0,
            deferred: Vec::new(),
            timings: Vec::new(),
            copy: CopyQueue::new(),
            controls: DeviceControls {
                vsync: true,
                stable_power_state: false,
                background_processing: true,
            },
            statistics: DeviceStatistics::default(),
        };

        Ok(Self {
            info,
            config,
            state: Mutex::new(state),
            ring: Mutex::new(ring),
        })
    }

    /// Copy a buffer's contents regardless of CPU visibility
    ///
    /// Debug readback for tests and diagnostics; real devices need a
    /// readback heap for this.
    pub fn debug_read_buffer(&self, buffer: BufferId) -> Result<Vec<u8>> {
        Ok(self.state.lock().buffer(buffer)?.data.clone())
    }

    /// Name a buffer was created with
    pub fn buffer_name(&self, buffer: BufferId) -> Result<String> {
        Ok(self.state.lock().buffer(buffer)?.name.clone())
    }

    /// Whether vsync, stable power and driver background processing are on
    pub fn controls(&self) -> (bool, bool, bool) {
        let state = self.state.lock();
        (
            state.controls.vsync,
            state.controls.stable_power_state,
            state.controls.background_processing,
        )
    }

    /// Number of live heaps, buffers and pipelines
    pub fn live_objects(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        (state.heaps.len(), state.buffers.len(), state.pipelines.len())
    }

    /// Capacity of the upload ring
    pub fn upload_ring_capacity(&self) -> u64 {
        self.ring.lock().capacity()
    }

    fn check_budget(&self, state: &SimState, segment: MemorySegment, bytes: u64) -> Result<()> {
        let (usage, budget) = match segment {
            MemorySegment::Local => (state.local_usage, self.config.local_memory_bytes),
            MemorySegment::NonLocal => (state.non_local_usage, self.config.non_local_memory_bytes),
        };
        if usage + bytes > budget {
            return Err(Error::out_of_memory(
                bytes,
                budget.saturating_sub(usage),
                segment.name(),
            ));
        }
        Ok(())
    }

    fn check_heap_type(&self, heap_type: HeapType) -> Result<()> {
        if heap_type == HeapType::GpuUpload && !self.info.gpu_upload_heap_supported {
            return Err(Error::missing_capability("GPU Upload Heaps"));
        }
        Ok(())
    }

    fn defer(&self, item: Deferred) {
        let mut state = self.state.lock();
        let frame = state.frame;
        state.deferred.push((frame, item));
    }

    fn record(&self, command: Command) {
        self.state.lock().commands.push(command);
    }
}

impl GpuDevice for SimDevice {
    fn adapter_info(&self) -> &AdapterInfo {
        &self.info
    }

    fn memory_budget(&self) -> MemoryBudget {
        let state = self.state.lock();
        MemoryBudget {
            local_usage: state.local_usage,
            local_budget: self.config.local_memory_bytes,
            non_local_usage: state.non_local_usage,
            non_local_budget: self.config.non_local_memory_bytes,
        }
    }

    fn statistics(&self) -> DeviceStatistics {
        let state = self.state.lock();
        let mut statistics = state.statistics.clone();
        let queue = state.copy.statistics();
        statistics.copy_submissions = queue.submissions;
        statistics
    }

    fn set_vsync(&self, enabled: bool) {
        let mut state = self.state.lock();
        if state.controls.vsync != enabled {
            debug!("VSync {}", if enabled { "enabled" } else { "disabled" });
            state.controls.vsync = enabled;
        }
    }

    fn set_stable_power_state(&self, enabled: bool) -> Result<()> {
        debug!("Stable power state: {}", enabled);
        self.state.lock().controls.stable_power_state = enabled;
        Ok(())
    }

    fn set_background_processing(&self, allowed: bool) -> Result<()> {
        debug!("Driver background processing allowed: {}", allowed);
        self.state.lock().controls.background_processing = allowed;
        Ok(())
    }

    fn create_heap(&self, desc: &HeapDesc) -> Result<HeapId> {
        let arch = self.info.architecture;
        desc.descriptor.validate(&arch)?;
        self.check_heap_type(desc.descriptor.heap_type)?;
        if desc.size == 0 || desc.size % RESOURCE_PLACEMENT_ALIGNMENT != 0 {
            return Err(Error::InvalidOperation(format!(
                "heap size {} is not a non-zero multiple of {}",
                desc.size, RESOURCE_PLACEMENT_ALIGNMENT
            )));
        }

        let properties = desc.descriptor.resolve(&arch);
        let segment = properties.segment(&arch);

        let mut state = self.state.lock();
        self.check_budget(&state, segment, desc.size)?;
        *state.usage_mut(segment) += desc.size;

        let id = HeapId(state.allocate_id());
        state.heaps.insert(
            id,
            SimHeap {
                desc: *desc,
                segment,
                properties,
            },
        );
        state.statistics.heaps_created += 1;

        debug!(
            "Created heap {}: {} bytes, {} in {} memory",
            id,
            desc.size,
            desc.descriptor,
            segment.name()
        );
        Ok(id)
    }

    fn create_placed_buffer(&self, heap: HeapId, offset: u64, desc: &BufferDesc) -> Result<BufferId> {
        let mut state = self.state.lock();
        let (heap_size, cpu_accessible) = {
            let heap = state
                .heaps
                .get(&heap)
                .ok_or_else(|| Error::invalid_handle("heap", heap.0))?;
            (heap.desc.size, heap.properties.cpu_accessible())
        };

        if offset % RESOURCE_PLACEMENT_ALIGNMENT != 0 {
            return Err(Error::InvalidOperation(format!(
                "placement offset {offset} is not aligned to {RESOURCE_PLACEMENT_ALIGNMENT}"
            )));
        }
        if desc.size == 0 || offset + desc.size > heap_size {
            return Err(Error::InvalidBufferSize {
                requested: offset + desc.size,
                maximum: heap_size,
            });
        }

        let id = BufferId(state.allocate_id());
        state.buffers.insert(
            id,
            SimBuffer {
                name: desc.name.clone(),
                data: vec![0u8; desc.size as usize],
                cpu_accessible,
                allow_unordered_access: desc.allow_unordered_access,
                committed_charge: None,
            },
        );
        state.statistics.buffers_created += 1;

        trace!("Placed buffer {} '{}' in {} at {}", id, desc.name, heap, offset);
        Ok(id)
    }

    fn create_committed_buffer(&self, heap_type: HeapType, desc: &BufferDesc) -> Result<BufferId> {
        if heap_type == HeapType::Custom {
            return Err(Error::InvalidHeapConfiguration(
                "committed buffers need a built-in heap type".into(),
            ));
        }
        self.check_heap_type(heap_type)?;
        if desc.size == 0 {
            return Err(Error::InvalidBufferSize {
                requested: 0,
                maximum: 0,
            });
        }

        let arch = self.info.architecture;
        let properties = HeapDescriptor::builtin(heap_type).resolve(&arch);
        let segment = properties.segment(&arch);
        let charge = align_to(desc.size, RESOURCE_PLACEMENT_ALIGNMENT);

        let mut state = self.state.lock();
        self.check_budget(&state, segment, charge)?;
        *state.usage_mut(segment) += charge;

        let id = BufferId(state.allocate_id());
        state.buffers.insert(
            id,
            SimBuffer {
                name: desc.name.clone(),
                data: vec![0u8; desc.size as usize],
                cpu_accessible: properties.cpu_accessible(),
                allow_unordered_access: desc.allow_unordered_access,
                committed_charge: Some((segment, charge)),
            },
        );
        state.statistics.buffers_created += 1;

        trace!("Committed buffer {} '{}' in {} heap", id, desc.name, heap_type);
        Ok(id)
    }

    fn buffer_size(&self, buffer: BufferId) -> Result<u64> {
        Ok(self.state.lock().buffer(buffer)?.data.len() as u64)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let target = state.buffer_mut(buffer)?;
        if !target.cpu_accessible {
            return Err(Error::InvalidOperation(format!(
                "buffer '{}' has no CPU mapping",
                target.name
            )));
        }
        let end = offset + data.len() as u64;
        if end > target.data.len() as u64 {
            return Err(Error::InvalidBufferSize {
                requested: end,
                maximum: target.data.len() as u64,
            });
        }
        target.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferId, offset: u64, out: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let source = state.buffer(buffer)?;
        if !source.cpu_accessible {
            return Err(Error::InvalidOperation(format!(
                "buffer '{}' has no CPU mapping",
                source.name
            )));
        }
        let end = offset + out.len() as u64;
        if end > source.data.len() as u64 {
            return Err(Error::InvalidBufferSize {
                requested: end,
                maximum: source.data.len() as u64,
            });
        }
        out.copy_from_slice(&source.data[offset as usize..end as usize]);
        Ok(())
    }

    fn release_heap(&self, heap: HeapId) {
        self.defer(Deferred::Heap(heap));
    }

    fn release_buffer(&self, buffer: BufferId) {
        self.defer(Deferred::Buffer(buffer));
    }

    fn allocate_descriptor(&self) -> Result<DescriptorIndex> {
        let mut state = self.state.lock();
        let index = state
            .descriptors
            .iter()
            .position(Option::is_none)
            .ok_or(Error::DescriptorHeapFull {
                capacity: self.config.descriptor_capacity,
            })?;
        state.descriptors[index] = Some([None; RENDER_LATENCY]);
        state.statistics.descriptors_allocated += 1;
        Ok(DescriptorIndex(index as u32))
    }

    fn write_descriptor(
        &self,
        slot: DescriptorIndex,
        handle: usize,
        buffer: BufferId,
        view: &ViewDesc,
    ) -> Result<()> {
        if handle >= RENDER_LATENCY {
            return Err(Error::InvalidOperation(format!(
                "descriptor handle {handle} out of range (slots hold {RENDER_LATENCY})"
            )));
        }

        let mut state = self.state.lock();
        let target = state.buffer(buffer)?;
        let end = view.byte_offset() + view.byte_len();
        if end > target.data.len() as u64 {
            return Err(Error::InvalidBufferSize {
                requested: end,
                maximum: target.data.len() as u64,
            });
        }
        if view.access == ViewAccess::ReadWrite && !target.allow_unordered_access {
            return Err(Error::InvalidOperation(format!(
                "buffer '{}' was not created for unordered access",
                target.name
            )));
        }

        let entry = state
            .descriptors
            .get_mut(slot.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::invalid_handle("descriptor", slot.0 as u64))?;
        entry[handle] = Some((buffer, *view));
        Ok(())
    }

    fn free_descriptor(&self, slot: DescriptorIndex) {
        self.defer(Deferred::Descriptor(slot));
    }

    fn compile_kernel(&self, source: &KernelSource, options: &CompileOptions) -> Result<CompiledKernel> {
        if source.text.trim().is_empty() {
            return Err(Error::ShaderCompile {
                entry_point: source.entry_point.to_string(),
                message: format!("{} is empty", source.file_name),
            });
        }
        KernelShape::from_options(source.entry_point, options)?;

        let hash = KernelHash::compute(source, options);
        self.state.lock().statistics.kernels_compiled += 1;
        debug!("Compiled {}:{} ({})", source.file_name, source.entry_point, hash);

        Ok(CompiledKernel {
            entry_point: source.entry_point.to_string(),
            options: options.clone(),
            hash,
        })
    }

    fn create_pipeline(&self, kernel: &CompiledKernel) -> Result<PipelineId> {
        let shape = KernelShape::from_options(&kernel.entry_point, &kernel.options)?;
        let mut state = self.state.lock();
        let id = PipelineId(state.allocate_id());
        state.pipelines.insert(id, shape);
        state.statistics.pipelines_created += 1;
        Ok(id)
    }

    fn release_pipeline(&self, pipeline: PipelineId) {
        self.defer(Deferred::Pipeline(pipeline));
    }

    fn copy_buffer_region(
        &self,
        dst: BufferId,
        dst_offset: u64,
        src: BufferId,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        {
            let state = self.state.lock();
            state.buffer(dst)?;
            state.buffer(src)?;
        }
        self.record(Command::Copy(CopyRegion {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        }));
        Ok(())
    }

    fn barrier(&self, buffer: BufferId, barrier: Barrier) -> Result<()> {
        self.state.lock().buffer(buffer)?;
        self.record(Command::Barrier(buffer, barrier));
        Ok(())
    }

    fn dispatch(&self, pipeline: PipelineId, bindings: &DispatchBindings, groups: u32) -> Result<()> {
        if !self.state.lock().pipelines.contains_key(&pipeline) {
            return Err(Error::invalid_handle("pipeline", pipeline.0));
        }
        self.record(Command::Dispatch {
            pipeline,
            bindings: *bindings,
            groups,
        });
        Ok(())
    }

    fn begin_timestamp(&self, name: &'static str) -> Result<()> {
        self.record(Command::TimestampBegin(name));
        Ok(())
    }

    fn end_timestamp(&self, name: &'static str) -> Result<()> {
        self.record(Command::TimestampEnd(name));
        Ok(())
    }

    fn resolved_timings(&self) -> Vec<GpuTiming> {
        std::mem::take(&mut self.state.lock().timings)
    }

    fn upload_begin(&self, size: u64) -> Result<UploadContext> {
        for _ in 0..UPLOAD_RETRY_LIMIT {
            {
                let state = self.state.lock();
                let mut ring = self.ring.lock();
                ring.retire(state.copy.fence().completed());

                if size > ring.capacity() {
                    if ring.in_flight() == 0 {
                        ring.grow(size)?;
                    }
                } else if let Some(RingAllocation {
                    submission, offset, ..
                }) = ring.allocate(size)?
                {
                    return Ok(UploadContext {
                        submission,
                        ring_offset: offset,
                        size,
                        copies: Vec::new(),
                    });
                }
            }
            // Another thread holds open submissions; let it finish
            std::thread::yield_now();
        }

        Err(Error::Synchronization(format!(
            "upload ring could not provide {size} bytes"
        )))
    }

    fn upload_write(&self, ctx: &UploadContext, offset: u64, data: &[u8]) -> Result<()> {
        let allocation = RingAllocation {
            submission: ctx.submission,
            offset: ctx.ring_offset,
            size: ctx.size,
        };
        self.ring.lock().write(&allocation, offset, data)
    }

    fn upload_end(&self, ctx: UploadContext, sync_on_graphics_queue: bool) -> Result<u64> {
        let mut state = self.state.lock();
        let mut ring = self.ring.lock();

        let mut bytes = 0;
        let mut result = Ok(());
        for &(dst, dst_offset, src_offset, size) in &ctx.copies {
            if src_offset + size > ctx.size {
                result = Err(Error::InvalidBufferSize {
                    requested: src_offset + size,
                    maximum: ctx.size,
                });
                break;
            }
            let src = match ring.bytes(ctx.ring_offset + src_offset, size) {
                Ok(src) => src,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            let target = match state.buffer_mut(dst) {
                Ok(target) => target,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            let end = dst_offset + size;
            if end > target.data.len() as u64 {
                result = Err(Error::InvalidBufferSize {
                    requested: end,
                    maximum: target.data.len() as u64,
                });
                break;
            }
            target.data[dst_offset as usize..end as usize].copy_from_slice(src);
            bytes += size;
        }

        // The submission is closed even on error so the ring keeps draining
        let value = state.copy.submit(bytes, sync_on_graphics_queue);
        ring.close(ctx.submission, value)?;
        state.copy.fence_mut().complete(value);
        ring.retire(value);

        trace!("Copy queue submission {}: {} bytes", value, bytes);
        result.map(|()| value)
    }

    fn queue_fast_upload(
        &self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.buffer(src)?;
        state.buffer(dst)?;
        state.copy.queue_fast(CopyRegion {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
        state.statistics.fast_uploads += 1;
        Ok(())
    }

    fn begin_frame(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if state.frame_open {
            return Err(Error::InvalidOperation(format!(
                "frame {} is already open",
                state.frame
            )));
        }

        // Frames complete on submission, so the latency wait never blocks
        let wait_for = state.frame.saturating_sub(RENDER_LATENCY as u64);
        if !state.graphics.is_complete(wait_for) {
            return Err(Error::Synchronization(format!(
                "frame {wait_for} still in flight"
            )));
        }

        state.frame_open = true;
        Ok(state.frame)
    }

    fn end_frame(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.frame_open {
            return Err(Error::InvalidOperation("end_frame without begin_frame".into()));
        }
        state.frame_open = false;
        let frame = state.frame;

        if let Some(wait) = state.copy.take_graphics_wait()
            && !state.copy.fence().is_complete(wait)
        {
            return Err(Error::Synchronization(format!(
                "copy fence {wait} not reached before graphics submission"
            )));
        }

        let commands = std::mem::take(&mut state.commands);
        let mut open_scopes: HashMap<&'static str, Instant> = HashMap::new();
        let mut result = Ok(());
        for command in commands {
            let step = match command {
                Command::Copy(region) => state.copy_between(&region),
                Command::Barrier(buffer, _) => state.buffer(buffer).map(|_| ()),
                Command::Dispatch {
                    pipeline,
                    bindings,
                    groups,
                } => state.run_dispatch(pipeline, &bindings, groups),
                Command::TimestampBegin(name) => {
                    open_scopes.insert(name, Instant::now());
                    Ok(())
                }
                Command::TimestampEnd(name) => match open_scopes.remove(name) {
                    Some(start) => {
                        state.timings.push(GpuTiming {
                            frame,
                            name,
                            milliseconds: start.elapsed().as_secs_f64() * 1000.0,
                        });
                        Ok(())
                    }
                    None => Err(Error::Synchronization(format!(
                        "timestamp scope '{name}' ended without a start"
                    ))),
                },
            };
            if let Err(e) = step {
                result = Err(e);
                break;
            }
        }
        if let Some(name) = open_scopes.keys().next() {
            warn!("Timestamp scope '{}' left open at frame end", name);
        }

        // Fast uploads land after the frame's dispatches already read the destination
        if let Some(batch) = state.copy.take_fast_batch() {
            let bytes = batch.iter().map(|r| r.size).sum();
            for region in &batch {
                if let Err(e) = state.copy_between(region) {
                    if result.is_ok() {
                        result = Err(e);
                    }
                    break;
                }
            }
            let value = state.copy.submit(bytes, false);
            state.copy.fence_mut().complete(value);
        }

        let value = state.graphics.signal();
        state.graphics.complete(value);
        state.frame += 1;
        state.statistics.frames_completed += 1;
        state.process_deferred(frame);

        result
    }

    fn current_frame(&self) -> u64 {
        self.state.lock().frame
    }

    fn flush_gpu(&self) -> Result<()> {
        let mut state = self.state.lock();
        let last = state.copy.fence().last_signaled();
        state.copy.fence_mut().complete(last);
        self.ring.lock().retire(last);

        let frame = state.frame;
        state.process_deferred(frame);
        state.statistics.flushes += 1;

        debug!("GPU flushed at frame {}", frame);
        Ok(())
    }
}
