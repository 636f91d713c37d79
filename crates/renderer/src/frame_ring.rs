//! Frames in flight.
//!
//! The ring owns N [`FrameSlot`]s. Frame `F` records into slot `F mod N`, so
//! the CPU can fill one slot while the GPU still executes the others. A
//! slot's fence is the only thing that says its buffers are free again:
//!
//! ```text
//! 1. wait_for_fence      CPU blocks until the slot's last submission finished
//! 2. update_* uploads    host-visible buffers rewritten, descriptors rebound
//! 3. reset_fence         fence re-armed for this frame's submission
//! 4. record + submit     waits image_available, signals render_finished + fence
//! 5. present, advance
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use glam::Mat4;
use tracing::{debug, info, warn};

use lumen_core::RendererConfig;
use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::command::{CommandBuffer, CommandPool};
use lumen_rhi::descriptor::write_storage_buffer;
use lumen_rhi::device::Device;
use lumen_rhi::sync::{Fence, Semaphore, WAIT_FOREVER};
use lumen_rhi::vertex::Vertex;
use lumen_scene::{
    CameraData, DebugVertex, DrawIndexedIndirectCommand, GeometryInstanceData, GpuLight,
    RenderItem2D, RenderItem3D,
};

use crate::descriptors::{DescriptorSets, SlotDescriptorSets, dynamic_binding, ui_hi_res_binding};
use crate::error::RendererResult;

/// Slot used for frame number `frame_counter` with `slot_count` slots.
#[inline]
pub fn slot_index(frame_counter: u64, slot_count: usize) -> usize {
    (frame_counter % slot_count.max(1) as u64) as usize
}

/// Returns at most `capacity` elements of `data`, warning when it had to cut.
pub fn clamp_to_capacity<'a, T>(name: &str, data: &'a [T], capacity: usize) -> &'a [T] {
    if data.len() > capacity {
        warn!(
            "{} upload of {} element(s) exceeds capacity {}, clamping",
            name,
            data.len(),
            capacity
        );
        &data[..capacity]
    } else {
        data
    }
}

/// Capacity a growable vertex buffer is reallocated to so it holds `needed`
/// elements, or `None` if `current` already suffices.
pub fn grown_capacity(current: usize, needed: usize) -> Option<usize> {
    (needed > current).then(|| needed.next_power_of_two().max(64))
}

/// Per-slot host-visible storage buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Camera,
    RenderItems2D,
    RenderItems2DHiRes,
    RenderItems3D,
    AnimatedRenderItems3D,
    Lights,
    InstanceData,
    AnimatedTransforms,
}

impl StorageKind {
    pub const ALL: [StorageKind; 8] = [
        StorageKind::Camera,
        StorageKind::RenderItems2D,
        StorageKind::RenderItems2DHiRes,
        StorageKind::RenderItems3D,
        StorageKind::AnimatedRenderItems3D,
        StorageKind::Lights,
        StorageKind::InstanceData,
        StorageKind::AnimatedTransforms,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StorageKind::Camera => "camera",
            StorageKind::RenderItems2D => "2D render items",
            StorageKind::RenderItems2DHiRes => "hi-res 2D render items",
            StorageKind::RenderItems3D => "3D render items",
            StorageKind::AnimatedRenderItems3D => "animated 3D render items",
            StorageKind::Lights => "lights",
            StorageKind::InstanceData => "instance data",
            StorageKind::AnimatedTransforms => "animated transforms",
        }
    }

    /// Binding in the `dynamic` set and, where mirrored, in `uiHiRes`.
    pub fn bindings(self) -> (Option<u32>, Option<u32>) {
        match self {
            StorageKind::Camera => (
                Some(dynamic_binding::CAMERA),
                Some(ui_hi_res_binding::CAMERA),
            ),
            StorageKind::RenderItems2D => (Some(dynamic_binding::RENDER_ITEMS_2D), None),
            StorageKind::RenderItems2DHiRes => {
                (None, Some(ui_hi_res_binding::RENDER_ITEMS_2D_HI_RES))
            }
            StorageKind::RenderItems3D => (
                Some(dynamic_binding::RENDER_ITEMS_3D),
                Some(ui_hi_res_binding::RENDER_ITEMS_3D),
            ),
            StorageKind::AnimatedRenderItems3D => {
                (Some(dynamic_binding::ANIMATED_RENDER_ITEMS_3D), None)
            }
            StorageKind::Lights => (
                Some(dynamic_binding::LIGHTS),
                Some(ui_hi_res_binding::LIGHTS),
            ),
            StorageKind::InstanceData => (Some(dynamic_binding::INSTANCE_DATA), None),
            StorageKind::AnimatedTransforms => (Some(dynamic_binding::ANIMATED_TRANSFORMS), None),
        }
    }

    pub fn element_size(self) -> usize {
        match self {
            StorageKind::Camera => std::mem::size_of::<CameraData>(),
            StorageKind::RenderItems2D | StorageKind::RenderItems2DHiRes => {
                std::mem::size_of::<RenderItem2D>()
            }
            StorageKind::RenderItems3D | StorageKind::AnimatedRenderItems3D => {
                std::mem::size_of::<RenderItem3D>()
            }
            StorageKind::Lights => std::mem::size_of::<GpuLight>(),
            StorageKind::InstanceData => std::mem::size_of::<GeometryInstanceData>(),
            StorageKind::AnimatedTransforms => std::mem::size_of::<Mat4>(),
        }
    }

    /// Element capacity of the buffer in every slot.
    pub fn capacity(self, config: &RendererConfig) -> usize {
        match self {
            StorageKind::Camera => 1,
            StorageKind::RenderItems2D | StorageKind::RenderItems2DHiRes => {
                config.max_render_items_2d
            }
            StorageKind::RenderItems3D
            | StorageKind::AnimatedRenderItems3D
            | StorageKind::InstanceData => config.max_render_items_3d,
            StorageKind::Lights => config.max_lights,
            StorageKind::AnimatedTransforms => config.max_animated_transforms,
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

struct StorageBuffer {
    buffer: Buffer,
    capacity: usize,
    count: u32,
}

/// Writes `buffer` into every binding `kind` has in `sets`.
fn bind_storage_buffer(device: &Device, kind: StorageKind, buffer: vk::Buffer, sets: SlotDescriptorSets) {
    let (dynamic, ui_hi_res) = kind.bindings();
    if let Some(binding) = dynamic {
        write_storage_buffer(device, sets.dynamic, binding, buffer);
    }
    if let Some(binding) = ui_hi_res {
        write_storage_buffer(device, sets.ui_hi_res, binding, buffer);
    }
}

/// A host-visible vertex buffer that is reallocated when a frame needs more room.
struct GrowableVertexBuffer {
    name: &'static str,
    buffer: Option<Buffer>,
    capacity: usize,
    count: u32,
}

impl GrowableVertexBuffer {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            buffer: None,
            capacity: 0,
            count: 0,
        }
    }

    fn update(&mut self, device: &Arc<Device>, debug_vertices: &[DebugVertex]) -> RendererResult<()> {
        self.count = debug_vertices.len() as u32;
        if debug_vertices.is_empty() {
            return Ok(());
        }
        let vertices: Vec<Vertex> = debug_vertices
            .iter()
            .map(|v| Vertex::colored(v.position, v.color))
            .collect();
        if let Some(capacity) = grown_capacity(self.capacity, vertices.len()) {
            let size = (capacity * std::mem::size_of::<Vertex>()) as vk::DeviceSize;
            self.buffer = Some(Buffer::new(device.clone(), BufferUsage::Vertex, size)?);
            self.capacity = capacity;
            debug!("{} vertex buffer grown to {} vertices", self.name, capacity);
        }
        if let Some(buffer) = &self.buffer {
            buffer.write_slice(&vertices)?;
        }
        Ok(())
    }

    /// Buffer and vertex count, or `None` when there is nothing to draw.
    fn drawable(&self) -> Option<(vk::Buffer, u32)> {
        match &self.buffer {
            Some(buffer) if self.count > 0 => Some((buffer.handle(), self.count)),
            _ => None,
        }
    }
}

/// Everything one frame in flight owns.
pub struct FrameSlot {
    command_buffer: CommandBuffer,
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
    storage: Vec<StorageBuffer>,
    indirect: Buffer,
    indirect_capacity: usize,
    indirect_count: u32,
    debug_lines: GrowableVertexBuffer,
    debug_points: GrowableVertexBuffer,
}

impl FrameSlot {
    /// Binds every storage buffer of the slot into `sets`, so the sets are
    /// complete before the first upload.
    fn bind_storage(&self, device: &Device, sets: SlotDescriptorSets) {
        for kind in StorageKind::ALL {
            bind_storage_buffer(device, kind, self.storage[kind.index()].buffer.handle(), sets);
        }
    }

    fn new(device: &Arc<Device>, pool: &CommandPool, config: &RendererConfig) -> RendererResult<Self> {
        let command_buffer = CommandBuffer::new(device.clone(), pool)?;
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        // Signaled so the first wait returns immediately.
        let in_flight = Fence::new(device.clone(), true)?;

        let storage = StorageKind::ALL
            .iter()
            .map(|&kind| {
                let capacity = kind.capacity(config).max(1);
                let size = (capacity * kind.element_size()) as vk::DeviceSize;
                Ok(StorageBuffer {
                    buffer: Buffer::new(device.clone(), BufferUsage::Storage, size)?,
                    capacity,
                    count: 0,
                })
            })
            .collect::<RendererResult<Vec<_>>>()?;

        let indirect_capacity = config.max_indirect_commands.max(1);
        let indirect = Buffer::new(
            device.clone(),
            BufferUsage::Indirect,
            (indirect_capacity * std::mem::size_of::<DrawIndexedIndirectCommand>())
                as vk::DeviceSize,
        )?;

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight,
            storage,
            indirect,
            indirect_capacity,
            indirect_count: 0,
            debug_lines: GrowableVertexBuffer::new("debug line"),
            debug_points: GrowableVertexBuffer::new("debug point"),
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }

    /// Elements written by the last upload of `kind`.
    #[inline]
    pub fn count(&self, kind: StorageKind) -> u32 {
        self.storage[kind.index()].count
    }

    #[inline]
    pub fn indirect_buffer(&self) -> vk::Buffer {
        self.indirect.handle()
    }

    #[inline]
    pub fn indirect_count(&self) -> u32 {
        self.indirect_count
    }

    pub fn debug_lines(&self) -> Option<(vk::Buffer, u32)> {
        self.debug_lines.drawable()
    }

    pub fn debug_points(&self) -> Option<(vk::Buffer, u32)> {
        self.debug_points.drawable()
    }
}

/// The N frame slots and the frame counter that selects between them.
pub struct FrameRing {
    device: Arc<Device>,
    slots: Vec<FrameSlot>,
    frame_counter: u64,
}

impl FrameRing {
    /// Creates one slot per frame in flight and binds each slot's storage
    /// buffers into that slot's descriptor sets.
    pub fn new(
        device: Arc<Device>,
        pool: &CommandPool,
        config: &RendererConfig,
        descriptor_sets: &DescriptorSets,
    ) -> RendererResult<Self> {
        let slots = (0..config.frames_in_flight)
            .map(|index| {
                let slot = FrameSlot::new(&device, pool, config)?;
                slot.bind_storage(&device, descriptor_sets.slot(index));
                Ok(slot)
            })
            .collect::<RendererResult<Vec<_>>>()?;

        info!("Frame ring created with {} slot(s)", slots.len());

        Ok(Self {
            device,
            slots,
            frame_counter: 0,
        })
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        slot_index(self.frame_counter, self.slots.len())
    }

    #[inline]
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current_index()]
    }

    /// Blocks until the current slot's previous submission has executed.
    pub fn wait_for_fence(&self) -> RendererResult<()> {
        self.current_slot().in_flight.wait(WAIT_FOREVER)?;
        Ok(())
    }

    /// Re-arms the current slot's fence. Call once every upload for the
    /// frame is done and right before the submission that signals it.
    pub fn reset_fence(&self) -> RendererResult<()> {
        self.current_slot().in_flight.reset()?;
        Ok(())
    }

    /// Copies `data` into the current slot's `kind` buffer and rebinds the
    /// buffer into the slot's descriptor sets. Data past the buffer's
    /// capacity is dropped with a warning; an empty slice only resets the
    /// count.
    pub fn update_storage_buffer<T: Pod>(
        &mut self,
        kind: StorageKind,
        data: &[T],
        sets: SlotDescriptorSets,
    ) -> RendererResult<()> {
        debug_assert_eq!(std::mem::size_of::<T>(), kind.element_size());
        let index = self.current_index();
        let storage = &mut self.slots[index].storage[kind.index()];

        let data = clamp_to_capacity(kind.name(), data, storage.capacity);
        storage.buffer.write_slice(data)?;
        storage.count = data.len() as u32;

        bind_storage_buffer(&self.device, kind, storage.buffer.handle(), sets);
        Ok(())
    }

    /// Stages `commands` in a transient host buffer and copies them into the
    /// current slot's device-local indirect buffer, blocking until the copy
    /// has executed. An empty list skips the copy.
    pub fn update_indirect_commands(
        &mut self,
        commands: &[DrawIndexedIndirectCommand],
        pool: &CommandPool,
        queue: vk::Queue,
    ) -> RendererResult<()> {
        let index = self.current_index();
        let slot = &mut self.slots[index];
        let commands = clamp_to_capacity("indirect command", commands, slot.indirect_capacity);
        slot.indirect_count = commands.len() as u32;
        if commands.is_empty() {
            return Ok(());
        }

        let bytes: &[u8] = bytemuck::cast_slice(commands);
        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, bytes)?;
        let region = vk::BufferCopy::default().size(bytes.len() as vk::DeviceSize);
        let dst = slot.indirect.handle();
        pool.submit_once(queue, |cmd| {
            cmd.copy_buffer(staging.handle(), dst, &[region]);
        })?;
        Ok(())
    }

    /// Replaces the current slot's debug line and point vertices. Empty
    /// lists leave nothing to draw.
    pub fn update_debug_vertices(
        &mut self,
        lines: &[DebugVertex],
        points: &[DebugVertex],
    ) -> RendererResult<()> {
        let index = self.current_index();
        let slot = &mut self.slots[index];
        slot.debug_lines.update(&self.device, lines)?;
        slot.debug_points.update(&self.device, points)?;
        Ok(())
    }

    /// Moves on to the next slot. Called once per presented frame.
    #[inline]
    pub fn advance(&mut self) {
        self.frame_counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_index_wraps() {
        let picked: Vec<usize> = (0..7).map(|f| slot_index(f, 3)).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_single_slot_is_serial() {
        assert!((0..10).all(|f| slot_index(f, 1) == 0));
    }

    #[test]
    fn test_slot_index_tolerates_zero_slots() {
        assert_eq!(slot_index(5, 0), 0);
    }

    #[test]
    fn test_clamp_to_capacity() {
        let data = [1, 2, 3, 4, 5];
        assert_eq!(clamp_to_capacity("test", &data, 3), &[1, 2, 3]);
        assert_eq!(clamp_to_capacity("test", &data, 5), &data);
        let empty: [u32; 0] = [];
        assert!(clamp_to_capacity("test", &empty, 0).is_empty());
    }

    #[test]
    fn test_grown_capacity() {
        assert_eq!(grown_capacity(0, 0), None);
        assert_eq!(grown_capacity(0, 10), Some(64));
        assert_eq!(grown_capacity(64, 64), None);
        assert_eq!(grown_capacity(64, 65), Some(128));
        assert_eq!(grown_capacity(128, 1000), Some(1024));
    }

    #[test]
    fn test_every_storage_kind_is_bound_somewhere() {
        for kind in StorageKind::ALL {
            let (dynamic, ui_hi_res) = kind.bindings();
            assert!(dynamic.is_some() || ui_hi_res.is_some(), "{:?}", kind);
            assert_eq!(StorageKind::ALL[kind.index()], kind);
        }
    }

    #[test]
    fn test_dynamic_bindings_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in StorageKind::ALL {
            if let (Some(binding), _) = kind.bindings() {
                assert!(seen.insert(binding), "binding {} used twice", binding);
            }
        }
        assert!(!seen.contains(&dynamic_binding::TLAS));
    }

    #[test]
    fn test_storage_and_tlas_cover_every_slot_binding() {
        let mut dynamic: Vec<u32> = vec![dynamic_binding::TLAS];
        let mut ui_hi_res: Vec<u32> = vec![ui_hi_res_binding::TLAS];
        for kind in StorageKind::ALL {
            let (d, u) = kind.bindings();
            dynamic.extend(d);
            ui_hi_res.extend(u);
        }
        dynamic.sort_unstable();
        ui_hi_res.sort_unstable();
        assert_eq!(dynamic, (0..=dynamic_binding::ANIMATED_TRANSFORMS).collect::<Vec<_>>());
        assert_eq!(ui_hi_res, (0..=ui_hi_res_binding::LIGHTS).collect::<Vec<_>>());
    }

    #[test]
    fn test_capacities_follow_config() {
        let config = RendererConfig::default();
        assert_eq!(StorageKind::Camera.capacity(&config), 1);
        assert_eq!(StorageKind::Lights.capacity(&config), config.max_lights);
        assert_eq!(
            StorageKind::RenderItems2DHiRes.capacity(&config),
            config.max_render_items_2d
        );
        assert_eq!(
            StorageKind::InstanceData.capacity(&config),
            config.max_render_items_3d
        );
        assert_eq!(StorageKind::AnimatedTransforms.element_size(), 64);
    }
}
