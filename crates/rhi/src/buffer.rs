//! GPU buffer management.
//!
//! Every buffer the renderer touches goes through [`Buffer`]: the shared
//! geometry buffers, the per-frame storage buffers, the device-local indirect
//! command buffer, acceleration-structure storage and scratch memory, and the
//! shader binding table. Memory comes from gpu-allocator.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::RhiError> {
//! let lights = Buffer::new(device, BufferUsage::Storage, 64 * 48)?;
//! lights.write_slice(&[0.0f32; 12])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Buffer usage type.
///
/// Selects the Vulkan usage flags and the memory location of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Shared vertex data, also read by ray-tracing shaders and BLAS builds.
    Vertex,
    /// Shared index data, also read by ray-tracing shaders and BLAS builds.
    Index,
    /// Host-visible storage buffer rewritten every frame.
    Storage,
    /// Device-local indirect draw commands, filled by a transfer.
    Indirect,
    /// Host-visible upload source.
    Staging,
    /// Backing storage of an acceleration structure.
    AccelerationStructure,
    /// Scratch memory for acceleration-structure builds.
    Scratch,
    /// Host-written input to an acceleration-structure build (TLAS instances).
    BuildInput,
    /// Shader binding table for ray tracing.
    ShaderBindingTable,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        let address = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let build_input = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | address
                    | build_input
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | address
                    | build_input
            }
            BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            BufferUsage::Indirect => {
                vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::AccelerationStructure => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | address
            }
            BufferUsage::Scratch => vk::BufferUsageFlags::STORAGE_BUFFER | address,
            BufferUsage::BuildInput => build_input | address,
            BufferUsage::ShaderBindingTable => {
                vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | address
            }
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Indirect | BufferUsage::AccelerationStructure | BufferUsage::Scratch => {
                MemoryLocation::GpuOnly
            }
            BufferUsage::Vertex
            | BufferUsage::Index
            | BufferUsage::Storage
            | BufferUsage::Staging
            | BufferUsage::BuildInput
            | BufferUsage::ShaderBindingTable => MemoryLocation::CpuToGpu,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Storage => "storage",
            BufferUsage::Indirect => "indirect",
            BufferUsage::Staging => "staging",
            BufferUsage::AccelerationStructure => "acceleration structure",
            BufferUsage::Scratch => "scratch",
            BufferUsage::BuildInput => "build input",
            BufferUsage::ShaderBindingTable => "shader binding table",
        }
    }
}

/// GPU buffer wrapper with managed memory.
///
/// Dropping the buffer frees its allocation and destroys the handle, so the
/// owner must make sure the GPU is no longer reading it.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a new buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero size or when creation or allocation fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "{} buffer size must be greater than 0",
                usage.name()
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().lock().unwrap().allocate(&AllocationCreateDesc {
            name: usage.name(),
            requirements,
            location: usage.memory_location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Creates a host-visible buffer sized for `data` and uploads it.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Writes raw bytes at `offset`.
    ///
    /// An empty slice is a no-op, so zero-length uploads never touch the mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory is not host-visible or the write would
    /// run past the end of the buffer.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidArgument(format!(
                "Write exceeds {} buffer size: offset {} + data {} > buffer {}",
                self.usage.name(),
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("{} buffer is not host mapped", self.usage.name()))
            })?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Writes a slice of plain-old-data values at the start of the buffer.
    pub fn write_slice<T: bytemuck::Pod>(&self, values: &[T]) -> RhiResult<()> {
        self.write_data(0, bytemuck::cast_slice(values))
    }

    /// GPU virtual address of the buffer.
    pub fn device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        unsafe { self.device.handle().get_buffer_device_address(&info) }
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free {} buffer allocation: {:?}", self.usage.name(), e);
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_buffers_are_readable_by_ray_tracing() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            let flags = usage.to_vk_usage();
            assert!(flags.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
            assert!(flags.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
            assert!(
                flags.contains(vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR)
            );
        }
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
    }

    #[test]
    fn test_indirect_buffer_is_transfer_target_on_device() {
        let flags = BufferUsage::Indirect.to_vk_usage();
        assert!(flags.contains(vk::BufferUsageFlags::INDIRECT_BUFFER));
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert_eq!(
            BufferUsage::Indirect.memory_location(),
            MemoryLocation::GpuOnly
        );
    }

    #[test]
    fn test_per_frame_storage_is_host_visible() {
        assert_eq!(
            BufferUsage::Storage.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::BuildInput.memory_location(),
            MemoryLocation::CpuToGpu
        );
    }

    #[test]
    fn test_acceleration_structure_usages() {
        assert!(
            BufferUsage::AccelerationStructure
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR)
        );
        assert!(
            BufferUsage::ShaderBindingTable
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR)
        );
        assert_eq!(
            BufferUsage::Scratch.memory_location(),
            MemoryLocation::GpuOnly
        );
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Storage.name(), "storage");
        assert_eq!(BufferUsage::Indirect.name(), "indirect");
        assert_eq!(BufferUsage::ShaderBindingTable.name(), "shader binding table");
    }
}
