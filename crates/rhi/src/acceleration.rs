//! Ray-tracing acceleration structures.
//!
//! [`AccelerationStructure`] owns the `VkAccelerationStructureKHR` handle and
//! its backing buffer. Builds run synchronously through
//! [`CommandPool::submit_once`], so a returned structure is ready to trace.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::command::CommandPool;
//! use lumen_rhi::acceleration::AccelerationStructure;
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> Result<(), lumen_rhi::RhiError> {
//! // An empty top-level structure is valid and traces as a miss everywhere.
//! let tlas = AccelerationStructure::build_top_level(device.clone(), pool, device.graphics_queue(), &[])?;
//! assert_eq!(tlas.primitive_count(), 0);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::buffer::{Buffer, BufferUsage};
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::raytracing::align_up;
use crate::vertex::Vertex;

/// Disables back-face culling for an instance.
const INSTANCE_FLAG_CULL_DISABLE: u32 =
    vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw();

/// `VkAccelerationStructureInstanceKHR` as plain bytes.
///
/// Bit-packed fields: `custom_index` (24 bits) with `mask` (8 bits), and the
/// hit-group offset (24 bits) with instance flags (8 bits).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    pub custom_index_and_mask: u32,
    pub sbt_offset_and_flags: u32,
    pub blas_address: u64,
}

impl InstanceRecord {
    pub fn new(transform: [f32; 12], custom_index: u32, mask: u8, blas_address: u64) -> Self {
        Self {
            transform,
            custom_index_and_mask: (custom_index & 0x00FF_FFFF) | ((mask as u32) << 24),
            sbt_offset_and_flags: INSTANCE_FLAG_CULL_DISABLE << 24,
            blas_address,
        }
    }

    #[inline]
    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & 0x00FF_FFFF
    }

    #[inline]
    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }
}

/// A range of triangles inside the shared vertex and index buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriangleRange {
    pub vertex_address: vk::DeviceAddress,
    pub index_address: vk::DeviceAddress,
    /// Highest vertex index the range may reference, relative to `base_vertex`.
    pub max_vertex: u32,
    pub base_index: u32,
    pub base_vertex: u32,
    pub index_count: u32,
}

impl TriangleRange {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// Acceleration structure plus its storage.
pub struct AccelerationStructure {
    device: Arc<Device>,
    handle: vk::AccelerationStructureKHR,
    // Kept alive for as long as the handle.
    _storage: Buffer,
    device_address: vk::DeviceAddress,
    level: vk::AccelerationStructureTypeKHR,
    primitive_count: u32,
}

impl AccelerationStructure {
    /// Builds a bottom-level structure over one triangle range.
    pub fn build_bottom_level(
        device: Arc<Device>,
        pool: &CommandPool,
        queue: vk::Queue,
        range: &TriangleRange,
    ) -> RhiResult<Self> {
        if range.triangle_count() == 0 {
            return Err(RhiError::AccelerationStructureError(
                "bottom-level structure needs at least one triangle".to_string(),
            ));
        }

        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: range.vertex_address,
            })
            .vertex_stride(std::mem::size_of::<Vertex>() as vk::DeviceSize)
            .max_vertex(range.max_vertex)
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: range.index_address,
            });
        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE);
        let build_range = vk::AccelerationStructureBuildRangeInfoKHR::default()
            .primitive_count(range.triangle_count())
            .primitive_offset(range.base_index * std::mem::size_of::<u32>() as u32)
            .first_vertex(range.base_vertex);

        Self::build(
            device,
            pool,
            queue,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            geometry,
            build_range,
        )
    }

    /// Builds a top-level structure over `instances`. An empty slice
    /// produces a valid structure with no instances.
    pub fn build_top_level(
        device: Arc<Device>,
        pool: &CommandPool,
        queue: vk::Queue,
        instances: &[InstanceRecord],
    ) -> RhiResult<Self> {
        // Vulkan rejects zero-sized buffers; keep room for one record.
        let instance_bytes = std::mem::size_of_val(instances)
            .max(std::mem::size_of::<InstanceRecord>()) as vk::DeviceSize;
        let instance_buffer = Buffer::new(device.clone(), BufferUsage::BuildInput, instance_bytes)?;
        instance_buffer.write_slice(instances)?;

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instance_buffer.device_address(),
            });
        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            });
        let build_range = vk::AccelerationStructureBuildRangeInfoKHR::default()
            .primitive_count(instances.len() as u32);

        // The instance buffer must outlive the build, which has completed
        // by the time `build` returns.
        let tlas = Self::build(
            device,
            pool,
            queue,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            geometry,
            build_range,
        )?;
        drop(instance_buffer);
        Ok(tlas)
    }

    fn build(
        device: Arc<Device>,
        pool: &CommandPool,
        queue: vk::Queue,
        level: vk::AccelerationStructureTypeKHR,
        geometry: vk::AccelerationStructureGeometryKHR<'_>,
        build_range: vk::AccelerationStructureBuildRangeInfoKHR,
    ) -> RhiResult<Self> {
        let geometries = [geometry];
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(level)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            device
                .acceleration_structure()
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &[build_range.primitive_count],
                    &mut sizes,
                );
        }

        let storage = Buffer::new(
            device.clone(),
            BufferUsage::AccelerationStructure,
            sizes.acceleration_structure_size,
        )?;
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(storage.handle())
            .size(sizes.acceleration_structure_size)
            .ty(level);
        let handle = unsafe {
            device
                .acceleration_structure()
                .create_acceleration_structure(&create_info, None)?
        };

        // Wrap immediately so the handle is released on any later error.
        let mut structure = Self {
            device: device.clone(),
            handle,
            _storage: storage,
            device_address: 0,
            level,
            primitive_count: build_range.primitive_count,
        };

        let scratch_alignment = device
            .ray_tracing_properties()
            .min_scratch_offset_alignment
            .max(1) as vk::DeviceSize;
        let scratch = Buffer::new(
            device.clone(),
            BufferUsage::Scratch,
            sizes.build_scratch_size.max(1) + scratch_alignment,
        )?;
        let scratch_address = align_up(scratch.device_address(), scratch_alignment);

        build_info = build_info
            .dst_acceleration_structure(handle)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_address,
            });

        pool.submit_once(queue, |cmd| {
            cmd.build_acceleration_structure(&build_info, std::slice::from_ref(&build_range));
        })
        .map_err(|e| {
            RhiError::AccelerationStructureError(format!("{:?} build failed: {}", level, e))
        })?;

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);
        structure.device_address = unsafe {
            device
                .acceleration_structure()
                .get_acceleration_structure_device_address(&address_info)
        };

        debug!(
            "Built {:?} acceleration structure: {} primitive(s), {} bytes",
            level, build_range.primitive_count, sizes.acceleration_structure_size
        );

        Ok(structure)
    }

    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    #[inline]
    pub fn level(&self) -> vk::AccelerationStructureTypeKHR {
        self.level
    }

    /// Triangles for a bottom-level structure, instances for a top-level one.
    #[inline]
    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.device
                .acceleration_structure()
                .destroy_acceleration_structure(self.handle, None);
        }
        debug!("Destroyed {:?} acceleration structure", self.level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_record_matches_vulkan_size() {
        assert_eq!(
            std::mem::size_of::<InstanceRecord>(),
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>()
        );
        assert_eq!(std::mem::size_of::<InstanceRecord>(), 64);
    }

    #[test]
    fn test_instance_record_packing() {
        let record = InstanceRecord::new([0.0; 12], 7, 0xFF, 0xDEAD_0000);
        assert_eq!(record.custom_index(), 7);
        assert_eq!(record.mask(), 0xFF);
        assert_eq!(record.sbt_offset_and_flags & 0x00FF_FFFF, 0);
        assert_eq!(record.sbt_offset_and_flags >> 24, INSTANCE_FLAG_CULL_DISABLE);
    }

    #[test]
    fn test_custom_index_truncates_to_24_bits() {
        let record = InstanceRecord::new([0.0; 12], 0x0100_0001, 0x0F, 0);
        assert_eq!(record.custom_index(), 1);
        assert_eq!(record.mask(), 0x0F);
    }

    #[test]
    fn test_triangle_count() {
        let range = TriangleRange {
            vertex_address: 0,
            index_address: 0,
            max_vertex: 23,
            base_index: 6,
            base_vertex: 4,
            index_count: 36,
        };
        assert_eq!(range.triangle_count(), 12);
    }
}
