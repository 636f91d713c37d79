//! Ray-tracing pipeline and shader binding table.
//!
//! The pipeline has four shader groups in a fixed order: ray generation,
//! primary miss, shadow miss, and a triangle hit group with a closest-hit
//! shader. [`ShaderBindingTable`] lays the group handles out in one buffer
//! and hands back the strided regions `vkCmdTraceRaysKHR` expects.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::buffer::{Buffer, BufferUsage};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{Pipeline, PipelineLayout};
use crate::physical_device::RayTracingProperties;
use crate::shader::{Shader, ShaderStage};

/// Group count: raygen, miss, shadow miss, hit.
pub const SHADER_GROUP_COUNT: u32 = 4;
const MISS_GROUP_COUNT: u64 = 2;
const MAX_RECURSION_DEPTH: u32 = 2;

/// Rounds `value` up to a multiple of `alignment` (a power of two).
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Shader stages for the ray-tracing pipeline.
pub struct RayTracingShaders<'a> {
    pub raygen: &'a Shader,
    pub miss: &'a Shader,
    pub shadow_miss: &'a Shader,
    pub closest_hit: &'a Shader,
}

/// Creates the ray-tracing pipeline.
///
/// # Errors
///
/// [`RhiError::PipelineError`] if a shader has the wrong stage, or any driver
/// error from pipeline creation.
pub fn create_ray_tracing_pipeline(
    device: Arc<Device>,
    layout: &PipelineLayout,
    shaders: &RayTracingShaders<'_>,
) -> RhiResult<Pipeline> {
    let expected = [
        (shaders.raygen, ShaderStage::RayGen),
        (shaders.miss, ShaderStage::Miss),
        (shaders.shadow_miss, ShaderStage::Miss),
        (shaders.closest_hit, ShaderStage::ClosestHit),
    ];
    if let Some((shader, stage)) = expected.iter().find(|(s, stage)| s.stage() != *stage) {
        return Err(RhiError::PipelineError(format!(
            "expected a {} shader, got {}",
            stage,
            shader.stage()
        )));
    }

    let stages: Vec<vk::PipelineShaderStageCreateInfo> =
        expected.iter().map(|(s, _)| s.stage_create_info()).collect();

    let general = |index: u32| {
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
            .general_shader(index)
            .closest_hit_shader(vk::SHADER_UNUSED_KHR)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR)
    };
    let groups = [
        general(0),
        general(1),
        general(2),
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
            .general_shader(vk::SHADER_UNUSED_KHR)
            .closest_hit_shader(3)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR),
    ];

    let recursion = MAX_RECURSION_DEPTH.min(device.ray_tracing_properties().max_ray_recursion_depth);
    let create_info = vk::RayTracingPipelineCreateInfoKHR::default()
        .stages(&stages)
        .groups(&groups)
        .max_pipeline_ray_recursion_depth(recursion)
        .layout(layout.handle());

    let pipelines = unsafe {
        device
            .ray_tracing_pipeline()
            .create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                &[create_info],
                None,
            )
            .map_err(|(_, result)| result)?
    };
    let pipeline = pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineError("driver returned no pipeline".to_string()))?;

    debug!("Ray-tracing pipeline created (recursion depth {})", recursion);
    Ok(Pipeline::from_raw(
        device,
        pipeline,
        vk::PipelineBindPoint::RAY_TRACING_KHR,
    ))
}

/// Byte offsets, strides and sizes of the three populated SBT regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u64,
    pub handle_stride: u64,
    pub raygen_offset: u64,
    pub raygen_size: u64,
    pub miss_offset: u64,
    pub miss_size: u64,
    pub hit_offset: u64,
    pub hit_size: u64,
    pub total_size: u64,
}

impl SbtLayout {
    pub fn new(properties: &RayTracingProperties) -> Self {
        let handle_size = properties.shader_group_handle_size as u64;
        let handle_alignment = (properties.shader_group_handle_alignment as u64).max(1);
        let base_alignment = (properties.shader_group_base_alignment as u64).max(1);

        let handle_stride = align_up(handle_size, handle_alignment);
        // The raygen region's size must equal its stride.
        let raygen_size = align_up(handle_stride, base_alignment);
        let miss_size = align_up(handle_stride * MISS_GROUP_COUNT, base_alignment);
        let hit_size = align_up(handle_stride, base_alignment);

        let raygen_offset = 0;
        let miss_offset = raygen_offset + raygen_size;
        let hit_offset = miss_offset + miss_size;

        Self {
            handle_size,
            handle_stride,
            raygen_offset,
            raygen_size,
            miss_offset,
            miss_size,
            hit_offset,
            hit_size,
            total_size: hit_offset + hit_size,
        }
    }

    /// Destination offsets of the four group handles, in group order.
    pub fn handle_offsets(&self) -> [u64; SHADER_GROUP_COUNT as usize] {
        [
            self.raygen_offset,
            self.miss_offset,
            self.miss_offset + self.handle_stride,
            self.hit_offset,
        ]
    }
}

/// Strided regions for `vkCmdTraceRaysKHR`; the callable region is empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct SbtRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

/// Shader binding table buffer for one ray-tracing pipeline.
pub struct ShaderBindingTable {
    _buffer: Buffer,
    regions: SbtRegions,
}

impl ShaderBindingTable {
    pub fn new(device: Arc<Device>, pipeline: &Pipeline) -> RhiResult<Self> {
        let layout = SbtLayout::new(device.ray_tracing_properties());
        let handle_size = layout.handle_size as usize;

        let handles = unsafe {
            device
                .ray_tracing_pipeline()
                .get_ray_tracing_shader_group_handles(
                    pipeline.handle(),
                    0,
                    SHADER_GROUP_COUNT,
                    handle_size * SHADER_GROUP_COUNT as usize,
                )?
        };

        let buffer = Buffer::new(device, BufferUsage::ShaderBindingTable, layout.total_size)?;
        for (group, offset) in layout.handle_offsets().into_iter().enumerate() {
            let handle = &handles[group * handle_size..(group + 1) * handle_size];
            buffer.write_data(offset, handle)?;
        }

        let base = buffer.device_address();
        let region = |offset: u64, stride: u64, size: u64| {
            vk::StridedDeviceAddressRegionKHR::default()
                .device_address(base + offset)
                .stride(stride)
                .size(size)
        };
        let regions = SbtRegions {
            raygen: region(layout.raygen_offset, layout.raygen_size, layout.raygen_size),
            miss: region(layout.miss_offset, layout.handle_stride, layout.miss_size),
            hit: region(layout.hit_offset, layout.handle_stride, layout.hit_size),
            callable: vk::StridedDeviceAddressRegionKHR::default(),
        };

        debug!("Shader binding table created: {} bytes", layout.total_size);
        Ok(Self {
            _buffer: buffer,
            regions,
        })
    }

    #[inline]
    pub fn regions(&self) -> &SbtRegions {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(handle: u32, handle_align: u32, base_align: u32) -> RayTracingProperties {
        RayTracingProperties {
            shader_group_handle_size: handle,
            shader_group_handle_alignment: handle_align,
            shader_group_base_alignment: base_align,
            max_ray_recursion_depth: 31,
            min_scratch_offset_alignment: 128,
        }
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
    }

    #[test]
    fn test_sbt_layout_typical_desktop() {
        let layout = SbtLayout::new(&properties(32, 32, 64));
        assert_eq!(layout.handle_stride, 32);
        assert_eq!(layout.raygen_size, 64);
        assert_eq!(layout.miss_offset, 64);
        assert_eq!(layout.miss_size, 64);
        assert_eq!(layout.hit_offset, 128);
        assert_eq!(layout.total_size, 192);
        assert_eq!(layout.handle_offsets(), [0, 64, 96, 128]);
    }

    #[test]
    fn test_sbt_regions_are_base_aligned() {
        let layout = SbtLayout::new(&properties(32, 64, 256));
        for offset in [layout.raygen_offset, layout.miss_offset, layout.hit_offset] {
            assert_eq!(offset % 256, 0);
        }
        assert_eq!(layout.handle_stride, 64);
        assert_eq!(layout.miss_size, 256);
    }
}
