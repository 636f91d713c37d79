//! Descriptor set layouts, pools and write helpers.
//!
//! Layouts are fixed once created. Only the resources bound into a set are
//! swapped later, through the `write_*` helpers below.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::descriptor::{layout_binding, DescriptorPool, DescriptorSetLayout};
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::RhiError> {
//! let layout = DescriptorSetLayout::new(
//!     device.clone(),
//!     &[layout_binding(0, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::VERTEX)],
//! )?;
//! let pool = DescriptorPool::new(
//!     device,
//!     4,
//!     &[vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_BUFFER, descriptor_count: 4 }],
//! )?;
//! let _set = pool.allocate(&layout)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Builds one layout binding.
#[inline]
pub fn layout_binding(
    binding: u32,
    descriptor_type: vk::DescriptorType,
    count: u32,
    stage_flags: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(descriptor_type)
        .descriptor_count(count)
        .stage_flags(stage_flags)
}

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(device: Arc<Device>, bindings: &[vk::DescriptorSetLayoutBinding]) -> RhiResult<Self> {
        Self::with_binding_flags(device, bindings, &[])
    }

    /// Creates a layout whose bindings carry `flags`, one entry per binding
    /// in the same order. An empty `flags` slice creates a plain layout.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] if `flags` is non-empty and its length
    /// differs from `bindings`.
    pub fn with_binding_flags(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
        flags: &[vk::DescriptorBindingFlags],
    ) -> RhiResult<Self> {
        check_binding_flags(bindings.len(), flags.len())?;

        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(flags);
        let mut create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        if !flags.is_empty() {
            create_info = create_info.push_next(&mut flags_info);
        }
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

fn check_binding_flags(binding_count: usize, flag_count: usize) -> RhiResult<()> {
    if flag_count != 0 && flag_count != binding_count {
        return Err(RhiError::InvalidArgument(format!(
            "{} binding flag(s) for {} binding(s)",
            flag_count, binding_count
        )));
    }
    Ok(())
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Descriptor pool. Sets allocated from it live as long as the pool.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self { device, pool })
    }

    /// Allocates a single set with `layout`.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("driver returned no descriptor set".into()))
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Binds the whole of `buffer` as a storage buffer.
pub fn write_storage_buffer(device: &Device, set: vk::DescriptorSet, binding: u32, buffer: vk::Buffer) {
    let buffer_infos = [vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(vk::WHOLE_SIZE)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
        .buffer_info(&buffer_infos);
    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Writes `images` into consecutive array elements of `binding`, starting at 0.
/// An empty slice writes nothing.
pub fn write_images(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    images: &[vk::DescriptorImageInfo],
) {
    if images.is_empty() {
        return;
    }
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .image_info(images);
    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Binds a top-level acceleration structure.
pub fn write_acceleration_structure(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    acceleration_structure: vk::AccelerationStructureKHR,
) {
    let structures = [acceleration_structure];
    let mut as_info = vk::WriteDescriptorSetAccelerationStructureKHR::default()
        .acceleration_structures(&structures);
    let mut write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
        .push_next(&mut as_info);
    // Acceleration-structure writes carry their count outside the
    // buffer/image arrays.
    write.descriptor_count = 1;
    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Image info for a sampled or storage image.
#[inline]
pub fn image_info(
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(image_view)
        .image_layout(image_layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_binding() {
        let binding = layout_binding(
            3,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            1,
            vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        );
        assert_eq!(binding.binding, 3);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        );
        assert_eq!(binding.descriptor_count, 1);
        assert!(binding
            .stage_flags
            .contains(vk::ShaderStageFlags::CLOSEST_HIT_KHR));
    }

    #[test]
    fn test_texture_array_binding_count() {
        let binding = layout_binding(
            1,
            vk::DescriptorType::SAMPLED_IMAGE,
            1024,
            vk::ShaderStageFlags::FRAGMENT,
        );
        assert_eq!(binding.descriptor_count, 1024);
    }

    #[test]
    fn test_binding_flags_match_bindings() {
        assert!(check_binding_flags(3, 0).is_ok());
        assert!(check_binding_flags(2, 2).is_ok());
        assert!(matches!(
            check_binding_flags(2, 1),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_image_info_helper() {
        let info = image_info(
            vk::Sampler::null(),
            vk::ImageView::null(),
            vk::ImageLayout::GENERAL,
        );
        assert_eq!(info.image_layout, vk::ImageLayout::GENERAL);
    }
}
