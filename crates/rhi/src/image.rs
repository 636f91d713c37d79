//! 2D images with a single mip level, their views and allocations.
//!
//! Render targets, the depth buffer and textures are all [`Image`]s; the
//! aspect (colour or depth) follows from the format.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::image::Image;
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::RhiError> {
//! let depth = Image::new(
//!     device,
//!     "depth",
//!     vk::Format::D32_SFLOAT,
//!     vk::Extent2D { width: 1536, height: 864 },
//!     vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
//! )?;
//! assert_eq!(depth.aspect(), vk::ImageAspectFlags::DEPTH);
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

/// Whether `format` carries depth data.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect mask used for views and barriers of an image in `format`.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_format(format) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Whole-image subresource range for one mip level and one layer.
pub fn full_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Blit region copying all of `src` into the rectangle `dst_min..dst_max`.
pub fn blit_region(src: vk::Extent2D, dst_min: [i32; 2], dst_max: [i32; 2]) -> vk::ImageBlit {
    let layers = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);
    vk::ImageBlit::default()
        .src_subresource(layers)
        .src_offsets([
            vk::Offset3D { x: 0, y: 0, z: 0 },
            vk::Offset3D {
                x: src.width as i32,
                y: src.height as i32,
                z: 1,
            },
        ])
        .dst_subresource(layers)
        .dst_offsets([
            vk::Offset3D {
                x: dst_min[0],
                y: dst_min[1],
                z: 0,
            },
            vk::Offset3D {
                x: dst_max[0],
                y: dst_max[1],
                z: 1,
            },
        ])
}

/// GPU-only 2D image with a view.
pub struct Image {
    device: Arc<Device>,
    name: String,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    usage: vk::ImageUsageFlags,
}

impl Image {
    /// Creates the image in `UNDEFINED` layout and a matching view.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] for a zero extent, otherwise any
    /// creation or allocation failure. Partially created objects are
    /// released before returning.
    pub fn new(
        device: Arc<Device>,
        name: &str,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "image '{}' extent must be non-zero, got {}x{}",
                name, extent.width, extent.height
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().lock().unwrap().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        // From here on, Drop releases whatever has been created.
        let mut created = Self {
            device: device.clone(),
            name: name.to_string(),
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format,
            extent,
            usage,
        };

        if let Some(allocation) = &created.allocation {
            unsafe {
                device
                    .handle()
                    .bind_image_memory(image, allocation.memory(), allocation.offset())?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(full_subresource_range(aspect_for_format(format)));
        created.view = unsafe { device.handle().create_image_view(&view_info, None)? };

        device.set_object_name(image, name);
        debug!(
            "Created image '{}': {}x{} {:?}",
            name, extent.width, extent.height, format
        );

        Ok(created)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_for_format(self.format)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free image '{}' allocation: {:?}", self.name, e);
            }
        }

        debug!("Destroyed image '{}'", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::R16G16B16A16_SNORM),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_blit_region_covers_source() {
        let region = blit_region(
            vk::Extent2D {
                width: 1536,
                height: 864,
            },
            [0, 0],
            [768, 432],
        );
        assert_eq!(region.src_offsets[1].x, 1536);
        assert_eq!(region.src_offsets[1].y, 864);
        assert_eq!(region.dst_offsets[1].x, 768);
        assert_eq!(region.dst_offsets[1].z, 1);
    }

    #[test]
    fn test_full_subresource_range() {
        let range = full_subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
    }

    #[test]
    fn test_image_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Image>();
    }
}
