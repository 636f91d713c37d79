//! Descriptor set layouts and the sets allocated from them.
//!
//! Layouts are fixed for the lifetime of the renderer; only the resources
//! bound into them change. Each frame slot owns its own `dynamic` and
//! `uiHiRes` sets so rebinding a slot's buffers never touches a set that an
//! in-flight frame is reading.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use lumen_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, image_info, layout_binding, write_images,
    write_storage_buffer,
};
use lumen_rhi::device::Device;

use crate::error::{RendererError, RendererResult};
use crate::targets::RenderTargets;

/// Stages that read the shared sets.
const ALL_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw()
        | vk::ShaderStageFlags::FRAGMENT.as_raw()
        | vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::MISS_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw(),
);

/// Bindings of the `dynamic` set.
pub mod dynamic_binding {
    pub const CAMERA: u32 = 0;
    pub const RENDER_ITEMS_2D: u32 = 1;
    pub const RENDER_ITEMS_3D: u32 = 2;
    pub const TLAS: u32 = 3;
    pub const LIGHTS: u32 = 4;
    pub const INSTANCE_DATA: u32 = 5;
    pub const ANIMATED_RENDER_ITEMS_3D: u32 = 6;
    pub const ANIMATED_TRANSFORMS: u32 = 7;
}

/// Bindings of the `uiHiRes` set. Everything but binding 1 mirrors `dynamic`.
pub mod ui_hi_res_binding {
    pub const CAMERA: u32 = 0;
    pub const RENDER_ITEMS_2D_HI_RES: u32 = 1;
    pub const RENDER_ITEMS_3D: u32 = 2;
    pub const TLAS: u32 = 3;
    pub const LIGHTS: u32 = 4;
}

/// Bindings of the `renderTargets` set, all combined image samplers in GENERAL.
pub mod render_target_binding {
    pub const BASE_COLOR: u32 = 0;
    pub const NORMAL: u32 = 1;
    pub const RMA: u32 = 2;
    pub const DEPTH: u32 = 3;
    pub const RAY_TRACING: u32 = 4;
    pub const POSITION: u32 = 5;
}

/// Bindings of the `raytracing` set.
pub mod ray_tracing_binding {
    pub const VERTICES: u32 = 0;
    pub const INDICES: u32 = 1;
    pub const OUTPUT: u32 = 2;
}

/// Binding flags of the `allTextures` set: the sampler is plain, the texture
/// array may hold elements no shader reaches.
pub const ALL_TEXTURES_BINDING_FLAGS: [vk::DescriptorBindingFlags; 2] = [
    vk::DescriptorBindingFlags::empty(),
    vk::DescriptorBindingFlags::PARTIALLY_BOUND,
];

/// Sets a slot binds; one pair per frame slot.
#[derive(Clone, Copy, Debug)]
pub struct SlotDescriptorSets {
    pub dynamic: vk::DescriptorSet,
    pub ui_hi_res: vk::DescriptorSet,
}

/// Number of sets allocated for `slot_count` frame slots: two per slot plus
/// `allTextures`, `renderTargets` and `raytracing`.
pub fn descriptor_set_count(slot_count: usize) -> u32 {
    (slot_count * 2 + 3) as u32
}

fn pool_sizes(slot_count: u32, texture_array_size: u32) -> Vec<vk::DescriptorPoolSize> {
    let size = |ty, count| vk::DescriptorPoolSize::default().ty(ty).descriptor_count(count);
    vec![
        // dynamic: 7 buffers, uiHiRes: 4 buffers, raytracing: 2 buffers.
        size(vk::DescriptorType::STORAGE_BUFFER, slot_count * 11 + 2),
        size(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, slot_count * 2),
        size(vk::DescriptorType::SAMPLER, 1),
        size(vk::DescriptorType::SAMPLED_IMAGE, texture_array_size),
        size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 6),
        size(vk::DescriptorType::STORAGE_IMAGE, 1),
    ]
}

/// Layouts, pool and sets shared by every pipeline.
pub struct DescriptorSets {
    device: Arc<Device>,
    pub dynamic_layout: DescriptorSetLayout,
    pub ui_hi_res_layout: DescriptorSetLayout,
    pub all_textures_layout: DescriptorSetLayout,
    pub render_targets_layout: DescriptorSetLayout,
    pub ray_tracing_layout: DescriptorSetLayout,
    _pool: DescriptorPool,
    slots: Vec<SlotDescriptorSets>,
    pub all_textures: vk::DescriptorSet,
    pub render_targets: vk::DescriptorSet,
    pub ray_tracing: vk::DescriptorSet,
    texture_array_size: u32,
}

impl DescriptorSets {
    pub fn new(
        device: Arc<Device>,
        slot_count: usize,
        texture_array_size: u32,
    ) -> RendererResult<Self> {
        let storage = |binding| {
            layout_binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, ALL_STAGES)
        };
        let tlas = |binding| {
            layout_binding(
                binding,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                1,
                ALL_STAGES,
            )
        };

        let dynamic_layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                storage(dynamic_binding::CAMERA),
                storage(dynamic_binding::RENDER_ITEMS_2D),
                storage(dynamic_binding::RENDER_ITEMS_3D),
                tlas(dynamic_binding::TLAS),
                storage(dynamic_binding::LIGHTS),
                storage(dynamic_binding::INSTANCE_DATA),
                storage(dynamic_binding::ANIMATED_RENDER_ITEMS_3D),
                storage(dynamic_binding::ANIMATED_TRANSFORMS),
            ],
        )?;
        let ui_hi_res_layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                storage(ui_hi_res_binding::CAMERA),
                storage(ui_hi_res_binding::RENDER_ITEMS_2D_HI_RES),
                storage(ui_hi_res_binding::RENDER_ITEMS_3D),
                tlas(ui_hi_res_binding::TLAS),
                storage(ui_hi_res_binding::LIGHTS),
            ],
        )?;
        let all_textures_layout = DescriptorSetLayout::with_binding_flags(
            device.clone(),
            &[
                layout_binding(0, vk::DescriptorType::SAMPLER, 1, ALL_STAGES),
                layout_binding(
                    1,
                    vk::DescriptorType::SAMPLED_IMAGE,
                    texture_array_size,
                    ALL_STAGES,
                ),
            ],
            &ALL_TEXTURES_BINDING_FLAGS,
        )?;
        let render_target_bindings: Vec<_> = (0..=render_target_binding::POSITION)
            .map(|binding| {
                layout_binding(
                    binding,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    1,
                    ALL_STAGES,
                )
            })
            .collect();
        let render_targets_layout =
            DescriptorSetLayout::new(device.clone(), &render_target_bindings)?;
        let ray_tracing_layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                storage(ray_tracing_binding::VERTICES),
                storage(ray_tracing_binding::INDICES),
                layout_binding(
                    ray_tracing_binding::OUTPUT,
                    vk::DescriptorType::STORAGE_IMAGE,
                    1,
                    vk::ShaderStageFlags::RAYGEN_KHR,
                ),
            ],
        )?;

        let pool = DescriptorPool::new(
            device.clone(),
            descriptor_set_count(slot_count),
            &pool_sizes(slot_count as u32, texture_array_size),
        )?;

        let slots = (0..slot_count)
            .map(|_| {
                Ok(SlotDescriptorSets {
                    dynamic: pool.allocate(&dynamic_layout)?,
                    ui_hi_res: pool.allocate(&ui_hi_res_layout)?,
                })
            })
            .collect::<RendererResult<Vec<_>>>()?;
        let all_textures = pool.allocate(&all_textures_layout)?;
        let render_targets = pool.allocate(&render_targets_layout)?;
        let ray_tracing = pool.allocate(&ray_tracing_layout)?;

        debug!(
            "Descriptor sets allocated: {} slot pair(s), {} texture slots",
            slot_count, texture_array_size
        );

        Ok(Self {
            device,
            dynamic_layout,
            ui_hi_res_layout,
            all_textures_layout,
            render_targets_layout,
            ray_tracing_layout,
            _pool: pool,
            slots,
            all_textures,
            render_targets,
            ray_tracing,
            texture_array_size,
        })
    }

    #[inline]
    pub fn slot(&self, index: usize) -> SlotDescriptorSets {
        self.slots[index]
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Writes the sampler and the texture array. Slots past the end of
    /// `views` are filled with the first view so every array element is valid.
    ///
    /// # Errors
    ///
    /// [`RendererError::Asset`] if `views` is empty; nothing is written then.
    pub fn update_textures(
        &self,
        sampler: vk::Sampler,
        views: &[vk::ImageView],
    ) -> RendererResult<()> {
        let infos = texture_array_infos(views, self.texture_array_size)?;
        write_images(
            &self.device,
            self.all_textures,
            0,
            vk::DescriptorType::SAMPLER,
            &[image_info(sampler, vk::ImageView::null(), vk::ImageLayout::UNDEFINED)],
        );
        write_images(
            &self.device,
            self.all_textures,
            1,
            vk::DescriptorType::SAMPLED_IMAGE,
            &infos,
        );
        debug!(
            "Texture array updated: {} texture(s) in {} slot(s)",
            views.len(),
            infos.len()
        );
        Ok(())
    }

    /// Rebinds every render-target view after the targets were (re)created.
    pub fn update_render_targets(
        &self,
        sampler: vk::Sampler,
        targets: &RenderTargets,
    ) -> RendererResult<()> {
        let player = targets.player()?;
        let bindings = [
            (render_target_binding::BASE_COLOR, player.base_color.view()),
            (render_target_binding::NORMAL, player.normal.view()),
            (render_target_binding::RMA, player.rma.view()),
            (render_target_binding::DEPTH, player.depth.view()),
            (render_target_binding::RAY_TRACING, player.ray_tracing.view()),
            (render_target_binding::POSITION, player.position.view()),
        ];
        for (binding, view) in bindings {
            write_images(
                &self.device,
                self.render_targets,
                binding,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                &[image_info(sampler, view, vk::ImageLayout::GENERAL)],
            );
        }
        write_images(
            &self.device,
            self.ray_tracing,
            ray_tracing_binding::OUTPUT,
            vk::DescriptorType::STORAGE_IMAGE,
            &[image_info(
                vk::Sampler::null(),
                player.ray_tracing.view(),
                vk::ImageLayout::GENERAL,
            )],
        );
        debug!("Render-target descriptors updated");
        Ok(())
    }

    /// Binds the shared vertex and index buffers for the hit shaders.
    pub fn update_geometry(&self, vertices: vk::Buffer, indices: vk::Buffer) {
        write_storage_buffer(
            &self.device,
            self.ray_tracing,
            ray_tracing_binding::VERTICES,
            vertices,
        );
        write_storage_buffer(
            &self.device,
            self.ray_tracing,
            ray_tracing_binding::INDICES,
            indices,
        );
    }
}

/// Texture array contents: `views` followed by copies of `views[0]` up to
/// `slot_count`. Views beyond `slot_count` are dropped.
pub fn texture_array_infos(
    views: &[vk::ImageView],
    slot_count: u32,
) -> RendererResult<Vec<vk::DescriptorImageInfo>> {
    let &fallback = views.first().ok_or_else(|| {
        RendererError::Asset("the texture array needs at least one texture".into())
    })?;
    Ok((0..slot_count as usize)
        .map(|i| {
            let view = views.get(i).copied().unwrap_or(fallback);
            image_info(vk::Sampler::null(), view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_set_count_fits_pool_budget() {
        assert_eq!(descriptor_set_count(1), 5);
        assert_eq!(descriptor_set_count(2), 7);
        assert!(descriptor_set_count(3) <= 10);
    }

    #[test]
    fn test_pool_sizes_scale_with_slots() {
        let sizes = pool_sizes(2, 1024);
        let count = |ty| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
                .unwrap_or(0)
        };
        assert_eq!(count(vk::DescriptorType::STORAGE_BUFFER), 24);
        assert_eq!(count(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR), 4);
        assert_eq!(count(vk::DescriptorType::SAMPLED_IMAGE), 1024);
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 6);
    }

    #[test]
    fn test_texture_array_padded_with_first_texture() {
        let views = [vk::ImageView::from_raw(11), vk::ImageView::from_raw(22)];
        let infos = texture_array_infos(&views, 4).unwrap();
        let raw: Vec<u64> = infos.iter().map(|i| i.image_view.as_raw()).collect();
        assert_eq!(raw, vec![11, 22, 11, 11]);
        assert!(infos
            .iter()
            .all(|i| i.image_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }

    #[test]
    fn test_texture_array_truncates() {
        let views = [vk::ImageView::from_raw(1); 3];
        assert_eq!(texture_array_infos(&views, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_texture_array_is_rejected() {
        let err = texture_array_infos(&[], 8).unwrap_err();
        assert!(matches!(err, RendererError::Asset(_)));
    }

    #[test]
    fn test_only_the_texture_array_is_partially_bound() {
        assert!(ALL_TEXTURES_BINDING_FLAGS[0].is_empty());
        assert!(ALL_TEXTURES_BINDING_FLAGS[1].contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND));
    }
}
