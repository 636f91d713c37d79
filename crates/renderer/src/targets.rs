//! Render targets.
//!
//! Two generations of targets exist. The fixed ones (loading screen and the
//! full-size final image) are created once. The player targets (present,
//! G-buffer, lighting, ray-tracing output and depth) follow the present
//! resolution and are torn down and rebuilt together on resize.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use lumen_rhi::device::Device;
use lumen_rhi::image::Image;

use crate::error::{RendererError, RendererResult};
use crate::frame_graph::ImageState;

pub const BASE_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub const NORMAL_FORMAT: vk::Format = vk::Format::R16G16B16A16_SNORM;
pub const RMA_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub const POSITION_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const LIGHTING_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub const RAY_TRACING_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
pub const PRESENT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Colour formats the geometry pass writes, in attachment order.
pub const GBUFFER_FORMATS: [vk::Format; 4] =
    [BASE_COLOR_FORMAT, NORMAL_FORMAT, RMA_FORMAT, POSITION_FORMAT];

const fn flags(bits: &[vk::ImageUsageFlags]) -> vk::ImageUsageFlags {
    let mut raw = 0;
    let mut i = 0;
    while i < bits.len() {
        raw |= bits[i].as_raw();
        i += 1;
    }
    vk::ImageUsageFlags::from_raw(raw)
}

const GBUFFER_USAGE: vk::ImageUsageFlags = flags(&[
    vk::ImageUsageFlags::COLOR_ATTACHMENT,
    vk::ImageUsageFlags::SAMPLED,
]);
const DEPTH_USAGE: vk::ImageUsageFlags = flags(&[
    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    vk::ImageUsageFlags::SAMPLED,
]);
const LIGHTING_USAGE: vk::ImageUsageFlags = flags(&[
    vk::ImageUsageFlags::COLOR_ATTACHMENT,
    vk::ImageUsageFlags::SAMPLED,
    vk::ImageUsageFlags::TRANSFER_SRC,
]);
const RAY_TRACING_USAGE: vk::ImageUsageFlags = flags(&[
    vk::ImageUsageFlags::STORAGE,
    vk::ImageUsageFlags::SAMPLED,
]);
const PRESENT_USAGE: vk::ImageUsageFlags = flags(&[
    vk::ImageUsageFlags::COLOR_ATTACHMENT,
    vk::ImageUsageFlags::SAMPLED,
    vk::ImageUsageFlags::TRANSFER_SRC,
    vk::ImageUsageFlags::TRANSFER_DST,
]);
const FULL_SIZE_USAGE: vk::ImageUsageFlags = flags(&[
    vk::ImageUsageFlags::TRANSFER_SRC,
    vk::ImageUsageFlags::TRANSFER_DST,
]);
const LOADING_SCREEN_USAGE: vk::ImageUsageFlags = flags(&[
    vk::ImageUsageFlags::COLOR_ATTACHMENT,
    vk::ImageUsageFlags::SAMPLED,
    vk::ImageUsageFlags::TRANSFER_SRC,
]);

/// Extents of the player targets for one present resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayerTargetExtents {
    /// Present target.
    pub present: vk::Extent2D,
    /// G-buffer, depth, lighting and ray-tracing targets.
    pub supersampled: vk::Extent2D,
}

/// Present targets are `width` x `height`; the rest are `factor` times that.
/// Zero inputs are raised to 1 so a minimized window never yields an empty
/// image.
pub fn player_target_extents(width: u32, height: u32, factor: u32) -> PlayerTargetExtents {
    let width = width.max(1);
    let height = height.max(1);
    let factor = factor.max(1);
    PlayerTargetExtents {
        present: vk::Extent2D { width, height },
        supersampled: vk::Extent2D {
            width: width * factor,
            height: height * factor,
        },
    }
}

/// Replaces the value in `slot` with the one `create` returns, dropping the
/// old value first so the two never coexist. On failure `slot` stays empty.
pub fn replace_generation<T, E>(
    slot: &mut Option<T>,
    create: impl FnOnce() -> Result<T, E>,
) -> Result<&mut T, E> {
    drop(slot.take());
    Ok(slot.insert(create()?))
}

/// An image plus the state the last recorded frame left it in.
pub struct RenderTarget {
    image: Image,
    state: ImageState,
}

impl RenderTarget {
    fn new(
        device: Arc<Device>,
        name: &str,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> RendererResult<Self> {
        let image = Image::new(device, name, format, extent, usage)?;
        Ok(Self {
            image,
            state: ImageState::UNDEFINED,
        })
    }

    #[inline]
    pub fn image(&self) -> &Image {
        &self.image
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    #[inline]
    pub fn state(&self) -> ImageState {
        self.state
    }

    #[inline]
    pub fn set_state(&mut self, state: ImageState) {
        self.state = state;
    }
}

/// Targets sized from the present resolution.
pub struct PlayerTargets {
    pub present: RenderTarget,
    pub base_color: RenderTarget,
    pub normal: RenderTarget,
    pub rma: RenderTarget,
    pub position: RenderTarget,
    pub depth: RenderTarget,
    pub lighting: RenderTarget,
    pub ray_tracing: RenderTarget,
}

impl PlayerTargets {
    fn new(device: &Arc<Device>, extents: PlayerTargetExtents) -> RendererResult<Self> {
        let big = extents.supersampled;
        let target = |name: &str, format, extent, usage| {
            RenderTarget::new(device.clone(), name, format, extent, usage)
        };
        Ok(Self {
            present: target("present", PRESENT_FORMAT, extents.present, PRESENT_USAGE)?,
            base_color: target("gbuffer_base_color", BASE_COLOR_FORMAT, big, GBUFFER_USAGE)?,
            normal: target("gbuffer_normal", NORMAL_FORMAT, big, GBUFFER_USAGE)?,
            rma: target("gbuffer_rma", RMA_FORMAT, big, GBUFFER_USAGE)?,
            position: target("gbuffer_position", POSITION_FORMAT, big, GBUFFER_USAGE)?,
            depth: target("gbuffer_depth", DEPTH_FORMAT, big, DEPTH_USAGE)?,
            lighting: target("lighting", LIGHTING_FORMAT, big, LIGHTING_USAGE)?,
            ray_tracing: target("ray_tracing", RAY_TRACING_FORMAT, big, RAY_TRACING_USAGE)?,
        })
    }
}

/// Every render target the renderer owns.
pub struct RenderTargets {
    device: Arc<Device>,
    pub loading_screen: RenderTarget,
    pub full_size: RenderTarget,
    player: Option<PlayerTargets>,
    supersample_factor: u32,
}

impl RenderTargets {
    /// Creates the fixed targets and the first generation of player targets.
    pub fn new(
        device: Arc<Device>,
        loading_screen_extent: vk::Extent2D,
        native_extent: vk::Extent2D,
        present_width: u32,
        present_height: u32,
        supersample_factor: u32,
    ) -> RendererResult<Self> {
        let loading_screen = RenderTarget::new(
            device.clone(),
            "loading_screen",
            PRESENT_FORMAT,
            loading_screen_extent,
            LOADING_SCREEN_USAGE,
        )?;
        let full_size = RenderTarget::new(
            device.clone(),
            "full_size",
            PRESENT_FORMAT,
            native_extent,
            FULL_SIZE_USAGE,
        )?;
        let extents = player_target_extents(present_width, present_height, supersample_factor);
        let player = PlayerTargets::new(&device, extents)?;

        info!(
            "Render targets created: present {}x{}, internal {}x{}, full size {}x{}",
            extents.present.width,
            extents.present.height,
            extents.supersampled.width,
            extents.supersampled.height,
            native_extent.width,
            native_extent.height
        );

        Ok(Self {
            device,
            loading_screen,
            full_size,
            player: Some(player),
            supersample_factor,
        })
    }

    /// Waits for the GPU, destroys the current player targets and creates a
    /// new generation at `width` x `height`.
    ///
    /// Descriptor sets that reference the old views must be rewritten by the
    /// caller afterwards. If creation fails no player targets remain and
    /// every later frame fails with [`RendererError::RenderTargets`].
    pub fn recreate_player_targets(&mut self, width: u32, height: u32) -> RendererResult<()> {
        self.device.wait_idle()?;
        let extents = player_target_extents(width, height, self.supersample_factor);
        let device = &self.device;
        replace_generation(&mut self.player, || PlayerTargets::new(device, extents))?;
        debug!(
            "Player render targets recreated at {}x{}",
            extents.present.width, extents.present.height
        );
        Ok(())
    }

    pub fn player(&self) -> RendererResult<&PlayerTargets> {
        self.player.as_ref().ok_or_else(missing_player_targets)
    }

    pub fn player_mut(&mut self) -> RendererResult<&mut PlayerTargets> {
        self.player.as_mut().ok_or_else(missing_player_targets)
    }
}

fn missing_player_targets() -> RendererError {
    RendererError::RenderTargets("player targets were not recreated".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_graph::ImageUsage;

    #[test]
    fn test_player_extents_are_supersampled() {
        let extents = player_target_extents(768, 432, 2);
        assert_eq!(extents.present, vk::Extent2D { width: 768, height: 432 });
        assert_eq!(extents.supersampled, vk::Extent2D { width: 1536, height: 864 });
    }

    #[test]
    fn test_player_extents_never_zero() {
        let extents = player_target_extents(0, 0, 0);
        assert_eq!(extents.present, vk::Extent2D { width: 1, height: 1 });
        assert_eq!(extents.supersampled, vk::Extent2D { width: 1, height: 1 });
    }

    struct Generation {
        id: u32,
        log: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
    }

    impl Drop for Generation {
        fn drop(&mut self) {
            self.log.borrow_mut().push(format!("drop {}", self.id));
        }
    }

    #[test]
    fn test_old_generation_dropped_before_new_one_is_created() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut slot = Some(Generation { id: 1, log: log.clone() });

        let new = replace_generation(&mut slot, || {
            log.borrow_mut().push("create 2".to_string());
            Ok::<_, ()>(Generation { id: 2, log: log.clone() })
        })
        .unwrap();
        assert_eq!(new.id, 2);
        assert_eq!(*log.borrow(), vec!["drop 1", "create 2"]);
    }

    #[test]
    fn test_failed_generation_leaves_slot_empty() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut slot = Some(Generation { id: 1, log: log.clone() });

        let result = replace_generation(&mut slot, || Err::<Generation, _>("out of memory"));
        assert_eq!(result.err(), Some("out of memory"));
        assert!(slot.is_none());
        assert_eq!(*log.borrow(), vec!["drop 1"]);
    }

    #[test]
    fn test_usage_flags_cover_pass_accesses() {
        let cases = [
            (GBUFFER_USAGE, ImageUsage::ColorAttachment),
            (GBUFFER_USAGE, ImageUsage::SampledRayTracing),
            (GBUFFER_USAGE, ImageUsage::SampledFragment),
            (DEPTH_USAGE, ImageUsage::DepthAttachment),
            (DEPTH_USAGE, ImageUsage::SampledRayTracing),
            (RAY_TRACING_USAGE, ImageUsage::StorageRayTracing),
            (RAY_TRACING_USAGE, ImageUsage::SampledFragment),
            (LIGHTING_USAGE, ImageUsage::ColorAttachment),
            (LIGHTING_USAGE, ImageUsage::TransferSrc),
            (PRESENT_USAGE, ImageUsage::TransferDst),
            (PRESENT_USAGE, ImageUsage::ColorAttachment),
            (PRESENT_USAGE, ImageUsage::TransferSrc),
            (FULL_SIZE_USAGE, ImageUsage::TransferDst),
            (FULL_SIZE_USAGE, ImageUsage::TransferSrc),
            (LOADING_SCREEN_USAGE, ImageUsage::ColorAttachment),
            (LOADING_SCREEN_USAGE, ImageUsage::TransferSrc),
        ];
        for (flags, usage) in cases {
            assert!(flags.contains(usage.required_usage()), "{:?}", usage);
        }
    }
}
