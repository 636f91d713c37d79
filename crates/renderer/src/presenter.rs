//! Swapchain acquisition, presentation and resize detection.
//!
//! Out-of-date and suboptimal surfaces never surface as errors: they set
//! the resize flag, and the context rebuilds everything size-dependent
//! after the frame's present call has returned.

use std::ops::Range;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use lumen_rhi::device::Device;
use lumen_rhi::instance::Instance;
use lumen_rhi::swapchain::Swapchain;

use crate::error::{RendererError, RendererResult};

/// What an acquire attempt produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready once the acquire semaphore signals.
    Image { index: u32, suboptimal: bool },
    /// The surface changed; no image was acquired and nothing was signalled.
    OutOfDate,
}

/// Maps a raw acquire result. Only out-of-date is recoverable.
pub fn acquire_outcome(result: Result<(u32, bool), vk::Result>) -> RendererResult<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(RendererError::from(e)),
    }
}

/// Maps a raw present result to "the swapchain must be recreated".
pub fn present_needs_resize(result: Result<bool, vk::Result>) -> RendererResult<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
        Err(e) => Err(RendererError::from(e)),
    }
}

/// How a frame is finished once the acquire result is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSubmission {
    /// Passes recorded after the acquire.
    pub remaining: Range<usize>,
    /// The submission waits on the acquire semaphore and signals
    /// render-finished. Without it only the slot fence is signalled.
    pub waits_on_acquire: bool,
    /// Image to present after the submission.
    pub present: Option<u32>,
    /// Passes the GPU executes, i.e. whose image states carry over.
    pub executed: usize,
}

/// Plans the rest of a frame whose first `split` passes are recorded.
/// Without an image the recorded prefix is still submitted so its fence
/// signals, and the swapchain passes are dropped.
pub fn plan_submission(acquired: Option<u32>, split: usize, pass_count: usize) -> FrameSubmission {
    match acquired {
        Some(index) => FrameSubmission {
            remaining: split..pass_count,
            waits_on_acquire: true,
            present: Some(index),
            executed: pass_count,
        },
        None => FrameSubmission {
            remaining: split..split,
            waits_on_acquire: false,
            present: None,
            executed: split,
        },
    }
}

/// One step of rebuilding the size-dependent state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeStep {
    Swapchain,
    PlayerTargets,
    RenderTargetDescriptors,
}

/// Resize steps in execution order. Descriptor rewrites come last so they
/// see the new target views.
pub const RESIZE_STEPS: [ResizeStep; 3] = [
    ResizeStep::Swapchain,
    ResizeStep::PlayerTargets,
    ResizeStep::RenderTargetDescriptors,
];

/// Steps to run after a frame's present call returned. A minimized window
/// keeps the request pending until it has a size again.
pub fn pending_resize(requested: bool, minimized: bool) -> &'static [ResizeStep] {
    if requested && !minimized {
        &RESIZE_STEPS
    } else {
        &[]
    }
}

/// Extent to recreate at: the size passed to the last resize call, or the
/// window size when the request came from the surface or had a zero side.
pub fn resize_extent(requested: Option<vk::Extent2D>, window: vk::Extent2D) -> vk::Extent2D {
    match requested {
        Some(extent) if extent.width > 0 && extent.height > 0 => extent,
        _ => window,
    }
}

pub struct Presenter {
    device: Arc<Device>,
    swapchain: Swapchain,
    resize_requested: bool,
    requested_extent: Option<vk::Extent2D>,
}

impl Presenter {
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RendererResult<Self> {
        let swapchain = Swapchain::new(instance, device.clone(), surface, width, height)?;
        Ok(Self {
            device,
            swapchain,
            resize_requested: false,
            requested_extent: None,
        })
    }

    /// Acquires the next image, signalling `semaphore` when it is ready.
    /// Returns `None` and flags a resize when the surface is out of date.
    pub fn acquire(&mut self, semaphore: vk::Semaphore) -> RendererResult<Option<u32>> {
        match acquire_outcome(self.swapchain.acquire_next_image(semaphore))? {
            AcquireOutcome::Image { index, suboptimal } => {
                if suboptimal {
                    debug!("Swapchain suboptimal during acquire");
                    self.resize_requested = true;
                }
                Ok(Some(index))
            }
            AcquireOutcome::OutOfDate => {
                warn!("Swapchain out of date during acquire");
                self.resize_requested = true;
                Ok(None)
            }
        }
    }

    /// Queues `image_index` once `wait_semaphore` signals.
    pub fn present(&mut self, image_index: u32, wait_semaphore: vk::Semaphore) -> RendererResult<()> {
        let result =
            self.swapchain
                .present(self.device.present_queue(), image_index, wait_semaphore);
        if present_needs_resize(result)? {
            warn!("Swapchain out of date or suboptimal during present");
            self.resize_requested = true;
        }
        Ok(())
    }

    /// Flags the swapchain for recreation at `width` x `height` after the
    /// next present.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.resize_requested = true;
        self.requested_extent = Some(vk::Extent2D { width, height });
    }

    #[inline]
    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    /// Extent the pending resize should use, see [`resize_extent`].
    #[inline]
    pub fn resize_target(&self, window: vk::Extent2D) -> vk::Extent2D {
        resize_extent(self.requested_extent, window)
    }

    /// Recreates the swapchain at `width` x `height` and clears the flag.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        self.swapchain.recreate(instance, surface, width, height)?;
        self.resize_requested = false;
        self.requested_extent = None;
        Ok(())
    }

    #[inline]
    pub fn image(&self, index: u32) -> vk::Image {
        self.swapchain.image(index as usize)
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_out_of_date_is_recoverable() {
        assert_eq!(
            acquire_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            acquire_outcome(Ok((2, true))).unwrap(),
            AcquireOutcome::Image {
                index: 2,
                suboptimal: true
            }
        );
    }

    #[test]
    fn test_acquire_device_lost_is_fatal() {
        assert!(acquire_outcome(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn test_present_outcomes() {
        assert!(!present_needs_resize(Ok(false)).unwrap());
        assert!(present_needs_resize(Ok(true)).unwrap());
        assert!(present_needs_resize(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());
        assert!(present_needs_resize(Err(vk::Result::SUBOPTIMAL_KHR)).unwrap());
        assert!(present_needs_resize(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn test_acquired_frame_runs_to_present() {
        let plan = plan_submission(Some(1), 8, 10);
        assert_eq!(plan.remaining, 8..10);
        assert!(plan.waits_on_acquire);
        assert_eq!(plan.present, Some(1));
        assert_eq!(plan.executed, 10);
    }

    #[test]
    fn test_out_of_date_frame_submits_prefix_only() {
        let plan = plan_submission(None, 8, 10);
        assert!(plan.remaining.is_empty());
        assert!(!plan.waits_on_acquire);
        assert_eq!(plan.present, None);
        assert_eq!(plan.executed, 8);
    }

    #[test]
    fn test_resize_rebinds_after_recreating() {
        assert_eq!(
            pending_resize(true, false),
            &[
                ResizeStep::Swapchain,
                ResizeStep::PlayerTargets,
                ResizeStep::RenderTargetDescriptors
            ]
        );
        assert!(pending_resize(false, false).is_empty());
        assert!(pending_resize(true, true).is_empty());
    }

    #[test]
    fn test_resize_extent_prefers_requested_size() {
        let window = vk::Extent2D { width: 800, height: 600 };
        let requested = vk::Extent2D { width: 1024, height: 768 };
        assert_eq!(resize_extent(Some(requested), window), requested);
        assert_eq!(resize_extent(None, window), window);
        assert_eq!(
            resize_extent(Some(vk::Extent2D { width: 0, height: 768 }), window),
            window
        );
    }
}
