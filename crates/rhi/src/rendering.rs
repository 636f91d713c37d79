//! Dynamic rendering attachment configuration (Vulkan 1.3).
//!
//! Passes describe their attachments with [`Attachment`] and collect them in
//! a [`RenderingConfig`]; [`RenderingInfoBundle`] keeps the attachment array
//! alive for as long as the `VkRenderingInfo` that points into it.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use lumen_rhi::rendering::{Attachment, RenderingConfig};
//! use lumen_rhi::command::CommandBuffer;
//!
//! # fn example(view: vk::ImageView, cmd: &CommandBuffer) {
//! let bundle = RenderingConfig::new(vk::Extent2D { width: 800, height: 600 })
//!     .with_color(Attachment::color(view, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).load())
//!     .build();
//! cmd.begin_rendering(&bundle.info());
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

/// One color or depth attachment.
///
/// Defaults to `CLEAR` / `STORE` with a zero clear color (or depth 1.0).
#[derive(Clone, Copy)]
pub struct Attachment {
    image_view: vk::ImageView,
    layout: vk::ImageLayout,
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
    clear_value: vk::ClearValue,
}

impl Attachment {
    pub fn color(image_view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self {
            image_view,
            layout,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 0.0],
                },
            },
        }
    }

    pub fn depth(image_view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self {
            image_view,
            layout,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        }
    }

    pub fn with_load_op(mut self, load_op: vk::AttachmentLoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    /// Keeps the existing contents.
    pub fn load(self) -> Self {
        self.with_load_op(vk::AttachmentLoadOp::LOAD)
    }

    #[inline]
    pub fn load_op(&self) -> vk::AttachmentLoadOp {
        self.load_op
    }

    #[inline]
    pub fn store_op(&self) -> vk::AttachmentStoreOp {
        self.store_op
    }

    fn to_vk(self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(self.layout)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(self.clear_value)
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("image_view", &self.image_view)
            .field("layout", &self.layout)
            .field("load_op", &self.load_op)
            .field("store_op", &self.store_op)
            .finish()
    }
}

/// Attachments and render area for one `vkCmdBeginRendering`.
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    extent: vk::Extent2D,
    color_attachments: Vec<Attachment>,
    depth_attachment: Option<Attachment>,
}

impl RenderingConfig {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            color_attachments: Vec::new(),
            depth_attachment: None,
        }
    }

    pub fn with_color(mut self, attachment: Attachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth(mut self, attachment: Attachment) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn color_attachments(&self) -> &[Attachment] {
        &self.color_attachments
    }

    pub fn build(&self) -> RenderingInfoBundle {
        RenderingInfoBundle {
            color_attachments: self.color_attachments.iter().map(|a| a.to_vk()).collect(),
            depth_attachment: self.depth_attachment.map(Attachment::to_vk),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
        }
    }
}

/// Owns the attachment infos a `VkRenderingInfo` borrows.
pub struct RenderingInfoBundle {
    color_attachments: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth_attachment: Option<vk::RenderingAttachmentInfo<'static>>,
    render_area: vk::Rect2D,
}

impl RenderingInfoBundle {
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        let info = vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color_attachments);
        match &self.depth_attachment {
            Some(depth) => info.depth_attachment(depth),
            None => info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_attachment_defaults_to_clear_store() {
        let a = Attachment::color(vk::ImageView::null(), vk::ImageLayout::GENERAL);
        assert_eq!(a.load_op(), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a.store_op(), vk::AttachmentStoreOp::STORE);
        assert_eq!(a.load().load_op(), vk::AttachmentLoadOp::LOAD);
    }

    #[test]
    fn test_depth_attachment_clears_to_one() {
        let a = Attachment::depth(
            vk::ImageView::null(),
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );
        let info = a.to_vk();
        assert_eq!(unsafe { info.clear_value.depth_stencil.depth }, 1.0);
    }

    #[test]
    fn test_bundle_info_counts() {
        let config = RenderingConfig::new(vk::Extent2D {
            width: 64,
            height: 32,
        })
        .with_color(Attachment::color(
            vk::ImageView::null(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ))
        .with_color(Attachment::color(
            vk::ImageView::null(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ))
        .with_depth(Attachment::depth(
            vk::ImageView::null(),
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        ));
        let bundle = config.build();
        let info = bundle.info();
        assert_eq!(info.color_attachment_count, 2);
        assert!(!info.p_depth_attachment.is_null());
        assert_eq!(info.render_area.extent.width, 64);
    }
}
