//! Pipeline layouts and graphics pipelines for dynamic rendering.
//!
//! - [`PipelineLayout`] wraps `VkPipelineLayout` built from descriptor set layouts.
//! - [`Pipeline`] owns a graphics or ray-tracing `VkPipeline`.
//! - [`GraphicsPipelineBuilder`] configures the fixed-function state the
//!   renderer's raster pipelines vary: topology, culling, blending, depth and
//!   attachment formats.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::shader::Shader;
//! use lumen_rhi::pipeline::{GraphicsPipelineBuilder, PipelineLayout};
//! use lumen_rhi::vertex::VertexLayout;
//! use ash::vk;
//!
//! # fn example(device: Arc<Device>, vs: &Shader, fs: &Shader) -> Result<(), lumen_rhi::RhiError> {
//! let layout = PipelineLayout::new(device.clone(), &[])?;
//! let _pipeline = GraphicsPipelineBuilder::new()
//!     .shaders(vs, fs)
//!     .vertex_layout(VertexLayout::PositionTexCoord)
//!     .cull_mode(vk::CullModeFlags::NONE)
//!     .alpha_blend(true)
//!     .color_formats(&[vk::Format::R8G8B8A8_UNORM])
//!     .build(device, &layout)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;
use crate::vertex::VertexLayout;

/// Vulkan pipeline layout wrapper.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a layout over `set_layouts` in set-index order. No push constants.
    pub fn new(device: Arc<Device>, set_layouts: &[vk::DescriptorSetLayout]) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };
        debug!("Pipeline layout created with {} set(s)", set_layouts.len());
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Vulkan pipeline wrapper.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Takes ownership of an already created pipeline handle.
    pub fn from_raw(device: Arc<Device>, pipeline: vk::Pipeline, bind_point: vk::PipelineBindPoint) -> Self {
        Self {
            device,
            pipeline,
            bind_point,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("{:?} pipeline destroyed", self.bind_point);
    }
}

/// Depth test configuration. `None` on the builder disables depth entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthState {
    pub format: vk::Format,
    pub write: bool,
    pub compare_op: vk::CompareOp,
}

/// Builder for dynamic-rendering graphics pipelines.
///
/// Defaults: triangle list, back-face culling, counter-clockwise front face,
/// no blending, no depth, viewport and scissor dynamic.
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    vertex_layout: VertexLayout,
    topology: vk::PrimitiveTopology,
    cull_mode: vk::CullModeFlags,
    alpha_blend: bool,
    depth: Option<DepthState>,
    color_formats: Vec<vk::Format>,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertex_layout: VertexLayout::All,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            alpha_blend: false,
            depth: None,
            color_formats: Vec::new(),
        }
    }

    pub fn shaders(mut self, vertex: &'a Shader, fragment: &'a Shader) -> Self {
        self.vertex_shader = Some(vertex);
        self.fragment_shader = Some(fragment);
        self
    }

    pub fn vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = layout;
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Standard `src_alpha / one_minus_src_alpha` blending on every attachment.
    pub fn alpha_blend(mut self, enable: bool) -> Self {
        self.alpha_blend = enable;
        self
    }

    pub fn depth(mut self, depth: DepthState) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn color_formats(mut self, formats: &[vk::Format]) -> Self {
        self.color_formats = formats.to_vec();
        self
    }

    fn blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        if self.alpha_blend {
            state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
        } else {
            state
        }
    }

    /// Creates the pipeline.
    ///
    /// # Errors
    ///
    /// [`RhiError::PipelineError`] if shaders or colour formats are missing,
    /// or any driver error from pipeline creation.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let (Some(vertex_shader), Some(fragment_shader)) = (self.vertex_shader, self.fragment_shader)
        else {
            return Err(RhiError::PipelineError(
                "Vertex and fragment shaders are required".to_string(),
            ));
        };
        if self.color_formats.is_empty() {
            return Err(RhiError::PipelineError(
                "At least one color attachment format is required".to_string(),
            ));
        }

        let stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let bindings = [self.vertex_layout.binding_description()];
        let attributes = self.vertex_layout.attribute_descriptions();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly_state =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(self.topology);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = match self.depth {
            Some(depth) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(depth.write)
                .depth_compare_op(depth.compare_op)
                .max_depth_bounds(1.0),
            None => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_compare_op(vk::CompareOp::ALWAYS)
                .max_depth_bounds(1.0),
        };

        let blend_attachments = vec![self.blend_attachment(); self.color_formats.len()];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&self.color_formats);
        if let Some(depth) = self.depth {
            rendering_info = rendering_info.depth_attachment_format(depth.format);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::PipelineError("driver returned no pipeline".to_string()))?;

        debug!(
            "Graphics pipeline created ({:?}, {} color attachment(s), depth: {})",
            self.topology,
            self.color_formats.len(),
            self.depth.is_some()
        );

        Ok(Pipeline::from_raw(
            device,
            pipeline,
            vk::PipelineBindPoint::GRAPHICS,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = GraphicsPipelineBuilder::new();
        assert_eq!(builder.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(builder.cull_mode, vk::CullModeFlags::BACK);
        assert!(builder.depth.is_none());
        assert!(!builder.alpha_blend);
    }

    #[test]
    fn test_blend_attachment_toggle() {
        let opaque = GraphicsPipelineBuilder::new().blend_attachment();
        assert_eq!(opaque.blend_enable, vk::FALSE);

        let blended = GraphicsPipelineBuilder::new().alpha_blend(true).blend_attachment();
        assert_eq!(blended.blend_enable, vk::TRUE);
        assert_eq!(blended.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            blended.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }

    #[test]
    fn test_builder_records_gbuffer_state() {
        let builder = GraphicsPipelineBuilder::new()
            .depth(DepthState {
                format: vk::Format::D32_SFLOAT,
                write: true,
                compare_op: vk::CompareOp::LESS_OR_EQUAL,
            })
            .color_formats(&[vk::Format::R8G8B8A8_UNORM; 4]);
        assert_eq!(builder.color_formats.len(), 4);
        assert_eq!(
            builder.depth.map(|d| d.compare_op),
            Some(vk::CompareOp::LESS_OR_EQUAL)
        );
    }
}
