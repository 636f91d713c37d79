//! Shaders, pipeline layouts and the pipelines built from them.
//!
//! Pipelines are immutable. A shader reload builds a complete new
//! [`Pipelines`] value and swaps it in; nothing is patched in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use lumen_rhi::device::Device;
use lumen_rhi::pipeline::{DepthState, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use lumen_rhi::raytracing::{RayTracingShaders, ShaderBindingTable, create_ray_tracing_pipeline};
use lumen_rhi::shader::{Shader, ShaderStage};
use lumen_rhi::vertex::VertexLayout;

use crate::descriptors::DescriptorSets;
use crate::error::RendererResult;
use crate::targets::{DEPTH_FORMAT, GBUFFER_FORMATS, LIGHTING_FORMAT, PRESENT_FORMAT};

/// Supplies compiled SPIR-V by shader name and stage.
pub trait ShaderSource {
    fn load(&self, name: &str, stage: ShaderStage) -> RendererResult<Vec<u8>>;
}

/// Reads `<root>/<name>.<stage extension>.spv`.
#[derive(Clone, Debug)]
pub struct SpirvDirectory {
    root: PathBuf,
}

impl SpirvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, name: &str, stage: ShaderStage) -> PathBuf {
        self.root
            .join(format!("{}.{}.spv", name, stage.file_extension()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ShaderSource for SpirvDirectory {
    fn load(&self, name: &str, stage: ShaderStage) -> RendererResult<Vec<u8>> {
        let path = self.path(name, stage);
        std::fs::read(&path).map_err(|e| {
            lumen_core::Error::Shader(format!("failed to read {}: {}", path.display(), e)).into()
        })
    }
}

/// Every shader the renderer loads, in [`ShaderSet`] field order.
pub const SHADER_FILES: [(&str, ShaderStage); 13] = [
    ("ui", ShaderStage::Vertex),
    ("ui", ShaderStage::Fragment),
    ("gbuffer", ShaderStage::Vertex),
    ("gbuffer_skinned", ShaderStage::Vertex),
    ("gbuffer", ShaderStage::Fragment),
    ("lighting", ShaderStage::Vertex),
    ("lighting", ShaderStage::Fragment),
    ("debug", ShaderStage::Vertex),
    ("debug", ShaderStage::Fragment),
    ("raygen", ShaderStage::RayGen),
    ("miss", ShaderStage::Miss),
    ("shadow", ShaderStage::Miss),
    ("closest_hit", ShaderStage::ClosestHit),
];

/// Loaded shader modules.
pub struct ShaderSet {
    ui_vert: Shader,
    ui_frag: Shader,
    gbuffer_vert: Shader,
    gbuffer_skinned_vert: Shader,
    gbuffer_frag: Shader,
    lighting_vert: Shader,
    lighting_frag: Shader,
    debug_vert: Shader,
    debug_frag: Shader,
    raygen: Shader,
    miss: Shader,
    shadow_miss: Shader,
    closest_hit: Shader,
}

impl ShaderSet {
    /// Reads every file first, then creates the modules, so a missing file
    /// creates nothing.
    pub fn load(device: &Arc<Device>, source: &dyn ShaderSource) -> RendererResult<Self> {
        let code = SHADER_FILES
            .iter()
            .map(|&(name, stage)| source.load(name, stage))
            .collect::<RendererResult<Vec<_>>>()?;

        let mut modules = SHADER_FILES
            .iter()
            .zip(&code)
            .map(|(&(_, stage), bytes)| Ok(Shader::from_spirv_bytes(device.clone(), bytes, stage)?))
            .collect::<RendererResult<Vec<_>>>()?
            .into_iter();
        let mut next = || {
            modules.next().ok_or_else(|| {
                lumen_core::Error::Internal("shader table shorter than expected".into())
            })
        };

        Ok(Self {
            ui_vert: next()?,
            ui_frag: next()?,
            gbuffer_vert: next()?,
            gbuffer_skinned_vert: next()?,
            gbuffer_frag: next()?,
            lighting_vert: next()?,
            lighting_frag: next()?,
            debug_vert: next()?,
            debug_frag: next()?,
            raygen: next()?,
            miss: next()?,
            shadow_miss: next()?,
            closest_hit: next()?,
        })
    }
}

/// Pipeline layouts. Fixed for the renderer's lifetime.
pub struct PipelineLayouts {
    /// dynamic, allTextures, renderTargets
    pub graphics: PipelineLayout,
    /// uiHiRes, allTextures
    pub ui_hi_res: PipelineLayout,
    /// dynamic, allTextures, renderTargets, raytracing
    pub ray_tracing: PipelineLayout,
}

impl PipelineLayouts {
    pub fn new(device: &Arc<Device>, sets: &DescriptorSets) -> RendererResult<Self> {
        Ok(Self {
            graphics: PipelineLayout::new(
                device.clone(),
                &[
                    sets.dynamic_layout.handle(),
                    sets.all_textures_layout.handle(),
                    sets.render_targets_layout.handle(),
                ],
            )?,
            ui_hi_res: PipelineLayout::new(
                device.clone(),
                &[
                    sets.ui_hi_res_layout.handle(),
                    sets.all_textures_layout.handle(),
                ],
            )?,
            ray_tracing: PipelineLayout::new(
                device.clone(),
                &[
                    sets.dynamic_layout.handle(),
                    sets.all_textures_layout.handle(),
                    sets.render_targets_layout.handle(),
                    sets.ray_tracing_layout.handle(),
                ],
            )?,
        })
    }
}

/// Every pipeline of one shader generation.
pub struct Pipelines {
    pub ui: Pipeline,
    pub ui_hi_res: Pipeline,
    pub g_buffer: Pipeline,
    pub g_buffer_skinned: Pipeline,
    pub lighting: Pipeline,
    pub debug_lines: Pipeline,
    pub debug_points: Pipeline,
    pub ray_tracing: Pipeline,
    pub shader_binding_table: ShaderBindingTable,
}

impl Pipelines {
    pub fn new(
        device: &Arc<Device>,
        layouts: &PipelineLayouts,
        shaders: &ShaderSet,
    ) -> RendererResult<Self> {
        let ui = Self::ui_builder(shaders)
            .color_formats(&[PRESENT_FORMAT])
            .build(device.clone(), &layouts.graphics)?;
        let ui_hi_res = Self::ui_builder(shaders)
            .color_formats(&[LIGHTING_FORMAT])
            .build(device.clone(), &layouts.ui_hi_res)?;

        let gbuffer_depth = DepthState {
            format: DEPTH_FORMAT,
            write: true,
            compare_op: vk::CompareOp::LESS_OR_EQUAL,
        };
        let g_buffer = GraphicsPipelineBuilder::new()
            .shaders(&shaders.gbuffer_vert, &shaders.gbuffer_frag)
            .vertex_layout(VertexLayout::All)
            .color_formats(&GBUFFER_FORMATS)
            .depth(gbuffer_depth)
            .build(device.clone(), &layouts.graphics)?;
        let g_buffer_skinned = GraphicsPipelineBuilder::new()
            .shaders(&shaders.gbuffer_skinned_vert, &shaders.gbuffer_frag)
            .vertex_layout(VertexLayout::AllWeighted)
            .color_formats(&GBUFFER_FORMATS)
            .depth(gbuffer_depth)
            .build(device.clone(), &layouts.graphics)?;

        let lighting = GraphicsPipelineBuilder::new()
            .shaders(&shaders.lighting_vert, &shaders.lighting_frag)
            .vertex_layout(VertexLayout::PositionTexCoord)
            .cull_mode(vk::CullModeFlags::NONE)
            .color_formats(&[LIGHTING_FORMAT])
            .build(device.clone(), &layouts.graphics)?;

        let debug = |topology| {
            GraphicsPipelineBuilder::new()
                .shaders(&shaders.debug_vert, &shaders.debug_frag)
                .vertex_layout(VertexLayout::PositionNormal)
                .topology(topology)
                .cull_mode(vk::CullModeFlags::NONE)
                .color_formats(&[PRESENT_FORMAT])
                .build(device.clone(), &layouts.graphics)
        };
        let debug_lines = debug(vk::PrimitiveTopology::LINE_LIST)?;
        let debug_points = debug(vk::PrimitiveTopology::POINT_LIST)?;

        let ray_tracing = create_ray_tracing_pipeline(
            device.clone(),
            &layouts.ray_tracing,
            &RayTracingShaders {
                raygen: &shaders.raygen,
                miss: &shaders.miss,
                shadow_miss: &shaders.shadow_miss,
                closest_hit: &shaders.closest_hit,
            },
        )?;
        let shader_binding_table = ShaderBindingTable::new(device.clone(), &ray_tracing)?;

        debug!("Built 7 graphics pipelines and the ray-tracing pipeline");
        Ok(Self {
            ui,
            ui_hi_res,
            g_buffer,
            g_buffer_skinned,
            lighting,
            debug_lines,
            debug_points,
            ray_tracing,
            shader_binding_table,
        })
    }

    fn ui_builder(shaders: &ShaderSet) -> GraphicsPipelineBuilder<'_> {
        GraphicsPipelineBuilder::new()
            .shaders(&shaders.ui_vert, &shaders.ui_frag)
            .vertex_layout(VertexLayout::PositionTexCoord)
            .cull_mode(vk::CullModeFlags::NONE)
            .alpha_blend(true)
    }
}

/// Layouts, current pipelines and where their shaders come from.
pub struct PipelineLibrary {
    device: Arc<Device>,
    source: Box<dyn ShaderSource>,
    pub layouts: PipelineLayouts,
    pipelines: Pipelines,
}

impl PipelineLibrary {
    pub fn new(
        device: Arc<Device>,
        sets: &DescriptorSets,
        source: Box<dyn ShaderSource>,
    ) -> RendererResult<Self> {
        let layouts = PipelineLayouts::new(&device, sets)?;
        let shaders = ShaderSet::load(&device, source.as_ref())?;
        let pipelines = Pipelines::new(&device, &layouts, &shaders)?;
        info!("Pipelines created");
        Ok(Self {
            device,
            source,
            layouts,
            pipelines,
        })
    }

    #[inline]
    pub fn pipelines(&self) -> &Pipelines {
        &self.pipelines
    }

    /// Reloads every shader and rebuilds every pipeline.
    ///
    /// Returns `Ok(false)` and keeps the current pipelines if a shader fails
    /// to load or a pipeline fails to build.
    pub fn hotload(&mut self) -> RendererResult<bool> {
        let shaders = match ShaderSet::load(&self.device, self.source.as_ref()) {
            Ok(shaders) => shaders,
            Err(e) => {
                warn!("Shader hotload failed, keeping current pipelines: {}", e);
                return Ok(false);
            }
        };

        self.device.wait_idle()?;
        match Pipelines::new(&self.device, &self.layouts, &shaders) {
            Ok(pipelines) => {
                self.pipelines = pipelines;
                info!("Shaders hotloaded");
                Ok(true)
            }
            Err(e) => {
                warn!("Pipeline rebuild failed, keeping current pipelines: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_spirv_directory_paths() {
        let dir = SpirvDirectory::new("shaders");
        assert_eq!(
            dir.path("gbuffer", ShaderStage::Vertex),
            PathBuf::from("shaders").join("gbuffer.vert.spv")
        );
        assert_eq!(
            dir.path("closest_hit", ShaderStage::ClosestHit),
            PathBuf::from("shaders").join("closest_hit.rchit.spv")
        );
    }

    #[test]
    fn test_missing_shader_is_a_shader_error() {
        let dir = SpirvDirectory::new("definitely/not/a/real/dir");
        let err = dir.load("ui", ShaderStage::Vertex).unwrap_err();
        assert!(matches!(
            err,
            crate::RendererError::Core(lumen_core::Error::Shader(_))
        ));
    }

    #[test]
    fn test_shader_files_are_unique() {
        let unique: HashSet<_> = SHADER_FILES.iter().collect();
        assert_eq!(unique.len(), SHADER_FILES.len());
    }

    #[test]
    fn test_shader_table_covers_ray_tracing_stages() {
        let stages: Vec<ShaderStage> = SHADER_FILES.iter().map(|(_, s)| *s).collect();
        assert!(stages.contains(&ShaderStage::RayGen));
        assert_eq!(stages.iter().filter(|s| **s == ShaderStage::Miss).count(), 2);
        assert!(stages.contains(&ShaderStage::ClosestHit));
    }
}
