//! The two frame shapes and the command recording behind each pass.
//!
//! [`game_graph`] and [`loading_screen_graph`] only declare passes and the
//! images they touch; ordering and every barrier come out of
//! [`FrameGraph::compile`]. [`record_pass`] then emits the body of one
//! compiled pass.
//!
//! Game frame:
//!
//! ```text
//! geometry -> ray_tracing -> lighting -> ui_hi_res (onto lighting)
//!   -> downscale (lighting -> present, linear) -> debug -> ui (onto present)
//!   -> blit_full_size (present -> full size, nearest)
//!   -> blit_swapchain (full size -> swapchain, nearest) -> present
//! ```

use ash::vk;
use tracing::warn;

use lumen_rhi::command::CommandBuffer;
use lumen_rhi::image::blit_region;
use lumen_rhi::rendering::{Attachment, RenderingConfig};
use lumen_rhi::swapchain::SWAPCHAIN_IMAGE_USAGE;
use lumen_scene::{BlitDstCoords, RenderItem3D};

use crate::assets::{GpuAssets, MeshRange};
use crate::descriptors::{DescriptorSets, SlotDescriptorSets};
use crate::error::{RendererError, RendererResult};
use crate::frame_graph::{
    CompiledGraph, CompiledPass, FrameGraph, ImageState, ImageUsage, ResourceId,
};
use crate::frame_ring::{FrameSlot, StorageKind};
use crate::pipelines::{PipelineLayouts, Pipelines};
use crate::targets::{RenderTarget, RenderTargets};

/// Image a UI pass composites onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiTarget {
    /// Present-resolution target, drawn with the `ui` pipeline.
    Present,
    /// Supersampled lighting target, drawn with the `uiHiRes` pipeline.
    Lighting,
    LoadingScreen,
}

/// What a pass records.
#[derive(Clone, Copy, Debug)]
pub enum PassKind {
    Geometry,
    RayTracing,
    Lighting,
    Ui { target: UiTarget, clear: bool },
    Blit {
        src: ResourceId,
        dst: ResourceId,
        region: vk::ImageBlit,
        filter: vk::Filter,
    },
    Debug,
    /// Nothing to record; the barrier into PRESENT_SRC is the whole pass.
    PresentTransition,
}

/// Load op of a UI pass: `clear` discards what the target held.
#[inline]
pub fn ui_load_op(clear: bool) -> vk::AttachmentLoadOp {
    if clear {
        vk::AttachmentLoadOp::CLEAR
    } else {
        vk::AttachmentLoadOp::LOAD
    }
}

/// A render target as the graph sees it.
#[derive(Clone, Copy, Debug)]
pub struct TargetInfo {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub usage: vk::ImageUsageFlags,
    pub state: ImageState,
    pub extent: vk::Extent2D,
}

impl TargetInfo {
    pub fn of(target: &RenderTarget) -> Self {
        Self {
            image: target.handle(),
            aspect: target.image().aspect(),
            usage: target.image().usage(),
            state: target.state(),
            extent: target.extent(),
        }
    }

    fn import(&self, graph: &mut FrameGraph<PassKind>, name: &str) -> ResourceId {
        graph.import_image(name, self.image, self.aspect, self.usage, self.state)
    }
}

/// Targets a game frame touches.
#[derive(Clone, Copy, Debug)]
pub struct GameTargets {
    pub base_color: TargetInfo,
    pub normal: TargetInfo,
    pub rma: TargetInfo,
    pub position: TargetInfo,
    pub depth: TargetInfo,
    pub ray_tracing: TargetInfo,
    pub lighting: TargetInfo,
    pub present: TargetInfo,
    pub full_size: TargetInfo,
}

impl GameTargets {
    pub fn from_render_targets(targets: &RenderTargets) -> RendererResult<Self> {
        let player = targets.player()?;
        Ok(Self {
            base_color: TargetInfo::of(&player.base_color),
            normal: TargetInfo::of(&player.normal),
            rma: TargetInfo::of(&player.rma),
            position: TargetInfo::of(&player.position),
            depth: TargetInfo::of(&player.depth),
            ray_tracing: TargetInfo::of(&player.ray_tracing),
            lighting: TargetInfo::of(&player.lighting),
            present: TargetInfo::of(&player.present),
            full_size: TargetInfo::of(&targets.full_size),
        })
    }
}

/// Graph handles of a game frame's images.
#[derive(Clone, Copy, Debug)]
pub struct GameResources {
    pub base_color: ResourceId,
    pub normal: ResourceId,
    pub rma: ResourceId,
    pub position: ResourceId,
    pub depth: ResourceId,
    pub ray_tracing: ResourceId,
    pub lighting: ResourceId,
    pub present: ResourceId,
    pub full_size: ResourceId,
    pub swapchain: ResourceId,
}

impl GameResources {
    /// Copies the states in `states` back onto the targets they belong to.
    pub fn apply_states(
        &self,
        targets: &mut RenderTargets,
        states: &[ImageState],
    ) -> RendererResult<()> {
        let state = |id: ResourceId| states.get(id.index()).copied();
        if let Some(full_size) = state(self.full_size) {
            targets.full_size.set_state(full_size);
        }
        let player = targets.player_mut()?;
        let pairs: [(&mut RenderTarget, ResourceId); 8] = [
            (&mut player.base_color, self.base_color),
            (&mut player.normal, self.normal),
            (&mut player.rma, self.rma),
            (&mut player.position, self.position),
            (&mut player.depth, self.depth),
            (&mut player.ray_tracing, self.ray_tracing),
            (&mut player.lighting, self.lighting),
            (&mut player.present, self.present),
        ];
        for (target, id) in pairs {
            if let Some(state) = state(id) {
                target.set_state(state);
            }
        }
        Ok(())
    }
}

fn swapchain_resource(graph: &mut FrameGraph<PassKind>) -> ResourceId {
    graph.import_external(
        "swapchain",
        vk::ImageAspectFlags::COLOR,
        SWAPCHAIN_IMAGE_USAGE,
        ImageState::ACQUIRED,
    )
}

fn full_rect(extent: vk::Extent2D) -> [i32; 2] {
    [extent.width as i32, extent.height as i32]
}

/// Declares a game frame. `blit_dst` places the present target inside the
/// full-size image; the full-size image then covers `window` on the swapchain.
pub fn game_graph(
    targets: &GameTargets,
    window: vk::Extent2D,
    blit_dst: BlitDstCoords,
) -> (FrameGraph<PassKind>, GameResources) {
    use ImageUsage::*;

    let mut graph = FrameGraph::new();
    let res = GameResources {
        base_color: targets.base_color.import(&mut graph, "gbuffer_base_color"),
        normal: targets.normal.import(&mut graph, "gbuffer_normal"),
        rma: targets.rma.import(&mut graph, "gbuffer_rma"),
        position: targets.position.import(&mut graph, "gbuffer_position"),
        depth: targets.depth.import(&mut graph, "gbuffer_depth"),
        ray_tracing: targets.ray_tracing.import(&mut graph, "ray_tracing"),
        lighting: targets.lighting.import(&mut graph, "lighting"),
        present: targets.present.import(&mut graph, "present"),
        full_size: targets.full_size.import(&mut graph, "full_size"),
        swapchain: swapchain_resource(&mut graph),
    };

    graph.add_pass(
        "geometry",
        PassKind::Geometry,
        &[
            (res.base_color, ColorAttachment),
            (res.normal, ColorAttachment),
            (res.rma, ColorAttachment),
            (res.position, ColorAttachment),
            (res.depth, DepthAttachment),
        ],
    );
    graph.add_pass(
        "ray_tracing",
        PassKind::RayTracing,
        &[
            (res.base_color, SampledRayTracing),
            (res.normal, SampledRayTracing),
            (res.rma, SampledRayTracing),
            (res.position, SampledRayTracing),
            (res.depth, SampledRayTracing),
            (res.ray_tracing, StorageRayTracing),
        ],
    );
    graph.add_pass(
        "lighting",
        PassKind::Lighting,
        &[
            (res.base_color, SampledFragment),
            (res.normal, SampledFragment),
            (res.rma, SampledFragment),
            (res.position, SampledFragment),
            (res.depth, SampledFragment),
            (res.ray_tracing, SampledFragment),
            (res.lighting, ColorAttachment),
        ],
    );
    graph.add_pass(
        "ui_hi_res",
        PassKind::Ui {
            target: UiTarget::Lighting,
            clear: false,
        },
        &[(res.lighting, ColorAttachment)],
    );
    graph.add_pass(
        "downscale",
        PassKind::Blit {
            src: res.lighting,
            dst: res.present,
            region: blit_region(targets.lighting.extent, [0, 0], full_rect(targets.present.extent)),
            filter: vk::Filter::LINEAR,
        },
        &[(res.lighting, TransferSrc), (res.present, TransferDst)],
    );
    graph.add_pass("debug", PassKind::Debug, &[(res.present, ColorAttachment)]);
    graph.add_pass(
        "ui",
        PassKind::Ui {
            target: UiTarget::Present,
            clear: false,
        },
        &[(res.present, ColorAttachment)],
    );
    graph.add_pass(
        "blit_full_size",
        PassKind::Blit {
            src: res.present,
            dst: res.full_size,
            region: blit_region(targets.present.extent, blit_dst.min(), blit_dst.max()),
            filter: vk::Filter::NEAREST,
        },
        &[(res.present, TransferSrc), (res.full_size, TransferDst)],
    );
    graph.add_pass(
        "blit_swapchain",
        PassKind::Blit {
            src: res.full_size,
            dst: res.swapchain,
            region: blit_region(targets.full_size.extent, [0, 0], full_rect(window)),
            filter: vk::Filter::NEAREST,
        },
        &[(res.full_size, TransferSrc), (res.swapchain, TransferDst)],
    );
    graph.add_pass(
        "present",
        PassKind::PresentTransition,
        &[(res.swapchain, Present)],
    );

    (graph, res)
}

/// Graph handles of a loading-screen frame's images.
#[derive(Clone, Copy, Debug)]
pub struct LoadingResources {
    pub loading_screen: ResourceId,
    pub swapchain: ResourceId,
}

/// Declares a loading-screen frame: clear and draw the UI, blit straight to
/// the swapchain, present.
pub fn loading_screen_graph(
    loading_screen: &TargetInfo,
    window: vk::Extent2D,
) -> (FrameGraph<PassKind>, LoadingResources) {
    let mut graph = FrameGraph::new();
    let res = LoadingResources {
        loading_screen: loading_screen.import(&mut graph, "loading_screen"),
        swapchain: swapchain_resource(&mut graph),
    };

    graph.add_pass(
        "ui",
        PassKind::Ui {
            target: UiTarget::LoadingScreen,
            clear: true,
        },
        &[(res.loading_screen, ImageUsage::ColorAttachment)],
    );
    graph.add_pass(
        "blit_swapchain",
        PassKind::Blit {
            src: res.loading_screen,
            dst: res.swapchain,
            region: blit_region(loading_screen.extent, [0, 0], full_rect(window)),
            filter: vk::Filter::NEAREST,
        },
        &[
            (res.loading_screen, ImageUsage::TransferSrc),
            (res.swapchain, ImageUsage::TransferDst),
        ],
    );
    graph.add_pass(
        "present",
        PassKind::PresentTransition,
        &[(res.swapchain, ImageUsage::Present)],
    );

    (graph, res)
}

/// Everything a pass body reads while recording.
pub struct PassContext<'a> {
    pub cmd: &'a CommandBuffer,
    pub pipelines: &'a Pipelines,
    pub layouts: &'a PipelineLayouts,
    pub descriptor_sets: &'a DescriptorSets,
    pub slot_sets: SlotDescriptorSets,
    pub slot: &'a FrameSlot,
    pub assets: &'a GpuAssets,
    pub targets: &'a RenderTargets,
    /// Animated items of the frame; one skinned draw each.
    pub animated_items: &'a [RenderItem3D],
}

impl PassContext<'_> {
    fn graphics_sets(&self) -> [vk::DescriptorSet; 3] {
        [
            self.slot_sets.dynamic,
            self.descriptor_sets.all_textures,
            self.descriptor_sets.render_targets,
        ]
    }

    fn draw_quad(&self, instance_count: u32) {
        let quad = self.assets.quad();
        self.cmd.bind_vertex_buffer(self.assets.vertex_buffer.handle());
        self.cmd.bind_index_buffer(self.assets.index_buffer.handle());
        self.cmd.draw_indexed(
            quad.index_count,
            instance_count,
            quad.base_index,
            quad.base_vertex as i32,
            0,
        );
    }
}

/// Records the body of `pass`. Barriers were already emitted by the graph.
pub fn record_pass(
    ctx: &PassContext<'_>,
    graph: &CompiledGraph<PassKind>,
    pass: &CompiledPass<PassKind>,
) -> RendererResult<()> {
    match pass.payload {
        PassKind::Geometry => record_geometry(ctx)?,
        PassKind::RayTracing => record_ray_tracing(ctx)?,
        PassKind::Lighting => record_lighting(ctx)?,
        PassKind::Ui { target, clear } => record_ui(ctx, target, clear)?,
        PassKind::Blit {
            src,
            dst,
            region,
            filter,
        } => {
            let image = |id: ResourceId| {
                graph.resource(id).and_then(|r| r.image).ok_or_else(|| {
                    RendererError::FrameGraph(format!("pass '{}' blits an unbound image", pass.name))
                })
            };
            ctx.cmd.blit_image(image(src)?, image(dst)?, &region, filter);
        }
        PassKind::Debug => record_debug(ctx)?,
        PassKind::PresentTransition => {}
    }
    Ok(())
}

fn record_geometry(ctx: &PassContext<'_>) -> RendererResult<()> {
    let player = ctx.targets.player()?;
    let color = |target: &RenderTarget| {
        Attachment::color(target.view(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
    };
    let rendering = RenderingConfig::new(player.base_color.extent())
        .with_color(color(&player.base_color))
        .with_color(color(&player.normal))
        .with_color(color(&player.rma))
        .with_color(color(&player.position))
        .with_depth(Attachment::depth(
            player.depth.view(),
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        ))
        .build();

    let cmd = ctx.cmd;
    cmd.begin_rendering(&rendering.info());
    cmd.set_viewport_and_scissor(player.base_color.extent());

    let static_draws = ctx.slot.indirect_count();
    if static_draws > 0 {
        let pipeline = &ctx.pipelines.g_buffer;
        cmd.bind_pipeline(pipeline.bind_point(), pipeline.handle());
        cmd.bind_descriptor_sets(
            pipeline.bind_point(),
            ctx.layouts.graphics.handle(),
            0,
            &ctx.graphics_sets(),
        );
        cmd.bind_vertex_buffer(ctx.assets.vertex_buffer.handle());
        cmd.bind_index_buffer(ctx.assets.index_buffer.handle());
        cmd.draw_indexed_indirect(ctx.slot.indirect_buffer(), static_draws);
    }

    let animated = ctx.slot.count(StorageKind::AnimatedRenderItems3D) as usize;
    if animated > 0 {
        let pipeline = &ctx.pipelines.g_buffer_skinned;
        cmd.bind_pipeline(pipeline.bind_point(), pipeline.handle());
        cmd.bind_descriptor_sets(
            pipeline.bind_point(),
            ctx.layouts.graphics.handle(),
            0,
            &ctx.graphics_sets(),
        );
        cmd.bind_vertex_buffer(ctx.assets.weighted_vertex_buffer.handle());
        cmd.bind_index_buffer(ctx.assets.weighted_index_buffer.handle());
        for (i, item) in ctx.animated_items.iter().take(animated).enumerate() {
            let Some(MeshRange {
                base_vertex,
                base_index,
                index_count,
                ..
            }) = ctx.assets.skinned_mesh(item.mesh_index)
            else {
                warn!("Skipping animated item {}: no skinned mesh {}", i, item.mesh_index);
                continue;
            };
            cmd.draw_indexed(index_count, 1, base_index, base_vertex as i32, i as u32);
        }
    }

    cmd.end_rendering();
    Ok(())
}

fn record_ray_tracing(ctx: &PassContext<'_>) -> RendererResult<()> {
    let pipeline = &ctx.pipelines.ray_tracing;
    let extent = ctx.targets.player()?.ray_tracing.extent();
    let [dynamic, all_textures, render_targets] = ctx.graphics_sets();

    ctx.cmd.bind_pipeline(pipeline.bind_point(), pipeline.handle());
    ctx.cmd.bind_descriptor_sets(
        pipeline.bind_point(),
        ctx.layouts.ray_tracing.handle(),
        0,
        &[
            dynamic,
            all_textures,
            render_targets,
            ctx.descriptor_sets.ray_tracing,
        ],
    );
    let regions = ctx.pipelines.shader_binding_table.regions();
    ctx.cmd.trace_rays(
        &regions.raygen,
        &regions.miss,
        &regions.hit,
        &regions.callable,
        extent.width,
        extent.height,
    );
    Ok(())
}

fn record_lighting(ctx: &PassContext<'_>) -> RendererResult<()> {
    let lighting = &ctx.targets.player()?.lighting;
    let rendering = RenderingConfig::new(lighting.extent())
        .with_color(Attachment::color(
            lighting.view(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ))
        .build();
    let pipeline = &ctx.pipelines.lighting;

    ctx.cmd.begin_rendering(&rendering.info());
    ctx.cmd.set_viewport_and_scissor(lighting.extent());
    ctx.cmd.bind_pipeline(pipeline.bind_point(), pipeline.handle());
    ctx.cmd.bind_descriptor_sets(
        pipeline.bind_point(),
        ctx.layouts.graphics.handle(),
        0,
        &ctx.graphics_sets(),
    );
    ctx.draw_quad(1);
    ctx.cmd.end_rendering();
    Ok(())
}

fn record_ui(ctx: &PassContext<'_>, target: UiTarget, clear: bool) -> RendererResult<()> {
    let (image, pipeline, layout, instances) = match target {
        UiTarget::Present => (
            &ctx.targets.player()?.present,
            &ctx.pipelines.ui,
            ctx.layouts.graphics.handle(),
            ctx.slot.count(StorageKind::RenderItems2D),
        ),
        UiTarget::LoadingScreen => (
            &ctx.targets.loading_screen,
            &ctx.pipelines.ui,
            ctx.layouts.graphics.handle(),
            ctx.slot.count(StorageKind::RenderItems2D),
        ),
        UiTarget::Lighting => (
            &ctx.targets.player()?.lighting,
            &ctx.pipelines.ui_hi_res,
            ctx.layouts.ui_hi_res.handle(),
            ctx.slot.count(StorageKind::RenderItems2DHiRes),
        ),
    };

    let rendering = RenderingConfig::new(image.extent())
        .with_color(
            Attachment::color(image.view(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .with_load_op(ui_load_op(clear)),
        )
        .build();
    ctx.cmd.begin_rendering(&rendering.info());
    if instances > 0 {
        ctx.cmd.set_viewport_and_scissor(image.extent());
        ctx.cmd.bind_pipeline(pipeline.bind_point(), pipeline.handle());
        if target == UiTarget::Lighting {
            ctx.cmd.bind_descriptor_sets(
                pipeline.bind_point(),
                layout,
                0,
                &[ctx.slot_sets.ui_hi_res, ctx.descriptor_sets.all_textures],
            );
        } else {
            ctx.cmd
                .bind_descriptor_sets(pipeline.bind_point(), layout, 0, &ctx.graphics_sets());
        }
        ctx.draw_quad(instances);
    }
    ctx.cmd.end_rendering();
    Ok(())
}

fn record_debug(ctx: &PassContext<'_>) -> RendererResult<()> {
    let lines = ctx.slot.debug_lines();
    let points = ctx.slot.debug_points();
    if lines.is_none() && points.is_none() {
        return Ok(());
    }

    let present = &ctx.targets.player()?.present;
    let rendering = RenderingConfig::new(present.extent())
        .with_color(
            Attachment::color(present.view(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).load(),
        )
        .build();
    ctx.cmd.begin_rendering(&rendering.info());
    ctx.cmd.set_viewport_and_scissor(present.extent());
    for (pipeline, mesh) in [
        (&ctx.pipelines.debug_lines, lines),
        (&ctx.pipelines.debug_points, points),
    ] {
        let Some((buffer, vertex_count)) = mesh else {
            continue;
        };
        ctx.cmd.bind_pipeline(pipeline.bind_point(), pipeline.handle());
        ctx.cmd.bind_descriptor_sets(
            pipeline.bind_point(),
            ctx.layouts.graphics.handle(),
            0,
            &ctx.graphics_sets(),
        );
        ctx.cmd.bind_vertex_buffer(buffer);
        ctx.cmd.draw(vertex_count, 1, 0, 0);
    }
    ctx.cmd.end_rendering();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    use crate::targets::player_target_extents;

    fn info(raw: u64, usage: vk::ImageUsageFlags, extent: vk::Extent2D) -> TargetInfo {
        TargetInfo {
            image: vk::Image::from_raw(raw),
            aspect: vk::ImageAspectFlags::COLOR,
            usage,
            state: ImageState::UNDEFINED,
            extent,
        }
    }

    fn game_targets() -> GameTargets {
        let extents = player_target_extents(768, 432, 2);
        let all = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        let depth = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
        let big = extents.supersampled;
        GameTargets {
            base_color: info(1, all, big),
            normal: info(2, all, big),
            rma: info(3, all, big),
            position: info(4, all, big),
            depth: TargetInfo {
                aspect: vk::ImageAspectFlags::DEPTH,
                ..info(5, depth, big)
            },
            ray_tracing: info(6, all, big),
            lighting: info(7, all, big),
            present: info(8, all, extents.present),
            full_size: info(9, all, vk::Extent2D { width: 1920, height: 1080 }),
        }
    }

    fn window() -> vk::Extent2D {
        vk::Extent2D { width: 1280, height: 720 }
    }

    #[test]
    fn test_game_graph_order() {
        let (graph, _) = game_graph(&game_targets(), window(), BlitDstCoords::full(1920, 1080));
        let compiled = graph.compile().unwrap();
        assert_eq!(
            compiled.pass_names(),
            vec![
                "geometry",
                "ray_tracing",
                "lighting",
                "ui_hi_res",
                "downscale",
                "debug",
                "ui",
                "blit_full_size",
                "blit_swapchain",
                "present",
            ]
        );
    }

    #[test]
    fn test_swapchain_is_only_touched_at_the_end() {
        let (graph, res) = game_graph(&game_targets(), window(), BlitDstCoords::full(1920, 1080));
        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.first_pass_using(res.swapchain), Some(8));
        let last = compiled.final_states()[res.swapchain.index()];
        assert_eq!(last.layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_ray_tracing_sees_gbuffer_in_general() {
        let (graph, res) = game_graph(&game_targets(), window(), BlitDstCoords::full(1920, 1080));
        let compiled = graph.compile().unwrap();
        let rt = &compiled.passes()[1];
        for id in [res.base_color, res.normal, res.rma, res.position, res.depth, res.ray_tracing] {
            let barrier = rt
                .barriers
                .iter()
                .find(|b| b.resource == id)
                .expect("ray tracing pass transitions every input");
            assert_eq!(barrier.new_layout, vk::ImageLayout::GENERAL);
        }
    }

    #[test]
    fn test_blits_use_expected_filters_and_regions() {
        let blit_dst = BlitDstCoords::new(0, 0, 960, 540);
        let (graph, _) = game_graph(&game_targets(), window(), blit_dst);
        let compiled = graph.compile().unwrap();
        let blits: Vec<(vk::Filter, vk::ImageBlit)> = compiled
            .passes()
            .iter()
            .filter_map(|p| match p.payload {
                PassKind::Blit { filter, region, .. } => Some((filter, region)),
                _ => None,
            })
            .collect();
        assert_eq!(blits.len(), 3);
        assert_eq!(blits[0].0, vk::Filter::LINEAR);
        assert_eq!(blits[0].1.src_offsets[1].x, 1536);
        assert_eq!(blits[0].1.dst_offsets[1].x, 768);
        assert_eq!(blits[1].0, vk::Filter::NEAREST);
        assert_eq!(blits[1].1.dst_offsets[1].x, 960);
        assert_eq!(blits[1].1.dst_offsets[1].y, 540);
        assert_eq!(blits[2].0, vk::Filter::NEAREST);
        assert_eq!(blits[2].1.dst_offsets[0].x, 0);
        assert_eq!(blits[2].1.dst_offsets[1].x, 1280);
        assert_eq!(blits[2].1.dst_offsets[1].y, 720);
    }

    #[test]
    fn test_loading_screen_graph() {
        let loading = info(
            10,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::Extent2D { width: 1536, height: 864 },
        );
        let (graph, res) = loading_screen_graph(&loading, window());
        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_names(), vec!["ui", "blit_swapchain", "present"]);
        assert!(matches!(
            compiled.passes()[0].payload,
            PassKind::Ui {
                target: UiTarget::LoadingScreen,
                clear: true
            }
        ));
        assert_eq!(compiled.first_pass_using(res.swapchain), Some(1));
    }

    #[test]
    fn test_ui_load_op() {
        assert_eq!(ui_load_op(true), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(ui_load_op(false), vk::AttachmentLoadOp::LOAD);
    }

    #[test]
    fn test_game_ui_passes_keep_prior_content() {
        let (graph, _) = game_graph(&game_targets(), window(), BlitDstCoords::full(1920, 1080));
        let compiled = graph.compile().unwrap();
        let clears: Vec<bool> = compiled
            .passes()
            .iter()
            .filter_map(|p| match p.payload {
                PassKind::Ui { clear, .. } => Some(clear),
                _ => None,
            })
            .collect();
        assert_eq!(clears, vec![false, false]);
    }
}
