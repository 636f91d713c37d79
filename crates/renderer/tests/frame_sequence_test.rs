//! Integration tests for consecutive game and loading-screen frames.
//!
//! These drive the public graph builders the way `RendererContext` does,
//! carrying image states from one frame into the next, without a GPU.

use ash::vk;
use ash::vk::Handle;

use lumen_renderer::frame_graph::{CompiledGraph, ImageState};
use lumen_renderer::passes::{
    GameTargets, PassKind, TargetInfo, game_graph, loading_screen_graph,
};
use lumen_renderer::presenter::{ResizeStep, pending_resize, plan_submission, resize_extent};
use lumen_renderer::targets::player_target_extents;
use lumen_scene::BlitDstCoords;

const WINDOW: vk::Extent2D = vk::Extent2D {
    width: 1280,
    height: 720,
};

fn target(raw: u64, usage: vk::ImageUsageFlags, extent: vk::Extent2D) -> TargetInfo {
    TargetInfo {
        image: vk::Image::from_raw(raw),
        aspect: vk::ImageAspectFlags::COLOR,
        usage,
        state: ImageState::UNDEFINED,
        extent,
    }
}

fn fresh_targets(width: u32, height: u32) -> GameTargets {
    let extents = player_target_extents(width, height, 2);
    let color = vk::ImageUsageFlags::COLOR_ATTACHMENT
        | vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::STORAGE
        | vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST;
    let big = extents.supersampled;
    let mut depth = target(
        5,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        big,
    );
    depth.aspect = vk::ImageAspectFlags::DEPTH;
    GameTargets {
        base_color: target(1, color, big),
        normal: target(2, color, big),
        rma: target(3, color, big),
        position: target(4, color, big),
        depth,
        ray_tracing: target(6, color, big),
        lighting: target(7, color, big),
        present: target(8, color, extents.present),
        full_size: target(
            9,
            color,
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
        ),
    }
}

/// Builds and compiles one game frame from `targets`.
fn game_frame(
    targets: &GameTargets,
) -> (CompiledGraph<PassKind>, lumen_renderer::passes::GameResources) {
    let (graph, res) = game_graph(targets, WINDOW, BlitDstCoords::full(1920, 1080));
    (graph.compile().expect("game graph compiles"), res)
}

/// Writes `states` back into `targets`, as the context does after a frame.
fn carry(
    targets: &mut GameTargets,
    res: &lumen_renderer::passes::GameResources,
    states: &[ImageState],
) {
    let pairs: [(&mut TargetInfo, _); 9] = [
        (&mut targets.base_color, res.base_color),
        (&mut targets.normal, res.normal),
        (&mut targets.rma, res.rma),
        (&mut targets.position, res.position),
        (&mut targets.depth, res.depth),
        (&mut targets.ray_tracing, res.ray_tracing),
        (&mut targets.lighting, res.lighting),
        (&mut targets.present, res.present),
        (&mut targets.full_size, res.full_size),
    ];
    for (info, id) in pairs {
        info.state = states[id.index()];
    }
}

fn geometry_barrier_from(graph: &CompiledGraph<PassKind>, layout: vk::ImageLayout) -> bool {
    graph.passes()[0]
        .barriers
        .iter()
        .any(|b| b.old_layout == layout && b.new_layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
}

#[test]
fn test_first_frame_starts_from_undefined() {
    let targets = fresh_targets(768, 432);
    let (graph, _) = game_frame(&targets);

    assert!(geometry_barrier_from(&graph, vk::ImageLayout::UNDEFINED));
}

#[test]
fn test_second_frame_continues_from_first() {
    let mut targets = fresh_targets(768, 432);
    let (first, res) = game_frame(&targets);
    carry(&mut targets, &res, first.final_states());

    let (second, _) = game_frame(&targets);
    assert_eq!(first.pass_names(), second.pass_names());
    // The G-buffer was last sampled in GENERAL by lighting.
    assert!(geometry_barrier_from(&second, vk::ImageLayout::GENERAL));
    assert!(!geometry_barrier_from(&second, vk::ImageLayout::UNDEFINED));
}

#[test]
fn test_present_and_full_size_are_left_as_transfer_sources() {
    let targets = fresh_targets(768, 432);
    let (graph, res) = game_frame(&targets);
    let states = graph.final_states();

    assert_eq!(
        states[res.present.index()].layout,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    );
    assert_eq!(
        states[res.full_size.index()].layout,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    );
    assert_eq!(
        states[res.swapchain.index()].layout,
        vk::ImageLayout::PRESENT_SRC_KHR
    );
}

#[test]
fn test_dropped_frame_keeps_the_executed_prefix() {
    let mut targets = fresh_targets(768, 432);
    let (graph, res) = game_frame(&targets);
    let split = graph
        .first_pass_using(res.swapchain)
        .expect("swapchain is used");

    // Acquire failed: only the passes before the swapchain blit ran.
    carry(&mut targets, &res, graph.states_after(split));
    assert_eq!(
        targets.full_size.state.layout,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    );

    let (next, _) = game_frame(&targets);
    let blit = next
        .passes()
        .iter()
        .find(|p| p.name == "blit_full_size")
        .expect("blit pass exists");
    assert!(blit.barriers.iter().any(|b| {
        b.resource == res.full_size
            && b.old_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL
            && b.new_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL
    }));
}

#[test]
fn test_resized_targets_keep_the_same_frame_shape() {
    let (before, _) = game_frame(&fresh_targets(768, 432));
    let (after, res) = game_frame(&fresh_targets(1024, 576));

    assert_eq!(before.pass_names(), after.pass_names());
    let downscale = after
        .passes()
        .iter()
        .find(|p| p.name == "downscale")
        .expect("downscale pass exists");
    let PassKind::Blit { region, dst, .. } = downscale.payload else {
        panic!("downscale must be a blit");
    };
    assert_eq!(dst, res.present);
    assert_eq!(region.dst_offsets[1].x, 1024);
    assert_eq!(region.dst_offsets[1].y, 576);
    assert_eq!(region.src_offsets[1].x, 2048);
}

#[test]
fn test_loading_screen_then_game() {
    let extent = vk::Extent2D {
        width: 1137,
        height: 640,
    };
    let mut loading = target(
        10,
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        extent,
    );

    for _ in 0..2 {
        let (graph, res) = loading_screen_graph(&loading, WINDOW);
        let compiled = graph.compile().expect("loading graph compiles");
        assert_eq!(
            compiled.pass_names(),
            vec!["ui", "blit_swapchain", "present"]
        );
        loading.state = compiled.final_states()[res.loading_screen.index()];
    }
    assert_eq!(loading.state.layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);

    // Game frames never touch the loading-screen target.
    let (game, _) = game_frame(&fresh_targets(768, 432));
    assert_eq!(game.passes().len(), 10);
}

#[test]
fn test_out_of_date_frame_then_resize() {
    let mut targets = fresh_targets(768, 432);
    let (graph, res) = game_frame(&targets);
    let split = graph
        .first_pass_using(res.swapchain)
        .expect("swapchain is used");

    // Acquire reported out of date: the prefix is submitted with the fence
    // only and nothing is presented.
    let plan = plan_submission(None, split, graph.passes().len());
    assert!(plan.remaining.is_empty());
    assert!(!plan.waits_on_acquire);
    assert_eq!(plan.present, None);
    carry(&mut targets, &res, graph.states_after(plan.executed));

    // The resize runs once the frame is done, swapchain first and
    // descriptor rewrites last.
    let steps = pending_resize(true, false);
    assert_eq!(steps.first(), Some(&ResizeStep::Swapchain));
    assert_eq!(steps.last(), Some(&ResizeStep::RenderTargetDescriptors));

    let window = vk::Extent2D {
        width: 1024,
        height: 576,
    };
    let extent = resize_extent(Some(window), WINDOW);
    let mut resized = fresh_targets(extent.width, extent.height);
    resized.full_size.state = targets.full_size.state;

    let (next, next_res) = game_frame(&resized);
    assert!(geometry_barrier_from(&next, vk::ImageLayout::UNDEFINED));
    let full = plan_submission(Some(0), split, next.passes().len());
    assert_eq!(full.executed, 10);
    assert_eq!(
        next.states_after(full.executed)[next_res.swapchain.index()].layout,
        vk::ImageLayout::PRESENT_SRC_KHR
    );
    let downscale = next
        .passes()
        .iter()
        .find(|p| p.name == "downscale")
        .expect("downscale pass exists");
    let PassKind::Blit { region, .. } = downscale.payload else {
        panic!("downscale must be a blit");
    };
    assert_eq!(region.dst_offsets[1].x, 1024);
    assert_eq!(region.src_offsets[1].x, 2048);
}

#[test]
fn test_minimized_window_defers_resize() {
    assert!(pending_resize(true, true).is_empty());
    assert_eq!(pending_resize(true, false).len(), 3);
}
