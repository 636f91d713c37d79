//! Top-level renderer.
//!
//! [`RendererContext`] owns every GPU object and drives the two frame
//! shapes. A frame runs on the current slot of the [`FrameRing`]:
//!
//! 1. wait for the slot's fence, upload the frame's draw lists
//! 2. record every pass that does not touch the swapchain
//! 3. acquire a swapchain image, record the remaining passes, submit
//! 4. present, then handle a pending resize
//!
//! # Resource Destruction Order
//!
//! Everything created from the device is dropped before the device, the
//! device before the surface, and the surface before the instance.

use std::mem::ManuallyDrop;
use std::ops::Range;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use lumen_core::RendererConfig;
use lumen_platform::{Surface, Window};
use lumen_rhi::command::CommandPool;
use lumen_rhi::device::Device;
use lumen_rhi::instance::Instance;
use lumen_rhi::physical_device::select_physical_device;
use lumen_rhi::sampler::Sampler;
use lumen_scene::{GpuLight, RenderData, RenderItem2D, RenderItem3D};

use crate::acceleration::AccelerationStructureManager;
use crate::assets::{AssetProvider, GpuAssets};
use crate::descriptors::DescriptorSets;
use crate::error::{RendererError, RendererResult};
use crate::frame_graph::{CompiledGraph, ResourceId};
use crate::frame_ring::{FrameRing, StorageKind};
use crate::passes::{
    GameTargets, PassContext, PassKind, TargetInfo, game_graph, loading_screen_graph, record_pass,
};
use crate::pipelines::{PipelineLibrary, ShaderSource};
use crate::presenter::{Presenter, ResizeStep, pending_resize, plan_submission};
use crate::targets::RenderTargets;

/// Device-owned objects, dropped in declaration order.
struct GpuResources {
    frame_ring: FrameRing,
    acceleration: AccelerationStructureManager,
    assets: GpuAssets,
    pipelines: PipelineLibrary,
    descriptor_sets: DescriptorSets,
    targets: RenderTargets,
    sampler: Sampler,
    presenter: Presenter,
    upload_pool: CommandPool,
    frame_pool: CommandPool,
    device: Arc<Device>,
}

impl GpuResources {
    /// Records `range` of `graph` into the current slot's command buffer.
    fn record(
        &self,
        graph: &CompiledGraph<PassKind>,
        range: Range<usize>,
        animated_items: &[RenderItem3D],
    ) -> RendererResult<()> {
        let slot = self.frame_ring.current_slot();
        let ctx = PassContext {
            cmd: slot.command_buffer(),
            pipelines: self.pipelines.pipelines(),
            layouts: &self.pipelines.layouts,
            descriptor_sets: &self.descriptor_sets,
            slot_sets: self.descriptor_sets.slot(self.frame_ring.current_index()),
            slot,
            assets: &self.assets,
            targets: &self.targets,
            animated_items,
        };
        graph.record(ctx.cmd, range, |pass| record_pass(&ctx, graph, pass))
    }

    /// Records, submits and presents `graph`. Returns how many passes ran.
    ///
    /// Passes before the first swapchain access are always submitted. If no
    /// image can be acquired the rest of the frame is dropped and only the
    /// fence is signalled.
    fn execute(
        &mut self,
        graph: &mut CompiledGraph<PassKind>,
        swapchain: ResourceId,
        animated_items: &[RenderItem3D],
    ) -> RendererResult<usize> {
        let pass_count = graph.passes().len();
        let split = graph.first_pass_using(swapchain).unwrap_or(pass_count);

        let cmd = self.frame_ring.current_slot().command_buffer();
        cmd.reset()?;
        cmd.begin()?;
        self.record(graph, 0..split, animated_items)?;

        let image_available = self.frame_ring.current_slot().image_available().handle();
        let acquired = self.presenter.acquire(image_available)?;
        let plan = plan_submission(acquired, split, pass_count);

        if let Some(image_index) = plan.present {
            graph.bind_external(swapchain, self.presenter.image(image_index))?;
            self.record(graph, plan.remaining.clone(), animated_items)?;
        }
        self.frame_ring.current_slot().command_buffer().end()?;
        self.submit(plan.waits_on_acquire.then_some(image_available))?;

        if let Some(image_index) = plan.present {
            let render_finished = self.frame_ring.current_slot().render_finished().handle();
            self.presenter.present(image_index, render_finished)?;
        }
        Ok(plan.executed)
    }

    /// Submits the current slot's command buffer, signalling its fence.
    /// With `wait` the submission also waits on the acquired image and
    /// signals the slot's render-finished semaphore.
    fn submit(&self, wait: Option<vk::Semaphore>) -> RendererResult<()> {
        let slot = self.frame_ring.current_slot();
        let command_buffers = [slot.command_buffer().handle()];
        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait_semaphores
            .iter()
            .map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = wait
            .map(|_| slot.render_finished().handle())
            .into_iter()
            .collect();

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer is fully recorded and the fence was
        // reset for this submission.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], slot.in_flight().handle())?;
        }
        Ok(())
    }
}

/// Owns the Vulkan instance, device and every renderer resource.
pub struct RendererContext {
    config: RendererConfig,
    resources: ManuallyDrop<GpuResources>,
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,
    /// Lights of the latest primary view, reused by the other views.
    shared_lights: Vec<GpuLight>,
}

impl RendererContext {
    /// Brings up Vulkan for `window` and uploads every asset `provider` has.
    pub fn new(
        window: &Window,
        config: RendererConfig,
        provider: &dyn AssetProvider,
        shaders: Box<dyn ShaderSource>,
    ) -> RendererResult<Self> {
        config.validate()?;

        let extensions = window.required_extensions()?;
        let instance = Instance::new(config.enable_validation, &extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;

        let graphics_family = device.queue_families().graphics_family.ok_or_else(|| {
            RendererError::Core(lumen_core::Error::Vulkan(
                "selected device has no graphics queue".into(),
            ))
        })?;
        let frame_pool = CommandPool::new(device.clone(), graphics_family)?;
        let upload_pool = CommandPool::new_transient(device.clone(), graphics_family)?;

        let presenter = Presenter::new(
            &instance,
            device.clone(),
            surface.handle(),
            window.width().max(1),
            window.height().max(1),
        )?;

        let (loading_width, loading_height) = config.loading_screen_extent();
        let targets = RenderTargets::new(
            device.clone(),
            vk::Extent2D {
                width: loading_width,
                height: loading_height,
            },
            vk::Extent2D {
                width: config.native_width,
                height: config.native_height,
            },
            config.present_width,
            config.present_height,
            config.supersample_factor,
        )?;
        let sampler = Sampler::linear(device.clone())?;

        let descriptor_sets = DescriptorSets::new(
            device.clone(),
            config.frames_in_flight,
            config.texture_array_size,
        )?;
        let assets = GpuAssets::upload(&device, &upload_pool, device.graphics_queue(), provider)?;
        descriptor_sets.update_textures(sampler.handle(), &assets.texture_views())?;
        descriptor_sets.update_render_targets(sampler.handle(), &targets)?;

        let pipelines = PipelineLibrary::new(device.clone(), &descriptor_sets, shaders)?;
        let acceleration = AccelerationStructureManager::initialize(
            device.clone(),
            &upload_pool,
            &assets,
            &descriptor_sets,
            config.tlas_rebuild,
            config.max_render_items_3d,
        )?;
        let frame_ring = FrameRing::new(device.clone(), &frame_pool, &config, &descriptor_sets)?;

        info!(
            "Renderer ready: {} frame slot(s), {} BLAS",
            frame_ring.slot_count(),
            acceleration.blas_count()
        );

        Ok(Self {
            config,
            resources: ManuallyDrop::new(GpuResources {
                frame_ring,
                acceleration,
                assets,
                pipelines,
                descriptor_sets,
                targets,
                sampler,
                presenter,
                upload_pool,
                frame_pool,
                device: device.clone(),
            }),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
            shared_lights: Vec::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.resources.frame_ring.frame_counter()
    }

    /// Renders one view of a game frame.
    pub fn render_game(&mut self, window: &Window, data: &RenderData) -> RendererResult<()> {
        if window.is_minimized() {
            return Ok(());
        }

        self.resources.frame_ring.wait_for_fence()?;
        self.upload_frame_data(data)?;
        self.resources.frame_ring.reset_fence()?;

        let res = &mut *self.resources;
        let (graph, ids) = game_graph(
            &GameTargets::from_render_targets(&res.targets)?,
            res.presenter.extent(),
            data.blit_dst_coords_present,
        );
        let mut compiled = graph.compile()?;
        let executed = res.execute(&mut compiled, ids.swapchain, &data.animated_render_items_3d)?;
        ids.apply_states(&mut res.targets, compiled.states_after(executed))?;
        res.frame_ring.advance();

        self.resize_if_requested(window)
    }

    /// Renders the loading screen with `items` as its only content.
    pub fn render_loading_screen(
        &mut self,
        window: &Window,
        items: &[RenderItem2D],
    ) -> RendererResult<()> {
        if window.is_minimized() {
            return Ok(());
        }

        let res = &mut *self.resources;
        res.frame_ring.wait_for_fence()?;
        let slot_sets = res.descriptor_sets.slot(res.frame_ring.current_index());
        res.frame_ring
            .update_storage_buffer(StorageKind::RenderItems2D, items, slot_sets)?;
        res.frame_ring.reset_fence()?;

        let (graph, ids) = loading_screen_graph(
            &TargetInfo::of(&res.targets.loading_screen),
            res.presenter.extent(),
        );
        let mut compiled = graph.compile()?;
        let executed = res.execute(&mut compiled, ids.swapchain, &[])?;
        if let Some(&state) = compiled.states_after(executed).get(ids.loading_screen.index()) {
            res.targets.loading_screen.set_state(state);
        }
        res.frame_ring.advance();

        self.resize_if_requested(window)
    }

    fn upload_frame_data(&mut self, data: &RenderData) -> RendererResult<()> {
        let res = &mut *self.resources;
        let slot = res.frame_ring.current_index();
        let sets = res.descriptor_sets.slot(slot);

        if data.is_primary_view() {
            res.acceleration
                .update_tlas(&res.upload_pool, slot, &data.render_items_3d, sets)?;
            self.shared_lights.clone_from(&data.lights);
        } else {
            res.acceleration.sync_tlas(&res.upload_pool, slot, sets)?;
        }

        let ring = &mut res.frame_ring;
        ring.update_storage_buffer(StorageKind::Lights, &self.shared_lights, sets)?;
        ring.update_storage_buffer(StorageKind::InstanceData, &data.instance_data(), sets)?;
        ring.update_indirect_commands(
            &data.draw_commands,
            &res.upload_pool,
            self.device.graphics_queue(),
        )?;
        ring.update_storage_buffer(StorageKind::Camera, std::slice::from_ref(&data.camera), sets)?;
        ring.update_storage_buffer(StorageKind::RenderItems3D, &data.render_items_3d, sets)?;
        ring.update_storage_buffer(
            StorageKind::RenderItems2DHiRes,
            &data.render_items_2d_hi_res,
            sets,
        )?;
        ring.update_storage_buffer(StorageKind::RenderItems2D, &data.render_items_2d, sets)?;
        ring.update_storage_buffer(
            StorageKind::AnimatedRenderItems3D,
            &data.animated_render_items_3d,
            sets,
        )?;
        ring.update_storage_buffer(
            StorageKind::AnimatedTransforms,
            &data.animated_transforms,
            sets,
        )?;
        ring.update_debug_vertices(&data.debug_lines, &data.debug_points)?;
        Ok(())
    }

    /// Flags the swapchain and player targets for recreation at
    /// `width` x `height` after the next present.
    pub fn resize(&mut self, width: u32, height: u32) {
        debug!("Resize to {}x{} requested", width, height);
        self.resources.presenter.request_resize(width, height);
    }

    fn resize_if_requested(&mut self, window: &Window) -> RendererResult<()> {
        let steps = pending_resize(
            self.resources.presenter.resize_requested(),
            window.is_minimized(),
        );
        if steps.is_empty() {
            return Ok(());
        }
        let extent = self.resources.presenter.resize_target(vk::Extent2D {
            width: window.width(),
            height: window.height(),
        });
        self.handle_resize(steps, extent)
    }

    /// Runs `steps` at `extent`: the swapchain and every size-dependent
    /// target are recreated, then the new target views are rebound.
    fn handle_resize(&mut self, steps: &[ResizeStep], extent: vk::Extent2D) -> RendererResult<()> {
        let res = &mut *self.resources;
        let vk::Extent2D { width, height } = extent;
        for step in steps {
            match step {
                ResizeStep::Swapchain => {
                    res.presenter
                        .recreate(&self.instance, self.surface.handle(), width, height)?;
                }
                ResizeStep::PlayerTargets => {
                    res.targets.recreate_player_targets(width, height)?;
                }
                ResizeStep::RenderTargetDescriptors => {
                    res.descriptor_sets
                        .update_render_targets(res.sampler.handle(), &res.targets)?;
                }
            }
        }
        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    /// Reloads every shader and rebuilds the pipelines. Returns whether the
    /// new pipelines are in use.
    pub fn hotload_shaders(&mut self) -> RendererResult<bool> {
        self.resources.pipelines.hotload()
    }

    /// Re-uploads the provider's textures and rewrites the texture array
    /// and render-target bindings.
    pub fn update_sampler_descriptor_set(
        &mut self,
        provider: &dyn AssetProvider,
    ) -> RendererResult<()> {
        self.device.wait_idle()?;
        let res = &mut *self.resources;
        res.assets.reload_textures(
            &self.device,
            &res.upload_pool,
            self.device.graphics_queue(),
            provider,
        )?;
        res.descriptor_sets
            .update_textures(res.sampler.handle(), &res.assets.texture_views())?;
        res.descriptor_sets
            .update_render_targets(res.sampler.handle(), &res.targets)?;
        Ok(())
    }
}

impl Drop for RendererContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {:?}", e);
        }

        // SAFETY: each field is dropped exactly once, here, and nothing
        // reads it afterwards.
        unsafe {
            ManuallyDrop::drop(&mut self.resources);
            if Arc::strong_count(&self.device) > 1 {
                warn!("Device still shared at renderer drop");
            }
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }
        info!("Renderer destroyed");
    }
}
