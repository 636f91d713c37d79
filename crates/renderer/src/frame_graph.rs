//! Frame graph.
//!
//! A frame is declared as passes with the images each pass touches and how.
//! [`FrameGraph::compile`] derives the dependencies between passes from those
//! declarations (read-after-write, write-after-read, write-after-write),
//! orders the passes, and computes every image barrier the order needs by
//! tracking each image's layout and pending accesses. Recording a compiled
//! graph emits those barriers ahead of each pass body, so no pass places
//! barriers of its own.
//!
//! # Example
//!
//! ```
//! use ash::vk;
//! use lumen_renderer::frame_graph::{FrameGraph, ImageState, ImageUsage};
//!
//! let mut graph = FrameGraph::new();
//! let color = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
//! let gbuffer = graph.import_image(
//!     "gbuffer",
//!     vk::Image::null(),
//!     vk::ImageAspectFlags::COLOR,
//!     color,
//!     ImageState::UNDEFINED,
//! );
//! let output = graph.import_image(
//!     "output",
//!     vk::Image::null(),
//!     vk::ImageAspectFlags::COLOR,
//!     color,
//!     ImageState::UNDEFINED,
//! );
//! graph.add_pass("lighting", (), &[(gbuffer, ImageUsage::SampledFragment), (output, ImageUsage::ColorAttachment)]);
//! graph.add_pass("geometry", (), &[(gbuffer, ImageUsage::ColorAttachment)]);
//!
//! // Declaration order is kept: "lighting" reads what the previous frame left.
//! let compiled = graph.compile().unwrap();
//! assert_eq!(compiled.pass_names(), vec!["lighting", "geometry"]);
//! ```

use std::collections::BTreeSet;
use std::ops::Range;

use ash::vk;
use tracing::trace;

use lumen_rhi::command::CommandBuffer;
use lumen_rhi::image::full_subresource_range;

use crate::error::{RendererError, RendererResult};

/// Handle of an image registered with a [`FrameGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(usize);

impl ResourceId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle of a pass, in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(usize);

impl PassId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where an image stands between passes: its layout and the stage/access
/// scope that a later access has to wait on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageState {
    pub layout: vk::ImageLayout,
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl ImageState {
    /// Freshly created image, nothing to wait on.
    pub const UNDEFINED: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags2::NONE,
        access: vk::AccessFlags2::NONE,
    };

    /// Swapchain image straight after acquisition. The submit waits on the
    /// acquire semaphore at colour-attachment output, so the first barrier
    /// chains from that stage.
    pub const ACQUIRED: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        access: vk::AccessFlags2::NONE,
    };
}

impl Default for ImageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/// How a pass touches an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageUsage {
    /// Rendered to as a colour attachment (clear or load).
    ColorAttachment,
    /// Depth-tested and written.
    DepthAttachment,
    /// Sampled by a fragment shader, in GENERAL.
    SampledFragment,
    /// Sampled by ray-tracing shaders, in GENERAL.
    SampledRayTracing,
    /// Written as a storage image by ray-tracing shaders.
    StorageRayTracing,
    /// Blit or copy source.
    TransferSrc,
    /// Blit or copy destination.
    TransferDst,
    /// Handed to the presentation engine.
    Present,
}

impl ImageUsage {
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            ImageUsage::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageUsage::DepthAttachment => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            ImageUsage::SampledFragment
            | ImageUsage::SampledRayTracing
            | ImageUsage::StorageRayTracing => vk::ImageLayout::GENERAL,
            ImageUsage::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageUsage::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageUsage::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    pub fn stage(self) -> vk::PipelineStageFlags2 {
        match self {
            ImageUsage::ColorAttachment => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ImageUsage::DepthAttachment => {
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
            }
            ImageUsage::SampledFragment => vk::PipelineStageFlags2::FRAGMENT_SHADER,
            ImageUsage::SampledRayTracing | ImageUsage::StorageRayTracing => {
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
            }
            ImageUsage::TransferSrc | ImageUsage::TransferDst => vk::PipelineStageFlags2::BLIT,
            ImageUsage::Present => vk::PipelineStageFlags2::NONE,
        }
    }

    pub fn access(self) -> vk::AccessFlags2 {
        match self {
            ImageUsage::ColorAttachment => {
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            }
            ImageUsage::DepthAttachment => {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            ImageUsage::SampledFragment | ImageUsage::SampledRayTracing => {
                vk::AccessFlags2::SHADER_SAMPLED_READ
            }
            ImageUsage::StorageRayTracing => {
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE
            }
            ImageUsage::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
            ImageUsage::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
            ImageUsage::Present => vk::AccessFlags2::NONE,
        }
    }

    /// The write half of [`Self::access`]; empty for read-only usages.
    pub fn write_access(self) -> vk::AccessFlags2 {
        match self {
            ImageUsage::ColorAttachment => vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            ImageUsage::DepthAttachment => vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ImageUsage::StorageRayTracing => vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ImageUsage::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
            _ => vk::AccessFlags2::NONE,
        }
    }

    #[inline]
    pub fn is_write(self) -> bool {
        !self.write_access().is_empty()
    }

    /// Image usage flag the image must have been created with.
    pub fn required_usage(self) -> vk::ImageUsageFlags {
        match self {
            ImageUsage::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ImageUsage::DepthAttachment => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ImageUsage::SampledFragment | ImageUsage::SampledRayTracing => {
                vk::ImageUsageFlags::SAMPLED
            }
            ImageUsage::StorageRayTracing => vk::ImageUsageFlags::STORAGE,
            ImageUsage::TransferSrc => vk::ImageUsageFlags::TRANSFER_SRC,
            ImageUsage::TransferDst => vk::ImageUsageFlags::TRANSFER_DST,
            ImageUsage::Present => vk::ImageUsageFlags::empty(),
        }
    }
}

/// An image known to the graph. `image` is `None` for an external resource
/// until it is bound after compilation.
#[derive(Clone, Debug)]
pub struct ImageResource {
    pub name: String,
    pub image: Option<vk::Image>,
    pub aspect: vk::ImageAspectFlags,
    pub usage: vk::ImageUsageFlags,
    pub initial_state: ImageState,
}

struct PassNode<P> {
    name: String,
    payload: P,
    accesses: Vec<(ResourceId, ImageUsage)>,
}

/// Passes and images of one frame, in declaration order.
pub struct FrameGraph<P> {
    resources: Vec<ImageResource>,
    passes: Vec<PassNode<P>>,
    explicit_dependencies: Vec<(PassId, PassId)>,
}

impl<P> Default for FrameGraph<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> FrameGraph<P> {
    pub fn new() -> Self {
        Self {
            resources: Vec::new(),
            passes: Vec::new(),
            explicit_dependencies: Vec::new(),
        }
    }

    /// Registers an image the renderer owns, starting from `state`.
    pub fn import_image(
        &mut self,
        name: &str,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        usage: vk::ImageUsageFlags,
        state: ImageState,
    ) -> ResourceId {
        self.push_resource(name, Some(image), aspect, usage, state)
    }

    /// Registers an image whose handle is only known after compilation
    /// (the swapchain image). Bind it with [`CompiledGraph::bind_external`].
    pub fn import_external(
        &mut self,
        name: &str,
        aspect: vk::ImageAspectFlags,
        usage: vk::ImageUsageFlags,
        state: ImageState,
    ) -> ResourceId {
        self.push_resource(name, None, aspect, usage, state)
    }

    fn push_resource(
        &mut self,
        name: &str,
        image: Option<vk::Image>,
        aspect: vk::ImageAspectFlags,
        usage: vk::ImageUsageFlags,
        state: ImageState,
    ) -> ResourceId {
        self.resources.push(ImageResource {
            name: name.to_string(),
            image,
            aspect,
            usage,
            initial_state: state,
        });
        ResourceId(self.resources.len() - 1)
    }

    pub fn add_pass(
        &mut self,
        name: &str,
        payload: P,
        accesses: &[(ResourceId, ImageUsage)],
    ) -> PassId {
        self.passes.push(PassNode {
            name: name.to_string(),
            payload,
            accesses: accesses.to_vec(),
        });
        PassId(self.passes.len() - 1)
    }

    /// Orders `before` ahead of `after` even though they share no image.
    pub fn add_dependency(&mut self, before: PassId, after: PassId) {
        self.explicit_dependencies.push((before, after));
    }

    /// Orders the passes and computes their barriers.
    ///
    /// # Errors
    ///
    /// [`RendererError::FrameGraph`] for an unknown handle, an image used
    /// twice by one pass, an access the image's usage flags do not permit,
    /// or a dependency cycle.
    pub fn compile(self) -> RendererResult<CompiledGraph<P>> {
        self.validate()?;
        let order = self.sort()?;

        let mut trackers: Vec<Tracker> = self
            .resources
            .iter()
            .map(|r| Tracker::new(r.initial_state))
            .collect();
        let mut states = Vec::with_capacity(order.len() + 1);
        states.push(trackers.iter().map(Tracker::state).collect::<Vec<_>>());

        let mut slots: Vec<Option<PassNode<P>>> = self.passes.into_iter().map(Some).collect();
        let mut passes = Vec::with_capacity(order.len());
        for index in order {
            let Some(node) = slots[index].take() else {
                return Err(RendererError::FrameGraph(format!(
                    "pass {} scheduled twice",
                    index
                )));
            };

            let barriers: Vec<ImageBarrier> = node
                .accesses
                .iter()
                .filter_map(|&(resource, usage)| trackers[resource.0].access(resource, usage))
                .collect();
            trace!("Pass '{}': {} barrier(s)", node.name, barriers.len());

            states.push(trackers.iter().map(Tracker::state).collect());
            passes.push(CompiledPass {
                id: PassId(index),
                name: node.name,
                payload: node.payload,
                accesses: node.accesses,
                barriers,
            });
        }

        Ok(CompiledGraph {
            resources: self.resources,
            passes,
            states,
        })
    }

    fn validate(&self) -> RendererResult<()> {
        for pass in &self.passes {
            let mut seen = BTreeSet::new();
            for &(resource, usage) in &pass.accesses {
                let Some(image) = self.resources.get(resource.0) else {
                    return Err(RendererError::FrameGraph(format!(
                        "pass '{}' uses unknown resource {}",
                        pass.name, resource.0
                    )));
                };
                if !seen.insert(resource) {
                    return Err(RendererError::FrameGraph(format!(
                        "pass '{}' declares '{}' more than once",
                        pass.name, image.name
                    )));
                }
                if !image.usage.contains(usage.required_usage()) {
                    return Err(RendererError::FrameGraph(format!(
                        "pass '{}' uses '{}' as {:?}, which its usage flags {:?} do not permit",
                        pass.name, image.name, usage, image.usage
                    )));
                }
            }
        }

        for &(before, after) in &self.explicit_dependencies {
            if before.0 >= self.passes.len() || after.0 >= self.passes.len() {
                return Err(RendererError::FrameGraph(format!(
                    "dependency {} -> {} names an unknown pass",
                    before.0, after.0
                )));
            }
            if before == after {
                return Err(RendererError::FrameGraph(format!(
                    "pass '{}' depends on itself",
                    self.passes[before.0].name
                )));
            }
        }
        Ok(())
    }

    /// Dependency edges between passes, deduplicated per source pass.
    fn edges(&self) -> Vec<BTreeSet<usize>> {
        let mut edges = vec![BTreeSet::new(); self.passes.len()];
        let mut last_writer: Vec<Option<usize>> = vec![None; self.resources.len()];
        let mut readers: Vec<Vec<usize>> = vec![Vec::new(); self.resources.len()];

        for (index, pass) in self.passes.iter().enumerate() {
            for &(resource, usage) in &pass.accesses {
                let r = resource.0;
                if usage.is_write() {
                    if readers[r].is_empty() {
                        if let Some(writer) = last_writer[r] {
                            edges[writer].insert(index);
                        }
                    }
                    for &reader in &readers[r] {
                        edges[reader].insert(index);
                    }
                    readers[r].clear();
                    last_writer[r] = Some(index);
                } else {
                    if let Some(writer) = last_writer[r] {
                        edges[writer].insert(index);
                    }
                    readers[r].push(index);
                }
            }
        }

        for &(before, after) in &self.explicit_dependencies {
            edges[before.0].insert(after.0);
        }
        for (index, targets) in edges.iter_mut().enumerate() {
            targets.remove(&index);
        }
        edges
    }

    /// Kahn's algorithm; among ready passes the earliest declared goes first.
    fn sort(&self) -> RendererResult<Vec<usize>> {
        let edges = self.edges();
        let mut in_degree = vec![0usize; self.passes.len()];
        for targets in &edges {
            for &target in targets {
                in_degree[target] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| index)
            .collect();
        let mut order = Vec::with_capacity(self.passes.len());
        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &target in &edges[index] {
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    ready.insert(target);
                }
            }
        }

        if order.len() != self.passes.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, degree)| **degree > 0)
                .map(|(index, _)| self.passes[index].name.as_str())
                .collect();
            return Err(RendererError::FrameGraph(format!(
                "dependency cycle through {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }
}

/// One barrier the graph places in front of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub resource: ResourceId,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl ImageBarrier {
    pub fn to_vk(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
    ) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .src_access_mask(self.src_access)
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(full_subresource_range(aspect))
    }

    #[inline]
    pub fn is_layout_transition(&self) -> bool {
        self.old_layout != self.new_layout
    }
}

/// Per-image bookkeeping while walking the pass order.
#[derive(Clone, Copy, Debug)]
struct Tracker {
    layout: vk::ImageLayout,
    write_stage: vk::PipelineStageFlags2,
    write_access: vk::AccessFlags2,
    /// Stages that read since the last write.
    read_stages: vk::PipelineStageFlags2,
    /// Stages the last write has already been made visible to.
    synced_stages: vk::PipelineStageFlags2,
}

impl Tracker {
    fn new(state: ImageState) -> Self {
        // A carried state without write access only holds reads; readers
        // at those stages are already ordered behind them.
        let synced_stages = if state.access.is_empty() {
            state.stage
        } else {
            vk::PipelineStageFlags2::NONE
        };
        Self {
            layout: state.layout,
            write_stage: state.stage,
            write_access: state.access,
            read_stages: vk::PipelineStageFlags2::NONE,
            synced_stages,
        }
    }

    fn state(&self) -> ImageState {
        ImageState {
            layout: self.layout,
            stage: self.write_stage | self.read_stages,
            access: self.write_access,
        }
    }

    fn record_write(&mut self, usage: ImageUsage) {
        self.write_stage = usage.stage();
        self.write_access = usage.write_access();
        self.read_stages = vk::PipelineStageFlags2::NONE;
        self.synced_stages = vk::PipelineStageFlags2::NONE;
    }

    /// Applies one access and returns the barrier it needs, if any.
    fn access(&mut self, resource: ResourceId, usage: ImageUsage) -> Option<ImageBarrier> {
        let old_layout = self.layout;
        let new_layout = usage.layout();
        let wait_stage = self.write_stage | self.read_stages;
        let barrier = |src_stage, src_access| ImageBarrier {
            resource,
            old_layout,
            new_layout,
            src_stage,
            src_access,
            dst_stage: usage.stage(),
            dst_access: usage.access(),
        };

        if old_layout != new_layout {
            let result = barrier(wait_stage, self.write_access);
            self.layout = new_layout;
            if usage.is_write() {
                self.record_write(usage);
            } else {
                // The transition itself counts as a write later readers
                // must chain from.
                self.write_stage |= usage.stage();
                self.read_stages = usage.stage();
                self.synced_stages = usage.stage();
            }
            Some(result)
        } else if usage.is_write() {
            let result = (!wait_stage.is_empty()).then(|| barrier(wait_stage, self.write_access));
            self.record_write(usage);
            result
        } else {
            let pending =
                !self.write_stage.is_empty() && !self.synced_stages.contains(usage.stage());
            let result = pending.then(|| barrier(self.write_stage, self.write_access));
            self.read_stages |= usage.stage();
            self.synced_stages |= usage.stage();
            result
        }
    }
}

/// A pass in execution order with the barriers to record before it.
pub struct CompiledPass<P> {
    pub id: PassId,
    pub name: String,
    pub payload: P,
    pub barriers: Vec<ImageBarrier>,
    accesses: Vec<(ResourceId, ImageUsage)>,
}

impl<P> CompiledPass<P> {
    pub fn uses(&self, resource: ResourceId) -> bool {
        self.accesses.iter().any(|(r, _)| *r == resource)
    }

    pub fn accesses(&self) -> &[(ResourceId, ImageUsage)] {
        &self.accesses
    }
}

/// Output of [`FrameGraph::compile`].
pub struct CompiledGraph<P> {
    resources: Vec<ImageResource>,
    passes: Vec<CompiledPass<P>>,
    /// `states[i]` holds every image's state after the first `i` passes.
    states: Vec<Vec<ImageState>>,
}

impl<P> CompiledGraph<P> {
    #[inline]
    pub fn passes(&self) -> &[CompiledPass<P>] {
        &self.passes
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ImageResource> {
        self.resources.get(id.0)
    }

    /// Supplies the handle of an external resource.
    pub fn bind_external(&mut self, id: ResourceId, image: vk::Image) -> RendererResult<()> {
        let resource = self.resources.get_mut(id.0).ok_or_else(|| {
            RendererError::FrameGraph(format!("unknown resource {}", id.0))
        })?;
        resource.image = Some(image);
        Ok(())
    }

    /// Position in execution order of the first pass touching `id`.
    pub fn first_pass_using(&self, id: ResourceId) -> Option<usize> {
        self.passes.iter().position(|p| p.uses(id))
    }

    /// Image states once every pass has run, indexed by resource.
    pub fn final_states(&self) -> &[ImageState] {
        self.states_after(self.passes.len())
    }

    /// Image states after the first `count` passes (clamped to the pass count).
    pub fn states_after(&self, count: usize) -> &[ImageState] {
        &self.states[count.min(self.passes.len())]
    }

    /// Records the passes in `range` (execution order), each preceded by its
    /// barriers.
    ///
    /// # Errors
    ///
    /// [`RendererError::FrameGraph`] if a pass touches an external resource
    /// that was never bound; otherwise whatever `record` returns.
    pub fn record<F>(&self, cmd: &CommandBuffer, range: Range<usize>, mut record: F) -> RendererResult<()>
    where
        F: FnMut(&CompiledPass<P>) -> RendererResult<()>,
    {
        let end = range.end.min(self.passes.len());
        let start = range.start.min(end);
        for pass in &self.passes[start..end] {
            let barriers = pass
                .barriers
                .iter()
                .map(|barrier| {
                    let resource = &self.resources[barrier.resource.0];
                    let image = resource.image.ok_or_else(|| {
                        RendererError::FrameGraph(format!(
                            "pass '{}' touches external resource '{}' before it was bound",
                            pass.name, resource.name
                        ))
                    })?;
                    Ok(barrier.to_vk(image, resource.aspect))
                })
                .collect::<RendererResult<Vec<_>>>()?;
            cmd.pipeline_barrier2(&[], &barriers);
            record(pass)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
        vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
            | vk::ImageUsageFlags::SAMPLED.as_raw()
            | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
            | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
    );

    fn image(graph: &mut FrameGraph<()>, name: &str) -> ResourceId {
        graph.import_image(
            name,
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            COLOR,
            ImageState::UNDEFINED,
        )
    }

    #[test]
    fn test_linear_chain_keeps_declaration_order() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        let b = image(&mut graph, "b");
        graph.add_pass("write_a", (), &[(a, ImageUsage::ColorAttachment)]);
        graph.add_pass(
            "a_to_b",
            (),
            &[(a, ImageUsage::SampledFragment), (b, ImageUsage::ColorAttachment)],
        );
        graph.add_pass("present_b", (), &[(b, ImageUsage::TransferSrc)]);

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_names(), vec!["write_a", "a_to_b", "present_b"]);
    }

    #[test]
    fn test_explicit_dependency_reorders() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        let b = image(&mut graph, "b");
        let first = graph.add_pass("first", (), &[(a, ImageUsage::ColorAttachment)]);
        let second = graph.add_pass("second", (), &[(b, ImageUsage::ColorAttachment)]);
        graph.add_dependency(second, first);

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_names(), vec!["second", "first"]);
        assert_eq!(compiled.passes()[0].id, second);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        let writer = graph.add_pass("writer", (), &[(a, ImageUsage::ColorAttachment)]);
        let reader = graph.add_pass("reader", (), &[(a, ImageUsage::SampledFragment)]);
        graph.add_dependency(reader, writer);

        let err = graph.compile().err().unwrap();
        assert!(matches!(err, RendererError::FrameGraph(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_dependency_is_rejected() {
        let mut graph = FrameGraph::<()>::new();
        let pass = graph.add_pass("lonely", (), &[]);
        graph.add_dependency(pass, pass);
        assert!(graph.compile().is_err());
    }

    #[test]
    fn test_usage_flags_are_checked() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        graph.add_pass("storage", (), &[(a, ImageUsage::StorageRayTracing)]);

        let err = graph.compile().err().unwrap();
        assert!(err.to_string().contains("do not permit"));
    }

    #[test]
    fn test_duplicate_access_is_rejected() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        graph.add_pass(
            "twice",
            (),
            &[(a, ImageUsage::ColorAttachment), (a, ImageUsage::SampledFragment)],
        );
        assert!(graph.compile().is_err());
    }

    #[test]
    fn test_read_after_write_transitions_layout() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        graph.add_pass("write", (), &[(a, ImageUsage::ColorAttachment)]);
        graph.add_pass("read", (), &[(a, ImageUsage::SampledFragment)]);

        let compiled = graph.compile().unwrap();
        let first = &compiled.passes()[0].barriers;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first[0].src_stage, vk::PipelineStageFlags2::NONE);

        let second = &compiled.passes()[1].barriers[0];
        assert_eq!(second.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(second.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(second.src_stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(second.src_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(second.dst_stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(second.dst_access, vk::AccessFlags2::SHADER_SAMPLED_READ);
    }

    #[test]
    fn test_repeated_read_at_same_stage_needs_no_barrier() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        graph.add_pass("write", (), &[(a, ImageUsage::ColorAttachment)]);
        graph.add_pass("read_1", (), &[(a, ImageUsage::SampledFragment)]);
        graph.add_pass("read_2", (), &[(a, ImageUsage::SampledFragment)]);

        let compiled = graph.compile().unwrap();
        assert!(compiled.passes()[2].barriers.is_empty());
    }

    #[test]
    fn test_read_at_new_stage_in_same_layout_gets_barrier() {
        let mut graph = FrameGraph::new();
        let a = graph.import_image(
            "gbuffer",
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            COLOR,
            ImageState::UNDEFINED,
        );
        graph.add_pass("geometry", (), &[(a, ImageUsage::ColorAttachment)]);
        graph.add_pass("ray_tracing", (), &[(a, ImageUsage::SampledRayTracing)]);
        graph.add_pass("lighting", (), &[(a, ImageUsage::SampledFragment)]);

        let compiled = graph.compile().unwrap();
        let barrier = &compiled.passes()[2].barriers[0];
        assert!(!barrier.is_layout_transition());
        assert!(barrier
            .src_stage
            .contains(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT));
        assert!(barrier
            .src_stage
            .contains(vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR));
        assert_eq!(barrier.dst_stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
    }

    #[test]
    fn test_write_after_read_waits_on_reader() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        graph.add_pass("blit_out", (), &[(a, ImageUsage::TransferSrc)]);
        graph.add_pass("blit_in", (), &[(a, ImageUsage::TransferDst)]);

        let compiled = graph.compile().unwrap();
        let barrier = &compiled.passes()[1].barriers[0];
        assert_eq!(barrier.old_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert!(barrier.src_stage.contains(vk::PipelineStageFlags2::BLIT));
        assert_eq!(barrier.dst_access, vk::AccessFlags2::TRANSFER_WRITE);
    }

    #[test]
    fn test_write_after_write_same_layout_gets_barrier() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        graph.add_pass("first", (), &[(a, ImageUsage::ColorAttachment)]);
        graph.add_pass("second", (), &[(a, ImageUsage::ColorAttachment)]);

        let compiled = graph.compile().unwrap();
        let barrier = &compiled.passes()[1].barriers[0];
        assert_eq!(barrier.src_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert!(!barrier.is_layout_transition());
    }

    #[test]
    fn test_final_states_and_prefix_states() {
        let mut graph = FrameGraph::new();
        let a = image(&mut graph, "a");
        let b = image(&mut graph, "b");
        graph.add_pass("draw", (), &[(a, ImageUsage::ColorAttachment)]);
        graph.add_pass(
            "blit",
            (),
            &[(a, ImageUsage::TransferSrc), (b, ImageUsage::TransferDst)],
        );

        let compiled = graph.compile().unwrap();
        assert_eq!(
            compiled.final_states()[a.index()].layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        );
        assert_eq!(
            compiled.final_states()[b.index()].layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            compiled.states_after(1)[a.index()].layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(compiled.states_after(1)[b.index()], ImageState::UNDEFINED);
        assert_eq!(compiled.states_after(99), compiled.final_states());
    }

    #[test]
    fn test_carried_state_starts_next_frame_in_place() {
        let carried = ImageState {
            layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            stage: vk::PipelineStageFlags2::BLIT,
            access: vk::AccessFlags2::NONE,
        };
        let mut graph = FrameGraph::new();
        let a = graph.import_image(
            "a",
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            COLOR,
            carried,
        );
        graph.add_pass("blit_again", (), &[(a, ImageUsage::TransferSrc)]);

        let compiled = graph.compile().unwrap();
        assert!(compiled.passes()[0].barriers.is_empty());
    }

    #[test]
    fn test_external_resource_binding() {
        let mut graph = FrameGraph::new();
        let source = image(&mut graph, "source");
        let swapchain = graph.import_external(
            "swapchain",
            vk::ImageAspectFlags::COLOR,
            vk::ImageUsageFlags::TRANSFER_DST,
            ImageState::ACQUIRED,
        );
        graph.add_pass("draw", (), &[(source, ImageUsage::ColorAttachment)]);
        graph.add_pass(
            "to_swapchain",
            (),
            &[(source, ImageUsage::TransferSrc), (swapchain, ImageUsage::TransferDst)],
        );
        graph.add_pass("present", (), &[(swapchain, ImageUsage::Present)]);

        let mut compiled = graph.compile().unwrap();
        assert_eq!(compiled.first_pass_using(swapchain), Some(1));
        assert!(compiled.resource(swapchain).unwrap().image.is_none());

        let acquire_barrier = compiled.passes()[1]
            .barriers
            .iter()
            .find(|b| b.resource == swapchain)
            .unwrap();
        assert_eq!(
            acquire_barrier.src_stage,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );

        compiled.bind_external(swapchain, vk::Image::null()).unwrap();
        assert!(compiled.resource(swapchain).unwrap().image.is_some());
        assert!(compiled.bind_external(ResourceId(42), vk::Image::null()).is_err());
    }

    #[test]
    fn test_usage_properties() {
        assert!(ImageUsage::ColorAttachment.is_write());
        assert!(ImageUsage::StorageRayTracing.is_write());
        assert!(!ImageUsage::SampledRayTracing.is_write());
        assert!(!ImageUsage::Present.is_write());
        assert_eq!(ImageUsage::SampledFragment.layout(), vk::ImageLayout::GENERAL);
        assert_eq!(
            ImageUsage::DepthAttachment.required_usage(),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        );
    }
}
