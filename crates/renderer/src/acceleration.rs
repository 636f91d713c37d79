//! Bottom-level structures per mesh and one top-level structure per frame slot.
//!
//! [`AccelerationStructureManager::initialize`] runs once after the assets
//! are on the GPU. Every primary-view frame then calls
//! [`AccelerationStructureManager::update_tlas`] for its slot, which throws
//! the slot's previous TLAS away and builds a new one from the 3D draw list.

use std::sync::Arc;

use glam::Mat4;
use tracing::{debug, info};

use lumen_core::TlasRebuildPolicy;
use lumen_rhi::acceleration::{AccelerationStructure, InstanceRecord, TriangleRange};
use lumen_rhi::command::CommandPool;
use lumen_rhi::descriptor::write_acceleration_structure;
use lumen_rhi::device::Device;
use lumen_scene::RenderItem3D;

use crate::assets::GpuAssets;
use crate::descriptors::{DescriptorSets, SlotDescriptorSets, dynamic_binding, ui_hi_res_binding};
use crate::error::{RendererError, RendererResult};
use crate::frame_ring::clamp_to_capacity;

/// Visible to every ray.
pub const INSTANCE_MASK: u8 = 0xFF;

/// Top three rows of `model`, row-major, as the instance transform expects.
pub fn instance_transform(model: &Mat4) -> [f32; 12] {
    let mut out = [0.0; 12];
    for row in 0..3 {
        out[row * 4..row * 4 + 4].copy_from_slice(&model.row(row).to_array());
    }
    out
}

/// One instance per item, in item order. The custom index is the item's
/// position so hit shaders can look up its instance data.
pub fn tlas_instances(
    items: &[RenderItem3D],
    blas_addresses: &[u64],
) -> RendererResult<Vec<InstanceRecord>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let address = blas_addresses
                .get(item.mesh_index as usize)
                .copied()
                .ok_or_else(|| {
                    RendererError::AccelerationStructure(format!(
                        "render item {} references mesh {} but only {} BLAS exist",
                        i,
                        item.mesh_index,
                        blas_addresses.len()
                    ))
                })?;
            Ok(InstanceRecord::new(
                instance_transform(&item.model_matrix),
                i as u32,
                INSTANCE_MASK,
                address,
            ))
        })
        .collect()
}

/// Whether a slot whose last build used `previous` must rebuild for `next`.
/// A slot that never built always does.
pub fn needs_rebuild(
    policy: TlasRebuildPolicy,
    previous: Option<&[InstanceRecord]>,
    next: &[InstanceRecord],
) -> bool {
    match policy {
        TlasRebuildPolicy::Always => true,
        TlasRebuildPolicy::OnChange => previous != Some(next),
    }
}

struct SlotTlas {
    structure: AccelerationStructure,
    instances: Vec<InstanceRecord>,
}

pub struct AccelerationStructureManager {
    device: Arc<Device>,
    _blases: Vec<AccelerationStructure>,
    blas_addresses: Vec<u64>,
    slots: Vec<Option<SlotTlas>>,
    /// Instances of the latest primary-view build, reused by other views.
    shared: Vec<InstanceRecord>,
    policy: TlasRebuildPolicy,
    max_instances: usize,
}

impl AccelerationStructureManager {
    /// Builds a BLAS for every static mesh, binds the shared geometry
    /// buffers into the `raytracing` set and gives every slot an empty TLAS
    /// so its descriptor sets are complete before the first game frame.
    pub fn initialize(
        device: Arc<Device>,
        pool: &CommandPool,
        assets: &GpuAssets,
        descriptor_sets: &DescriptorSets,
        policy: TlasRebuildPolicy,
        max_instances: usize,
    ) -> RendererResult<Self> {
        let queue = device.graphics_queue();
        let vertex_address = assets.vertex_buffer.device_address();
        let index_address = assets.index_buffer.device_address();

        let blases = assets
            .meshes()
            .iter()
            .map(|mesh| {
                let range = TriangleRange {
                    vertex_address,
                    index_address,
                    max_vertex: mesh.vertex_count.saturating_sub(1),
                    base_index: mesh.base_index,
                    base_vertex: mesh.base_vertex,
                    index_count: mesh.index_count,
                };
                Ok(AccelerationStructure::build_bottom_level(
                    device.clone(),
                    pool,
                    queue,
                    &range,
                )?)
            })
            .collect::<RendererResult<Vec<_>>>()?;
        let blas_addresses = blases.iter().map(|b| b.device_address()).collect();

        descriptor_sets.update_geometry(
            assets.vertex_buffer.handle(),
            assets.index_buffer.handle(),
        );

        let slot_count = descriptor_sets.slot_count();
        let mut manager = Self {
            device,
            _blases: blases,
            blas_addresses,
            slots: (0..slot_count).map(|_| None).collect(),
            shared: Vec::new(),
            policy,
            max_instances,
        };
        for slot in 0..slot_count {
            manager.rebuild(pool, slot, Vec::new(), descriptor_sets.slot(slot))?;
        }

        info!(
            "Acceleration structures initialized: {} BLAS, {} slot TLAS ({:?} rebuild)",
            manager.blas_addresses.len(),
            slot_count,
            policy
        );
        Ok(manager)
    }

    /// Rebuilds `slot`'s TLAS from `items` and rebinds it. Returns whether
    /// a build happened; with [`TlasRebuildPolicy::OnChange`] an unchanged
    /// instance list keeps the current structure.
    ///
    /// The caller must have waited on the slot's fence.
    pub fn update_tlas(
        &mut self,
        pool: &CommandPool,
        slot: usize,
        items: &[RenderItem3D],
        sets: SlotDescriptorSets,
    ) -> RendererResult<bool> {
        let items = clamp_to_capacity("TLAS instance", items, self.max_instances);
        let instances = tlas_instances(items, &self.blas_addresses)?;
        self.shared.clone_from(&instances);
        let previous = self.slots[slot].as_ref().map(|t| t.instances.as_slice());
        if !needs_rebuild(self.policy, previous, &instances) {
            return Ok(false);
        }
        self.rebuild(pool, slot, instances, sets)?;
        Ok(true)
    }

    /// Gives a secondary view's `slot` the instances of the latest
    /// primary-view build, rebuilding only if the slot holds something else.
    pub fn sync_tlas(
        &mut self,
        pool: &CommandPool,
        slot: usize,
        sets: SlotDescriptorSets,
    ) -> RendererResult<bool> {
        let previous = self.slots[slot].as_ref().map(|t| t.instances.as_slice());
        if !needs_rebuild(TlasRebuildPolicy::OnChange, previous, &self.shared) {
            return Ok(false);
        }
        let instances = self.shared.clone();
        self.rebuild(pool, slot, instances, sets)?;
        Ok(true)
    }

    fn rebuild(
        &mut self,
        pool: &CommandPool,
        slot: usize,
        instances: Vec<InstanceRecord>,
        sets: SlotDescriptorSets,
    ) -> RendererResult<()> {
        // Release the old structure before allocating its replacement.
        self.slots[slot] = None;

        let structure = AccelerationStructure::build_top_level(
            self.device.clone(),
            pool,
            self.device.graphics_queue(),
            &instances,
        )
        .map_err(|e| RendererError::AccelerationStructure(format!("slot {} TLAS: {}", slot, e)))?;

        write_acceleration_structure(
            &self.device,
            sets.dynamic,
            dynamic_binding::TLAS,
            structure.handle(),
        );
        write_acceleration_structure(
            &self.device,
            sets.ui_hi_res,
            ui_hi_res_binding::TLAS,
            structure.handle(),
        );
        debug!("Slot {} TLAS rebuilt with {} instance(s)", slot, instances.len());

        self.slots[slot] = Some(SlotTlas {
            structure,
            instances,
        });
        Ok(())
    }

    pub fn blas_count(&self) -> usize {
        self.blas_addresses.len()
    }
}
