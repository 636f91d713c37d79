//! Per-frame snapshot handed to the renderer.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::camera::CameraData;
use crate::light::GpuLight;
use crate::render_item::{
    BlitDstCoords, DrawIndexedIndirectCommand, GeometryInstanceData, RenderItem2D, RenderItem3D,
};

/// A coloured point of a debug line or point list.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DebugVertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl DebugVertex {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }
}

/// Everything the renderer needs to draw one view of one frame.
///
/// Built by the caller every frame and consumed by
/// `RendererContext::render_game`. `player_index` 0 is the primary view:
/// only it rebuilds the TLAS and uploads lights, which all views of a frame
/// share.
#[derive(Clone, Debug, Default)]
pub struct RenderData {
    pub player_index: u32,
    pub camera: CameraData,
    pub render_items_2d: Vec<RenderItem2D>,
    pub render_items_2d_hi_res: Vec<RenderItem2D>,
    pub render_items_3d: Vec<RenderItem3D>,
    pub animated_render_items_3d: Vec<RenderItem3D>,
    pub lights: Vec<GpuLight>,
    pub animated_transforms: Vec<Mat4>,
    /// One command per entry of `render_items_3d`; `first_instance` is the
    /// item's index.
    pub draw_commands: Vec<DrawIndexedIndirectCommand>,
    pub debug_lines: Vec<DebugVertex>,
    pub debug_points: Vec<DebugVertex>,
    pub blit_dst_coords_present: BlitDstCoords,
}

impl RenderData {
    pub fn is_primary_view(&self) -> bool {
        self.player_index == 0
    }

    pub fn instance_data(&self) -> Vec<GeometryInstanceData> {
        self.render_items_3d
            .iter()
            .map(RenderItem3D::instance_data)
            .collect()
    }
}
