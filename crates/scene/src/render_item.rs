//! GPU-visible draw items and indirect draw commands.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// A 3D draw item; one entry in the per-frame 3D item buffer. 160 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RenderItem3D {
    pub model_matrix: Mat4,
    pub inverse_model_matrix: Mat4,
    pub mesh_index: u32,
    pub base_color_texture_index: u32,
    pub normal_texture_index: u32,
    pub rma_texture_index: u32,
    pub vertex_offset: u32,
    pub index_offset: u32,
    /// First bone matrix in the animated transform buffer; skinned items only.
    pub animated_transforms_offset: u32,
    pub _padding: u32,
}

impl Default for RenderItem3D {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, 0)
    }
}

impl RenderItem3D {
    pub fn new(model_matrix: Mat4, mesh_index: u32) -> Self {
        Self {
            model_matrix,
            inverse_model_matrix: model_matrix.inverse(),
            mesh_index,
            base_color_texture_index: 0,
            normal_texture_index: 0,
            rma_texture_index: 0,
            vertex_offset: 0,
            index_offset: 0,
            animated_transforms_offset: 0,
            _padding: 0,
        }
    }

    pub fn with_textures(mut self, base_color: u32, normal: u32, rma: u32) -> Self {
        self.base_color_texture_index = base_color;
        self.normal_texture_index = normal;
        self.rma_texture_index = rma;
        self
    }

    pub fn with_geometry_offsets(mut self, vertex_offset: u32, index_offset: u32) -> Self {
        self.vertex_offset = vertex_offset;
        self.index_offset = index_offset;
        self
    }

    /// Record the closest-hit shader looks up through the instance's
    /// custom index.
    pub fn instance_data(&self) -> GeometryInstanceData {
        GeometryInstanceData {
            mesh_index: self.mesh_index,
            vertex_offset: self.vertex_offset,
            index_offset: self.index_offset,
            base_color_texture_index: self.base_color_texture_index,
            normal_texture_index: self.normal_texture_index,
            rma_texture_index: self.rma_texture_index,
            _padding: [0; 2],
        }
    }
}

/// A 2D (UI) draw item; one quad instance. 96 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RenderItem2D {
    pub model_matrix: Mat4,
    pub color_tint: Vec4,
    pub texture_index: u32,
    pub _padding: [u32; 3],
}

impl Default for RenderItem2D {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, 0)
    }
}

impl RenderItem2D {
    pub fn new(model_matrix: Mat4, texture_index: u32) -> Self {
        Self {
            model_matrix,
            color_tint: Vec4::ONE,
            texture_index,
            _padding: [0; 3],
        }
    }

    pub fn with_tint(mut self, tint: Vec4) -> Self {
        self.color_tint = tint;
        self
    }
}

/// Per-instance geometry lookup for ray-tracing hit shaders. 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GeometryInstanceData {
    pub mesh_index: u32,
    pub vertex_offset: u32,
    pub index_offset: u32,
    pub base_color_texture_index: u32,
    pub normal_texture_index: u32,
    pub rma_texture_index: u32,
    pub _padding: [u32; 2],
}

/// Layout-compatible with `VkDrawIndexedIndirectCommand`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// Destination rectangle of the present-to-full-size blit, in pixels of the
/// full-size image. `(x0, y0)` is the top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlitDstCoords {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl BlitDstCoords {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Covers a whole `width` x `height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn min(&self) -> [i32; 2] {
        [self.x0, self.y0]
    }

    pub fn max(&self) -> [i32; 2] {
        [self.x1, self.y1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_gpu_struct_sizes() {
        assert_eq!(std::mem::size_of::<RenderItem3D>(), 160);
        assert_eq!(std::mem::size_of::<RenderItem2D>(), 96);
        assert_eq!(std::mem::size_of::<GeometryInstanceData>(), 32);
        assert_eq!(std::mem::size_of::<DrawIndexedIndirectCommand>(), 20);
    }

    #[test]
    fn test_render_item_3d_inverse() {
        let model = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let item = RenderItem3D::new(model, 4);
        assert!((item.model_matrix * item.inverse_model_matrix).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert_eq!(item.mesh_index, 4);
    }

    #[test]
    fn test_instance_data_copies_lookup_fields() {
        let item = RenderItem3D::new(Mat4::IDENTITY, 2)
            .with_textures(5, 6, 7)
            .with_geometry_offsets(100, 300);
        let data = item.instance_data();
        assert_eq!(data.mesh_index, 2);
        assert_eq!(data.vertex_offset, 100);
        assert_eq!(data.index_offset, 300);
        assert_eq!(
            [data.base_color_texture_index, data.normal_texture_index, data.rma_texture_index],
            [5, 6, 7]
        );
    }

    #[test]
    fn test_blit_coords_full() {
        let coords = BlitDstCoords::full(1920, 1080);
        assert_eq!(coords.min(), [0, 0]);
        assert_eq!(coords.max(), [1920, 1080]);
    }
}
