//! Vertex formats and their pipeline input descriptions.
//!
//! Two vertex structs live in GPU buffers: [`Vertex`] for static geometry,
//! UI quads and debug meshes, and [`WeightedVertex`] for skinned meshes.
//! Pipelines pick which attributes they read through a [`VertexLayout`].

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Static mesh vertex.
///
/// Layout: position (0), normal (12), tex_coord (24), tangent (32); 48 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
    /// Tangent with handedness in `w`.
    pub tangent: Vec4,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, tex_coord: Vec2, tangent: Vec4) -> Self {
        Self {
            position,
            normal,
            tex_coord,
            tangent,
        }
    }

    /// A debug vertex: the normal slot carries the line or point colour.
    #[inline]
    pub const fn colored(position: Vec3, color: Vec3) -> Self {
        Self::new(position, color, Vec2::ZERO, Vec4::ZERO)
    }
}

/// Skinned mesh vertex with four bone influences; 80 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct WeightedVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
    pub tangent: Vec4,
    pub bone_ids: [i32; 4],
    pub weights: Vec4,
}

/// Which vertex attributes a pipeline consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexLayout {
    /// Every [`Vertex`] attribute.
    All,
    /// Every [`WeightedVertex`] attribute.
    AllWeighted,
    /// Position and texture coordinate of a [`Vertex`] (UI and full-screen quads).
    PositionTexCoord,
    /// Position and normal of a [`Vertex`] (debug lines and points).
    PositionNormal,
}

const fn attribute(location: u32, format: vk::Format, offset: u32) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset,
    }
}

const POSITION: vk::VertexInputAttributeDescription = attribute(0, vk::Format::R32G32B32_SFLOAT, 0);
const NORMAL: vk::VertexInputAttributeDescription = attribute(1, vk::Format::R32G32B32_SFLOAT, 12);
const TEX_COORD: vk::VertexInputAttributeDescription = attribute(2, vk::Format::R32G32_SFLOAT, 24);
const TANGENT: vk::VertexInputAttributeDescription =
    attribute(3, vk::Format::R32G32B32A32_SFLOAT, 32);

impl VertexLayout {
    pub fn stride(self) -> u32 {
        match self {
            VertexLayout::AllWeighted => std::mem::size_of::<WeightedVertex>() as u32,
            _ => std::mem::size_of::<Vertex>() as u32,
        }
    }

    pub fn binding_description(self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions(self) -> Vec<vk::VertexInputAttributeDescription> {
        match self {
            VertexLayout::All => vec![POSITION, NORMAL, TEX_COORD, TANGENT],
            VertexLayout::AllWeighted => vec![
                POSITION,
                NORMAL,
                TEX_COORD,
                TANGENT,
                attribute(4, vk::Format::R32G32B32A32_SINT, 48),
                attribute(5, vk::Format::R32G32B32A32_SFLOAT, 64),
            ],
            VertexLayout::PositionTexCoord => {
                vec![POSITION, attribute(1, vk::Format::R32G32_SFLOAT, 24)]
            }
            VertexLayout::PositionNormal => vec![POSITION, NORMAL],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_vertex_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        assert_eq!(std::mem::size_of::<WeightedVertex>(), 80);
    }

    #[test]
    fn test_attribute_offsets_match_fields() {
        assert_eq!(offset_of!(Vertex, normal) as u32, NORMAL.offset);
        assert_eq!(offset_of!(Vertex, tex_coord) as u32, TEX_COORD.offset);
        assert_eq!(offset_of!(Vertex, tangent) as u32, TANGENT.offset);
        assert_eq!(offset_of!(WeightedVertex, bone_ids), 48);
        assert_eq!(offset_of!(WeightedVertex, weights), 64);
    }

    #[test]
    fn test_layout_strides() {
        assert_eq!(VertexLayout::All.stride(), 48);
        assert_eq!(VertexLayout::PositionTexCoord.stride(), 48);
        assert_eq!(VertexLayout::AllWeighted.stride(), 80);
    }

    #[test]
    fn test_position_tex_coord_uses_two_locations() {
        let attrs = VertexLayout::PositionTexCoord.attribute_descriptions();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].offset, 24);
    }

    #[test]
    fn test_weighted_layout_has_bone_attributes() {
        let attrs = VertexLayout::AllWeighted.attribute_descriptions();
        assert_eq!(attrs.len(), 6);
        assert_eq!(attrs[4].format, vk::Format::R32G32B32A32_SINT);
    }

    #[test]
    fn test_colored_vertex_stores_color_in_normal() {
        let v = Vertex::colored(Vec3::ONE, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(v.normal, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(bytemuck::bytes_of(&v).len(), 48);
    }
}
