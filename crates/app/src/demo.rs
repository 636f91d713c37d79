//! Built-in demo content: a quad and a cube sharing one vertex and index
//! buffer, a single white texture, and a per-frame scene around them.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use lumen_renderer::{AssetProvider, MeshRange, TextureData};
use lumen_rhi::vertex::{Vertex, WeightedVertex};
use lumen_scene::{
    BlitDstCoords, Camera, DebugVertex, DrawIndexedIndirectCommand, PointLight, RenderData,
    RenderItem2D, RenderItem3D,
};

pub const QUAD_MESH: u32 = 0;
pub const CUBE_MESH: u32 = 1;

/// Static demo geometry and textures.
pub struct DemoAssets {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    meshes: Vec<MeshRange>,
    textures: Vec<TextureData>,
}

impl DemoAssets {
    pub fn new() -> Self {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let quad = push_quad(&mut vertices, &mut indices);
        let cube = push_cube(&mut vertices, &mut indices);
        Self {
            vertices,
            indices,
            meshes: vec![quad, cube],
            textures: vec![TextureData::solid([255, 255, 255, 255])],
        }
    }

    fn range(&self, mesh: u32) -> MeshRange {
        self.meshes[mesh as usize]
    }
}

impl AssetProvider for DemoAssets {
    fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    fn indices(&self) -> &[u32] {
        &self.indices
    }

    fn weighted_vertices(&self) -> &[WeightedVertex] {
        &[]
    }

    fn weighted_indices(&self) -> &[u32] {
        &[]
    }

    fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    fn mesh(&self, index: usize) -> Option<MeshRange> {
        self.meshes.get(index).copied()
    }

    fn quad_mesh(&self) -> MeshRange {
        self.range(QUAD_MESH)
    }

    fn skinned_mesh_count(&self) -> usize {
        0
    }

    fn skinned_mesh(&self, _index: usize) -> Option<MeshRange> {
        None
    }

    fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn texture(&self, index: usize) -> Option<&TextureData> {
        self.textures.get(index)
    }
}

fn vertex(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Vertex {
    let tangent = if normal.y.abs() > 0.9 { Vec3::X } else { normal.cross(Vec3::Y).normalize() };
    Vertex::new(position, normal, tex_coord, tangent.extend(1.0))
}

/// Unit quad in the XY plane, facing +Z.
fn push_quad(vertices: &mut Vec<Vertex>, indices: &mut Vec<u32>) -> MeshRange {
    let base_vertex = vertices.len() as u32;
    let base_index = indices.len() as u32;
    let corners = [
        (Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 1.0)),
        (Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 1.0)),
        (Vec3::new(0.5, 0.5, 0.0), Vec2::new(1.0, 0.0)),
        (Vec3::new(-0.5, 0.5, 0.0), Vec2::new(0.0, 0.0)),
    ];
    vertices.extend(corners.iter().map(|&(p, uv)| vertex(p, Vec3::Z, uv)));
    indices.extend_from_slice(&[0, 1, 2, 2, 3, 0]);
    MeshRange {
        base_vertex,
        vertex_count: 4,
        base_index,
        index_count: 6,
    }
}

/// Unit cube centred on the origin, four vertices per face.
fn push_cube(vertices: &mut Vec<Vertex>, indices: &mut Vec<u32>) -> MeshRange {
    let base_vertex = vertices.len() as u32;
    let base_index = indices.len() as u32;
    let faces = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];

    for (face, normal) in faces.into_iter().enumerate() {
        let rotation = Quat::from_rotation_arc(Vec3::Z, normal);
        let first = (face * 4) as u32;
        for (corner, uv) in [
            (Vec3::new(-0.5, -0.5, 0.5), Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, 0.5), Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.5, 0.5), Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, 0.5, 0.5), Vec2::new(0.0, 0.0)),
        ] {
            vertices.push(vertex(rotation * corner, normal, uv));
        }
        indices.extend([0, 1, 2, 2, 3, 0].map(|i| first + i));
    }

    MeshRange {
        base_vertex,
        vertex_count: 24,
        base_index,
        index_count: 36,
    }
}

/// One draw per item; `first_instance` selects the item in the shaders.
pub fn draw_commands(assets: &DemoAssets, items: &[RenderItem3D]) -> Vec<DrawIndexedIndirectCommand> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let mesh = assets.range(item.mesh_index);
            DrawIndexedIndirectCommand {
                index_count: mesh.index_count,
                instance_count: 1,
                first_index: mesh.base_index,
                vertex_offset: mesh.base_vertex as i32,
                first_instance: i as u32,
            }
        })
        .collect()
}

/// A progress bar filling with `progress` in `0.0..=1.0`, in clip space.
pub fn loading_screen_items(progress: f32) -> Vec<RenderItem2D> {
    let progress = progress.clamp(0.0, 1.0);
    let frame = Mat4::from_scale(Vec3::new(1.2, 0.08, 1.0));
    let fill = Mat4::from_translation(Vec3::new(-0.6 + 0.6 * progress, 0.0, 0.0))
        * Mat4::from_scale(Vec3::new(1.2 * progress, 0.06, 1.0));
    vec![
        RenderItem2D::new(frame, 0).with_tint(Vec4::new(0.2, 0.2, 0.25, 1.0)),
        RenderItem2D::new(fill, 0).with_tint(Vec4::new(0.9, 0.7, 0.2, 1.0)),
    ]
}

/// The game scene at `time` seconds for a `width` x `height` present area,
/// placed at `blit_dst` inside the full-size image.
pub fn game_frame(
    assets: &DemoAssets,
    time: f32,
    width: u32,
    height: u32,
    blit_dst: BlitDstCoords,
) -> RenderData {
    let mut camera = Camera::new();
    camera.position = Vec3::new(0.0, 1.5, 4.0);
    camera.look_at(Vec3::ZERO);
    camera.set_aspect(width.max(1) as f32 / height.max(1) as f32);

    let cube = RenderItem3D::new(
        Mat4::from_rotation_translation(Quat::from_rotation_y(time), Vec3::new(0.0, 0.5, 0.0)),
        CUBE_MESH,
    );
    let floor = RenderItem3D::new(
        Mat4::from_scale_rotation_translation(
            Vec3::splat(6.0),
            Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2),
            Vec3::ZERO,
        ),
        QUAD_MESH,
    );
    let render_items_3d = vec![floor, cube];
    let draw_commands = draw_commands(assets, &render_items_3d);

    let light = PointLight {
        position: Vec3::new(2.0 * time.cos(), 2.5, 2.0 * time.sin()),
        radius: 8.0,
        ..Default::default()
    };

    let crosshair = RenderItem2D::new(Mat4::from_scale(Vec3::splat(0.02)), 0);
    let axis = |direction: Vec3| {
        [
            DebugVertex::new(Vec3::ZERO, direction),
            DebugVertex::new(direction, direction),
        ]
    };

    RenderData {
        player_index: 0,
        camera: camera.gpu_data(Vec4::new(0.0, 0.0, width as f32, height as f32)),
        render_items_2d: vec![crosshair],
        render_items_2d_hi_res: Vec::new(),
        render_items_3d,
        animated_render_items_3d: Vec::new(),
        lights: vec![light.to_gpu()],
        animated_transforms: Vec::new(),
        draw_commands,
        debug_lines: [Vec3::X, Vec3::Y, Vec3::Z].into_iter().flat_map(axis).collect(),
        debug_points: vec![DebugVertex::new(light.position, Vec3::ONE)],
        blit_dst_coords_present: blit_dst,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meshes_share_buffers() {
        let assets = DemoAssets::new();
        let quad = assets.quad_mesh();
        let cube = assets.mesh(CUBE_MESH as usize).unwrap();

        assert_eq!(quad.base_vertex, 0);
        assert_eq!(cube.base_vertex, 4);
        assert_eq!(cube.base_index, 6);
        assert_eq!(assets.vertices().len(), 28);
        assert_eq!(assets.indices().len(), 42);
        assert!(cube.fits(assets.vertices().len(), assets.indices().len()));
    }

    #[test]
    fn test_cube_indices_are_mesh_local() {
        let assets = DemoAssets::new();
        let cube = assets.mesh(CUBE_MESH as usize).unwrap();
        let start = cube.base_index as usize;
        let local = &assets.indices()[start..start + cube.index_count as usize];
        assert!(local.iter().all(|&i| i < cube.vertex_count));
    }

    #[test]
    fn test_draw_commands_follow_items() {
        let assets = DemoAssets::new();
        let frame = game_frame(&assets, 0.0, 768, 432, BlitDstCoords::full(1920, 1080));

        assert_eq!(frame.draw_commands.len(), frame.render_items_3d.len());
        let cube = &frame.draw_commands[1];
        assert_eq!(cube.first_instance, 1);
        assert_eq!(cube.index_count, 36);
        assert_eq!(cube.vertex_offset, 4);
    }

    #[test]
    fn test_single_white_texture() {
        let assets = DemoAssets::new();
        assert_eq!(assets.texture_count(), 1);
        assert!(assets.texture(0).unwrap().validate().is_ok());
    }

    #[test]
    fn test_loading_bar_clamps_progress() {
        let empty = loading_screen_items(-1.0);
        let full = loading_screen_items(2.0);
        assert_eq!(empty.len(), 2);
        assert_eq!(full[1].model_matrix.x_axis.x, 1.2);
        assert_eq!(empty[1].model_matrix.x_axis.x, 0.0);
    }
}
