//! GPU copies of the geometry and textures an [`AssetProvider`] exposes.
//!
//! All static meshes share one vertex buffer and one index buffer; skinned
//! meshes share a second pair. Meshes are addressed by [`MeshRange`]s into
//! those buffers, which is also what the bottom-level acceleration
//! structures and the indirect draw commands reference.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::command::CommandPool;
use lumen_rhi::device::Device;
use lumen_rhi::image::{Image, full_subresource_range};
use lumen_rhi::vertex::{Vertex, WeightedVertex};

use crate::error::{RendererError, RendererResult};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// A mesh inside the shared vertex and index buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshRange {
    pub base_vertex: u32,
    pub vertex_count: u32,
    pub base_index: u32,
    pub index_count: u32,
}

impl MeshRange {
    /// Whether the range lies inside buffers of the given lengths.
    pub fn fits(&self, vertex_len: usize, index_len: usize) -> bool {
        let vertex_end = self.base_vertex as u64 + self.vertex_count as u64;
        let index_end = self.base_index as u64 + self.index_count as u64;
        vertex_end <= vertex_len as u64 && index_end <= index_len as u64
    }
}

/// Tightly packed RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn solid(color: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: color.to_vec(),
        }
    }

    pub fn validate(&self) -> RendererResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RendererError::Asset(format!(
                "texture has a zero dimension: {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if self.pixels.len() != expected {
            return Err(RendererError::Asset(format!(
                "texture {}x{} needs {} bytes of RGBA8, got {}",
                self.width,
                self.height,
                expected,
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

/// Read-only access to loaded assets. Indices stay stable while a frame is
/// being rendered.
pub trait AssetProvider {
    fn vertices(&self) -> &[Vertex];
    fn indices(&self) -> &[u32];
    fn weighted_vertices(&self) -> &[WeightedVertex];
    fn weighted_indices(&self) -> &[u32];

    fn mesh_count(&self) -> usize;
    fn mesh(&self, index: usize) -> Option<MeshRange>;
    /// Unit quad used for UI items and full-screen passes.
    fn quad_mesh(&self) -> MeshRange;

    fn skinned_mesh_count(&self) -> usize;
    fn skinned_mesh(&self, index: usize) -> Option<MeshRange>;

    fn texture_count(&self) -> usize;
    fn texture(&self, index: usize) -> Option<&TextureData>;
}

fn collect_ranges(
    kind: &str,
    count: usize,
    get: impl Fn(usize) -> Option<MeshRange>,
    vertex_len: usize,
    index_len: usize,
) -> RendererResult<Vec<MeshRange>> {
    (0..count)
        .map(|i| {
            let range = get(i)
                .ok_or_else(|| RendererError::Asset(format!("{} {} is missing", kind, i)))?;
            if !range.fits(vertex_len, index_len) {
                return Err(RendererError::Asset(format!(
                    "{} {} {:?} lies outside {} vertices / {} indices",
                    kind, i, range, vertex_len, index_len
                )));
            }
            Ok(range)
        })
        .collect()
}

/// Uploads `bytes` into a geometry buffer. Vulkan rejects empty buffers, so
/// an empty slice still gets `placeholder` zeroed bytes.
fn geometry_buffer(
    device: &Arc<Device>,
    usage: BufferUsage,
    bytes: &[u8],
    placeholder: usize,
) -> RendererResult<Buffer> {
    if bytes.is_empty() {
        let zeros = vec![0u8; placeholder];
        return Ok(Buffer::new_with_data(device.clone(), usage, &zeros)?);
    }
    Ok(Buffer::new_with_data(device.clone(), usage, bytes)?)
}

/// Geometry buffers, mesh tables and textures on the GPU.
pub struct GpuAssets {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub weighted_vertex_buffer: Buffer,
    pub weighted_index_buffer: Buffer,
    meshes: Vec<MeshRange>,
    skinned_meshes: Vec<MeshRange>,
    quad: MeshRange,
    textures: Vec<Image>,
}

impl GpuAssets {
    pub fn upload(
        device: &Arc<Device>,
        pool: &CommandPool,
        queue: vk::Queue,
        provider: &dyn AssetProvider,
    ) -> RendererResult<Self> {
        let vertices = provider.vertices();
        let indices = provider.indices();
        let meshes = collect_ranges(
            "mesh",
            provider.mesh_count(),
            |i| provider.mesh(i),
            vertices.len(),
            indices.len(),
        )?;
        let quad = provider.quad_mesh();
        if quad.index_count == 0 || !quad.fits(vertices.len(), indices.len()) {
            return Err(RendererError::Asset(format!("quad mesh {:?} is unusable", quad)));
        }
        let skinned_meshes = collect_ranges(
            "skinned mesh",
            provider.skinned_mesh_count(),
            |i| provider.skinned_mesh(i),
            provider.weighted_vertices().len(),
            provider.weighted_indices().len(),
        )?;

        let vertex_buffer = geometry_buffer(
            device,
            BufferUsage::Vertex,
            bytemuck::cast_slice(vertices),
            std::mem::size_of::<Vertex>(),
        )?;
        let index_buffer = geometry_buffer(
            device,
            BufferUsage::Index,
            bytemuck::cast_slice(indices),
            std::mem::size_of::<u32>(),
        )?;
        let weighted_vertex_buffer = geometry_buffer(
            device,
            BufferUsage::Vertex,
            bytemuck::cast_slice(provider.weighted_vertices()),
            std::mem::size_of::<WeightedVertex>(),
        )?;
        let weighted_index_buffer = geometry_buffer(
            device,
            BufferUsage::Index,
            bytemuck::cast_slice(provider.weighted_indices()),
            std::mem::size_of::<u32>(),
        )?;

        let textures = upload_textures(device, pool, queue, provider)?;

        info!(
            "Assets uploaded: {} vertices, {} indices, {} mesh(es), {} skinned mesh(es), {} texture(s)",
            vertices.len(),
            indices.len(),
            meshes.len(),
            skinned_meshes.len(),
            textures.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            weighted_vertex_buffer,
            weighted_index_buffer,
            meshes,
            skinned_meshes,
            quad,
            textures,
        })
    }

    /// Replaces every texture with the provider's current set. The caller
    /// waits for the GPU first and rewrites the texture descriptors after.
    pub fn reload_textures(
        &mut self,
        device: &Arc<Device>,
        pool: &CommandPool,
        queue: vk::Queue,
        provider: &dyn AssetProvider,
    ) -> RendererResult<()> {
        self.textures = upload_textures(device, pool, queue, provider)?;
        Ok(())
    }

    #[inline]
    pub fn meshes(&self) -> &[MeshRange] {
        &self.meshes
    }

    #[inline]
    pub fn skinned_mesh(&self, index: u32) -> Option<MeshRange> {
        self.skinned_meshes.get(index as usize).copied()
    }

    #[inline]
    pub fn quad(&self) -> MeshRange {
        self.quad
    }

    pub fn texture_views(&self) -> Vec<vk::ImageView> {
        self.textures.iter().map(Image::view).collect()
    }
}

fn upload_textures(
    device: &Arc<Device>,
    pool: &CommandPool,
    queue: vk::Queue,
    provider: &dyn AssetProvider,
) -> RendererResult<Vec<Image>> {
    if provider.texture_count() == 0 {
        return Err(RendererError::Asset(
            "at least one texture is required to fill the texture array".into(),
        ));
    }
    (0..provider.texture_count())
        .map(|i| {
            let texture = provider
                .texture(i)
                .ok_or_else(|| RendererError::Asset(format!("texture {} is missing", i)))?;
            upload_texture(device, pool, queue, &format!("texture_{}", i), texture)
        })
        .collect()
}

fn upload_texture(
    device: &Arc<Device>,
    pool: &CommandPool,
    queue: vk::Queue,
    name: &str,
    texture: &TextureData,
) -> RendererResult<Image> {
    texture.validate()?;
    let extent = vk::Extent2D {
        width: texture.width,
        height: texture.height,
    };
    let image = Image::new(
        device.clone(),
        name,
        TEXTURE_FORMAT,
        extent,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
    )?;
    let staging = Buffer::new_with_data(device.clone(), BufferUsage::Staging, &texture.pixels)?;

    let range = full_subresource_range(vk::ImageAspectFlags::COLOR);
    let to_transfer = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::NONE)
        .dst_stage_mask(vk::PipelineStageFlags2::COPY)
        .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .image(image.handle())
        .subresource_range(range);
    let to_sampled = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::COPY)
        .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
        .dst_stage_mask(
            vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        )
        .dst_access_mask(vk::AccessFlags2::SHADER_SAMPLED_READ)
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .image(image.handle())
        .subresource_range(range);

    pool.submit_once(queue, |cmd| {
        cmd.pipeline_barrier2(&[], &[to_transfer]);
        cmd.copy_buffer_to_image(staging.handle(), image.handle(), extent);
        cmd.pipeline_barrier2(&[], &[to_sampled]);
    })?;

    debug!("Uploaded {} ({}x{})", name, texture.width, texture.height);
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_range_fits() {
        let range = MeshRange {
            base_vertex: 4,
            vertex_count: 4,
            base_index: 6,
            index_count: 6,
        };
        assert!(range.fits(8, 12));
        assert!(!range.fits(7, 12));
        assert!(!range.fits(8, 11));
    }

    #[test]
    fn test_collect_ranges_reports_missing_and_out_of_bounds() {
        let good = MeshRange {
            base_vertex: 0,
            vertex_count: 3,
            base_index: 0,
            index_count: 3,
        };
        let ranges = collect_ranges("mesh", 2, |_| Some(good), 3, 3).unwrap();
        assert_eq!(ranges.len(), 2);

        let missing = collect_ranges("mesh", 1, |_| None, 3, 3).unwrap_err();
        assert!(missing.to_string().contains("mesh 0 is missing"));

        let outside = collect_ranges("mesh", 1, |_| Some(good), 2, 3).unwrap_err();
        assert!(matches!(outside, RendererError::Asset(_)));
    }

    #[test]
    fn test_texture_validation() {
        assert!(TextureData::solid([255; 4]).validate().is_ok());

        let short = TextureData {
            width: 2,
            height: 2,
            pixels: vec![0; 15],
        };
        assert!(short.validate().is_err());

        let empty = TextureData {
            width: 0,
            height: 4,
            pixels: Vec::new(),
        };
        assert!(empty.validate().is_err());
    }
}
