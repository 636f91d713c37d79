//! Frame orchestration for the lumen renderer.
//!
//! This crate turns a per-frame [`lumen_scene::RenderData`] snapshot into
//! GPU work:
//! - Render targets, descriptor sets and pipelines
//! - A ring of frame slots with per-slot storage buffers
//! - Acceleration structures for the ray-traced pass
//! - The frame graph that orders passes and derives every barrier
//! - Swapchain presentation and resize handling
//!
//! [`RendererContext`] is the entry point.

pub mod acceleration;
pub mod assets;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod frame_graph;
pub mod frame_ring;
pub mod passes;
pub mod pipelines;
pub mod presenter;
pub mod targets;

pub use assets::{AssetProvider, MeshRange, TextureData};
pub use context::RendererContext;
pub use error::{RendererError, RendererResult};
pub use frame_graph::{FrameGraph, ImageState, ImageUsage};
pub use pipelines::{ShaderSource, SpirvDirectory};
