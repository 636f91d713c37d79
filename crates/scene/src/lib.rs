//! Per-frame scene snapshot types.
//!
//! This crate provides the data the renderer consumes each frame:
//! - Camera and its GPU block
//! - Lights
//! - 2D/3D draw items and indirect draw commands
//! - [`RenderData`], the full snapshot of one view

pub mod camera;
pub mod light;
pub mod render_data;
pub mod render_item;

pub use camera::{Camera, CameraData, Projection};
pub use light::{GpuLight, PointLight};
pub use render_data::{DebugVertex, RenderData};
pub use render_item::{
    BlitDstCoords, DrawIndexedIndirectCommand, GeometryInstanceData, RenderItem2D, RenderItem3D,
};
