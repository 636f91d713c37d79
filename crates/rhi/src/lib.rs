//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin RAII wrappers over `ash` used by the renderer:
//! - Instance, physical device selection and logical device creation
//! - Swapchain management
//! - Command recording, including ray tracing and synchronization2 barriers
//! - Buffers, images and samplers backed by gpu-allocator
//! - Graphics and ray-tracing pipelines, descriptor sets
//! - Acceleration structures
//! - Synchronization primitives

mod error;

pub mod acceleration;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod raytracing;
pub mod rendering;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
