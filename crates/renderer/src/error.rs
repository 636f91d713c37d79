//! Renderer error type.

use lumen_rhi::RhiError;
use thiserror::Error;

/// Errors surfaced by the renderer. All of them abort the current frame.
#[derive(Error, Debug)]
pub enum RendererError {
    /// GPU object creation, allocation or submission failure
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Configuration, window or shader-file failure
    #[error(transparent)]
    Core(#[from] lumen_core::Error),

    /// Cyclic or malformed frame graph
    #[error("Frame graph error: {0}")]
    FrameGraph(String),

    /// Acceleration structure build or lookup failure
    #[error("Acceleration structure error: {0}")]
    AccelerationStructure(String),

    /// Render targets missing, e.g. after a failed recreation
    #[error("Render target error: {0}")]
    RenderTargets(String),

    /// The asset provider returned something unusable
    #[error("Asset error: {0}")]
    Asset(String),
}

impl From<ash::vk::Result> for RendererError {
    fn from(result: ash::vk::Result) -> Self {
        RendererError::Rhi(RhiError::VulkanError(result))
    }
}

pub type RendererResult<T> = std::result::Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_converts_through_rhi() {
        let err: RendererError = ash::vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, RendererError::Rhi(RhiError::VulkanError(_))));
    }

    #[test]
    fn test_frame_graph_message() {
        let err = RendererError::FrameGraph("cycle through 'lighting'".into());
        assert_eq!(err.to_string(), "Frame graph error: cycle through 'lighting'");
    }
}
