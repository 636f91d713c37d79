//! Core utilities shared by every lumen crate.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Renderer configuration
//! - Frame timing

mod config;
mod error;
mod logging;
mod timer;

pub use config::{RendererConfig, TlasRebuildPolicy};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::FrameTimer;
