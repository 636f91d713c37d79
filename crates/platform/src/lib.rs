//! Platform layer: the winit window and its Vulkan surface.

mod window;

pub use window::{Surface, Window};

pub use winit::event::{ElementState, KeyEvent, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::keyboard::{KeyCode, PhysicalKey};
