mod pixel_buffer;
#[cfg(feature = "viewer")]
mod window;

pub use pixel_buffer::{tonemap, PixelBuffer};
#[cfg(feature = "viewer")]
pub use window::{Display, InputEvent, MouseButtonKind, RenderTarget};
