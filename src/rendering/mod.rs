pub mod compositor;
pub mod images;

pub use compositor::Compositor;
pub use images::{RevealImages, RgbaImage};
