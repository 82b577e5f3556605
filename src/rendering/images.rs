//! The two images the reveal blends between.
//!
//! Images load through the `image` crate; when a path is missing or fails to
//! decode, a generated placeholder takes its place so the app still runs.

use std::path::Path;

/// Side length of a generated placeholder.
pub const PLACEHOLDER_SIZE: u32 = 512;

/// Largest image side uploaded as-is. Matches the 2D texture limit every wgpu
/// adapter guarantees.
pub const MAX_IMAGE_DIMENSION: u32 = 2048;

/// Tightly packed RGBA8, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaImage {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]]
    }

    pub fn load(path: &Path) -> Result<Self, image::ImageError> {
        Ok(Self::from_decoded(image::open(path)?.to_rgba8()))
    }

    /// Take a decoded image, shrinking it to fit [`MAX_IMAGE_DIMENSION`] with the
    /// aspect ratio kept.
    pub fn from_decoded(decoded: image::RgbaImage) -> Self {
        let (width, height) = decoded.dimensions();
        let longest = width.max(height);
        let decoded = if longest > MAX_IMAGE_DIMENSION {
            let scale = MAX_IMAGE_DIMENSION as f64 / longest as f64;
            let target_w = ((width as f64 * scale).round() as u32).clamp(1, MAX_IMAGE_DIMENSION);
            let target_h = ((height as f64 * scale).round() as u32).clamp(1, MAX_IMAGE_DIMENSION);
            log::info!("Downscaling {}x{} image to {}x{}", width, height, target_w, target_h);
            image::imageops::resize(&decoded, target_w, target_h, image::imageops::FilterType::Triangle)
        } else {
            decoded
        };
        Self {
            width: decoded.width(),
            height: decoded.height(),
            pixels: decoded.into_raw(),
        }
    }
}

/// Which of the two images a placeholder stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Top,
    Bottom,
}

impl Layer {
    fn label(self) -> &'static str {
        match self {
            Layer::Top => "TOP",
            Layer::Bottom => "BOTTOM",
        }
    }

    /// Gradient start and end colors, then the label color.
    fn palette(self) -> ([f32; 3], [f32; 3], [u8; 3]) {
        match self {
            Layer::Top => ([0.10, 0.16, 0.35], [0.35, 0.55, 0.85], [240, 240, 250]),
            Layer::Bottom => ([0.45, 0.12, 0.08], [0.95, 0.65, 0.20], [20, 16, 12]),
        }
    }
}

pub struct RevealImages {
    pub top: RgbaImage,
    pub bottom: RgbaImage,
}

impl RevealImages {
    /// Load both images, substituting a placeholder for each one that fails.
    pub fn load(top: Option<&Path>, bottom: Option<&Path>) -> Self {
        Self {
            top: load_or_placeholder(top, Layer::Top),
            bottom: load_or_placeholder(bottom, Layer::Bottom),
        }
    }

    pub fn placeholders() -> Self {
        Self {
            top: placeholder(Layer::Top),
            bottom: placeholder(Layer::Bottom),
        }
    }
}

fn load_or_placeholder(path: Option<&Path>, layer: Layer) -> RgbaImage {
    let Some(path) = path else {
        log::info!("No {} image configured, using placeholder", layer.label().to_lowercase());
        return placeholder(layer);
    };
    match RgbaImage::load(path) {
        Ok(image) => {
            log::info!("Loaded {:?} ({}x{})", path, image.width, image.height);
            image
        }
        Err(e) => {
            log::warn!("Failed to load {:?}: {}. Using placeholder.", path, e);
            placeholder(layer)
        }
    }
}

/// 5x7 bitmaps, one row per byte, low five bits, MSB on the left.
fn glyph(c: char) -> [u8; 7] {
    match c {
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        _ => [0; 7],
    }
}

/// Vertical gradient with the layer name written across the middle.
pub fn placeholder(layer: Layer) -> RgbaImage {
    let size = PLACEHOLDER_SIZE;
    let (from, to, ink) = layer.palette();
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        let t = y as f32 / (size - 1) as f32;
        let row = [0usize, 1, 2].map(|i| ((from[i] + (to[i] - from[i]) * t) * 255.0).round() as u8);
        for _ in 0..size {
            pixels.extend_from_slice(&[row[0], row[1], row[2], 255]);
        }
    }

    let label = layer.label();
    let scale = 12;
    let advance = 6 * scale;
    let text_width = label.len() as u32 * advance - scale;
    let left = (size - text_width) / 2;
    let top = (size - 7 * scale) / 2;

    for (i, c) in label.chars().enumerate() {
        let origin_x = left + i as u32 * advance;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..5 {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = origin_x + col * scale + dx;
                        let y = top + row as u32 * scale + dy;
                        let idx = ((y * size + x) * 4) as usize;
                        pixels[idx..idx + 3].copy_from_slice(&ink);
                    }
                }
            }
        }
    }

    RgbaImage {
        width: size,
        height: size,
        pixels,
    }
}
