//! Software textures with the same addressing rules as the GPU samplers:
//! clamp-to-edge, texel centres at `(i + 0.5) / size`, bilinear or nearest.

use glam::{Vec2, Vec4};
use half::f16;

use crate::simulation::field::{FilterMode, Precision};

#[derive(Debug, Clone, Default)]
pub struct CpuTexture {
    pub width: u32,
    pub height: u32,
    /// Channels actually stored; the rest read as zero.
    pub channels: usize,
    pub precision: Option<Precision>,
    pub texels: Vec<Vec4>,
}

impl CpuTexture {
    pub fn zeroed(width: u32, height: u32, channels: usize, precision: Precision) -> Self {
        Self {
            width,
            height,
            channels,
            precision: Some(precision),
            texels: vec![Vec4::ZERO; (width as usize) * (height as usize)],
        }
    }

    /// Normalised 8-bit RGBA, as an `Rgba8Unorm` texture would sample.
    pub fn from_rgba8(width: u32, height: u32, rgba: &[u8]) -> Self {
        let texels = rgba
            .chunks_exact(4)
            .map(|px| Vec4::new(px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32) / 255.0)
            .collect();
        Self {
            width,
            height,
            channels: 4,
            precision: None,
            texels,
        }
    }

    /// Texel at integer coordinates, clamped to the edge.
    pub fn fetch(&self, x: i64, y: i64) -> Vec4 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.texels[y * self.width as usize + x]
    }

    pub fn sample(&self, uv: Vec2, filter: FilterMode) -> Vec4 {
        let (w, h) = (self.width as f32, self.height as f32);
        match filter {
            FilterMode::Nearest => self.fetch((uv.x * w).floor() as i64, (uv.y * h).floor() as i64),
            FilterMode::Linear => {
                let x = uv.x * w - 0.5;
                let y = uv.y * h - 0.5;
                let (x0, y0) = (x.floor(), y.floor());
                let (fx, fy) = (x - x0, y - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);

                let top = self.fetch(x0, y0).lerp(self.fetch(x0 + 1, y0), fx);
                let bottom = self.fetch(x0, y0 + 1).lerp(self.fetch(x0 + 1, y0 + 1), fx);
                top.lerp(bottom, fy)
            }
        }
    }

    /// Texel-centre UV of `(x, y)`.
    pub fn texel_center(&self, x: u32, y: u32) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }
}

/// Drop channels beyond `channels` and round to the storage precision.
pub fn quantize(value: Vec4, channels: usize, precision: Option<Precision>) -> Vec4 {
    let mut out = Vec4::ZERO;
    for i in 0..channels.min(4) {
        out[i] = match precision {
            Some(Precision::Half) => f16::from_f32(value[i]).to_f32(),
            _ => value[i],
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> CpuTexture {
        // 4x1, values 0, 1, 2, 3
        let mut tex = CpuTexture::zeroed(4, 1, 1, Precision::Full);
        for (i, t) in tex.texels.iter_mut().enumerate() {
            *t = Vec4::new(i as f32, 0.0, 0.0, 0.0);
        }
        tex
    }

    #[test]
    fn test_linear_sample_at_texel_center_is_exact() {
        let tex = ramp();
        for x in 0..4 {
            let v = tex.sample(tex.texel_center(x, 0), FilterMode::Linear);
            assert!((v.x - x as f32).abs() < 1e-6);
        }
    }

    #[test]
    fn test_linear_sample_interpolates_between_centers() {
        let tex = ramp();
        let v = tex.sample(Vec2::new(0.25, 0.5), FilterMode::Linear);
        assert!((v.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sampling_clamps_to_edge() {
        let tex = ramp();
        assert_eq!(tex.sample(Vec2::new(-0.5, 0.5), FilterMode::Linear).x, 0.0);
        assert_eq!(tex.sample(Vec2::new(1.5, 0.5), FilterMode::Linear).x, 3.0);
        assert_eq!(tex.sample(Vec2::new(1.5, 0.5), FilterMode::Nearest).x, 3.0);
    }

    #[test]
    fn test_nearest_picks_containing_texel() {
        let tex = ramp();
        assert_eq!(tex.sample(Vec2::new(0.49, 0.5), FilterMode::Nearest).x, 1.0);
        assert_eq!(tex.sample(Vec2::new(0.51, 0.5), FilterMode::Nearest).x, 2.0);
    }

    #[test]
    fn test_quantize_masks_missing_channels() {
        let out = quantize(Vec4::new(0.1, 0.2, 0.3, 1.0), 2, Some(Precision::Half));
        assert_eq!(out.z, 0.0);
        assert_eq!(out.w, 0.0);
        assert!((out.x - 0.1).abs() < 1e-3);
        assert_ne!(out.x, 0.1);
    }
}
