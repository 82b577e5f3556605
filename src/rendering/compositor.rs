//! Final pass: blend the two images through the density mask onto the screen.

use glam::Vec2;

use super::images::RevealImages;
use crate::config::CompositeConfig;
use crate::simulation::backend::FluidBackend;
use crate::simulation::pass::{Bindings, Pass};
use crate::simulation::programs::ProgramRegistry;
use crate::simulation::stages::{Param, StageId};

pub struct Compositor<F> {
    top: F,
    bottom: F,
    reveal_low: f32,
    reveal_high: f32,
}

impl<F> Compositor<F> {
    /// Upload both images to the backend.
    pub fn new<B: FluidBackend<Field = F>>(backend: &mut B, images: &RevealImages, config: &CompositeConfig) -> Self {
        let top = backend.create_image(images.top.width, images.top.height, &images.top.pixels);
        let bottom = backend.create_image(images.bottom.width, images.bottom.height, &images.bottom.pixels);
        Self {
            top,
            bottom,
            reveal_low: config.reveal_low,
            reveal_high: config.reveal_high,
        }
    }

    pub fn set_reveal_range(&mut self, low: f32, high: f32) {
        self.reveal_low = low;
        self.reveal_high = high;
    }

    /// Draw `density` over the whole display. The field is resampled to display resolution.
    pub fn composite<B: FluidBackend<Field = F>>(
        &self,
        backend: &mut B,
        registry: &ProgramRegistry<B::Program>,
        density: &F,
        display_size: (u32, u32),
    ) {
        let (width, height) = display_size;
        let bindings = Bindings::new()
            .vec2(Param::TexelSize, Vec2::new(1.0 / width as f32, 1.0 / height as f32))
            .float(Param::RevealLow, self.reveal_low)
            .float(Param::RevealHigh, self.reveal_high)
            .texture(Param::DensityField, density)
            .texture(Param::TopImage, &self.top)
            .texture(Param::BottomImage, &self.bottom);
        registry.run(backend, &Pass::to_screen(StageId::Display, width, height, bindings));
    }

    pub fn release<B: FluidBackend<Field = F>>(self, backend: &mut B) {
        backend.release(self.top);
        backend.release(self.bottom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::images::{placeholder, Layer};
    use crate::simulation::cpu::{CpuBackend, CpuField, CpuProgram, Frame};
    use crate::simulation::field::{ChannelLayout, FieldDesc, FieldFormat, FilterMode, Precision};

    /// Density field filled with `value` in channel 0.
    fn density_field(backend: &mut CpuBackend, registry: &ProgramRegistry<CpuProgram>, value: f32) -> CpuField {
        let desc = FieldDesc {
            width: 8,
            height: 8,
            format: FieldFormat::new(ChannelLayout::Rgba, Precision::Half),
            filter: FilterMode::Linear,
        };
        let zero = backend.create_field(&desc);
        let target = backend.create_field(&desc);
        // Splat with a huge radius is a flat fill.
        let bindings = Bindings::new()
            .vec2(Param::TexelSize, Vec2::splat(1.0 / 8.0))
            .float(Param::AspectRatio, 1.0)
            .vec2(Param::Point, Vec2::splat(0.5))
            .float(Param::Radius, 1.0e9)
            .vec3(Param::Color, glam::Vec3::splat(value))
            .texture(Param::TargetField, &zero);
        registry.run(backend, &Pass::to_field(StageId::Splat, &target, bindings));
        target
    }

    fn composite_with(value: f32) -> Frame {
        let mut backend = CpuBackend::new();
        let registry = ProgramRegistry::build(&mut backend, FilterMode::Linear).unwrap();
        let compositor = Compositor::new(&mut backend, &RevealImages::placeholders(), &CompositeConfig::default());
        let density = density_field(&mut backend, &registry, value);
        compositor.composite(&mut backend, &registry, &density, (64, 64));
        backend.frame().clone()
    }

    fn close(a: [u8; 4], b: [u8; 4]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (*x as i32 - *y as i32).abs() <= 8)
    }

    #[test]
    fn test_zero_density_shows_top_image() {
        let frame = composite_with(0.0);
        assert_eq!((frame.width, frame.height), (64, 64));
        let top = placeholder(Layer::Top);
        // Frame row 0 samples the top rows of the 512px image.
        assert!(close(frame.pixel(0, 0), top.pixel(0, 0)), "{:?}", frame.pixel(0, 0));
        assert!(close(frame.pixel(0, 63), top.pixel(0, 511)), "{:?}", frame.pixel(0, 63));
        assert!(frame.pixels.iter().all(|p| p[3] == 255));
    }

    #[test]
    fn test_saturated_density_shows_bottom_image() {
        let frame = composite_with(1.0);
        let bottom = placeholder(Layer::Bottom);
        assert!(close(frame.pixel(0, 0), bottom.pixel(0, 0)), "{:?}", frame.pixel(0, 0));
        assert!(close(frame.pixel(0, 63), bottom.pixel(0, 511)), "{:?}", frame.pixel(0, 63));
    }
}
