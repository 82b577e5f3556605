//! Deterministic software backend.
//!
//! Runs the same nine stage programs as the GPU, fragment by fragment, with the
//! rows of each pass shaded in parallel. Programs are still compiled and linked
//! from the WGSL sources; execution goes through the kernels in [`kernels`].

pub mod kernels;
pub mod texture;

use std::collections::HashMap;

use glam::{Vec2, Vec4};
use rayon::prelude::*;

use kernels::{shade, Entry, Fragment, Inputs, Value};
use texture::CpuTexture;

use super::backend::FluidBackend;
use super::field::{ChannelLayout, FieldDesc, FieldFormat, FilterMode, FormatSupport, Precision};
use super::pass::{Binding, FieldHandle, Pass, PassTarget};
use super::programs::{LinkedProgram, ProgramInterface};
use super::stages::{Param, StageId, FRAGMENT_ENTRY, MANUAL_FILTERING_ENTRY};

/// A field living in the software backend's texture arena.
#[derive(Debug)]
pub struct CpuField {
    id: u64,
    slot: usize,
    desc: FieldDesc,
}

impl FieldHandle for CpuField {
    fn desc(&self) -> &FieldDesc {
        &self.desc
    }

    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CpuProgram {
    stage: StageId,
    entry: Entry,
    filter: FilterMode,
}

/// The last frame drawn to the screen target, RGBA8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
}

impl Frame {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels[(y * self.width + x) as usize]
    }
}

#[derive(Default)]
pub struct CpuBackend {
    textures: Vec<Option<CpuTexture>>,
    free_slots: Vec<usize>,
    next_id: u64,
    support_overrides: HashMap<FieldFormat, FormatSupport>,
    frame: Frame,
    draws: u64,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `format` has the given capabilities. Everything else is fully supported.
    pub fn with_format_support(mut self, format: FieldFormat, support: FormatSupport) -> Self {
        self.support_overrides.insert(format, support);
        self
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Passes executed so far.
    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    /// Fields and images currently allocated.
    pub fn live_textures(&self) -> usize {
        self.textures.iter().filter(|t| t.is_some()).count()
    }

    fn insert(&mut self, texture: CpuTexture, desc: FieldDesc) -> CpuField {
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.textures[slot] = Some(texture);
                slot
            }
            None => {
                self.textures.push(Some(texture));
                self.textures.len() - 1
            }
        };
        self.next_id += 1;
        CpuField {
            id: self.next_id,
            slot,
            desc,
        }
    }

    fn texture(&self, field: &CpuField) -> &CpuTexture {
        match self.textures.get(field.slot).and_then(Option::as_ref) {
            Some(texture) => texture,
            None => panic!("field {} used after release", field.id),
        }
    }

    fn resolve<'a>(
        textures: &'a [Option<CpuTexture>],
        program: &CpuProgram,
        pass: &Pass<'_, CpuField>,
    ) -> Inputs<'a> {
        let mut inputs = Inputs::new(program.stage, program.filter);
        for (param, binding) in pass.bindings.iter() {
            let value = match binding {
                Binding::Texture(field) => match textures.get(field.slot).and_then(Option::as_ref) {
                    Some(texture) => Value::Texture(texture),
                    None => panic!("{}: `{}` was released", program.stage, param.shader_name()),
                },
                Binding::Float(v) => Value::Float(v),
                Binding::Vec2(v) => Value::Vec2(v),
                Binding::Vec3(v) => Value::Vec3(v),
            };
            inputs.set(param, value);
        }
        inputs
    }
}

fn shade_into(target: &mut CpuTexture, program: &CpuProgram, inputs: &Inputs<'_>, texel_size: Vec2) {
    let width = target.width as usize;
    let (w, h) = (target.width as f32, target.height as f32);
    let (channels, precision) = (target.channels, target.precision);
    target
        .texels
        .par_chunks_mut(width.max(1))
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let uv = Vec2::new((x as f32 + 0.5) / w, (y as f32 + 0.5) / h);
                let value = shade(program.stage, program.entry, inputs, &Fragment::at(uv, texel_size));
                *out = texture::quantize(value, channels, precision);
            }
        });
}

impl FluidBackend for CpuBackend {
    type Field = CpuField;
    type Program = CpuProgram;

    fn format_support(&self, format: FieldFormat) -> FormatSupport {
        self.support_overrides
            .get(&format)
            .copied()
            .unwrap_or(FormatSupport {
                renderable: true,
                filterable: true,
            })
    }

    fn create_field(&mut self, desc: &FieldDesc) -> CpuField {
        let texture = CpuTexture::zeroed(
            desc.width,
            desc.height,
            desc.format.layout.channel_count(),
            desc.format.precision,
        );
        self.insert(texture, *desc)
    }

    fn release(&mut self, field: CpuField) {
        if let Some(slot) = self.textures.get_mut(field.slot) {
            *slot = None;
            self.free_slots.push(field.slot);
        }
    }

    fn create_image(&mut self, width: u32, height: u32, rgba: &[u8]) -> CpuField {
        let desc = FieldDesc {
            width,
            height,
            format: FieldFormat::new(ChannelLayout::Rgba, Precision::Full),
            filter: FilterMode::Linear,
        };
        self.insert(CpuTexture::from_rgba8(width, height, rgba), desc)
    }

    fn build_program(&mut self, linked: &LinkedProgram) -> Result<CpuProgram, String> {
        let entry = match linked.fragment_entry {
            FRAGMENT_ENTRY => Entry::Default,
            MANUAL_FILTERING_ENTRY if linked.stage == StageId::Advection => Entry::ManualFiltering,
            other => return Err(format!("no software kernel for entry point `{other}`")),
        };
        Ok(CpuProgram {
            stage: linked.stage,
            entry,
            filter: linked.filter,
        })
    }

    fn draw(&mut self, program: &CpuProgram, _interface: &ProgramInterface, pass: &Pass<'_, CpuField>) {
        self.draws += 1;
        let texel_size = match pass.bindings.get(Param::TexelSize) {
            Some(Binding::Vec2(v)) => v,
            _ => {
                let (w, h) = pass.target.size();
                Vec2::new(1.0 / w.max(1) as f32, 1.0 / h.max(1) as f32)
            }
        };

        match &pass.target {
            PassTarget::Field(field) => {
                let mut target = match self.textures.get_mut(field.slot).and_then(Option::take) {
                    Some(texture) => texture,
                    None => panic!("{}: render target was released", program.stage),
                };
                let inputs = Self::resolve(&self.textures, program, pass);
                shade_into(&mut target, program, &inputs, texel_size);
                self.textures[field.slot] = Some(target);
            }
            PassTarget::Screen { width, height } => {
                let mut target = CpuTexture {
                    width: *width,
                    height: *height,
                    channels: 4,
                    precision: None,
                    texels: vec![Vec4::ZERO; (*width as usize) * (*height as usize)],
                };
                let inputs = Self::resolve(&self.textures, program, pass);
                shade_into(&mut target, program, &inputs, texel_size);
                self.frame = Frame {
                    width: *width,
                    height: *height,
                    pixels: target
                        .texels
                        .iter()
                        .map(|t| {
                            let c = (t.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
                            [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
                        })
                        .collect(),
                };
            }
        }
    }

    fn submit(&mut self) {}

    fn read_field(&mut self, field: &CpuField) -> Vec<[f32; 4]> {
        self.texture(field).texels.iter().map(|t| t.to_array()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::pass::Bindings;
    use crate::simulation::programs::ProgramRegistry;

    fn desc(width: u32, height: u32, layout: ChannelLayout) -> FieldDesc {
        FieldDesc {
            width,
            height,
            format: FieldFormat::new(layout, Precision::Full),
            filter: FilterMode::Linear,
        }
    }

    #[test]
    fn test_fields_start_zeroed() {
        let mut backend = CpuBackend::new();
        let field = backend.create_field(&desc(4, 3, ChannelLayout::Rg));
        let texels = backend.read_field(&field);
        assert_eq!(texels.len(), 12);
        assert!(texels.iter().all(|t| *t == [0.0; 4]));
    }

    #[test]
    fn test_released_slots_are_reused_with_fresh_ids() {
        let mut backend = CpuBackend::new();
        let a = backend.create_field(&desc(2, 2, ChannelLayout::R));
        let (a_id, a_slot) = (a.id(), a.slot);
        backend.release(a);
        let b = backend.create_field(&desc(2, 2, ChannelLayout::R));
        assert_eq!(b.slot, a_slot);
        assert_ne!(b.id(), a_id);
        assert_eq!(backend.live_textures(), 1);
    }

    #[test]
    fn test_clear_pass_scales_field() {
        let mut backend = CpuBackend::new();
        let registry = ProgramRegistry::build(&mut backend, FilterMode::Linear).unwrap();
        let source = backend.create_field(&desc(4, 4, ChannelLayout::R));
        let target = backend.create_field(&desc(4, 4, ChannelLayout::R));
        backend.textures[source.slot]
            .as_mut()
            .unwrap()
            .texels
            .iter_mut()
            .for_each(|t| *t = Vec4::new(2.0, 0.0, 0.0, 0.0));

        let bindings = Bindings::new()
            .vec2(Param::TexelSize, Vec2::splat(0.25))
            .float(Param::Value, 0.8)
            .texture(Param::InputField, &source);
        registry.run(&mut backend, &Pass::to_field(StageId::Clear, &target, bindings));

        let out = backend.read_field(&target);
        assert!(out.iter().all(|t| (t[0] - 1.6).abs() < 1e-6 && t[1] == 0.0));
        assert_eq!(backend.draw_count(), 1);
    }

    #[test]
    fn test_image_texels_are_normalised() {
        let mut backend = CpuBackend::new();
        let image = backend.create_image(1, 1, &[255, 0, 51, 255]);
        let texel = backend.read_field(&image)[0];
        assert_eq!(texel[0], 1.0);
        assert_eq!(texel[1], 0.0);
        assert!((texel[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_entry_point_is_rejected() {
        let mut backend = CpuBackend::new();
        let mut linked = crate::simulation::programs::link(
            StageId::Curl,
            crate::simulation::stages::BASE_VERTEX_SOURCE,
            StageId::Curl.fragment_source(),
            FRAGMENT_ENTRY,
            FilterMode::Linear,
        )
        .unwrap();
        linked.fragment_entry = MANUAL_FILTERING_ENTRY;
        assert!(backend.build_program(&linked).is_err());
    }
}
