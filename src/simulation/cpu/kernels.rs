//! Per-fragment stage kernels for the software backend.
//!
//! Each function mirrors the WGSL fragment entry of the same stage in
//! `shaders/fluid/`, sampling through the same clamp-to-edge rules. Keep them in
//! step when a shader changes.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use super::texture::CpuTexture;
use crate::simulation::field::FilterMode;
use crate::simulation::stages::{Param, StageId};

/// The interpolated varyings of the fullscreen vertex stage.
#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub uv: Vec2,
    pub uv_l: Vec2,
    pub uv_r: Vec2,
    pub uv_t: Vec2,
    pub uv_b: Vec2,
}

impl Fragment {
    pub fn at(uv: Vec2, texel_size: Vec2) -> Self {
        Self {
            uv,
            uv_l: uv - Vec2::new(texel_size.x, 0.0),
            uv_r: uv + Vec2::new(texel_size.x, 0.0),
            uv_t: uv + Vec2::new(0.0, texel_size.y),
            uv_b: uv - Vec2::new(0.0, texel_size.y),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    Texture(&'a CpuTexture),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
}

/// Resolved parameter values of one pass, indexed by [`Param`].
pub struct Inputs<'a> {
    stage: StageId,
    filter: FilterMode,
    values: [Option<Value<'a>>; Param::ALL.len()],
}

impl<'a> Inputs<'a> {
    pub fn new(stage: StageId, filter: FilterMode) -> Self {
        Self {
            stage,
            filter,
            values: [None; Param::ALL.len()],
        }
    }

    pub fn set(&mut self, param: Param, value: Value<'a>) {
        self.values[param.index()] = Some(value);
    }

    fn missing(&self, param: Param) -> ! {
        panic!("{}: parameter `{}` is unbound or has the wrong kind", self.stage, param.shader_name())
    }

    pub fn float(&self, param: Param) -> f32 {
        match self.values[param.index()] {
            Some(Value::Float(v)) => v,
            _ => self.missing(param),
        }
    }

    pub fn vec2(&self, param: Param) -> Vec2 {
        match self.values[param.index()] {
            Some(Value::Vec2(v)) => v,
            _ => self.missing(param),
        }
    }

    pub fn vec3(&self, param: Param) -> Vec3 {
        match self.values[param.index()] {
            Some(Value::Vec3(v)) => v,
            _ => self.missing(param),
        }
    }

    pub fn texture(&self, param: Param) -> &'a CpuTexture {
        match self.values[param.index()] {
            Some(Value::Texture(t)) => t,
            _ => self.missing(param),
        }
    }

    /// `textureSampleLevel(param, field_sampler, uv, 0.0)`
    pub fn sample(&self, param: Param, uv: Vec2) -> Vec4 {
        self.texture(param).sample(uv, self.filter)
    }
}

/// Which fragment entry the program was linked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Default,
    ManualFiltering,
}

pub fn shade(stage: StageId, entry: Entry, inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    match stage {
        StageId::Clear => clear(inputs, frag),
        StageId::Display => display(inputs, frag),
        StageId::Splat => splat(inputs, frag),
        StageId::Advection => match entry {
            Entry::Default => advection(inputs, frag),
            Entry::ManualFiltering => advection_manual_filtering(inputs, frag),
        },
        StageId::Divergence => divergence(inputs, frag),
        StageId::Curl => curl(inputs, frag),
        StageId::Vorticity => vorticity(inputs, frag),
        StageId::Pressure => pressure(inputs, frag),
        StageId::GradientSubtract => gradient_subtract(inputs, frag),
    }
}

fn smoothstep(low: f32, high: f32, x: f32) -> f32 {
    let t = ((x - low) / (high - low)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn boundary(uv: Vec2) -> Vec2 {
    uv.clamp(Vec2::ZERO, Vec2::ONE)
}

fn clear(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    inputs.float(Param::Value) * inputs.sample(Param::InputField, frag.uv)
}

fn display(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    let density = inputs.sample(Param::DensityField, frag.uv).x;
    let mask = smoothstep(inputs.float(Param::RevealLow), inputs.float(Param::RevealHigh), density);
    let top = inputs.sample(Param::TopImage, frag.uv).xyz();
    let bottom = inputs.sample(Param::BottomImage, frag.uv).xyz();
    top.lerp(bottom, mask).extend(1.0)
}

fn splat(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    let mut p = frag.uv - inputs.vec2(Param::Point);
    p.x *= inputs.float(Param::AspectRatio);
    let splat = (-p.dot(p) / inputs.float(Param::Radius)).exp() * inputs.vec3(Param::Color);
    let base = inputs.sample(Param::TargetField, frag.uv).xyz();
    (base + splat).extend(1.0)
}

fn back_trace(inputs: &Inputs<'_>, uv: Vec2, velocity: Vec2) -> Vec2 {
    uv - inputs.float(Param::Dt) * velocity * inputs.vec2(Param::TexelSize)
}

fn advection(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    let velocity = inputs.sample(Param::VelocityField, frag.uv).xy();
    let coord = back_trace(inputs, frag.uv, velocity);
    inputs.float(Param::Dissipation) * inputs.sample(Param::SourceField, coord)
}

/// Bilinear filtering from four nearest-neighbour taps.
fn bilerp(inputs: &Inputs<'_>, param: Param, uv: Vec2) -> Vec4 {
    let texel = inputs.vec2(Param::TexelSize);
    let st = uv / texel - Vec2::splat(0.5);
    let base = st.floor();
    let f = st - base;
    let tap = |offset: Vec2| inputs.sample(param, (base + offset) * texel);
    let a = tap(Vec2::new(0.5, 0.5));
    let b = tap(Vec2::new(1.5, 0.5));
    let c = tap(Vec2::new(0.5, 1.5));
    let d = tap(Vec2::new(1.5, 1.5));
    a.lerp(b, f.x).lerp(c.lerp(d, f.x), f.y)
}

fn advection_manual_filtering(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    let velocity = bilerp(inputs, Param::VelocityField, frag.uv).xy();
    let coord = back_trace(inputs, frag.uv, velocity);
    inputs.float(Param::Dissipation) * bilerp(inputs, Param::SourceField, coord)
}

/// Out-of-domain samples come from the edge with the normal component negated.
fn sample_velocity(inputs: &Inputs<'_>, uv: Vec2) -> Vec2 {
    let mut uv = uv;
    let mut multiplier = Vec2::ONE;
    if uv.x < 0.0 {
        uv.x = 0.0;
        multiplier.x = -1.0;
    }
    if uv.x > 1.0 {
        uv.x = 1.0;
        multiplier.x = -1.0;
    }
    if uv.y < 0.0 {
        uv.y = 0.0;
        multiplier.y = -1.0;
    }
    if uv.y > 1.0 {
        uv.y = 1.0;
        multiplier.y = -1.0;
    }
    multiplier * inputs.sample(Param::VelocityField, uv).xy()
}

fn divergence(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    let l = sample_velocity(inputs, frag.uv_l).x;
    let r = sample_velocity(inputs, frag.uv_r).x;
    let t = sample_velocity(inputs, frag.uv_t).y;
    let b = sample_velocity(inputs, frag.uv_b).y;
    Vec4::new(0.5 * (r - l + t - b), 0.0, 0.0, 1.0)
}

fn curl(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    let l = inputs.sample(Param::VelocityField, frag.uv_l).y;
    let r = inputs.sample(Param::VelocityField, frag.uv_r).y;
    let t = inputs.sample(Param::VelocityField, frag.uv_t).x;
    let b = inputs.sample(Param::VelocityField, frag.uv_b).x;
    Vec4::new(0.5 * (r - l - t + b), 0.0, 0.0, 1.0)
}

fn vorticity(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    let curl_at = |uv| inputs.sample(Param::CurlField, uv).x;
    let (l, r) = (curl_at(frag.uv_l), curl_at(frag.uv_r));
    let (t, b) = (curl_at(frag.uv_t), curl_at(frag.uv_b));
    let c = curl_at(frag.uv);

    let mut force = 0.5 * Vec2::new(t.abs() - b.abs(), r.abs() - l.abs());
    force /= force.length() + 0.0001;
    force *= inputs.float(Param::CurlStrength) * c;
    force.y = -force.y;

    let velocity = inputs.sample(Param::VelocityField, frag.uv).xy();
    (velocity + force * inputs.float(Param::Dt)).extend(0.0).extend(1.0)
}

fn pressure(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    let p = |uv| inputs.sample(Param::PressureField, boundary(uv)).x;
    let (l, r, t, b) = (p(frag.uv_l), p(frag.uv_r), p(frag.uv_t), p(frag.uv_b));
    let divergence = inputs.sample(Param::DivergenceField, frag.uv).x;
    Vec4::new((l + r + b + t - divergence) * 0.25, 0.0, 0.0, 1.0)
}

fn gradient_subtract(inputs: &Inputs<'_>, frag: &Fragment) -> Vec4 {
    let p = |uv| inputs.sample(Param::PressureField, boundary(uv)).x;
    let (l, r, t, b) = (p(frag.uv_l), p(frag.uv_r), p(frag.uv_t), p(frag.uv_b));
    let velocity = inputs.sample(Param::VelocityField, frag.uv).xy() - 0.5 * Vec2::new(r - l, t - b);
    velocity.extend(0.0).extend(1.0)
}
