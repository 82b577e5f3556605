//! Field descriptions and the double-buffered field pair.
//!
//! A field is a 2D grid of floating-point samples living in backend memory
//! (a `wgpu::Texture` on the GPU, a texel vector on the CPU backend). This module
//! only describes fields; allocation goes through [`super::backend::FluidBackend`]
//! and ownership lives in [`super::render_targets::RenderTargetPool`].

use std::fmt;

/// Number and meaning of the channels stored per texel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    /// Scalar fields: divergence, curl, pressure.
    R,
    /// Two-component vectors: velocity.
    Rg,
    /// Color with alpha: density.
    Rgba,
}

impl ChannelLayout {
    pub fn channel_count(self) -> usize {
        match self {
            ChannelLayout::R => 1,
            ChannelLayout::Rg => 2,
            ChannelLayout::Rgba => 4,
        }
    }

    /// Layouts that can stand in for this one, narrowest first.
    ///
    /// A layout can always be emulated by a wider one since consumers only read
    /// the leading channels.
    pub fn widening_chain(self) -> &'static [ChannelLayout] {
        match self {
            ChannelLayout::R => &[ChannelLayout::R, ChannelLayout::Rg, ChannelLayout::Rgba],
            ChannelLayout::Rg => &[ChannelLayout::Rg, ChannelLayout::Rgba],
            ChannelLayout::Rgba => &[ChannelLayout::Rgba],
        }
    }
}

/// Storage precision of a float field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    /// 16-bit float per channel.
    Half,
    /// 32-bit float per channel.
    Full,
}

impl Precision {
    /// Precisions to try for a request, preferred first.
    pub fn fallback_chain(self) -> &'static [Precision] {
        match self {
            Precision::Half => &[Precision::Half, Precision::Full],
            Precision::Full => &[Precision::Full, Precision::Half],
        }
    }
}

/// Sampler filtering used when a field is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Linear,
    Nearest,
}

/// Channel layout plus precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldFormat {
    pub layout: ChannelLayout,
    pub precision: Precision,
}

impl FieldFormat {
    pub const fn new(layout: ChannelLayout, precision: Precision) -> Self {
        Self { layout, precision }
    }
}

impl fmt::Display for FieldFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = match self.layout {
            ChannelLayout::R => "R",
            ChannelLayout::Rg => "RG",
            ChannelLayout::Rgba => "RGBA",
        };
        let bits = match self.precision {
            Precision::Half => 16,
            Precision::Full => 32,
        };
        write!(f, "{layout}{bits}F")
    }
}

/// What a backend can do with a given format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatSupport {
    /// Usable both as a render target and as a sampled texture.
    pub renderable: bool,
    /// Can be sampled with linear filtering.
    pub filterable: bool,
}

/// Everything needed to allocate one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDesc {
    pub width: u32,
    pub height: u32,
    pub format: FieldFormat,
    pub filter: FilterMode,
}

/// Two fields of identical shape and format with swappable roles.
///
/// `read()` is always the most recently completed state and `write()` the
/// target of the next pass. Because the two roles are distinct slots, a pass
/// bound as "read `read()`, write `write()`" never aliases its target.
#[derive(Debug)]
pub struct DoubleBuffered<F> {
    fields: [F; 2],
    read_index: usize,
}

impl<F> DoubleBuffered<F> {
    pub fn new(first: F, second: F) -> Self {
        Self {
            fields: [first, second],
            read_index: 0,
        }
    }

    /// Current authoritative state.
    pub fn read(&self) -> &F {
        &self.fields[self.read_index]
    }

    /// Next-state target.
    pub fn write(&self) -> &F {
        &self.fields[1 - self.read_index]
    }

    /// Exchange the roles after a pass has completed.
    pub fn swap(&mut self) {
        self.read_index = 1 - self.read_index;
    }

    /// Give both fields back, e.g. to release them on resize.
    pub fn into_fields(self) -> [F; 2] {
        self.fields
    }
}
