//! Render-target pool: owns every simulation field and resolves their formats.

use super::backend::FluidBackend;
use super::field::{ChannelLayout, DoubleBuffered, FieldDesc, FieldFormat, FilterMode, FormatSupport, Precision};

/// No float format the backend offers can be rendered to.
#[derive(Debug, thiserror::Error)]
pub enum RenderTargetError {
    #[error("no renderable floating-point format for a {requested:?} field")]
    NoUsableFloatFormat { requested: ChannelLayout },
}

/// Simulation grid size for a display size.
pub fn simulation_size(display_width: u32, display_height: u32, downsample: u32) -> (u32, u32) {
    let shift = downsample.min(31);
    (display_width >> shift, display_height >> shift)
}

/// Walk the degradation chain for `layout`: the requested layout at half then
/// full precision, then each wider layout the same way.
pub fn resolve_format<B: FluidBackend>(
    backend: &B,
    layout: ChannelLayout,
) -> Result<(FieldFormat, FormatSupport), RenderTargetError> {
    for &candidate in layout.widening_chain() {
        for &precision in Precision::Half.fallback_chain() {
            let format = FieldFormat::new(candidate, precision);
            let support = backend.format_support(format);
            if support.renderable {
                if candidate != layout || precision != Precision::Half {
                    log::info!("{layout:?} fields fall back to {format}");
                }
                return Ok((format, support));
            }
            log::debug!("{format} is not renderable");
        }
    }
    Err(RenderTargetError::NoUsableFloatFormat { requested: layout })
}

/// Formats chosen for each kind of field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFormats {
    pub velocity: FieldFormat,
    pub density: FieldFormat,
    pub scalar: FieldFormat,
    pub filter: FilterMode,
}

impl ResolvedFormats {
    pub fn resolve<B: FluidBackend>(backend: &B) -> Result<Self, RenderTargetError> {
        let (velocity, velocity_support) = resolve_format(backend, ChannelLayout::Rg)?;
        let (density, density_support) = resolve_format(backend, ChannelLayout::Rgba)?;
        let (scalar, scalar_support) = resolve_format(backend, ChannelLayout::R)?;

        let filterable = [velocity_support, density_support, scalar_support]
            .iter()
            .all(|s| s.filterable);
        let filter = if filterable {
            FilterMode::Linear
        } else {
            log::warn!("Float formats are not filterable; using nearest sampling with manual bilinear advection");
            FilterMode::Nearest
        };

        Ok(Self {
            velocity,
            density,
            scalar,
            filter,
        })
    }
}

/// All the fields of one simulation grid.
pub struct SimulationFields<F> {
    pub velocity: DoubleBuffered<F>,
    pub density: DoubleBuffered<F>,
    pub pressure: DoubleBuffered<F>,
    pub divergence: F,
    pub curl: F,
}

impl<F> SimulationFields<F> {
    fn release<B: FluidBackend<Field = F>>(self, backend: &mut B) {
        for pair in [self.velocity, self.density, self.pressure] {
            for field in pair.into_fields() {
                backend.release(field);
            }
        }
        backend.release(self.divergence);
        backend.release(self.curl);
    }
}

/// Owns the simulation fields and reallocates them when the display changes.
pub struct RenderTargetPool<F> {
    fields: SimulationFields<F>,
    formats: ResolvedFormats,
    downsample: u32,
    display_size: (u32, u32),
    size: (u32, u32),
}

impl<F> RenderTargetPool<F> {
    /// Resolve formats and allocate every field for `display_size`.
    pub fn new<B: FluidBackend<Field = F>>(
        backend: &mut B,
        display_size: (u32, u32),
        downsample: u32,
    ) -> Result<Self, RenderTargetError> {
        let formats = ResolvedFormats::resolve(backend)?;
        let size = grid_size(display_size, downsample);
        let fields = allocate_fields(backend, &formats, size);
        log::info!(
            "Render targets: {}x{} (velocity {}, density {}, scalar {}, {:?} filtering)",
            size.0,
            size.1,
            formats.velocity,
            formats.density,
            formats.scalar,
            formats.filter
        );
        Ok(Self {
            fields,
            formats,
            downsample,
            display_size,
            size,
        })
    }

    pub fn fields(&self) -> &SimulationFields<F> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut SimulationFields<F> {
        &mut self.fields
    }

    pub fn filter(&self) -> FilterMode {
        self.formats.filter
    }

    /// Simulation grid size.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Display size the grid was derived from.
    pub fn display_size(&self) -> (u32, u32) {
        self.display_size
    }

    pub fn downsample(&self) -> u32 {
        self.downsample
    }

    /// Release every field and reallocate at `(display >> downsample)`.
    /// The new fields are zero-filled; callers must re-seed.
    pub fn resize<B: FluidBackend<Field = F>>(&mut self, backend: &mut B, display_size: (u32, u32)) {
        self.reallocate(backend, display_size, self.downsample);
    }

    /// Like [`Self::resize`] but also changes the downsample factor.
    pub fn reallocate<B: FluidBackend<Field = F>>(
        &mut self,
        backend: &mut B,
        display_size: (u32, u32),
        downsample: u32,
    ) {
        let size = grid_size(display_size, downsample);
        let fresh = allocate_fields(backend, &self.formats, size);
        let old = std::mem::replace(&mut self.fields, fresh);
        old.release(backend);
        log::debug!(
            "Render targets resized: {}x{} -> {}x{}",
            self.size.0,
            self.size.1,
            size.0,
            size.1
        );
        self.display_size = display_size;
        self.downsample = downsample;
        self.size = size;
    }

    /// Give every field back to the backend.
    pub fn release<B: FluidBackend<Field = F>>(self, backend: &mut B) {
        self.fields.release(backend);
    }
}

/// Backends can't allocate empty textures; a degenerate display still gets 1x1.
fn grid_size(display_size: (u32, u32), downsample: u32) -> (u32, u32) {
    let (w, h) = simulation_size(display_size.0, display_size.1, downsample);
    (w.max(1), h.max(1))
}

/// Allocate one field.
pub fn allocate<B: FluidBackend>(backend: &mut B, desc: FieldDesc) -> B::Field {
    backend.create_field(&desc)
}

/// Allocate a read/write pair.
pub fn allocate_double<B: FluidBackend>(backend: &mut B, desc: FieldDesc) -> DoubleBuffered<B::Field> {
    DoubleBuffered::new(backend.create_field(&desc), backend.create_field(&desc))
}

fn allocate_fields<B: FluidBackend>(
    backend: &mut B,
    formats: &ResolvedFormats,
    (width, height): (u32, u32),
) -> SimulationFields<B::Field> {
    let desc = |format| FieldDesc {
        width,
        height,
        format,
        filter: formats.filter,
    };
    SimulationFields {
        velocity: allocate_double(backend, desc(formats.velocity)),
        density: allocate_double(backend, desc(formats.density)),
        pressure: allocate_double(backend, desc(formats.scalar)),
        divergence: allocate(backend, desc(formats.scalar)),
        curl: allocate(backend, desc(formats.scalar)),
    }
}
