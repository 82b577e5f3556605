//! The seam between the solver and whatever executes its passes.

use super::field::{FieldDesc, FieldFormat, FormatSupport};
use super::pass::{FieldHandle, Pass};
use super::programs::{LinkedProgram, ProgramInterface};

/// Executes fullscreen stage passes against backend-resident fields.
///
/// The stepper, registry and render-target pool are written against this trait
/// only; [`super::gpu::GpuBackend`] and [`super::cpu::CpuBackend`] implement it.
pub trait FluidBackend {
    type Field: FieldHandle;
    type Program;

    /// Whether `format` can be rendered to and sampled (and filtered).
    fn format_support(&self, format: FieldFormat) -> FormatSupport;

    /// Allocate a zero-filled field.
    fn create_field(&mut self, desc: &FieldDesc) -> Self::Field;

    /// Free a field. The handle must not be used afterwards.
    fn release(&mut self, field: Self::Field);

    /// Upload an RGBA8 image as a sampled (never rendered) field.
    fn create_image(&mut self, width: u32, height: u32, rgba: &[u8]) -> Self::Field;

    /// Turn a linked program into an executable one. Errors are diagnostics.
    fn build_program(&mut self, linked: &LinkedProgram) -> Result<Self::Program, String>;

    /// Record or execute one pass. Bindings have already been checked.
    fn draw(&mut self, program: &Self::Program, interface: &ProgramInterface, pass: &Pass<'_, Self::Field>);

    /// Flush recorded work.
    fn submit(&mut self);

    /// Read a field back as RGBA, channels beyond its layout reading zero.
    /// Submits pending work first.
    fn read_field(&mut self, field: &Self::Field) -> Vec<[f32; 4]>;
}
