pub mod backend;
pub mod context;
pub mod cpu;
pub mod field;
pub mod frame_driver;
pub mod gpu;
pub mod pass;
pub mod programs;
pub mod reflect;
pub mod render_targets;
pub mod stages;
pub mod stepper;

pub use backend::FluidBackend;
pub use context::{FluidContext, InitError, NotReady, TickOutcome, TickReport};
pub use field::{DoubleBuffered, FieldDesc, FieldFormat, FilterMode};
pub use programs::ProgramRegistry;
pub use render_targets::RenderTargetPool;
pub use stepper::SimulationStepper;
