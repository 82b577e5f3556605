//! # Fluid Reveal: a GPU fluid simulation as an image reveal mask
//!
//! A real-time 2D incompressible fluid runs on offscreen render targets. Pointer
//! drags inject velocity and dye ("splats"); the dye density decides, per pixel,
//! whether the top or the bottom image shows through.
//!
//! ## Architecture Overview
//!
//! ### 1. Simulation ([`simulation`])
//!
//! - [`simulation::render_targets`] - Field allocation, float format fallback, resize
//! - [`simulation::programs`] - WGSL compilation (naga), reflection and link checks
//! - [`simulation::stepper`] - The fixed per-tick pipeline: advection, splats,
//!   vorticity confinement, pressure projection
//! - [`simulation::context::FluidContext`] - Owns everything and drives one tick
//!
//! Passes go through the [`simulation::FluidBackend`] trait. The wgpu backend
//! ([`simulation::gpu`]) drives the window; the software backend
//! ([`simulation::cpu`]) runs the same stages on the CPU and backs the tests.
//!
//! ### 2. Input ([`input`])
//!
//! Mouse and touch contacts become [`input::Impulse`]s, drained once per tick.
//!
//! ### 3. Rendering ([`rendering`])
//!
//! The reveal composite and the image sources, with generated placeholders when
//! an image can't be loaded.
//!
//! ## Data Flow
//!
//! ```text
//! Pointer Events → Impulse Queue → Advect → Splat → Curl/Vorticity → Project → Composite
//! ```
//!
//! ## Dependencies
//!
//! - **Graphics**: `wgpu` (GPU abstraction), `winit` (windowing), `naga` (shader reflection)
//! - **Math**: `glam` (vector types), `bytemuck` (uniform packing), `half` (f16 readback)
//! - **Concurrency**: `rayon` (parallel rows in the software backend)
//! - **Serialization**: `serde` + `ron` (human-readable config files)

pub mod app;
pub mod config;
pub mod input;
pub mod rendering;
pub mod simulation;
