//! The owning context: one backend, its fields and programs, and the tick loop.

use std::time::Instant;

use super::backend::FluidBackend;
use super::frame_driver::FrameDriver;
use super::programs::{ProgramError, ProgramRegistry};
use super::render_targets::{simulation_size, RenderTargetError, RenderTargetPool};
use super::stepper::SimulationStepper;
use crate::config::{AppConfig, SimulationConfig};
use crate::input::{Impulse, ImpulseTracker, PointerEvent};
use crate::rendering::{Compositor, RevealImages};

/// Failures that stop the app before the first frame.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("render target setup failed: {0}")]
    RenderTarget(#[from] RenderTargetError),
    #[error("program compilation failed: {0}")]
    Program(#[from] ProgramError),
}

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    /// The surface has no area, e.g. a minimized window.
    ZeroSizedDisplay,
    /// The display is smaller than one simulation texel.
    GridTooSmall,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Timestep actually used.
    pub dt: f32,
    /// Impulses consumed this tick, seeds first.
    pub impulses: Vec<Impulse>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Rendered(TickReport),
    Skipped(NotReady),
}

pub struct FluidContext<B: FluidBackend> {
    backend: B,
    registry: ProgramRegistry<B::Program>,
    pool: RenderTargetPool<B::Field>,
    stepper: SimulationStepper,
    compositor: Compositor<B::Field>,
    tracker: ImpulseTracker,
    driver: FrameDriver,
}

impl<B: FluidBackend> FluidContext<B> {
    /// Allocate fields, compile programs and upload the images.
    pub fn new(
        mut backend: B,
        config: &AppConfig,
        images: &RevealImages,
        display_size: (u32, u32),
    ) -> Result<Self, InitError> {
        let simulation = config.simulation.clone().validated();
        let pool = RenderTargetPool::new(&mut backend, display_size, simulation.downsample)?;
        let registry = ProgramRegistry::build(&mut backend, pool.filter())?;
        let compositor = Compositor::new(&mut backend, images, &config.composite);
        let driver = FrameDriver::new(simulation.max_dt, config.seed.clone(), display_size);

        Ok(Self {
            backend,
            registry,
            pool,
            stepper: SimulationStepper::new(simulation),
            compositor,
            tracker: ImpulseTracker::new(&config.input),
            driver,
        })
    }

    /// Replace the random sources with seeded ones.
    pub fn with_seed(mut self, seed: u64, config: &AppConfig) -> Self {
        self.driver = FrameDriver::with_seed(
            self.stepper.config().max_dt,
            config.seed.clone(),
            self.driver.display_size(),
            seed,
        );
        self.tracker = ImpulseTracker::with_seed(&config.input, seed);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn pool(&self) -> &RenderTargetPool<B::Field> {
        &self.pool
    }

    pub fn tracker(&self) -> &ImpulseTracker {
        &self.tracker
    }

    pub fn simulation_config(&self) -> &SimulationConfig {
        self.stepper.config()
    }

    /// Read the current density field back.
    pub fn read_density(&mut self) -> Vec<[f32; 4]> {
        self.backend.read_field(self.pool.fields().density.read())
    }

    pub fn read_velocity(&mut self) -> Vec<[f32; 4]> {
        self.backend.read_field(self.pool.fields().velocity.read())
    }

    /// Forward a pointer event. `display_size` is the surface in device pixels.
    pub fn handle_pointer(&mut self, event: PointerEvent, display_size: (u32, u32)) {
        self.tracker.handle_event(event, display_size);
    }

    pub fn enqueue_impulse(&mut self, impulse: Impulse) {
        self.tracker.enqueue(impulse);
    }

    /// Swap in new solver parameters. Every field is reallocated and re-seeded.
    pub fn set_simulation_config(&mut self, config: SimulationConfig) {
        let config = config.validated();
        let display_size = self.pool.display_size();
        log::info!("Simulation config replaced, reallocating");
        self.pool.reallocate(&mut self.backend, display_size, config.downsample);
        self.driver.set_max_dt(config.max_dt);
        self.driver.request_reseed();
        self.stepper = SimulationStepper::new(config);
    }

    pub fn set_reveal_range(&mut self, low: f32, high: f32) {
        self.compositor.set_reveal_range(low, high);
    }

    /// Advance the simulation to `now` and draw one frame at `display_size`.
    pub fn tick(&mut self, now: Instant, display_size: (u32, u32)) -> TickOutcome {
        if let Some(reason) = self.not_ready(display_size) {
            log::trace!("Tick skipped: {:?}", reason);
            self.driver.pause();
            return TickOutcome::Skipped(reason);
        }

        if self.driver.observe_display(display_size) {
            self.pool.resize(&mut self.backend, display_size);
            self.driver.request_reseed();
        }
        // Seeds skip the input queue so its capacity never truncates them.
        let mut impulses = Vec::new();
        if self.driver.take_reseed() {
            impulses = self.driver.seed_impulses();
            log::debug!("Seeding {} splats", impulses.len());
        }

        let dt = self.driver.next_dt(now);
        impulses.extend(self.tracker.drain());
        self.stepper
            .step(&mut self.backend, &self.registry, &mut self.pool, dt, &impulses);
        self.compositor.composite(
            &mut self.backend,
            &self.registry,
            self.pool.fields().density.read(),
            display_size,
        );
        self.backend.submit();

        TickOutcome::Rendered(TickReport { dt, impulses })
    }

    fn not_ready(&self, (width, height): (u32, u32)) -> Option<NotReady> {
        if width == 0 || height == 0 {
            return Some(NotReady::ZeroSizedDisplay);
        }
        let (w, h) = simulation_size(width, height, self.pool.downsample());
        if w == 0 || h == 0 {
            return Some(NotReady::GridTooSmall);
        }
        None
    }

    /// Tear down, returning every field to the backend.
    pub fn into_backend(mut self) -> B {
        self.pool.release(&mut self.backend);
        self.compositor.release(&mut self.backend);
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use glam::{Vec2, Vec3};

    use super::*;
    use crate::config::SeedConfig;
    use crate::input::{PointerPhase, MOUSE_CONTACT};
    use crate::simulation::cpu::CpuBackend;

    fn config(downsample: u32, seed: SeedConfig) -> AppConfig {
        AppConfig {
            simulation: SimulationConfig {
                downsample,
                ..SimulationConfig::default()
            },
            seed,
            ..AppConfig::default()
        }
    }

    fn no_seed() -> SeedConfig {
        SeedConfig {
            min_splats: 0,
            max_splats: 0,
            ..SeedConfig::default()
        }
    }

    fn context(display: (u32, u32), config: &AppConfig) -> FluidContext<CpuBackend> {
        FluidContext::new(CpuBackend::new(), config, &RevealImages::placeholders(), display)
            .unwrap()
            .with_seed(11, config)
    }

    fn max_density(texels: &[[f32; 4]]) -> f32 {
        texels.iter().map(|t| t[0].max(t[1]).max(t[2])).fold(0.0, f32::max)
    }

    fn rendered(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Rendered(report) => report,
            TickOutcome::Skipped(reason) => panic!("tick skipped: {reason:?}"),
        }
    }

    #[test]
    fn test_first_tick_seeds_within_bounds() {
        let config = config(2, SeedConfig::default());
        let mut ctx = context((96, 64), &config);
        let report = rendered(ctx.tick(Instant::now(), (96, 64)));

        assert_eq!(report.dt, config.simulation.max_dt);
        assert!((5..=25).contains(&report.impulses.len()), "{}", report.impulses.len());
        for impulse in &report.impulses {
            assert!(impulse.position.cmpge(Vec2::ZERO).all());
            assert!(impulse.position.cmplt(Vec2::ONE).all());
        }
        assert!(max_density(&ctx.read_density()) > 0.0);

        // No reseed on the next tick.
        let report = rendered(ctx.tick(Instant::now(), (96, 64)));
        assert!(report.impulses.is_empty());
    }

    #[test]
    fn test_seeds_are_not_truncated_by_small_queue() {
        let mut config = config(2, SeedConfig::default());
        config.input.queue_capacity = 4;
        let mut ctx = context((96, 64), &config);
        ctx.enqueue_impulse(Impulse {
            position: Vec2::splat(0.5),
            velocity_delta: Vec2::ZERO,
            color: Vec3::ONE,
        });
        let report = rendered(ctx.tick(Instant::now(), (96, 64)));
        // Every seed plus the queued impulse.
        assert!((6..=26).contains(&report.impulses.len()), "{}", report.impulses.len());
    }

    #[test]
    fn test_zero_sized_display_skips() {
        let config = config(1, no_seed());
        let mut ctx = context((64, 64), &config);
        assert_eq!(ctx.tick(Instant::now(), (0, 64)), TickOutcome::Skipped(NotReady::ZeroSizedDisplay));
        assert_eq!(ctx.tick(Instant::now(), (1, 64)), TickOutcome::Skipped(NotReady::GridTooSmall));
        assert_eq!(ctx.backend().draw_count(), 0);
        // Size unchanged, so no resize happened.
        assert_eq!(ctx.pool().size(), (32, 32));
    }

    #[test]
    fn test_resize_zeroes_and_reseeds() {
        let config = config(1, SeedConfig::default());
        let mut ctx = context((64, 64), &config);
        rendered(ctx.tick(Instant::now(), (64, 64)));
        assert!(max_density(&ctx.read_density()) > 0.0);

        // Resizing reallocates at the new size; the reseed lands on the same tick.
        let report = rendered(ctx.tick(Instant::now(), (80, 48)));
        assert_eq!(ctx.pool().size(), (40, 24));
        assert!(!report.impulses.is_empty());
        assert_eq!(ctx.read_density().len(), 40 * 24);
    }

    #[test]
    fn test_set_simulation_config_reallocates() {
        let config = config(0, no_seed());
        let mut ctx = context((32, 32), &config);
        ctx.enqueue_impulse(Impulse {
            position: Vec2::splat(0.5),
            velocity_delta: Vec2::ZERO,
            color: Vec3::splat(3.0),
        });
        rendered(ctx.tick(Instant::now(), (32, 32)));
        assert!(max_density(&ctx.read_density()) > 0.0);

        ctx.set_simulation_config(SimulationConfig {
            downsample: 1,
            ..SimulationConfig::default()
        });
        assert_eq!(ctx.pool().size(), (16, 16));
        assert_eq!(max_density(&ctx.read_density()), 0.0);
        assert_eq!(ctx.simulation_config().downsample, 1);
    }

    #[test]
    fn test_pointer_drag_splats_and_renders() {
        let config = config(1, no_seed());
        let mut ctx = context((64, 64), &config);
        let display = (64, 64);
        ctx.handle_pointer(
            PointerEvent {
                contact_id: MOUSE_CONTACT,
                x: 32.0,
                y: 32.0,
                phase: PointerPhase::Start,
            },
            display,
        );
        ctx.handle_pointer(
            PointerEvent {
                contact_id: MOUSE_CONTACT,
                x: 34.0,
                y: 32.0,
                phase: PointerPhase::Move,
            },
            display,
        );
        let report = rendered(ctx.tick(Instant::now(), display));
        assert_eq!(report.impulses.len(), 1);
        assert_eq!(report.impulses[0].velocity_delta, Vec2::new(20.0, 0.0));
        assert!(max_density(&ctx.read_density()) > 0.0);

        let frame = ctx.backend().frame();
        assert_eq!((frame.width, frame.height), display);
    }

    #[test]
    fn test_placeholders_composite_every_tick() {
        let config = config(2, SeedConfig::default());
        let mut ctx = context((64, 48), &config);
        let start = Instant::now();
        for i in 0..3 {
            rendered(ctx.tick(start + Duration::from_millis(16 * i), (64, 48)));
            assert_eq!(ctx.backend().frame().pixels.len(), 64 * 48);
        }
    }

    #[test]
    fn test_into_backend_releases_everything() {
        let config = config(1, no_seed());
        let ctx = context((32, 32), &config);
        let backend = ctx.into_backend();
        assert_eq!(backend.live_textures(), 0);
    }

    /// 512x512 display at half resolution, one splat at pixel (128, 128).
    #[test]
    fn test_single_splat_decays_geometrically() {
        let config = config(1, no_seed());
        let mut ctx = context((512, 512), &config);
        let display = (512, 512);
        let start = Instant::now();
        ctx.enqueue_impulse(Impulse {
            position: Vec2::new(128.0 / 512.0, 128.0 / 512.0),
            velocity_delta: Vec2::new(50.0, 0.0),
            color: Vec3::splat(5.0),
        });

        rendered(ctx.tick(start, display));
        let density = ctx.read_density();
        assert_eq!(density.len(), 256 * 256);
        // Splat centre lands on grid texel (64, 64).
        let initial = density[64 * 256 + 64][0];
        assert!(initial > 1.0, "{initial}");

        for i in 1..=120u64 {
            rendered(ctx.tick(start + Duration::from_millis(16 * i), display));
        }
        // Advection only ever averages, so the peak shrinks at least by the
        // dissipation factor every tick; the margin covers half-float rounding.
        let peak = max_density(&ctx.read_density());
        let bound = 1.5 * 0.98f32.powi(120) * 1.1;
        assert!(peak < bound, "{peak} >= {bound}");

        // What is left sits at the bottom of the reveal ramp, so the frame is the
        // top image to within a few levels.
        let top = RevealImages::placeholders().top;
        let frame = ctx.backend().frame();
        for y in (0..512).step_by(7) {
            for x in (0..512).step_by(7) {
                let (got, want) = (frame.pixel(x, y), top.pixel(x, y));
                for c in 0..3 {
                    assert!(got[c].abs_diff(want[c]) <= 16, "({x}, {y}): {got:?} vs {want:?}");
                }
            }
        }
    }
}
