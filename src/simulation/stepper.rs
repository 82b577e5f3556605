//! The fixed per-tick pipeline.
//!
//! Order per tick:
//! 1. advect velocity by itself
//! 2. advect density by the new velocity
//! 3. splat every drained impulse into velocity and density
//! 4. curl
//! 5. vorticity confinement
//! 6. divergence
//! 7. attenuate last tick's pressure, then Jacobi iterations
//! 8. subtract the pressure gradient from velocity
//!
//! Every write to a double-buffered field is followed by a swap, so `read()` is
//! always the latest state.

use glam::{Vec2, Vec3};

use super::backend::FluidBackend;
use super::pass::{Bindings, Pass};
use super::programs::ProgramRegistry;
use super::render_targets::RenderTargetPool;
use super::stages::{Param, StageId};
use crate::config::SimulationConfig;
use crate::input::Impulse;

pub struct SimulationStepper {
    config: SimulationConfig,
}

impl SimulationStepper {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run one tick of the solver. `dt` is clamped to `max_dt`.
    pub fn step<B: FluidBackend>(
        &self,
        backend: &mut B,
        registry: &ProgramRegistry<B::Program>,
        pool: &mut RenderTargetPool<B::Field>,
        dt: f32,
        impulses: &[Impulse],
    ) {
        let dt = dt.clamp(0.0, self.config.max_dt);
        let (width, height) = pool.size();
        let texel_size = Vec2::new(1.0 / width as f32, 1.0 / height as f32);
        log::trace!("Step {}x{} dt={:.4} impulses={}", width, height, dt, impulses.len());

        self.advect(backend, registry, pool, texel_size, dt);
        for impulse in impulses {
            self.splat(backend, registry, pool, texel_size, impulse);
        }
        self.project(backend, registry, pool, texel_size, dt);
    }

    fn advect<B: FluidBackend>(
        &self,
        backend: &mut B,
        registry: &ProgramRegistry<B::Program>,
        pool: &mut RenderTargetPool<B::Field>,
        texel_size: Vec2,
        dt: f32,
    ) {
        {
            let fields = pool.fields();
            let velocity = fields.velocity.read();
            let bindings = Bindings::new()
                .vec2(Param::TexelSize, texel_size)
                .float(Param::Dt, dt)
                .float(Param::Dissipation, self.config.velocity_dissipation)
                .texture(Param::VelocityField, velocity)
                .texture(Param::SourceField, velocity);
            registry.run(backend, &Pass::to_field(StageId::Advection, fields.velocity.write(), bindings));
        }
        pool.fields_mut().velocity.swap();

        {
            let fields = pool.fields();
            let bindings = Bindings::new()
                .vec2(Param::TexelSize, texel_size)
                .float(Param::Dt, dt)
                .float(Param::Dissipation, self.config.density_dissipation)
                .texture(Param::VelocityField, fields.velocity.read())
                .texture(Param::SourceField, fields.density.read());
            registry.run(backend, &Pass::to_field(StageId::Advection, fields.density.write(), bindings));
        }
        pool.fields_mut().density.swap();
    }

    fn splat<B: FluidBackend>(
        &self,
        backend: &mut B,
        registry: &ProgramRegistry<B::Program>,
        pool: &mut RenderTargetPool<B::Field>,
        texel_size: Vec2,
        impulse: &Impulse,
    ) {
        let (width, height) = pool.size();
        let aspect_ratio = width as f32 / height as f32;

        {
            let fields = pool.fields();
            let bindings = self
                .splat_bindings(texel_size, aspect_ratio, impulse)
                .vec3(Param::Color, impulse.velocity_delta.extend(0.0))
                .texture(Param::TargetField, fields.velocity.read());
            registry.run(backend, &Pass::to_field(StageId::Splat, fields.velocity.write(), bindings));
        }
        pool.fields_mut().velocity.swap();

        {
            let fields = pool.fields();
            let color: Vec3 = impulse.color * self.config.splat_color_scale;
            let bindings = self
                .splat_bindings(texel_size, aspect_ratio, impulse)
                .vec3(Param::Color, color)
                .texture(Param::TargetField, fields.density.read());
            registry.run(backend, &Pass::to_field(StageId::Splat, fields.density.write(), bindings));
        }
        pool.fields_mut().density.swap();
    }

    fn splat_bindings<'a, F>(&self, texel_size: Vec2, aspect_ratio: f32, impulse: &Impulse) -> Bindings<'a, F> {
        Bindings::new()
            .vec2(Param::TexelSize, texel_size)
            .float(Param::AspectRatio, aspect_ratio)
            .vec2(Param::Point, impulse.position)
            .float(Param::Radius, self.config.splat_radius)
    }

    fn project<B: FluidBackend>(
        &self,
        backend: &mut B,
        registry: &ProgramRegistry<B::Program>,
        pool: &mut RenderTargetPool<B::Field>,
        texel_size: Vec2,
        dt: f32,
    ) {
        {
            let fields = pool.fields();
            let bindings = Bindings::new()
                .vec2(Param::TexelSize, texel_size)
                .texture(Param::VelocityField, fields.velocity.read());
            registry.run(backend, &Pass::to_field(StageId::Curl, &fields.curl, bindings));
        }

        {
            let fields = pool.fields();
            let bindings = Bindings::new()
                .vec2(Param::TexelSize, texel_size)
                .float(Param::CurlStrength, self.config.curl)
                .float(Param::Dt, dt)
                .texture(Param::VelocityField, fields.velocity.read())
                .texture(Param::CurlField, &fields.curl);
            registry.run(backend, &Pass::to_field(StageId::Vorticity, fields.velocity.write(), bindings));
        }
        pool.fields_mut().velocity.swap();

        {
            let fields = pool.fields();
            let bindings = Bindings::new()
                .vec2(Param::TexelSize, texel_size)
                .texture(Param::VelocityField, fields.velocity.read());
            registry.run(backend, &Pass::to_field(StageId::Divergence, &fields.divergence, bindings));
        }

        {
            let fields = pool.fields();
            let bindings = Bindings::new()
                .vec2(Param::TexelSize, texel_size)
                .float(Param::Value, self.config.pressure_dissipation)
                .texture(Param::InputField, fields.pressure.read());
            registry.run(backend, &Pass::to_field(StageId::Clear, fields.pressure.write(), bindings));
        }
        pool.fields_mut().pressure.swap();

        for _ in 0..self.config.pressure_iterations {
            {
                let fields = pool.fields();
                let bindings = Bindings::new()
                    .vec2(Param::TexelSize, texel_size)
                    .texture(Param::PressureField, fields.pressure.read())
                    .texture(Param::DivergenceField, &fields.divergence);
                registry.run(backend, &Pass::to_field(StageId::Pressure, fields.pressure.write(), bindings));
            }
            pool.fields_mut().pressure.swap();
        }

        {
            let fields = pool.fields();
            let bindings = Bindings::new()
                .vec2(Param::TexelSize, texel_size)
                .texture(Param::PressureField, fields.pressure.read())
                .texture(Param::VelocityField, fields.velocity.read());
            registry.run(backend, &Pass::to_field(StageId::GradientSubtract, fields.velocity.write(), bindings));
        }
        pool.fields_mut().velocity.swap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::cpu::{CpuBackend, CpuField};

    struct Rig {
        backend: CpuBackend,
        registry: ProgramRegistry<crate::simulation::cpu::CpuProgram>,
        pool: RenderTargetPool<CpuField>,
    }

    fn rig(width: u32, height: u32) -> Rig {
        let mut backend = CpuBackend::new();
        let pool = RenderTargetPool::new(&mut backend, (width, height), 0).unwrap();
        let registry = ProgramRegistry::build(&mut backend, pool.filter()).unwrap();
        Rig {
            backend,
            registry,
            pool,
        }
    }

    fn max_abs(texels: &[[f32; 4]], channels: usize) -> f32 {
        texels
            .iter()
            .flat_map(|t| t[..channels].iter().map(|v| v.abs()))
            .fold(0.0, f32::max)
    }

    fn total_abs(texels: &[[f32; 4]]) -> f32 {
        texels.iter().map(|t| t[0].abs()).sum()
    }

    #[test]
    fn test_impulse_raises_density_at_center_only() {
        let mut rig = rig(32, 32);
        let stepper = SimulationStepper::new(SimulationConfig::default());
        let impulse = Impulse {
            position: Vec2::splat(0.5),
            velocity_delta: Vec2::ZERO,
            color: Vec3::splat(2.0),
        };
        stepper.step(&mut rig.backend, &rig.registry, &mut rig.pool, 0.016, &[impulse]);

        let density = rig.backend.read_field(rig.pool.fields().density.read());
        let at = |x: usize, y: usize| density[y * 32 + x][0];
        assert!(at(16, 16) > 0.4, "{}", at(16, 16));
        assert!(at(15, 15) > 0.4);
        assert!(at(0, 0).abs() < 1e-6);
    }

    #[test]
    fn test_dissipation_drives_fields_toward_zero() {
        let mut rig = rig(24, 24);
        let config = SimulationConfig {
            density_dissipation: 0.9,
            velocity_dissipation: 0.9,
            curl: 0.0,
            ..SimulationConfig::default()
        };
        let stepper = SimulationStepper::new(config);
        let impulse = Impulse {
            position: Vec2::new(0.4, 0.6),
            velocity_delta: Vec2::new(200.0, -100.0),
            color: Vec3::splat(3.0),
        };
        stepper.step(&mut rig.backend, &rig.registry, &mut rig.pool, 0.016, &[impulse]);
        let density_start = max_abs(&rig.backend.read_field(rig.pool.fields().density.read()), 4);
        let velocity_start = max_abs(&rig.backend.read_field(rig.pool.fields().velocity.read()), 2);

        for _ in 0..60 {
            stepper.step(&mut rig.backend, &rig.registry, &mut rig.pool, 0.016, &[]);
        }
        let density_end = max_abs(&rig.backend.read_field(rig.pool.fields().density.read()), 4);
        let velocity_end = max_abs(&rig.backend.read_field(rig.pool.fields().velocity.read()), 2);

        assert!(density_end <= density_start * 0.9f32.powi(60) * 1.05, "{density_start} -> {density_end}");
        assert!(velocity_end < velocity_start * 0.1, "{velocity_start} -> {velocity_end}");
    }

    #[test]
    fn test_gradient_subtraction_reduces_divergence() {
        let mut rig = rig(32, 32);
        let config = SimulationConfig {
            curl: 0.0,
            ..SimulationConfig::default()
        };
        let stepper = SimulationStepper::new(config);

        // A strongly diverging blob, injected directly so projection hasn't run yet.
        let impulses = [
            Impulse {
                position: Vec2::new(0.35, 0.5),
                velocity_delta: Vec2::new(-300.0, 0.0),
                color: Vec3::ZERO,
            },
            Impulse {
                position: Vec2::new(0.65, 0.5),
                velocity_delta: Vec2::new(300.0, 0.0),
                color: Vec3::ZERO,
            },
        ];
        for impulse in &impulses {
            stepper.splat(&mut rig.backend, &rig.registry, &mut rig.pool, Vec2::splat(1.0 / 32.0), impulse);
        }

        let measure = |rig: &mut Rig| {
            let fields = rig.pool.fields();
            let bindings = Bindings::new()
                .vec2(Param::TexelSize, Vec2::splat(1.0 / 32.0))
                .texture(Param::VelocityField, fields.velocity.read());
            rig.registry
                .run(&mut rig.backend, &Pass::to_field(StageId::Divergence, &fields.divergence, bindings));
            total_abs(&rig.backend.read_field(&rig.pool.fields().divergence))
        };

        let before = measure(&mut rig);
        stepper.project(&mut rig.backend, &rig.registry, &mut rig.pool, Vec2::splat(1.0 / 32.0), 0.016);
        let after = measure(&mut rig);
        assert!(after < before * 0.8, "{before} -> {after}");
    }

    #[test]
    fn test_pass_count_per_tick() {
        let mut rig = rig(8, 8);
        let stepper = SimulationStepper::new(SimulationConfig::default());
        let impulse = Impulse {
            position: Vec2::splat(0.5),
            velocity_delta: Vec2::ONE,
            color: Vec3::ONE,
        };
        stepper.step(&mut rig.backend, &rig.registry, &mut rig.pool, 0.016, &[impulse, impulse]);
        // 2 advections, 2 splats per impulse, curl, vorticity, divergence, clear,
        // the Jacobi iterations, gradient subtraction
        let expected = 2 + 2 * 2 + 4 + 25 + 1;
        assert_eq!(rig.backend.draw_count(), expected);
    }
}
