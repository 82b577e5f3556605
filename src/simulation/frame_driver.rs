//! Tick timing, display-change detection and random seeding.

use std::time::Instant;

use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SeedConfig;
use crate::input::Impulse;

/// Per-session timing state owned by the tick loop.
pub struct FrameDriver {
    max_dt: f32,
    last_tick: Option<Instant>,
    display_size: (u32, u32),
    reseed_pending: bool,
    seed: SeedConfig,
    rng: StdRng,
}

impl FrameDriver {
    pub fn new(max_dt: f32, seed: SeedConfig, display_size: (u32, u32)) -> Self {
        Self::with_rng(max_dt, seed, display_size, StdRng::from_entropy())
    }

    /// Deterministic seeding, for tests and reproducible runs.
    pub fn with_seed(max_dt: f32, seed: SeedConfig, display_size: (u32, u32), rng_seed: u64) -> Self {
        Self::with_rng(max_dt, seed, display_size, StdRng::seed_from_u64(rng_seed))
    }

    fn with_rng(max_dt: f32, seed: SeedConfig, display_size: (u32, u32), rng: StdRng) -> Self {
        Self {
            max_dt,
            last_tick: None,
            display_size,
            // The first tick seeds.
            reseed_pending: true,
            seed,
            rng,
        }
    }

    pub fn set_max_dt(&mut self, max_dt: f32) {
        self.max_dt = max_dt;
    }

    /// Seconds since the previous tick, clamped to `[0, max_dt]`.
    /// The first tick after construction or [`Self::pause`] gets `max_dt`.
    pub fn next_dt(&mut self, now: Instant) -> f32 {
        let dt = match self.last_tick {
            Some(last) => now.saturating_duration_since(last).as_secs_f32(),
            None => self.max_dt,
        };
        self.last_tick = Some(now);
        dt.clamp(0.0, self.max_dt)
    }

    /// Forget the previous tick time, e.g. while the window is minimized.
    pub fn pause(&mut self) {
        self.last_tick = None;
    }

    /// Record `display_size`, returning true when it differs from the last one seen.
    pub fn observe_display(&mut self, display_size: (u32, u32)) -> bool {
        if display_size == self.display_size {
            return false;
        }
        log::debug!(
            "Display changed: {}x{} -> {}x{}",
            self.display_size.0,
            self.display_size.1,
            display_size.0,
            display_size.1
        );
        self.display_size = display_size;
        true
    }

    pub fn display_size(&self) -> (u32, u32) {
        self.display_size
    }

    pub fn request_reseed(&mut self) {
        self.reseed_pending = true;
    }

    /// True once per reseed request.
    pub fn take_reseed(&mut self) -> bool {
        std::mem::take(&mut self.reseed_pending)
    }

    /// A random batch of seed splats anywhere on the display.
    pub fn seed_impulses(&mut self) -> Vec<Impulse> {
        let min = self.seed.min_splats.min(self.seed.max_splats);
        let max = self.seed.min_splats.max(self.seed.max_splats);
        let count = self.rng.gen_range(min..=max);
        let velocity_range = self.seed.velocity_range;
        let color_range = self.seed.color_range;

        (0..count)
            .map(|_| {
                let position = Vec2::new(self.rng.gen(), self.rng.gen());
                let velocity = Vec2::new(self.rng.gen::<f32>() - 0.5, self.rng.gen::<f32>() - 0.5);
                let color = Vec3::new(self.rng.gen(), self.rng.gen(), self.rng.gen());
                Impulse {
                    position,
                    velocity_delta: velocity * velocity_range,
                    color: color * color_range,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn driver() -> FrameDriver {
        FrameDriver::with_seed(0.016, SeedConfig::default(), (640, 480), 3)
    }

    #[test]
    fn test_first_tick_uses_max_dt() {
        let mut d = driver();
        assert_eq!(d.next_dt(Instant::now()), 0.016);
    }

    #[test]
    fn test_dt_is_clamped() {
        let mut d = driver();
        let start = Instant::now();
        d.next_dt(start);
        assert!((d.next_dt(start + Duration::from_millis(5)) - 0.005).abs() < 1e-6);
        assert_eq!(d.next_dt(start + Duration::from_secs(2)), 0.016);
        // Clock going backwards reads as zero.
        assert_eq!(d.next_dt(start), 0.0);
    }

    #[test]
    fn test_pause_resets_dt() {
        let mut d = driver();
        let start = Instant::now();
        d.next_dt(start);
        d.pause();
        assert_eq!(d.next_dt(start + Duration::from_millis(1)), 0.016);
    }

    #[test]
    fn test_display_change_is_reported_once() {
        let mut d = driver();
        assert!(!d.observe_display((640, 480)));
        assert!(d.observe_display((800, 600)));
        assert!(!d.observe_display((800, 600)));
        assert_eq!(d.display_size(), (800, 600));
    }

    #[test]
    fn test_reseed_flag() {
        let mut d = driver();
        assert!(d.take_reseed());
        assert!(!d.take_reseed());
        d.request_reseed();
        assert!(d.take_reseed());
    }

    #[test]
    fn test_seed_impulses_within_bounds() {
        let mut d = driver();
        for _ in 0..50 {
            let impulses = d.seed_impulses();
            assert!((5..=25).contains(&impulses.len()), "{}", impulses.len());
            for impulse in impulses {
                assert!(impulse.position.cmpge(Vec2::ZERO).all() && impulse.position.cmplt(Vec2::ONE).all());
                assert!(impulse.velocity_delta.abs().cmple(Vec2::splat(500.0)).all());
                assert!(impulse.color.cmpge(Vec3::ZERO).all() && impulse.color.cmple(Vec3::splat(10.0)).all());
            }
        }
    }

    #[test]
    fn test_inverted_seed_range_is_tolerated() {
        let seed = SeedConfig {
            min_splats: 4,
            max_splats: 2,
            ..SeedConfig::default()
        };
        let mut d = FrameDriver::with_seed(0.016, seed, (10, 10), 0);
        assert!((2..=4).contains(&d.seed_impulses().len()));
    }
}
