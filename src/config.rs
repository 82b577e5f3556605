//! Application configuration, stored as RON.
//!
//! Lookup order: `fluid_reveal.ron` in the working directory, then the copy of
//! `default_config.ron` embedded at build time, then [`AppConfig::default`].
//! Every section is `#[serde(default)]`, so a file only needs the values it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the user config file looked up in the working directory.
pub const CONFIG_FILE: &str = "fluid_reveal.ron";

const EMBEDDED_DEFAULT: &str = include_str!("../default_config.ron");

/// Solver parameters. Immutable while a simulation runs; replacing them
/// reallocates every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Grid size is `display >> downsample`.
    pub downsample: u32,
    /// Per-tick multiplier on density during advection.
    pub density_dissipation: f32,
    /// Per-tick multiplier on velocity during advection.
    pub velocity_dissipation: f32,
    /// Multiplier applied to last tick's pressure before the Jacobi solve.
    pub pressure_dissipation: f32,
    pub pressure_iterations: u32,
    /// Vorticity confinement strength.
    pub curl: f32,
    /// Gaussian splat radius in squared UV units.
    pub splat_radius: f32,
    /// Density splats inject `color * splat_color_scale`.
    pub splat_color_scale: f32,
    /// Upper bound on the timestep in seconds.
    pub max_dt: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            downsample: 1,
            density_dissipation: 0.98,
            velocity_dissipation: 0.99,
            pressure_dissipation: 0.8,
            pressure_iterations: 25,
            curl: 30.0,
            splat_radius: 0.005,
            splat_color_scale: 0.3,
            max_dt: 0.016,
        }
    }
}

impl SimulationConfig {
    /// Clamp out-of-range values, logging a warning for each one changed.
    pub fn validated(mut self) -> Self {
        fn clamp<T: PartialOrd + Copy + std::fmt::Debug>(name: &str, value: &mut T, min: T, max: T) {
            let clamped = if *value < min {
                min
            } else if *value > max {
                max
            } else {
                *value
            };
            if clamped != *value {
                log::warn!("simulation.{name} = {value:?} is out of range, using {clamped:?}");
                *value = clamped;
            }
        }

        clamp("downsample", &mut self.downsample, 0, 8);
        clamp("density_dissipation", &mut self.density_dissipation, 0.0, 1.0);
        clamp("velocity_dissipation", &mut self.velocity_dissipation, 0.0, 1.0);
        clamp("pressure_dissipation", &mut self.pressure_dissipation, 0.0, 1.0);
        clamp("pressure_iterations", &mut self.pressure_iterations, 1, 200);
        clamp("curl", &mut self.curl, 0.0, 1000.0);
        clamp("splat_radius", &mut self.splat_radius, 1e-5, 1.0);
        clamp("splat_color_scale", &mut self.splat_color_scale, 0.0, 10.0);
        clamp("max_dt", &mut self.max_dt, 1e-4, 0.1);
        // NaN fails every comparison above.
        for (name, value, fallback) in [
            ("density_dissipation", &mut self.density_dissipation, 0.98),
            ("velocity_dissipation", &mut self.velocity_dissipation, 0.99),
            ("pressure_dissipation", &mut self.pressure_dissipation, 0.8),
            ("curl", &mut self.curl, 30.0),
            ("splat_radius", &mut self.splat_radius, 0.005),
            ("splat_color_scale", &mut self.splat_color_scale, 0.3),
            ("max_dt", &mut self.max_dt, 0.016),
        ] {
            if value.is_nan() {
                log::warn!("simulation.{name} is NaN, using {fallback}");
                *value = fallback;
            }
        }
        self
    }
}

/// Pointer input handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Multiplier from pointer motion in pixels to splat velocity.
    pub sensitivity: f32,
    /// Maximum queued impulses between ticks; the oldest is dropped beyond this.
    pub queue_capacity: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            sensitivity: 10.0,
            queue_capacity: 64,
        }
    }
}

/// Random splats injected at startup and after every reallocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub min_splats: u32,
    pub max_splats: u32,
    /// Each velocity component is `velocity_range * (rand - 0.5)`.
    pub velocity_range: f32,
    /// Each color channel is `color_range * rand`.
    pub color_range: f32,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            min_splats: 5,
            max_splats: 25,
            velocity_range: 1000.0,
            color_range: 10.0,
        }
    }
}

/// Reveal composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    /// Density at which the bottom image starts to show.
    pub reveal_low: f32,
    /// Density at which the bottom image fully replaces the top one.
    pub reveal_high: f32,
    pub top_image: Option<PathBuf>,
    pub bottom_image: Option<PathBuf>,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            reveal_low: 0.05,
            reveal_high: 0.6,
            top_image: None,
            bottom_image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Fluid Reveal".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub simulation: SimulationConfig,
    pub input: InputConfig,
    pub seed: SeedConfig,
    pub composite: CompositeConfig,
    pub window: WindowConfig,
}

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

impl AppConfig {
    /// Load from the working directory, falling back to the embedded default.
    pub fn load() -> Self {
        let path = PathBuf::from(CONFIG_FILE);

        if path.exists() {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    log::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    log::warn!("Failed to load config: {}. Using embedded default.", e);
                }
            }
        } else {
            log::info!("No {} found, using embedded default", CONFIG_FILE);
        }

        Self::load_embedded_default()
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_ron(&contents)?)
    }

    pub fn from_ron(contents: &str) -> Result<Self, ron::error::SpannedError> {
        let mut config: AppConfig = ron::from_str(contents)?;
        config.simulation = config.simulation.validated();
        Ok(config)
    }

    fn load_embedded_default() -> Self {
        match Self::from_ron(EMBEDDED_DEFAULT) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Embedded default config is invalid: {}. Using built-in values.", e);
                Self::default()
            }
        }
    }
}
