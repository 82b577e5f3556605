//! The fixed set of pipeline stages and the closed set of parameters they bind.
//!
//! Shader parameter names are mapped onto [`Param`] once, when a program is linked.
//! After that every bind goes through the enum; nothing is looked up by string at
//! draw time.

use std::fmt;

/// Shared fullscreen vertex stage.
pub const BASE_VERTEX_SOURCE: &str = include_str!("../../shaders/fluid/base_vertex.wgsl");

/// Vertex entry point every program uses.
pub const VERTEX_ENTRY: &str = "vs_main";

/// Default fragment entry point.
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Advection entry point that filters by hand from nearest-neighbour taps.
pub const MANUAL_FILTERING_ENTRY: &str = "fs_main_manual_filtering";

/// One of the nine programs the solver is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Clear,
    Display,
    Splat,
    Advection,
    Divergence,
    Curl,
    Vorticity,
    Pressure,
    GradientSubtract,
}

impl StageId {
    pub const ALL: [StageId; 9] = [
        StageId::Clear,
        StageId::Display,
        StageId::Splat,
        StageId::Advection,
        StageId::Divergence,
        StageId::Curl,
        StageId::Vorticity,
        StageId::Pressure,
        StageId::GradientSubtract,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StageId::Clear => "clear",
            StageId::Display => "display",
            StageId::Splat => "splat",
            StageId::Advection => "advection",
            StageId::Divergence => "divergence",
            StageId::Curl => "curl",
            StageId::Vorticity => "vorticity",
            StageId::Pressure => "pressure",
            StageId::GradientSubtract => "gradient_subtract",
        }
    }

    /// WGSL source of the fragment stage.
    pub fn fragment_source(self) -> &'static str {
        match self {
            StageId::Clear => include_str!("../../shaders/fluid/clear.wgsl"),
            StageId::Display => include_str!("../../shaders/fluid/display.wgsl"),
            StageId::Splat => include_str!("../../shaders/fluid/splat.wgsl"),
            StageId::Advection => include_str!("../../shaders/fluid/advection.wgsl"),
            StageId::Divergence => include_str!("../../shaders/fluid/divergence.wgsl"),
            StageId::Curl => include_str!("../../shaders/fluid/curl.wgsl"),
            StageId::Vorticity => include_str!("../../shaders/fluid/vorticity.wgsl"),
            StageId::Pressure => include_str!("../../shaders/fluid/pressure.wgsl"),
            StageId::GradientSubtract => include_str!("../../shaders/fluid/gradient_subtract.wgsl"),
        }
    }

    /// Parameters the solver binds for this stage. Linking fails if the shaders
    /// don't declare every one of them.
    pub fn required_params(self) -> &'static [Param] {
        use Param::*;
        match self {
            StageId::Clear => &[TexelSize, Value, InputField],
            StageId::Display => &[TexelSize, RevealLow, RevealHigh, DensityField, TopImage, BottomImage],
            StageId::Splat => &[TexelSize, AspectRatio, Point, Color, Radius, TargetField],
            StageId::Advection => &[TexelSize, Dt, Dissipation, VelocityField, SourceField],
            StageId::Divergence => &[TexelSize, VelocityField],
            StageId::Curl => &[TexelSize, VelocityField],
            StageId::Vorticity => &[TexelSize, CurlStrength, Dt, VelocityField, CurlField],
            StageId::Pressure => &[TexelSize, PressureField, DivergenceField],
            StageId::GradientSubtract => &[TexelSize, PressureField, VelocityField],
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of a parameter's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Vec2,
    Vec3,
    Texture,
}

/// Every parameter any stage may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    // Uniforms
    TexelSize,
    Dt,
    Dissipation,
    AspectRatio,
    Point,
    Color,
    Radius,
    CurlStrength,
    Value,
    RevealLow,
    RevealHigh,
    // Sampled fields and images
    VelocityField,
    SourceField,
    TargetField,
    CurlField,
    DivergenceField,
    PressureField,
    InputField,
    DensityField,
    TopImage,
    BottomImage,
}

impl Param {
    pub const ALL: [Param; 21] = [
        Param::TexelSize,
        Param::Dt,
        Param::Dissipation,
        Param::AspectRatio,
        Param::Point,
        Param::Color,
        Param::Radius,
        Param::CurlStrength,
        Param::Value,
        Param::RevealLow,
        Param::RevealHigh,
        Param::VelocityField,
        Param::SourceField,
        Param::TargetField,
        Param::CurlField,
        Param::DivergenceField,
        Param::PressureField,
        Param::InputField,
        Param::DensityField,
        Param::TopImage,
        Param::BottomImage,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Identifier used for this parameter in WGSL.
    pub fn shader_name(self) -> &'static str {
        match self {
            Param::TexelSize => "texel_size",
            Param::Dt => "dt",
            Param::Dissipation => "dissipation",
            Param::AspectRatio => "aspect_ratio",
            Param::Point => "point",
            Param::Color => "color",
            Param::Radius => "radius",
            Param::CurlStrength => "curl_strength",
            Param::Value => "value",
            Param::RevealLow => "reveal_low",
            Param::RevealHigh => "reveal_high",
            Param::VelocityField => "velocity_field",
            Param::SourceField => "source_field",
            Param::TargetField => "target_field",
            Param::CurlField => "curl_field",
            Param::DivergenceField => "divergence_field",
            Param::PressureField => "pressure_field",
            Param::InputField => "input_field",
            Param::DensityField => "density_field",
            Param::TopImage => "top_image",
            Param::BottomImage => "bottom_image",
        }
    }

    pub fn from_shader_name(name: &str) -> Option<Param> {
        Param::ALL.into_iter().find(|p| p.shader_name() == name)
    }

    pub fn kind(self) -> ParamKind {
        match self {
            Param::TexelSize | Param::Point => ParamKind::Vec2,
            Param::Color => ParamKind::Vec3,
            Param::Dt
            | Param::Dissipation
            | Param::AspectRatio
            | Param::Radius
            | Param::CurlStrength
            | Param::Value
            | Param::RevealLow
            | Param::RevealHigh => ParamKind::Float,
            _ => ParamKind::Texture,
        }
    }
}
