//! Pointer input and the impulses it produces.

pub mod pointer;

pub use pointer::{ImpulseTracker, Pointer, PointerEvent, PointerPhase, MOUSE_CONTACT};

use glam::{Vec2, Vec3};

/// A localized injection of velocity and dye, consumed once by the stepper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Impulse {
    /// Centre in UV, origin top-left.
    pub position: Vec2,
    /// Velocity added at the centre, in texels per second.
    pub velocity_delta: Vec2,
    /// Dye added at the centre, before `splat_color_scale`.
    pub color: Vec3,
}
