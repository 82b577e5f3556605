//! Impulse tracker: per-contact pointer state plus a bounded impulse queue.
//!
//! Window callbacks feed [`PointerEvent`]s in between ticks; the tick calls
//! [`ImpulseTracker::drain`] exactly once.

use std::collections::VecDeque;

use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Impulse;
use crate::config::InputConfig;

/// Contact id reserved for the mouse. Its pointer lives in slot 0 for the session.
pub const MOUSE_CONTACT: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Start,
    Move,
    End,
}

/// A pointer sample in device pixels relative to the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub contact_id: u64,
    pub x: f32,
    pub y: f32,
    pub phase: PointerPhase,
}

/// Persistent per-contact state.
#[derive(Debug, Clone, PartialEq)]
pub struct Pointer {
    pub id: u64,
    /// UV, origin top-left.
    pub position: Vec2,
    pub previous_position: Vec2,
    /// Pixel delta of the last motion times sensitivity.
    pub velocity: Vec2,
    pub active: bool,
    /// Moved since the last drain.
    pub moved: bool,
    /// Assigned on the first motion after activation.
    pub color: Option<Vec3>,
    pixel: Vec2,
}

impl Pointer {
    fn retired(id: u64) -> Self {
        Self {
            id,
            position: Vec2::ZERO,
            previous_position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            active: false,
            moved: false,
            color: None,
            pixel: Vec2::ZERO,
        }
    }

    fn activate(&mut self, id: u64, pixel: Vec2, uv: Vec2) {
        self.id = id;
        self.position = uv;
        self.previous_position = uv;
        self.velocity = Vec2::ZERO;
        self.active = true;
        self.moved = false;
        self.color = None;
        self.pixel = pixel;
    }
}

pub struct ImpulseTracker {
    pointers: Vec<Pointer>,
    queue: VecDeque<Impulse>,
    capacity: usize,
    sensitivity: f32,
    rng: StdRng,
}

impl ImpulseTracker {
    pub fn new(config: &InputConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic pointer colors.
    pub fn with_seed(config: &InputConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &InputConfig, rng: StdRng) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            pointers: vec![Pointer::retired(MOUSE_CONTACT)],
            queue: VecDeque::with_capacity(capacity),
            capacity,
            sensitivity: config.sensitivity,
            rng,
        }
    }

    pub fn pointers(&self) -> &[Pointer] {
        &self.pointers
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queue an impulse for the next drain, dropping the oldest when full.
    pub fn enqueue(&mut self, impulse: Impulse) {
        if self.queue.len() >= self.capacity {
            if let Some(dropped) = self.queue.pop_front() {
                log::debug!("Impulse queue full ({}), dropped impulse at {:?}", self.capacity, dropped.position);
            }
        }
        self.queue.push_back(impulse);
    }

    /// Apply one pointer event. `surface` is the surface size in device pixels.
    pub fn handle_event(&mut self, event: PointerEvent, surface: (u32, u32)) {
        if surface.0 == 0 || surface.1 == 0 {
            return;
        }
        let pixel = Vec2::new(event.x, event.y);
        let uv = pixel / Vec2::new(surface.0 as f32, surface.1 as f32);

        match event.phase {
            PointerPhase::Start => {
                let slot = self.slot_for_start(event.contact_id);
                self.pointers[slot].activate(event.contact_id, pixel, uv);
            }
            PointerPhase::Move => {
                let Some(slot) = self.active_slot(event.contact_id) else {
                    return;
                };
                let fresh_color = self.pointers[slot].color.is_none().then(|| self.random_color());
                let pointer = &mut self.pointers[slot];
                pointer.previous_position = pointer.position;
                pointer.position = uv;
                pointer.velocity = (pixel - pointer.pixel) * self.sensitivity;
                pointer.pixel = pixel;
                pointer.moved = true;
                if fresh_color.is_some() {
                    pointer.color = fresh_color;
                }
            }
            PointerPhase::End => {
                if let Some(slot) = self.active_slot(event.contact_id) {
                    self.pointers[slot].active = false;
                }
            }
        }
    }

    /// Queued impulses first, then one per pointer that moved since the last drain.
    pub fn drain(&mut self) -> Vec<Impulse> {
        let mut impulses: Vec<Impulse> = self.queue.drain(..).collect();
        for pointer in &mut self.pointers {
            if !pointer.moved {
                continue;
            }
            pointer.moved = false;
            impulses.push(Impulse {
                position: pointer.position,
                velocity_delta: pointer.velocity,
                color: pointer.color.unwrap_or(Vec3::ONE),
            });
        }
        impulses
    }

    fn active_slot(&self, id: u64) -> Option<usize> {
        self.pointers.iter().position(|p| p.active && p.id == id)
    }

    fn random_color(&mut self) -> Vec3 {
        Vec3::new(self.rng.gen(), self.rng.gen(), self.rng.gen()) + Vec3::splat(0.2)
    }

    /// Mouse always uses slot 0; touches reuse a retired slot or append one.
    fn slot_for_start(&mut self, id: u64) -> usize {
        if id == MOUSE_CONTACT {
            return 0;
        }
        if let Some(slot) = self.active_slot(id) {
            return slot;
        }
        if let Some(slot) = self.pointers.iter().skip(1).position(|p| !p.active) {
            return slot + 1;
        }
        self.pointers.push(Pointer::retired(id));
        self.pointers.len() - 1
    }
}
