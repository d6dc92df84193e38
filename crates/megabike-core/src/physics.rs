//! Physics model used to move bikes and the hazard.
//!
//! The engine only depends on the [`Physics`] trait. [`NewtonianPhysics`] is
//! the default: a point mass driven along its orientation against quadratic
//! drag.

use std::f64::consts::PI;

use megabike_types::{Coordinates, PhysicalState};

use crate::config::PhysicsConfig;

/// Integrates motion and measures distance.
pub trait Physics: std::fmt::Debug {
    /// Advance `state` by one round under `force`, heading along
    /// `orientation` (in half turns, range (-1, 1]).
    fn next_state(&self, state: &PhysicalState, force: f64, orientation: f64) -> PhysicalState;

    /// Distance between two points.
    fn distance(&self, a: Coordinates, b: Coordinates) -> f64 {
        a.distance_to(b)
    }
}

/// Point-mass motion with quadratic drag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonianPhysics {
    /// Drag coefficient applied to the squared speed.
    pub drag_coefficient: f64,
}

impl NewtonianPhysics {
    /// Build from the physics config section.
    pub const fn from_config(config: &PhysicsConfig) -> Self {
        Self {
            drag_coefficient: config.drag_coefficient,
        }
    }
}

impl Physics for NewtonianPhysics {
    fn next_state(&self, state: &PhysicalState, force: f64, orientation: f64) -> PhysicalState {
        if state.mass <= 0.0 {
            return *state;
        }
        let drag = self.drag_coefficient * state.velocity * state.velocity;
        let acceleration = (force - drag) / state.mass;
        let velocity = (state.velocity + acceleration).max(0.0);
        let angle = PI * orientation;
        PhysicalState {
            position: Coordinates::new(
                velocity.mul_add(angle.cos(), state.position.x),
                velocity.mul_add(angle.sin(), state.position.y),
            ),
            velocity,
            acceleration,
            mass: state.mass,
        }
    }
}

/// Wrap an angle in half turns into (-1, 1].
pub fn wrap_orientation(value: f64) -> f64 {
    let wrapped = (value + 1.0).rem_euclid(2.0) - 1.0;
    if wrapped <= -1.0 { wrapped + 2.0 } else { wrapped }
}
