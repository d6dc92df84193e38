//! Core entity structs shared by every crate in the workspace.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::enums::Colour;
use crate::ids::{AgentId, BikeId, PickupId};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A point (or vector) on the 2D playing field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Horizontal component.
    pub x: f64,
    /// Vertical component.
    pub y: f64,
}

impl Coordinates {
    /// Construct a point from its components.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Euclidean length of the vector from the origin.
    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Heading from `self` towards `target`, normalised to (-1, 1] where 1
    /// corresponds to a half turn.
    pub fn heading_to(self, target: Self) -> f64 {
        (target.y - self.y).atan2(target.x - self.x) / PI
    }
}

/// Kinematic state of a moving object, owned by the physics model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalState {
    /// Current position.
    pub position: Coordinates,
    /// Scalar speed along the current orientation.
    pub velocity: f64,
    /// Acceleration applied during the last step.
    pub acceleration: f64,
    /// Total mass.
    pub mass: f64,
}

impl PhysicalState {
    /// A stationary object of the given mass at `position`.
    pub const fn at_rest(position: Coordinates, mass: f64) -> Self {
        Self {
            position,
            velocity: 0.0,
            acceleration: 0.0,
            mass,
        }
    }
}

// ---------------------------------------------------------------------------
// Forces
// ---------------------------------------------------------------------------

/// Whether and how hard an agent steers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TurningDecision {
    /// Whether the agent takes part in steering this round.
    pub steer_bike: bool,
    /// Requested turn in (-1, 1], where 1 is a half turn.
    pub steering_force: f64,
}

/// The pedalling output an agent contributes to its bike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Forces {
    /// Forward force, normally in [0, 1].
    pub pedal: f64,
    /// Braking force, only counted when `pedal` is zero.
    pub brake: f64,
    /// Steering input.
    pub turning: TurningDecision,
}

impl Forces {
    /// Project the pedal force onto the steering direction.
    pub fn to_vector(&self) -> Coordinates {
        let angle = PI * self.turning.steering_force;
        Coordinates::new(self.pedal * angle.cos(), self.pedal * angle.sin())
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// The state of a biker agent as seen by the engine.
///
/// Decision logic lives in a separate policy object; this struct is the part
/// of an agent the engine owns and mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Biker {
    /// Unique agent identifier.
    pub id: AgentId,
    /// Colour used to match pickups for bonus points.
    pub colour: Colour,
    /// Energy level. The agent dies when this drops below zero.
    pub energy: f64,
    /// Accumulated score.
    pub points: u32,
    /// Whether the agent is currently seated on `bike`.
    pub on_bike: bool,
    /// Current bike when `on_bike`, otherwise the bike the agent wants to join.
    pub bike: Option<BikeId>,
    /// Forces chosen in the most recent round.
    pub forces: Forces,
}

impl Biker {
    /// Create an off-bike agent with the given colour and energy.
    pub fn new(colour: Colour, energy: f64) -> Self {
        Self {
            id: AgentId::new(),
            colour,
            energy,
            points: 0,
            on_bike: false,
            bike: None,
            forces: Forces::default(),
        }
    }

    /// Add `delta` to the energy level, capping the result at `cap`.
    ///
    /// A NaN result is kept rather than replaced by the cap.
    pub fn update_energy(&mut self, delta: f64, cap: f64) {
        let next = self.energy + delta;
        self.energy = if next > cap { cap } else { next };
    }

    /// Add bonus points.
    pub const fn add_points(&mut self, points: u32) {
        self.points = self.points.saturating_add(points);
    }

    /// The bike this agent is riding, if seated.
    pub const fn riding(&self) -> Option<BikeId> {
        if self.on_bike { self.bike } else { None }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// A positioned resource box that bikes collect by driving onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pickup {
    /// Unique pickup identifier.
    pub id: PickupId,
    /// Where the pickup sits.
    pub position: Coordinates,
    /// Energy shared out between the bikes that collect it.
    pub total_resources: f64,
    /// Members whose colour matches earn bonus points.
    pub colour: Colour,
}

impl Pickup {
    /// Create a pickup with a fresh id.
    pub fn new(position: Coordinates, total_resources: f64, colour: Colour) -> Self {
        Self {
            id: PickupId::new(),
            position,
            total_resources,
            colour,
        }
    }
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

/// An inter-agent message. The engine only routes it; the body is opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The sending agent.
    pub sender: AgentId,
    /// Intended recipients. The sender never receives its own message.
    pub recipients: Vec<AgentId>,
    /// Free-form topic tag chosen by the sender's policy.
    pub topic: String,
    /// Opaque payload.
    pub body: serde_json::Value,
}
