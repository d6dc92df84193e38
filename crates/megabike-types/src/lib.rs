//! Shared type definitions for the MegaBike governance simulation.
//!
//! This crate is the single source of truth for identifiers, enumerations and
//! plain data structs used across the workspace.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for all entity identifiers
//! - [`enums`] -- Governance modes, rule categories, comparators, colours
//! - [`structs`] -- Geometry, forces, agents, pickups, messages

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Action, AgentDecision, Colour, Comparator, Governance, RuleInput};
pub use ids::{AgentId, BikeId, PickupId, RuleId};
pub use structs::{Biker, Coordinates, Forces, Message, PhysicalState, Pickup, TurningDecision};
