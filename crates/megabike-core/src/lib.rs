//! Governance, voting and round orchestration for the MegaBike simulation.
//!
//! This crate owns the world state and the round loop that advances it.
//! Agent behaviour is supplied from outside through the [`BikerPolicy`]
//! trait; the crate validates every decision before applying it.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `megabike-config.yaml` into
//!   strongly-typed structs.
//! - [`physics`] -- [`Physics`] trait and the default Newtonian model.
//! - [`voting`] -- Weighted vote aggregation primitives.
//! - [`bike`] -- [`MegaBike`] and the roaming [`Hazard`].
//! - [`policy`] -- [`BikerPolicy`] trait, decision context and [`StubPolicy`].
//! - [`state`] -- [`SimulationState`], the population and vehicle registry.
//! - [`governance`] -- Per-bike election, direction, expulsion, admission and
//!   allocation procedures.
//! - [`founding`] -- Founding stage run at the start of each iteration.
//! - [`round`] -- The round loop.
//! - [`runner`] -- Iteration and game runner.
//! - [`dump`] -- Hierarchical run report.
//! - [`error`] -- [`SimulationError`].
//!
//! [`BikerPolicy`]: policy::BikerPolicy
//! [`StubPolicy`]: policy::StubPolicy
//! [`Physics`]: physics::Physics
//! [`MegaBike`]: bike::MegaBike
//! [`Hazard`]: bike::Hazard
//! [`SimulationState`]: state::SimulationState
//! [`SimulationError`]: error::SimulationError

pub mod bike;
pub mod config;
pub mod dump;
pub mod error;
pub mod founding;
pub mod governance;
pub mod physics;
pub mod policy;
pub mod round;
pub mod runner;
pub mod state;
pub mod voting;
