//! Invariant violations raised while mutating simulation state.
//!
//! Every variant signals a broken contract between the engine and an agent
//! policy (or a misconfigured run). The round loop aborts on any of them;
//! nothing here is retried.

use megabike_rules::RuleError;
use megabike_types::{Action, AgentId, BikeId, PickupId};

use crate::voting::VotingError;

/// Errors raised by registry, governance, and round operations.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// A decision referenced a bike that does not exist.
    #[error("unknown bike {bike_id}")]
    UnknownBike {
        /// The missing bike.
        bike_id: BikeId,
    },

    /// A decision referenced a pickup that does not exist.
    #[error("unknown pickup {pickup_id}")]
    UnknownPickup {
        /// The missing pickup.
        pickup_id: PickupId,
    },

    /// A decision referenced an agent that is not alive.
    #[error("unknown agent {agent_id}")]
    UnknownAgent {
        /// The missing agent.
        agent_id: AgentId,
    },

    /// A living agent has no policy attached.
    #[error("agent {agent_id} has no policy")]
    MissingPolicy {
        /// The agent without a policy.
        agent_id: AgentId,
    },

    /// An agent was removed from a bike it does not ride.
    #[error("agent {agent_id} is not a member of bike {bike_id}")]
    NotAMember {
        /// The agent.
        agent_id: AgentId,
        /// The bike it was expected on.
        bike_id: BikeId,
    },

    /// An agent was added to a bike while already seated on another.
    #[error("agent {agent_id} is already seated on bike {bike_id}")]
    AlreadySeated {
        /// The agent.
        agent_id: AgentId,
        /// The bike it currently rides.
        bike_id: BikeId,
    },

    /// A governance procedure was asked for an action it does not define.
    #[error("action {action:?} is undefined for this governance procedure")]
    UndefinedAction {
        /// The requested action.
        action: Action,
    },

    /// A computed quantity became NaN or infinite.
    #[error("non-finite {quantity} for agent {agent_id}: {value}")]
    NumericDegeneracy {
        /// The agent whose state would have been corrupted.
        agent_id: AgentId,
        /// Which quantity degenerated.
        quantity: &'static str,
        /// The offending value.
        value: f64,
    },

    /// A rule operation failed.
    #[error("rule error: {source}")]
    Rule {
        /// The underlying rule error.
        #[from]
        source: RuleError,
    },

    /// A vote aggregation failed.
    #[error("voting error: {source}")]
    Voting {
        /// The underlying voting error.
        #[from]
        source: VotingError,
    },
}
