//! Founding stage: agents choose institutions and are seated.
//!
//! Runs once at the start of every iteration, after the reset. Bikes are
//! reserved per governance mode in proportion to demand, then every agent
//! takes the least-full bike of the mode it chose.

use std::collections::BTreeMap;

use megabike_types::{AgentId, BikeId, Governance};
use rand::seq::SliceRandom;
use tracing::info;

use crate::error::SimulationError;
use crate::governance;
use crate::round::run_messaging_session;
use crate::state::SimulationState;
use crate::voting::tally_founding_votes;

/// Outcome of the founding stage.
#[derive(Debug, Clone)]
pub struct FoundingSummary {
    /// Founding choices per governance mode.
    pub choices: BTreeMap<Governance, usize>,
    /// Bikes reserved for each mode.
    pub reserved: BTreeMap<Governance, Vec<BikeId>>,
    /// Agents left without a seat.
    pub limbo: Vec<AgentId>,
}

/// Run the founding stage.
///
/// Every agent must be off-bike when this is called.
///
/// # Errors
///
/// Propagates any [`SimulationError`] raised while messaging, seating or
/// electing.
pub fn found_institutions(state: &mut SimulationState) -> Result<FoundingSummary, SimulationError> {
    run_messaging_session(state)?;

    let mut choices: BTreeMap<AgentId, Governance> = BTreeMap::new();
    for agent in state.agent_ids() {
        let choice = state.ask(agent, |policy, ctx| policy.decide_governance(ctx))?;
        choices.insert(agent, choice);
    }
    let counts = tally_founding_votes(&choices);
    let capacity = state.config.population.bike_capacity.max(1);

    let mut free = state.bike_ids();
    free.shuffle(&mut state.rng);
    let mut reserved: BTreeMap<Governance, Vec<BikeId>> = BTreeMap::new();
    for mode in Governance::ALL {
        let needed = counts.get(&mode).copied().unwrap_or(0).div_ceil(capacity);
        let take = needed.min(free.len());
        let bikes: Vec<BikeId> = free.drain(..take).collect();
        set_governance(state, &bikes, mode);
        reserved.insert(mode, bikes);
    }
    set_governance(state, &free, Governance::Democracy);

    let mut limbo = Vec::new();
    for (&agent, mode) in &choices {
        let seat = reserved.get(mode).and_then(|bikes| {
            bikes
                .iter()
                .filter_map(|id| state.bikes.get(id))
                .filter(|bike| !bike.is_full(capacity))
                .min_by_key(|bike| (bike.member_count(), bike.id()))
                .map(|bike| bike.id())
        });
        match seat {
            Some(bike) if state.add_agent_to_bike(agent, bike)? => {}
            _ => limbo.push(agent),
        }
    }

    for bikes in reserved.values() {
        for &bike in bikes {
            if state.bikes.get(&bike).is_some_and(|b| b.needs_election()) {
                governance::elect_ruler(state, bike)?;
            }
        }
    }

    info!(
        democracy = counts.get(&Governance::Democracy).copied().unwrap_or(0),
        leadership = counts.get(&Governance::Leadership).copied().unwrap_or(0),
        dictatorship = counts.get(&Governance::Dictatorship).copied().unwrap_or(0),
        limbo = limbo.len(),
        "Institutions founded"
    );

    Ok(FoundingSummary {
        choices: counts,
        reserved,
        limbo,
    })
}

fn set_governance(state: &mut SimulationState, bikes: &[BikeId], mode: Governance) {
    for id in bikes {
        if let Some(bike) = state.bikes.get_mut(id) {
            bike.governance = mode;
            bike.ruler = None;
        }
    }
}
