//! Round loop: the fourteen-step state machine that advances the world.
//!
//! Each round runs, in order:
//!
//! 1. **Rule pre-check** -- record whether each crew satisfies its movement
//!    and expulsion rules.
//! 2. **Destinations** -- off-bike agents pick a target bike; on-bike agents
//!    decide whether to leave.
//! 3. **Expulsion** -- per-bike kick procedure.
//! 4. **Admission** -- pending applicants are admitted, skipping agents that
//!    entered limbo this round.
//! 5. **Direction** -- each crew picks a pickup and pedals towards it.
//! 6. **Movement** -- bikes and the hazard are integrated by the physics
//!    model.
//! 7. **Loot** -- pickups reached by a bike are shared out and removed.
//! 8. **Limbo penalty** -- agents without a bike lose energy.
//! 9. **Hazard collision** -- crews of bikes hit by the hazard die.
//! 10. **Deaths** -- agents with negative energy die.
//! 11. **Elections** -- ruled bikes without a valid ruler re-elect.
//! 12. **Replenish** -- pickups and bikes are topped up.
//! 13. **Messaging** -- queued agent messages are delivered.
//! 14. **Report** -- the round is snapshotted and loot pools reset.
//!
//! Any [`SimulationError`] aborts the round. There is no rollback; ids are
//! validated before each mutation.

use std::collections::{BTreeMap, BTreeSet};

use megabike_types::{Action, AgentDecision, AgentId, BikeId, Forces, Message, PickupId};
use tracing::{debug, info};

use crate::dump::RoundDump;
use crate::error::SimulationError;
use crate::governance;
use crate::state::SimulationState;

/// Errors that abort a round.
#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    /// A simulation invariant was violated.
    #[error("round {round} aborted: {source}")]
    Aborted {
        /// The round that failed.
        round: u32,
        /// The underlying violation.
        source: SimulationError,
    },
}

/// Summary of a single round.
#[derive(Debug, Clone)]
pub struct RoundSummary {
    /// Round number within the iteration.
    pub round: u32,
    /// Living agents at the end of the round.
    pub agents_alive: usize,
    /// Agents that left their bike voluntarily.
    pub left: Vec<AgentId>,
    /// Agents expelled by their crew.
    pub expelled: Vec<AgentId>,
    /// Agents admitted to a bike.
    pub admitted: Vec<AgentId>,
    /// Agents that died.
    pub deaths: Vec<AgentId>,
    /// Pickups collected.
    pub pickups_collected: usize,
    /// Messages sent.
    pub messages: usize,
    /// End-of-round snapshot.
    pub dump: RoundDump,
}

/// Run one round.
///
/// # Errors
///
/// Returns [`RoundError::Aborted`] wrapping the first invariant violation.
pub fn run_round(state: &mut SimulationState) -> Result<RoundSummary, RoundError> {
    state.round = state.round.saturating_add(1);
    let round = state.round;
    run_round_steps(state).map_err(|source| RoundError::Aborted { round, source })
}

fn run_round_steps(state: &mut SimulationState) -> Result<RoundSummary, SimulationError> {
    let round = state.round;
    debug!(round, "Round started");

    // --- 1. Rule pre-check ---
    record_compliance(state, &[Action::MoveBike, Action::KickAgent])?;

    // --- 2. Destinations and leaving ---
    assign_destinations(state)?;
    let left = process_leaving(state)?;
    let mut limbo: BTreeSet<AgentId> = left.iter().copied().collect();

    // --- 3. Expulsion ---
    let mut expelled = Vec::new();
    for bike_id in state.bike_ids() {
        expelled.extend(governance::run_kickout(state, bike_id)?);
    }
    limbo.extend(expelled.iter().copied());

    // --- 4. Admission ---
    let admitted = process_joining(state, &limbo)?;

    // --- 5. Direction and forces ---
    for biker in state.agents.values_mut().filter(|b| !b.on_bike) {
        biker.forces = Forces::default();
    }
    for bike_id in state.bike_ids() {
        let direction = governance::decide_direction(state, bike_id)?;
        governance::apply_forces(state, bike_id, direction)?;
    }

    // --- 6. Movement ---
    move_bikes(state);
    move_hazard(state);

    // --- 7. Loot ---
    record_compliance(state, &[Action::Allocation])?;
    let pickups_collected = distribute_loot(state)?;

    // --- 8. Limbo penalty ---
    punish_bikeless(state)?;

    // --- 9. Hazard collision ---
    let mut deaths = hazard_collisions(state)?;

    // --- 10. Deaths ---
    deaths.extend(remove_exhausted(state)?);

    // --- 11. Elections ---
    hold_due_elections(state)?;

    // --- 12. Replenish ---
    if state.config.lifecycle.replenish_pickups {
        state.replenish_pickups();
    }
    if state.config.lifecycle.replenish_bikes {
        state.replenish_bikes();
    }

    // --- 13. Messaging ---
    let messages = run_messaging_session(state)?;

    // --- 14. Report ---
    let dump = RoundDump::capture(state);
    for bike in state.bikes.values_mut() {
        bike.pool = 0.0;
    }

    let agents_alive = state.agents.len();
    info!(
        round,
        agents_alive,
        deaths = deaths.len(),
        expelled = expelled.len(),
        pickups_collected,
        "Round complete"
    );

    Ok(RoundSummary {
        round,
        agents_alive,
        left,
        expelled,
        admitted,
        deaths,
        pickups_collected,
        messages,
        dump,
    })
}

/// Record on each bike whether its crew satisfies the rules for `actions`.
fn record_compliance(state: &mut SimulationState, actions: &[Action]) -> Result<(), SimulationError> {
    for bike_id in state.bike_ids() {
        for &action in actions {
            let valid = governance::check_rule_compliance(state, bike_id, action)?;
            if let Some(bike) = state.bikes.get_mut(&bike_id) {
                bike.compliance.insert(action, valid);
            }
        }
    }
    Ok(())
}

/// Off-bike agents choose which bike to apply to.
fn assign_destinations(state: &mut SimulationState) -> Result<(), SimulationError> {
    let walkers: Vec<AgentId> = state
        .agents
        .values()
        .filter(|b| !b.on_bike)
        .map(|b| b.id)
        .collect();
    for agent in walkers {
        let target = state.ask(agent, |policy, ctx| policy.decide_target_bike(ctx))?;
        if let Some(bike) = target {
            state.validate_bike(bike)?;
        }
        if let Some(biker) = state.agents.get_mut(&agent) {
            biker.bike = target;
        }
    }
    Ok(())
}

/// On-bike agents that choose to change bike leave now and enter limbo.
fn process_leaving(state: &mut SimulationState) -> Result<Vec<AgentId>, SimulationError> {
    let riders: Vec<(AgentId, BikeId)> = state.riders.iter().map(|(&a, &b)| (a, b)).collect();
    let mut left = Vec::new();
    for (agent, bike) in riders {
        let decision = state.ask(agent, |policy, ctx| policy.decide_action(ctx))?;
        if decision != AgentDecision::ChangeBike {
            continue;
        }
        state.remove_agent_from_bike(agent, bike)?;
        left.push(agent);
        debug!(agent = %agent, bike = %bike, "Agent left bike");
        if state.bikes.get(&bike).is_some_and(|b| b.needs_election()) {
            governance::elect_ruler(state, bike)?;
        }
    }
    Ok(left)
}

/// Group pending applicants by target and run admission per bike.
fn process_joining(
    state: &mut SimulationState,
    limbo: &BTreeSet<AgentId>,
) -> Result<Vec<AgentId>, SimulationError> {
    let mut requests: BTreeMap<BikeId, Vec<AgentId>> = BTreeMap::new();
    for biker in state.agents.values() {
        if biker.on_bike || limbo.contains(&biker.id) {
            continue;
        }
        if let Some(target) = biker.bike {
            requests.entry(target).or_default().push(biker.id);
        }
    }
    let mut admitted = Vec::new();
    for (bike_id, applicants) in requests {
        admitted.extend(governance::run_admission(state, bike_id, &applicants)?);
    }
    Ok(admitted)
}

fn move_bikes(state: &mut SimulationState) {
    let base_mass = state.config.physics.bike_mass;
    for bike_id in state.bike_ids() {
        let Some(bike) = state.bikes.get(&bike_id) else {
            continue;
        };
        let forces: Vec<Forces> = bike
            .members()
            .iter()
            .filter_map(|id| state.agents.get(id))
            .map(|biker| biker.forces)
            .collect();
        let Some(bike) = state.bikes.get_mut(&bike_id) else {
            continue;
        };
        bike.update_mass(base_mass);
        bike.update_force(&forces);
        bike.update_orientation(&forces);
        bike.state = state
            .physics
            .next_state(&bike.state, bike.force, bike.orientation);
    }
}

/// The hazard chases the nearest bike (ties by lowest id).
fn move_hazard(state: &mut SimulationState) {
    let origin = state.hazard.position();
    let target = state
        .bikes
        .values()
        .map(|bike| (bike.position(), state.physics.distance(origin, bike.position())))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(position, _)| position);
    let force = state.config.physics.hazard_force;
    state.hazard.pursue(target, force);
    let hazard = &mut state.hazard;
    hazard.state = state
        .physics
        .next_state(&hazard.state, hazard.force, hazard.orientation);
}

/// Share out every pickup within collision range of at least one crewed
/// bike, then remove it. Returns the number of pickups collected.
///
/// The pickup's value is split evenly across the colliding bikes; each
/// bike's share is divided by its allocation. Members whose colour matches
/// the pickup also score points.
pub fn distribute_loot(state: &mut SimulationState) -> Result<usize, SimulationError> {
    let threshold = state.config.physics.collision_threshold;
    let bonus = state.config.energy.same_colour_points;

    let mut hits: BTreeMap<PickupId, Vec<BikeId>> = BTreeMap::new();
    for pickup in state.pickups.values() {
        let bikes: Vec<BikeId> = state
            .bikes
            .values()
            .filter(|bike| {
                !bike.is_empty()
                    && state.physics.distance(bike.position(), pickup.position) <= threshold
            })
            .map(|bike| bike.id())
            .collect();
        if !bikes.is_empty() {
            hits.insert(pickup.id, bikes);
        }
    }

    let mut splits: BTreeMap<BikeId, BTreeMap<AgentId, f64>> = BTreeMap::new();
    for (&pickup_id, bikes) in &hits {
        let pickup = state.remove_pickup(pickup_id)?;
        #[allow(clippy::cast_precision_loss)]
        let loot = pickup.total_resources / bikes.len() as f64;
        for &bike_id in bikes {
            if !splits.contains_key(&bike_id) {
                let split = governance::decide_allocation(state, bike_id)?;
                splits.insert(bike_id, split);
            }
            let mut distributed = 0.0;
            if let Some(split) = splits.get(&bike_id) {
                for (&agent, &share) in split {
                    state.update_energy(agent, share * loot)?;
                    distributed += share * loot;
                }
            }
            let members: Vec<AgentId> = state
                .bikes
                .get(&bike_id)
                .map(|bike| bike.members().iter().copied().collect())
                .unwrap_or_default();
            for agent in members {
                if let Some(biker) = state.agents.get_mut(&agent)
                    && biker.colour == pickup.colour
                {
                    biker.add_points(bonus);
                }
            }
            if let Some(bike) = state.bikes.get_mut(&bike_id) {
                bike.pool += distributed;
            }
        }
        debug!(pickup = %pickup_id, bikes = bikes.len(), value = pickup.total_resources, "Pickup collected");
    }
    Ok(hits.len())
}

fn punish_bikeless(state: &mut SimulationState) -> Result<(), SimulationError> {
    let penalty = state.config.energy.limbo_penalty;
    let walkers: Vec<AgentId> = state
        .agents
        .values()
        .filter(|b| !b.on_bike)
        .map(|b| b.id)
        .collect();
    for agent in walkers {
        state.update_energy(agent, -penalty)?;
    }
    Ok(())
}

/// Kill the crew of every bike within collision range of the hazard.
fn hazard_collisions(state: &mut SimulationState) -> Result<Vec<AgentId>, SimulationError> {
    let threshold = state.config.physics.collision_threshold;
    let hazard = state.hazard.position();
    let struck: Vec<BikeId> = state
        .bikes
        .values()
        .filter(|bike| !bike.is_empty() && state.physics.distance(bike.position(), hazard) <= threshold)
        .map(|bike| bike.id())
        .collect();

    let mut killed = Vec::new();
    for bike_id in struck {
        let crew: Vec<AgentId> = state
            .bikes
            .get(&bike_id)
            .map(|bike| bike.members().iter().copied().collect())
            .unwrap_or_default();
        info!(bike = %bike_id, crew = crew.len(), "Hazard collision");
        for agent in crew {
            state.kill_agent(agent)?;
            killed.push(agent);
        }
        if state.config.lifecycle.hazard_removes_bike {
            state.despawn_bike(bike_id)?;
        }
    }
    Ok(killed)
}

/// Remove every agent whose energy dropped below zero.
pub fn remove_exhausted(state: &mut SimulationState) -> Result<Vec<AgentId>, SimulationError> {
    let exhausted: Vec<AgentId> = state
        .agents
        .values()
        .filter(|b| b.energy < 0.0)
        .map(|b| b.id)
        .collect();
    for &agent in &exhausted {
        state.kill_agent(agent)?;
    }
    Ok(exhausted)
}

/// Elect rulers for every ruled bike with members but no valid ruler.
pub fn hold_due_elections(state: &mut SimulationState) -> Result<(), SimulationError> {
    for bike_id in state.bike_ids() {
        if state.bikes.get(&bike_id).is_some_and(|b| b.needs_election()) {
            governance::elect_ruler(state, bike_id)?;
        }
    }
    Ok(())
}

/// Collect every agent's outgoing messages, then deliver them.
///
/// The sender field is stamped by the engine. Recipients that are not alive
/// are skipped, and a sender never receives its own message.
pub fn run_messaging_session(state: &mut SimulationState) -> Result<usize, SimulationError> {
    let mut outbox: Vec<Message> = Vec::new();
    for agent in state.agent_ids() {
        let messages = state.ask(agent, |policy, ctx| policy.outgoing_messages(ctx))?;
        outbox.extend(messages.into_iter().map(|mut message| {
            message.sender = agent;
            message
        }));
    }
    for message in &outbox {
        for &recipient in &message.recipients {
            if recipient == message.sender || !state.agents.contains_key(&recipient) {
                continue;
            }
            state.ask(recipient, |policy, ctx| policy.handle_message(ctx, message))?;
        }
    }
    Ok(outbox.len())
}
