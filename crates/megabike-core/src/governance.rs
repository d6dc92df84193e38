//! Per-bike governance procedures.
//!
//! Each procedure dispatches on the bike's [`Governance`] mode:
//!
//! - **Democracy** -- every member votes with weight 1.
//! - **Leadership** -- members vote, weighted by the leader's
//!   [`decide_weights`](crate::policy::BikerPolicy::decide_weights).
//! - **Dictatorship** -- the ruler decides alone.
//!
//! A ruled bike whose ruler post is vacant falls back to the uniform vote
//! until the next election. Every id returned by a policy is validated
//! before any state changes; ids that name real entities outside the crew
//! (or outside the candidate set) are ignored.

use std::collections::{BTreeMap, BTreeSet};

use megabike_rules::{AgentSubject, PickupSubject, Rule, RuleError};
use megabike_types::{Action, AgentId, BikeId, Forces, Governance, PickupId};
use tracing::{debug, info, warn};

use crate::error::SimulationError;
use crate::state::SimulationState;
use crate::voting::{
    Ballot, Weights, acceptance_ranking, cumulative_dist, majority_expulsions, uniform_weights,
    winner_from_dist,
};

/// Members, governance mode and valid ruler of a bike.
struct Crew {
    members: Vec<AgentId>,
    governance: Governance,
    ruler: Option<AgentId>,
}

fn crew(state: &SimulationState, bike_id: BikeId) -> Result<Crew, SimulationError> {
    let bike = state
        .bikes
        .get(&bike_id)
        .ok_or(SimulationError::UnknownBike { bike_id })?;
    Ok(Crew {
        members: bike.members().iter().copied().collect(),
        governance: bike.governance,
        ruler: bike.ruler.filter(|r| bike.members().contains(r)),
    })
}

fn check_agents<'a>(
    state: &SimulationState,
    ids: impl IntoIterator<Item = &'a AgentId>,
) -> Result<(), SimulationError> {
    ids.into_iter().try_for_each(|&id| state.validate_agent(id))
}

fn only_members<V>(ballot: BTreeMap<AgentId, V>, members: &[AgentId]) -> BTreeMap<AgentId, V> {
    ballot
        .into_iter()
        .filter(|(id, _)| members.contains(id))
        .collect()
}

// ---------------------------------------------------------------------------
// Weights and elections
// ---------------------------------------------------------------------------

/// Vote weights for `action` on `bike_id`.
///
/// Leadership bikes with a ruler use the ruler's weights (restricted to the
/// crew); everything else votes uniformly.
pub fn vote_weights(
    state: &mut SimulationState,
    bike_id: BikeId,
    action: Action,
) -> Result<Weights, SimulationError> {
    if !matches!(
        action,
        Action::MoveBike | Action::KickAgent | Action::Joining | Action::Allocation
    ) {
        return Err(SimulationError::UndefinedAction { action });
    }
    let crew = crew(state, bike_id)?;
    match (crew.governance, crew.ruler) {
        (Governance::Leadership, Some(ruler)) => {
            let weights = state.ask(ruler, |policy, ctx| policy.decide_weights(ctx, action))?;
            check_agents(state, weights.keys())?;
            Ok(only_members(weights, &crew.members))
        }
        _ => Ok(uniform_weights(&crew.members)),
    }
}

/// Elect a ruler for a Leadership or Dictatorship bike.
///
/// Each member casts a self-interested ballot over the crew; the weighted
/// winner takes the post. If no ballot names a crew member, the lowest id
/// member is appointed. Democratic and empty bikes end up with no ruler.
pub fn elect_ruler(
    state: &mut SimulationState,
    bike_id: BikeId,
) -> Result<Option<AgentId>, SimulationError> {
    let crew = crew(state, bike_id)?;
    let ruler = if crew.governance.has_ruler() && !crew.members.is_empty() {
        let mut ballots = BTreeMap::new();
        for &member in &crew.members {
            let ballot = state.ask(member, |policy, ctx| match crew.governance {
                Governance::Dictatorship => policy.vote_dictator(ctx),
                Governance::Leadership | Governance::Democracy => policy.vote_leader(ctx),
            })?;
            check_agents(state, ballot.keys())?;
            ballots.insert(member, only_members(ballot, &crew.members));
        }
        let weights = uniform_weights(&crew.members);
        winner_from_dist(&weights, &ballots)?.or_else(|| crew.members.first().copied())
    } else {
        None
    };
    if let Some(bike) = state.bikes.get_mut(&bike_id) {
        bike.ruler = ruler;
    }
    if let Some(ruler) = ruler {
        info!(bike = %bike_id, governance = ?crew.governance, ruler = %ruler, "Ruler elected");
    }
    Ok(ruler)
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Whether the crew satisfies the bike's rules for `action`.
///
/// Uses the per-category rules when `population.stratify_rules` is set and
/// the linear list otherwise.
pub fn check_rule_compliance(
    state: &SimulationState,
    bike_id: BikeId,
    action: Action,
) -> Result<bool, SimulationError> {
    let bike = state
        .bikes
        .get(&bike_id)
        .ok_or(SimulationError::UnknownBike { bike_id })?;
    let position = bike.position();
    let subjects: Vec<AgentSubject<'_>> = bike
        .members()
        .iter()
        .filter_map(|id| state.agents.get(id))
        .map(|biker| AgentSubject::new(biker, position))
        .collect();
    Ok(if state.config.population.stratify_rules {
        bike.rules.is_action_valid(action, &subjects)
    } else {
        bike.rules.complies_with_linear_ruleset(&subjects)
    })
}

/// Pickups the bike's pickup rules allow it to target.
pub fn prune_pickups(
    state: &SimulationState,
    bike_id: BikeId,
) -> Result<BTreeSet<PickupId>, SimulationError> {
    let bike = state
        .bikes
        .get(&bike_id)
        .ok_or(SimulationError::UnknownBike { bike_id })?;
    let origin = bike.position();
    Ok(state
        .pickups
        .values()
        .filter(|pickup| {
            let subject = PickupSubject {
                distance: state.physics.distance(origin, pickup.position),
            };
            bike.rules.allows(Action::Lootbox, &subject)
        })
        .map(|pickup| pickup.id)
        .collect())
}

/// Replace the bike's pickup radius with the crew's mean proposal.
///
/// Returns the new radius, or `None` if the bike has no radius rule, no crew,
/// or the rule is immutable (logged and otherwise ignored).
pub fn adapt_pickup_radius(
    state: &mut SimulationState,
    bike_id: BikeId,
) -> Result<Option<f64>, SimulationError> {
    let crew = crew(state, bike_id)?;
    let current = state
        .bikes
        .get(&bike_id)
        .and_then(|bike| bike.rules.categories().get(&Action::Lootbox))
        .and_then(|rules| rules.iter().find_map(Rule::radius));
    let Some(current) = current else {
        return Ok(None);
    };
    if crew.members.is_empty() {
        return Ok(None);
    }

    let mut total = 0.0;
    for &member in &crew.members {
        let proposal = state.ask(member, |policy, ctx| policy.propose_new_radius(ctx, current))?;
        if !proposal.is_finite() {
            return Err(SimulationError::NumericDegeneracy {
                agent_id: member,
                quantity: "radius",
                value: proposal,
            });
        }
        total += proposal;
    }
    #[allow(clippy::cast_precision_loss)]
    let radius = total / crew.members.len() as f64;

    let Some(rule) = state.bikes.get_mut(&bike_id).and_then(|bike| {
        bike.rules
            .rules_mut(Action::Lootbox)
            .find(|rule| rule.radius().is_some())
    }) else {
        return Ok(None);
    };
    let Some(matrix) = rule.matrix().with_constant_term(0, -radius) else {
        return Ok(None);
    };
    match rule.update_matrix(matrix) {
        Ok(()) => {
            debug!(bike = %bike_id, previous = current, radius, "Pickup radius updated");
            Ok(Some(radius))
        }
        Err(err @ RuleError::Immutable { .. }) => {
            warn!(bike = %bike_id, %err, "Pickup radius update rejected");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// Direction and forces
// ---------------------------------------------------------------------------

/// Choose the bike's target pickup for this round and charge the
/// governance cost.
///
/// Democracy and Leadership run a two-phase vote: each member proposes one
/// pruned pickup, the crew adapts its pickup radius, then every member
/// spreads support over the proposals and the weighted winner is chosen.
/// A dictator names the target directly.
pub fn decide_direction(
    state: &mut SimulationState,
    bike_id: BikeId,
) -> Result<Option<PickupId>, SimulationError> {
    let crew = crew(state, bike_id)?;
    if crew.members.is_empty() {
        return Ok(None);
    }

    let direction = match (crew.governance, crew.ruler) {
        (Governance::Dictatorship, Some(ruler)) => {
            let choice = state.ask(ruler, |policy, ctx| policy.dictate_direction(ctx))?;
            if let Some(pickup) = choice {
                state.validate_pickup(pickup)?;
            }
            choice
        }
        _ => vote_direction(state, bike_id, &crew.members)?,
    };

    let penalty = match crew.governance {
        Governance::Democracy => state.config.governance.democracy_penalty,
        Governance::Leadership => state.config.governance.leadership_penalty,
        Governance::Dictatorship => 0.0,
    };
    if penalty > 0.0 {
        for &member in &crew.members {
            state.update_energy(member, -penalty)?;
        }
    }

    debug!(bike = %bike_id, governance = ?crew.governance, ?direction, "Direction decided");
    Ok(direction)
}

fn vote_direction(
    state: &mut SimulationState,
    bike_id: BikeId,
    members: &[AgentId],
) -> Result<Option<PickupId>, SimulationError> {
    let eligible = prune_pickups(state, bike_id)?;
    let mut proposals = BTreeMap::new();
    for &member in members {
        let proposal = state.ask(member, |policy, ctx| policy.propose_direction(ctx, &eligible))?;
        if let Some(pickup) = proposal {
            state.validate_pickup(pickup)?;
            proposals.insert(member, pickup);
        }
    }

    adapt_pickup_radius(state, bike_id)?;

    if proposals.is_empty() {
        return Ok(None);
    }
    let proposed: BTreeSet<PickupId> = proposals.values().copied().collect();
    let mut ballots: BTreeMap<AgentId, Ballot<PickupId>> = BTreeMap::new();
    for &member in members {
        let ballot = state.ask(member, |policy, ctx| policy.final_direction_vote(ctx, &proposals))?;
        for &pickup in ballot.keys() {
            state.validate_pickup(pickup)?;
        }
        let ballot = ballot
            .into_iter()
            .filter(|(pickup, _)| proposed.contains(pickup))
            .collect();
        ballots.insert(member, ballot);
    }
    let weights = vote_weights(state, bike_id, Action::MoveBike)?;
    Ok(winner_from_dist(&weights, &ballots)?)
}

/// Collect each member's forces towards `direction` and charge the
/// pedalling cost. Without a direction the crew idles.
///
/// Pedal and brake are clamped to [0, 1].
pub fn apply_forces(
    state: &mut SimulationState,
    bike_id: BikeId,
    direction: Option<PickupId>,
) -> Result<(), SimulationError> {
    let crew = crew(state, bike_id)?;
    let depletion = state.config.energy.moving_depletion;
    for &member in &crew.members {
        let mut forces = match direction {
            Some(target) => state.ask(member, |policy, ctx| policy.decide_force(ctx, target))?,
            None => Forces::default(),
        };
        for value in [forces.pedal, forces.brake, forces.turning.steering_force] {
            if !value.is_finite() {
                return Err(SimulationError::NumericDegeneracy {
                    agent_id: member,
                    quantity: "force",
                    value,
                });
            }
        }
        forces.pedal = forces.pedal.clamp(0.0, 1.0);
        forces.brake = forces.brake.clamp(0.0, 1.0);
        if let Some(biker) = state.agents.get_mut(&member) {
            biker.forces = forces;
        }
        state.update_energy(member, -depletion * forces.pedal)?;
    }
    if let Some(bike) = state.bikes.get_mut(&bike_id) {
        bike.direction = direction;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Expel members and return who was removed.
///
/// Expelled agents pick their next target bike on the way out. A Leadership
/// bike whose leader is expelled re-elects immediately.
pub fn run_kickout(
    state: &mut SimulationState,
    bike_id: BikeId,
) -> Result<Vec<AgentId>, SimulationError> {
    let crew = crew(state, bike_id)?;
    if crew.members.is_empty() {
        return Ok(Vec::new());
    }

    let expelled: Vec<AgentId> = match (crew.governance, crew.ruler) {
        (Governance::Dictatorship, Some(ruler)) => {
            let picks = state.ask(ruler, |policy, ctx| policy.decide_kickout_as_ruler(ctx))?;
            check_agents(state, &picks)?;
            picks
                .into_iter()
                .filter(|id| crew.members.contains(id))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        }
        _ => {
            let mut nominations = BTreeMap::new();
            for &member in &crew.members {
                let votes = state.ask(member, |policy, ctx| policy.decide_kickout(ctx))?;
                check_agents(state, &votes)?;
                let votes: BTreeSet<AgentId> = votes
                    .into_iter()
                    .filter(|id| crew.members.contains(id))
                    .collect();
                nominations.insert(member, votes.into_iter().collect());
            }
            let weights = vote_weights(state, bike_id, Action::KickAgent)?;
            majority_expulsions(&weights, &nominations, crew.members.len())?
        }
    };
    if expelled.is_empty() {
        return Ok(expelled);
    }

    for &agent in &expelled {
        state.remove_agent_from_bike(agent, bike_id)?;
    }
    let remaining = state.bikes.get_mut(&bike_id).map(|bike| {
        let kicked = u32::try_from(expelled.len()).unwrap_or(u32::MAX);
        bike.kicked_out_count = bike.kicked_out_count.saturating_add(kicked);
        bike.member_count()
    });
    info!(bike = %bike_id, expelled = expelled.len(), "Members expelled");

    let ruler_expelled = crew.ruler.is_some_and(|ruler| expelled.contains(&ruler));
    if ruler_expelled && crew.governance == Governance::Leadership && remaining.unwrap_or(0) > 0 {
        elect_ruler(state, bike_id)?;
    }
    Ok(expelled)
}

/// Admit applicants to a bike and return who was seated.
///
/// An empty bike takes applicants in the given order up to capacity, then
/// holds an election if its mode needs a ruler. A non-empty bike ranks the
/// applicants by its governance procedure and fills only the open seats.
pub fn run_admission(
    state: &mut SimulationState,
    bike_id: BikeId,
    applicants: &[AgentId],
) -> Result<Vec<AgentId>, SimulationError> {
    check_agents(state, applicants)?;
    let crew = crew(state, bike_id)?;
    if applicants.is_empty() {
        return Ok(Vec::new());
    }
    let capacity = state.config.population.bike_capacity;
    let was_empty = crew.members.is_empty();

    let admitted: Vec<AgentId> = if was_empty {
        applicants.iter().copied().take(capacity).collect()
    } else {
        let open = capacity.saturating_sub(crew.members.len());
        if open == 0 {
            return Ok(Vec::new());
        }
        let pending: BTreeSet<AgentId> = applicants.iter().copied().collect();
        let ranking = match (crew.governance, crew.ruler) {
            (Governance::Dictatorship, Some(ruler)) => {
                let picks = state.ask(ruler, |policy, ctx| {
                    policy.decide_joining_as_ruler(ctx, &pending)
                })?;
                check_agents(state, &picks)?;
                let mut seen = BTreeSet::new();
                picks
                    .into_iter()
                    .filter(|id| pending.contains(id) && seen.insert(*id))
                    .collect()
            }
            _ => {
                let mut ballots = BTreeMap::new();
                for &member in &crew.members {
                    let ballot = state.ask(member, |policy, ctx| policy.decide_joining(ctx, &pending))?;
                    check_agents(state, ballot.keys())?;
                    ballots.insert(member, ballot);
                }
                let weights = vote_weights(state, bike_id, Action::Joining)?;
                acceptance_ranking(&weights, &ballots, applicants)?
            }
        };
        ranking.into_iter().take(open).collect()
    };

    let mut seated = Vec::with_capacity(admitted.len());
    for agent in admitted {
        if state.add_agent_to_bike(agent, bike_id)? {
            seated.push(agent);
        }
    }
    if !seated.is_empty() {
        debug!(bike = %bike_id, admitted = seated.len(), "Applicants admitted");
    }
    if was_empty && !seated.is_empty() && crew.governance.has_ruler() {
        elect_ruler(state, bike_id)?;
    }
    Ok(seated)
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Each member's share of the bike's loot.
///
/// Shares sum to 1 unless every proposal is zero, in which case the map is
/// empty and nothing is handed out.
pub fn decide_allocation(
    state: &mut SimulationState,
    bike_id: BikeId,
) -> Result<BTreeMap<AgentId, f64>, SimulationError> {
    let crew = crew(state, bike_id)?;
    if crew.members.is_empty() {
        return Ok(BTreeMap::new());
    }
    match (crew.governance, crew.ruler) {
        (Governance::Dictatorship, Some(ruler)) => {
            let split = state.ask(ruler, |policy, ctx| policy.decide_dictator_allocation(ctx))?;
            check_agents(state, split.keys())?;
            let ballots = BTreeMap::from([(ruler, only_members(split, &crew.members))]);
            Ok(cumulative_dist(&uniform_weights(&[ruler]), &ballots)?)
        }
        _ => {
            let mut ballots = BTreeMap::new();
            for &member in &crew.members {
                let ballot = state.ask(member, |policy, ctx| policy.decide_allocation(ctx))?;
                check_agents(state, ballot.keys())?;
                ballots.insert(member, only_members(ballot, &crew.members));
            }
            let weights = vote_weights(state, bike_id, Action::Allocation)?;
            Ok(cumulative_dist(&weights, &ballots)?)
        }
    }
}
