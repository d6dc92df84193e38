//! Agent policy trait and stub implementation.
//!
//! The engine owns each agent's [`Biker`] state but delegates every choice to
//! a [`BikerPolicy`]. A policy sees the world through a read-only
//! [`DecisionContext`] and returns plain values; it never mutates the
//! registries. The engine validates every id a policy returns and aborts the
//! round on a dangling one.
//!
//! [`StubPolicy`] is a deterministic, scriptable policy used by tests and as
//! a reference for implementors.

use std::collections::{BTreeMap, BTreeSet};

use megabike_types::{
    Action, AgentDecision, AgentId, BikeId, Biker, Forces, Governance, Message, Pickup, PickupId,
    TurningDecision,
};

use crate::bike::{Hazard, MegaBike};
use crate::physics::wrap_orientation;
use crate::voting::{Ballot, Weights};

/// Read-only view of the world handed to policies.
#[derive(Debug, Clone, Copy)]
pub struct GameView<'a> {
    /// Living agents.
    pub agents: &'a BTreeMap<AgentId, Biker>,
    /// All bikes.
    pub bikes: &'a BTreeMap<BikeId, MegaBike>,
    /// All pickups.
    pub pickups: &'a BTreeMap<PickupId, Pickup>,
    /// The hazard.
    pub hazard: &'a Hazard,
    /// Round number within the current iteration.
    pub round: u32,
}

/// The deciding agent plus the world view.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    /// The agent being asked.
    pub me: &'a Biker,
    /// Everything else.
    pub view: GameView<'a>,
}

impl<'a> DecisionContext<'a> {
    /// The bike the agent is riding, if seated.
    pub fn my_bike(&self) -> Option<&'a MegaBike> {
        self.me.riding().and_then(|id| self.view.bikes.get(&id))
    }

    /// Fellow members of the agent's bike, including the agent itself.
    pub fn crew(&self) -> Vec<AgentId> {
        self.my_bike()
            .map(|bike| bike.members().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether the agent rules its bike.
    pub fn is_ruler(&self) -> bool {
        self.my_bike().and_then(|bike| bike.ruler) == Some(self.me.id)
    }

    /// The candidate pickup closest to the agent's bike (ties by id).
    pub fn nearest_pickup<'p>(
        &self,
        candidates: impl IntoIterator<Item = &'p PickupId>,
    ) -> Option<PickupId> {
        let origin = self.my_bike()?.position();
        candidates
            .into_iter()
            .filter_map(|id| {
                self.view
                    .pickups
                    .get(id)
                    .map(|p| (*id, origin.distance_to(p.position)))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(id, _)| id)
    }

    /// Steering input that turns the agent's bike towards `target`.
    pub fn steering_towards(&self, target: PickupId) -> Option<f64> {
        let bike = self.my_bike()?;
        let pickup = self.view.pickups.get(&target)?;
        let heading = bike.position().heading_to(pickup.position);
        Some(wrap_orientation(heading - bike.orientation))
    }
}

/// The decision contract every agent implements.
///
/// All methods must be total over valid inputs. Ids returned must refer to
/// existing entities; the engine treats a dangling id as a fatal error.
pub trait BikerPolicy: std::fmt::Debug {
    /// Stay and pedal, or leave the current bike.
    fn decide_action(&mut self, ctx: &DecisionContext<'_>) -> AgentDecision;

    /// Bike to try joining next, if any. Asked when off a bike.
    fn decide_target_bike(&mut self, ctx: &DecisionContext<'_>) -> Option<BikeId>;

    /// Propose a pickup from `eligible` for the bike to head to.
    fn propose_direction(
        &mut self,
        ctx: &DecisionContext<'_>,
        eligible: &BTreeSet<PickupId>,
    ) -> Option<PickupId>;

    /// Distribute support over the crew's proposals.
    fn final_direction_vote(
        &mut self,
        ctx: &DecisionContext<'_>,
        proposals: &BTreeMap<AgentId, PickupId>,
    ) -> Ballot<PickupId>;

    /// Members this agent wants expelled.
    fn decide_kickout(&mut self, ctx: &DecisionContext<'_>) -> Vec<AgentId>;

    /// Members the ruler expels unilaterally.
    fn decide_kickout_as_ruler(&mut self, ctx: &DecisionContext<'_>) -> Vec<AgentId>;

    /// Yes or no per pending applicant.
    fn decide_joining(
        &mut self,
        ctx: &DecisionContext<'_>,
        pending: &BTreeSet<AgentId>,
    ) -> BTreeMap<AgentId, bool>;

    /// Applicants the ruler admits, best first.
    fn decide_joining_as_ruler(
        &mut self,
        ctx: &DecisionContext<'_>,
        pending: &BTreeSet<AgentId>,
    ) -> Vec<AgentId>;

    /// Preferred governance mode at founding.
    fn decide_governance(&mut self, ctx: &DecisionContext<'_>) -> Governance;

    /// Support per crew member for the dictator post.
    fn vote_dictator(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId>;

    /// Support per crew member for the leader post.
    fn vote_leader(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId>;

    /// Vote weight per crew member for `action`. Asked of leaders.
    fn decide_weights(&mut self, ctx: &DecisionContext<'_>, action: Action) -> Weights;

    /// Preferred split of the bike's loot.
    fn decide_allocation(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId>;

    /// The dictator's split of the bike's loot.
    fn decide_dictator_allocation(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId>;

    /// The dictator's chosen pickup.
    fn dictate_direction(&mut self, ctx: &DecisionContext<'_>) -> Option<PickupId>;

    /// Pedalling and steering towards the chosen pickup.
    fn decide_force(&mut self, ctx: &DecisionContext<'_>, direction: PickupId) -> Forces;

    /// Proposed pickup radius given the `current` one.
    fn propose_new_radius(&mut self, ctx: &DecisionContext<'_>, current: f64) -> f64;

    /// Messages to send this round.
    fn outgoing_messages(&mut self, _ctx: &DecisionContext<'_>) -> Vec<Message> {
        Vec::new()
    }

    /// Receive a message.
    fn handle_message(&mut self, _ctx: &DecisionContext<'_>, _message: &Message) {}

    /// Notification that `agent` died.
    fn on_agent_death(&mut self, _agent: AgentId) {}

    /// Self-reported trustworthiness, recorded in round reports.
    fn trustworthiness(&self) -> f64 {
        1.0
    }
}

/// A scripted policy.
///
/// Every field left at its default produces a cooperative, self-interested
/// baseline: pedal at full force towards the nearest eligible pickup, vote
/// for itself, accept every applicant, split loot evenly.
#[derive(Debug, Clone)]
pub struct StubPolicy {
    /// Leave the bike this round.
    pub change_bike: bool,
    /// Bike to apply to when off a bike.
    pub target_bike: Option<BikeId>,
    /// Founding choice.
    pub governance: Governance,
    /// Pickup to propose and vote for when it is available.
    pub direction: Option<PickupId>,
    /// Kick nominations.
    pub kick_votes: Vec<AgentId>,
    /// Kicks issued when ruling.
    pub ruler_kicks: Vec<AgentId>,
    /// Approve applicants.
    pub accept_joiners: bool,
    /// Candidate to back in ruler elections instead of itself.
    pub ruler_vote: Option<AgentId>,
    /// Weights handed out when leading.
    pub weights: Option<Weights>,
    /// Loot split. Even split across the crew when unset.
    pub allocation: Option<Ballot<AgentId>>,
    /// Pedal force.
    pub pedal: f64,
    /// Radius to propose. Keeps the current one when unset.
    pub radius: Option<f64>,
}

impl Default for StubPolicy {
    fn default() -> Self {
        Self {
            change_bike: false,
            target_bike: None,
            governance: Governance::Democracy,
            direction: None,
            kick_votes: Vec::new(),
            ruler_kicks: Vec::new(),
            accept_joiners: true,
            ruler_vote: None,
            weights: None,
            allocation: None,
            pedal: 1.0,
            radius: None,
        }
    }
}

impl StubPolicy {
    /// Create a stub with default behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// A stub preferring `governance` at founding.
    pub fn choosing(governance: Governance) -> Self {
        Self {
            governance,
            ..Self::default()
        }
    }

    fn self_vote(&self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        BTreeMap::from([(self.ruler_vote.unwrap_or(ctx.me.id), 1.0)])
    }

    fn even_split(&self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        if let Some(allocation) = &self.allocation {
            return allocation.clone();
        }
        let crew = ctx.crew();
        #[allow(clippy::cast_precision_loss)]
        let share = 1.0 / crew.len().max(1) as f64;
        crew.into_iter().map(|id| (id, share)).collect()
    }
}

impl BikerPolicy for StubPolicy {
    fn decide_action(&mut self, _ctx: &DecisionContext<'_>) -> AgentDecision {
        if self.change_bike {
            AgentDecision::ChangeBike
        } else {
            AgentDecision::Pedal
        }
    }

    fn decide_target_bike(&mut self, _ctx: &DecisionContext<'_>) -> Option<BikeId> {
        self.target_bike
    }

    fn propose_direction(
        &mut self,
        ctx: &DecisionContext<'_>,
        eligible: &BTreeSet<PickupId>,
    ) -> Option<PickupId> {
        self.direction
            .filter(|id| eligible.contains(id))
            .or_else(|| ctx.nearest_pickup(eligible))
    }

    fn final_direction_vote(
        &mut self,
        ctx: &DecisionContext<'_>,
        proposals: &BTreeMap<AgentId, PickupId>,
    ) -> Ballot<PickupId> {
        let proposed: BTreeSet<PickupId> = proposals.values().copied().collect();
        self.direction
            .filter(|id| proposed.contains(id))
            .or_else(|| proposals.get(&ctx.me.id).copied())
            .or_else(|| proposed.first().copied())
            .map(|id| BTreeMap::from([(id, 1.0)]))
            .unwrap_or_default()
    }

    fn decide_kickout(&mut self, _ctx: &DecisionContext<'_>) -> Vec<AgentId> {
        self.kick_votes.clone()
    }

    fn decide_kickout_as_ruler(&mut self, _ctx: &DecisionContext<'_>) -> Vec<AgentId> {
        self.ruler_kicks.clone()
    }

    fn decide_joining(
        &mut self,
        _ctx: &DecisionContext<'_>,
        pending: &BTreeSet<AgentId>,
    ) -> BTreeMap<AgentId, bool> {
        pending.iter().map(|&id| (id, self.accept_joiners)).collect()
    }

    fn decide_joining_as_ruler(
        &mut self,
        _ctx: &DecisionContext<'_>,
        pending: &BTreeSet<AgentId>,
    ) -> Vec<AgentId> {
        if self.accept_joiners {
            pending.iter().copied().collect()
        } else {
            Vec::new()
        }
    }

    fn decide_governance(&mut self, _ctx: &DecisionContext<'_>) -> Governance {
        self.governance
    }

    fn vote_dictator(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        self.self_vote(ctx)
    }

    fn vote_leader(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        self.self_vote(ctx)
    }

    fn decide_weights(&mut self, ctx: &DecisionContext<'_>, _action: Action) -> Weights {
        self.weights
            .clone()
            .unwrap_or_else(|| ctx.crew().into_iter().map(|id| (id, 1.0)).collect())
    }

    fn decide_allocation(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        self.even_split(ctx)
    }

    fn decide_dictator_allocation(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        self.even_split(ctx)
    }

    fn dictate_direction(&mut self, ctx: &DecisionContext<'_>) -> Option<PickupId> {
        self.direction
            .filter(|id| ctx.view.pickups.contains_key(id))
            .or_else(|| ctx.nearest_pickup(ctx.view.pickups.keys()))
    }

    fn decide_force(&mut self, ctx: &DecisionContext<'_>, direction: PickupId) -> Forces {
        let steering = ctx.steering_towards(direction);
        Forces {
            pedal: self.pedal,
            brake: 0.0,
            turning: TurningDecision {
                steer_bike: steering.is_some(),
                steering_force: steering.unwrap_or_default(),
            },
        }
    }

    fn propose_new_radius(&mut self, _ctx: &DecisionContext<'_>, current: f64) -> f64 {
        self.radius.unwrap_or(current)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use megabike_types::{Colour, Coordinates};

    use super::*;
    use crate::config::SimulationConfig;
    use crate::state::SimulationState;

    #[test]
    fn stub_backs_its_own_proposal() {
        let mut state = SimulationState::new(SimulationConfig::default());
        let bike = state.spawn_bike_at(Coordinates::new(0.0, 0.0));
        let near = state.spawn_pickup_at(Coordinates::new(5.0, 0.0), 3.0, Colour::Red);
        let far = state.spawn_pickup_at(Coordinates::new(50.0, 0.0), 3.0, Colour::Red);
        let agent = state.spawn_agent(Box::new(StubPolicy::new()));
        state.add_agent_to_bike(agent, bike).unwrap();

        let ctx = DecisionContext {
            me: state.agent(agent).unwrap(),
            view: state.view(),
        };
        let mut stub = StubPolicy::new();
        let eligible = BTreeSet::from([near, far]);
        let proposal = stub.propose_direction(&ctx, &eligible).unwrap();
        assert_eq!(proposal, near);

        let proposals = BTreeMap::from([(agent, near), (AgentId::new(), far)]);
        let ballot = stub.final_direction_vote(&ctx, &proposals);
        assert_eq!(ballot, BTreeMap::from([(near, 1.0)]));
    }

    #[test]
    fn scripted_direction_wins_over_own_proposal() {
        let mut state = SimulationState::new(SimulationConfig::default());
        let bike = state.spawn_bike_at(Coordinates::new(0.0, 0.0));
        let near = state.spawn_pickup_at(Coordinates::new(5.0, 0.0), 3.0, Colour::Red);
        let far = state.spawn_pickup_at(Coordinates::new(50.0, 0.0), 3.0, Colour::Red);
        let agent = state.spawn_agent(Box::new(StubPolicy::new()));
        state.add_agent_to_bike(agent, bike).unwrap();

        let ctx = DecisionContext {
            me: state.agent(agent).unwrap(),
            view: state.view(),
        };
        let mut stub = StubPolicy {
            direction: Some(far),
            ..StubPolicy::new()
        };
        let proposals = BTreeMap::from([(agent, near), (AgentId::new(), far)]);
        let ballot = stub.final_direction_vote(&ctx, &proposals);
        assert_eq!(ballot, BTreeMap::from([(far, 1.0)]));
    }
}
