//! Heuristic agent policy used by the engine binary.
//!
//! A [`BaselinePolicy`] tracks a trust score for every agent it has ridden
//! with. Trust rises while a crewmate pedals and falls when it coasts;
//! crewmates below [`KICK_THRESHOLD`] are nominated for expulsion and
//! reported to the rest of the crew. Everything else follows the agent's
//! [`Temperament`]: how greedy its allocation is, how hard it pedals, and
//! how long it tolerates a bike that goes nowhere.

use std::collections::{BTreeMap, BTreeSet};

use megabike_core::policy::{BikerPolicy, DecisionContext};
use megabike_core::voting::{Ballot, Weights};
use megabike_types::{
    Action, AgentDecision, AgentId, BikeId, Forces, Governance, Message, PickupId,
    TurningDecision,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Trust below which a crewmate is nominated for expulsion.
pub const KICK_THRESHOLD: f64 = 0.3;

/// Trust assumed for an agent never observed.
const DEFAULT_TRUST: f64 = 0.5;

/// Message topic used to warn the crew about a free rider.
const FREE_RIDER_TOPIC: &str = "free_rider";

const MIN_RADIUS: f64 = 20.0;
const MAX_RADIUS: f64 = 500.0;

/// Fixed character traits of a baseline agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Temperament {
    /// Governance mode chosen at founding.
    pub preferred: Governance,
    /// Share of any loot split claimed for itself, in [0, 1].
    pub greed: f64,
    /// Pedal force while energy is healthy.
    pub pedal: f64,
    /// Rounds without a direction before the agent looks for another bike.
    pub patience: u32,
}

/// Trust-tracking heuristic policy.
#[derive(Debug)]
pub struct BaselinePolicy {
    temperament: Temperament,
    rng: StdRng,
    trust: BTreeMap<AgentId, f64>,
    idle_rounds: u32,
    left_bike: Option<BikeId>,
    last_proposal: Option<PickupId>,
    last_eligible: usize,
    warnings: Vec<AgentId>,
}

impl BaselinePolicy {
    /// Create a policy with its own seeded random stream.
    pub fn new(temperament: Temperament, seed: u64) -> Self {
        Self {
            temperament,
            rng: StdRng::seed_from_u64(seed),
            trust: BTreeMap::new(),
            idle_rounds: 0,
            left_bike: None,
            last_proposal: None,
            last_eligible: 0,
            warnings: Vec::new(),
        }
    }

    fn trust_in(&self, agent: AgentId) -> f64 {
        self.trust.get(&agent).copied().unwrap_or(DEFAULT_TRUST)
    }

    fn adjust_trust(&mut self, agent: AgentId, delta: f64) {
        let next = (self.trust_in(agent) + delta).clamp(0.0, 1.0);
        self.trust.insert(agent, next);
    }

    /// Update trust in each crewmate from the forces they applied last round.
    ///
    /// Nothing is learned from a round in which the bike had no target.
    fn observe_crew(&mut self, ctx: &DecisionContext<'_>) {
        if !ctx.my_bike().is_some_and(|bike| bike.direction.is_some()) {
            return;
        }
        for id in ctx.crew() {
            if id == ctx.me.id {
                continue;
            }
            let Some(mate) = ctx.view.agents.get(&id) else {
                continue;
            };
            if mate.forces.pedal < 0.1 {
                self.adjust_trust(id, -0.2);
            } else {
                self.adjust_trust(id, 0.05);
            }
        }
    }

    /// Pickup of the agent's own colour nearest its bike, else the nearest.
    fn preferred_pickup<'p>(
        &self,
        ctx: &DecisionContext<'_>,
        candidates: impl IntoIterator<Item = &'p PickupId> + Clone,
    ) -> Option<PickupId> {
        let own_colour: Vec<PickupId> = candidates
            .clone()
            .into_iter()
            .filter(|id| {
                ctx.view
                    .pickups
                    .get(id)
                    .is_some_and(|p| p.colour == ctx.me.colour)
            })
            .copied()
            .collect();
        ctx.nearest_pickup(&own_colour)
            .or_else(|| ctx.nearest_pickup(candidates))
    }

    fn split(&self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        let me = ctx.me.id;
        let others: Vec<AgentId> = ctx.crew().into_iter().filter(|&id| id != me).collect();
        if others.is_empty() {
            return BTreeMap::from([(me, 1.0)]);
        }
        let greed = self.temperament.greed.clamp(0.0, 1.0);
        #[allow(clippy::cast_precision_loss)]
        let rest = (1.0 - greed) / others.len() as f64;
        let mut ballot: Ballot<AgentId> = others.into_iter().map(|id| (id, rest)).collect();
        ballot.insert(me, greed);
        ballot
    }

    fn ruler_ballot(&self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        let me = ctx.me.id;
        let candidate = if self.temperament.greed > 0.5 {
            me
        } else {
            ctx.crew()
                .into_iter()
                .filter(|&id| id != me)
                .max_by(|a, b| {
                    self.trust_in(*a)
                        .total_cmp(&self.trust_in(*b))
                        .then_with(|| b.cmp(a))
                })
                .unwrap_or(me)
        };
        BTreeMap::from([(candidate, 1.0)])
    }

    fn acceptable(&self, pending: &BTreeSet<AgentId>) -> Vec<AgentId> {
        pending
            .iter()
            .copied()
            .filter(|&id| self.trust_in(id) >= KICK_THRESHOLD)
            .collect()
    }
}

impl BikerPolicy for BaselinePolicy {
    fn decide_action(&mut self, ctx: &DecisionContext<'_>) -> AgentDecision {
        let moving = ctx.my_bike().is_some_and(|bike| bike.direction.is_some());
        self.idle_rounds = if moving {
            0
        } else {
            self.idle_rounds.saturating_add(1)
        };
        if self.idle_rounds > self.temperament.patience {
            self.idle_rounds = 0;
            self.left_bike = ctx.me.riding();
            AgentDecision::ChangeBike
        } else {
            AgentDecision::Pedal
        }
    }

    fn decide_target_bike(&mut self, ctx: &DecisionContext<'_>) -> Option<BikeId> {
        let mut bikes: Vec<(usize, BikeId)> = ctx
            .view
            .bikes
            .values()
            .filter(|bike| Some(bike.id()) != self.left_bike)
            .map(|bike| (bike.member_count(), bike.id()))
            .collect();
        bikes.sort_unstable();
        let shortlist = bikes.len().min(3);
        if shortlist == 0 {
            return None;
        }
        let pick = self.rng.random_range(0..shortlist);
        bikes.get(pick).map(|&(_, id)| id)
    }

    fn propose_direction(
        &mut self,
        ctx: &DecisionContext<'_>,
        eligible: &BTreeSet<PickupId>,
    ) -> Option<PickupId> {
        self.last_eligible = eligible.len();
        let proposal = self.preferred_pickup(ctx, eligible.iter());
        self.last_proposal = proposal;
        proposal
    }

    fn final_direction_vote(
        &mut self,
        ctx: &DecisionContext<'_>,
        proposals: &BTreeMap<AgentId, PickupId>,
    ) -> Ballot<PickupId> {
        let mut ballot: Ballot<PickupId> = BTreeMap::new();
        for (&proposer, &pickup) in proposals {
            let support = if proposer == ctx.me.id {
                1.0
            } else {
                self.trust_in(proposer)
            };
            *ballot.entry(pickup).or_insert(0.0) += support;
        }
        let total: f64 = ballot.values().sum();
        if total > 0.0 {
            for value in ballot.values_mut() {
                *value /= total;
            }
        }
        ballot
    }

    fn decide_kickout(&mut self, ctx: &DecisionContext<'_>) -> Vec<AgentId> {
        self.observe_crew(ctx);
        let me = ctx.me.id;
        let kicks: Vec<AgentId> = ctx
            .crew()
            .into_iter()
            .filter(|&id| id != me && self.trust_in(id) < KICK_THRESHOLD)
            .collect();
        self.warnings.clone_from(&kicks);
        kicks
    }

    fn decide_kickout_as_ruler(&mut self, ctx: &DecisionContext<'_>) -> Vec<AgentId> {
        self.decide_kickout(ctx)
    }

    fn decide_joining(
        &mut self,
        _ctx: &DecisionContext<'_>,
        pending: &BTreeSet<AgentId>,
    ) -> BTreeMap<AgentId, bool> {
        pending
            .iter()
            .map(|&id| (id, self.trust_in(id) >= KICK_THRESHOLD))
            .collect()
    }

    fn decide_joining_as_ruler(
        &mut self,
        _ctx: &DecisionContext<'_>,
        pending: &BTreeSet<AgentId>,
    ) -> Vec<AgentId> {
        let mut accepted = self.acceptable(pending);
        accepted.sort_by(|a, b| {
            self.trust_in(*b)
                .total_cmp(&self.trust_in(*a))
                .then_with(|| a.cmp(b))
        });
        accepted
    }

    fn decide_governance(&mut self, _ctx: &DecisionContext<'_>) -> Governance {
        self.temperament.preferred
    }

    fn vote_dictator(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        self.ruler_ballot(ctx)
    }

    fn vote_leader(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        self.ruler_ballot(ctx)
    }

    fn decide_weights(&mut self, ctx: &DecisionContext<'_>, action: Action) -> Weights {
        let me = ctx.me.id;
        ctx.crew()
            .into_iter()
            .map(|id| {
                // Loot is shared evenly regardless of reputation.
                let weight = if id == me || action == Action::Allocation {
                    1.0
                } else {
                    self.trust_in(id)
                };
                (id, weight)
            })
            .collect()
    }

    fn decide_allocation(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        self.split(ctx)
    }

    fn decide_dictator_allocation(&mut self, ctx: &DecisionContext<'_>) -> Ballot<AgentId> {
        self.split(ctx)
    }

    fn dictate_direction(&mut self, ctx: &DecisionContext<'_>) -> Option<PickupId> {
        self.preferred_pickup(ctx, ctx.view.pickups.keys())
    }

    fn decide_force(&mut self, ctx: &DecisionContext<'_>, direction: PickupId) -> Forces {
        let steering = ctx.steering_towards(direction);
        let pedal = if ctx.me.energy < 0.1 {
            self.temperament.pedal * 0.2
        } else {
            self.temperament.pedal
        };
        Forces {
            pedal,
            brake: 0.0,
            turning: TurningDecision {
                steer_bike: steering.is_some(),
                steering_force: steering.unwrap_or_default(),
            },
        }
    }

    fn propose_new_radius(&mut self, _ctx: &DecisionContext<'_>, current: f64) -> f64 {
        let next = if self.last_eligible == 0 {
            current * 1.25
        } else {
            current * 0.95
        };
        next.clamp(MIN_RADIUS, MAX_RADIUS)
    }

    fn outgoing_messages(&mut self, ctx: &DecisionContext<'_>) -> Vec<Message> {
        let recipients: Vec<AgentId> = ctx
            .crew()
            .into_iter()
            .filter(|&id| id != ctx.me.id)
            .collect();
        if recipients.is_empty() {
            self.warnings.clear();
            return Vec::new();
        }
        std::mem::take(&mut self.warnings)
            .into_iter()
            .map(|suspect| Message {
                sender: ctx.me.id,
                recipients: recipients.clone(),
                topic: String::from(FREE_RIDER_TOPIC),
                body: serde_json::json!({ "agent": suspect }),
            })
            .collect()
    }

    fn handle_message(&mut self, _ctx: &DecisionContext<'_>, message: &Message) {
        if message.topic != FREE_RIDER_TOPIC || self.trust_in(message.sender) < DEFAULT_TRUST {
            return;
        }
        let suspect = message
            .body
            .get("agent")
            .cloned()
            .and_then(|value| serde_json::from_value::<AgentId>(value).ok());
        if let Some(suspect) = suspect {
            self.adjust_trust(suspect, -0.1);
        }
    }

    fn on_agent_death(&mut self, agent: AgentId) {
        self.trust.remove(&agent);
    }

    fn trustworthiness(&self) -> f64 {
        self.temperament.pedal.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use megabike_core::config::SimulationConfig;
    use megabike_core::policy::StubPolicy;
    use megabike_core::state::SimulationState;
    use megabike_types::{Biker, Colour, Coordinates};

    use super::*;

    fn temperament(greed: f64) -> Temperament {
        Temperament {
            preferred: Governance::Democracy,
            greed,
            pedal: 0.8,
            patience: 3,
        }
    }

    fn rider(state: &mut SimulationState, bike: BikeId, pedal: f64) -> AgentId {
        let mut biker = Biker::new(Colour::Red, 1.0);
        biker.forces.pedal = pedal;
        let id = state.insert_agent(biker, Box::new(StubPolicy::new()));
        assert!(state.add_agent_to_bike(id, bike).unwrap());
        id
    }

    fn ctx(state: &SimulationState, id: AgentId) -> DecisionContext<'_> {
        DecisionContext {
            me: state.agent(id).unwrap(),
            view: state.view(),
        }
    }

    /// A bike with the deciding agent, a coasting crewmate and a pedalling one.
    fn crew() -> (SimulationState, BikeId, [AgentId; 3]) {
        let mut state = SimulationState::new(SimulationConfig::default());
        let bike = state.spawn_bike_at(Coordinates::new(100.0, 100.0));
        let me = rider(&mut state, bike, 1.0);
        let slacker = rider(&mut state, bike, 0.0);
        let worker = rider(&mut state, bike, 1.0);
        (state, bike, [me, slacker, worker])
    }

    #[test]
    fn coasting_crewmate_is_nominated() {
        let (mut state, bike, [me, slacker, _]) = crew();
        let pickup = state.spawn_pickup_at(Coordinates::new(150.0, 100.0), 1.0, Colour::Red);
        state.bike_mut(bike).unwrap().direction = Some(pickup);

        let mut policy = BaselinePolicy::new(temperament(0.5), 1);
        policy.decide_kickout(&ctx(&state, me));
        let kicks = policy.decide_kickout(&ctx(&state, me));
        assert_eq!(kicks, vec![slacker]);
    }

    #[test]
    fn idle_bike_teaches_nothing() {
        let (state, _, [me, ..]) = crew();
        let mut policy = BaselinePolicy::new(temperament(0.5), 1);
        for _ in 0..5 {
            assert!(policy.decide_kickout(&ctx(&state, me)).is_empty());
        }
    }

    #[test]
    fn greedy_split_sums_to_one() {
        let (state, _, [me, slacker, worker]) = crew();
        let mut policy = BaselinePolicy::new(temperament(0.6), 1);
        let split = policy.decide_allocation(&ctx(&state, me));
        assert!((split[&me] - 0.6).abs() < 1e-9);
        assert!((split[&slacker] - 0.2).abs() < 1e-9);
        assert!((split[&worker] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn radius_widens_until_something_is_in_reach() {
        let (mut state, _, [me, ..]) = crew();
        let mut policy = BaselinePolicy::new(temperament(0.5), 1);
        assert!((policy.propose_new_radius(&ctx(&state, me), 100.0) - 125.0).abs() < 1e-9);
        assert!((policy.propose_new_radius(&ctx(&state, me), 450.0) - MAX_RADIUS).abs() < 1e-9);

        let pickup = state.spawn_pickup_at(Coordinates::new(120.0, 100.0), 1.0, Colour::Blue);
        let proposal = policy.propose_direction(&ctx(&state, me), &BTreeSet::from([pickup]));
        assert_eq!(proposal, Some(pickup));
        assert!((policy.propose_new_radius(&ctx(&state, me), 100.0) - 95.0).abs() < 1e-9);
    }

    #[test]
    fn gossip_lowers_trust_in_the_suspect() {
        let (state, _, [me, slacker, worker]) = crew();
        let mut policy = BaselinePolicy::new(temperament(0.5), 1);
        let warning = Message {
            sender: worker,
            recipients: vec![me],
            topic: String::from(FREE_RIDER_TOPIC),
            body: serde_json::json!({ "agent": slacker }),
        };
        for _ in 0..3 {
            policy.handle_message(&ctx(&state, me), &warning);
        }
        let verdicts = policy.decide_joining(&ctx(&state, me), &BTreeSet::from([slacker, worker]));
        assert_eq!(verdicts.get(&slacker), Some(&false));
        assert_eq!(verdicts.get(&worker), Some(&true));
    }

    #[test]
    fn impatient_rider_leaves_a_stalled_bike() {
        let (state, bike, [me, ..]) = crew();
        let mut policy = BaselinePolicy::new(temperament(0.5), 1);
        for _ in 0..3 {
            assert_eq!(policy.decide_action(&ctx(&state, me)), AgentDecision::Pedal);
        }
        assert_eq!(policy.decide_action(&ctx(&state, me)), AgentDecision::ChangeBike);
        let target = policy.decide_target_bike(&ctx(&state, me));
        assert_ne!(target, Some(bike));
    }
}
