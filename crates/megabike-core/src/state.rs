//! Population and vehicle registry.
//!
//! [`SimulationState`] is the single owner of every agent, policy, bike and
//! pickup. Cross references are ids resolved through its maps. Membership is
//! kept consistent in three places at once: the bike's member set, the
//! `riders` index, and the agent's own `on_bike`/`bike` fields. Only the
//! methods in this module touch all three.

use std::collections::BTreeMap;

use megabike_rules::{GlobalRuleCache, Rule};
use megabike_types::{AgentId, BikeId, Biker, Colour, Coordinates, Pickup, PickupId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::bike::{Hazard, MegaBike};
use crate::config::{GovernanceConfig, SimulationConfig};
use crate::error::SimulationError;
use crate::physics::{NewtonianPhysics, Physics};
use crate::policy::{BikerPolicy, DecisionContext, GameView};

/// A dead agent, kept so it can be respawned between iterations.
#[derive(Debug)]
struct DeadAgent {
    biker: Biker,
    policy: Box<dyn BikerPolicy>,
}

/// The mutable simulation state passed through the round loop.
#[derive(Debug)]
pub struct SimulationState {
    pub(crate) config: SimulationConfig,
    pub(crate) agents: BTreeMap<AgentId, Biker>,
    pub(crate) policies: BTreeMap<AgentId, Box<dyn BikerPolicy>>,
    pub(crate) bikes: BTreeMap<BikeId, MegaBike>,
    pub(crate) pickups: BTreeMap<PickupId, Pickup>,
    pub(crate) hazard: Hazard,
    pub(crate) riders: BTreeMap<AgentId, BikeId>,
    dead: BTreeMap<AgentId, DeadAgent>,
    pub(crate) rules: GlobalRuleCache,
    pub(crate) rng: StdRng,
    pub(crate) physics: Box<dyn Physics>,
    pub(crate) round: u32,
}

impl SimulationState {
    /// An empty world using the default physics model.
    ///
    /// The global rule cache is populated and the hazard placed at the
    /// centre of the field. Agents, bikes and pickups are added separately.
    pub fn new(config: SimulationConfig) -> Self {
        let physics = NewtonianPhysics::from_config(&config.physics);
        Self::with_physics(config, Box::new(physics))
    }

    /// An empty world using a custom physics model.
    pub fn with_physics(config: SimulationConfig, physics: Box<dyn Physics>) -> Self {
        let mut rules = GlobalRuleCache::new();
        rules.populate_null_rules(config.population.global_rule_count);
        let centre = Coordinates::new(config.world.grid_width / 2.0, config.world.grid_height / 2.0);
        Self {
            hazard: Hazard::new(centre, config.physics.hazard_mass),
            rng: StdRng::seed_from_u64(config.world.seed),
            agents: BTreeMap::new(),
            policies: BTreeMap::new(),
            bikes: BTreeMap::new(),
            pickups: BTreeMap::new(),
            riders: BTreeMap::new(),
            dead: BTreeMap::new(),
            rules,
            physics,
            round: 0,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Read access
    // -----------------------------------------------------------------------

    /// The active configuration.
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Living agents.
    pub const fn agents(&self) -> &BTreeMap<AgentId, Biker> {
        &self.agents
    }

    /// A living agent.
    pub fn agent(&self, id: AgentId) -> Option<&Biker> {
        self.agents.get(&id)
    }

    /// All bikes.
    pub const fn bikes(&self) -> &BTreeMap<BikeId, MegaBike> {
        &self.bikes
    }

    /// A bike.
    pub fn bike(&self, id: BikeId) -> Option<&MegaBike> {
        self.bikes.get(&id)
    }

    /// Mutable access to a bike's governance, rules and physical state.
    /// Membership stays under registry control.
    pub fn bike_mut(&mut self, id: BikeId) -> Option<&mut MegaBike> {
        self.bikes.get_mut(&id)
    }

    /// All pickups.
    pub const fn pickups(&self) -> &BTreeMap<PickupId, Pickup> {
        &self.pickups
    }

    /// The hazard.
    pub const fn hazard(&self) -> &Hazard {
        &self.hazard
    }

    /// Mutable access to the hazard.
    pub const fn hazard_mut(&mut self) -> &mut Hazard {
        &mut self.hazard
    }

    /// The global rule cache.
    pub const fn rules(&self) -> &GlobalRuleCache {
        &self.rules
    }

    /// Mutable access to the global rule cache.
    pub const fn rules_mut(&mut self) -> &mut GlobalRuleCache {
        &mut self.rules
    }

    /// The bike an agent is riding.
    pub fn rider_of(&self, agent: AgentId) -> Option<BikeId> {
        self.riders.get(&agent).copied()
    }

    /// Whether `agent` has died.
    pub fn is_dead(&self, agent: AgentId) -> bool {
        self.dead.contains_key(&agent)
    }

    /// Agents that have died, by id.
    pub fn dead_agents(&self) -> impl Iterator<Item = &Biker> {
        self.dead.values().map(|d| &d.biker)
    }

    /// Round number within the current iteration.
    pub const fn round(&self) -> u32 {
        self.round
    }

    /// The read-only view handed to policies.
    pub fn view(&self) -> GameView<'_> {
        GameView {
            agents: &self.agents,
            bikes: &self.bikes,
            pickups: &self.pickups,
            hazard: &self.hazard,
            round: self.round,
        }
    }

    /// Ids of living agents in ascending order.
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    /// Ids of bikes in ascending order.
    pub fn bike_ids(&self) -> Vec<BikeId> {
        self.bikes.keys().copied().collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Fail unless `id` names a bike.
    pub fn validate_bike(&self, id: BikeId) -> Result<(), SimulationError> {
        if self.bikes.contains_key(&id) {
            Ok(())
        } else {
            Err(SimulationError::UnknownBike { bike_id: id })
        }
    }

    /// Fail unless `id` names a pickup.
    pub fn validate_pickup(&self, id: PickupId) -> Result<(), SimulationError> {
        if self.pickups.contains_key(&id) {
            Ok(())
        } else {
            Err(SimulationError::UnknownPickup { pickup_id: id })
        }
    }

    /// Fail unless `id` names a living agent.
    pub fn validate_agent(&self, id: AgentId) -> Result<(), SimulationError> {
        if self.agents.contains_key(&id) {
            Ok(())
        } else {
            Err(SimulationError::UnknownAgent { agent_id: id })
        }
    }

    // -----------------------------------------------------------------------
    // Policy calls
    // -----------------------------------------------------------------------

    /// Call `decide` on `agent`'s policy with a view of the current state.
    pub(crate) fn ask<T>(
        &mut self,
        agent: AgentId,
        decide: impl FnOnce(&mut dyn BikerPolicy, &DecisionContext<'_>) -> T,
    ) -> Result<T, SimulationError> {
        let me = self
            .agents
            .get(&agent)
            .ok_or(SimulationError::UnknownAgent { agent_id: agent })?;
        let policy = self
            .policies
            .get_mut(&agent)
            .ok_or(SimulationError::MissingPolicy { agent_id: agent })?;
        let ctx = DecisionContext {
            me,
            view: GameView {
                agents: &self.agents,
                bikes: &self.bikes,
                pickups: &self.pickups,
                hazard: &self.hazard,
                round: self.round,
            },
        };
        Ok(decide(policy.as_mut(), &ctx))
    }

    // -----------------------------------------------------------------------
    // Spawning
    // -----------------------------------------------------------------------

    pub(crate) fn random_position(&mut self) -> Coordinates {
        let width = self.config.world.grid_width.max(f64::MIN_POSITIVE);
        let height = self.config.world.grid_height.max(f64::MIN_POSITIVE);
        Coordinates::new(
            self.rng.random_range(0.0..width),
            self.rng.random_range(0.0..height),
        )
    }

    fn random_colour(&mut self) -> Colour {
        let index = self.rng.random_range(0..Colour::ALL.len());
        Colour::ALL.get(index).copied().unwrap_or(Colour::Red)
    }

    /// Add an off-bike agent with a random colour and full energy.
    pub fn spawn_agent(&mut self, policy: Box<dyn BikerPolicy>) -> AgentId {
        let colour = self.random_colour();
        let biker = Biker::new(colour, self.config.energy.max_energy);
        self.insert_agent(biker, policy)
    }

    /// Add a prepared agent. Membership fields are reset.
    pub fn insert_agent(&mut self, mut biker: Biker, policy: Box<dyn BikerPolicy>) -> AgentId {
        biker.on_bike = false;
        biker.bike = None;
        let id = biker.id;
        self.agents.insert(id, biker);
        self.policies.insert(id, policy);
        id
    }

    /// Add an empty bike at a random position.
    pub fn spawn_bike(&mut self) -> BikeId {
        let position = self.random_position();
        self.spawn_bike_at(position)
    }

    /// Add an empty bike at `position` with the global rules and a pickup
    /// radius rule activated.
    pub fn spawn_bike_at(&mut self, position: Coordinates) -> BikeId {
        let mut bike = MegaBike::new(position, self.config.physics.bike_mass);
        activate_rules(&self.rules, &self.config.governance, &mut bike);
        let id = bike.id();
        self.bikes.insert(id, bike);
        id
    }

    /// Reset every bike's local rules to the global set plus a fresh pickup
    /// radius rule.
    pub fn reactivate_rules(&mut self) {
        for bike in self.bikes.values_mut() {
            activate_rules(&self.rules, &self.config.governance, bike);
        }
    }

    /// Add a pickup with random position, value and colour.
    pub fn spawn_pickup(&mut self) -> PickupId {
        let position = self.random_position();
        let (low, high) = (
            self.config.energy.pickup_min_value,
            self.config.energy.pickup_max_value,
        );
        let value = if high > low {
            self.rng.random_range(low..high)
        } else {
            low
        };
        let colour = self.random_colour();
        self.spawn_pickup_at(position, value, colour)
    }

    /// Add a pickup at `position`.
    pub fn spawn_pickup_at(&mut self, position: Coordinates, value: f64, colour: Colour) -> PickupId {
        let pickup = Pickup::new(position, value, colour);
        let id = pickup.id;
        self.pickups.insert(id, pickup);
        id
    }

    /// Remove a pickup.
    pub fn remove_pickup(&mut self, id: PickupId) -> Result<Pickup, SimulationError> {
        self.pickups
            .remove(&id)
            .ok_or(SimulationError::UnknownPickup { pickup_id: id })
    }

    /// Top pickups up to the configured count.
    pub fn replenish_pickups(&mut self) {
        let target = usize::try_from(self.config.population.pickups).unwrap_or(usize::MAX);
        let missing = target.saturating_sub(self.pickups.len());
        for _ in 0..missing {
            self.spawn_pickup();
        }
        if missing > 0 {
            debug!(spawned = missing, "Pickups replenished");
        }
    }

    /// Top bikes up to the configured count.
    pub fn replenish_bikes(&mut self) {
        let target = usize::try_from(self.config.population.bikes).unwrap_or(usize::MAX);
        let missing = target.saturating_sub(self.bikes.len());
        for _ in 0..missing {
            self.spawn_bike();
        }
        if missing > 0 {
            debug!(spawned = missing, "Bikes replenished");
        }
    }

    /// Remove a bike. Members are unseated first and any agent heading for
    /// it loses its target.
    pub fn despawn_bike(&mut self, id: BikeId) -> Result<(), SimulationError> {
        let members: Vec<AgentId> = self
            .bikes
            .get(&id)
            .ok_or(SimulationError::UnknownBike { bike_id: id })?
            .members()
            .iter()
            .copied()
            .collect();
        for agent in members {
            self.unseat(agent)?;
        }
        for biker in self.agents.values_mut() {
            if biker.bike == Some(id) {
                biker.bike = None;
            }
        }
        self.bikes.remove(&id);
        debug!(bike = %id, "Bike despawned");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Seat `agent` on `bike`.
    ///
    /// Returns `Ok(false)` without changing anything when the bike is full.
    pub fn add_agent_to_bike(&mut self, agent: AgentId, bike: BikeId) -> Result<bool, SimulationError> {
        self.validate_agent(agent)?;
        if let Some(&current) = self.riders.get(&agent) {
            return Err(SimulationError::AlreadySeated {
                agent_id: agent,
                bike_id: current,
            });
        }
        let capacity = self.config.population.bike_capacity;
        let target = self
            .bikes
            .get_mut(&bike)
            .ok_or(SimulationError::UnknownBike { bike_id: bike })?;
        if target.is_full(capacity) {
            return Ok(false);
        }
        target.insert_member(agent);
        self.riders.insert(agent, bike);
        if let Some(biker) = self.agents.get_mut(&agent) {
            biker.on_bike = true;
            biker.bike = Some(bike);
        }
        Ok(true)
    }

    /// Take `agent` off its bike without asking where it goes next.
    pub(crate) fn unseat(&mut self, agent: AgentId) -> Result<BikeId, SimulationError> {
        let bike = self
            .riders
            .remove(&agent)
            .ok_or(SimulationError::UnknownAgent { agent_id: agent })?;
        if let Some(vehicle) = self.bikes.get_mut(&bike) {
            vehicle.remove_member(agent);
        }
        if let Some(biker) = self.agents.get_mut(&agent) {
            biker.on_bike = false;
            biker.bike = None;
        }
        Ok(bike)
    }

    /// Take `agent` off `bike` and ask it which bike to head for next.
    ///
    /// Returns the chosen target. An unknown target id is fatal.
    pub fn remove_agent_from_bike(
        &mut self,
        agent: AgentId,
        bike: BikeId,
    ) -> Result<Option<BikeId>, SimulationError> {
        if self.riders.get(&agent) != Some(&bike) {
            return Err(SimulationError::NotAMember {
                agent_id: agent,
                bike_id: bike,
            });
        }
        self.unseat(agent)?;
        let target = self.ask(agent, |policy, ctx| policy.decide_target_bike(ctx))?;
        if let Some(next) = target {
            self.validate_bike(next)?;
        }
        if let Some(biker) = self.agents.get_mut(&agent) {
            biker.bike = target;
        }
        Ok(target)
    }

    // -----------------------------------------------------------------------
    // Energy and death
    // -----------------------------------------------------------------------

    /// Change an agent's energy by `delta`, capped at the configured maximum.
    pub fn update_energy(&mut self, agent: AgentId, delta: f64) -> Result<(), SimulationError> {
        let cap = self.config.energy.max_energy;
        let biker = self
            .agents
            .get_mut(&agent)
            .ok_or(SimulationError::UnknownAgent { agent_id: agent })?;
        // `min` would swallow a NaN, so check before capping.
        let next = biker.energy + delta;
        if !next.is_finite() {
            return Err(SimulationError::NumericDegeneracy {
                agent_id: agent,
                quantity: "energy",
                value: next,
            });
        }
        biker.update_energy(delta, cap);
        Ok(())
    }

    /// Overwrite an agent's energy.
    pub fn set_energy(&mut self, agent: AgentId, energy: f64) -> Result<(), SimulationError> {
        let biker = self
            .agents
            .get_mut(&agent)
            .ok_or(SimulationError::UnknownAgent { agent_id: agent })?;
        biker.energy = energy;
        Ok(())
    }

    /// Remove an agent from the living population.
    ///
    /// The agent leaves its bike (clearing the ruler post if it held it),
    /// moves to the dead set, and every remaining policy is notified.
    pub fn kill_agent(&mut self, agent: AgentId) -> Result<(), SimulationError> {
        self.validate_agent(agent)?;
        if self.riders.contains_key(&agent) {
            self.unseat(agent)?;
        }
        let biker = self
            .agents
            .remove(&agent)
            .ok_or(SimulationError::UnknownAgent { agent_id: agent })?;
        let policy = self
            .policies
            .remove(&agent)
            .ok_or(SimulationError::MissingPolicy { agent_id: agent })?;
        info!(agent = %agent, energy = biker.energy, "Agent died");
        self.dead.insert(agent, DeadAgent { biker, policy });
        for policy in self.policies.values_mut() {
            policy.on_agent_death(agent);
        }
        Ok(())
    }

    /// Bring every dead agent back, off-bike with full energy.
    pub fn respawn_dead(&mut self) -> usize {
        let revived = std::mem::take(&mut self.dead);
        let count = revived.len();
        let energy = self.config.energy.max_energy;
        for (_, DeadAgent { mut biker, policy }) in revived {
            biker.energy = energy;
            self.insert_agent(biker, policy);
        }
        count
    }
}

fn activate_rules(global: &GlobalRuleCache, governance: &GovernanceConfig, bike: &mut MegaBike) {
    bike.rules.clear();
    bike.rules.activate_all_from(global);
    bike.rules.add(Rule::pickup_radius(
        governance.pickup_radius,
        governance.mutable_pickup_radius,
    ));
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use megabike_types::Colour;

    use super::*;
    use crate::policy::StubPolicy;

    fn small_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.population.bike_capacity = 2;
        config.population.global_rule_count = 10;
        config
    }

    fn stub() -> Box<dyn BikerPolicy> {
        Box::new(StubPolicy::new())
    }

    #[test]
    fn new_state_populates_rules() {
        let state = SimulationState::new(small_config());
        assert_eq!(state.rules().len(), 10);
        assert!(state.agents().is_empty());
    }

    #[test]
    fn new_bikes_activate_rules_and_radius() {
        let mut state = SimulationState::new(small_config());
        let bike = state.spawn_bike();
        let bike = state.bike(bike).unwrap();
        assert_eq!(bike.rules.len(), 11);
        assert_eq!(bike.rules.linear().len(), 10);
    }

    #[test]
    fn seating_keeps_back_references() {
        let mut state = SimulationState::new(small_config());
        let bike = state.spawn_bike();
        let agent = state.spawn_agent(stub());

        assert!(state.add_agent_to_bike(agent, bike).unwrap());
        assert_eq!(state.rider_of(agent), Some(bike));
        assert!(state.agent(agent).unwrap().on_bike);
        assert!(state.bike(bike).unwrap().members().contains(&agent));

        let other = state.spawn_bike();
        assert!(matches!(
            state.add_agent_to_bike(agent, other),
            Err(SimulationError::AlreadySeated { .. })
        ));
    }

    #[test]
    fn full_bike_refuses_quietly() {
        let mut state = SimulationState::new(small_config());
        let bike = state.spawn_bike();
        let a = state.spawn_agent(stub());
        let b = state.spawn_agent(stub());
        let c = state.spawn_agent(stub());
        assert!(state.add_agent_to_bike(a, bike).unwrap());
        assert!(state.add_agent_to_bike(b, bike).unwrap());
        assert!(!state.add_agent_to_bike(c, bike).unwrap());
        assert_eq!(state.bike(bike).unwrap().member_count(), 2);
        assert_eq!(state.rider_of(c), None);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut state = SimulationState::new(small_config());
        let agent = state.spawn_agent(stub());
        assert!(matches!(
            state.add_agent_to_bike(agent, BikeId::new()),
            Err(SimulationError::UnknownBike { .. })
        ));
        let bike = state.spawn_bike();
        assert!(matches!(
            state.add_agent_to_bike(AgentId::new(), bike),
            Err(SimulationError::UnknownAgent { .. })
        ));
    }

    #[test]
    fn removal_asks_for_a_valid_target() {
        let mut state = SimulationState::new(small_config());
        let home = state.spawn_bike();
        let next = state.spawn_bike();
        let policy = StubPolicy {
            target_bike: Some(next),
            ..StubPolicy::new()
        };
        let agent = state.spawn_agent(Box::new(policy));
        state.add_agent_to_bike(agent, home).unwrap();

        assert_eq!(state.remove_agent_from_bike(agent, home).unwrap(), Some(next));
        let biker = state.agent(agent).unwrap();
        assert!(!biker.on_bike);
        assert_eq!(biker.bike, Some(next));
        assert!(state.bike(home).unwrap().is_empty());

        assert!(matches!(
            state.remove_agent_from_bike(agent, home),
            Err(SimulationError::NotAMember { .. })
        ));
    }

    #[test]
    fn removal_with_dangling_target_is_fatal() {
        let mut state = SimulationState::new(small_config());
        let home = state.spawn_bike();
        let policy = StubPolicy {
            target_bike: Some(BikeId::new()),
            ..StubPolicy::new()
        };
        let agent = state.spawn_agent(Box::new(policy));
        state.add_agent_to_bike(agent, home).unwrap();
        assert!(matches!(
            state.remove_agent_from_bike(agent, home),
            Err(SimulationError::UnknownBike { .. })
        ));
    }

    #[test]
    fn energy_is_capped_and_checked() {
        let mut state = SimulationState::new(small_config());
        let agent = state.insert_agent(Biker::new(Colour::Red, 0.5), stub());
        state.update_energy(agent, 2.0).unwrap();
        assert!((state.agent(agent).unwrap().energy - 1.0).abs() < f64::EPSILON);
        assert!(matches!(
            state.update_energy(agent, f64::NAN),
            Err(SimulationError::NumericDegeneracy { .. })
        ));
        assert!((state.agent(agent).unwrap().energy - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn nan_delta_leaves_energy_untouched() {
        let mut state = SimulationState::new(small_config());
        let agent = state.insert_agent(Biker::new(Colour::Red, 0.5), stub());
        assert!(matches!(
            state.update_energy(agent, f64::NAN),
            Err(SimulationError::NumericDegeneracy { .. })
        ));
        assert!(matches!(
            state.update_energy(agent, f64::INFINITY),
            Err(SimulationError::NumericDegeneracy { .. })
        ));
        assert!((state.agent(agent).unwrap().energy - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn killing_clears_every_index() {
        let mut state = SimulationState::new(small_config());
        let bike = state.spawn_bike();
        let agent = state.spawn_agent(stub());
        state.add_agent_to_bike(agent, bike).unwrap();
        state.bike_mut(bike).unwrap().ruler = Some(agent);

        state.kill_agent(agent).unwrap();
        assert!(state.agent(agent).is_none());
        assert!(state.is_dead(agent));
        assert_eq!(state.rider_of(agent), None);
        assert!(state.bike(bike).unwrap().is_empty());
        assert_eq!(state.bike(bike).unwrap().ruler, None);

        assert_eq!(state.respawn_dead(), 1);
        assert!(state.agent(agent).is_some());
        assert!(!state.is_dead(agent));
    }

    #[test]
    fn despawn_unseats_members_and_clears_targets() {
        let mut state = SimulationState::new(small_config());
        let bike = state.spawn_bike();
        let rider = state.spawn_agent(stub());
        let walker = state.spawn_agent(stub());
        state.add_agent_to_bike(rider, bike).unwrap();
        state.agents.get_mut(&walker).unwrap().bike = Some(bike);

        state.despawn_bike(bike).unwrap();
        assert!(state.bike(bike).is_none());
        assert_eq!(state.rider_of(rider), None);
        assert_eq!(state.agent(walker).unwrap().bike, None);
    }

    #[test]
    fn replenishment_tops_up_counts() {
        let mut config = small_config();
        config.population.pickups = 5;
        config.population.bikes = 3;
        let mut state = SimulationState::new(config);
        state.replenish_pickups();
        state.replenish_bikes();
        assert_eq!(state.pickups().len(), 5);
        assert_eq!(state.bikes().len(), 3);
        state.replenish_pickups();
        assert_eq!(state.pickups().len(), 5);
    }
}
