//! End-to-end round and game behaviour driven through the public API.
//!
//! Agents are scripted with [`StubPolicy`] so every outcome is fixed by the
//! setup.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::too_many_lines
)]

use std::collections::BTreeMap;

use megabike_core::config::SimulationConfig;
use megabike_core::policy::{BikerPolicy, StubPolicy};
use megabike_core::round::{self, RoundSummary};
use megabike_core::runner::{self, NoOpCallback, RoundCallback};
use megabike_core::state::SimulationState;
use megabike_types::{AgentId, BikeId, Biker, Colour, Coordinates, Governance};

fn quiet_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.population.global_rule_count = 10;
    config.lifecycle.replenish_pickups = false;
    config.lifecycle.replenish_bikes = false;
    config
}

fn boxed(policy: StubPolicy) -> Box<dyn BikerPolicy> {
    Box::new(policy)
}

fn seat(state: &mut SimulationState, bike: BikeId, policy: StubPolicy) -> AgentId {
    let agent = state.spawn_agent(boxed(policy));
    assert!(state.add_agent_to_bike(agent, bike).unwrap());
    agent
}

#[test]
fn two_of_three_expel_the_third() {
    let mut state = SimulationState::new(quiet_config());
    let bike = state.spawn_bike_at(Coordinates::new(10.0, 10.0));
    let target = seat(&mut state, bike, StubPolicy::new());
    let kicker = StubPolicy {
        kick_votes: vec![target],
        ..StubPolicy::new()
    };
    seat(&mut state, bike, kicker.clone());
    seat(&mut state, bike, kicker);

    let summary = round::run_round(&mut state).unwrap();
    assert_eq!(summary.expelled, vec![target]);
    let bike = state.bike(bike).unwrap();
    assert!(!bike.members().contains(&target));
    assert_eq!(bike.member_count(), 2);
    assert!(summary.dump.limbo.contains_key(&target));
}

#[test]
fn expelled_agent_cannot_rejoin_the_same_round() {
    let mut state = SimulationState::new(quiet_config());
    let bike = state.spawn_bike_at(Coordinates::new(10.0, 10.0));
    let target = seat(
        &mut state,
        bike,
        StubPolicy {
            target_bike: Some(bike),
            ..StubPolicy::new()
        },
    );
    let kicker = StubPolicy {
        kick_votes: vec![target],
        ..StubPolicy::new()
    };
    seat(&mut state, bike, kicker.clone());
    seat(&mut state, bike, kicker);

    let summary = round::run_round(&mut state).unwrap();
    assert_eq!(summary.expelled, vec![target]);
    assert!(!summary.admitted.contains(&target));
    assert_eq!(state.rider_of(target), None);
    assert_eq!(state.agent(target).unwrap().bike, Some(bike));
}

#[test]
fn empty_bike_takes_applicants_up_to_capacity() {
    let mut config = quiet_config();
    config.population.bike_capacity = 2;
    let mut state = SimulationState::new(config);
    let bike = state.spawn_bike_at(Coordinates::new(10.0, 10.0));
    for _ in 0..3 {
        state.spawn_agent(boxed(StubPolicy {
            target_bike: Some(bike),
            ..StubPolicy::new()
        }));
    }

    let summary = round::run_round(&mut state).unwrap();
    assert_eq!(summary.admitted.len(), 2);
    assert_eq!(state.bike(bike).unwrap().member_count(), 2);

    // The bike stays full on later rounds.
    round::run_round(&mut state).unwrap();
    assert_eq!(state.bike(bike).unwrap().member_count(), 2);
}

#[test]
fn dictator_allocation_gives_ruler_the_whole_pickup() {
    let mut config = quiet_config();
    config.energy.max_energy = 100.0;
    let mut state = SimulationState::new(config);
    let spot = Coordinates::new(50.0, 50.0);
    let bike = state.spawn_bike_at(spot);
    state.bike_mut(bike).unwrap().governance = Governance::Dictatorship;

    let other = Biker::new(Colour::Red, 0.5);
    let ruler = Biker::new(Colour::Red, 0.5);
    let split = BTreeMap::from([(ruler.id, 1.0), (other.id, 0.0)]);
    let (ruler_id, other_id) = (ruler.id, other.id);
    state.insert_agent(other, boxed(StubPolicy::new()));
    state.insert_agent(
        ruler,
        boxed(StubPolicy {
            allocation: Some(split),
            ..StubPolicy::new()
        }),
    );
    state.add_agent_to_bike(ruler_id, bike).unwrap();
    state.add_agent_to_bike(other_id, bike).unwrap();
    state.bike_mut(bike).unwrap().ruler = Some(ruler_id);

    let pickup = state.spawn_pickup_at(spot, 3.0, Colour::Blue);
    assert_eq!(round::distribute_loot(&mut state).unwrap(), 1);

    assert!((state.agent(ruler_id).unwrap().energy - 3.5).abs() < 1e-12);
    assert!((state.agent(other_id).unwrap().energy - 0.5).abs() < 1e-12);
    assert!(!state.pickups().contains_key(&pickup));
    assert!((state.bike(bike).unwrap().pool - 3.0).abs() < 1e-12);
    assert_eq!(state.agent(ruler_id).unwrap().points, 0);
}

#[test]
fn zero_allocation_hands_out_nothing() {
    let mut state = SimulationState::new(quiet_config());
    let spot = Coordinates::new(50.0, 50.0);
    let bike = state.spawn_bike_at(spot);
    let a = Biker::new(Colour::Red, 0.5);
    let b = Biker::new(Colour::Red, 0.5);
    let (a_id, b_id) = (a.id, b.id);
    let nothing = StubPolicy {
        allocation: Some(BTreeMap::from([(a_id, 0.0), (b_id, 0.0)])),
        ..StubPolicy::new()
    };
    state.insert_agent(a, boxed(nothing.clone()));
    state.insert_agent(b, boxed(nothing));
    state.add_agent_to_bike(a_id, bike).unwrap();
    state.add_agent_to_bike(b_id, bike).unwrap();

    let pickup = state.spawn_pickup_at(spot, 3.0, Colour::Blue);
    assert_eq!(round::distribute_loot(&mut state).unwrap(), 1);

    assert!(!state.pickups().contains_key(&pickup));
    for agent in [a_id, b_id] {
        assert!((state.agent(agent).unwrap().energy - 0.5).abs() < 1e-12);
    }
    assert!(state.bike(bike).unwrap().pool.abs() < 1e-12);
}

#[test]
fn colliding_bikes_share_a_pickup() {
    let mut config = quiet_config();
    config.energy.max_energy = 100.0;
    let mut state = SimulationState::new(config);
    let spot = Coordinates::new(50.0, 50.0);
    let first = state.spawn_bike_at(spot);
    let second = state.spawn_bike_at(Coordinates::new(52.0, 50.0));
    let a = seat(&mut state, first, StubPolicy::new());
    let b = seat(&mut state, second, StubPolicy::new());
    state.set_energy(a, 0.0).unwrap();
    state.set_energy(b, 0.0).unwrap();
    let colour = state.agent(a).unwrap().colour;

    state.spawn_pickup_at(spot, 4.0, colour);
    round::distribute_loot(&mut state).unwrap();

    assert!((state.agent(a).unwrap().energy - 2.0).abs() < 1e-12);
    assert!((state.agent(b).unwrap().energy - 2.0).abs() < 1e-12);
    assert_eq!(state.agent(a).unwrap().points, 5);
}

#[test]
fn exhausted_agents_leave_every_index() {
    let mut state = SimulationState::new(quiet_config());
    let bike = state.spawn_bike_at(Coordinates::new(10.0, 10.0));
    let rider = seat(&mut state, bike, StubPolicy::new());
    let walker = state.spawn_agent(boxed(StubPolicy::new()));
    // The democracy cost and the limbo penalty push both below zero.
    state.set_energy(rider, 0.001).unwrap();
    state.set_energy(walker, 0.001).unwrap();

    let summary = round::run_round(&mut state).unwrap();
    assert_eq!(summary.deaths.len(), 2);
    for agent in [rider, walker] {
        assert!(state.agent(agent).is_none());
        assert!(state.is_dead(agent));
        assert_eq!(state.rider_of(agent), None);
    }
    assert!(state.bike(bike).unwrap().is_empty());
    assert_eq!(summary.agents_alive, 0);
}

#[test]
fn dead_agents_make_no_decisions() {
    let mut state = SimulationState::new(quiet_config());
    let home = state.spawn_bike_at(Coordinates::new(10.0, 10.0));
    let elsewhere = state.spawn_bike_at(Coordinates::new(40.0, 10.0));
    let restless = StubPolicy {
        change_bike: true,
        target_bike: Some(elsewhere),
        ..StubPolicy::new()
    };
    let ghost = seat(&mut state, home, restless);
    let stayer = seat(&mut state, home, StubPolicy::new());
    state.kill_agent(ghost).unwrap();

    for _ in 0..2 {
        let summary = round::run_round(&mut state).unwrap();
        assert!(!summary.left.contains(&ghost));
        assert!(!summary.admitted.contains(&ghost));
        assert!(!summary.deaths.contains(&ghost));
        assert_eq!(summary.agents_alive, 1);
    }
    assert!(state.is_dead(ghost));
    assert!(state.bike(elsewhere).unwrap().is_empty());
    assert_eq!(state.rider_of(stayer), Some(home));
}

#[test]
fn hazard_collision_kills_the_crew() {
    let mut config = quiet_config();
    config.lifecycle.hazard_removes_bike = true;
    let mut state = SimulationState::new(config);
    let bike = state.spawn_bike_at(state.hazard().position());
    let a = seat(&mut state, bike, StubPolicy::new());
    let b = seat(&mut state, bike, StubPolicy::new());

    let summary = round::run_round(&mut state).unwrap();
    assert!(summary.deaths.contains(&a) && summary.deaths.contains(&b));
    assert!(state.bike(bike).is_none());
}

#[test]
fn dangling_target_aborts_the_round() {
    let mut state = SimulationState::new(quiet_config());
    state.spawn_agent(boxed(StubPolicy {
        target_bike: Some(BikeId::new()),
        ..StubPolicy::new()
    }));
    assert!(round::run_round(&mut state).is_err());
}

#[test]
fn leaving_agent_triggers_reelection() {
    let mut state = SimulationState::new(quiet_config());
    let bike = state.spawn_bike_at(Coordinates::new(10.0, 10.0));
    state.bike_mut(bike).unwrap().governance = Governance::Leadership;
    let leader = seat(
        &mut state,
        bike,
        StubPolicy {
            change_bike: true,
            ..StubPolicy::new()
        },
    );
    let stayer = seat(&mut state, bike, StubPolicy::new());
    state.bike_mut(bike).unwrap().ruler = Some(leader);

    let summary = round::run_round(&mut state).unwrap();
    assert_eq!(summary.left, vec![leader]);
    assert_eq!(state.bike(bike).unwrap().ruler, Some(stayer));
}

/// Checks membership consistency after every round.
#[derive(Default)]
struct InvariantCheck {
    rounds: usize,
}

impl RoundCallback for InvariantCheck {
    fn on_round(&mut self, summary: &RoundSummary, state: &SimulationState) {
        self.rounds += 1;
        let capacity = state.config().population.bike_capacity;
        let mut seated = 0;
        for (&id, bike) in state.bikes() {
            assert!(bike.member_count() <= capacity);
            for &member in bike.members() {
                let biker = state.agent(member).unwrap();
                assert!(biker.on_bike);
                assert_eq!(biker.bike, Some(id));
                assert_eq!(state.rider_of(member), Some(id));
                seated += 1;
            }
            if let Some(ruler) = bike.ruler {
                assert!(bike.members().contains(&ruler));
            }
        }
        let on_bike = state.agents().values().filter(|b| b.on_bike).count();
        assert_eq!(seated, on_bike);
        assert_eq!(summary.agents_alive, state.agents().len());
    }
}

#[test]
fn full_game_keeps_membership_consistent() {
    let mut config = SimulationConfig::default();
    config.world.iterations = 2;
    config.world.rounds_per_iteration = 6;
    config.population.agents = 12;
    config.population.bikes = 3;
    config.population.pickups = 20;
    config.population.bike_capacity = 4;
    config.population.global_rule_count = 10;
    let mut state = SimulationState::new(config);
    let modes = [Governance::Democracy, Governance::Leadership, Governance::Dictatorship];
    for i in 0..12 {
        state.spawn_agent(boxed(StubPolicy::choosing(modes[i % 3])));
    }

    let mut check = InvariantCheck::default();
    let result = runner::run_game(&mut state, &mut check).unwrap();
    assert_eq!(result.iterations, 2);
    assert_eq!(result.dump.iterations.len(), 2);
    assert_eq!(u64::try_from(check.rounds).unwrap(), result.total_rounds);
    for iteration in &result.dump.iterations {
        assert!(iteration.rounds.len() <= 6);
        assert_eq!(iteration.kick_offs.len(), state.bikes().len());
    }
    let json = serde_json::to_string(&result.dump).unwrap();
    assert!(json.contains("average_kick_offs"));
}

#[test]
fn same_seed_same_founding() {
    let build = || {
        let mut config = quiet_config();
        config.world.rounds_per_iteration = 5;
        config.population.bikes = 4;
        config.population.pickups = 0;
        let mut state = SimulationState::new(config);
        for _ in 0..5 {
            state.spawn_agent(boxed(StubPolicy::choosing(Governance::Leadership)));
        }
        runner::reset_iteration(&mut state).unwrap();
        state
    };
    let mut first = build();
    let mut second = build();
    runner::run_iteration(&mut first, 0, &mut NoOpCallback).unwrap();
    runner::run_iteration(&mut second, 0, &mut NoOpCallback).unwrap();

    let positions = |state: &SimulationState| -> Vec<(usize, Governance)> {
        state
            .bikes()
            .values()
            .map(|b| (b.member_count(), b.governance))
            .collect::<Vec<_>>()
    };
    let mut a = positions(&first);
    let mut b = positions(&second);
    a.sort_by_key(|&(n, g)| (n, g));
    b.sort_by_key(|&(n, g)| (n, g));
    assert_eq!(a, b);
}
