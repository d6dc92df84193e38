//! Iteration and game runner.
//!
//! A game is a fixed number of iterations. Each iteration resets the
//! population, runs the founding stage, then plays rounds until the
//! configured count is reached or every agent is dead. Per-bike expulsion
//! counts are recorded at the end of every iteration and then cleared.

use std::collections::BTreeMap;

use megabike_types::{AgentId, BikeId, Forces};
use tracing::{info, warn};

use crate::dump::{GameDump, IterationDump};
use crate::error::SimulationError;
use crate::founding::found_institutions;
use crate::round::{self, RoundError, RoundSummary};
use crate::state::SimulationState;

/// Errors that can occur during a run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A round was aborted.
    #[error("round error: {source}")]
    Round {
        /// The underlying round error.
        #[from]
        source: RoundError,
    },

    /// The reset or founding stage failed.
    #[error("iteration setup error: {source}")]
    Setup {
        /// The underlying violation.
        #[from]
        source: SimulationError,
    },
}

/// Result of a full run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The hierarchical report.
    pub dump: GameDump,
    /// Iterations executed.
    pub iterations: u32,
    /// Rounds executed across all iterations.
    pub total_rounds: u64,
    /// Living agents at the end.
    pub agents_alive: usize,
}

/// Callback invoked as the run progresses.
pub trait RoundCallback: Send {
    /// Called after a round completes successfully.
    fn on_round(&mut self, summary: &RoundSummary, state: &SimulationState);

    /// Called after an iteration's report is complete.
    fn on_iteration(&mut self, _dump: &IterationDump) {}
}

/// A no-op callback for testing.
pub struct NoOpCallback;

impl RoundCallback for NoOpCallback {
    fn on_round(&mut self, _summary: &RoundSummary, _state: &SimulationState) {}
}

/// Return the world to a clean starting position for a new iteration.
///
/// Everyone is unseated and loses their target bike. Depending on the
/// lifecycle settings the dead are revived, energy is refilled and points
/// are cleared. Rulers and round state are cleared, local rules are
/// re-activated from the global cache, and pickups and bikes are topped up.
///
/// # Errors
///
/// Fails only if the membership indices are inconsistent.
pub fn reset_iteration(state: &mut SimulationState) -> Result<(), SimulationError> {
    let riders: Vec<AgentId> = state.riders.keys().copied().collect();
    for agent in riders {
        state.unseat(agent)?;
    }

    if state.config.lifecycle.respawn_dead_between_iterations {
        let revived = state.respawn_dead();
        if revived > 0 {
            info!(revived, "Dead agents respawned");
        }
    }

    let lifecycle = &state.config.lifecycle;
    let max_energy = state.config.energy.max_energy;
    for biker in state.agents.values_mut() {
        biker.bike = None;
        biker.forces = Forces::default();
        if lifecycle.replenish_energy_between_iterations {
            biker.energy = max_energy;
        }
        if lifecycle.reset_points_between_iterations {
            biker.points = 0;
        }
    }
    for bike in state.bikes.values_mut() {
        bike.ruler = None;
        bike.direction = None;
        bike.pool = 0.0;
        bike.kicked_out_count = 0;
        bike.compliance.clear();
    }

    state.reactivate_rules();
    state.replenish_pickups();
    state.replenish_bikes();
    state.round = 0;
    Ok(())
}

/// Run one iteration and return its report.
///
/// # Errors
///
/// Returns [`RunnerError`] if the setup or any round fails.
pub fn run_iteration(
    state: &mut SimulationState,
    index: u32,
    callback: &mut dyn RoundCallback,
) -> Result<IterationDump, RunnerError> {
    reset_iteration(state)?;
    found_institutions(state)?;

    let rounds = state.config.world.rounds_per_iteration;
    let mut dump = IterationDump::new(index);
    info!(iteration = index, rounds, agents = state.agents.len(), "Iteration started");

    for _ in 0..rounds {
        let summary = round::run_round(state)?;
        callback.on_round(&summary, state);
        let extinct = summary.agents_alive == 0;
        dump.rounds.push(summary.dump);
        if extinct {
            info!(iteration = index, round = state.round, "All agents dead -- extinction");
            break;
        }
    }

    let counts: BTreeMap<BikeId, u32> = state
        .bikes
        .iter()
        .map(|(&id, bike)| (id, bike.kicked_out_count))
        .collect();
    dump.record_kick_offs(counts);
    for bike in state.bikes.values_mut() {
        bike.kicked_out_count = 0;
    }

    info!(
        iteration = index,
        rounds = dump.rounds.len(),
        average_kick_offs = dump.average_kick_offs,
        "Iteration complete"
    );
    callback.on_iteration(&dump);
    Ok(dump)
}

/// Run every configured iteration.
///
/// # Errors
///
/// Returns [`RunnerError`] on the first failed iteration.
pub fn run_game(
    state: &mut SimulationState,
    callback: &mut dyn RoundCallback,
) -> Result<SimulationResult, RunnerError> {
    let iterations = state.config.world.iterations;
    info!(
        iterations,
        rounds_per_iteration = state.config.world.rounds_per_iteration,
        agents = state.agents.len(),
        "Simulation starting"
    );

    let mut dump = GameDump::default();
    let mut total_rounds: u64 = 0;
    for index in 0..iterations {
        let iteration = run_iteration(state, index, callback)?;
        let played = u64::try_from(iteration.rounds.len()).unwrap_or(u64::MAX);
        total_rounds = total_rounds.saturating_add(played);
        dump.iterations.push(iteration);
    }

    Ok(SimulationResult {
        dump,
        iterations,
        total_rounds,
        agents_alive: state.agents.len(),
    })
}

/// Log the end of a run.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        iterations = result.iterations,
        total_rounds = result.total_rounds,
        agents_alive = result.agents_alive,
        "Simulation ended"
    );
    if result.total_rounds == 0 {
        warn!("Simulation ended with no rounds executed");
    }
}
