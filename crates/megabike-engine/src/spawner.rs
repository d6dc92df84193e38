//! Agent spawner for seeding the simulation with baseline agents.
//!
//! Each agent gets a random [`Temperament`] drawn from the ranges in the
//! `agents` section of `megabike-config.yaml` and its own random seed, both
//! derived from the world seed so a run is reproducible.

use megabike_core::state::SimulationState;
use megabike_types::{AgentId, Governance};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::info;

use crate::baseline::{BaselinePolicy, Temperament};
use crate::error::EngineError;

// -----------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------

/// Temperament ranges for spawned agents.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpawnerConfig {
    /// Founding choice for every agent. Random per agent when unset.
    #[serde(default)]
    pub preferred_governance: Option<Governance>,

    /// Lower bound on greed.
    #[serde(default = "default_greed_min")]
    pub greed_min: f64,

    /// Upper bound on greed.
    #[serde(default = "default_greed_max")]
    pub greed_max: f64,

    /// Lower bound on pedal force.
    #[serde(default = "default_pedal_min")]
    pub pedal_min: f64,

    /// Upper bound on pedal force.
    #[serde(default = "default_pedal_max")]
    pub pedal_max: f64,

    /// Rounds an agent waits on a bike that goes nowhere.
    #[serde(default = "default_patience")]
    pub patience: u32,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            preferred_governance: None,
            greed_min: default_greed_min(),
            greed_max: default_greed_max(),
            pedal_min: default_pedal_min(),
            pedal_max: default_pedal_max(),
            patience: default_patience(),
        }
    }
}

const fn default_greed_min() -> f64 {
    0.2
}

const fn default_greed_max() -> f64 {
    0.8
}

const fn default_pedal_min() -> f64 {
    0.5
}

const fn default_pedal_max() -> f64 {
    1.0
}

const fn default_patience() -> u32 {
    5
}

// -----------------------------------------------------------------------
// Spawning
// -----------------------------------------------------------------------

fn sample(rng: &mut StdRng, low: f64, high: f64) -> f64 {
    if high > low {
        rng.random_range(low..high)
    } else {
        low
    }
}

/// Spawn `count` baseline agents into `state`.
///
/// # Errors
///
/// Returns [`EngineError::Spawner`] if the configured ranges are invalid.
pub fn spawn_agents(
    config: &SpawnerConfig,
    state: &mut SimulationState,
    count: u32,
    seed: u64,
) -> Result<Vec<AgentId>, EngineError> {
    for (name, value) in [
        ("greed_min", config.greed_min),
        ("greed_max", config.greed_max),
        ("pedal_min", config.pedal_min),
        ("pedal_max", config.pedal_max),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(EngineError::Spawner {
                message: format!("{name} must be within [0, 1], got {value}"),
            });
        }
    }

    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let mut spawned = Vec::new();
    for _ in 0..count {
        let preferred = config.preferred_governance.unwrap_or_else(|| {
            let index = rng.random_range(0..Governance::ALL.len());
            Governance::ALL
                .get(index)
                .copied()
                .unwrap_or(Governance::Democracy)
        });
        let temperament = Temperament {
            preferred,
            greed: sample(&mut rng, config.greed_min, config.greed_max),
            pedal: sample(&mut rng, config.pedal_min, config.pedal_max),
            patience: config.patience,
        };
        let policy = BaselinePolicy::new(temperament, rng.random());
        spawned.push(state.spawn_agent(Box::new(policy)));
    }

    info!(agents_spawned = spawned.len(), "Baseline agents spawned");
    Ok(spawned)
}
