//! Simulation binary for MegaBike.
//!
//! Loads configuration, spawns the baseline population, runs every
//! iteration and writes the hierarchical report as JSON.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `megabike-config.yaml` (or `MEGABIKE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the world from the configured seed
//! 4. Spawn baseline agents
//! 5. Run the simulation
//! 6. Write `game_dump.json` and log the result

mod baseline;
mod error;
mod progress;
mod spawner;

use std::path::{Path, PathBuf};

use megabike_core::config::SimulationConfig;
use megabike_core::dump::GameDump;
use megabike_core::runner;
use megabike_core::state::SimulationState;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::progress::ProgressCallback;
use crate::spawner::SpawnerConfig;

/// Environment variable that overrides the config file location.
const CONFIG_ENV: &str = "MEGABIKE_CONFIG";

/// Config file used when the override is unset.
const DEFAULT_CONFIG_PATH: &str = "megabike-config.yaml";

/// Report file name inside the configured dump directory.
const DUMP_FILE: &str = "game_dump.json";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, spawning, the run or the report
/// write fails.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path();
    let config = load_config(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        path = %config_path.display(),
        seed = config.world.seed,
        iterations = config.world.iterations,
        rounds_per_iteration = config.world.rounds_per_iteration,
        "Configuration loaded"
    );

    let spawner_config = load_spawner_config(&config_path)?;
    let agents = config.population.agents;
    let seed = config.world.seed;
    let dump_dir = PathBuf::from(&config.output.dump_dir);

    let mut state = SimulationState::new(config);
    spawner::spawn_agents(&spawner_config, &mut state, agents, seed)?;

    let mut callback = ProgressCallback::default();
    let result = runner::run_game(&mut state, &mut callback).map_err(EngineError::from)?;
    runner::log_simulation_end(&result);
    info!(
        deaths = callback.deaths,
        expulsions = callback.expulsions,
        pickups = callback.pickups,
        "Run totals"
    );

    let path = write_dump(&result.dump, &dump_dir)?;
    info!(path = %path.display(), "Report written");
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load simulation configuration, falling back to defaults when the file
/// does not exist.
fn load_config(path: &Path) -> Result<SimulationConfig, EngineError> {
    if path.exists() {
        Ok(SimulationConfig::from_file(path)?)
    } else {
        Ok(SimulationConfig::default())
    }
}

/// Load the spawner settings from the `agents` section of the config file.
///
/// A missing file or a missing section yields the defaults.
fn load_spawner_config(path: &Path) -> Result<SpawnerConfig, EngineError> {
    if !path.exists() {
        return Ok(SpawnerConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| EngineError::Spawner {
        message: format!("failed to read config file: {e}"),
    })?;
    let raw: serde_yml::Value = serde_yml::from_str(&contents).map_err(|e| EngineError::Spawner {
        message: format!("failed to parse config YAML: {e}"),
    })?;

    raw.get("agents").map_or_else(
        || Ok(SpawnerConfig::default()),
        |section| {
            serde_yml::from_value(section.clone()).map_err(|e| EngineError::Spawner {
                message: format!("failed to parse agents config: {e}"),
            })
        },
    )
}

/// Serialize the report into `dir`, creating it if needed.
fn write_dump(dump: &GameDump, dir: &Path) -> Result<PathBuf, EngineError> {
    std::fs::create_dir_all(dir).map_err(|source| EngineError::Output {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(DUMP_FILE);
    let json = serde_json::to_string_pretty(dump)?;
    std::fs::write(&path, json).map_err(|source| EngineError::Output {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
