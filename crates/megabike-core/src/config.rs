//! Configuration loading and typed config structures for the MegaBike
//! simulation.
//!
//! The canonical configuration lives in `megabike-config.yaml` at the project
//! root. Every field has a default, so a partial (or empty) file is valid.

use std::path::Path;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
///
/// Mirrors the structure of `megabike-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Seed, run length and playing field size.
    #[serde(default)]
    pub world: WorldConfig,

    /// Entity counts and rule cache size.
    #[serde(default)]
    pub population: PopulationConfig,

    /// Governance costs and the pickup radius rule.
    #[serde(default)]
    pub governance: GovernanceConfig,

    /// Energy economy.
    #[serde(default)]
    pub energy: EnergyConfig,

    /// Physical constants.
    #[serde(default)]
    pub physics: PhysicsConfig,

    /// Replenishment and between-iteration reset toggles.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Report output.
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }
}

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorldConfig {
    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of iterations (games) to run.
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Rounds played in each iteration.
    #[serde(default = "default_rounds_per_iteration")]
    pub rounds_per_iteration: u32,

    /// Width of the spawn area.
    #[serde(default = "default_grid_size")]
    pub grid_width: f64,

    /// Height of the spawn area.
    #[serde(default = "default_grid_size")]
    pub grid_height: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            iterations: default_iterations(),
            rounds_per_iteration: default_rounds_per_iteration(),
            grid_width: default_grid_size(),
            grid_height: default_grid_size(),
        }
    }
}

/// Population configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PopulationConfig {
    /// Number of agents spawned at start.
    #[serde(default = "default_agents")]
    pub agents: u32,

    /// Number of bikes kept on the field.
    #[serde(default = "default_bikes")]
    pub bikes: u32,

    /// Number of pickups kept on the field.
    #[serde(default = "default_pickups")]
    pub pickups: u32,

    /// Maximum members per bike.
    #[serde(default = "default_bike_capacity")]
    pub bike_capacity: usize,

    /// Rules generated into the global cache at start.
    #[serde(default = "default_global_rule_count")]
    pub global_rule_count: usize,

    /// Check rules per category (`true`) or against the flat list (`false`).
    #[serde(default = "default_true")]
    pub stratify_rules: bool,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            agents: default_agents(),
            bikes: default_bikes(),
            pickups: default_pickups(),
            bike_capacity: default_bike_capacity(),
            global_rule_count: default_global_rule_count(),
            stratify_rules: true,
        }
    }
}

/// Governance configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GovernanceConfig {
    /// Energy charged to each member of a democratic bike per vote.
    #[serde(default = "default_democracy_penalty")]
    pub democracy_penalty: f64,

    /// Energy charged to each member of a leadership bike per vote.
    #[serde(default = "default_leadership_penalty")]
    pub leadership_penalty: f64,

    /// Starting radius of each bike's pickup distance rule.
    #[serde(default = "default_pickup_radius")]
    pub pickup_radius: f64,

    /// Whether members may vote the pickup radius up or down.
    #[serde(default = "default_true")]
    pub mutable_pickup_radius: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            democracy_penalty: default_democracy_penalty(),
            leadership_penalty: default_leadership_penalty(),
            pickup_radius: default_pickup_radius(),
            mutable_pickup_radius: true,
        }
    }
}

/// Energy economy configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnergyConfig {
    /// Upper bound on an agent's energy.
    #[serde(default = "default_max_energy")]
    pub max_energy: f64,

    /// Energy lost per unit of pedal force.
    #[serde(default = "default_moving_depletion")]
    pub moving_depletion: f64,

    /// Energy lost each round while off any bike.
    #[serde(default = "default_limbo_penalty")]
    pub limbo_penalty: f64,

    /// Points earned from a pickup of the agent's own colour.
    #[serde(default = "default_same_colour_points")]
    pub same_colour_points: u32,

    /// Lower bound of a pickup's resource value.
    #[serde(default = "default_pickup_min_value")]
    pub pickup_min_value: f64,

    /// Upper bound of a pickup's resource value.
    #[serde(default = "default_pickup_max_value")]
    pub pickup_max_value: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            max_energy: default_max_energy(),
            moving_depletion: default_moving_depletion(),
            limbo_penalty: default_limbo_penalty(),
            same_colour_points: default_same_colour_points(),
            pickup_min_value: default_pickup_min_value(),
            pickup_max_value: default_pickup_max_value(),
        }
    }
}

/// Physical constants.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhysicsConfig {
    /// Mass of an empty bike. Each member adds one unit.
    #[serde(default = "default_bike_mass")]
    pub bike_mass: f64,

    /// Quadratic drag coefficient.
    #[serde(default = "default_drag_coefficient")]
    pub drag_coefficient: f64,

    /// Distance at or below which two objects collide.
    #[serde(default = "default_collision_threshold")]
    pub collision_threshold: f64,

    /// Mass of the hazard.
    #[serde(default = "default_hazard_mass")]
    pub hazard_mass: f64,

    /// Constant force the hazard drives with.
    #[serde(default = "default_hazard_force")]
    pub hazard_force: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            bike_mass: default_bike_mass(),
            drag_coefficient: default_drag_coefficient(),
            collision_threshold: default_collision_threshold(),
            hazard_mass: default_hazard_mass(),
            hazard_force: default_hazard_force(),
        }
    }
}

/// Replenishment and reset toggles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct LifecycleConfig {
    /// Top pickups back up to `population.pickups` each round.
    #[serde(default = "default_true")]
    pub replenish_pickups: bool,

    /// Top bikes back up to `population.bikes` each round.
    #[serde(default = "default_true")]
    pub replenish_bikes: bool,

    /// Despawn a bike together with its members on hazard collision.
    #[serde(default)]
    pub hazard_removes_bike: bool,

    /// Bring dead agents back at the start of each iteration.
    #[serde(default = "default_true")]
    pub respawn_dead_between_iterations: bool,

    /// Refill every agent's energy at the start of each iteration.
    #[serde(default = "default_true")]
    pub replenish_energy_between_iterations: bool,

    /// Zero every agent's points at the start of each iteration.
    #[serde(default)]
    pub reset_points_between_iterations: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            replenish_pickups: true,
            replenish_bikes: true,
            hazard_removes_bike: false,
            respawn_dead_between_iterations: true,
            replenish_energy_between_iterations: true,
            reset_points_between_iterations: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Report output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    /// Directory the game report is written to.
    #[serde(default = "default_dump_dir")]
    pub dump_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dump_dir: default_dump_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}

const fn default_seed() -> u64 {
    42
}

const fn default_iterations() -> u32 {
    3
}

const fn default_rounds_per_iteration() -> u32 {
    100
}

const fn default_grid_size() -> f64 {
    500.0
}

const fn default_agents() -> u32 {
    56
}

const fn default_bikes() -> u32 {
    10
}

const fn default_pickups() -> u32 {
    140
}

const fn default_bike_capacity() -> usize {
    8
}

const fn default_global_rule_count() -> usize {
    100
}

const fn default_democracy_penalty() -> f64 {
    0.02
}

const fn default_leadership_penalty() -> f64 {
    0.01
}

const fn default_pickup_radius() -> f64 {
    100.0
}

const fn default_max_energy() -> f64 {
    1.0
}

const fn default_moving_depletion() -> f64 {
    0.005
}

const fn default_limbo_penalty() -> f64 {
    0.05
}

const fn default_same_colour_points() -> u32 {
    5
}

const fn default_pickup_min_value() -> f64 {
    2.0
}

const fn default_pickup_max_value() -> f64 {
    5.0
}

const fn default_bike_mass() -> f64 {
    5.0
}

const fn default_drag_coefficient() -> f64 {
    0.5
}

const fn default_collision_threshold() -> f64 {
    7.0
}

const fn default_hazard_mass() -> f64 {
    10.0
}

const fn default_hazard_force() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_dump_dir() -> String {
    "output".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert_eq!(config.world.seed, 42);
        assert_eq!(config.population.agents, 56);
        assert_eq!(config.population.bike_capacity, 8);
        assert_eq!(config.population.global_rule_count, 100);
        assert!(config.population.stratify_rules);
        assert!((config.energy.max_energy - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r"
world:
  seed: 7
  rounds_per_iteration: 20
population:
  bike_capacity: 4
lifecycle:
  hazard_removes_bike: true
";
        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.world.seed, 7);
        assert_eq!(config.world.rounds_per_iteration, 20);
        assert_eq!(config.world.iterations, 3);
        assert_eq!(config.population.bike_capacity, 4);
        assert_eq!(config.population.agents, 56);
        assert!(config.lifecycle.hazard_removes_bike);
        assert!(config.lifecycle.replenish_pickups);
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        let config = SimulationConfig::parse("{}").unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        let result = SimulationConfig::parse("world: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
