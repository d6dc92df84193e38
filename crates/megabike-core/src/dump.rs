//! Hierarchical run report: game, iteration, round, bike, agent.

use std::collections::BTreeMap;

use megabike_types::{
    AgentId, BikeId, Biker, Colour, Coordinates, Forces, Governance, TurningDecision,
};
use serde::Serialize;

use crate::bike::MegaBike;
use crate::state::SimulationState;

/// Every iteration of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GameDump {
    /// Iterations in order.
    pub iterations: Vec<IterationDump>,
}

/// One iteration: its rounds plus expulsion statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationDump {
    /// Zero-based iteration index.
    pub index: u32,
    /// Rounds in order.
    pub rounds: Vec<RoundDump>,
    /// Members expelled per bike over the iteration.
    pub kick_offs: BTreeMap<BikeId, u32>,
    /// Mean of `kick_offs`, zero when there are no bikes.
    pub average_kick_offs: f64,
}

/// End-of-round snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RoundDump {
    /// Round number within the iteration.
    pub round: u32,
    /// Every bike.
    pub bikes: BTreeMap<BikeId, BikeDump>,
    /// Living agents without a bike.
    pub limbo: BTreeMap<AgentId, AgentDump>,
}

/// One bike at the end of a round.
#[derive(Debug, Clone, Serialize)]
pub struct BikeDump {
    /// Governance mode.
    pub governance: Governance,
    /// Current ruler.
    pub ruler: Option<AgentId>,
    /// Position after movement.
    pub position: Coordinates,
    /// Net force along the current orientation.
    pub direction: Coordinates,
    /// Loot collected this round.
    pub loot_gained: f64,
    /// Members.
    pub agents: BTreeMap<AgentId, AgentDump>,
}

/// One agent at the end of a round.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDump {
    /// Seated on a bike.
    pub on_bike: bool,
    /// The agent's own force vector.
    pub direction: Coordinates,
    /// Energy.
    pub energy: f64,
    /// Points.
    pub points: u32,
    /// Colour.
    pub colour: Colour,
    /// Trustworthiness reported by the agent's policy.
    pub trustworthiness: f64,
}

impl RoundDump {
    /// Snapshot the current state.
    pub fn capture(state: &SimulationState) -> Self {
        let agent_dump = |biker: &Biker| AgentDump {
            on_bike: biker.on_bike,
            direction: biker.forces.to_vector(),
            energy: biker.energy,
            points: biker.points,
            colour: biker.colour,
            trustworthiness: state
                .policies
                .get(&biker.id)
                .map_or(0.0, |policy| policy.trustworthiness()),
        };
        let bikes = state
            .bikes
            .iter()
            .map(|(&id, bike)| {
                let agents = bike
                    .members()
                    .iter()
                    .filter_map(|member| state.agents.get(member))
                    .map(|biker| (biker.id, agent_dump(biker)))
                    .collect();
                (id, BikeDump::new(bike, agents))
            })
            .collect();
        let limbo = state
            .agents
            .values()
            .filter(|biker| !biker.on_bike)
            .map(|biker| (biker.id, agent_dump(biker)))
            .collect();
        Self {
            round: state.round,
            bikes,
            limbo,
        }
    }
}

impl BikeDump {
    fn new(bike: &MegaBike, agents: BTreeMap<AgentId, AgentDump>) -> Self {
        let heading = Forces {
            pedal: bike.force,
            brake: 0.0,
            turning: TurningDecision {
                steer_bike: true,
                steering_force: bike.orientation,
            },
        };
        Self {
            governance: bike.governance,
            ruler: bike.ruler,
            position: bike.position(),
            direction: heading.to_vector(),
            loot_gained: bike.pool,
            agents,
        }
    }
}

impl IterationDump {
    /// An empty report for iteration `index`.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Record per-bike expulsion counts and their mean.
    pub fn record_kick_offs(&mut self, counts: BTreeMap<BikeId, u32>) {
        #[allow(clippy::cast_precision_loss)]
        let average = if counts.is_empty() {
            0.0
        } else {
            counts.values().map(|&c| f64::from(c)).sum::<f64>() / counts.len() as f64
        };
        self.kick_offs = counts;
        self.average_kick_offs = average;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn average_kick_offs_over_bikes() {
        let mut dump = IterationDump::new(0);
        dump.record_kick_offs(BTreeMap::from([(BikeId::new(), 3), (BikeId::new(), 0)]));
        assert!((dump.average_kick_offs - 1.5).abs() < f64::EPSILON);

        dump.record_kick_offs(BTreeMap::new());
        assert!(dump.average_kick_offs.abs() < f64::EPSILON);
    }

    #[test]
    fn report_serializes_ids_as_keys() {
        let mut dump = IterationDump::new(2);
        let bike = BikeId::new();
        dump.record_kick_offs(BTreeMap::from([(bike, 1)]));
        let json = serde_json::to_value(&dump).unwrap();
        assert_eq!(json["index"], 2);
        assert_eq!(json["kick_offs"][bike.to_string()], 1);
    }
}
