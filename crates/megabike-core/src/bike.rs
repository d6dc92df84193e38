//! Bikes and the roaming hazard.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use megabike_rules::LocalRuleSet;
use megabike_types::{Action, AgentId, BikeId, Coordinates, Forces, Governance, PhysicalState, PickupId};

use crate::physics::wrap_orientation;

/// A shared vehicle and its self-governing crew.
///
/// The member set can only be changed through the registry in
/// [`SimulationState`](crate::state::SimulationState), which keeps each
/// agent's back-reference in step.
#[derive(Debug, Clone)]
pub struct MegaBike {
    id: BikeId,
    members: BTreeSet<AgentId>,
    /// Kinematic state.
    pub state: PhysicalState,
    /// Heading in half turns, range (-1, 1].
    pub orientation: f64,
    /// Net force applied this round.
    pub force: f64,
    /// How the crew decides.
    pub governance: Governance,
    /// Elected ruler under Leadership or Dictatorship.
    pub ruler: Option<AgentId>,
    /// Activated rules.
    pub rules: LocalRuleSet,
    /// Resources collected this round.
    pub pool: f64,
    /// Members expelled since the last reset.
    pub kicked_out_count: u32,
    /// Pickup targeted this round, if any.
    pub direction: Option<PickupId>,
    /// Result of the latest rule pre-check per action.
    pub compliance: BTreeMap<Action, bool>,
}

impl MegaBike {
    /// An empty, democratic, stationary bike.
    pub fn new(position: Coordinates, base_mass: f64) -> Self {
        Self {
            id: BikeId::new(),
            members: BTreeSet::new(),
            state: PhysicalState::at_rest(position, base_mass),
            orientation: 0.0,
            force: 0.0,
            governance: Governance::Democracy,
            ruler: None,
            rules: LocalRuleSet::new(),
            pool: 0.0,
            kicked_out_count: 0,
            direction: None,
            compliance: BTreeMap::new(),
        }
    }

    /// Unique bike id.
    pub const fn id(&self) -> BikeId {
        self.id
    }

    /// Current position.
    pub const fn position(&self) -> Coordinates {
        self.state.position
    }

    /// Current members.
    pub const fn members(&self) -> &BTreeSet<AgentId> {
        &self.members
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether nobody rides this bike.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the member count has reached `capacity`.
    pub fn is_full(&self, capacity: usize) -> bool {
        self.members.len() >= capacity
    }

    /// Seats still open under `capacity`.
    pub fn open_seats(&self, capacity: usize) -> usize {
        capacity.saturating_sub(self.members.len())
    }

    /// Whether the ruler is set and still on board.
    pub fn has_valid_ruler(&self) -> bool {
        self.ruler.is_some_and(|ruler| self.members.contains(&ruler))
    }

    /// Whether this bike should hold an election now.
    pub fn needs_election(&self) -> bool {
        self.governance.has_ruler() && !self.members.is_empty() && !self.has_valid_ruler()
    }

    pub(crate) fn insert_member(&mut self, agent: AgentId) -> bool {
        self.members.insert(agent)
    }

    pub(crate) fn remove_member(&mut self, agent: AgentId) -> bool {
        let removed = self.members.remove(&agent);
        if removed && self.ruler == Some(agent) {
            self.ruler = None;
        }
        removed
    }

    /// Mass is the base mass plus one unit per member.
    pub fn update_mass(&mut self, base_mass: f64) {
        #[allow(clippy::cast_precision_loss)]
        let riders = self.members.len() as f64;
        self.state.mass = base_mass + riders;
    }

    /// Net force is total pedalling minus the braking of members who do not
    /// pedal.
    pub fn update_force<'a>(&mut self, forces: impl IntoIterator<Item = &'a Forces>) {
        let (pedal, brake) = forces.into_iter().fold((0.0, 0.0), |(pedal, brake), f| {
            if f.pedal > 0.0 {
                (pedal + f.pedal, brake)
            } else {
                (pedal, brake + f.brake)
            }
        });
        self.force = pedal - brake;
    }

    /// Turn by the circular mean of the steering members' requests.
    pub fn update_orientation<'a>(&mut self, forces: impl IntoIterator<Item = &'a Forces>) {
        let mut x = 0.0;
        let mut y = 0.0;
        let mut steering = 0_u32;
        for f in forces {
            if !f.turning.steer_bike {
                continue;
            }
            let angle = PI * wrap_orientation(f.turning.steering_force);
            x += angle.cos();
            y += angle.sin();
            steering = steering.saturating_add(1);
        }
        if steering == 0 {
            return;
        }
        let n = f64::from(steering);
        let turn = (y / n).atan2(x / n) / PI;
        self.orientation = wrap_orientation(self.orientation + turn);
    }
}

/// The roaming hazard. Colliding with it is fatal for a bike's crew.
#[derive(Debug, Clone, PartialEq)]
pub struct Hazard {
    /// Kinematic state.
    pub state: PhysicalState,
    /// Heading in half turns.
    pub orientation: f64,
    /// Force applied this round.
    pub force: f64,
}

impl Hazard {
    /// A stationary hazard at `position`.
    pub const fn new(position: Coordinates, mass: f64) -> Self {
        Self {
            state: PhysicalState::at_rest(position, mass),
            orientation: 0.0,
            force: 0.0,
        }
    }

    /// Current position.
    pub const fn position(&self) -> Coordinates {
        self.state.position
    }

    /// Head for `target` with `force`, or idle if there is none.
    pub fn pursue(&mut self, target: Option<Coordinates>, force: f64) {
        match target {
            Some(point) => {
                self.orientation = self.state.position.heading_to(point);
                self.force = force;
            }
            None => self.force = 0.0,
        }
    }
}
