//! Enumeration types for the MegaBike simulation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

/// How a bike makes its collective decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Governance {
    /// Every member votes with weight 1; there is no ruler.
    Democracy,
    /// Members vote, but the elected leader assigns the vote weights.
    Leadership,
    /// The elected dictator decides alone.
    Dictatorship,
}

impl Governance {
    /// All governance modes in declaration order.
    pub const ALL: [Self; 3] = [Self::Democracy, Self::Leadership, Self::Dictatorship];

    /// Whether this governance mode requires a ruler.
    pub const fn has_ruler(self) -> bool {
        matches!(self, Self::Leadership | Self::Dictatorship)
    }
}

// ---------------------------------------------------------------------------
// Action categories
// ---------------------------------------------------------------------------

/// The action category a rule governs, also used to ask a leader for
/// vote weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Moving the bike (direction and pedalling).
    MoveBike,
    /// Expelling members from the bike.
    KickAgent,
    /// Splitting collected resources between members.
    Allocation,
    /// Choosing which pickups the bike may target.
    Lootbox,
    /// Accepting new members onto the bike.
    Joining,
    /// Rules tagged with this category apply to every other category.
    AppliesAll,
}

impl Action {
    /// The categories a rule may be tagged with.
    ///
    /// `Joining` only exists as a weight request and never carries rules.
    pub const RULE_CATEGORIES: [Self; 5] = [
        Self::MoveBike,
        Self::KickAgent,
        Self::Allocation,
        Self::Lootbox,
        Self::AppliesAll,
    ];
}

// ---------------------------------------------------------------------------
// Rule representation
// ---------------------------------------------------------------------------

/// Row-wise comparison of a rule's evaluated row against zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    /// Row must equal zero.
    Eq,
    /// Row must be strictly positive.
    Gt,
    /// Row must be strictly negative.
    Lt,
    /// Row must be zero or positive.
    Geq,
    /// Row must be zero or negative.
    Leq,
}

impl Comparator {
    /// Test `value` against zero. NaN never satisfies any comparator.
    pub fn holds(self, value: f64) -> bool {
        match self {
            Self::Eq => value == 0.0,
            Self::Gt => value > 0.0,
            Self::Lt => value < 0.0,
            Self::Geq => value >= 0.0,
            Self::Leq => value <= 0.0,
        }
    }
}

/// A named feature selector a rule reads from its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleInput {
    /// The agent's current pedal force.
    Forces,
    /// The agent's colour as a numeric index.
    Colour,
    /// Distance of the agent's bike from the origin.
    Location,
    /// The agent's energy level.
    Energy,
    /// The agent's accumulated points.
    Points,
    /// Distance between a bike and a pickup.
    Distance,
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Colour attribute of agents and pickups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Colour {
    /// Red.
    Red,
    /// Green.
    Green,
    /// Blue.
    Blue,
    /// Yellow.
    Yellow,
    /// Orange.
    Orange,
    /// Purple.
    Purple,
    /// Pink.
    Pink,
    /// Brown.
    Brown,
    /// Gray.
    Gray,
    /// White.
    White,
}

impl Colour {
    /// Every colour, in index order.
    pub const ALL: [Self; 10] = [
        Self::Red,
        Self::Green,
        Self::Blue,
        Self::Yellow,
        Self::Orange,
        Self::Purple,
        Self::Pink,
        Self::Brown,
        Self::Gray,
        Self::White,
    ];

    /// Numeric index used by the `Colour` rule selector.
    pub const fn index(self) -> u8 {
        self as u8
    }
}

/// What an on-bike agent wants to do this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentDecision {
    /// Stay on the bike and pedal.
    Pedal,
    /// Leave the bike and try to join another.
    ChangeBike,
}
