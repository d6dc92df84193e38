//! Rule representation and evaluation.
//!
//! A rule is an affine inequality system `A * [x; 1] (cmp) 0` where `x` is a
//! feature vector read from a subject in the rule's declared input order and
//! `A` has one column per input plus a constant column. Each row of the
//! product is tested against zero with its own [`Comparator`]; the rule
//! passes only if every row holds.

use megabike_types::{Action, Biker, Comparator, Coordinates, RuleId, RuleInput};
use serde::{Deserialize, Serialize};

use crate::error::RuleError;

// ---------------------------------------------------------------------------
// Subjects
// ---------------------------------------------------------------------------

/// Anything a rule can read features from.
///
/// Returning `None` means the subject has no value for that input; the rule
/// then fails closed.
pub trait RuleSubject {
    /// The numeric value of `input` for this subject, if defined.
    fn feature(&self, input: RuleInput) -> Option<f64>;
}

/// An agent together with the position of the bike it is on.
#[derive(Debug, Clone, Copy)]
pub struct AgentSubject<'a> {
    /// The agent being evaluated.
    pub biker: &'a Biker,
    /// Position used for the `Location` input.
    pub position: Coordinates,
}

impl<'a> AgentSubject<'a> {
    /// Pair an agent with a position.
    pub const fn new(biker: &'a Biker, position: Coordinates) -> Self {
        Self { biker, position }
    }
}

impl RuleSubject for AgentSubject<'_> {
    fn feature(&self, input: RuleInput) -> Option<f64> {
        match input {
            RuleInput::Forces => Some(self.biker.forces.pedal),
            RuleInput::Colour => Some(f64::from(self.biker.colour.index())),
            RuleInput::Location => Some(self.position.norm()),
            RuleInput::Energy => Some(self.biker.energy),
            RuleInput::Points => Some(f64::from(self.biker.points)),
            RuleInput::Distance => None,
        }
    }
}

/// A (bike, pickup) pair, reduced to the distance between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickupSubject {
    /// Distance from the bike to the pickup.
    pub distance: f64,
}

impl RuleSubject for PickupSubject {
    fn feature(&self, input: RuleInput) -> Option<f64> {
        match input {
            RuleInput::Distance => Some(self.distance),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Row-major coefficient matrix of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleMatrix(Vec<Vec<f64>>);

impl RuleMatrix {
    /// Wrap a list of rows. Shape is checked when the matrix is attached to
    /// a rule.
    pub const fn new(rows: Vec<Vec<f64>>) -> Self {
        Self(rows)
    }

    /// The matrix rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.0
    }

    /// `(rows, columns)`, taking the column count from the first row.
    pub fn dims(&self) -> (usize, usize) {
        let cols = self.0.first().map_or(0, Vec::len);
        (self.0.len(), cols)
    }

    /// The constant (last) coefficient of `row`.
    pub fn constant_term(&self, row: usize) -> Option<f64> {
        self.0.get(row).and_then(|r| r.last()).copied()
    }

    /// A copy of this matrix with the constant coefficient of `row` replaced.
    pub fn with_constant_term(&self, row: usize, value: f64) -> Option<Self> {
        let mut rows = self.0.clone();
        let slot = rows.get_mut(row)?.last_mut()?;
        *slot = value;
        Some(Self(rows))
    }
}

/// Dot product of `row` with `features` extended by a trailing `1.0`.
fn affine(row: &[f64], features: &[f64]) -> f64 {
    row.iter()
        .zip(features.iter().chain(std::iter::once(&1.0)))
        .map(|(a, x)| a * x)
        .sum()
}

impl From<Vec<Vec<f64>>> for RuleMatrix {
    fn from(rows: Vec<Vec<f64>>) -> Self {
        Self(rows)
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// Name given to the per-bike pickup distance rule.
pub const PICKUP_RADIUS_RULE: &str = "pickup_radius";

/// A governance rule.
///
/// Construction and deserialization both validate that the matrix has one
/// row per comparator and one column per input plus the constant column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleRepr")]
pub struct Rule {
    id: RuleId,
    name: String,
    action: Action,
    inputs: Vec<RuleInput>,
    matrix: RuleMatrix,
    comparators: Vec<Comparator>,
    mutable: bool,
}

/// Unvalidated wire form of [`Rule`].
#[derive(Deserialize)]
struct RuleRepr {
    id: RuleId,
    name: String,
    action: Action,
    inputs: Vec<RuleInput>,
    matrix: RuleMatrix,
    comparators: Vec<Comparator>,
    mutable: bool,
}

impl TryFrom<RuleRepr> for Rule {
    type Error = RuleError;

    fn try_from(repr: RuleRepr) -> Result<Self, Self::Error> {
        check_shape(repr.inputs.len(), &repr.matrix, repr.comparators.len())?;
        Ok(Self {
            id: repr.id,
            name: repr.name,
            action: repr.action,
            inputs: repr.inputs,
            matrix: repr.matrix,
            comparators: repr.comparators,
            mutable: repr.mutable,
        })
    }
}

fn check_shape(inputs: usize, matrix: &RuleMatrix, comparators: usize) -> Result<(), RuleError> {
    let rows = matrix.rows().len();
    if rows != comparators {
        return Err(RuleError::ComparatorCountMismatch { rows, comparators });
    }
    let cols = inputs.saturating_add(1);
    if let Some(bad) = matrix.rows().iter().find(|row| row.len() != cols) {
        return Err(RuleError::DimensionMismatch {
            expected_rows: rows,
            expected_cols: cols,
            actual_rows: rows,
            actual_cols: bad.len(),
        });
    }
    Ok(())
}

impl Rule {
    /// Build a rule with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ComparatorCountMismatch`] if the comparator count
    /// differs from the row count, or [`RuleError::DimensionMismatch`] if any
    /// row is not `inputs.len() + 1` wide.
    pub fn new(
        action: Action,
        name: impl Into<String>,
        inputs: Vec<RuleInput>,
        matrix: RuleMatrix,
        comparators: Vec<Comparator>,
        mutable: bool,
    ) -> Result<Self, RuleError> {
        check_shape(inputs.len(), &matrix, comparators.len())?;
        Ok(Self {
            id: RuleId::new(),
            name: name.into(),
            action,
            inputs,
            matrix,
            comparators,
            mutable,
        })
    }

    /// An immutable rule that every subject passes.
    ///
    /// Agent categories read location, energy, points and colour with an
    /// all-zero matrix; the pickup category reads distance; applies-to-all
    /// rules use only the constant column.
    pub fn null_passing(action: Action) -> Self {
        let inputs = match action {
            Action::Lootbox => vec![RuleInput::Distance],
            Action::AppliesAll => Vec::new(),
            Action::MoveBike | Action::KickAgent | Action::Allocation | Action::Joining => vec![
                RuleInput::Location,
                RuleInput::Energy,
                RuleInput::Points,
                RuleInput::Colour,
            ],
        };
        let rows = if inputs.len() > 1 { 3 } else { 1 };
        let row = vec![0.0; inputs.len().saturating_add(1)];
        Self {
            id: RuleId::new(),
            name: String::from("null_passing_rule"),
            action,
            matrix: RuleMatrix(vec![row; rows]),
            comparators: vec![Comparator::Eq; rows],
            inputs,
            mutable: false,
        }
    }

    /// The pickup pruning rule `distance - radius <= 0`.
    pub fn pickup_radius(radius: f64, mutable: bool) -> Self {
        Self {
            id: RuleId::new(),
            name: String::from(PICKUP_RADIUS_RULE),
            action: Action::Lootbox,
            inputs: vec![RuleInput::Distance],
            matrix: RuleMatrix(vec![vec![1.0, -radius]]),
            comparators: vec![Comparator::Leq],
            mutable,
        }
    }

    /// Unique rule id.
    pub const fn id(&self) -> RuleId {
        self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The action category this rule governs.
    pub const fn action(&self) -> Action {
        self.action
    }

    /// Feature selectors in evaluation order.
    pub fn inputs(&self) -> &[RuleInput] {
        &self.inputs
    }

    /// The coefficient matrix.
    pub const fn matrix(&self) -> &RuleMatrix {
        &self.matrix
    }

    /// Row comparators.
    pub fn comparators(&self) -> &[Comparator] {
        &self.comparators
    }

    /// Whether [`update_matrix`](Self::update_matrix) is currently allowed.
    pub const fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Flip the mutability flag.
    pub const fn toggle_mutability(&mut self) {
        self.mutable = !self.mutable;
    }

    /// Replace the matrix with one of identical shape.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Immutable`] if the rule is not mutable, or
    /// [`RuleError::DimensionMismatch`] if `matrix` has a different shape.
    pub fn update_matrix(&mut self, matrix: RuleMatrix) -> Result<(), RuleError> {
        if !self.mutable {
            return Err(RuleError::Immutable { rule_id: self.id });
        }
        let (rows, cols) = self.matrix.dims();
        let (new_rows, new_cols) = matrix.dims();
        let ragged = matrix.rows().iter().any(|row| row.len() != cols);
        if rows != new_rows || cols != new_cols || ragged {
            return Err(RuleError::DimensionMismatch {
                expected_rows: rows,
                expected_cols: cols,
                actual_rows: new_rows,
                actual_cols: new_cols,
            });
        }
        self.matrix = matrix;
        Ok(())
    }

    /// Current radius if this is the pickup radius rule.
    pub fn radius(&self) -> Option<f64> {
        if self.name == PICKUP_RADIUS_RULE
            && self.action == Action::Lootbox
            && self.inputs == [RuleInput::Distance]
        {
            self.matrix.constant_term(0).map(|c| -c)
        } else {
            None
        }
    }

    /// Evaluate the rule against `subject`.
    ///
    /// Fails closed when the subject cannot supply one of the inputs.
    pub fn evaluate<S: RuleSubject + ?Sized>(&self, subject: &S) -> bool {
        let features: Option<Vec<f64>> = self.inputs.iter().map(|&i| subject.feature(i)).collect();
        let Some(features) = features else {
            return false;
        };
        self.matrix
            .rows()
            .iter()
            .zip(&self.comparators)
            .all(|(row, cmp)| cmp.holds(affine(row, &features)))
    }
}
