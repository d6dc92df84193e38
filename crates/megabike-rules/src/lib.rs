//! Rule engine for the MegaBike simulation.
//!
//! Rules are affine inequality systems evaluated against a feature vector
//! read from an agent or from a (bike, pickup) pair. The [`GlobalRuleCache`]
//! holds every rule in the simulation; each bike activates a copy into its
//! own [`LocalRuleSet`].
//!
//! # Modules
//!
//! - [`rule`] -- Rule, matrix, subjects and evaluation
//! - [`cache`] -- Global cache and per-bike rule sets
//! - [`error`] -- [`RuleError`]

pub mod cache;
pub mod error;
pub mod rule;

pub use cache::{GlobalRuleCache, LocalRuleSet};
pub use error::RuleError;
pub use rule::{AgentSubject, PICKUP_RADIUS_RULE, PickupSubject, Rule, RuleMatrix, RuleSubject};
