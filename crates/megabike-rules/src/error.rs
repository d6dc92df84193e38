//! Error types for rule construction and mutation.

use megabike_types::RuleId;

/// Errors raised by the rule engine and rule caches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// The rule is not flagged mutable.
    #[error("rule {rule_id} is immutable")]
    Immutable {
        /// The rule that rejected the update.
        rule_id: RuleId,
    },

    /// A matrix does not have the required shape.
    #[error(
        "matrix dimension mismatch: expected {expected_rows}x{expected_cols}, got {actual_rows}x{actual_cols}"
    )]
    DimensionMismatch {
        /// Required row count.
        expected_rows: usize,
        /// Required column count.
        expected_cols: usize,
        /// Row count that was supplied.
        actual_rows: usize,
        /// Column count that was supplied (first offending row).
        actual_cols: usize,
    },

    /// The number of comparators differs from the number of matrix rows.
    #[error("rule has {rows} matrix rows but {comparators} comparators")]
    ComparatorCountMismatch {
        /// Matrix row count.
        rows: usize,
        /// Comparator count.
        comparators: usize,
    },

    /// No rule with this id exists in the cache.
    #[error("unknown rule {rule_id}")]
    UnknownRule {
        /// The id that was looked up.
        rule_id: RuleId,
    },
}
