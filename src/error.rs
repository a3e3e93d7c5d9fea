//! Planning errors.
//!
//! Every error a caller can trigger while building a grouping or a reduction
//! surfaces as a [`PlanError`] before any relation is created. The messages
//! are user-facing diagnostics: they name the offending expression and say
//! how to fix it.

use crate::ids::RelationId;
use thiserror::Error;

/// Result type alias using [`PlanError`].
pub type PlanResult<T> = Result<T, PlanError>;

/// Everything that can go wrong while planning.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PlanError {
    /// A column that is neither a grouping key nor aggregated is used in a reduce.
    #[error(
        "You cannot use {expression} in this reduce statement.\n\
         Make sure that {expression} is used in a groupby: add it to the grouping keys, \
         or wrap it with a reducer, e.g. count({expression})"
    )]
    Scoping { expression: String },

    /// A reducer argument comes from a key set not proven equal to the grouped relation's.
    #[error(
        "You cannot use {expression} in this context. Its universe is different than the \
         universe of the relation the method was called on. You can use \
         <relation1>.with_universe_of(<relation2>) to assign the universe of <relation2> \
         to <relation1> if you're sure their sets of keys are equal."
    )]
    UniverseMismatch { expression: String },

    /// Two output expressions claim the same name.
    #[error("Duplicate value given for output column {name:?}")]
    DuplicateOutputName { name: String },

    /// Positional outputs take their name from the column they reference.
    #[error("Expected a column reference as a positional output, found {expression}")]
    PositionalNotColumn { expression: String },

    #[error("{relation} has no column named {column:?}")]
    UnknownColumn { relation: RelationId, column: String },

    #[error("Cannot resolve {expression} in this context")]
    UnresolvedPlaceholder { expression: String },

    #[error("Reducer {expression} can only be used inside reduce()")]
    ReducerOutsideReduce { expression: String },

    #[error("Reducers cannot be nested: {expression}")]
    NestedReducer { expression: String },

    #[error("Grouping key {expression} must not contain reducers")]
    ReducerInGroupingKey { expression: String },

    #[error("Malformed source rows: {reason}")]
    MalformedRows { reason: String },

    #[error("Invalid grouping: {reason}")]
    InvalidGrouping { reason: String },

    #[error("Invalid join: {reason}")]
    InvalidJoin { reason: String },

    /// Corrupted graph state. Not caused by the caller.
    #[error("internal planner error: {0}")]
    Internal(String),
}

impl PlanError {
    pub(crate) fn scoping(expression: impl ToString) -> Self {
        Self::Scoping { expression: expression.to_string() }
    }

    pub(crate) fn universe_mismatch(expression: impl ToString) -> Self {
        Self::UniverseMismatch { expression: expression.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_remediation_text() {
        let msg = PlanError::scoping("<relation 0>.age").to_string();
        assert!(msg.contains("<relation 0>.age"));
        assert!(msg.contains("add it to the grouping keys"));
        assert!(msg.contains("count(<relation 0>.age)"));

        let msg = PlanError::universe_mismatch("<relation 1>.x").to_string();
        assert!(msg.contains("<relation 1>.x"));
        assert!(msg.contains("with_universe_of"));
    }
}
