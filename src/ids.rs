//! Lightweight identifiers for objects owned by a [`Graph`](crate::graph::Graph).
//!
//! Relations, universes and grouped views live in arenas inside the graph and
//! are referred to by sequential numeric handles. The handles are opaque: only
//! the graph hands them out, and they are only meaningful for the graph that
//! produced them.
//!
//! They're small, `Copy`, and hashable, so they can be used efficiently as keys
//! in maps or sets (for example in the grouped-view cache key).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique numeric identifier for a relation in a graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct RelationId(u64);

impl RelationId {
    pub(crate) fn new(v: u64) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<relation {}>", self.0)
    }
}

/// Opaque identity of a row-key set.
///
/// Two relations whose universes are registered equal in the
/// [`UniverseRegistry`](crate::universe::UniverseRegistry) are guaranteed to
/// share the same keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct UniverseId(u64);

impl UniverseId {
    pub(crate) fn new(v: u64) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a cached [`GroupedView`](crate::grouping::GroupedView).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ViewId(u64);

impl ViewId {
    pub(crate) fn new(v: u64) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}
