//! Equivalence tracking over row-key sets.
//!
//! The registry is a union–find over [`UniverseId`]s. Universes start out
//! distinct; [`register_as_equal`](UniverseRegistry::register_as_equal) merges
//! two classes permanently. Equality is reflexive, symmetric and transitive,
//! and is never undone.

use crate::ids::UniverseId;
use tracing::debug;

/// Union-find over universes.
#[derive(Debug, Default, Clone)]
pub struct UniverseRegistry {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UniverseRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh universe, distinct from every existing one.
    pub fn fresh(&mut self) -> UniverseId {
        let id = self.parent.len();
        self.parent.push(id);
        self.rank.push(0);
        UniverseId::new(id as u64)
    }

    /// Number of universes allocated so far.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Whether no universe has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    fn find(&self, mut i: usize) -> usize {
        while self.parent[i] != i {
            i = self.parent[i];
        }
        i
    }

    fn find_compress(&mut self, i: usize) -> usize {
        let root = self.find(i);
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Whether `id` was allocated by this registry.
    pub fn contains(&self, id: UniverseId) -> bool {
        id.index() < self.parent.len()
    }

    /// Canonical representative of `id`'s class.
    ///
    /// # Panics
    /// Panics if `id` was not allocated by this registry.
    pub fn representative(&self, id: UniverseId) -> UniverseId {
        UniverseId::new(self.find(id.index()) as u64)
    }

    /// Whether `a` and `b` are known to describe the same key set.
    pub fn are_equal(&self, a: UniverseId, b: UniverseId) -> bool {
        a == b
            || (self.contains(a)
                && self.contains(b)
                && self.find(a.index()) == self.find(b.index()))
    }

    /// Forget every universe allocated after the first `len`.
    ///
    /// Only sound while none of the forgotten universes has been merged with
    /// another one.
    pub(crate) fn truncate(&mut self, len: usize) {
        debug_assert!(self.parent[..len.min(self.parent.len())].iter().all(|&p| p < len));
        self.parent.truncate(len);
        self.rank.truncate(len);
    }

    /// Record that `a` and `b` describe the same key set.
    ///
    /// # Panics
    /// Panics if either id was not allocated by this registry.
    pub fn register_as_equal(&mut self, a: UniverseId, b: UniverseId) {
        let (ra, rb) = (self.find_compress(a.index()), self.find_compress(b.index()));
        if ra == rb {
            return;
        }
        debug!(left = a.raw(), right = b.raw(), "registering universes as equal");
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}
