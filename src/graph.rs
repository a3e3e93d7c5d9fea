//! The planning graph.
//!
//! A [`Graph`] owns everything planning produces: the arena of relations, the
//! [`UniverseRegistry`], and the grouped-view cache. Handles such as
//! [`Relation`] and [`GroupedView`](crate::grouping::GroupedView) carry a clone
//! of the graph and an integer id, so the registry and cache are always passed
//! explicitly through the planning call chain instead of living in globals.
//!
//! The graph is `Clone` (clones share state) and guarded by a mutex, so plans
//! may be built from several threads. Compound read-modify-write sequences,
//! such as the grouped-view cache lookup-then-insert, run under a single lock
//! acquisition.

use crate::error::{PlanError, PlanResult};
use crate::expr::{Expr, TableRef};
use crate::grouping::{GroupedViewState, GroupingSpec};
use crate::ids::{RelationId, UniverseId, ViewId};
use crate::relation::Relation;
use crate::runner::Row;
use crate::universe::UniverseRegistry;
use crate::value::{Pointer, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Shared planning state; cloning yields another handle to the same graph.
#[derive(Clone, Default)]
pub struct Graph {
    pub(crate) inner: Arc<Mutex<GraphInner>>,
}

#[derive(Default)]
pub(crate) struct GraphInner {
    pub relations: Vec<RelationNode>,
    pub universes: UniverseRegistry,
    pub views: Vec<Arc<GroupedViewState>>,
    pub view_cache: HashMap<ViewKey, ViewId>,
}

/// Cache key of a grouped view: `(relation, normalized keys, set_identity, normalized sort_by)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ViewKey {
    pub relation: RelationId,
    pub keys: Vec<Expr>,
    pub set_identity: bool,
    pub sort_by: Option<Expr>,
}

#[derive(Clone, Debug)]
pub(crate) struct RelationNode {
    pub columns: Vec<String>,
    pub universe: UniverseId,
    pub op: RelationOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum JoinSide {
    Left,
    Right,
}

/// How a relation is derived. Expressions stored here are fully resolved:
/// no placeholders remain.
#[derive(Clone, Debug)]
pub(crate) enum RelationOp {
    Source { rows: Arc<Vec<Row>> },
    Select { input: RelationId, exprs: Vec<Expr> },
    Filter { input: RelationId, predicate: Expr },
    /// Same rows as `input`, asserted to share `reference`'s key set.
    WithUniverseOf { input: RelationId, reference: RelationId },
    Join {
        left: RelationId,
        right: RelationId,
        on: Vec<(Expr, Expr)>,
        columns: Vec<(JoinSide, String)>,
    },
    Reduce { input: RelationId, spec: GroupingSpec, reducers: Vec<Expr> },
    /// Drops rows that only retract previously emitted results.
    FilterRetractions { input: RelationId },
}

impl RelationOp {
    /// Relations whose rows are read when this one is evaluated.
    pub fn inputs(&self) -> Vec<RelationId> {
        let mut out = Vec::new();
        let mut exprs: Vec<&Expr> = Vec::new();
        match self {
            RelationOp::Source { .. } => {}
            RelationOp::Select { input, exprs: e } => {
                out.push(*input);
                exprs.extend(e);
            }
            RelationOp::Filter { input, predicate } => {
                out.push(*input);
                exprs.push(predicate);
            }
            RelationOp::WithUniverseOf { input, reference } => out.extend([*input, *reference]),
            RelationOp::Join { left, right, on, .. } => {
                out.extend([*left, *right]);
                for (l, r) in on {
                    exprs.extend([l, r]);
                }
            }
            RelationOp::Reduce { input, spec, reducers } => {
                out.push(*input);
                exprs.extend(&spec.keys);
                exprs.extend(&spec.sort_by);
                exprs.extend(reducers);
            }
            RelationOp::FilterRetractions { input } => out.push(*input),
        }
        for expr in exprs {
            for c in expr.all_column_refs() {
                if let Some(id) = innermost_relation(&c.table) {
                    out.push(id);
                }
            }
        }
        out.sort();
        out.dedup();
        out
    }
}

pub(crate) fn innermost_relation(table: &TableRef) -> Option<RelationId> {
    match table {
        TableRef::Relation(id) => Some(*id),
        TableRef::Indexed { table, .. } => innermost_relation(table),
        _ => None,
    }
}

impl GraphInner {
    pub fn relation(&self, id: RelationId) -> PlanResult<&RelationNode> {
        self.relations
            .get(id.raw() as usize)
            .ok_or_else(|| PlanError::Internal(format!("dangling relation id {id}")))
    }

    pub fn add_relation(
        &mut self,
        columns: Vec<String>,
        universe: UniverseId,
        op: RelationOp,
    ) -> RelationId {
        let id = RelationId::new(self.relations.len() as u64);
        self.relations.push(RelationNode { columns, universe, op });
        id
    }

    pub fn universe_of(&self, id: RelationId) -> PlanResult<UniverseId> {
        Ok(self.relation(id)?.universe)
    }

    pub fn universes_equal(&self, a: RelationId, b: RelationId) -> PlanResult<bool> {
        Ok(self.universes.are_equal(self.universe_of(a)?, self.universe_of(b)?))
    }

    fn check_column(&self, id: RelationId, name: &str) -> PlanResult<()> {
        if self.relation(id)?.columns.iter().any(|c| c == name) {
            Ok(())
        } else {
            Err(PlanError::UnknownColumn { relation: id, column: name.to_string() })
        }
    }

    /// Verify that every column referenced by `expr` exists and that no
    /// placeholder is left unresolved.
    pub fn check_columns(&self, expr: &Expr) -> PlanResult<()> {
        for c in expr.all_column_refs() {
            match &c.table {
                TableRef::Relation(id) => self.check_column(*id, &c.name)?,
                TableRef::Indexed { table, .. } => match table.as_ref() {
                    TableRef::Relation(id) => self.check_column(*id, &c.name)?,
                    _ => {
                        return Err(PlanError::UnresolvedPlaceholder { expression: c.to_string() });
                    }
                },
                _ => return Err(PlanError::UnresolvedPlaceholder { expression: c.to_string() }),
            }
        }
        Ok(())
    }
}

impl Graph {
    pub(crate) fn lock(&self) -> PlanResult<MutexGuard<'_, GraphInner>> {
        self.inner
            .lock()
            .map_err(|_| PlanError::Internal("graph lock poisoned".to_string()))
    }

    pub(crate) fn handle(&self, id: RelationId) -> Relation {
        Relation { graph: self.clone(), id }
    }

    /// Whether two handles refer to the same graph.
    pub fn same_graph(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Create a source relation; rows are keyed by their position.
    pub fn table(&self, columns: &[&str], rows: Vec<Vec<Value>>) -> PlanResult<Relation> {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, values)| Row { key: Pointer(i as u64), values, diff: 1 })
            .collect();
        self.source(columns, rows)
    }

    /// Create a source relation with explicit row keys.
    ///
    /// Rows sharing a key must carry the same values; such duplicates add up
    /// their multiplicities.
    pub fn table_keyed(
        &self,
        columns: &[&str],
        rows: Vec<(Pointer, Vec<Value>)>,
    ) -> PlanResult<Relation> {
        let rows = rows
            .into_iter()
            .map(|(key, values)| Row { key, values, diff: 1 })
            .collect();
        self.source(columns, rows)
    }

    /// Create a source relation whose rows carry multiplicities. A negative
    /// multiplicity is a retraction.
    pub fn table_with_diffs(
        &self,
        columns: &[&str],
        rows: Vec<(Vec<Value>, i64)>,
    ) -> PlanResult<Relation> {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, (values, diff))| Row { key: Pointer(i as u64), values, diff })
            .collect();
        self.source(columns, rows)
    }

    fn source(&self, columns: &[&str], rows: Vec<Row>) -> PlanResult<Relation> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        for (i, c) in columns.iter().enumerate() {
            if columns[..i].contains(c) {
                return Err(PlanError::MalformedRows { reason: format!("duplicate column {c:?}") });
            }
        }
        if let Some(bad) = rows.iter().find(|r| r.values.len() != columns.len()) {
            return Err(PlanError::MalformedRows {
                reason: format!(
                    "row {} has {} values, expected {}",
                    bad.key,
                    bad.values.len(),
                    columns.len()
                ),
            });
        }
        let mut seen: HashMap<Pointer, &[Value]> = HashMap::with_capacity(rows.len());
        for row in &rows {
            match seen.get(&row.key) {
                Some(values) if *values != row.values.as_slice() => {
                    return Err(PlanError::MalformedRows {
                        reason: format!("row key {} carries two different value lists", row.key),
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(row.key, &row.values);
                }
            }
        }
        let mut g = self.lock()?;
        let universe = g.universes.fresh();
        let n = rows.len();
        let id = g.add_relation(columns, universe, RelationOp::Source { rows: Arc::new(rows) });
        debug!(relation = id.raw(), rows = n, "created source relation");
        Ok(self.handle(id))
    }

    /// Record that two relations have the same key set.
    pub fn register_universes_equal(&self, a: &Relation, b: &Relation) -> PlanResult<()> {
        let mut g = self.lock()?;
        let (ua, ub) = (g.universe_of(a.id)?, g.universe_of(b.id)?);
        g.universes.register_as_equal(ua, ub);
        Ok(())
    }

    /// Whether two relations are known to share a key set.
    pub fn universes_equal(&self, a: &Relation, b: &Relation) -> PlanResult<bool> {
        self.lock()?.universes_equal(a.id, b.id)
    }

    /// Number of distinct grouped views created so far.
    pub fn cached_view_count(&self) -> PlanResult<usize> {
        Ok(self.lock()?.views.len())
    }

    /// Number of relations in the graph.
    pub fn relation_count(&self) -> PlanResult<usize> {
        Ok(self.lock()?.relations.len())
    }

    pub(crate) fn snapshot(&self) -> PlanResult<Vec<RelationNode>> {
        Ok(self.lock()?.relations.clone())
    }
}
