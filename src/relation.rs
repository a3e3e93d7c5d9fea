//! Relation handles and row-wise planning operations.
//!
//! A [`Relation`] is a lightweight handle (graph + id) to an immutable relation
//! in the planning [`Graph`]. Operations never modify a relation; they add a
//! new one to the graph and return its handle. Nothing is evaluated until one
//! of the `collect_*` methods runs the [`Runner`].
//!
//! Every relation owns exactly one universe. `select` keeps the universe of
//! its input, `filter` allocates a fresh one, and `with_universe_of` adopts
//! the universe of another relation.

use crate::desugar::Substitution;
use crate::error::{PlanError, PlanResult};
use crate::expr::{Expr, TableRef};
use crate::graph::{Graph, GraphInner, RelationOp};
use crate::ids::{RelationId, UniverseId};
use crate::runner::{ExecMode, Row, Runner};
use std::fmt;

/// Handle to a relation of a [`Graph`].
#[derive(Clone)]
pub struct Relation {
    pub(crate) graph: Graph,
    pub(crate) id: RelationId,
}

/// Output columns of a `select` or `reduce`.
///
/// Positional entries must be column references and are named after the
/// column; named entries can be arbitrary expressions.
#[derive(Clone, Debug, Default)]
pub struct Outputs {
    entries: Vec<(Option<String>, Expr)>,
}

impl Outputs {
    /// No outputs yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional output, named after the referenced column.
    pub fn column(mut self, expr: Expr) -> Self {
        self.entries.push((None, expr));
        self
    }

    /// Output named `name`, computed by `expr`.
    pub fn named(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.entries.push((Some(name.into()), expr));
        self
    }

    /// Number of outputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no output was added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge positional and named entries into one ordered name → expression
    /// list, rejecting duplicate names.
    pub fn combine(self) -> PlanResult<Vec<(String, Expr)>> {
        let mut out: Vec<(String, Expr)> = Vec::with_capacity(self.entries.len());
        for (name, expr) in self.entries {
            let name = match name {
                Some(name) => name,
                None => match expr.as_column() {
                    Some(c) => c.name.clone(),
                    None => {
                        return Err(PlanError::PositionalNotColumn {
                            expression: expr.to_string(),
                        });
                    }
                },
            };
            if out.iter().any(|(n, _)| *n == name) {
                return Err(PlanError::DuplicateOutputName { name });
            }
            out.push((name, expr));
        }
        Ok(out)
    }
}

impl<S: Into<String>> FromIterator<(S, Expr)> for Outputs {
    fn from_iter<I: IntoIterator<Item = (S, Expr)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().map(|(n, e)| (Some(n.into()), e)).collect() }
    }
}

/// Reject reads from relations whose key set is not the one of `universe`.
pub(crate) fn check_rowwise_universe(
    g: &GraphInner,
    universe: UniverseId,
    expr: &Expr,
) -> PlanResult<()> {
    for c in expr.column_refs_rowwise() {
        if let TableRef::Relation(id) = &c.table {
            if !g.universes.are_equal(universe, g.universe_of(*id)?) {
                return Err(PlanError::universe_mismatch(c));
            }
        }
    }
    Ok(())
}

/// Add a projection of `input` to the graph. Expressions must already be
/// free of placeholders.
pub(crate) fn add_select(
    g: &mut GraphInner,
    input: RelationId,
    outputs: Vec<(String, Expr)>,
) -> PlanResult<RelationId> {
    let universe = g.universe_of(input)?;
    for (_, expr) in &outputs {
        g.check_columns(expr)?;
        if expr.contains_reducer() {
            return Err(PlanError::ReducerOutsideReduce { expression: expr.to_string() });
        }
        check_rowwise_universe(g, universe, expr)?;
    }
    let (columns, exprs) = outputs.into_iter().unzip();
    Ok(g.add_relation(columns, universe, RelationOp::Select { input, exprs }))
}

/// Add a relation holding the rows of `input` that are not pure retractions.
pub(crate) fn add_retraction_filter(
    g: &mut GraphInner,
    input: RelationId,
) -> PlanResult<RelationId> {
    let node = g.relation(input)?;
    let (columns, universe) = (node.columns.clone(), node.universe);
    Ok(g.add_relation(columns, universe, RelationOp::FilterRetractions { input }))
}

impl Relation {
    /// Id of this relation in its graph.
    pub fn id(&self) -> RelationId {
        self.id
    }

    /// The graph this relation belongs to.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// A table reference to this relation, for building expressions.
    pub fn table_ref(&self) -> TableRef {
        TableRef::Relation(self.id)
    }

    /// Reference a column of this relation.
    pub fn col(&self, name: impl Into<String>) -> Expr {
        self.table_ref().col(name)
    }

    /// Indexed lookup: `self.ix(key).col(name)` reads `name` from the row of
    /// this relation whose key is the value of `key`.
    pub fn ix(&self, key: Expr) -> TableRef {
        self.table_ref().ix(key)
    }

    /// Declared column names, in order.
    pub fn column_names(&self) -> PlanResult<Vec<String>> {
        Ok(self.graph.lock()?.relation(self.id)?.columns.clone())
    }

    /// References to every declared column, in order.
    pub fn columns(&self) -> PlanResult<Vec<Expr>> {
        Ok(self.column_names()?.into_iter().map(|n| self.col(n)).collect())
    }

    /// The universe (key-set identity) of this relation.
    pub fn universe(&self) -> PlanResult<UniverseId> {
        self.graph.lock()?.universe_of(self.id)
    }

    /// Row-wise projection. `this` refers to this relation; columns of other
    /// relations may be read when their universe is equal to this one's.
    pub fn select(&self, outputs: Outputs) -> PlanResult<Relation> {
        let outputs = outputs.combine()?;
        let subs = Substitution::this(self.id);
        let outputs = outputs
            .into_iter()
            .map(|(name, expr)| Ok((name, subs.apply(&expr)?)))
            .collect::<PlanResult<Vec<_>>>()?;
        let mut g = self.graph.lock()?;
        let id = add_select(&mut g, self.id, outputs)?;
        Ok(self.graph.handle(id))
    }

    /// Keep the rows for which `predicate` is true. The result has a new universe.
    pub fn filter(&self, predicate: Expr) -> PlanResult<Relation> {
        let predicate = Substitution::this(self.id).apply(&predicate)?;
        let mut g = self.graph.lock()?;
        let own = g.universe_of(self.id)?;
        g.check_columns(&predicate)?;
        if predicate.contains_reducer() {
            return Err(PlanError::ReducerOutsideReduce { expression: predicate.to_string() });
        }
        check_rowwise_universe(&g, own, &predicate)?;
        let columns = g.relation(self.id)?.columns.clone();
        let universe = g.universes.fresh();
        let op = RelationOp::Filter { input: self.id, predicate };
        let id = g.add_relation(columns, universe, op);
        Ok(self.graph.handle(id))
    }

    /// The same rows, declared to have the key set of `other`.
    ///
    /// This is the explicit universe-unification operation; the runner
    /// verifies the claim when the relation is materialized.
    pub fn with_universe_of(&self, other: &Relation) -> PlanResult<Relation> {
        if !self.graph.same_graph(&other.graph) {
            return Err(PlanError::Internal("relations belong to different graphs".to_string()));
        }
        let mut g = self.graph.lock()?;
        let columns = g.relation(self.id)?.columns.clone();
        let universe = g.universe_of(other.id)?;
        let id = g.add_relation(
            columns,
            universe,
            RelationOp::WithUniverseOf { input: self.id, reference: other.id },
        );
        Ok(self.graph.handle(id))
    }

    /// Materialize on the calling thread.
    pub fn collect_seq(&self) -> anyhow::Result<Vec<Row>> {
        let r = Runner { mode: ExecMode::Sequential, ..Default::default() };
        r.run_collect(self)
    }

    /// Materialize in parallel on Rayon; `None` picks the runner defaults.
    pub fn collect_par(
        &self,
        threads: Option<usize>,
        partitions: Option<usize>,
    ) -> anyhow::Result<Vec<Row>> {
        let r = Runner { mode: ExecMode::Parallel { threads, partitions }, ..Default::default() };
        r.run_collect(self)
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.graph.same_graph(&other.graph)
    }
}

impl Eq for Relation {}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relation({})", self.id.raw())
    }
}
