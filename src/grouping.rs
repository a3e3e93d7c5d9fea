//! Grouped views and the reduce pipeline.
//!
//! [`GroupedView::create`] normalizes a grouping request and returns the
//! cached view for it, constructing one on first use. [`GroupedView::reduce`]
//! validates a set of outputs, splits them with the [splitter](crate::splitter)
//! and adds the resulting chain of relations to the graph:
//!
//! ```text
//! base ──select(pre-reduction)──▶ prepared ──reduce──▶ reduced
//!      ──[filter retractions]──▶ ──select(outputs)──▶ result
//! ```
//!
//! All validation happens before the first relation is added.

use crate::desugar::Substitution;
use crate::error::{PlanError, PlanResult};
use crate::expr::{Expr, TableRef};
use crate::graph::{Graph, GraphInner, RelationOp, ViewKey, innermost_relation};
use crate::ids::{RelationId, UniverseId, ViewId};
use crate::relation::{
    Outputs, Relation, add_retraction_filter, add_select, check_rowwise_universe,
};
use crate::splitter::{ReducerPlan, SplitState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Normalized grouping request.
///
/// `keys` are column references of the base relation, in first-seen order
/// and without duplicates. Empty keys aggregate the whole relation into a
/// single row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupingSpec {
    pub keys: Vec<Expr>,
    /// Key each result row by the value of its single grouping key, which
    /// must be a row pointer.
    pub set_identity: bool,
    /// Ordering of rows inside a group, seen by order-sensitive reducers.
    pub sort_by: Option<Expr>,
    /// Drop result rows that only retract earlier results.
    pub suppress_retractions: bool,
}

/// Options for [`group`] and [`Relation::group_by_with`].
#[derive(Clone, Debug, Default)]
pub struct GroupOptions {
    pub identity: Option<Expr>,
    pub set_identity: bool,
    pub sort_by: Option<Expr>,
    pub suppress_retractions: bool,
}

impl GroupOptions {
    /// Default options: no identity, no ordering, retractions kept.
    pub fn new() -> Self {
        Self::default()
    }

    /// Group by row identity: `identity` becomes the grouping key and result
    /// rows take its value as their key.
    pub fn identity(mut self, identity: Expr) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Key result rows by the single grouping key, which must evaluate to a
    /// row pointer.
    pub fn set_identity(mut self, yes: bool) -> Self {
        self.set_identity = yes;
        self
    }

    /// Order rows within each group by `expr`.
    pub fn sort_by(mut self, expr: Expr) -> Self {
        self.sort_by = Some(expr);
        self
    }

    /// Drop result rows that only retract earlier results.
    pub fn suppress_retractions(mut self, yes: bool) -> Self {
        self.suppress_retractions = yes;
        self
    }
}

/// Shared state of a cached grouped view.
#[derive(Debug)]
pub(crate) struct GroupedViewState {
    pub id: ViewId,
    pub base: RelationId,
    /// Keys, identity flag and sort order; `suppress_retractions` is carried
    /// by each handle instead.
    pub spec: GroupingSpec,
    pub substitution: Substitution,
    pub universe: UniverseId,
    pub dependencies: Vec<RelationId>,
}

/// A relation grouped by a set of keys, ready to be reduced.
#[derive(Clone)]
pub struct GroupedView {
    graph: Graph,
    state: Arc<GroupedViewState>,
    suppress_retractions: bool,
}

/// Group `relation` by `keys`.
pub fn group(
    relation: &Relation,
    keys: impl IntoIterator<Item = Expr>,
    opts: GroupOptions,
) -> PlanResult<GroupedView> {
    GroupedView::create(relation, keys.into_iter().collect(), opts)
}

impl Relation {
    /// Group by `keys` with default options.
    pub fn group_by(&self, keys: impl IntoIterator<Item = Expr>) -> PlanResult<GroupedView> {
        group(self, keys, GroupOptions::default())
    }

    /// Group by `keys` with explicit [`GroupOptions`].
    pub fn group_by_with(
        &self,
        keys: impl IntoIterator<Item = Expr>,
        opts: GroupOptions,
    ) -> PlanResult<GroupedView> {
        group(self, keys, opts)
    }

    /// Group by a pointer column; each result row is keyed by the group's pointer.
    pub fn group_by_id(&self, identity: Expr) -> PlanResult<GroupedView> {
        group(self, [], GroupOptions::default().identity(identity))
    }
}

/// Resolve one grouping key against the base relation.
fn normalize_key(
    g: &GraphInner,
    subs: &Substitution,
    universe: UniverseId,
    key: &Expr,
) -> PlanResult<Expr> {
    let key = subs.apply(key)?;
    g.check_columns(&key)?;
    if key.contains_reducer() {
        return Err(PlanError::ReducerInGroupingKey { expression: key.to_string() });
    }
    match key.as_column() {
        Some(c) if !c.table.is_indexed() => {}
        _ => {
            return Err(PlanError::InvalidGrouping {
                reason: format!("grouping key {key} is not a column reference"),
            });
        }
    }
    check_rowwise_universe(g, universe, &key)?;
    Ok(key)
}

fn normalize_sort_by(
    g: &GraphInner,
    subs: &Substitution,
    universe: UniverseId,
    expr: &Expr,
) -> PlanResult<Expr> {
    let expr = subs.apply(expr)?;
    g.check_columns(&expr)?;
    if expr.contains_reducer() {
        return Err(PlanError::ReducerOutsideReduce { expression: expr.to_string() });
    }
    check_rowwise_universe(g, universe, &expr)?;
    Ok(expr)
}

/// Fold an identity request into the key list.
fn apply_identity(mut keys: Vec<Expr>, identity: Option<Expr>) -> PlanResult<Vec<Expr>> {
    let Some(identity) = identity else {
        return Ok(keys);
    };
    match keys.as_slice() {
        [] => keys.push(identity),
        [key] if *key == identity => {}
        [key] => {
            return Err(PlanError::InvalidGrouping {
                reason: format!("grouping key {key} differs from the identity {identity}"),
            });
        }
        _ => {
            return Err(PlanError::InvalidGrouping {
                reason: format!(
                    "cannot group by {} keys and an identity at the same time",
                    keys.len()
                ),
            });
        }
    }
    Ok(keys)
}

impl GroupedView {
    /// Return the grouped view of `relation` by `keys`, creating it on first use.
    ///
    /// Requests that normalize to the same relation, keys, identity flag and
    /// sort order share one view; the handles compare equal under
    /// [`ptr_eq`](Self::ptr_eq).
    pub fn create(
        relation: &Relation,
        keys: Vec<Expr>,
        opts: GroupOptions,
    ) -> PlanResult<GroupedView> {
        let subs = Substitution::this(relation.id);
        let set_identity = opts.set_identity || opts.identity.is_some();

        let mut g = relation.graph.lock()?;
        let base_universe = g.universe_of(relation.id)?;

        let identity = opts
            .identity
            .as_ref()
            .map(|e| normalize_key(&g, &subs, base_universe, e))
            .transpose()?;
        let mut normalized: Vec<Expr> = Vec::with_capacity(keys.len());
        for key in &keys {
            let key = normalize_key(&g, &subs, base_universe, key)?;
            if !normalized.contains(&key) {
                normalized.push(key);
            }
        }
        let keys = apply_identity(normalized, identity)?;
        if set_identity && keys.len() != 1 {
            return Err(PlanError::InvalidGrouping {
                reason: format!("grouping by identity needs exactly one key, got {}", keys.len()),
            });
        }
        let sort_by = opts
            .sort_by
            .as_ref()
            .map(|e| normalize_sort_by(&g, &subs, base_universe, e))
            .transpose()?;

        let cache_key = ViewKey {
            relation: relation.id,
            keys: keys.clone(),
            set_identity,
            sort_by: sort_by.clone(),
        };
        if let Some(&id) = g.view_cache.get(&cache_key) {
            let state = g
                .views
                .get(id.raw() as usize)
                .cloned()
                .ok_or_else(|| PlanError::Internal(format!("dangling view id {}", id.raw())))?;
            debug!(
                view = id.raw(),
                relation = relation.id.raw(),
                keys = keys.len(),
                "grouped view cache hit"
            );
            return Ok(GroupedView {
                graph: relation.graph.clone(),
                state,
                suppress_retractions: opts.suppress_retractions,
            });
        }

        let mut dependencies = vec![relation.id];
        for e in keys.iter().chain(&sort_by) {
            let refs = e.all_column_refs();
            dependencies.extend(refs.into_iter().filter_map(|c| innermost_relation(&c.table)));
        }
        dependencies.sort();
        dependencies.dedup();

        let id = ViewId::new(g.views.len() as u64);
        let universe = g.universes.fresh();
        let state = Arc::new(GroupedViewState {
            id,
            base: relation.id,
            spec: GroupingSpec { keys, set_identity, sort_by, suppress_retractions: false },
            substitution: subs,
            universe,
            dependencies,
        });
        g.views.push(state.clone());
        g.view_cache.insert(cache_key, id);
        debug!(
            view = id.raw(),
            relation = relation.id.raw(),
            keys = state.spec.keys.len(),
            "grouped view cache miss"
        );

        Ok(GroupedView {
            graph: relation.graph.clone(),
            state,
            suppress_retractions: opts.suppress_retractions,
        })
    }

    /// Whether two handles share the same cached view.
    pub fn ptr_eq(&self, other: &GroupedView) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Id of the cached view; equal for handles that share a view.
    pub fn id(&self) -> ViewId {
        self.state.id
    }

    /// The relation being grouped.
    pub fn base(&self) -> Relation {
        self.graph.handle(self.state.base)
    }

    /// Normalized grouping keys.
    pub fn grouping_keys(&self) -> &[Expr] {
        &self.state.spec.keys
    }

    /// The grouping spec, including this handle's retraction flag.
    pub fn spec(&self) -> GroupingSpec {
        GroupingSpec { suppress_retractions: self.suppress_retractions, ..self.state.spec.clone() }
    }

    /// Relations the view reads: the base and anything its keys or sort
    /// order reference.
    pub fn dependencies(&self) -> &[RelationId] {
        &self.state.dependencies
    }

    /// Universe shared by every reduction of this view.
    pub fn universe(&self) -> UniverseId {
        self.state.universe
    }

    /// Columns of the grouped relation.
    pub fn column_names(&self) -> PlanResult<Vec<String>> {
        self.base().column_names()
    }

    /// Reference a column of the grouped relation.
    pub fn col(&self, name: &str) -> PlanResult<Expr> {
        let g = self.graph.lock()?;
        let expr = TableRef::Relation(self.state.base).col(name);
        g.check_columns(&expr)?;
        Ok(expr)
    }

    /// References to every column of the grouped relation.
    pub fn columns(&self) -> PlanResult<Vec<Expr>> {
        self.base().columns()
    }

    /// Compute `outputs` once per group.
    ///
    /// Outside reducers, outputs may only read grouping keys (or indexed
    /// lookups); inside reducers they may read any relation sharing the
    /// grouped relation's universe.
    pub fn reduce(&self, outputs: Outputs) -> PlanResult<Relation> {
        self.reduce_named(outputs.combine()?)
    }

    /// Validate and split `outputs` without adding anything to the graph.
    pub fn plan(&self, outputs: Outputs) -> PlanResult<ReducerPlan> {
        let outputs = self.resolve(outputs.combine()?)?;
        let g = self.graph.lock()?;
        self.validate(&g, &outputs)?;
        Ok(split_outputs(&outputs))
    }

    fn resolve(&self, outputs: Vec<(String, Expr)>) -> PlanResult<Vec<(String, Expr)>> {
        outputs
            .into_iter()
            .map(|(name, expr)| Ok((name, self.state.substitution.apply(&expr)?)))
            .collect()
    }

    pub(crate) fn reduce_named(&self, outputs: Vec<(String, Expr)>) -> PlanResult<Relation> {
        let outputs = self.resolve(outputs)?;
        let mut g = self.graph.lock()?;
        self.validate(&g, &outputs)?;
        let plan = split_outputs(&outputs);
        debug!(
            view = self.state.id.raw(),
            pre_reduction = plan.pre_reduction.len(),
            reducers = plan.reducers.len(),
            outputs = plan.outputs.len(),
            "planned reduce"
        );

        let id = self.build_or_roll_back(&mut g, plan)?;
        Ok(self.graph.handle(id))
    }

    /// Run [`build`](Self::build); on failure, drop every relation and
    /// universe it allocated.
    fn build_or_roll_back(&self, g: &mut GraphInner, plan: ReducerPlan) -> PlanResult<RelationId> {
        let (relations, universes) = (g.relations.len(), g.universes.len());
        let result = self.build(g, plan);
        if result.is_err() {
            g.relations.truncate(relations);
            g.universes.truncate(universes);
        }
        result
    }

    fn validate(&self, g: &GraphInner, outputs: &[(String, Expr)]) -> PlanResult<()> {
        for (_, expr) in outputs {
            g.check_columns(expr)?;
            if let Some(nested) = expr.nested_reducer() {
                return Err(PlanError::NestedReducer { expression: nested.to_string() });
            }
        }
        // Outside reducers only grouping keys are well defined per group.
        for (_, expr) in outputs {
            for c in expr.dependencies_above_reducer() {
                if !self.state.spec.keys.contains(&c.to_expr()) {
                    return Err(PlanError::scoping(c));
                }
            }
        }
        // Inside reducers every read must line up with the grouped rows.
        let base_universe = g.universe_of(self.state.base)?;
        for (_, expr) in outputs {
            for c in expr.dependencies_below_reducer() {
                if let TableRef::Relation(id) = &c.table {
                    if !g.universes.are_equal(base_universe, g.universe_of(*id)?) {
                        return Err(PlanError::universe_mismatch(c));
                    }
                }
            }
        }
        Ok(())
    }

    fn build(&self, g: &mut GraphInner, plan: ReducerPlan) -> PlanResult<RelationId> {
        let prepared = add_select(g, self.state.base, plan.pre_reduction)?;

        let to_prepared = Substitution::this(prepared);
        let (names, reducers): (Vec<String>, Vec<Expr>) = plan
            .reducers
            .into_iter()
            .map(|(name, expr)| Ok((name, to_prepared.apply(&expr)?)))
            .collect::<PlanResult<Vec<_>>>()?
            .into_iter()
            .unzip();
        for r in &reducers {
            g.check_columns(r)?;
        }

        let universe = g.universes.fresh();
        let mut reduced = g.add_relation(
            names,
            universe,
            RelationOp::Reduce { input: prepared, spec: self.spec(), reducers },
        );
        if self.suppress_retractions {
            reduced = add_retraction_filter(g, reduced)?;
        }

        let to_reduced = Substitution::this(reduced);
        let outputs = plan
            .outputs
            .into_iter()
            .map(|(name, expr)| Ok((name, to_reduced.apply(&expr)?)))
            .collect::<PlanResult<Vec<_>>>()?;
        let result = add_select(g, reduced, outputs)?;

        // Merged last, so a failed build leaves no equality behind.
        g.universes.register_as_equal(universe, self.state.universe);
        Ok(result)
    }
}

fn split_outputs(outputs: &[(String, Expr)]) -> ReducerPlan {
    let mut state = SplitState::default();
    for (name, expr) in outputs {
        state.add_output(name.clone(), expr);
    }
    state.finish()
}

impl fmt::Debug for GroupedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupedView")
            .field("id", &self.state.id.raw())
            .field("base", &self.state.base.raw())
            .field("keys", &self.state.spec.keys)
            .field("suppress_retractions", &self.suppress_retractions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::this;
    use crate::reducers::sum;
    use crate::testing::{PETS_COLUMNS, pets_rows};

    #[test]
    fn failed_build_releases_relations_and_universes() -> anyhow::Result<()> {
        let g = Graph::default();
        let pets = g.table(PETS_COLUMNS, pets_rows())?;
        let view = pets.group_by([this("owner")])?;
        let plan = ReducerPlan {
            pre_reduction: vec![("_dep_0".to_string(), pets.col("age"))],
            reducers: vec![("_red_0".to_string(), sum(this("_dep_0")))],
            outputs: vec![("total".to_string(), this("missing"))],
        };

        let mut inner = g.lock()?;
        let (relations, universes) = (inner.relations.len(), inner.universes.len());
        let err = view.build_or_roll_back(&mut inner, plan).unwrap_err();
        assert!(matches!(err, PlanError::UnknownColumn { .. }));
        assert_eq!(inner.relations.len(), relations);
        assert_eq!(inner.universes.len(), universes);
        drop(inner);

        let totals = view.reduce(Outputs::new().named("total", sum(this("age"))))?;
        assert_eq!(g.relation_count()?, relations + 3);
        assert_eq!(totals.collect_seq()?.len(), 2);
        Ok(())
    }
}
