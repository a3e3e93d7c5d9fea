//! Splitting reduce outputs into row-wise and aggregate parts.
//!
//! A reduce output such as `sum(this.price * this.qty) / count()` mixes three
//! kinds of computation: row-wise work before aggregation (`price * qty`),
//! aggregation itself (`sum`, `count`), and arithmetic over the aggregated
//! values (`/`). The splitter rewrites each output tree so that:
//!
//! - every reducer argument becomes a named **pre-reduction** expression,
//!   evaluated row-wise on the grouped relation;
//! - every reducer becomes a named **reducer** expression over those names;
//! - the output itself only combines reducer names, and is evaluated by the
//!   final projection over the aggregated relation.
//!
//! A bare column outside any reducer is routed through an `any` reducer: the
//! scoping check guarantees it is a grouping key, so every row of a group
//! agrees on it.

use crate::expr::{ColumnRef, Expr, TableRef, this};
use crate::reducers::ReducerKind;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// The splitter's output for one `reduce` call.
///
/// Names are generated from two counters local to the call (`_dep_<n>` for
/// pre-reduction expressions, `_red_<n>` for reducers), so the same outputs
/// always produce the same plan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerPlan {
    /// Row-wise expressions over the grouped relation.
    pub pre_reduction: Vec<(String, Expr)>,
    /// Reducers over `this.<pre-reduction name>`.
    pub reducers: Vec<(String, Expr)>,
    /// Final outputs over `this.<reducer name>`.
    pub outputs: Vec<(String, Expr)>,
}

impl ReducerPlan {
    /// Pre-reduction expression registered under `name`.
    pub fn pre_reduction_expr(&self, name: &str) -> Option<&Expr> {
        lookup(&self.pre_reduction, name)
    }

    /// Reducer registered under `name`.
    pub fn reducer_expr(&self, name: &str) -> Option<&Expr> {
        lookup(&self.reducers, name)
    }

    /// Final expression of output `name`.
    pub fn output_expr(&self, name: &str) -> Option<&Expr> {
        lookup(&self.outputs, name)
    }

    /// Pre-reduction names a reducer reads.
    pub fn reducer_dependencies(&self, name: &str) -> Vec<&str> {
        self.reducer_expr(name)
            .map(|e| {
                e.all_column_refs()
                    .into_iter()
                    .filter(|c| c.table == TableRef::This)
                    .map(|c| c.name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn lookup<'a>(entries: &'a [(String, Expr)], name: &str) -> Option<&'a Expr> {
    entries.iter().find(|(n, _)| n == name).map(|(_, e)| e)
}

/// Registration state shared by all outputs of one `reduce` call.
#[derive(Default)]
pub(crate) struct SplitState {
    plan: ReducerPlan,
    dependencies: usize,
    reducers: usize,
}

impl SplitState {
    /// Register a row-wise expression, reusing the name of an identical one.
    fn add_dependency(&mut self, expr: Expr) -> Expr {
        if let Some((name, _)) = self.plan.pre_reduction.iter().find(|(_, e)| *e == expr) {
            return this(name.clone());
        }
        let name = format!("_dep_{}", self.dependencies);
        self.dependencies += 1;
        trace!(%name, %expr, "pre-reduction dependency");
        self.plan.pre_reduction.push((name.clone(), expr));
        this(name)
    }

    /// Register a reducer, reusing the name of an identical one.
    fn add_reducer(&mut self, expr: Expr) -> Expr {
        if let Some((name, _)) = self.plan.reducers.iter().find(|(_, e)| *e == expr) {
            return this(name.clone());
        }
        let name = format!("_red_{}", self.reducers);
        self.reducers += 1;
        trace!(%name, %expr, "reducer");
        self.plan.reducers.push((name.clone(), expr));
        this(name)
    }

    /// Split one output and record it under `name`.
    pub fn add_output(&mut self, name: String, expr: &Expr) {
        let rewritten = split(expr, self);
        self.plan.outputs.push((name, rewritten));
    }

    pub fn finish(self) -> ReducerPlan {
        self.plan
    }
}

/// Rewrite `expr`, registering its row-wise and aggregate parts in `state`.
pub(crate) fn split(expr: &Expr, state: &mut SplitState) -> Expr {
    match expr {
        Expr::Column(ColumnRef { table: TableRef::Indexed { table, key }, name }) => {
            // Descend into the lookup key; it may itself aggregate.
            let key = split(key, state);
            Expr::Column(ColumnRef {
                table: TableRef::Indexed { table: table.clone(), key: Box::new(key) },
                name: name.clone(),
            })
        }
        Expr::Column(_) => {
            let dep = state.add_dependency(expr.clone());
            state.add_reducer(Expr::Reducer { kind: ReducerKind::Any, args: vec![dep] })
        }
        Expr::Count => state.add_reducer(Expr::Count),
        Expr::Reducer { kind, args } => {
            let args = args.iter().map(|a| state.add_dependency(a.clone())).collect();
            state.add_reducer(Expr::Reducer { kind: *kind, args })
        }
        Expr::Apply { op, args } => Expr::Apply {
            op: *op,
            args: args.iter().map(|a| split(a, state)).collect(),
        },
        Expr::Literal(_) => expr.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lit;
    use crate::ids::RelationId;
    use crate::reducers::{argmax, count, sum};

    fn base() -> TableRef {
        TableRef::Relation(RelationId::new(0))
    }

    fn plan_of(outputs: &[(&str, Expr)]) -> ReducerPlan {
        let mut state = SplitState::default();
        for (name, e) in outputs {
            state.add_output(name.to_string(), e);
        }
        state.finish()
    }

    #[test]
    fn key_column_goes_through_identity_reducer() {
        let plan = plan_of(&[("owner", base().col("owner"))]);
        assert_eq!(plan.pre_reduction, vec![("_dep_0".to_string(), base().col("owner"))]);
        assert_eq!(
            plan.reducers,
            vec![(
                "_red_0".to_string(),
                Expr::Reducer { kind: ReducerKind::Any, args: vec![this("_dep_0")] }
            )]
        );
        assert_eq!(plan.outputs, vec![("owner".to_string(), this("_red_0"))]);
    }

    #[test]
    fn count_has_no_dependency() {
        let plan = plan_of(&[("n", count())]);
        assert!(plan.pre_reduction.is_empty());
        assert_eq!(plan.reducers, vec![("_red_0".to_string(), Expr::Count)]);
        assert!(plan.reducer_dependencies("_red_0").is_empty());
    }

    #[test]
    fn arithmetic_above_and_below_reducers() {
        let e = sum(base().col("a") * lit(2)) + sum(base().col("b"));
        let plan = plan_of(&[("s", e)]);
        assert_eq!(
            plan.pre_reduction,
            vec![
                ("_dep_0".to_string(), base().col("a") * lit(2)),
                ("_dep_1".to_string(), base().col("b")),
            ]
        );
        assert_eq!(plan.output_expr("s"), Some(&(this("_red_0") + this("_red_1"))));
        assert_eq!(plan.reducer_dependencies("_red_1"), vec!["_dep_1"]);
    }

    #[test]
    fn identical_reducers_share_a_name_within_a_call() {
        let plan = plan_of(&[("a", sum(base().col("x"))), ("b", sum(base().col("x")) * lit(2))]);
        assert_eq!(plan.reducers.len(), 1);
        assert_eq!(plan.output_expr("b"), Some(&(this("_red_0") * lit(2))));
    }

    #[test]
    fn indexed_lookup_keeps_its_shape() {
        let people = TableRef::Relation(RelationId::new(0));
        let e = people.clone().ix(argmax(people.col("age"))).col("name");
        let plan = plan_of(&[("oldest", e)]);
        assert_eq!(plan.output_expr("oldest"), Some(&people.ix(this("_red_0")).col("name")));
        assert_eq!(plan.pre_reduction.len(), 1);
    }
}
