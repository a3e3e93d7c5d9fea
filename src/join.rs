//! Joins and grouping over joined relations.
//!
//! [`Relation::join`] builds an inner equi-join and returns a [`JoinResult`]:
//! the joined relation together with a [`Substitution`] that rewrites
//! expressions written against the join inputs (`left.x`, `right.y`, or
//! direct references to either input) into expressions over the joined
//! relation. [`GroupedJoinView`] applies that substitution to grouping keys
//! and reduce outputs before delegating to a plain [`GroupedView`].
//!
//! The joined relation keeps every left column under its own name. A right
//! column whose name is also a left column is merged into it when the two are
//! joined on each other; otherwise both are renamed to `left_<name>` and
//! `right_<name>`.

use crate::desugar::Substitution;
use crate::error::{PlanError, PlanResult};
use crate::expr::{ColumnRef, Expr, TableRef};
use crate::graph::{JoinSide, RelationOp};
use crate::grouping::{GroupOptions, GroupedView};
use crate::ids::RelationId;
use crate::relation::{Outputs, Relation, check_rowwise_universe};
use tracing::debug;

/// Output of [`Relation::join`].
#[derive(Clone, Debug)]
pub struct JoinResult {
    relation: Relation,
    substitution: Substitution,
    left: RelationId,
    right: RelationId,
}

/// A joined relation grouped by keys written against the join inputs.
#[derive(Clone, Debug)]
pub struct GroupedJoinView {
    inner: GroupedView,
    substitution: Substitution,
}

fn joined_on_itself(on: &[(Expr, Expr)], left: RelationId, right: RelationId, name: &str) -> bool {
    on.iter().any(|(l, r)| match (l.as_column(), r.as_column()) {
        (Some(l), Some(r)) => {
            l.table == TableRef::Relation(left)
                && r.table == TableRef::Relation(right)
                && l.name == name
                && r.name == name
        }
        _ => false,
    })
}

impl Relation {
    /// Inner join with `other` on pairs of equal expressions.
    ///
    /// The first expression of each pair is evaluated on this relation, the
    /// second on `other`; `left` and `right` placeholders refer to them.
    pub fn join(
        &self,
        other: &Relation,
        on: impl IntoIterator<Item = (Expr, Expr)>,
    ) -> PlanResult<JoinResult> {
        if !self.graph.same_graph(&other.graph) {
            return Err(PlanError::Internal("relations belong to different graphs".to_string()));
        }
        if self.id == other.id {
            return Err(PlanError::InvalidJoin {
                reason: format!(
                    "{} is joined with itself; select a copy of one side first",
                    self.id
                ),
            });
        }
        let sides = Substitution::default().with_left(self.id).with_right(other.id);
        let on = on
            .into_iter()
            .map(|(l, r)| {
                let left_sides = sides.clone().with_this(self.id);
                let right_sides = sides.clone().with_this(other.id);
                Ok((left_sides.apply(&l)?, right_sides.apply(&r)?))
            })
            .collect::<PlanResult<Vec<_>>>()?;

        let mut g = self.graph.lock()?;
        let (lu, ru) = (g.universe_of(self.id)?, g.universe_of(other.id)?);
        for (l, r) in &on {
            for (e, u) in [(l, lu), (r, ru)] {
                g.check_columns(e)?;
                if e.contains_reducer() {
                    return Err(PlanError::ReducerOutsideReduce { expression: e.to_string() });
                }
                check_rowwise_universe(&g, u, e)?;
            }
        }

        let left_cols = g.relation(self.id)?.columns.clone();
        let right_cols = g.relation(other.id)?.columns.clone();
        let merged: Vec<&String> = right_cols
            .iter()
            .filter(|n| left_cols.contains(n) && joined_on_itself(&on, self.id, other.id, n))
            .collect();
        let clashes = |n: &String| {
            !merged.contains(&n) && left_cols.contains(n) && right_cols.contains(n)
        };

        let mut columns = Vec::new();
        let mut names: Vec<(RelationId, String, String)> = Vec::new();
        for n in &left_cols {
            let out = if clashes(n) { format!("left_{n}") } else { n.clone() };
            columns.push((JoinSide::Left, n.clone()));
            names.push((self.id, n.clone(), out));
        }
        for n in &right_cols {
            if merged.contains(&n) {
                names.push((other.id, n.clone(), n.clone()));
                continue;
            }
            let out = if clashes(n) { format!("right_{n}") } else { n.clone() };
            columns.push((JoinSide::Right, n.clone()));
            names.push((other.id, n.clone(), out));
        }

        let universe = g.universes.fresh();
        let out_names: Vec<String> = names
            .iter()
            .filter(|(rel, n, _)| *rel == self.id || !merged.contains(&n))
            .map(|(_, _, out)| out.clone())
            .collect();
        let width = out_names.len();
        let id = g.add_relation(
            out_names,
            universe,
            RelationOp::Join { left: self.id, right: other.id, on, columns },
        );
        debug!(
            relation = id.raw(),
            left = self.id.raw(),
            right = other.id.raw(),
            columns = width,
            "planned join"
        );

        let mut substitution = sides.with_this(id);
        for (rel, n, out) in names {
            let joined = ColumnRef { table: TableRef::Relation(id), name: out };
            substitution = substitution.with_column(rel, n, joined);
        }
        Ok(JoinResult {
            relation: self.graph.handle(id),
            substitution,
            left: self.id,
            right: other.id,
        })
    }
}

impl JoinResult {
    /// The joined relation.
    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    /// The left join input.
    pub fn left(&self) -> RelationId {
        self.left
    }

    /// The right join input.
    pub fn right(&self) -> RelationId {
        self.right
    }

    /// Rewrite an expression over the join inputs into one over the joined relation.
    pub fn substitute(&self, expr: &Expr) -> PlanResult<Expr> {
        self.substitution.apply(expr)
    }

    /// Row-wise projection of the joined relation; outputs may be written
    /// against either input.
    pub fn select(&self, outputs: Outputs) -> PlanResult<Relation> {
        let outputs = outputs
            .combine()?
            .into_iter()
            .map(|(name, expr)| Ok((name, self.substitute(&expr)?)))
            .collect::<PlanResult<Outputs>>()?;
        self.relation.select(outputs)
    }

    /// Group the joined relation; see [`group_join`].
    pub fn group_by(
        &self,
        keys: impl IntoIterator<Item = Expr>,
        identity: Option<Expr>,
    ) -> PlanResult<GroupedJoinView> {
        group_join(self, keys, identity)
    }
}

/// Group a join result by `keys` (and optionally by row identity).
pub fn group_join(
    join: &JoinResult,
    keys: impl IntoIterator<Item = Expr>,
    identity: Option<Expr>,
) -> PlanResult<GroupedJoinView> {
    let keys = keys.into_iter().map(|k| join.substitute(&k)).collect::<PlanResult<Vec<_>>>()?;
    let mut opts = GroupOptions::default();
    if let Some(identity) = identity {
        opts = opts.identity(join.substitute(&identity)?);
    }
    let inner = GroupedView::create(&join.relation, keys, opts)?;
    Ok(GroupedJoinView { inner, substitution: join.substitution.clone() })
}

impl GroupedJoinView {
    /// The underlying view over the joined relation.
    pub fn view(&self) -> &GroupedView {
        &self.inner
    }

    /// Like [`GroupedView::reduce`], with outputs written against the join inputs.
    pub fn reduce(&self, outputs: Outputs) -> PlanResult<Relation> {
        let outputs = outputs
            .combine()?
            .into_iter()
            .map(|(name, expr)| Ok((name, self.substitution.apply(&expr)?)))
            .collect::<PlanResult<Vec<_>>>()?;
        self.inner.reduce_named(outputs)
    }
}
