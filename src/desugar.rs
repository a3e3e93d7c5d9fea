//! Placeholder and column substitution.
//!
//! Planning rewrites expressions in two ways before they reach a relation:
//! placeholders (`this`, `left`, `right`) are bound to concrete relations, and
//! inside a join context references to the join inputs are redirected to the
//! columns of the joined relation.

use crate::error::{PlanError, PlanResult};
use crate::expr::{ColumnRef, Expr, TableRef};
use crate::ids::RelationId;
use std::collections::HashMap;

/// Rewrites placeholders and join-input columns into resolved references.
#[derive(Clone, Debug, Default)]
pub struct Substitution {
    this: Option<RelationId>,
    left: Option<RelationId>,
    right: Option<RelationId>,
    columns: HashMap<(RelationId, String), ColumnRef>,
}

impl Substitution {
    /// Bind `this` to `relation`.
    pub fn this(relation: RelationId) -> Self {
        Self { this: Some(relation), ..Self::default() }
    }

    /// Bind `this` to `relation`.
    pub fn with_this(mut self, relation: RelationId) -> Self {
        self.this = Some(relation);
        self
    }

    /// Bind `left` to `relation`.
    pub fn with_left(mut self, relation: RelationId) -> Self {
        self.left = Some(relation);
        self
    }

    /// Bind `right` to `relation`.
    pub fn with_right(mut self, relation: RelationId) -> Self {
        self.right = Some(relation);
        self
    }

    /// Redirect `from.name` to `to`.
    pub fn with_column(mut self, from: RelationId, name: impl Into<String>, to: ColumnRef) -> Self {
        self.columns.insert((from, name.into()), to);
        self
    }

    fn bind(&self, table: &TableRef) -> PlanResult<Option<RelationId>> {
        let bound = match table {
            TableRef::This => self.this,
            TableRef::Left => self.left,
            TableRef::Right => self.right,
            TableRef::Relation(id) => return Ok(Some(*id)),
            TableRef::Indexed { .. } => return Ok(None),
        };
        bound.map(Some).ok_or_else(|| PlanError::UnresolvedPlaceholder {
            expression: table.to_string(),
        })
    }

    fn column(&self, column: ColumnRef) -> PlanResult<Expr> {
        match &column.table {
            TableRef::Indexed { table, key } => {
                let table = match self.bind(table)? {
                    Some(id) => TableRef::Relation(id),
                    None => (**table).clone(),
                };
                Ok(Expr::Column(ColumnRef {
                    table: TableRef::Indexed { table: Box::new(table), key: key.clone() },
                    name: column.name,
                }))
            }
            table => {
                let Some(id) = self.bind(table)? else {
                    return Ok(Expr::Column(column));
                };
                let redirected = self.columns.get(&(id, column.name.clone())).cloned();
                Ok(Expr::Column(redirected.unwrap_or(ColumnRef {
                    table: TableRef::Relation(id),
                    name: column.name,
                })))
            }
        }
    }

    /// Rewrite every column reference of `expr`.
    pub fn apply(&self, expr: &Expr) -> PlanResult<Expr> {
        expr.try_map_columns(&mut |c| self.column(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{left, this};

    #[test]
    fn binds_placeholders_and_redirects_columns() -> PlanResult<()> {
        let (a, b, j) = (RelationId::new(0), RelationId::new(1), RelationId::new(2));
        let subs = Substitution::this(j)
            .with_left(a)
            .with_column(a, "x", ColumnRef { table: TableRef::Relation(j), name: "left_x".into() });

        assert_eq!(subs.apply(&left("x"))?, TableRef::Relation(j).col("left_x"));
        assert_eq!(subs.apply(&this("y"))?, TableRef::Relation(j).col("y"));
        assert_eq!(subs.apply(&TableRef::Relation(b).col("z"))?, TableRef::Relation(b).col("z"));
        assert!(matches!(
            subs.apply(&crate::expr::right("x")),
            Err(PlanError::UnresolvedPlaceholder { .. })
        ));
        Ok(())
    }

    #[test]
    fn indexed_target_is_bound_and_key_rewritten() -> PlanResult<()> {
        let (a, j) = (RelationId::new(0), RelationId::new(2));
        let subs = Substitution::this(j).with_column(
            a,
            "k",
            ColumnRef { table: TableRef::Relation(j), name: "k".into() },
        );
        let e = TableRef::This.ix(TableRef::Relation(a).col("k")).col("v");
        let expected = TableRef::Relation(j).ix(TableRef::Relation(j).col("k")).col("v");
        assert_eq!(subs.apply(&e)?, expected);
        Ok(())
    }
}
