//! Row-wise expression evaluation over materialized relations.
//!
//! Every column reference is resolved by row key: a row of relation `A` can
//! read `B.col` whenever `A` and `B` share a universe, because the row with
//! the same key exists in `B`. Indexed references evaluate their lookup key
//! first and read the addressed row instead.

use crate::expr::{ColumnRef, Expr, Op, TableRef};
use crate::ids::RelationId;
use crate::runner::Materialized;
use crate::value::{Pointer, Value};
use anyhow::{Context, Result, anyhow, bail};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct Env<'a> {
    pub relations: &'a HashMap<RelationId, Arc<Materialized>>,
}

impl Env<'_> {
    pub fn relation(&self, id: RelationId) -> Result<&Materialized> {
        self.relations
            .get(&id)
            .map(Arc::as_ref)
            .ok_or_else(|| anyhow!("{id} was not materialized"))
    }

    fn read(&self, id: RelationId, key: Pointer, name: &str) -> Result<Value> {
        let rel = self.relation(id)?;
        let idx = rel
            .column_index(name)
            .ok_or_else(|| anyhow!("{id} has no column {name:?}"))?;
        let row = rel
            .get(key)
            .ok_or_else(|| anyhow!("key {key} not found in {id}"))?;
        Ok(row.values[idx].clone())
    }

    fn column(&self, c: &ColumnRef, key: Pointer) -> Result<Value> {
        match &c.table {
            TableRef::Relation(id) => self.read(*id, key, &c.name),
            TableRef::Indexed { table, key: lookup } => {
                let TableRef::Relation(id) = table.as_ref() else {
                    bail!("unsupported indexed target in {c}");
                };
                match self.eval(lookup, key)? {
                    Value::Pointer(p) => self
                        .read(*id, p, &c.name)
                        .with_context(|| format!("evaluating {c}")),
                    other => {
                        bail!("lookup key of {c} must be a pointer, found {}", other.type_name())
                    }
                }
            }
            placeholder => bail!("unresolved placeholder {placeholder} in {c}"),
        }
    }

    /// Evaluate `expr` for the row with key `key`.
    pub fn eval(&self, expr: &Expr, key: Pointer) -> Result<Value> {
        match expr {
            Expr::Column(c) => self.column(c, key),
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Reducer { .. } | Expr::Count => {
                bail!("reducer {expr} evaluated outside of a grouping context")
            }
            Expr::Apply { op, args } => self.apply(*op, args, key),
        }
    }

    fn apply(&self, op: Op, args: &[Expr], key: Pointer) -> Result<Value> {
        let arg = |i: usize| -> Result<Value> {
            let e = args.get(i).ok_or_else(|| anyhow!("{op:?} is missing argument {i}"))?;
            self.eval(e, key)
        };
        Ok(match op {
            Op::Add => arg(0)?.add(&arg(1)?)?,
            Op::Sub => arg(0)?.sub(&arg(1)?)?,
            Op::Mul => arg(0)?.mul(&arg(1)?)?,
            Op::Div => arg(0)?.div(&arg(1)?)?,
            Op::FloorDiv => arg(0)?.floor_div(&arg(1)?)?,
            Op::Mod => arg(0)?.rem(&arg(1)?)?,
            Op::Neg => arg(0)?.neg()?,
            Op::Eq => Value::Bool(arg(0)?.compare(&arg(1)?) == Ordering::Equal),
            Op::Ne => Value::Bool(arg(0)?.compare(&arg(1)?) != Ordering::Equal),
            Op::Lt => Value::Bool(arg(0)?.compare(&arg(1)?) == Ordering::Less),
            Op::Le => Value::Bool(arg(0)?.compare(&arg(1)?) != Ordering::Greater),
            Op::Gt => Value::Bool(arg(0)?.compare(&arg(1)?) == Ordering::Greater),
            Op::Ge => Value::Bool(arg(0)?.compare(&arg(1)?) != Ordering::Less),
            Op::And => Value::Bool(arg(0)?.as_bool()? && arg(1)?.as_bool()?),
            Op::Or => Value::Bool(arg(0)?.as_bool()? || arg(1)?.as_bool()?),
            Op::Not => Value::Bool(!arg(0)?.as_bool()?),
            Op::IfElse => {
                if arg(0)?.as_bool()? {
                    arg(1)?
                } else {
                    arg(2)?
                }
            }
            Op::MakeTuple => Value::Tuple(self.eval_all(args, key)?),
            Op::MakePointer => Value::Pointer(Pointer::from_values(&self.eval_all(args, key)?)),
        })
    }

    pub fn eval_all(&self, exprs: &[Expr], key: Pointer) -> Result<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, key)).collect()
    }
}
