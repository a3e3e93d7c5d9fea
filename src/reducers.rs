//! Reducers: aggregate functions evaluated once per group.
//!
//! The constructors in this module ([`sum`], [`count`], [`argmax`], …) build
//! [`Expr::Reducer`]/[`Expr::Count`] nodes. Evaluation follows the combiner
//! shape used by the rest of the crate: each reducer is a small value type
//! implementing [`ReduceFn`] with `create` / `add_input` / `finish`, and the
//! grouped evaluator folds the rows of a group through it.
//!
//! Rows carry a positive multiplicity (`weight`); weighted reducers treat a row
//! of weight `n` as `n` identical rows.

use crate::expr::Expr;
use crate::value::{Pointer, Value};
use anyhow::{Result, bail};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The aggregate functions understood by the planner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReducerKind {
    Sum,
    Min,
    Max,
    Avg,
    ArgMin,
    ArgMax,
    /// Picks one representative value. Also used by the splitter to carry a
    /// grouping column through the aggregation step.
    Any,
    Unique,
    Tuple,
    SortedTuple,
}

impl ReducerKind {
    /// Name used when printing expressions.
    pub fn name(&self) -> &'static str {
        match self {
            ReducerKind::Sum => "sum",
            ReducerKind::Min => "min",
            ReducerKind::Max => "max",
            ReducerKind::Avg => "avg",
            ReducerKind::ArgMin => "argmin",
            ReducerKind::ArgMax => "argmax",
            ReducerKind::Any => "any",
            ReducerKind::Unique => "unique",
            ReducerKind::Tuple => "tuple",
            ReducerKind::SortedTuple => "sorted_tuple",
        }
    }

    /// Fold `inputs` (already in group order) through this reducer.
    pub(crate) fn apply(&self, inputs: &[ReducerInput]) -> Result<Value> {
        match self {
            ReducerKind::Sum => run(&Sum, inputs),
            ReducerKind::Min => run(&Extreme { ordering: Ordering::Less, arg: false }, inputs),
            ReducerKind::Max => run(&Extreme { ordering: Ordering::Greater, arg: false }, inputs),
            ReducerKind::ArgMin => run(&Extreme { ordering: Ordering::Less, arg: true }, inputs),
            ReducerKind::ArgMax => run(&Extreme { ordering: Ordering::Greater, arg: true }, inputs),
            ReducerKind::Avg => run(&Avg, inputs),
            ReducerKind::Any => run(&AnyValue, inputs),
            ReducerKind::Unique => run(&Unique, inputs),
            ReducerKind::Tuple => run(&Tuple { sorted: false }, inputs),
            ReducerKind::SortedTuple => run(&Tuple { sorted: true }, inputs),
        }
    }
}

impl fmt::Display for ReducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of a group as seen by a reducer.
#[derive(Clone, Debug)]
pub(crate) struct ReducerInput {
    pub value: Value,
    pub key: Pointer,
    pub weight: i64,
}

/// Accumulator protocol shared by all reducers.
pub(crate) trait ReduceFn {
    type Acc;
    fn create(&self) -> Self::Acc;
    fn add_input(&self, acc: &mut Self::Acc, input: &ReducerInput) -> Result<()>;
    fn finish(&self, acc: Self::Acc) -> Result<Value>;
}

fn run<R: ReduceFn>(reducer: &R, inputs: &[ReducerInput]) -> Result<Value> {
    let mut acc = reducer.create();
    for input in inputs {
        reducer.add_input(&mut acc, input)?;
    }
    reducer.finish(acc)
}

/* ===================== Sum ===================== */

struct Sum;

impl ReduceFn for Sum {
    type Acc = Option<Value>;

    fn create(&self) -> Option<Value> {
        None
    }

    fn add_input(&self, acc: &mut Option<Value>, input: &ReducerInput) -> Result<()> {
        let v = input.value.scale(input.weight)?;
        *acc = Some(match acc.take() {
            Some(cur) => cur.add(&v)?,
            None => v,
        });
        Ok(())
    }

    fn finish(&self, acc: Option<Value>) -> Result<Value> {
        Ok(acc.unwrap_or(Value::Int(0)))
    }
}

/* ===================== Min / Max / ArgMin / ArgMax ===================== */

struct Extreme {
    ordering: Ordering,
    arg: bool,
}

impl ReduceFn for Extreme {
    type Acc = Option<(Value, Pointer)>;

    fn create(&self) -> Self::Acc {
        None
    }

    fn add_input(&self, acc: &mut Self::Acc, input: &ReducerInput) -> Result<()> {
        let replace = match acc {
            None => true,
            Some((cur, cur_key)) => match input.value.compare(cur) {
                Ordering::Equal => input.key < *cur_key,
                o => o == self.ordering,
            },
        };
        if replace {
            *acc = Some((input.value.clone(), input.key));
        }
        Ok(())
    }

    fn finish(&self, acc: Self::Acc) -> Result<Value> {
        Ok(match acc {
            Some((_, key)) if self.arg => Value::Pointer(key),
            Some((value, _)) => value,
            None => Value::None,
        })
    }
}

/* ===================== Avg ===================== */

struct Avg;

impl ReduceFn for Avg {
    type Acc = (f64, i64);

    fn create(&self) -> (f64, i64) {
        (0.0, 0)
    }

    fn add_input(&self, acc: &mut (f64, i64), input: &ReducerInput) -> Result<()> {
        acc.0 += input.value.as_f64()? * input.weight as f64;
        acc.1 += input.weight;
        Ok(())
    }

    fn finish(&self, acc: (f64, i64)) -> Result<Value> {
        if acc.1 == 0 {
            return Ok(Value::None);
        }
        Ok(Value::Float(OrderedFloat(acc.0 / acc.1 as f64)))
    }
}

/* ===================== Any / Unique ===================== */

struct AnyValue;

impl ReduceFn for AnyValue {
    type Acc = Option<Value>;

    fn create(&self) -> Option<Value> {
        None
    }

    fn add_input(&self, acc: &mut Option<Value>, input: &ReducerInput) -> Result<()> {
        if acc.is_none() {
            *acc = Some(input.value.clone());
        }
        Ok(())
    }

    fn finish(&self, acc: Option<Value>) -> Result<Value> {
        Ok(acc.unwrap_or(Value::None))
    }
}

struct Unique;

impl ReduceFn for Unique {
    type Acc = Option<Value>;

    fn create(&self) -> Option<Value> {
        None
    }

    fn add_input(&self, acc: &mut Option<Value>, input: &ReducerInput) -> Result<()> {
        match acc {
            Some(cur) if *cur != input.value => {
                bail!(
                    "more than one distinct value passed to the unique reducer: {cur} and {}",
                    input.value
                )
            }
            Some(_) => {}
            None => *acc = Some(input.value.clone()),
        }
        Ok(())
    }

    fn finish(&self, acc: Option<Value>) -> Result<Value> {
        Ok(acc.unwrap_or(Value::None))
    }
}

/* ===================== Tuple / SortedTuple ===================== */

struct Tuple {
    sorted: bool,
}

impl ReduceFn for Tuple {
    type Acc = Vec<Value>;

    fn create(&self) -> Vec<Value> {
        Vec::new()
    }

    fn add_input(&self, acc: &mut Vec<Value>, input: &ReducerInput) -> Result<()> {
        for _ in 0..input.weight {
            acc.push(input.value.clone());
        }
        Ok(())
    }

    fn finish(&self, mut acc: Vec<Value>) -> Result<Value> {
        if self.sorted {
            acc.sort_by(Value::compare);
        }
        Ok(Value::Tuple(acc))
    }
}

/* ===================== constructors ===================== */

fn reducer(kind: ReducerKind, arg: Expr) -> Expr {
    Expr::Reducer { kind, args: vec![arg] }
}

/// Sum of the argument over the group.
pub fn sum(arg: Expr) -> Expr {
    reducer(ReducerKind::Sum, arg)
}

/// Smallest value in the group.
pub fn min(arg: Expr) -> Expr {
    reducer(ReducerKind::Min, arg)
}

/// Largest value in the group.
pub fn max(arg: Expr) -> Expr {
    reducer(ReducerKind::Max, arg)
}

/// Arithmetic mean; always a float.
pub fn avg(arg: Expr) -> Expr {
    reducer(ReducerKind::Avg, arg)
}

/// Key of the row holding the minimal value (ties broken by smaller key).
pub fn argmin(arg: Expr) -> Expr {
    reducer(ReducerKind::ArgMin, arg)
}

/// Key of the row holding the maximal value (ties broken by smaller key).
pub fn argmax(arg: Expr) -> Expr {
    reducer(ReducerKind::ArgMax, arg)
}

/// Some value of the group.
pub fn any(arg: Expr) -> Expr {
    reducer(ReducerKind::Any, arg)
}

/// The single value shared by every row of the group; fails at evaluation
/// time if rows disagree.
pub fn unique(arg: Expr) -> Expr {
    reducer(ReducerKind::Unique, arg)
}

/// All values of the group, in `sort_by` order (then row key order).
pub fn tuple(arg: Expr) -> Expr {
    reducer(ReducerKind::Tuple, arg)
}

/// All values of the group, sorted.
pub fn sorted_tuple(arg: Expr) -> Expr {
    reducer(ReducerKind::SortedTuple, arg)
}

/// Number of rows in the group. Needs no per-row value.
pub fn count() -> Expr {
    Expr::Count
}
