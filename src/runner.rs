//! Batch reference evaluator.
//!
//! The runner materializes a relation by walking its derivation in the graph
//! and evaluating every operator over in-memory rows. It performs no
//! incremental maintenance: it exists so that plans can be checked end to end.
//!
//! Rows carry a multiplicity (`diff`). A negative multiplicity is a
//! retraction; a grouped reduction whose group only contains retractions
//! emits a retraction row, which
//! [`GroupOptions::suppress_retractions`](crate::grouping::GroupOptions) drops.
//!
//! Two execution modes are available, mirroring the rest of the crate:
//! - [`ExecMode::Sequential`] evaluates everything on the calling thread;
//! - [`ExecMode::Parallel`] splits row-wise operators into partitions and
//!   evaluates groups of a reduction on the Rayon pool.
//!
//! Both modes produce the same rows.

use crate::eval::Env;
use crate::expr::Expr;
use crate::graph::{JoinSide, RelationNode, RelationOp};
use crate::grouping::GroupingSpec;
use crate::ids::RelationId;
use crate::reducers::ReducerInput;
use crate::relation::Relation;
use crate::value::{Pointer, Value};
use anyhow::{Result, anyhow, bail};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A materialized row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row {
    pub key: Pointer,
    pub values: Vec<Value>,
    pub diff: i64,
}

impl Row {
    /// Whether the row has negative multiplicity.
    pub fn is_retraction(&self) -> bool {
        self.diff < 0
    }
}

/// The rows of one relation plus a key index.
#[derive(Debug, Clone)]
pub struct Materialized {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    index: HashMap<Pointer, usize>,
}

impl Materialized {
    fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let mut index = HashMap::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            index.entry(row.key).or_insert(i);
        }
        Self { columns, rows, index }
    }

    /// Position of column `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// The row with key `key`.
    pub fn get(&self, key: Pointer) -> Option<&Row> {
        self.index.get(&key).map(|&i| &self.rows[i])
    }
}

/// How a [`Runner`] evaluates operators.
#[derive(Clone, Copy, Debug)]
pub enum ExecMode {
    Sequential,
    Parallel { threads: Option<usize>, partitions: Option<usize> },
}

/// Batch evaluator for relations.
pub struct Runner {
    pub mode: ExecMode,
    pub default_partitions: usize,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel { threads: None, partitions: None },
            default_partitions: 2 * num_cpus::get().max(2),
        }
    }
}

impl Runner {
    /// Materialize `relation` and return its rows.
    pub fn run_collect(&self, relation: &Relation) -> Result<Vec<Row>> {
        if let ExecMode::Parallel { threads: Some(t), .. } = self.mode {
            // ok() to ignore "already built" on repeated calls in tests
            rayon::ThreadPoolBuilder::new().num_threads(t).build_global().ok();
        }
        let nodes = relation.graph.snapshot()?;
        let mut memo = HashMap::new();
        let out = self.materialize(&nodes, relation.id, &mut memo)?;
        Ok(out.rows.clone())
    }

    fn partitions(&self) -> Option<usize> {
        match self.mode {
            ExecMode::Sequential => None,
            ExecMode::Parallel { partitions, .. } => {
                Some(partitions.unwrap_or(self.default_partitions).max(1))
            }
        }
    }

    fn materialize(
        &self,
        nodes: &[RelationNode],
        id: RelationId,
        memo: &mut HashMap<RelationId, Arc<Materialized>>,
    ) -> Result<Arc<Materialized>> {
        if let Some(done) = memo.get(&id) {
            return Ok(Arc::clone(done));
        }
        let node = nodes
            .get(id.raw() as usize)
            .ok_or_else(|| anyhow!("missing relation {id}"))?;
        for dep in node.op.inputs() {
            if dep == id {
                bail!("{id} depends on itself");
            }
            self.materialize(nodes, dep, memo)?;
        }

        let env = Env { relations: &*memo };
        let rows = match &node.op {
            RelationOp::Source { rows } => consolidate(rows.as_ref().clone()),
            RelationOp::Select { input, exprs } => {
                let input_rows = &env.relation(*input)?.rows;
                self.map_rows(input_rows, |row| {
                    let values = env.eval_all(exprs, row.key)?;
                    Ok(Some(Row { key: row.key, values, diff: row.diff }))
                })?
            }
            RelationOp::Filter { input, predicate } => {
                let input_rows = &env.relation(*input)?.rows;
                self.map_rows(input_rows, |row| {
                    Ok(env.eval(predicate, row.key)?.as_bool()?.then(|| row.clone()))
                })?
            }
            RelationOp::WithUniverseOf { input, reference } => {
                let rows = &env.relation(*input)?.rows;
                let theirs: HashSet<Pointer> =
                    env.relation(*reference)?.rows.iter().map(|r| r.key).collect();
                let ours: HashSet<Pointer> = rows.iter().map(|r| r.key).collect();
                if ours != theirs {
                    bail!("with_universe_of: key sets of {input} and {reference} differ");
                }
                rows.clone()
            }
            RelationOp::FilterRetractions { input } => env
                .relation(*input)?
                .rows
                .iter()
                .filter(|r| !r.is_retraction())
                .cloned()
                .collect(),
            RelationOp::Join { left, right, on, columns } => {
                join(&env, *left, *right, on, columns)?
            }
            RelationOp::Reduce { input, spec, reducers } => {
                self.reduce(&env, *input, spec, reducers)?
            }
        };
        debug!(relation = id.raw(), rows = rows.len(), "materialized relation");
        let out = Arc::new(Materialized::new(node.columns.clone(), rows));
        memo.insert(id, Arc::clone(&out));
        Ok(out)
    }

    /// Apply a row-wise function, partitioned across the pool in parallel mode.
    fn map_rows<F>(&self, rows: &[Row], f: F) -> Result<Vec<Row>>
    where
        F: Fn(&Row) -> Result<Option<Row>> + Send + Sync,
    {
        let Some(parts) = self.partitions() else {
            return rows.iter().filter_map(|r| f(r).transpose()).collect();
        };
        let chunk = rows.len().div_ceil(parts).max(1);
        let chunks: Vec<Vec<Row>> = rows
            .par_chunks(chunk)
            .map(|c| c.iter().filter_map(|r| f(r).transpose()).collect::<Result<Vec<_>>>())
            .collect::<Result<_>>()?;
        Ok(chunks.into_iter().flatten().collect())
    }

    fn reduce(
        &self,
        env: &Env<'_>,
        input: RelationId,
        spec: &GroupingSpec,
        reducers: &[Expr],
    ) -> Result<Vec<Row>> {
        let rows = &env.relation(input)?.rows;

        // Group rows by key values, in first-seen order.
        let mut slots: HashMap<Vec<Value>, usize> = HashMap::new();
        let mut groups: Vec<Group> = Vec::new();
        for row in rows {
            let values = env.eval_all(&spec.keys, row.key)?;
            let order = match &spec.sort_by {
                Some(e) => env.eval(e, row.key)?,
                None => Value::None,
            };
            let slot = *slots.entry(values.clone()).or_insert_with(|| {
                groups.push(Group { values, members: Vec::new() });
                groups.len() - 1
            });
            groups[slot].members.push(Member { key: row.key, diff: row.diff, order });
        }

        let finish = |group: &Group| finish_group(env, spec, reducers, group);
        let out: Vec<Row> = if self.partitions().is_some() {
            groups.par_iter().map(finish).collect::<Result<_>>()?
        } else {
            groups.iter().map(finish).collect::<Result<_>>()?
        };
        Ok(out)
    }
}

struct Member {
    key: Pointer,
    diff: i64,
    order: Value,
}

struct Group {
    values: Vec<Value>,
    members: Vec<Member>,
}

fn finish_group(
    env: &Env<'_>,
    spec: &GroupingSpec,
    reducers: &[Expr],
    group: &Group,
) -> Result<Row> {
    // A group without any live row only reports the retraction of an earlier result.
    let retraction = group.members.iter().all(|m| m.diff < 0);
    let mut members: Vec<&Member> = group
        .members
        .iter()
        .filter(|m| if retraction { m.diff < 0 } else { m.diff > 0 })
        .collect();
    members.sort_by(|a, b| a.order.compare(&b.order).then(a.key.cmp(&b.key)));

    let mut values = Vec::with_capacity(reducers.len());
    for reducer in reducers {
        let value = match reducer {
            Expr::Count => Value::Int(members.iter().map(|m| m.diff.abs()).sum()),
            Expr::Reducer { kind, args } => {
                let [arg] = args.as_slice() else {
                    bail!("reducer {reducer} expects exactly one argument");
                };
                let inputs = members
                    .iter()
                    .map(|m| {
                        let value = env.eval(arg, m.key)?;
                        Ok(ReducerInput { value, key: m.key, weight: m.diff.abs() })
                    })
                    .collect::<Result<Vec<_>>>()?;
                kind.apply(&inputs)?
            }
            other => bail!("{other} is not a reducer"),
        };
        values.push(value);
    }

    let key = match (spec.set_identity, group.values.as_slice()) {
        (true, [Value::Pointer(p)]) => *p,
        (true, [other]) => bail!(
            "grouping by identity needs a pointer key, found {} {other:?}",
            other.type_name()
        ),
        (true, values) => bail!("grouping by identity needs one key, found {}", values.len()),
        (false, values) => Pointer::from_values(values),
    };
    Ok(Row { key, values, diff: if retraction { -1 } else { 1 } })
}

/// Sum multiplicities of identical rows and drop the ones that cancel out.
fn consolidate(rows: Vec<Row>) -> Vec<Row> {
    let mut slots: HashMap<(Pointer, Vec<Value>), usize> = HashMap::new();
    let mut out: Vec<Row> = Vec::new();
    for row in rows {
        match slots.get(&(row.key, row.values.clone())) {
            Some(&i) => out[i].diff += row.diff,
            None => {
                slots.insert((row.key, row.values.clone()), out.len());
                out.push(row);
            }
        }
    }
    out.retain(|r| r.diff != 0);
    out
}

fn join(
    env: &Env<'_>,
    left: RelationId,
    right: RelationId,
    on: &[(Expr, Expr)],
    columns: &[(JoinSide, String)],
) -> Result<Vec<Row>> {
    let (lrel, rrel) = (env.relation(left)?, env.relation(right)?);
    let left_on: Vec<_> = on.iter().map(|(l, _)| l.clone()).collect();
    let right_on: Vec<_> = on.iter().map(|(_, r)| r.clone()).collect();

    let mut buckets: HashMap<Vec<Value>, Vec<&Row>> = HashMap::new();
    for row in &rrel.rows {
        buckets.entry(env.eval_all(&right_on, row.key)?).or_default().push(row);
    }

    let projection: Vec<(JoinSide, usize)> = columns
        .iter()
        .map(|(side, name)| {
            let rel = if *side == JoinSide::Left { lrel } else { rrel };
            rel.column_index(name)
                .map(|i| (*side, i))
                .ok_or_else(|| anyhow!("join input has no column {name:?}"))
        })
        .collect::<Result<_>>()?;

    let mut out = Vec::new();
    for lrow in &lrel.rows {
        let Some(matches) = buckets.get(&env.eval_all(&left_on, lrow.key)?) else {
            continue;
        };
        for rrow in matches {
            let values = projection
                .iter()
                .map(|(side, i)| match side {
                    JoinSide::Left => lrow.values[*i].clone(),
                    JoinSide::Right => rrow.values[*i].clone(),
                })
                .collect();
            let key = Pointer::pair(lrow.key, rrow.key);
            out.push(Row { key, values, diff: lrow.diff * rrow.diff });
        }
    }
    Ok(out)
}
