//! Human- and machine-readable explanations of a [`ReducerPlan`].
//!
//! A reduce runs in three stages:
//!
//! 1. **Pre-reduction** -- row-wise expressions evaluated on the grouped relation.
//! 2. **Reducers** -- one aggregate per synthetic name, computed per group (BARRIER).
//! 3. **Outputs** -- arithmetic over reducer results, evaluated per group.
//!
//! [`ReducerPlan::explain`] lists those stages step by step; the explanation
//! renders as a boxed report through [`Display`] and exports to JSON.

use crate::expr::Expr;
use crate::splitter::ReducerPlan;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Stage a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    PreReduction,
    Reducer,
    Output,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let s = match self {
            Stage::PreReduction => "PreReduction",
            Stage::Reducer => "Reducer",
            Stage::Output => "Output",
        };
        f.write_str(s)
    }
}

/// A single named expression of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainStep {
    /// Position in evaluation order, starting at 1.
    pub step: usize,
    pub stage: Stage,
    pub name: String,
    /// Printable form of the expression.
    pub expression: String,
    /// Synthetic names of the previous stage this step reads.
    pub depends_on: Vec<String>,
}

/// Counts per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub pre_reduction: usize,
    pub reducers: usize,
    pub outputs: usize,
}

/// Human-readable breakdown of a [`ReducerPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducePlanExplanation {
    pub steps: Vec<ExplainStep>,
    pub summary: PlanSummary,
}

fn this_refs(expr: &Expr) -> Vec<String> {
    let mut names: Vec<String> = expr
        .all_column_refs()
        .into_iter()
        .filter(|c| c.table.is_placeholder())
        .map(|c| c.name.clone())
        .collect();
    names.sort();
    names.dedup();
    names
}

impl ReducerPlan {
    /// Describe the plan stage by stage.
    #[must_use]
    pub fn explain(&self) -> ReducePlanExplanation {
        let stages = [
            (Stage::PreReduction, &self.pre_reduction),
            (Stage::Reducer, &self.reducers),
            (Stage::Output, &self.outputs),
        ];
        let mut steps = Vec::new();
        for (stage, entries) in stages {
            for (name, expr) in entries {
                let depends_on = match stage {
                    Stage::PreReduction => Vec::new(),
                    _ => this_refs(expr),
                };
                steps.push(ExplainStep {
                    step: steps.len() + 1,
                    stage,
                    name: name.clone(),
                    expression: expr.to_string(),
                    depends_on,
                });
            }
        }
        ReducePlanExplanation {
            steps,
            summary: PlanSummary {
                pre_reduction: self.pre_reduction.len(),
                reducers: self.reducers.len(),
                outputs: self.outputs.len(),
            },
        }
    }
}

impl ReducePlanExplanation {
    /// The explanation as a JSON value.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).context("serialize reduce plan")
    }

    /// Write the explanation to `path` as pretty-printed JSON.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(self).context("serialize reduce plan")?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

impl Display for ReducePlanExplanation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(f, "╔═══════════════════════════════════════════════════════════════╗")?;
        writeln!(f, "║                 REDUCE PLAN EXPLANATION                       ║")?;
        writeln!(f, "╚═══════════════════════════════════════════════════════════════╝")?;
        writeln!(f)?;

        writeln!(f, "┌─ SUMMARY ────────────────────────────────────────────────────┐")?;
        writeln!(f, "│ Pre-reduction:     {:>10}", self.summary.pre_reduction)?;
        writeln!(f, "│ Reducers:          {:>10}", self.summary.reducers)?;
        writeln!(f, "│ Outputs:           {:>10}", self.summary.outputs)?;
        writeln!(f, "└──────────────────────────────────────────────────────────────┘")?;
        writeln!(f)?;

        writeln!(f, "┌─ STEPS ──────────────────────────────────────────────────────┐")?;
        for step in &self.steps {
            let barrier_marker = if step.stage == Stage::Reducer { " [BARRIER]" } else { "" };
            writeln!(f, "│")?;
            writeln!(f, "│ Step {}: {} {}{}", step.step, step.stage, step.name, barrier_marker)?;
            writeln!(f, "│   {}", step.expression)?;
            if !step.depends_on.is_empty() {
                writeln!(f, "│   Reads: {}", step.depends_on.join(", "))?;
            }
        }
        writeln!(f, "│")?;
        writeln!(f, "└──────────────────────────────────────────────────────────────┘")
    }
}
