//! # ironbeam-groupby
//!
//! A **grouped-reduction planner**: turn "group these rows by some keys, then
//! compute these aggregate outputs" into a checked chain of relational
//! operators.
//!
//! ## Key Features
//!
//! - **Nested aggregates** - outputs such as `sum(this.a * 2) / count()` are split into
//!   row-wise work, reducers, and post-aggregation arithmetic
//! - **Scoping checks** - outside reducers only grouping keys can be read
//! - **Universe tracking** - reducer arguments must come from relations proven to share the grouped
//!   relation's key set
//! - **Cached grouped views** - grouping the same relation by the same keys twice returns one view
//! - **Grouping over joins** - keys and outputs written against the join inputs are
//!   rewritten onto the joined relation
//! - **Sequential and parallel execution** - a batch runner materializes any plan
//!
//! ## Quick Start
//!
//! ```ignore
//! use ironbeam_groupby::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let g = Graph::default();
//! let pets = g.table(
//!     &["age", "owner", "pet"],
//!     vec![
//!         vec![10.into(), "Alice".into(), "dog".into()],
//!         vec![9.into(), "Bob".into(), "dog".into()],
//!     ],
//! )?;
//!
//! let per_owner = pets.group_by([this("owner")])?.reduce(
//!     Outputs::new()
//!         .column(this("owner"))
//!         .named("total_age", sum(this("age")))
//!         .named("pets", count()),
//! )?;
//!
//! let rows = per_owner.collect_seq()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Graph and relations
//!
//! A [`Graph`] owns every relation, the [`UniverseRegistry`] and the grouped-view
//! cache. A [`Relation`] is a handle into it; operations never modify a
//! relation but add a new one.
//!
//! ### Universes
//!
//! Every relation has a universe: the identity of its key set. `select` keeps
//! the universe of its input, `filter` and `join` create fresh ones, and
//! [`with_universe_of`](Relation::with_universe_of) or
//! [`Graph::register_universes_equal`] declare two key sets equal.
//!
//! ### Grouped views
//!
//! [`Relation::group_by`] returns a [`GroupedView`]. Its
//! [`reduce`](GroupedView::reduce) validates the outputs, splits them into a
//! [`ReducerPlan`] and adds the pre-reduction projection, the reduction and
//! the final projection to the graph. [`GroupedView::plan`] performs the same
//! validation without touching the graph; [`ReducerPlan::explain`] renders the
//! result.
//!
//! ### Reducers
//!
//! [`sum`], [`min`], [`max`], [`avg`], [`argmin`], [`argmax`], [`any`],
//! [`unique`], [`tuple`], [`sorted_tuple`] and [`count`]. `argmin`/`argmax`
//! return row pointers usable in indexed lookups: `rel.ix(argmax(..)).col(..)`.
//!
//! ### Execution Modes
//!
//! - **Sequential** - [`collect_seq()`](Relation::collect_seq)
//! - **Parallel** - [`collect_par()`](Relation::collect_par), groups and row-wise
//!   operators on Rayon
//!
//! Both modes produce the same rows.

pub mod desugar;
pub mod error;
mod eval;
pub mod expr;
pub mod graph;
pub mod grouping;
pub mod ids;
pub mod join;
pub mod planner;
pub mod reducers;
pub mod relation;
pub mod runner;
pub mod splitter;
pub mod testing;
pub mod universe;
pub mod value;

pub use desugar::Substitution;
pub use error::{PlanError, PlanResult};
pub use expr::{
    ColumnRef, Expr, Op, TableRef, if_else, left, lit, make_tuple, pointer_from, right, this,
};
pub use graph::Graph;
pub use grouping::{GroupOptions, GroupedView, GroupingSpec, group};
pub use ids::{RelationId, UniverseId, ViewId};
pub use join::{GroupedJoinView, JoinResult, group_join};
pub use planner::{ExplainStep, PlanSummary, ReducePlanExplanation, Stage};
pub use reducers::{
    ReducerKind, any, argmax, argmin, avg, count, max, min, sorted_tuple, sum, tuple, unique,
};
pub use relation::{Outputs, Relation};
pub use runner::{ExecMode, Materialized, Row, Runner};
pub use splitter::ReducerPlan;
pub use universe::UniverseRegistry;
pub use value::{Pointer, Value};
