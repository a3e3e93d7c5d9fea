//! Testing utilities for grouped reductions.
//!
//! - **Fixtures**: small relations used throughout the examples and tests
//! - **Assertions**: order-insensitive comparison of materialized rows
//!
//! # Quick Start
//!
//! ```ignore
//! use ironbeam_groupby::*;
//! use ironbeam_groupby::testing::*;
//!
//! #[test]
//! fn ages_per_pet_and_owner() -> anyhow::Result<()> {
//!     let g = Graph::default();
//!     let pets = g.table(PETS_COLUMNS, pets_rows())?;
//!     let out = pets
//!         .group_by([this("pet"), this("owner")])?
//!         .reduce(
//!             Outputs::new()
//!                 .column(this("owner"))
//!                 .column(this("pet"))
//!                 .named("ageagg", sum(this("age"))),
//!         )?;
//!     assert_rows_unordered_equal(
//!         &row_values(&out.collect_seq()?),
//!         &[
//!             vec!["Alice".into(), "cat".into(), 8.into()],
//!             vec!["Alice".into(), "dog".into(), 10.into()],
//!             vec!["Bob".into(), "dog".into(), 16.into()],
//!         ],
//!     );
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
