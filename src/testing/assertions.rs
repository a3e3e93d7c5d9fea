//! Assertion functions for comparing materialized rows with expected results.

use crate::runner::Row;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Project rows to their values, dropping keys and multiplicities.
#[must_use]
pub fn row_values(rows: &[Row]) -> Vec<Vec<Value>> {
    rows.iter().map(|r| r.values.clone()).collect()
}

/// Project rows to `(values, diff)` pairs.
#[must_use]
pub fn row_values_with_diffs(rows: &[Row]) -> Vec<(Vec<Value>, i64)> {
    rows.iter().map(|r| (r.values.clone(), r.diff)).collect()
}

/// Assert that two collections hold the same elements with the same
/// multiplicities, ignoring order.
///
/// # Panics
///
/// Panics if the collections differ in content (ignoring order).
///
/// # Example
///
/// ```ignore
/// use ironbeam_groupby::testing::assert_rows_unordered_equal;
///
/// let actual = vec![vec![3], vec![1], vec![2]];
/// let expected = vec![vec![1], vec![2], vec![3]];
/// assert_rows_unordered_equal(&actual, &expected);
/// ```
pub fn assert_rows_unordered_equal<T: Debug + Eq + Hash>(actual: &[T], expected: &[T]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Row count mismatch:\n  Expected count: {}\n  Actual count: {}\n  \
         Expected: {expected:?}\n  Actual: {actual:?}",
        expected.len(),
        actual.len()
    );

    let mut counts: HashMap<&T, i64> = HashMap::new();
    for row in actual {
        *counts.entry(row).or_default() += 1;
    }
    for row in expected {
        *counts.entry(row).or_default() -= 1;
    }
    let extra: Vec<_> = counts.iter().filter(|(_, c)| **c > 0).map(|(r, _)| *r).collect();
    let missing: Vec<_> = counts.iter().filter(|(_, c)| **c < 0).map(|(r, _)| *r).collect();

    assert!(
        extra.is_empty() && missing.is_empty(),
        "Row content mismatch:\n  Missing rows: {missing:?}\n  Extra rows: {extra:?}\n  \
         Expected: {expected:?}\n  Actual: {actual:?}"
    );
}

/// Assert that every row satisfies `predicate`.
///
/// # Panics
///
/// Panics with the first offending row.
pub fn assert_all_rows(rows: &[Row], predicate: impl Fn(&Row) -> bool) {
    for (i, row) in rows.iter().enumerate() {
        assert!(predicate(row), "Predicate failed for row at index {i}: {row:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplicities_matter() {
        assert_rows_unordered_equal(&[1, 2, 2], &[2, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "Row content mismatch")]
    fn detects_different_multiplicities() {
        assert_rows_unordered_equal(&[1, 1, 2], &[1, 2, 2]);
    }
}
