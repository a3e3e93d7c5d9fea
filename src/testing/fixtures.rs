//! Pre-built relations for common grouping scenarios.

use crate::value::Value;

/// Columns of [`pets_rows`].
pub const PETS_COLUMNS: &[&str] = &["age", "owner", "pet"];

/// Four pets and their owners.
///
/// Grouping by `(pet, owner)` and summing `age` gives
/// `(Alice, cat, 8)`, `(Alice, dog, 10)` and `(Bob, dog, 16)`.
#[must_use]
pub fn pets_rows() -> Vec<Vec<Value>> {
    vec![
        vec![10.into(), "Alice".into(), "dog".into()],
        vec![9.into(), "Bob".into(), "dog".into()],
        vec![8.into(), "Alice".into(), "cat".into()],
        vec![7.into(), "Bob".into(), "dog".into()],
    ]
}

/// Columns of [`owners_left_rows`].
pub const OWNERS_LEFT_COLUMNS: &[&str] = &["age", "owner", "pet"];
/// Columns of [`owners_right_rows`].
pub const OWNERS_RIGHT_COLUMNS: &[&str] = &["age", "owner", "pet", "size"];

/// Left side of the owners join: Alice appears twice, Bob once.
#[must_use]
pub fn owners_left_rows() -> Vec<Vec<Value>> {
    vec![
        vec![10.into(), "Alice".into(), 1.into()],
        vec![9.into(), "Bob".into(), 1.into()],
        vec![8.into(), "Alice".into(), 2.into()],
    ]
}

/// Right side of the owners join: Tom has no match on the left.
#[must_use]
pub fn owners_right_rows() -> Vec<Vec<Value>> {
    vec![
        vec![10.into(), "Alice".into(), 3.into(), "M".into()],
        vec![9.into(), "Bob".into(), 1.into(), "L".into()],
        vec![8.into(), "Tom".into(), 1.into(), "XL".into()],
    ]
}

/// Columns of [`sales_rows`].
pub const SALES_COLUMNS: &[&str] = &["shop", "price", "qty"];

/// Sales lines of two shops.
#[must_use]
pub fn sales_rows() -> Vec<Vec<Value>> {
    vec![
        vec!["north".into(), 2.0.into(), 3.into()],
        vec!["north".into(), 5.0.into(), 1.into()],
        vec!["south".into(), 1.5.into(), 4.into()],
        vec!["south".into(), 4.0.into(), 2.into()],
        vec!["south".into(), 11.0.into(), 1.into()],
    ]
}
