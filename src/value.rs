//! Runtime cell values and row keys.
//!
//! [`Value`] is the dynamically-typed cell carried by relations when they are
//! materialized by the [`Runner`](crate::runner::Runner). Floats are wrapped in
//! [`OrderedFloat`] so every value is `Eq + Hash + Ord`, which lets values act
//! as grouping keys directly.
//!
//! [`Pointer`] is the key of a row. Grouped outputs derive their row keys from
//! the grouping values, and `argmin`/`argmax` reducers return pointers so that
//! indexed lookups (`relation.ix(..)`) can fetch the winning row.

use anyhow::{Result, anyhow, bail};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Key of a row within a relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pointer(pub u64);

impl Pointer {
    /// Derive a pointer from a sequence of values.
    ///
    /// The same values always produce the same pointer within a process, so
    /// reducing the same groups twice yields rows with the same keys.
    pub fn from_values(values: &[Value]) -> Self {
        let mut hasher = DefaultHasher::new();
        values.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Combine two pointers (used for join output keys).
    pub fn pair(left: Pointer, right: Pointer) -> Self {
        let mut hasher = DefaultHasher::new();
        (left.0, right.0).hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "^{:X}", self.0)
    }
}

/// A single cell value.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Pointer(Pointer),
    Tuple(Vec<Value>),
}

impl Value {
    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Pointer(_) => "pointer",
            Value::Tuple(_) => "tuple",
        }
    }

    /// The boolean inside, or an error for any other type.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => bail!("expected bool, found {}", other.type_name()),
        }
    }

    /// Numeric value as a float.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(f.0),
            other => bail!("expected a number, found {}", other.type_name()),
        }
    }

    /// Ordering that compares ints and floats numerically and falls back to
    /// the derived structural order otherwise.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) => OrderedFloat(*a as f64).cmp(b),
            (Value::Float(a), Value::Int(b)) => a.cmp(&OrderedFloat(*b as f64)),
            _ => self.cmp(other),
        }
    }

    /// Checked addition; ints stay ints.
    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| anyhow!("integer overflow in {a} + {b}")),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::Tuple(a), Value::Tuple(b)) => {
                Ok(Value::Tuple(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => self.float_op(other, "+", |a, b| a + b),
        }
    }

    /// Checked subtraction.
    pub fn sub(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| anyhow!("integer overflow in {a} - {b}")),
            _ => self.float_op(other, "-", |a, b| a - b),
        }
    }

    /// Checked multiplication.
    pub fn mul(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| anyhow!("integer overflow in {a} * {b}")),
            _ => self.float_op(other, "*", |a, b| a * b),
        }
    }

    /// True division; always produces a float.
    pub fn div(&self, other: &Value) -> Result<Value> {
        let (a, b) = (self.as_f64()?, other.as_f64()?);
        if b == 0.0 {
            bail!("division by zero");
        }
        Ok(Value::Float(OrderedFloat(a / b)))
    }

    /// Euclidean division for ints, floored division for floats.
    pub fn floor_div(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => bail!("division by zero"),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.div_euclid(*b))),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                if b == 0.0 {
                    bail!("division by zero");
                }
                Ok(Value::Float(OrderedFloat((a / b).floor())))
            }
        }
    }

    /// Euclidean remainder; never negative.
    pub fn rem(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => bail!("division by zero"),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.rem_euclid(*b))),
            _ => self.float_op(other, "%", |a, b| a.rem_euclid(b)),
        }
    }

    /// Checked negation.
    pub fn neg(&self) -> Result<Value> {
        match self {
            Value::Int(a) => a
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| anyhow!("integer overflow in -{a}")),
            Value::Float(f) => Ok(Value::Float(-*f)),
            other => bail!("cannot negate {}", other.type_name()),
        }
    }

    /// Multiply a value by a row multiplicity (used by weighted reducers).
    pub(crate) fn scale(&self, weight: i64) -> Result<Value> {
        self.mul(&Value::Int(weight))
    }

    fn float_op(&self, other: &Value, op: &str, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
        match (self, other) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(Value::Float(
                OrderedFloat(f(self.as_f64()?, other.as_f64()?)),
            )),
            _ => bail!(
                "unsupported operand types for {op}: {} and {}",
                self.type_name(),
                other.type_name()
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", x.0),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Pointer(p) => write!(f, "{p}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(OrderedFloat(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Pointer> for Value {
    fn from(v: Pointer) -> Self {
        Value::Pointer(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_numeric_arithmetic() -> Result<()> {
        assert_eq!(Value::Int(2).add(&Value::Int(3))?, Value::Int(5));
        assert_eq!(Value::Int(2).add(&Value::from(0.5))?, Value::from(2.5));
        assert_eq!(Value::Int(7).div(&Value::Int(2))?, Value::from(3.5));
        assert_eq!(Value::Int(7).floor_div(&Value::Int(2))?, Value::Int(3));
        assert!(Value::Int(1).div(&Value::Int(0)).is_err());
        assert!(Value::from("a").sub(&Value::Int(1)).is_err());
        Ok(())
    }

    #[test]
    fn compare_is_numeric_across_int_and_float() {
        assert_eq!(Value::Int(2).compare(&Value::from(1.5)), Ordering::Greater);
        assert_eq!(Value::from(2.0).compare(&Value::Int(2)), Ordering::Equal);
    }

    #[test]
    fn pointers_are_stable_for_equal_values() {
        let a = Pointer::from_values(&[Value::from("Alice"), Value::from("dog")]);
        let b = Pointer::from_values(&[Value::from("Alice"), Value::from("dog")]);
        let c = Pointer::from_values(&[Value::from("Bob"), Value::from("dog")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
