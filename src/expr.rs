//! Expression trees.
//!
//! An [`Expr`] is an immutable tree built by the caller and consumed by the
//! planner. Identity is structural: two trees are the same expression iff they
//! compare equal after placeholder resolution.
//!
//! Column references point at a [`TableRef`]:
//! - a concrete relation ([`TableRef::Relation`]),
//! - a placeholder resolved during planning ([`TableRef::This`],
//!   [`TableRef::Left`], [`TableRef::Right`]), or
//! - an indexed lookup ([`TableRef::Indexed`]): `table.ix(key).column` reads
//!   `column` from the row of `table` whose key is the value of `key`.
//!
//! ```ignore
//! use ironbeam_groupby::*;
//!
//! let total = reducers::sum(this("price") * this("qty"));
//! let ratio = reducers::sum(this("a")) / reducers::count();
//! let owner_of_oldest = TableRef::This.ix(reducers::argmax(this("age"))).col("owner");
//! ```

use crate::ids::RelationId;
use crate::reducers::ReducerKind;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

/// The relation a column reference is resolved against.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableRef {
    /// The relation the current method is called on.
    This,
    /// Left input of a join.
    Left,
    /// Right input of a join.
    Right,
    Relation(RelationId),
    /// Delayed lookup: the row of `table` keyed by the value of `key`.
    Indexed { table: Box<TableRef>, key: Box<Expr> },
}

impl TableRef {
    /// Reference a column of this table.
    pub fn col(&self, name: impl Into<String>) -> Expr {
        Expr::Column(ColumnRef { table: self.clone(), name: name.into() })
    }

    /// Indexed lookup into this table.
    pub fn ix(self, key: Expr) -> TableRef {
        TableRef::Indexed { table: Box::new(self), key: Box::new(key) }
    }

    /// Whether this is `this`, `left` or `right`.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, TableRef::This | TableRef::Left | TableRef::Right)
    }

    /// Whether this is an indexed lookup.
    pub fn is_indexed(&self) -> bool {
        matches!(self, TableRef::Indexed { .. })
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableRef::This => f.write_str("this"),
            TableRef::Left => f.write_str("left"),
            TableRef::Right => f.write_str("right"),
            TableRef::Relation(id) => write!(f, "{id}"),
            TableRef::Indexed { table, key } => write!(f, "{table}.ix({key})"),
        }
    }
}

/// A named column of a table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: TableRef,
    pub name: String,
}

impl ColumnRef {
    /// Wrap the reference in an expression.
    pub fn to_expr(&self) -> Expr {
        Expr::Column(self.clone())
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

/// Row-wise operators of composite nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    /// `if_else(cond, then, otherwise)`
    IfElse,
    MakeTuple,
    /// Row key derived from the argument values.
    MakePointer,
}

impl Op {
    fn symbol(&self) -> Option<&'static str> {
        Some(match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::FloorDiv => "//",
            Op::Mod => "%",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::And => "&",
            Op::Or => "|",
            _ => return None,
        })
    }
}

/// Expression tree over columns, literals, operators and reducers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    Apply { op: Op, args: Vec<Expr> },
    Reducer { kind: ReducerKind, args: Vec<Expr> },
    Count,
}

/// `this.<name>`
pub fn this(name: impl Into<String>) -> Expr {
    TableRef::This.col(name)
}

/// `left.<name>` (join contexts only)
pub fn left(name: impl Into<String>) -> Expr {
    TableRef::Left.col(name)
}

/// `right.<name>` (join contexts only)
pub fn right(name: impl Into<String>) -> Expr {
    TableRef::Right.col(name)
}

/// A literal value.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// `then` where `cond` holds, `otherwise` elsewhere.
pub fn if_else(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::Apply { op: Op::IfElse, args: vec![cond, then, otherwise] }
}

/// A tuple of the argument values.
pub fn make_tuple(args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Apply { op: Op::MakeTuple, args: args.into_iter().collect() }
}

/// A row key computed from `args`, matching the keys of grouped outputs.
pub fn pointer_from(args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Apply { op: Op::MakePointer, args: args.into_iter().collect() }
}

impl Expr {
    fn binary(self, op: Op, other: Expr) -> Expr {
        Expr::Apply { op, args: vec![self, other] }
    }

    /// `self == other`
    pub fn equals(self, other: Expr) -> Expr {
        self.binary(Op::Eq, other)
    }

    /// `self != other`
    pub fn not_equals(self, other: Expr) -> Expr {
        self.binary(Op::Ne, other)
    }

    /// `self < other`
    pub fn lt(self, other: Expr) -> Expr {
        self.binary(Op::Lt, other)
    }

    /// `self <= other`
    pub fn le(self, other: Expr) -> Expr {
        self.binary(Op::Le, other)
    }

    /// `self > other`
    pub fn gt(self, other: Expr) -> Expr {
        self.binary(Op::Gt, other)
    }

    /// `self >= other`
    pub fn ge(self, other: Expr) -> Expr {
        self.binary(Op::Ge, other)
    }

    /// Logical and.
    pub fn and(self, other: Expr) -> Expr {
        self.binary(Op::And, other)
    }

    /// Logical or.
    pub fn or(self, other: Expr) -> Expr {
        self.binary(Op::Or, other)
    }

    /// Logical negation.
    pub fn not(self) -> Expr {
        Expr::Apply { op: Op::Not, args: vec![self] }
    }

    /// Integer division, see [`Value::floor_div`].
    pub fn floor_div(self, other: Expr) -> Expr {
        self.binary(Op::FloorDiv, other)
    }

    /// The column reference this expression consists of, if any.
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Whether any reducer (including `count()`) occurs in the tree.
    pub fn contains_reducer(&self) -> bool {
        match self {
            Expr::Reducer { .. } | Expr::Count => true,
            Expr::Literal(_) => false,
            Expr::Apply { args, .. } => args.iter().any(Expr::contains_reducer),
            Expr::Column(c) => table_contains_reducer(&c.table),
        }
    }

    /// Column references evaluated outside of any reducer.
    ///
    /// References reached through an indexed lookup are not reported; the
    /// lookup key is traversed instead.
    pub fn dependencies_above_reducer(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_above(&mut out);
        out
    }

    fn collect_above<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => match &c.table {
                TableRef::Indexed { .. } => {
                    collect_table_keys(&c.table, &mut |key| key.collect_above(out))
                }
                _ => out.push(c),
            },
            Expr::Apply { args, .. } => args.iter().for_each(|a| a.collect_above(out)),
            Expr::Reducer { .. } | Expr::Count | Expr::Literal(_) => {}
        }
    }

    /// Column references evaluated row-wise as reducer arguments.
    ///
    /// Indexed lookups are traversed through their key like in
    /// [`dependencies_above_reducer`](Self::dependencies_above_reducer).
    pub fn dependencies_below_reducer(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_below(&mut out);
        out
    }

    fn collect_below<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => collect_table_keys(&c.table, &mut |key| key.collect_below(out)),
            Expr::Apply { args, .. } => args.iter().for_each(|a| a.collect_below(out)),
            Expr::Reducer { args, .. } => {
                for arg in args {
                    out.extend(arg.column_refs_rowwise());
                }
            }
            Expr::Count | Expr::Literal(_) => {}
        }
    }

    /// Every column reference a row-wise evaluation of this tree reads
    /// directly (indexed lookups contribute their keys).
    pub fn column_refs_rowwise(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_rowwise(&mut out);
        out
    }

    fn collect_rowwise<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => match &c.table {
                TableRef::Indexed { .. } => {
                    collect_table_keys(&c.table, &mut |key| key.collect_rowwise(out))
                }
                _ => out.push(c),
            },
            Expr::Apply { args, .. } | Expr::Reducer { args, .. } => {
                args.iter().for_each(|a| a.collect_rowwise(out))
            }
            Expr::Count | Expr::Literal(_) => {}
        }
    }

    /// Every column reference in the tree, including indexed ones and the
    /// references inside lookup keys.
    pub fn all_column_refs(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_all(&mut out);
        out
    }

    fn collect_all<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => {
                out.push(c);
                collect_table_keys(&c.table, &mut |key| key.collect_all(out));
            }
            Expr::Apply { args, .. } | Expr::Reducer { args, .. } => {
                args.iter().for_each(|a| a.collect_all(out))
            }
            Expr::Count | Expr::Literal(_) => {}
        }
    }

    /// First reducer nested inside another reducer's arguments, if any.
    pub fn nested_reducer(&self) -> Option<&Expr> {
        match self {
            Expr::Reducer { args, .. } => args.iter().find(|a| a.contains_reducer()),
            Expr::Apply { args, .. } => args.iter().find_map(Expr::nested_reducer),
            Expr::Column(c) => {
                let mut found = None;
                collect_table_keys(&c.table, &mut |key| {
                    if found.is_none() {
                        found = key.nested_reducer();
                    }
                });
                found
            }
            Expr::Count | Expr::Literal(_) => None,
        }
    }

    /// Rebuild the tree, replacing every column reference by `f(column)`.
    ///
    /// Lookup keys of indexed references are rewritten before `f` sees the
    /// reference.
    pub fn try_map_columns<E>(
        &self,
        f: &mut dyn FnMut(ColumnRef) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        Ok(match self {
            Expr::Column(c) => {
                let table = map_table_keys(&c.table, &mut *f)?;
                f(ColumnRef { table, name: c.name.clone() })?
            }
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::Apply { op, args } => Expr::Apply {
                op: *op,
                args: args.iter().map(|a| a.try_map_columns(&mut *f)).collect::<Result<_, _>>()?,
            },
            Expr::Reducer { kind, args } => Expr::Reducer {
                kind: *kind,
                args: args.iter().map(|a| a.try_map_columns(&mut *f)).collect::<Result<_, _>>()?,
            },
            Expr::Count => Expr::Count,
        })
    }
}

fn table_contains_reducer(table: &TableRef) -> bool {
    match table {
        TableRef::Indexed { table, key } => key.contains_reducer() || table_contains_reducer(table),
        _ => false,
    }
}

fn collect_table_keys<'a>(table: &'a TableRef, visit: &mut dyn FnMut(&'a Expr)) {
    if let TableRef::Indexed { table, key } = table {
        visit(key);
        collect_table_keys(table, visit);
    }
}

fn map_table_keys<E>(
    table: &TableRef,
    f: &mut dyn FnMut(ColumnRef) -> Result<Expr, E>,
) -> Result<TableRef, E> {
    Ok(match table {
        TableRef::Indexed { table, key } => TableRef::Indexed {
            table: Box::new(map_table_keys(table, &mut *f)?),
            key: Box::new(key.try_map_columns(&mut *f)?),
        },
        other => other.clone(),
    })
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Count => f.write_str("count()"),
            Expr::Reducer { kind, args } => {
                write!(f, "{kind}(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Expr::Apply { op, args } => match (op.symbol(), args.as_slice()) {
                (Some(sym), [a, b]) => write!(f, "({a} {sym} {b})"),
                (_, [a]) if *op == Op::Neg => write!(f, "(-{a})"),
                (_, [a]) if *op == Op::Not => write!(f, "(~{a})"),
                _ => {
                    let name = match op {
                        Op::IfElse => "if_else",
                        Op::MakeTuple => "make_tuple",
                        Op::MakePointer => "pointer_from",
                        other => return write!(f, "{other:?}({})", DisplayArgs(args)),
                    };
                    write!(f, "{name}({})", DisplayArgs(args))
                }
            },
        }
    }
}

struct DisplayArgs<'a>(&'a [Expr]);

impl fmt::Display for DisplayArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_args(f, self.0)
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                self.binary($op, rhs)
            }
        }
    };
}

binary_operator!(Add, add, Op::Add);
binary_operator!(Sub, sub, Op::Sub);
binary_operator!(Mul, mul, Op::Mul);
binary_operator!(Div, div, Op::Div);
binary_operator!(Rem, rem, Op::Mod);

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Apply { op: Op::Neg, args: vec![self] }
    }
}
