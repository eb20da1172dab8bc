//! Syntax tree for Device Tree Source files.
//!
//! All string data borrows from the source text; the tree is cheap to build
//! and is consumed immediately by whoever links it into a device tree.

use std::fmt;

/// A parsed DTS file, with top-level items in document order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dts<'s> {
    pub version: Option<DtsVersion>,
    pub memreserves: Vec<(u64, u64)>,
    pub items: Vec<TopLevel<'s>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtsVersion {
    V1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopLevel<'s> {
    /// A `/ { ... };` block. Several may appear; they merge in order.
    Root(Node<'s>),
    /// A `&label { ... };` or `&{/path} { ... };` override block.
    Override(Node<'s>),
    /// A top-level `/delete-node/ &label;` or `/delete-node/ name;`.
    DeleteNode(NodeId<'s>),
    /// An `/include/` or `#include` directive that survived to the AST.
    Include(Include<'s>),
    /// A top-level `/omit-if-no-ref/ <node>;` directive.
    OmitIfNoRef(NodeId<'s>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Include<'s> {
    /// `/include/ "file"`
    Dts(&'s str),
    /// `#include "file"` or `#include <file>`
    C(&'s str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<'s> {
    pub id: NodeId<'s>,
    pub labels: Vec<&'s str>,
    pub omit_if_no_ref: bool,
    /// Properties, children, includes and deletions, interleaved in the
    /// order they were written. Merging is order-sensitive.
    pub items: Vec<NodeItem<'s>>,
}

impl<'s> Default for Node<'s> {
    fn default() -> Self {
        Self {
            id: NodeId::Name("", None),
            labels: Vec::new(),
            omit_if_no_ref: false,
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeItem<'s> {
    Property(Property<'s>),
    Child(Node<'s>),
    Include(Include<'s>),
    DeleteProperty(&'s str),
    DeleteNode(NodeId<'s>),
}

/// How a node is designated: by name (with optional unit address) or by
/// reference to a label or full path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeId<'s> {
    Name(&'s str, Option<&'s str>),
    Ref(Reference<'s>),
}

/// A `&label` or `&{/full/path}` reference token, without the `&`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'s>(pub &'s str);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property<'s> {
    pub name: &'s str,
    /// `None` for presence-only properties (`foo;`).
    pub values: Option<Vec<Value<'s>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'s> {
    /// A string literal, still carrying its source-level escapes.
    String(&'s str),
    /// A value-level reference (`prop = &label;`).
    Ref(Reference<'s>),
    /// A `[ aa bb ... ]` byte string.
    Bytes(Vec<u8>),
    /// A `< ... >` cell array; `bits` is 32 unless a `/bits/` prefix says
    /// otherwise (8, 16, 32 or 64).
    Cells(u32, Vec<Cell<'s>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell<'s> {
    Ref(Reference<'s>),
    Expr(Expression),
}

/// An integer expression appearing inside a cell array.
///
/// Bare literals are allowed in cell position; anything more complex must be
/// parenthesized, as in dtc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Lit(i64),
    Unary(UnaryOp, Box<Expression>),
    Binary(Box<Expression>, BinaryOp, Box<Expression>),
    Ternary {
        cond: Box<Expression>,
        then: Box<Expression>,
        else_: Box<Expression>,
    },
}

/// Raised by [`Expression::eval`] when a division or modulo by zero occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalError;

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("division by zero in integer expression")
    }
}

impl std::error::Error for EvalError {}

impl Expression {
    /// Evaluate the expression with C semantics on 64-bit integers.
    ///
    /// Arithmetic wraps; shift counts are taken modulo 64.
    pub fn eval(&self) -> Result<i64, EvalError> {
        match self {
            Expression::Lit(n) => Ok(*n),
            Expression::Unary(op, e) => op.eval(e.eval()?),
            Expression::Binary(lhs, op, rhs) => op.eval(lhs.eval()?, rhs.eval()?),
            Expression::Ternary { cond, then, else_ } => {
                if cond.eval()? != 0 {
                    then.eval()
                } else {
                    else_.eval()
                }
            }
        }
    }

    pub(crate) fn unary(op: UnaryOp, e: Expression) -> Self {
        Expression::Unary(op, Box::new(e))
    }

    pub(crate) fn binary(lhs: Expression, op: BinaryOp, rhs: Expression) -> Self {
        Expression::Binary(Box::new(lhs), op, Box::new(rhs))
    }
}

impl From<i64> for Expression {
    fn from(n: i64) -> Self {
        Expression::Lit(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    BitNot,
    LogicalNot,
}

impl UnaryOp {
    fn eval(&self, e: i64) -> Result<i64, EvalError> {
        Ok(match self {
            UnaryOp::Neg => e.wrapping_neg(),
            UnaryOp::BitNot => !e,
            UnaryOp::LogicalNot => (e == 0) as i64,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LShift,
    RShift,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Neq,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    fn eval(&self, l: i64, r: i64) -> Result<i64, EvalError> {
        Ok(match self {
            BinaryOp::Add => l.wrapping_add(r),
            BinaryOp::Sub => l.wrapping_sub(r),
            BinaryOp::Mul => l.wrapping_mul(r),
            BinaryOp::Div => l.checked_div(r).ok_or(EvalError)?,
            BinaryOp::Mod => l.checked_rem(r).ok_or(EvalError)?,
            BinaryOp::LShift => l.wrapping_shl(r as u32),
            BinaryOp::RShift => l.wrapping_shr(r as u32),
            BinaryOp::Lt => (l < r) as i64,
            BinaryOp::Gt => (l > r) as i64,
            BinaryOp::Le => (l <= r) as i64,
            BinaryOp::Ge => (l >= r) as i64,
            BinaryOp::Eq => (l == r) as i64,
            BinaryOp::Neq => (l != r) as i64,
            BinaryOp::BitAnd => l & r,
            BinaryOp::BitXor => l ^ r,
            BinaryOp::BitOr => l | r,
            BinaryOp::And => (l != 0 && r != 0) as i64,
            BinaryOp::Or => (l != 0 || r != 0) as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BinaryOp::*;
    use UnaryOp::*;

    #[test]
    fn eval_literals_and_unary() {
        for (expr, expected) in [
            (Expression::Lit(42), 42),
            (Expression::unary(Neg, 1.into()), -1),
            (Expression::unary(BitNot, 0xf.into()), !0xf),
            (
                Expression::unary(LogicalNot, Expression::unary(LogicalNot, 0.into())),
                0,
            ),
        ] {
            assert_eq!(expr.eval(), Ok(expected));
        }
    }

    #[test]
    fn eval_binary_ops() {
        for (expr, expected) in [
            (Expression::binary(1.into(), Add, 1.into()), 2),
            (Expression::binary(5.into(), LShift, 1.into()), 10),
            (Expression::binary(1.into(), Le, 2.into()), 1),
            (Expression::binary(7.into(), BitAnd, 3.into()), 3),
            (Expression::binary(0.into(), Or, 2.into()), 1),
        ] {
            assert_eq!(expr.eval(), Ok(expected));
        }
    }

    #[test]
    fn eval_division_by_zero_is_an_error() {
        assert_eq!(
            Expression::binary(1.into(), Div, 0.into()).eval(),
            Err(EvalError)
        );
        assert_eq!(
            Expression::binary(1.into(), Mod, 0.into()).eval(),
            Err(EvalError)
        );
    }

    #[test]
    fn eval_ternary() {
        let expr = Expression::Ternary {
            cond: Box::new(Expression::binary(2.into(), Neq, 0.into())),
            then: Box::new(Expression::binary(5.into(), LShift, 1.into())),
            else_: Box::new(Expression::unary(BitNot, 0.into())),
        };
        assert_eq!(expr.eval(), Ok(10));
    }
}
