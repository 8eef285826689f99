//! Guard conditions on interstate edges.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use snafu::OptionExt;

use crate::error::*;
use crate::expr::{Bindings, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    /// Operators ordered so that two-character spellings are tried first.
    const SPELLINGS: [(&'static str, CmpOp); 6] = [
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("==", CmpOp::Eq),
        ("!=", CmpOp::Ne),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }

    /// Logical complement: `!(a op b) == a op.negate() b`.
    pub fn negate(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
        }
    }

    /// Operand swap: `a op b == b op.flip() a`.
    pub fn flip(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            op => op,
        }
    }

    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
        }
    }
}

/// Condition attached to an interstate edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Condition {
    #[default]
    Always,
    Never,
    Compare { lhs: Expr, op: CmpOp, rhs: Expr },
}

impl Condition {
    pub fn compare(lhs: impl Into<Expr>, op: CmpOp, rhs: impl Into<Expr>) -> Self {
        Condition::Compare { lhs: lhs.into(), op, rhs: rhs.into() }
    }

    /// Parse `"<lhs> <op> <rhs>"`, `"true"` or `"false"`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        match trimmed {
            "true" | "1" => return Ok(Condition::Always),
            "false" | "0" => return Ok(Condition::Never),
            _ => {}
        }
        let (at, spelling, op) = Self::find_operator(trimmed).context(ConditionParseSnafu { input })?;
        let lhs = Expr::parse(&trimmed[..at])?;
        let rhs = Expr::parse(&trimmed[at + spelling.len()..])?;
        Ok(Condition::Compare { lhs, op, rhs })
    }

    fn find_operator(text: &str) -> Option<(usize, &'static str, CmpOp)> {
        let mut depth = 0i32;
        for (i, c) in text.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ if depth == 0 => {
                    let rest = &text[i..];
                    if let Some((spelling, op)) = CmpOp::SPELLINGS.iter().find(|(s, _)| rest.starts_with(s)) {
                        return Some((i, *spelling, *op));
                    }
                }
                _ => {}
            }
        }
        None
    }

    pub fn negate(&self) -> Self {
        match self {
            Condition::Always => Condition::Never,
            Condition::Never => Condition::Always,
            Condition::Compare { lhs, op, rhs } => {
                Condition::Compare { lhs: lhs.clone(), op: op.negate(), rhs: rhs.clone() }
            }
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Condition::Always)
    }

    pub fn eval(&self, bindings: &Bindings) -> Result<bool> {
        match self {
            Condition::Always => Ok(true),
            Condition::Never => Ok(false),
            Condition::Compare { lhs, op, rhs } => Ok(op.holds(lhs.eval(bindings)?, rhs.eval(bindings)?)),
        }
    }

    pub fn subs(&self, name: &str, value: &Expr) -> Self {
        match self {
            Condition::Compare { lhs, op, rhs } => {
                Condition::Compare { lhs: lhs.subs(name, value), op: *op, rhs: rhs.subs(name, value) }
            }
            other => other.clone(),
        }
    }

    pub fn subs_all(&self, mapping: &BTreeMap<String, Expr>) -> Self {
        match self {
            Condition::Compare { lhs, op, rhs } => {
                Condition::Compare { lhs: lhs.subs_all(mapping), op: *op, rhs: rhs.subs_all(mapping) }
            }
            other => other.clone(),
        }
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        match self {
            Condition::Compare { lhs, rhs, .. } => {
                let mut out = lhs.free_symbols();
                out.extend(rhs.free_symbols());
                out
            }
            _ => BTreeSet::new(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => write!(f, "true"),
            Condition::Never => write!(f, "false"),
            Condition::Compare { lhs, op, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol()),
        }
    }
}

impl std::str::FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Condition::parse(s)
    }
}
