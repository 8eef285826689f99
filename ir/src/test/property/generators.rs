//! Generators for property-based testing.
//!
//! Expressions are generated as an uncanonicalised [`RawExpr`] tree so that
//! properties can compare the canonical [`Expr`] against a direct evaluation.

use proptest::prelude::*;

use crate::expr::{Bindings, Expr, floor_div, floor_mod};

/// Symbols used by generated expressions.
pub const SYMBOLS: [&str; 4] = ["i", "j", "k", "K"];

/// Expression tree built without any simplification.
#[derive(Debug, Clone)]
pub enum RawExpr {
    Int(i64),
    Sym(&'static str),
    Add(Box<RawExpr>, Box<RawExpr>),
    Sub(Box<RawExpr>, Box<RawExpr>),
    Scale(i64, Box<RawExpr>),
    Mul(Box<RawExpr>, Box<RawExpr>),
    Div(Box<RawExpr>, i64),
    Mod(Box<RawExpr>, i64),
    Min(Box<RawExpr>, Box<RawExpr>),
    Max(Box<RawExpr>, Box<RawExpr>),
}

impl RawExpr {
    /// Build through the canonicalising constructors.
    pub fn build(&self) -> Expr {
        match self {
            RawExpr::Int(v) => Expr::int(*v),
            RawExpr::Sym(s) => Expr::sym(*s),
            RawExpr::Add(a, b) => a.build() + b.build(),
            RawExpr::Sub(a, b) => a.build() - b.build(),
            RawExpr::Scale(c, a) => a.build() * *c,
            RawExpr::Mul(a, b) => a.build() * b.build(),
            RawExpr::Div(a, d) => Expr::floor_div(a.build(), Expr::int(*d)),
            RawExpr::Mod(a, d) => Expr::modulo(a.build(), Expr::int(*d)),
            RawExpr::Min(a, b) => Expr::min(a.build(), b.build()),
            RawExpr::Max(a, b) => Expr::max(a.build(), b.build()),
        }
    }

    /// Evaluate directly; every symbol must be bound.
    pub fn eval(&self, bindings: &Bindings) -> i64 {
        match self {
            RawExpr::Int(v) => *v,
            RawExpr::Sym(s) => bindings[*s],
            RawExpr::Add(a, b) => a.eval(bindings) + b.eval(bindings),
            RawExpr::Sub(a, b) => a.eval(bindings) - b.eval(bindings),
            RawExpr::Scale(c, a) => c * a.eval(bindings),
            RawExpr::Mul(a, b) => a.eval(bindings) * b.eval(bindings),
            RawExpr::Div(a, d) => floor_div(a.eval(bindings), *d),
            RawExpr::Mod(a, d) => floor_mod(a.eval(bindings), *d),
            RawExpr::Min(a, b) => a.eval(bindings).min(b.eval(bindings)),
            RawExpr::Max(a, b) => a.eval(bindings).max(b.eval(bindings)),
        }
    }
}

pub fn arb_symbol() -> impl Strategy<Value = &'static str> {
    prop::sample::select(SYMBOLS.to_vec())
}

/// Small raw expressions over [`SYMBOLS`].
pub fn arb_raw_expr() -> impl Strategy<Value = RawExpr> {
    let leaf = prop_oneof![(-8i64..=8).prop_map(RawExpr::Int), arb_symbol().prop_map(RawExpr::Sym)];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| RawExpr::Add(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| RawExpr::Sub(Box::new(a), Box::new(b))),
            (-3i64..=3, inner.clone()).prop_map(|(c, a)| RawExpr::Scale(c, Box::new(a))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| RawExpr::Mul(Box::new(a), Box::new(b))),
            (inner.clone(), 1i64..=4).prop_map(|(a, d)| RawExpr::Div(Box::new(a), d)),
            (inner.clone(), 1i64..=4).prop_map(|(a, d)| RawExpr::Mod(Box::new(a), d)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| RawExpr::Min(Box::new(a), Box::new(b))),
            (inner.clone(), inner).prop_map(|(a, b)| RawExpr::Max(Box::new(a), Box::new(b))),
        ]
    })
}

/// Bindings for every symbol in [`SYMBOLS`].
pub fn arb_bindings() -> impl Strategy<Value = Bindings> {
    prop::collection::vec(-20i64..=20, SYMBOLS.len())
        .prop_map(|values| SYMBOLS.iter().map(|s| s.to_string()).zip(values).collect())
}

/// Sets of distinct constant offsets, as seen by sliding-window accesses.
pub fn arb_offsets() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(-4i64..=4, 1..=5).prop_map(|s| s.into_iter().collect())
}
