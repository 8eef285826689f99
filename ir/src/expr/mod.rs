//! Symbolic integer expressions.
//!
//! Shapes, subset bounds, loop bounds and interstate assignments are all
//! [`Expr`]s. Every constructor returns a canonical form, so structural
//! equality doubles as (conservative) semantic equality:
//!
//! - sums are flattened into a linear form `c0 + c1*t1 + c2*t2 + ...` with the
//!   non-linear terms `ti` sorted and the constant last;
//! - constant sub-expressions are folded (`min`, `max`, floor division and
//!   modulo follow floor semantics);
//! - `min`/`max` of two expressions whose difference is constant collapse to
//!   the smaller/larger operand.
//!
//! Folding is skipped when a coefficient or constant would leave the `i64`
//! range; the operation is then kept as written and [`Expr::eval`] reports the
//! overflow.
//!
//! ```rust
//! # use strata_ir::Expr;
//! let k = Expr::sym("k");
//! let e = (k.clone() + 1) - (k.clone() - 2);
//! assert_eq!(e.as_int(), Some(3));
//! assert_eq!(Expr::min(k.clone() - 1, k.clone() + 1), k - 1);
//! ```

mod parse;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use snafu::OptionExt;

use crate::error::*;

/// Symbol bindings used by [`Expr::eval`].
pub type Bindings = HashMap<String, i64>;

/// A canonical symbolic integer expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expr {
    Int(i64),
    Sym(String),
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    /// Floor division.
    Div(Box<Expr>, Box<Expr>),
    /// Modulo with the sign of the divisor.
    Mod(Box<Expr>, Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
}

/// Floor division on integers.
pub fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q }
}

/// Modulo whose result takes the sign of the divisor.
pub fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
}

/// Linear view of a canonical expression: `constant + sum(coeff * term)`.
#[derive(Debug, Clone, Default)]
struct Linear {
    terms: BTreeMap<Expr, i64>,
    constant: i64,
}

impl Linear {
    /// `None` when a coefficient overflows.
    fn of(expr: &Expr) -> Option<Self> {
        let mut linear = Linear::default();
        linear.accumulate(expr, 1)?;
        Some(linear)
    }

    fn accumulate(&mut self, expr: &Expr, scale: i64) -> Option<()> {
        match expr {
            Expr::Int(v) => self.constant = self.constant.checked_add(scale.checked_mul(*v)?)?,
            Expr::Add(a, b) => {
                self.accumulate(a, scale)?;
                self.accumulate(b, scale)?;
            }
            Expr::Mul(a, b) => match **a {
                Expr::Int(c) => self.accumulate(b, scale.checked_mul(c)?)?,
                _ => self.add_term(expr, scale)?,
            },
            term => self.add_term(term, scale)?,
        }
        Some(())
    }

    fn add_term(&mut self, term: &Expr, coeff: i64) -> Option<()> {
        let entry = self.terms.entry(term.clone()).or_insert(0);
        *entry = entry.checked_add(coeff)?;
        Some(())
    }

    fn scale(mut self, by: i64) -> Option<Self> {
        self.constant = self.constant.checked_mul(by)?;
        for coeff in self.terms.values_mut() {
            *coeff = coeff.checked_mul(by)?;
        }
        Some(self)
    }

    fn merge(mut self, other: Linear) -> Option<Self> {
        self.constant = self.constant.checked_add(other.constant)?;
        for (term, coeff) in other.terms {
            self.add_term(&term, coeff)?;
        }
        Some(self)
    }

    /// Divide every coefficient by `d`, if all of them are multiples of it.
    fn exact_div(self, d: i64) -> Option<Self> {
        let div = |c: i64| c.checked_rem(d).filter(|r| *r == 0).and_then(|_| c.checked_div(d));
        let terms: BTreeMap<Expr, i64> =
            self.terms.into_iter().map(|(t, c)| Some((t, div(c)?))).collect::<Option<_>>()?;
        Some(Linear { terms, constant: div(self.constant)? })
    }

    fn into_expr(self) -> Expr {
        let mut acc: Option<Expr> = None;
        for (term, coeff) in self.terms {
            let part = match coeff {
                0 => continue,
                1 => term,
                c => Expr::Mul(Box::new(Expr::Int(c)), Box::new(term)),
            };
            acc = Some(match acc {
                None => part,
                Some(prev) => Expr::Add(Box::new(prev), Box::new(part)),
            });
        }
        match acc {
            None => Expr::Int(self.constant),
            Some(e) if self.constant == 0 => e,
            Some(e) => Expr::Add(Box::new(e), Box::new(Expr::Int(self.constant))),
        }
    }
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Int(value)
    }

    pub fn sym(name: impl Into<String>) -> Self {
        Expr::Sym(name.into())
    }

    /// Parse an expression from text, e.g. `"min(8, I - tile_i) + 1"`.
    ///
    /// `/` is floor division and `%` is floor modulo.
    pub fn parse(input: &str) -> Result<Self> {
        parse::parse_expr(input)
    }

    pub fn add(a: Expr, b: Expr) -> Expr {
        match Linear::of(&a).zip(Linear::of(&b)).and_then(|(x, y)| x.merge(y)) {
            Some(sum) => sum.into_expr(),
            None => Expr::Add(Box::new(a), Box::new(b)),
        }
    }

    pub fn mul(a: Expr, b: Expr) -> Expr {
        let folded = match (&a, &b) {
            (Expr::Int(x), _) => Linear::of(&b).and_then(|l| l.scale(*x)),
            (_, Expr::Int(y)) => Linear::of(&a).and_then(|l| l.scale(*y)),
            _ => None,
        };
        match folded {
            Some(product) => product.into_expr(),
            None if a <= b => Expr::Mul(Box::new(a), Box::new(b)),
            None => Expr::Mul(Box::new(b), Box::new(a)),
        }
    }

    pub fn floor_div(a: Expr, b: Expr) -> Expr {
        match (&a, &b) {
            (_, Expr::Int(1)) => a,
            (Expr::Int(x), Expr::Int(y)) if x.checked_div(*y).is_some() => Expr::Int(floor_div(*x, *y)),
            (_, Expr::Int(d)) if *d != 0 => match Linear::of(&a).and_then(|l| l.exact_div(*d)) {
                Some(quotient) => quotient.into_expr(),
                None => Expr::Div(Box::new(a), Box::new(b)),
            },
            _ => Expr::Div(Box::new(a), Box::new(b)),
        }
    }

    pub fn modulo(a: Expr, b: Expr) -> Expr {
        match (&a, &b) {
            (_, Expr::Int(1 | -1)) => Expr::Int(0),
            (Expr::Int(x), Expr::Int(y)) if *y != 0 => Expr::Int(floor_mod(*x, *y)),
            (_, Expr::Int(d)) if *d != 0 => {
                let Some(Linear { terms, constant }) = Linear::of(&a) else {
                    return Expr::Mod(Box::new(a), Box::new(b));
                };
                // Integer multiples of the divisor do not change the residue.
                let terms = terms.into_iter().map(|(t, c)| (t, floor_mod(c, *d))).collect();
                match (Linear { terms, constant: floor_mod(constant, *d) }).into_expr() {
                    Expr::Int(v) => Expr::Int(v),
                    reduced => Expr::Mod(Box::new(reduced), Box::new(b)),
                }
            }
            _ => Expr::Mod(Box::new(a), Box::new(b)),
        }
    }

    pub fn min(a: Expr, b: Expr) -> Expr {
        match a.const_diff(&b) {
            Some(d) if d <= 0 => a,
            Some(_) => b,
            None if a <= b => Expr::Min(Box::new(a), Box::new(b)),
            None => Expr::Min(Box::new(b), Box::new(a)),
        }
    }

    pub fn max(a: Expr, b: Expr) -> Expr {
        match a.const_diff(&b) {
            Some(d) if d >= 0 => a,
            Some(_) => b,
            None if a <= b => Expr::Max(Box::new(a), Box::new(b)),
            None => Expr::Max(Box::new(b), Box::new(a)),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Constant value or a [`Error::NonConstant`] naming the expression.
    pub fn expect_int(&self) -> Result<i64> {
        self.as_int().context(NonConstantSnafu { expr: self.to_string() })
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Expr::Int(_))
    }

    /// `self - other` when that difference folds to a constant.
    pub fn const_diff(&self, other: &Expr) -> Option<i64> {
        (self.clone() - other.clone()).as_int()
    }

    /// Constant `c` such that `self == symbol + c`.
    pub fn offset_from(&self, symbol: &str) -> Option<i64> {
        self.const_diff(&Expr::sym(symbol))
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Int(_) => {}
            Expr::Sym(s) => {
                out.insert(s.clone());
            }
            Expr::Add(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Mod(a, b)
            | Expr::Min(a, b)
            | Expr::Max(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        match self {
            Expr::Int(_) => false,
            Expr::Sym(s) => s == name,
            Expr::Add(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Mod(a, b)
            | Expr::Min(a, b)
            | Expr::Max(a, b) => a.contains_symbol(name) || b.contains_symbol(name),
        }
    }

    /// Replace every occurrence of `name` by `value` and re-canonicalise.
    pub fn subs(&self, name: &str, value: &Expr) -> Expr {
        self.rebuild(&|s| (s == name).then(|| value.clone()))
    }

    /// Simultaneous substitution of several symbols.
    pub fn subs_all(&self, mapping: &BTreeMap<String, Expr>) -> Expr {
        if mapping.is_empty() {
            return self.clone();
        }
        self.rebuild(&|s| mapping.get(s).cloned())
    }

    fn rebuild(&self, leaf: &impl Fn(&str) -> Option<Expr>) -> Expr {
        match self {
            Expr::Int(v) => Expr::Int(*v),
            Expr::Sym(s) => leaf(s).unwrap_or_else(|| self.clone()),
            Expr::Add(a, b) => Expr::add(a.rebuild(leaf), b.rebuild(leaf)),
            Expr::Mul(a, b) => Expr::mul(a.rebuild(leaf), b.rebuild(leaf)),
            Expr::Div(a, b) => Expr::floor_div(a.rebuild(leaf), b.rebuild(leaf)),
            Expr::Mod(a, b) => Expr::modulo(a.rebuild(leaf), b.rebuild(leaf)),
            Expr::Min(a, b) => Expr::min(a.rebuild(leaf), b.rebuild(leaf)),
            Expr::Max(a, b) => Expr::max(a.rebuild(leaf), b.rebuild(leaf)),
        }
    }

    /// Evaluate under concrete symbol bindings.
    pub fn eval(&self, bindings: &Bindings) -> Result<i64> {
        Ok(match self {
            Expr::Int(v) => *v,
            Expr::Sym(s) => *bindings.get(s).context(UnboundSymbolSnafu { name: s.clone() })?,
            Expr::Add(a, b) => {
                a.eval(bindings)?.checked_add(b.eval(bindings)?).context(OverflowSnafu { expr: self.to_string() })?
            }
            Expr::Mul(a, b) => {
                a.eval(bindings)?.checked_mul(b.eval(bindings)?).context(OverflowSnafu { expr: self.to_string() })?
            }
            Expr::Div(a, b) | Expr::Mod(a, b) => {
                let (x, y) = (a.eval(bindings)?, b.eval(bindings)?);
                snafu::ensure!(y != 0, DivisionByZeroSnafu { expr: self.to_string() });
                snafu::ensure!(x.checked_div(y).is_some(), OverflowSnafu { expr: self.to_string() });
                if matches!(self, Expr::Div(..)) { floor_div(x, y) } else { floor_mod(x, y) }
            }
            Expr::Min(a, b) => a.eval(bindings)?.min(b.eval(bindings)?),
            Expr::Max(a, b) => a.eval(bindings)?.max(b.eval(bindings)?),
        })
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(..) => 1,
            Expr::Mul(..) | Expr::Div(..) | Expr::Mod(..) => 2,
            Expr::Int(v) if *v < 0 => 2,
            _ => 3,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        if self.precedence() < min_precedence { write!(f, "({self})") } else { write!(f, "{self}") }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Sym(s) => write!(f, "{s}"),
            Expr::Add(a, b) => {
                write!(f, "{a}")?;
                match &**b {
                    Expr::Int(v) if *v < 0 => write!(f, " - {}", v.unsigned_abs()),
                    Expr::Mul(c, t) => match **c {
                        Expr::Int(-1) => {
                            write!(f, " - ")?;
                            t.fmt_operand(f, 3)
                        }
                        Expr::Int(v) if v < 0 => {
                            write!(f, " - {}*", v.unsigned_abs())?;
                            t.fmt_operand(f, 3)
                        }
                        _ => write!(f, " + {b}"),
                    },
                    other => write!(f, " + {other}"),
                }
            }
            Expr::Mul(a, b) => {
                a.fmt_operand(f, 2)?;
                write!(f, "*")?;
                b.fmt_operand(f, 3)
            }
            Expr::Div(a, b) | Expr::Mod(a, b) => {
                a.fmt_operand(f, 2)?;
                write!(f, "{}", if matches!(self, Expr::Div(..)) { "/" } else { "%" })?;
                b.fmt_operand(f, 3)
            }
            Expr::Min(a, b) => write!(f, "min({a}, {b})"),
            Expr::Max(a, b) => write!(f, "max({a}, {b})"),
        }
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Int(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::Int(value.into())
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::sym(name)
    }
}

macro_rules! impl_expr_ops {
    ($(($Trait:ident, $method:ident, $ctor:expr)),* $(,)?) => {
        $(
            impl $Trait for Expr {
                type Output = Expr;
                fn $method(self, rhs: Expr) -> Expr {
                    ($ctor)(self, rhs)
                }
            }

            impl $Trait<i64> for Expr {
                type Output = Expr;
                fn $method(self, rhs: i64) -> Expr {
                    ($ctor)(self, Expr::Int(rhs))
                }
            }

            impl $Trait<&Expr> for &Expr {
                type Output = Expr;
                fn $method(self, rhs: &Expr) -> Expr {
                    ($ctor)(self.clone(), rhs.clone())
                }
            }
        )*
    };
}

impl_expr_ops![
    (Add, add, Expr::add),
    (Sub, sub, |a: Expr, b: Expr| Expr::add(a, Expr::mul(Expr::Int(-1), b))),
    (Mul, mul, Expr::mul),
];

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::mul(Expr::Int(-1), self)
    }
}
