//! Index subsets moved by memlets.
//!
//! A [`Subset`] is one [`Range`] per array dimension. Ranges are inclusive on
//! both ends, so a single index `i` is the range `i:i`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use smallvec::SmallVec;

use crate::error::*;
use crate::expr::Expr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub begin: Expr,
    /// Inclusive.
    pub end: Expr,
    pub step: Expr,
}

impl Range {
    pub fn new(begin: impl Into<Expr>, end: impl Into<Expr>, step: impl Into<Expr>) -> Self {
        Self { begin: begin.into(), end: end.into(), step: step.into() }
    }

    /// Single element `index:index`.
    pub fn index(index: impl Into<Expr>) -> Self {
        let index = index.into();
        Self { begin: index.clone(), end: index, step: Expr::Int(1) }
    }

    /// `0:extent-1`.
    pub fn full(extent: &Expr) -> Self {
        Self::new(0, extent.clone() - 1, 1)
    }

    pub fn is_index(&self) -> bool {
        self.begin == self.end
    }

    /// Number of elements covered.
    pub fn extent(&self) -> Expr {
        Expr::floor_div(self.end.clone() - self.begin.clone(), self.step.clone()) + 1
    }

    pub fn offset(&self, by: &Expr) -> Self {
        Self { begin: &self.begin + by, end: &self.end + by, step: self.step.clone() }
    }

    pub fn subs(&self, name: &str, value: &Expr) -> Self {
        Self { begin: self.begin.subs(name, value), end: self.end.subs(name, value), step: self.step.subs(name, value) }
    }

    pub fn subs_all(&self, mapping: &BTreeMap<String, Expr>) -> Self {
        Self { begin: self.begin.subs_all(mapping), end: self.end.subs_all(mapping), step: self.step.subs_all(mapping) }
    }

    /// Smallest range covering both operands.
    pub fn union(&self, other: &Range) -> Self {
        let step = if self.step == other.step { self.step.clone() } else { Expr::Int(1) };
        Self {
            begin: Expr::min(self.begin.clone(), other.begin.clone()),
            end: Expr::max(self.end.clone(), other.end.clone()),
            step,
        }
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        self.begin.contains_symbol(name) || self.end.contains_symbol(name) || self.step.contains_symbol(name)
    }

    fn constant_bounds(&self) -> Option<(i64, i64)> {
        Some((self.begin.as_int()?, self.end.as_int()?))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_index() {
            return write!(f, "{}", self.begin);
        }
        write!(f, "{}:{}", self.begin, self.end)?;
        if self.step != Expr::Int(1) {
            write!(f, ":{}", self.step)?;
        }
        Ok(())
    }
}

/// Per-dimension ranges addressed by a memlet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Subset(pub SmallVec<[Range; 4]>);

impl Subset {
    pub fn new(ranges: impl IntoIterator<Item = Range>) -> Self {
        Self(ranges.into_iter().collect())
    }

    /// Every element of an array with the given shape.
    pub fn full(shape: &[Expr]) -> Self {
        Self(shape.iter().map(Range::full).collect())
    }

    /// A single element.
    pub fn index<I, E>(indices: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        Self(indices.into_iter().map(Range::index).collect())
    }

    /// The only element of a scalar (`[0]`).
    pub fn scalar() -> Self {
        Self::index([0])
    }

    /// Parse a comma-separated list of `begin[:end[:step]]` ranges.
    pub fn parse(input: &str) -> Result<Self> {
        split_top_level(input, ',')
            .into_iter()
            .map(|dim| {
                let parts = split_top_level(dim, ':');
                Ok(match parts.as_slice() {
                    [index] => Range::index(Expr::parse(index)?),
                    [begin, end] => Range::new(Expr::parse(begin)?, Expr::parse(end)?, 1),
                    [begin, end, step] => Range::new(Expr::parse(begin)?, Expr::parse(end)?, Expr::parse(step)?),
                    _ => {
                        return ExprParseSnafu { input, offset: 0usize, reason: "too many `:` in range" }.fail();
                    }
                })
            })
            .collect::<Result<SmallVec<_>>>()
            .map(Self)
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.0
    }

    pub fn dim(&self, dim: usize) -> Option<&Range> {
        self.0.get(dim)
    }

    pub fn dim_mut(&mut self, dim: usize) -> Option<&mut Range> {
        self.0.get_mut(dim)
    }

    /// Per-dimension element counts.
    pub fn extents(&self) -> SmallVec<[Expr; 4]> {
        self.0.iter().map(Range::extent).collect()
    }

    pub fn is_index(&self) -> bool {
        self.0.iter().all(Range::is_index)
    }

    /// Bounding box of both subsets; ranks must agree.
    pub fn union(&self, other: &Subset) -> Result<Self> {
        snafu::ensure!(
            self.rank() == other.rank(),
            RankMismatchSnafu { data: format!("{self} | {other}"), expected: self.rank(), actual: other.rank() }
        );
        Ok(Self(self.0.iter().zip(&other.0).map(|(a, b)| a.union(b)).collect()))
    }

    /// Shift each dimension by the matching entry of `by`.
    pub fn offset(&self, by: &[Expr]) -> Self {
        Self(self.0.iter().zip(by).map(|(r, o)| r.offset(o)).collect())
    }

    /// Shift a single dimension.
    pub fn offset_dim(&self, dim: usize, by: &Expr) -> Self {
        let mut out = self.clone();
        if let Some(range) = out.0.get_mut(dim) {
            *range = range.offset(by);
        }
        out
    }

    pub fn subs(&self, name: &str, value: &Expr) -> Self {
        Self(self.0.iter().map(|r| r.subs(name, value)).collect())
    }

    pub fn subs_all(&self, mapping: &BTreeMap<String, Expr>) -> Self {
        Self(self.0.iter().map(|r| r.subs_all(mapping)).collect())
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for range in &self.0 {
            out.extend(range.begin.free_symbols());
            out.extend(range.end.free_symbols());
            out.extend(range.step.free_symbols());
        }
        out
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        self.0.iter().any(|r| r.contains_symbol(name))
    }

    /// Dimensions whose bounds mention `name`.
    pub fn dims_with_symbol(&self, name: &str) -> Vec<usize> {
        self.0.iter().enumerate().filter(|(_, r)| r.contains_symbol(name)).map(|(d, _)| d).collect()
    }

    /// Conservative overlap test: `false` only when both subsets are constant
    /// and disjoint in at least one dimension.
    pub fn may_overlap(&self, other: &Subset) -> bool {
        if self.rank() != other.rank() {
            return true;
        }
        !self.0.iter().zip(&other.0).any(|(a, b)| match (a.constant_bounds(), b.constant_bounds()) {
            (Some((a0, a1)), Some((b0, b1))) => a1 < b0 || b1 < a0,
            _ => false,
        })
    }

    /// Per-dimension constant shift `d` with `self == other + d`, if one exists.
    pub fn const_delta(&self, other: &Subset) -> Option<SmallVec<[i64; 4]>> {
        if self.rank() != other.rank() {
            return None;
        }
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| {
                let delta = a.begin.const_diff(&b.begin)?;
                (a.end.const_diff(&b.end)? == delta && a.step == b.step).then_some(delta)
            })
            .collect()
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, range) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        write!(f, "]")
    }
}

fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
