//! Dataflow edges.

use std::fmt;

use crate::expr::Expr;
use crate::subset::Subset;

/// Data movement along an edge: which array, which elements, how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memlet {
    /// `None` for data-less edges that only order nodes.
    pub data: Option<String>,
    pub subset: Subset,
    /// Subset on the other side of a copy between two access nodes.
    pub other_subset: Option<Subset>,
    pub num_accesses: i64,
}

impl Memlet {
    pub fn new(data: impl Into<String>, subset: Subset) -> Self {
        Self { data: Some(data.into()), subset, other_subset: None, num_accesses: 1 }
    }

    /// Parse the subset from text, e.g. `Memlet::simple("a", "k - 1, 0:I - 1")`.
    pub fn simple(data: impl Into<String>, subset: &str) -> crate::Result<Self> {
        Ok(Self::new(data, Subset::parse(subset)?))
    }

    pub fn empty() -> Self {
        Self { data: None, subset: Subset::default(), other_subset: None, num_accesses: 0 }
    }

    pub fn with_other_subset(mut self, other: Subset) -> Self {
        self.other_subset = Some(other);
        self
    }

    pub fn with_num_accesses(mut self, n: i64) -> Self {
        self.num_accesses = n;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    pub fn data_is(&self, name: &str) -> bool {
        self.data.as_deref() == Some(name)
    }

    pub fn subs(&self, name: &str, value: &Expr) -> Self {
        Self {
            data: self.data.clone(),
            subset: self.subset.subs(name, value),
            other_subset: self.other_subset.as_ref().map(|s| s.subs(name, value)),
            num_accesses: self.num_accesses,
        }
    }
}

impl fmt::Display for Memlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            None => write!(f, "<empty>"),
            Some(data) => {
                write!(f, "{data}{}", self.subset)?;
                if let Some(other) = &self.other_subset {
                    write!(f, " -> {other}")?;
                }
                Ok(())
            }
        }
    }
}

/// An edge of a state's dataflow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub src_conn: Option<String>,
    pub dst_conn: Option<String>,
    pub memlet: Memlet,
}
