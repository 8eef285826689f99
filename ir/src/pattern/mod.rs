//! Pattern descriptions for rewrite passes.
//!
//! A pass declares the subgraph shapes it rewrites as [`Pattern`]s. The
//! matcher in [`matcher`] enumerates every injective binding of a pattern in a
//! program and hands them to the pass as [`Match`]es, in a deterministic order.

pub mod matcher;

use petgraph::stable_graph::NodeIndex;
use smallvec::SmallVec;

use crate::node::Node;
use crate::program::StateId;

pub use matcher::find_matches;

/// Node constraint of a dataflow pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Access,
    Computation,
    /// A computation carrying per-interval sub-programs.
    Composite,
    ScopeEntry,
    ScopeExit,
    Nested,
    Any,
}

impl NodeKind {
    pub fn matches(self, node: &Node) -> bool {
        match (self, node) {
            (NodeKind::Any, _)
            | (NodeKind::Access, Node::Access(_))
            | (NodeKind::Computation, Node::Computation(_))
            | (NodeKind::ScopeEntry, Node::ScopeEntry(_))
            | (NodeKind::ScopeExit, Node::ScopeExit(_))
            | (NodeKind::Nested, Node::Nested(_)) => true,
            (NodeKind::Composite, Node::Computation(c)) => c.composite.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// A path `n0 -> n1 -> ... ` of distinct nodes inside one state; consecutive
    /// nodes are joined by at least one edge.
    Dataflow(Vec<NodeKind>),
    /// `states` distinct states with at least one transition for each
    /// `(from, to)` pair of pattern positions.
    Control { states: usize, transitions: Vec<(usize, usize)> },
}

impl Pattern {
    pub fn path(kinds: impl IntoIterator<Item = NodeKind>) -> Self {
        Pattern::Dataflow(kinds.into_iter().collect())
    }

    pub fn control(states: usize, transitions: impl IntoIterator<Item = (usize, usize)>) -> Self {
        Pattern::Control { states, transitions: transitions.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        match self {
            Pattern::Dataflow(kinds) => kinds.len(),
            Pattern::Control { states, .. } => *states,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One binding of a pattern.
///
/// For dataflow patterns `state` is the state searched and `nodes` are node
/// indices in it; for control patterns `state` is `None` and `nodes` are state
/// indices. Positions follow the pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Match {
    pub state: Option<StateId>,
    pub nodes: SmallVec<[NodeIndex; 8]>,
}

impl Match {
    pub fn node(&self, position: usize) -> Option<NodeIndex> {
        self.nodes.get(position).copied()
    }
}
