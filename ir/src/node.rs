//! Nodes of a state's dataflow graph.
//!
//! Connectors follow the `IN_<name>` / `OUT_<name>` convention on scope
//! entries and exits: data entering a scope through `IN_a` leaves the entry
//! through `OUT_a`, and symmetrically on the exit. Nested graphs name their
//! connectors after the inner arrays they bind.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::stable_graph::NodeIndex;
use smallvec::SmallVec;

use crate::data::AccessType;
use crate::expr::Expr;
use crate::program::Program;
use crate::subset::Range;

pub type NodeId = NodeIndex;

pub const IN_PREFIX: &str = "IN_";
pub const OUT_PREFIX: &str = "OUT_";

/// Connector name for data `name` entering a scope node.
pub fn in_conn(name: &str) -> String {
    format!("{IN_PREFIX}{name}")
}

/// Connector name for data `name` leaving a scope node.
pub fn out_conn(name: &str) -> String {
    format!("{OUT_PREFIX}{name}")
}

/// Point-of-use reference to a named array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessNode {
    pub data: String,
    pub access: AccessType,
}

/// A composite computation carries one sub-program per vertical interval.
#[derive(Debug, Clone)]
pub struct Composite {
    /// Outer array names written by the computation (connector `OUT_<name>`).
    pub outputs: BTreeSet<String>,
    /// Inner access label to outer array name.
    pub write_accesses: BTreeMap<String, String>,
    pub intervals: Vec<Program>,
}

/// Atomic scalar computation, opaque beyond its connectors.
#[derive(Debug, Clone)]
pub struct Computation {
    pub label: String,
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
    pub code: String,
    pub composite: Option<Composite>,
}

impl Computation {
    pub fn new<I, O>(label: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            label: label.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            code: String::new(),
            composite: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }
}

/// Parallel iteration domain of a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub label: String,
    pub params: SmallVec<[String; 4]>,
    pub ranges: SmallVec<[Range; 4]>,
    /// Number of leading dimensions lowered as one collapsed loop.
    pub collapse: usize,
}

impl Scope {
    pub fn new(label: impl Into<String>, params: impl IntoIterator<Item = (String, Range)>) -> Self {
        let (params, ranges) = params.into_iter().unzip();
        Self { label: label.into(), params, ranges, collapse: 1 }
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p == name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param_index(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeEntry {
    pub scope: Scope,
    pub in_connectors: BTreeSet<String>,
    pub out_connectors: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeExit {
    /// The entry node this exit closes.
    pub entry: NodeId,
    pub label: String,
    pub in_connectors: BTreeSet<String>,
    pub out_connectors: BTreeSet<String>,
}

/// A whole program embedded as a single node.
#[derive(Debug, Clone)]
pub struct NestedGraph {
    pub program: Box<Program>,
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
    /// Inner symbol to outer expression.
    pub symbol_mapping: BTreeMap<String, Expr>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Access(AccessNode),
    Computation(Computation),
    ScopeEntry(ScopeEntry),
    ScopeExit(ScopeExit),
    Nested(NestedGraph),
}

impl Node {
    pub fn access(data: impl Into<String>, access: AccessType) -> Self {
        Node::Access(AccessNode { data: data.into(), access })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Access(_) => "access",
            Node::Computation(_) => "computation",
            Node::ScopeEntry(_) => "scope entry",
            Node::ScopeExit(_) => "scope exit",
            Node::Nested(_) => "nested graph",
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Node::Access(a) => &a.data,
            Node::Computation(c) => &c.label,
            Node::ScopeEntry(e) => &e.scope.label,
            Node::ScopeExit(x) => &x.label,
            Node::Nested(n) => &n.program.name,
        }
    }

    pub fn as_access(&self) -> Option<&AccessNode> {
        match self {
            Node::Access(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_computation(&self) -> Option<&Computation> {
        match self {
            Node::Computation(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_computation_mut(&mut self) -> Option<&mut Computation> {
        match self {
            Node::Computation(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_scope_entry(&self) -> Option<&ScopeEntry> {
        match self {
            Node::ScopeEntry(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_scope_exit(&self) -> Option<&ScopeExit> {
        match self {
            Node::ScopeExit(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&NestedGraph> {
        match self {
            Node::Nested(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_nested_mut(&mut self) -> Option<&mut NestedGraph> {
        match self {
            Node::Nested(n) => Some(n),
            _ => None,
        }
    }

    /// Array name if this is an access node for it.
    pub fn data(&self) -> Option<&str> {
        self.as_access().map(|a| a.data.as_str())
    }

    pub fn is_access_to(&self, name: &str) -> bool {
        self.data() == Some(name)
    }

    /// Declared input connectors; access nodes declare none.
    pub fn in_connectors(&self) -> Option<&BTreeSet<String>> {
        match self {
            Node::Access(_) => None,
            Node::Computation(c) => Some(&c.inputs),
            Node::ScopeEntry(e) => Some(&e.in_connectors),
            Node::ScopeExit(x) => Some(&x.in_connectors),
            Node::Nested(n) => Some(&n.inputs),
        }
    }

    pub fn out_connectors(&self) -> Option<&BTreeSet<String>> {
        match self {
            Node::Access(_) => None,
            Node::Computation(c) => Some(&c.outputs),
            Node::ScopeEntry(e) => Some(&e.out_connectors),
            Node::ScopeExit(x) => Some(&x.out_connectors),
            Node::Nested(n) => Some(&n.outputs),
        }
    }

    fn in_connectors_mut(&mut self) -> Option<&mut BTreeSet<String>> {
        match self {
            Node::Access(_) => None,
            Node::Computation(c) => Some(&mut c.inputs),
            Node::ScopeEntry(e) => Some(&mut e.in_connectors),
            Node::ScopeExit(x) => Some(&mut x.in_connectors),
            Node::Nested(n) => Some(&mut n.inputs),
        }
    }

    fn out_connectors_mut(&mut self) -> Option<&mut BTreeSet<String>> {
        match self {
            Node::Access(_) => None,
            Node::Computation(c) => Some(&mut c.outputs),
            Node::ScopeEntry(e) => Some(&mut e.out_connectors),
            Node::ScopeExit(x) => Some(&mut x.out_connectors),
            Node::Nested(n) => Some(&mut n.outputs),
        }
    }

    pub fn add_in_connector(&mut self, name: impl Into<String>) -> bool {
        self.in_connectors_mut().is_some_and(|c| c.insert(name.into()))
    }

    pub fn add_out_connector(&mut self, name: impl Into<String>) -> bool {
        self.out_connectors_mut().is_some_and(|c| c.insert(name.into()))
    }

    pub fn remove_in_connector(&mut self, name: &str) -> bool {
        self.in_connectors_mut().is_some_and(|c| c.remove(name))
    }

    pub fn remove_out_connector(&mut self, name: &str) -> bool {
        self.out_connectors_mut().is_some_and(|c| c.remove(name))
    }
}
