//! Dataflow intermediate representation for stencil programs.
//!
//! A [`Program`] is a state machine whose states are dataflow multigraphs. The
//! crate provides the graph model the rewrite passes in `strata-schedule`
//! operate on.
//!
//! # Module Organization
//!
//! - [`expr`] - Canonical symbolic integer expressions
//! - [`condition`] - Interstate guard conditions
//! - [`subset`] - Per-dimension index ranges
//! - [`data`] - Array descriptors and storage classes
//! - [`node`] - Access, computation, scope and nested-graph nodes
//! - [`memlet`] - Edge payloads
//! - [`state`] - Dataflow states
//! - [`program`] - State machines, loops and validation
//! - [`pattern`] - Pattern descriptions and the subgraph matcher
//! - [`error`] - Error types and result handling

pub mod condition;
pub mod data;
pub mod error;
pub mod expr;
pub mod memlet;
pub mod node;
pub mod pattern;
pub mod program;
pub mod state;
pub mod subset;

#[cfg(any(test, feature = "proptest"))]
pub mod test;

pub use condition::{CmpOp, Condition};
pub use data::{AccessType, Array, DType, Lifetime, StorageType};
pub use error::{Error, Result};
pub use expr::{Bindings, Expr};
pub use memlet::{Edge, Memlet};
pub use node::{
    AccessNode, Composite, Computation, NestedGraph, Node, NodeId, Scope, ScopeEntry, ScopeExit, in_conn, out_conn,
};
pub use pattern::{Match, NodeKind, Pattern, find_matches};
pub use program::{InterstateEdge, LoopStates, Program, StateId, TransitionId};
pub use state::{EdgeId, State};
pub use subset::{Range, Subset};
