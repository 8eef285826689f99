//! Programs: state machines over dataflow states.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use snafu::{OptionExt, ensure};
use tracing::trace;

use crate::condition::Condition;
use crate::data::Array;
use crate::error::*;
use crate::expr::Expr;
use crate::node::{IN_PREFIX, Node, NodeId, OUT_PREFIX};
use crate::state::State;

pub type StateId = NodeIndex;
pub type TransitionId = EdgeIndex;

/// Control edge: taken when `condition` holds, then `assignments` are applied
/// simultaneously.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterstateEdge {
    pub condition: Condition,
    pub assignments: BTreeMap<String, Expr>,
}

impl InterstateEdge {
    pub fn new(condition: Condition) -> Self {
        Self { condition, assignments: BTreeMap::new() }
    }

    pub fn assign(name: impl Into<String>, value: impl Into<Expr>) -> Self {
        Self { condition: Condition::Always, assignments: BTreeMap::from([(name.into(), value.into())]) }
    }

    pub fn with_assignment(mut self, name: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.assignments.insert(name.into(), value.into());
        self
    }
}

/// States created or reused by [`Program::add_loop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStates {
    pub before: StateId,
    pub guard: StateId,
    pub after: StateId,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub name: String,
    pub arrays: BTreeMap<String, Array>,
    pub states: StableDiGraph<State, InterstateEdge>,
    pub start: Option<StateId>,
    temp_counter: usize,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    pub fn add_array(&mut self, name: impl Into<String>, array: Array) -> Result<()> {
        let name = name.into();
        ensure!(!self.arrays.contains_key(&name), DuplicateArraySnafu { name });
        self.arrays.insert(name, array);
        Ok(())
    }

    pub fn array(&self, name: &str) -> Result<&Array> {
        self.arrays.get(name).context(UnknownArraySnafu { name })
    }

    pub fn array_mut(&mut self, name: &str) -> Result<&mut Array> {
        self.arrays.get_mut(name).context(UnknownArraySnafu { name })
    }

    pub fn remove_array(&mut self, name: &str) -> Option<Array> {
        self.arrays.remove(name)
    }

    /// Fresh `__tmpN` name not used by any array.
    pub fn temp_data_name(&mut self) -> String {
        loop {
            let name = format!("__tmp{}", self.temp_counter);
            self.temp_counter += 1;
            if !self.arrays.contains_key(&name) {
                return name;
            }
        }
    }

    /// Whether any state mentions `data`.
    pub fn references(&self, data: &str) -> bool {
        self.states.node_weights().any(|s| s.references(data))
    }

    /// Drop `data` from the array table if no state mentions it.
    pub fn remove_array_if_unreferenced(&mut self, data: &str) -> bool {
        if self.references(data) {
            return false;
        }
        trace!(program = %self.name, data, "removing unreferenced array");
        self.arrays.remove(data).is_some()
    }

    // ========================================================================
    // States
    // ========================================================================

    /// Add a state; the first state added becomes the start state.
    pub fn add_state(&mut self, label: impl Into<String>) -> StateId {
        let id = self.states.add_node(State::new(label));
        self.start.get_or_insert(id);
        id
    }

    pub fn add_state_with(&mut self, state: State) -> StateId {
        let id = self.states.add_node(state);
        self.start.get_or_insert(id);
        id
    }

    /// Insert a new state that all transitions into `state` now reach first.
    pub fn add_state_before(&mut self, state: StateId, label: impl Into<String>) -> StateId {
        let new = self.states.add_node(State::new(label));
        for t in self.in_transitions(state) {
            if let Some((src, _)) = self.states.edge_endpoints(t)
                && let Some(edge) = self.states.remove_edge(t)
            {
                self.states.add_edge(src, new, edge);
            }
        }
        self.states.add_edge(new, state, InterstateEdge::default());
        if self.start == Some(state) {
            self.start = Some(new);
        }
        new
    }

    /// Insert a new state that all transitions out of `state` now leave from.
    pub fn add_state_after(&mut self, state: StateId, label: impl Into<String>) -> StateId {
        let new = self.states.add_node(State::new(label));
        for t in self.out_transitions(state) {
            if let Some((_, dst)) = self.states.edge_endpoints(t)
                && let Some(edge) = self.states.remove_edge(t)
            {
                self.states.add_edge(new, dst, edge);
            }
        }
        self.states.add_edge(state, new, InterstateEdge::default());
        new
    }

    pub fn state(&self, id: StateId) -> Result<&State> {
        self.states.node_weight(id).context(UnknownStateSnafu { program: &self.name, index: id.index() })
    }

    pub fn state_mut(&mut self, id: StateId) -> Result<&mut State> {
        self.states.node_weight_mut(id).context(UnknownStateSnafu { program: &self.name, index: id.index() })
    }

    pub fn state_ids(&self) -> Vec<StateId> {
        self.states.node_indices().collect()
    }

    pub fn state_by_label(&self, label: &str) -> Option<StateId> {
        self.states.node_indices().find(|&s| self.states[s].label == label)
    }

    pub fn remove_state(&mut self, id: StateId) -> Option<State> {
        if self.start == Some(id) {
            self.start = None;
        }
        self.states.remove_node(id)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    pub fn add_transition(&mut self, src: StateId, dst: StateId, edge: InterstateEdge) -> TransitionId {
        self.states.add_edge(src, dst, edge)
    }

    pub fn remove_transition(&mut self, id: TransitionId) -> Option<InterstateEdge> {
        self.states.remove_edge(id)
    }

    pub fn transition(&self, id: TransitionId) -> Option<&InterstateEdge> {
        self.states.edge_weight(id)
    }

    pub fn transition_mut(&mut self, id: TransitionId) -> Option<&mut InterstateEdge> {
        self.states.edge_weight_mut(id)
    }

    pub fn transition_endpoints(&self, id: TransitionId) -> Option<(StateId, StateId)> {
        self.states.edge_endpoints(id)
    }

    pub fn transition_ids(&self) -> Vec<TransitionId> {
        self.states.edge_indices().collect()
    }

    fn transitions_directed(&self, state: StateId, dir: Direction) -> Vec<TransitionId> {
        let mut ids: Vec<_> = self.states.edges_directed(state, dir).map(|e| e.id()).collect();
        ids.sort();
        ids
    }

    pub fn in_transitions(&self, state: StateId) -> Vec<TransitionId> {
        self.transitions_directed(state, Direction::Incoming)
    }

    pub fn out_transitions(&self, state: StateId) -> Vec<TransitionId> {
        self.transitions_directed(state, Direction::Outgoing)
    }

    pub fn transitions_between(&self, src: StateId, dst: StateId) -> Vec<TransitionId> {
        self.out_transitions(src)
            .into_iter()
            .filter(|&t| self.states.edge_endpoints(t).map(|(_, d)| d) == Some(dst))
            .collect()
    }

    /// Distinct successor states, sorted.
    pub fn successors(&self, state: StateId) -> Vec<StateId> {
        let set: BTreeSet<_> = self.states.neighbors_directed(state, Direction::Outgoing).collect();
        set.into_iter().collect()
    }

    /// Distinct predecessor states, sorted.
    pub fn predecessors(&self, state: StateId) -> Vec<StateId> {
        let set: BTreeSet<_> = self.states.neighbors_directed(state, Direction::Incoming).collect();
        set.into_iter().collect()
    }

    /// Remove every state and transition; arrays are kept.
    pub fn clear_states(&mut self) {
        self.states.clear();
        self.start = None;
    }

    /// Wrap `body` (through `last`, if the body spans several states) in a
    /// sequential loop `for var = init; condition; var = increment`.
    ///
    /// Missing `before`/`after` states are created.
    #[allow(clippy::too_many_arguments)]
    pub fn add_loop(
        &mut self,
        before: Option<StateId>,
        body: StateId,
        after: Option<StateId>,
        var: &str,
        init: Expr,
        condition: Condition,
        increment: Expr,
        last: Option<StateId>,
    ) -> LoopStates {
        let before = match before {
            Some(s) => s,
            None => self.add_state_before(body, "init"),
        };
        let after = match after {
            Some(s) => s,
            None => self.states.add_node(State::new("end")),
        };
        let last = last.unwrap_or(body);

        // `add_state_before` may have linked `before -> body` directly.
        for t in self.transitions_between(before, body) {
            self.states.remove_edge(t);
        }

        let guard = self.states.add_node(State::new("guard"));
        self.add_transition(before, guard, InterstateEdge::assign(var, init));
        self.add_transition(guard, body, InterstateEdge::new(condition.clone()));
        self.add_transition(guard, after, InterstateEdge::new(condition.negate()));
        self.add_transition(last, guard, InterstateEdge::assign(var, increment));
        trace!(program = %self.name, var, "added loop");
        LoopStates { before, guard, after }
    }

    /// Symbols the program reads without assigning them itself.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut assigned = BTreeSet::new();
        for array in self.arrays.values() {
            for dim in &array.shape {
                out.extend(dim.free_symbols());
            }
        }
        for state in self.states.node_weights() {
            out.extend(state.free_symbols());
        }
        for edge in self.states.edge_weights() {
            out.extend(edge.condition.free_symbols());
            for (name, value) in &edge.assignments {
                assigned.insert(name.clone());
                out.extend(value.free_symbols());
            }
        }
        out.retain(|s| !assigned.contains(s));
        out
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check structural invariants, recursing into nested programs.
    pub fn validate(&self) -> Result<()> {
        for state in self.states.node_weights() {
            self.validate_state(state)?;
        }
        Ok(())
    }

    fn validate_state(&self, state: &State) -> Result<()> {
        for (id, node) in state.nodes() {
            self.validate_node(state, id, node)?;
        }
        for e in state.edge_ids() {
            let (Some(edge), Some((src, dst))) = (state.edge(e), state.endpoints(e)) else { continue };
            if let Some(data) = &edge.memlet.data {
                let array = self.array(data)?;
                let rank = edge.memlet.subset.rank();
                ensure!(
                    rank == array.rank(),
                    RankMismatchSnafu { data: data.clone(), expected: array.rank(), actual: rank }
                );
            }
            for (node_id, conn, outgoing) in [(src, &edge.src_conn, true), (dst, &edge.dst_conn, false)] {
                let Some(conn) = conn else { continue };
                let node = state.node(node_id)?;
                let declared = if outgoing { node.out_connectors() } else { node.in_connectors() };
                ensure!(
                    declared.is_some_and(|d| d.contains(conn)),
                    UndeclaredConnectorSnafu { node: node.label(), connector: conn.clone() }
                );
            }
        }
        state.topological_order()?;
        Ok(())
    }

    fn validate_node(&self, state: &State, id: NodeId, node: &Node) -> Result<()> {
        match node {
            Node::Access(access) => {
                self.array(&access.data)?;
            }
            Node::ScopeEntry(entry) => {
                ensure!(state.exit_of(id).is_some(), UnpairedScopeSnafu { scope: &entry.scope.label });
                for conn in &entry.in_connectors {
                    let inner = conn.strip_prefix(IN_PREFIX).map(|n| format!("{OUT_PREFIX}{n}"));
                    ensure!(
                        inner.is_some_and(|o| entry.out_connectors.contains(&o)),
                        UndeclaredConnectorSnafu { node: &entry.scope.label, connector: conn.clone() }
                    );
                }
            }
            Node::ScopeExit(exit) => {
                ensure!(
                    matches!(state.node(exit.entry), Ok(Node::ScopeEntry(_))),
                    UnpairedScopeSnafu { scope: &exit.label }
                );
            }
            Node::Nested(nested) => {
                for conn in nested.inputs.iter().chain(&nested.outputs) {
                    nested.program.array(conn)?;
                }
                nested.program.validate()?;
            }
            Node::Computation(_) => {}
        }
        if let Some(inputs) = node.in_connectors() {
            for conn in inputs {
                let count = state.in_edges_by_conn(id, conn).len();
                ensure!(count == 1, ConnectorAritySnafu { node: node.label(), connector: conn.clone(), count });
            }
        }
        if let Some(outputs) = node.out_connectors() {
            for conn in outputs {
                let count = state.out_edges_by_conn(id, conn).len();
                ensure!(count >= 1, ConnectorAritySnafu { node: node.label(), connector: conn.clone(), count });
            }
        }
        Ok(())
    }
}
