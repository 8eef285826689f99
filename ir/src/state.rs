//! Dataflow states.
//!
//! A [`State`] is a directed multigraph of [`Node`]s joined by [`Edge`]s. It is
//! backed by a petgraph `StableDiGraph`, so node and edge indices survive
//! removals and every query that returns several indices returns them sorted,
//! which keeps rewrites deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use snafu::OptionExt;

use crate::data::AccessType;
use crate::error::*;
use crate::expr::Expr;
use crate::memlet::{Edge, Memlet};
use crate::node::{
    Computation, IN_PREFIX, NestedGraph, Node, NodeId, OUT_PREFIX, Scope, ScopeEntry, ScopeExit, in_conn, out_conn,
};
use crate::program::Program;

pub type EdgeId = EdgeIndex;

#[derive(Debug, Clone, Default)]
pub struct State {
    pub label: String,
    pub graph: StableDiGraph<Node, Edge>,
}

impl State {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), graph: StableDiGraph::new() }
    }

    // ========================================================================
    // Construction
    // ========================================================================

    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.graph.add_node(node)
    }

    pub fn add_access(&mut self, data: impl Into<String>, access: AccessType) -> NodeId {
        self.add_node(Node::access(data, access))
    }

    pub fn add_read(&mut self, data: impl Into<String>) -> NodeId {
        self.add_access(data, AccessType::ReadOnly)
    }

    pub fn add_write(&mut self, data: impl Into<String>) -> NodeId {
        self.add_access(data, AccessType::WriteOnly)
    }

    pub fn add_computation(&mut self, computation: Computation) -> NodeId {
        self.add_node(Node::Computation(computation))
    }

    /// Add a scope entry/exit pair without connectors.
    pub fn add_scope(&mut self, scope: Scope) -> (NodeId, NodeId) {
        let label = scope.label.clone();
        let entry = self.add_node(Node::ScopeEntry(ScopeEntry {
            scope,
            in_connectors: BTreeSet::new(),
            out_connectors: BTreeSet::new(),
        }));
        let exit = self.add_node(Node::ScopeExit(ScopeExit {
            entry,
            label,
            in_connectors: BTreeSet::new(),
            out_connectors: BTreeSet::new(),
        }));
        (entry, exit)
    }

    pub fn add_nested<I, O>(
        &mut self,
        program: Program,
        inputs: I,
        outputs: O,
        symbol_mapping: BTreeMap<String, Expr>,
    ) -> NodeId
    where
        I: IntoIterator<Item = String>,
        O: IntoIterator<Item = String>,
    {
        self.add_node(Node::Nested(NestedGraph {
            program: Box::new(program),
            inputs: inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
            symbol_mapping,
        }))
    }

    pub fn add_edge(
        &mut self,
        src: NodeId,
        src_conn: Option<&str>,
        dst: NodeId,
        dst_conn: Option<&str>,
        memlet: Memlet,
    ) -> EdgeId {
        let edge = Edge { src_conn: src_conn.map(str::to_owned), dst_conn: dst_conn.map(str::to_owned), memlet };
        self.graph.add_edge(src, dst, edge)
    }

    /// Route `memlet` from outside a scope to a node inside it, declaring the
    /// `IN_`/`OUT_` connector pair on the entry. `outer` is the memlet on the
    /// edge entering the scope.
    pub fn add_scoped_read(
        &mut self,
        src: NodeId,
        entry: NodeId,
        dst: NodeId,
        dst_conn: &str,
        outer: Memlet,
        inner: Memlet,
    ) -> Result<(EdgeId, EdgeId)> {
        let data = outer.data.clone().context(UnexpectedNodeKindSnafu { expected: "data", found: "empty" })?;
        let node = self.node_mut(entry)?;
        node.add_in_connector(in_conn(&data));
        node.add_out_connector(out_conn(&data));
        let e1 = self.add_edge(src, None, entry, Some(&in_conn(&data)), outer);
        let e2 = self.add_edge(entry, Some(&out_conn(&data)), dst, Some(dst_conn), inner);
        Ok((e1, e2))
    }

    /// Route `memlet` from a node inside a scope through its exit to `dst`.
    pub fn add_scoped_write(
        &mut self,
        src: NodeId,
        src_conn: &str,
        exit: NodeId,
        dst: NodeId,
        inner: Memlet,
        outer: Memlet,
    ) -> Result<(EdgeId, EdgeId)> {
        let data = outer.data.clone().context(UnexpectedNodeKindSnafu { expected: "data", found: "empty" })?;
        let node = self.node_mut(exit)?;
        node.add_in_connector(in_conn(&data));
        node.add_out_connector(out_conn(&data));
        let e1 = self.add_edge(src, Some(src_conn), exit, Some(&in_conn(&data)), inner);
        let e2 = self.add_edge(exit, Some(&out_conn(&data)), dst, None, outer);
        Ok((e1, e2))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.graph.node_weight(id).context(UnknownNodeSnafu { state: &self.label, index: id.index() })
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.graph.node_weight_mut(id).context(UnknownNodeSnafu { state: &self.label, index: id.index() })
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.graph.contains_node(id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.graph.node_indices().collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.graph.node_indices().filter_map(|id| Some((id, self.graph.node_weight(id)?)))
    }

    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.graph.edge_indices().collect()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.graph.edge_weight(id)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.graph.edge_weight_mut(id)
    }

    pub fn src(&self, id: EdgeId) -> Option<NodeId> {
        self.graph.edge_endpoints(id).map(|(s, _)| s)
    }

    pub fn dst(&self, id: EdgeId) -> Option<NodeId> {
        self.graph.edge_endpoints(id).map(|(_, d)| d)
    }

    pub fn endpoints(&self, id: EdgeId) -> Option<(NodeId, NodeId)> {
        self.graph.edge_endpoints(id)
    }

    fn edges_directed(&self, node: NodeId, dir: Direction) -> Vec<EdgeId> {
        let mut ids: Vec<_> = self.graph.edges_directed(node, dir).map(|e| e.id()).collect();
        ids.sort();
        ids
    }

    pub fn in_edges(&self, node: NodeId) -> Vec<EdgeId> {
        self.edges_directed(node, Direction::Incoming)
    }

    pub fn out_edges(&self, node: NodeId) -> Vec<EdgeId> {
        self.edges_directed(node, Direction::Outgoing)
    }

    pub fn in_degree(&self, node: NodeId) -> usize {
        self.graph.edges_directed(node, Direction::Incoming).count()
    }

    pub fn out_degree(&self, node: NodeId) -> usize {
        self.graph.edges_directed(node, Direction::Outgoing).count()
    }

    pub fn edges_between(&self, src: NodeId, dst: NodeId) -> Vec<EdgeId> {
        let mut ids: Vec<_> =
            self.graph.edges_directed(src, Direction::Outgoing).filter(|e| e.target() == dst).map(|e| e.id()).collect();
        ids.sort();
        ids
    }

    /// Out-edges of `node` leaving through connector `conn`.
    pub fn out_edges_by_conn(&self, node: NodeId, conn: &str) -> Vec<EdgeId> {
        self.out_edges(node)
            .into_iter()
            .filter(|&e| self.graph[e].src_conn.as_deref() == Some(conn))
            .collect()
    }

    /// In-edges of `node` arriving at connector `conn`.
    pub fn in_edges_by_conn(&self, node: NodeId, conn: &str) -> Vec<EdgeId> {
        self.in_edges(node)
            .into_iter()
            .filter(|&e| self.graph[e].dst_conn.as_deref() == Some(conn))
            .collect()
    }

    /// Access nodes referring to `data`.
    pub fn access_nodes(&self, data: &str) -> Vec<NodeId> {
        self.nodes().filter(|(_, n)| n.is_access_to(data)).map(|(id, _)| id).collect()
    }

    /// Whether any node or memlet of this state mentions `data`.
    pub fn references(&self, data: &str) -> bool {
        self.graph.node_weights().any(|n| n.is_access_to(data))
            || self.graph.edge_weights().any(|e| e.memlet.data_is(data))
    }

    pub fn exit_of(&self, entry: NodeId) -> Option<NodeId> {
        self.nodes().find_map(|(id, n)| n.as_scope_exit().is_some_and(|x| x.entry == entry).then_some(id))
    }

    pub fn entry_of(&self, exit: NodeId) -> Option<NodeId> {
        self.graph.node_weight(exit)?.as_scope_exit().map(|x| x.entry)
    }

    /// Nodes strictly between a scope entry and its exit.
    pub fn scope_contents(&self, entry: NodeId) -> Vec<NodeId> {
        let exit = self.exit_of(entry);
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<_> = self.graph.neighbors_directed(entry, Direction::Outgoing).collect();
        while let Some(node) = queue.pop_front() {
            if Some(node) == exit || !seen.insert(node) {
                continue;
            }
            queue.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
        }
        seen.into_iter().collect()
    }

    /// Innermost scope entry enclosing `node`, if any.
    pub fn scope_of(&self, node: NodeId) -> Option<NodeId> {
        self.nodes()
            .filter(|(_, n)| matches!(n, Node::ScopeEntry(_)))
            .map(|(id, _)| (id, self.scope_contents(id)))
            .filter(|(_, contents)| contents.contains(&node))
            .min_by_key(|(_, contents)| contents.len())
            .map(|(id, _)| id)
    }

    fn is_scope_node(&self, id: NodeId) -> bool {
        matches!(self.graph.node_weight(id), Some(Node::ScopeEntry(_) | Node::ScopeExit(_)))
    }

    /// Edge feeding `edge` through a scope node, if `edge` leaves one via `OUT_x`.
    fn upstream(&self, edge: EdgeId) -> Option<EdgeId> {
        let src = self.src(edge)?;
        let conn = self.graph[edge].src_conn.as_deref()?.strip_prefix(OUT_PREFIX)?;
        if !self.is_scope_node(src) {
            return None;
        }
        self.in_edges_by_conn(src, &in_conn(conn)).into_iter().next()
    }

    /// Edges continuing `edge` through a scope node, if `edge` enters one via `IN_x`.
    fn downstream(&self, edge: EdgeId) -> Vec<EdgeId> {
        let Some(dst) = self.dst(edge) else { return Vec::new() };
        let Some(conn) = self.graph[edge].dst_conn.as_deref().and_then(|c| c.strip_prefix(IN_PREFIX)) else {
            return Vec::new();
        };
        if !self.is_scope_node(dst) {
            return Vec::new();
        }
        self.out_edges_by_conn(dst, &out_conn(conn))
    }

    /// Chain of edges carrying the same data through scope nodes, from the
    /// outermost source to a leaf. Fan-out is resolved by taking the first edge.
    pub fn memlet_path(&self, edge: EdgeId) -> Vec<EdgeId> {
        let mut path = VecDeque::from([edge]);
        let mut cur = edge;
        while let Some(up) = self.upstream(cur) {
            path.push_front(up);
            cur = up;
        }
        cur = edge;
        while let Some(&down) = self.downstream(cur).first() {
            path.push_back(down);
            cur = down;
        }
        path.into()
    }

    /// Every edge connected to `edge` through scope connectors, sorted.
    pub fn memlet_tree(&self, edge: EdgeId) -> Vec<EdgeId> {
        let mut root = edge;
        while let Some(up) = self.upstream(root) {
            root = up;
        }
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(e) = stack.pop() {
            out.push(e);
            stack.extend(self.downstream(e));
        }
        out.sort();
        out
    }

    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        petgraph::algo::toposort(&self.graph, None).ok().context(DataflowCycleSnafu { state: &self.label })
    }

    pub fn source_nodes(&self) -> Vec<NodeId> {
        self.node_ids().into_iter().filter(|&n| self.in_degree(n) == 0).collect()
    }

    pub fn sink_nodes(&self) -> Vec<NodeId> {
        self.node_ids().into_iter().filter(|&n| self.out_degree(n) == 0).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        self.graph.remove_node(id)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        self.graph.remove_edge(id)
    }

    /// Remove an edge and drop connectors left without edges on either end.
    pub fn remove_edge_and_connectors(&mut self, id: EdgeId) -> Option<Edge> {
        let (src, dst) = self.endpoints(id)?;
        let edge = self.graph.remove_edge(id)?;
        if let Some(conn) = &edge.src_conn
            && self.out_edges_by_conn(src, conn).is_empty()
            && let Some(node) = self.graph.node_weight_mut(src)
        {
            node.remove_out_connector(conn);
        }
        if let Some(conn) = &edge.dst_conn
            && self.in_edges_by_conn(dst, conn).is_empty()
            && let Some(node) = self.graph.node_weight_mut(dst)
        {
            node.remove_in_connector(conn);
        }
        Some(edge)
    }

    /// Remove a node together with all its edges and their connectors.
    pub fn remove_node_and_connectors(&mut self, id: NodeId) -> Option<Node> {
        for e in self.in_edges(id).into_iter().chain(self.out_edges(id)) {
            self.remove_edge_and_connectors(e);
        }
        self.graph.remove_node(id)
    }

    /// Replace a free symbol everywhere in this state: memlets, scope ranges
    /// and the symbol mappings of nested graphs.
    pub fn substitute(&mut self, name: &str, value: &Expr) {
        for edge in self.graph.edge_weights_mut() {
            edge.memlet = edge.memlet.subs(name, value);
        }
        for node in self.graph.node_weights_mut() {
            match node {
                Node::ScopeEntry(entry) if !entry.scope.has_param(name) => {
                    for range in entry.scope.ranges.iter_mut() {
                        *range = range.subs(name, value);
                    }
                }
                Node::Nested(nested) => {
                    for mapped in nested.symbol_mapping.values_mut() {
                        *mapped = mapped.subs(name, value);
                    }
                }
                _ => {}
            }
        }
    }

    /// Symbols used by memlets, scope ranges and nested symbol mappings, minus
    /// scope parameters.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut params = BTreeSet::new();
        for edge in self.graph.edge_weights() {
            out.extend(edge.memlet.subset.free_symbols());
        }
        for node in self.graph.node_weights() {
            match node {
                Node::ScopeEntry(entry) => {
                    params.extend(entry.scope.params.iter().cloned());
                    for range in &entry.scope.ranges {
                        out.extend(range.begin.free_symbols());
                        out.extend(range.end.free_symbols());
                        out.extend(range.step.free_symbols());
                    }
                }
                Node::Nested(nested) => {
                    for mapped in nested.symbol_mapping.values() {
                        out.extend(mapped.free_symbols());
                    }
                }
                _ => {}
            }
        }
        out.retain(|s| !params.contains(s));
        out
    }
}
