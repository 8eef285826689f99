//! Map fusion by replication.
//!
//! ```text
//! [s1: y[i] = f(x[i])] -> y -> [s2: z[i] = g(y[i], y[i + 1])]
//! ```
//!
//! becomes a single scope computing `f` once per offset at which `g` reads `y`
//! into private scalars:
//!
//! ```text
//! [s2: t0 = f(x[i]); t1 = f(x[i + 1]); z[i] = g(t0, t1)]
//! ```
//!
//! The intermediate array disappears. This trades memory traffic for
//! recomputation; whether that pays off is left to the caller.

use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;
use strata_ir::{
    AccessType, Array, EdgeId, Expr, Match, Memlet, Node, NodeId, NodeKind, Pattern, Program, State, StateId, Subset,
};
use tracing::{debug, trace};

use crate::error::*;
use crate::transform::Transformation;

type Offset = SmallVec<[i64; 4]>;

#[derive(Debug, Clone, Copy, Default)]
pub struct MapFusion;

/// Nodes bound by a fusion match.
#[derive(Debug, Clone, Copy)]
struct Binding {
    state: StateId,
    entry1: NodeId,
    exit1: NodeId,
    access: NodeId,
    entry2: NodeId,
}

impl Binding {
    fn of(candidate: &Match) -> Option<Self> {
        Some(Self {
            state: candidate.state?,
            entry1: candidate.node(0)?,
            exit1: candidate.node(2)?,
            access: candidate.node(3)?,
            entry2: candidate.node(4)?,
        })
    }
}

impl Transformation for MapFusion {
    fn name(&self) -> &'static str {
        "map_fusion"
    }

    fn patterns(&self) -> Vec<Pattern> {
        vec![Pattern::path([
            NodeKind::ScopeEntry,
            NodeKind::Computation,
            NodeKind::ScopeExit,
            NodeKind::Access,
            NodeKind::ScopeEntry,
            NodeKind::Computation,
        ])]
    }

    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool {
        let Some(b) = Binding::of(candidate) else { return false };
        let Ok(state) = program.state(b.state) else { return false };
        check(program, state, &b).is_some()
    }

    #[tracing::instrument(skip_all)]
    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()> {
        let Some(b) = Binding::of(candidate) else {
            return StructuralAssumptionSnafu { pass: self.name(), reason: "incomplete match" }.fail();
        };
        let state = program.state(b.state)?;
        let (data, write) = check(program, state, &b).ok_or_else(|| {
            StructuralAssumptionSnafu { pass: "map_fusion", reason: "scopes cannot be fused" }.build()
        })?;
        let dtype = program.array(&data)?.dtype;
        let contents = state.scope_contents(b.entry1);
        let offsets = read_offsets(state, b.entry2, &data, &write);
        let inputs = scope_inputs(state, b.entry1);

        let scalars: BTreeMap<String, Array> = contents
            .iter()
            .filter_map(|&n| state.node(n).ok().and_then(Node::data))
            .filter_map(|d| {
                let array = program.arrays.get(d).filter(|a| a.transient && a.is_scalar())?;
                Some((d.to_owned(), array.clone()))
            })
            .collect();

        // Inputs of the first scope now enter the second one, covering every offset.
        let state = program.state_mut(b.state)?;
        for e in state.out_edges(b.access) {
            state.remove_edge_and_connectors(e);
        }
        state.remove_node(b.access);
        for input in &inputs {
            let Some(conn) = input.edge.dst_conn.as_deref() else { continue };
            let mut shifted = offsets.keys().map(|delta| input.edge.memlet.subset.offset(&to_exprs(delta)));
            let Some(first) = shifted.next() else { continue };
            let mut outer = input.edge.memlet.clone();
            outer.subset = shifted.try_fold(first, |acc, s| acc.union(&s))?;
            match state.in_edges_by_conn(b.entry2, conn).first() {
                Some(&existing) => {
                    if let Some(edge) = state.edge_mut(existing) {
                        edge.memlet.subset = edge.memlet.subset.union(&outer.subset)?;
                    }
                }
                None => {
                    state.node_mut(b.entry2)?.add_in_connector(conn);
                    state.add_edge(input.src, input.edge.src_conn.as_deref(), b.entry2, Some(conn), outer);
                }
            }
        }

        for e in state.out_edges(b.entry2) {
            if state.edge(e).is_some_and(|edge| edge.memlet.data_is(&data)) {
                state.remove_edge_and_connectors(e);
            }
        }
        let replicas = offsets.len();
        for (delta, consumers) in offsets {
            let mut renames = BTreeMap::new();
            for (name, array) in &scalars {
                let tmp = program.temp_data_name();
                program.add_array(&tmp, array.clone())?;
                renames.insert(name.clone(), tmp);
            }
            let tmp = program.temp_data_name();
            program.add_array(&tmp, Array::scalar(dtype).transient())?;

            let state = program.state_mut(b.state)?;
            let tmp_access = state.add_access(&tmp, AccessType::ReadWrite);
            replicate(state, &b, &contents, &renames, &delta, tmp_access, &tmp)?;
            for (dst, dst_conn) in consumers {
                state.add_edge(tmp_access, None, dst, dst_conn.as_deref(), Memlet::new(&tmp, Subset::scalar()));
            }
        }

        let state = program.state_mut(b.state)?;
        let sources: BTreeSet<NodeId> = inputs.iter().map(|i| i.src).collect();
        for node in contents.into_iter().chain([b.entry1, b.exit1]) {
            state.remove_node_and_connectors(node);
        }
        for node in sources {
            if state.in_degree(node) == 0 && state.out_degree(node) == 0 {
                state.remove_node(node);
            }
        }
        for name in scalars.keys() {
            program.remove_array_if_unreferenced(name);
        }
        let dropped = program.remove_array_if_unreferenced(&data);
        debug!(data, replicas, dropped, "fused scopes");
        Ok(())
    }
}

/// Intermediate array and the subset the first scope writes, if the match can
/// be fused.
fn check(program: &Program, state: &State, b: &Binding) -> Option<(String, Subset)> {
    let (Node::ScopeEntry(first), Node::ScopeEntry(second)) = (state.node(b.entry1).ok()?, state.node(b.entry2).ok()?)
    else {
        return None;
    };
    let exit = state.node(b.exit1).ok()?;
    if state.exit_of(b.entry1) != Some(b.exit1) || exit.in_connectors()?.len() != 1 {
        return None;
    }
    if state.in_degree(b.access) != 1 || state.out_degree(b.access) != 1 {
        return None;
    }
    let data = state.node(b.access).ok()?.data()?.to_owned();
    let array = program.array(&data).ok()?;
    if !array.transient {
        return None;
    }
    if !single_use(program, b, &data) {
        trace!(data, "intermediate is referenced elsewhere");
        return None;
    }
    if first.scope.params != second.scope.params {
        trace!(data, "scope parameters differ");
        return None;
    }

    let writes = state.in_edges(b.exit1);
    let &[write] = writes.as_slice() else { return None };
    let write = state.edge(write)?.memlet.subset.clone();
    let contents = state.scope_contents(b.entry1);
    if contents.iter().any(|&n| !matches!(state.node(n), Ok(Node::Computation(_) | Node::Access(_)))) {
        return None;
    }
    for e in state.out_edges(b.entry1) {
        let memlet = &state.edge(e)?.memlet;
        if !memlet.is_empty() && memlet.subset.rank() != write.rank() {
            return None;
        }
    }
    for e in state.out_edges(b.entry2) {
        let memlet = &state.edge(e)?.memlet;
        if memlet.data_is(&data) && memlet.subset.const_delta(&write).is_none() {
            trace!(data, "read offset is not constant");
            return None;
        }
    }
    Some((data, write))
}

/// Whether the matched access node is the only reference to `data` in the
/// whole program.
fn single_use(program: &Program, b: &Binding, data: &str) -> bool {
    program.state_ids().into_iter().all(|sid| {
        let Ok(state) = program.state(sid) else { return false };
        state.access_nodes(data).into_iter().all(|n| sid == b.state && n == b.access)
    })
}

/// Consumers of `data` inside the second scope, grouped by their offset from
/// the producer's write.
fn read_offsets(
    state: &State,
    entry: NodeId,
    data: &str,
    write: &Subset,
) -> BTreeMap<Offset, Vec<(NodeId, Option<String>)>> {
    let mut offsets: BTreeMap<Offset, Vec<_>> = BTreeMap::new();
    for e in state.out_edges(entry) {
        let (Some(edge), Some(dst)) = (state.edge(e), state.dst(e)) else { continue };
        if !edge.memlet.data_is(data) {
            continue;
        }
        if let Some(delta) = edge.memlet.subset.const_delta(write) {
            offsets.entry(delta).or_default().push((dst, edge.dst_conn.clone()));
        }
    }
    offsets
}

#[derive(Debug)]
struct ScopeInput {
    src: NodeId,
    edge: strata_ir::Edge,
}

fn scope_inputs(state: &State, entry: NodeId) -> Vec<ScopeInput> {
    state
        .in_edges(entry)
        .into_iter()
        .filter_map(|e| Some(ScopeInput { src: state.src(e)?, edge: state.edge(e)?.clone() }))
        .filter(|input| !input.edge.memlet.is_empty())
        .collect()
}

fn to_exprs(delta: &[i64]) -> Vec<Expr> {
    delta.iter().copied().map(Expr::int).collect()
}

/// Copy the first scope's contents into the second scope, reading inputs
/// shifted by `delta` and writing the result into `tmp`.
fn replicate(
    state: &mut State,
    b: &Binding,
    contents: &[NodeId],
    renames: &BTreeMap<String, String>,
    delta: &[i64],
    tmp_access: NodeId,
    tmp: &str,
) -> Result<()> {
    let mut ids = BTreeMap::new();
    for &node in contents {
        let mut copy = state.node(node)?.clone();
        if let Node::Access(access) = &mut copy
            && let Some(name) = renames.get(&access.data)
        {
            access.data = name.clone();
        }
        ids.insert(node, state.add_node(copy));
    }

    let shift = to_exprs(delta);
    let edges: Vec<EdgeId> = state
        .edge_ids()
        .into_iter()
        .filter(|&e| state.endpoints(e).is_some_and(|(s, d)| ids.contains_key(&s) || ids.contains_key(&d)))
        .collect();
    for e in edges {
        let (Some((src, dst)), Some(edge)) = (state.endpoints(e), state.edge(e).cloned()) else { continue };
        let mut memlet = edge.memlet;
        if let Some(name) = memlet.data.as_ref().and_then(|d| renames.get(d)) {
            memlet.data = Some(name.clone());
        }
        match (ids.get(&src), ids.get(&dst)) {
            (Some(&src), Some(&dst)) => {
                state.add_edge(src, edge.src_conn.as_deref(), dst, edge.dst_conn.as_deref(), memlet);
            }
            (Some(&src), None) if dst == b.exit1 => {
                state.add_edge(src, edge.src_conn.as_deref(), tmp_access, None, Memlet::new(tmp, Subset::scalar()));
            }
            (None, Some(&dst)) if src == b.entry1 => {
                if memlet.data.is_some() {
                    memlet.subset = memlet.subset.offset(&shift);
                }
                if let Some(conn) = edge.src_conn.as_deref() {
                    state.node_mut(b.entry2)?.add_out_connector(conn);
                }
                state.add_edge(b.entry2, edge.src_conn.as_deref(), dst, edge.dst_conn.as_deref(), memlet);
            }
            _ => {
                return StructuralAssumptionSnafu {
                    pass: "map_fusion",
                    reason: "scope contents are connected outside the scope",
                }
                .fail();
            }
        }
    }
    Ok(())
}
