//! K-loop extraction.
//!
//! Turns the computation of a one-computation scope into a nested program that
//! runs the computation in a sequential loop over one extra dimension:
//!
//! ```text
//! entry(i, j) -> f -> exit        entry(i, j) -> nested_k_loop { for k: f } -> exit
//! ```
//!
//! Inside the nested program every array is bound through a fresh `__in_` or
//! `__out_` connector to the bounding box of all accesses the loop performs:
//! the swept dimension is taken whole, other dimensions are the union of the
//! accessed ranges. Inner subsets are rewritten relative to that box.

use std::collections::BTreeMap;

use itertools::Itertools;
use strata_ir::{
    Array, Edge, EdgeId, Expr, Match, Memlet, Node, NodeId, NodeKind, Pattern, Program, Range, State, StateId, Subset,
    out_conn,
};
use tracing::debug;

use crate::config::KLoopConfig;
use crate::error::*;
use crate::transform::Transformation;

pub const IN_PREFIX: &str = "__in_";
pub const OUT_PREFIX: &str = "__out_";

#[derive(Debug, Clone, Default)]
pub struct KLoopExtraction {
    pub config: KLoopConfig,
}

impl KLoopExtraction {
    pub fn new(config: KLoopConfig) -> Self {
        Self { config }
    }
}

/// Edges of one array between the scope and the computation.
#[derive(Debug)]
struct Access {
    data: String,
    /// Scope connector the edges use.
    conn: String,
    edges: Vec<Edge>,
    bbox: Subset,
    num_accesses: i64,
}

impl Transformation for KLoopExtraction {
    fn name(&self) -> &'static str {
        "kloop_extraction"
    }

    fn patterns(&self) -> Vec<Pattern> {
        vec![Pattern::path([NodeKind::ScopeEntry, NodeKind::Computation, NodeKind::ScopeExit])]
    }

    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool {
        let (Some(sid), Some(entry), Some(comp), Some(exit)) =
            (candidate.state, candidate.node(0), candidate.node(1), candidate.node(2))
        else {
            return false;
        };
        let Ok(state) = program.state(sid) else { return false };
        let Ok(Node::ScopeEntry(scope_entry)) = state.node(entry) else { return false };
        state.exit_of(entry) == Some(exit)
            && state.scope_contents(entry) == [comp]
            && !scope_entry.scope.has_param(&self.config.var)
            && self.config.bounds().is_ok()
    }

    #[tracing::instrument(skip_all, fields(var = %self.config.var))]
    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()> {
        let (Some(sid), Some(entry), Some(comp), Some(exit)) =
            (candidate.state, candidate.node(0), candidate.node(1), candidate.node(2))
        else {
            return StructuralAssumptionSnafu { pass: self.name(), reason: "incomplete match" }.fail();
        };
        extract_kloop(program, sid, entry, comp, exit, &self.config)
    }
}

/// Replace `comp`, the only node of the scope `entry`/`exit` in state `sid`,
/// with a nested program looping over `config.var`.
pub fn extract_kloop(
    program: &mut Program,
    sid: StateId,
    entry: NodeId,
    comp: NodeId,
    exit: NodeId,
    config: &KLoopConfig,
) -> Result<()> {
    let var = config.var.as_str();
    let state = program.state(sid)?;
    let computation = state
        .node(comp)?
        .as_computation()
        .ok_or_else(|| {
            StructuralAssumptionSnafu { pass: "kloop_extraction", reason: "expected a computation" }.build()
        })?
        .clone();
    let reads = group_accesses(program, state, &state.in_edges(comp), var, true)?;
    let writes = group_accesses(program, state, &state.out_edges(comp), var, false)?;

    let mut nested = Program::new(format!("nested_k_loop_{}", state.label));
    let mut body = State::new(format!("{}_k", state.label));
    let inner = body.add_computation(computation);
    for (prefix, accesses, is_read) in [(IN_PREFIX, &reads, true), (OUT_PREFIX, &writes, false)] {
        for access in accesses {
            let name = format!("{prefix}{}", access.data);
            let mut array: Array = program.array(&access.data)?.clone();
            array.shape = access.bbox.extents();
            array.transient = false;
            nested.add_array(&name, array)?;

            let origin: Vec<Expr> = access.bbox.ranges().iter().map(|r| -r.begin.clone()).collect();
            let node = if is_read { body.add_read(&name) } else { body.add_write(&name) };
            for edge in &access.edges {
                let memlet = Memlet::new(&name, edge.memlet.subset.offset(&origin))
                    .with_num_accesses(edge.memlet.num_accesses);
                if is_read {
                    body.add_edge(node, None, inner, edge.dst_conn.as_deref(), memlet);
                } else {
                    body.add_edge(inner, edge.src_conn.as_deref(), node, None, memlet);
                }
            }
        }
    }
    let body = nested.add_state_with(body);
    nested.add_loop(
        None,
        body,
        None,
        var,
        config.init.clone(),
        config.condition.clone(),
        config.step.clone(),
        None,
    );
    let mapping: BTreeMap<_, _> = nested.free_symbols().into_iter().map(|s| (s.clone(), Expr::sym(s))).collect();

    let inputs = reads.iter().map(|a| format!("{IN_PREFIX}{}", a.data)).collect_vec();
    let outputs = writes.iter().map(|a| format!("{OUT_PREFIX}{}", a.data)).collect_vec();
    let shapes: BTreeMap<String, Array> = program.arrays.clone();
    let state = program.state_mut(sid)?;
    let node = state.add_nested(nested, inputs, outputs, mapping);
    for access in &reads {
        let memlet = Memlet::new(&access.data, access.bbox.clone()).with_num_accesses(access.num_accesses);
        state.add_edge(entry, Some(&access.conn), node, Some(&format!("{IN_PREFIX}{}", access.data)), memlet);
    }
    for access in &writes {
        let memlet = Memlet::new(&access.data, access.bbox.clone()).with_num_accesses(access.num_accesses);
        state.add_edge(node, Some(&format!("{OUT_PREFIX}{}", access.data)), exit, Some(&access.conn), memlet);
    }
    // Keep the nested node inside the scope when it has no inputs or outputs.
    if reads.is_empty() {
        state.add_edge(entry, None, node, None, Memlet::empty());
    }
    if writes.is_empty() {
        state.add_edge(node, None, exit, None, Memlet::empty());
    }
    state.remove_node(comp);

    // The scope now moves every element the loop touches along the swept dimension.
    let outer: Vec<EdgeId> = state.in_edges(entry).into_iter().chain(state.out_edges(exit)).collect();
    for e in outer {
        let Some(edge) = state.edge_mut(e) else { continue };
        let Some(array) = edge.memlet.data.as_ref().and_then(|d| shapes.get(d)) else { continue };
        for d in edge.memlet.subset.dims_with_symbol(var) {
            if let (Some(range), Some(extent)) = (edge.memlet.subset.dim_mut(d), array.shape.get(d)) {
                *range = Range::full(extent);
            }
        }
    }
    debug!(state = %state.label, reads = reads.len(), writes = writes.len(), "extracted k-loop");
    Ok(())
}

/// Group the data edges between a scope node and the computation by array.
fn group_accesses(program: &Program, state: &State, edges: &[EdgeId], var: &str, is_read: bool) -> Result<Vec<Access>> {
    let mut groups: BTreeMap<String, Access> = BTreeMap::new();
    for &e in edges {
        let Some(edge) = state.edge(e) else { continue };
        let Some(data) = edge.memlet.data.clone() else { continue };
        let conn = if is_read { edge.src_conn.clone() } else { edge.dst_conn.clone() };
        let group = groups.entry(data.clone()).or_insert_with(|| Access {
            conn: conn.unwrap_or_else(|| out_conn(&data)),
            data,
            edges: Vec::new(),
            bbox: edge.memlet.subset.clone(),
            num_accesses: 0,
        });
        group.bbox = group.bbox.union(&edge.memlet.subset)?;
        group.num_accesses += edge.memlet.num_accesses;
        group.edges.push(edge.clone());
    }
    for group in groups.values_mut() {
        let array = program.array(&group.data)?;
        let swept: Vec<usize> = group.edges.iter().flat_map(|e| e.memlet.subset.dims_with_symbol(var)).collect();
        for d in swept {
            if let (Some(range), Some(extent)) = (group.bbox.dim_mut(d), array.shape.get(d)) {
                *range = Range::full(extent);
            }
        }
    }
    Ok(groups.into_values().collect())
}
