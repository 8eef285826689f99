//! Software pipelining of sequential sweeps inside nested programs.
//!
//! [`PrefetchField`] rewrites one loop of one program. [`PrefetchKCaches`]
//! drives it over the nested programs of a graph, innermost first, and decides
//! per nested output whether its buffered writes must reach the real array.

pub mod field;

use std::collections::{BTreeMap, BTreeSet};

use strata_ir::{AccessType, EdgeId, Match, Node, NodeId, NodeKind, Pattern, Program, State, StateId, StorageType};
use tracing::{debug, trace};

pub use field::{Footprint, PrefetchField, Window, buffer_name, footprint, pipeline, staging_name};

use crate::config::PrefetchConfig;
use crate::error::*;
use crate::transform::{Transformation, apply_repeated, first_match};

#[derive(Debug, Clone, Default)]
pub struct PrefetchKCaches {
    pub config: PrefetchConfig,
}

impl PrefetchKCaches {
    pub fn new(config: PrefetchConfig) -> Self {
        Self { config }
    }
}

impl Transformation for PrefetchKCaches {
    fn name(&self) -> &'static str {
        "prefetch_kcaches"
    }

    fn patterns(&self) -> Vec<Pattern> {
        vec![Pattern::path([NodeKind::Nested])]
    }

    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool {
        let (Some(sid), Some(node)) = (candidate.state, candidate.node(0)) else { return false };
        pending(program, sid, node, &self.config)
    }

    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()> {
        let (Some(sid), Some(node)) = (candidate.state, candidate.node(0)) else {
            return StructuralAssumptionSnafu { pass: self.name(), reason: "incomplete match" }.fail();
        };
        prefetch_nested(program, sid, node, &self.config)
    }
}

/// Configuration used for programs nested inside a pipelined program.
fn inner_config(config: &PrefetchConfig) -> PrefetchConfig {
    PrefetchConfig { storage: StorageType::CpuHeap, ..config.clone() }
}

fn nested_nodes(state: &State) -> Vec<NodeId> {
    state.nodes().filter(|(_, n)| matches!(n, Node::Nested(_))).map(|(id, _)| id).collect()
}

/// Whether the nested node or anything below it still has work to do.
fn pending(program: &Program, sid: StateId, node: NodeId, config: &PrefetchConfig) -> bool {
    let Ok(state) = program.state(sid) else { return false };
    let Some(nested) = state.node(node).ok().and_then(Node::as_nested) else { return false };
    let inner = &nested.program;

    let child = inner_config(config);
    let children_pending = inner.state_ids().into_iter().any(|isid| {
        inner.state(isid).is_ok_and(|s| nested_nodes(s).into_iter().any(|n| pending(inner, isid, n, &child)))
    });
    if children_pending {
        return true;
    }
    let plan = OutputPlan::of(program, state, node);
    !plan.dead.is_empty() || first_match(inner, &plan.field(config)).is_some()
}

/// Pipeline every loop of the nested program at `node`, after its own nested
/// programs.
#[tracing::instrument(skip_all, fields(state = sid.index(), node = node.index()))]
pub fn prefetch_nested(program: &mut Program, sid: StateId, node: NodeId, config: &PrefetchConfig) -> Result<()> {
    let child = inner_config(config);
    {
        let inner = nested_program_mut(program, sid, node)?;
        for isid in inner.state_ids() {
            for n in nested_nodes(inner.state(isid)?) {
                prefetch_nested(inner, isid, n, &child)?;
            }
        }
    }

    let plan = OutputPlan::of(program, program.state(sid)?, node);
    eliminate_dead_stores(program, sid, node, &plan)?;
    let pass = plan.field(config);
    let inner = nested_program_mut(program, sid, node)?;
    let rewrites = apply_repeated(inner, &pass)?;
    debug!(rewrites, stored = ?pass.config.store, excluded = ?pass.exclude, "pipelined nested program");
    Ok(())
}

fn nested_program_mut(program: &mut Program, sid: StateId, node: NodeId) -> Result<&mut Program> {
    let nested = program.state_mut(sid)?.node_mut(node)?.as_nested_mut().ok_or_else(|| {
        StructuralAssumptionSnafu { pass: "prefetch_kcaches", reason: "expected a nested program" }.build()
    })?;
    Ok(&mut *nested.program)
}

// ============================================================================
// Outputs
// ============================================================================

/// What the outer graph does with the connectors of one nested node.
#[derive(Debug, Default)]
struct OutputPlan {
    /// Outputs with at least one path to a live sink.
    live: BTreeSet<String>,
    /// Outputs whose every path ends in a dead sink, with those paths.
    dead: BTreeMap<String, Vec<Vec<EdgeId>>>,
    /// Inner arrays bound to an outer array that another connector binds too.
    aliased: BTreeSet<String>,
    inputs: BTreeSet<String>,
}

impl OutputPlan {
    fn of(program: &Program, state: &State, node: NodeId) -> Self {
        let mut plan = Self::default();
        let mut bound: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for e in state.in_edges(node) {
            let Some(edge) = state.edge(e) else { continue };
            let (Some(conn), Some(data)) = (&edge.dst_conn, &edge.memlet.data) else { continue };
            plan.inputs.insert(conn.clone());
            bound.entry(data.clone()).or_default().insert(conn.clone());
        }

        let mut paths: BTreeMap<String, Vec<Vec<EdgeId>>> = BTreeMap::new();
        for e in state.out_edges(node) {
            let Some(edge) = state.edge(e) else { continue };
            let (Some(conn), Some(data)) = (&edge.src_conn, &edge.memlet.data) else { continue };
            bound.entry(data.clone()).or_default().insert(conn.clone());
            let path = state.memlet_path(e);
            if path.last().is_some_and(|&last| is_dead_sink(program, state, last)) {
                paths.entry(conn.clone()).or_default().push(path);
            } else {
                plan.live.insert(conn.clone());
            }
        }
        plan.dead = paths.into_iter().filter(|(conn, _)| !plan.live.contains(conn)).collect();
        plan.aliased = bound.into_values().filter(|conns| conns.len() > 1).flatten().collect();
        plan
    }

    /// Pass applied to the nested program.
    fn field(&self, config: &PrefetchConfig) -> PrefetchField {
        let mut config = config.clone();
        let live: Vec<String> = self.live.iter().filter(|name| !config.stores(name)).cloned().collect();
        config.store.extend(live);
        PrefetchField { config, exclude: self.aliased.clone() }
    }
}

/// The destination of `edge` is written and never read: a transient access
/// node without successors whose array no state reads.
fn is_dead_sink(program: &Program, state: &State, edge: EdgeId) -> bool {
    let Some(dst) = state.dst(edge) else { return false };
    let Some(access) = state.node(dst).ok().and_then(Node::as_access) else { return false };
    if access.access == AccessType::ReadOnly || state.out_degree(dst) > 0 {
        return false;
    }
    if !program.array(&access.data).is_ok_and(|a| a.transient) {
        return false;
    }
    program.state_ids().into_iter().filter_map(|sid| program.state(sid).ok()).all(|s| {
        s.access_nodes(&access.data).into_iter().all(|n| s.out_degree(n) == 0)
    })
}

/// Remove the dead paths of `plan` from the outer state and turn the inner
/// arrays they carried into transients.
fn eliminate_dead_stores(program: &mut Program, sid: StateId, node: NodeId, plan: &OutputPlan) -> Result<()> {
    if plan.dead.is_empty() {
        return Ok(());
    }
    let mut sinks = BTreeSet::new();
    let mut outer = BTreeSet::new();
    let state = program.state_mut(sid)?;
    for path in plan.dead.values().flatten() {
        if let Some(&last) = path.last()
            && let Some(sink) = state.dst(last)
        {
            if let Some(data) = state.node(sink)?.data() {
                outer.insert(data.to_owned());
            }
            sinks.insert(sink);
        }
        for &e in path {
            state.remove_edge_and_connectors(e);
        }
    }
    for sink in sinks {
        if state.in_degree(sink) == 0 && state.out_degree(sink) == 0 {
            state.remove_node(sink);
        }
    }
    for data in &outer {
        program.remove_array_if_unreferenced(data);
    }

    let inner = nested_program_mut(program, sid, node)?;
    for name in plan.dead.keys() {
        if !plan.inputs.contains(name)
            && let Ok(array) = inner.array_mut(name)
        {
            array.transient = true;
        }
        trace!(output = %name, "dead store");
    }
    debug!(outputs = ?plan.dead.keys().collect::<Vec<_>>(), "eliminated dead stores");
    Ok(())
}
