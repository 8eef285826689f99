//! Sinking a sequential loop into the scopes of its body.
//!
//! Every one-computation scope of every body state gets its own nested k-loop
//! with the outer loop's init, condition and increment, and the outer loop is
//! removed. Body states then run once each, one after the other, instead of
//! interleaved per iteration, so no array one scope writes may be touched by
//! another scope of the body.

use std::collections::BTreeSet;

use strata_ir::{EdgeId, Match, Node, NodeId, Pattern, Program, State, StateId};
use tracing::{debug, trace};

use super::{LoopInfo, loop_pattern, matched_loop, splice_out_guard};
use crate::config::KLoopConfig;
use crate::error::*;
use crate::kloop::extract_kloop;
use crate::transform::Transformation;

#[derive(Debug, Clone, Copy, Default)]
pub struct SinkLoop;

impl Transformation for SinkLoop {
    fn name(&self) -> &'static str {
        "sink_loop"
    }

    fn patterns(&self) -> Vec<Pattern> {
        vec![loop_pattern()]
    }

    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool {
        let Some(info) = matched_loop(program, candidate) else { return false };
        let mut scopes = 0;
        for &sid in &info.body {
            match sinkable_scopes(program, sid, &info.var) {
                Some(found) => scopes += found.len(),
                None => return false,
            }
        }
        scopes > 0 && independent(program, &info)
    }

    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()> {
        let info = matched_loop(program, candidate).ok_or_else(|| {
            LoopNotDetectedSnafu { pass: self.name(), state: candidate.node(1).map_or(0, |s| s.index()) }.build()
        })?;
        sink_loop(program, &info)
    }
}

/// Scopes `(entry, computation, exit)` of `sid` that can take a nested loop
/// over `var`; `None` if the state holds anything but access nodes and such
/// scopes.
fn sinkable_scopes(program: &Program, sid: StateId, var: &str) -> Option<Vec<(NodeId, NodeId, NodeId)>> {
    let state = program.state(sid).ok()?;
    let mut scopes = Vec::new();
    for (id, node) in state.nodes() {
        match node {
            Node::Access(_) | Node::ScopeExit(_) => {}
            Node::ScopeEntry(entry) if !entry.scope.has_param(var) => {
                let contents = state.scope_contents(id);
                let [comp] = contents.as_slice() else { return None };
                if !matches!(state.node(*comp), Ok(Node::Computation(_))) {
                    return None;
                }
                scopes.push((id, *comp, state.exit_of(id)?));
            }
            Node::Computation(_) if state.scope_of(id).is_some() => {}
            _ => return None,
        }
    }
    // Copies between access nodes would lose their iteration.
    let copies_use_var = state.edge_ids().into_iter().any(|e| {
        state.endpoints(e).is_some_and(|(s, d)| {
            matches!((state.node(s), state.node(d)), (Ok(Node::Access(_)), Ok(Node::Access(_))))
                && state.edge(e).is_some_and(|edge| edge.memlet.subset.contains_symbol(var))
        })
    });
    (!copies_use_var).then_some(scopes)
}

/// Arrays read and written by one unit of the loop body.
#[derive(Debug, Default)]
struct Footprint {
    reads: BTreeSet<String>,
    writes: BTreeSet<String>,
}

fn memlet_data(state: &State, edges: Vec<EdgeId>) -> BTreeSet<String> {
    edges.into_iter().filter_map(|e| state.edge(e)?.memlet.data.clone()).collect()
}

/// Whether every array written by a scope of the body (or by a copy between
/// access nodes) is left alone by the rest of the body.
fn independent(program: &Program, info: &LoopInfo) -> bool {
    let mut units = Vec::new();
    for &sid in &info.body {
        let (Ok(state), Some(scopes)) = (program.state(sid), sinkable_scopes(program, sid, &info.var)) else {
            return false;
        };
        for (entry, _, exit) in scopes {
            units.push(Footprint {
                reads: memlet_data(state, state.in_edges(entry)),
                writes: memlet_data(state, state.out_edges(exit)),
            });
        }
        let mut copies = Footprint::default();
        for e in state.edge_ids() {
            let Some((src, dst)) = state.endpoints(e) else { continue };
            if let (Ok(Node::Access(from)), Ok(Node::Access(to))) = (state.node(src), state.node(dst)) {
                copies.reads.insert(from.data.clone());
                copies.writes.insert(to.data.clone());
            }
        }
        units.push(copies);
    }
    for (i, unit) in units.iter().enumerate() {
        for (j, other) in units.iter().enumerate() {
            if i != j && !(unit.writes.is_disjoint(&other.reads) && unit.writes.is_disjoint(&other.writes)) {
                trace!(writes = ?unit.writes, "body scopes share an array");
                return false;
            }
        }
    }
    true
}

/// Move `info`'s loop into the scopes of its body states and remove it.
#[tracing::instrument(skip_all, fields(guard = info.guard.index(), var = %info.var))]
pub fn sink_loop(program: &mut Program, info: &LoopInfo) -> Result<()> {
    snafu::ensure!(
        independent(program, info),
        UnsupportedLoopSnafu { pass: "sink_loop", reason: "body scopes depend on each other" }
    );
    let config = KLoopConfig {
        var: info.var.clone(),
        init: info.bounds.start.clone(),
        condition: info.condition.clone(),
        step: info.increment.clone(),
    };
    for &sid in &info.body {
        let scopes = sinkable_scopes(program, sid, &info.var).ok_or_else(|| {
            StructuralAssumptionSnafu { pass: "sink_loop", reason: format!("state {} is not sinkable", sid.index()) }
                .build()
        })?;
        for (entry, comp, exit) in scopes {
            extract_kloop(program, sid, entry, comp, exit, &config)?;
        }
    }
    splice_out_guard(program, info);
    debug!(states = info.body.len(), "sank loop");
    Ok(())
}
