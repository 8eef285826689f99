//! Output pruning: drop composite outputs nobody reads.
//!
//! A composite computation writing a transient that is never read afterwards,
//! neither later in the same state nor along the linear chain of successor
//! states, loses that output together with its per-interval writes.

use std::collections::BTreeSet;

use strata_ir::{AccessType, EdgeId, Match, Node, NodeId, NodeKind, Pattern, Program, State, StateId, Subset, out_conn};
use tracing::{debug, trace};

use crate::error::*;
use crate::transform::Transformation;

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputPruning;

impl OutputPruning {
    fn binding(candidate: &Match) -> Option<(StateId, NodeId, NodeId)> {
        Some((candidate.state?, candidate.node(0)?, candidate.node(1)?))
    }

    /// Single edge from the composite into the access node.
    fn candidate_edge(state: &State, comp: NodeId, access: NodeId) -> Option<EdgeId> {
        match state.edges_between(comp, access).as_slice() {
            [edge] => Some(*edge),
            _ => None,
        }
    }
}

impl Transformation for OutputPruning {
    fn name(&self) -> &'static str {
        "output_pruning"
    }

    fn patterns(&self) -> Vec<Pattern> {
        vec![Pattern::path([NodeKind::Composite, NodeKind::Access])]
    }

    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool {
        let Some((sid, comp, access)) = Self::binding(candidate) else { return false };
        let Ok(state) = program.state(sid) else { return false };
        let Some(data) = state.node(access).ok().and_then(Node::data) else { return false };
        if !program.array(data).is_ok_and(|a| a.transient) {
            return false;
        }
        let Some(edge) = Self::candidate_edge(state, comp, access).and_then(|e| state.edge(e)) else { return false };
        let composite = state.node(comp).ok().and_then(Node::as_computation).and_then(|c| c.composite.as_ref());
        if composite.is_some_and(|c| !c.intervals.iter().all(|interval| write_only(interval, data))) {
            trace!(data, "read inside an interval");
            return false;
        }
        let written = &edge.memlet.subset;
        if !no_reads(state, data, written) {
            trace!(data, "read in the writing state");
            return false;
        }

        let mut visited = BTreeSet::from([sid]);
        let mut successors = program.successors(sid);
        while let [next] = successors.as_slice() {
            let next = *next;
            if !visited.insert(next) {
                trace!(data, "successor chain loops");
                return false;
            }
            let Ok(state) = program.state(next) else { return false };
            if !no_reads(state, data, written) {
                trace!(data, state = %state.label, "read downstream");
                return false;
            }
            successors = program.successors(next);
        }
        // Control forks are not followed.
        successors.is_empty()
    }

    #[tracing::instrument(skip_all)]
    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()> {
        let Some((sid, comp, access)) = Self::binding(candidate) else {
            return StructuralAssumptionSnafu { pass: self.name(), reason: "incomplete match" }.fail();
        };
        let state = program.state_mut(sid)?;
        let data = state
            .node(access)?
            .data()
            .ok_or_else(|| {
                StructuralAssumptionSnafu { pass: "output_pruning", reason: "expected an access node" }.build()
            })?
            .to_owned();
        let edge = Self::candidate_edge(state, comp, access).ok_or_else(|| {
            StructuralAssumptionSnafu { pass: "output_pruning", reason: format!("expected one edge writing `{data}`") }
                .build()
        })?;

        let Some(computation) = state.node_mut(comp)?.as_computation_mut() else {
            return StructuralAssumptionSnafu { pass: self.name(), reason: "expected a computation" }.fail();
        };
        computation.outputs.remove(&out_conn(&data));
        if let Some(composite) = computation.composite.as_mut() {
            composite.outputs.remove(&data);
            let labels: BTreeSet<String> =
                composite.write_accesses.iter().filter(|(_, outer)| **outer == data).map(|(l, _)| l.clone()).collect();
            composite.write_accesses.retain(|label, _| !labels.contains(label));
            for interval in &mut composite.intervals {
                prune_interval(interval, &data, &labels)?;
            }
        }

        state.remove_edge_and_connectors(edge);
        if state.in_degree(access) == 0 && state.out_degree(access) == 0 {
            state.remove_node(access);
        }
        let dropped = program.remove_array_if_unreferenced(&data);
        debug!(data, dropped, "pruned transient output");
        Ok(())
    }
}

/// Whether no access node of `data` in `state` feeds a read that may overlap
/// `written`.
fn no_reads(state: &State, data: &str, written: &Subset) -> bool {
    state.access_nodes(data).into_iter().all(|node| {
        state.out_edges(node).into_iter().filter_map(|e| state.edge(e)).all(|edge| {
            edge.memlet.data_is(data) && !edge.memlet.subset.may_overlap(written)
        })
    })
}

/// Whether every access node of `data` in `interval` is a sink.
fn write_only(interval: &Program, data: &str) -> bool {
    interval.state_ids().into_iter().all(|sid| {
        interval.state(sid).is_ok_and(|state| state.access_nodes(data).into_iter().all(|n| state.out_degree(n) == 0))
    })
}

/// Remove the writes of `data` from one interval program: the computation
/// connectors named in `labels` with their edges and every written access node.
fn prune_interval(interval: &mut Program, data: &str, labels: &BTreeSet<String>) -> Result<()> {
    for sid in interval.state_ids() {
        let state = interval.state_mut(sid)?;
        for id in state.node_ids() {
            if !matches!(state.node(id)?, Node::Computation(_)) {
                continue;
            }
            for label in labels {
                for e in state.out_edges_by_conn(id, label) {
                    state.remove_edge_and_connectors(e);
                }
                state.node_mut(id)?.remove_out_connector(label);
            }
        }
        let written: Vec<_> = state
            .access_nodes(data)
            .into_iter()
            .filter(|&n| state.node(n).ok().and_then(Node::as_access).is_some_and(|a| a.access != AccessType::ReadOnly))
            .collect();
        for node in written {
            snafu::ensure!(
                state.out_degree(node) == 0,
                StructuralAssumptionSnafu {
                    pass: "output_pruning",
                    reason: format!("`{data}` is read inside interval `{}`", state.label),
                }
            );
            state.remove_node_and_connectors(node);
        }
    }
    interval.remove_array_if_unreferenced(data);
    Ok(())
}
