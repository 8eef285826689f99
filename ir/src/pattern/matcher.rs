//! Backtracking subgraph matcher.

use petgraph::Direction;
use petgraph::stable_graph::NodeIndex;
use smallvec::SmallVec;
use tracing::trace;

use super::{Match, NodeKind, Pattern};
use crate::program::Program;
use crate::state::State;

/// Every binding of `pattern` in `program`, ordered by state then node index.
///
/// Dataflow patterns are searched in the program's own states only, not in
/// nested programs.
pub fn find_matches(program: &Program, pattern: &Pattern) -> Vec<Match> {
    let matches = match pattern {
        Pattern::Dataflow(kinds) if !kinds.is_empty() => program
            .state_ids()
            .into_iter()
            .flat_map(|sid| {
                dataflow_matches(&program.states[sid], kinds)
                    .into_iter()
                    .map(move |nodes| Match { state: Some(sid), nodes })
            })
            .collect(),
        Pattern::Control { states, transitions } if *states > 0 => {
            let mut out = Vec::new();
            let mut binding = SmallVec::new();
            control_matches(program, *states, transitions, &mut binding, &mut out);
            out.into_iter().map(|nodes| Match { state: None, nodes }).collect()
        }
        _ => Vec::new(),
    };
    trace!(program = %program.name, ?pattern, count = matches.len(), "pattern matches");
    matches
}

fn sorted_neighbors(state: &State, node: NodeIndex) -> Vec<NodeIndex> {
    let mut out: Vec<_> = state.graph.neighbors_directed(node, Direction::Outgoing).collect();
    out.sort();
    out.dedup();
    out
}

fn dataflow_matches(state: &State, kinds: &[NodeKind]) -> Vec<SmallVec<[NodeIndex; 8]>> {
    let mut out = Vec::new();
    for (id, node) in state.nodes() {
        if kinds[0].matches(node) {
            let mut path = SmallVec::from_elem(id, 1);
            extend_path(state, kinds, &mut path, &mut out);
        }
    }
    out
}

fn extend_path(
    state: &State,
    kinds: &[NodeKind],
    path: &mut SmallVec<[NodeIndex; 8]>,
    out: &mut Vec<SmallVec<[NodeIndex; 8]>>,
) {
    if path.len() == kinds.len() {
        out.push(path.clone());
        return;
    }
    let Some(&last) = path.last() else { return };
    let kind = kinds[path.len()];
    for next in sorted_neighbors(state, last) {
        if path.contains(&next) || !state.graph.node_weight(next).is_some_and(|n| kind.matches(n)) {
            continue;
        }
        path.push(next);
        extend_path(state, kinds, path, out);
        path.pop();
    }
}

fn control_matches(
    program: &Program,
    size: usize,
    transitions: &[(usize, usize)],
    binding: &mut SmallVec<[NodeIndex; 8]>,
    out: &mut Vec<SmallVec<[NodeIndex; 8]>>,
) {
    let position = binding.len();
    if position == size {
        out.push(binding.clone());
        return;
    }
    for candidate in program.state_ids() {
        if binding.contains(&candidate) {
            continue;
        }
        binding.push(candidate);
        // Check every pattern transition whose endpoints are now both bound.
        let consistent = transitions.iter().filter(|(a, b)| (*a).max(*b) == position).all(|&(a, b)| {
            !program.transitions_between(binding[a], binding[b]).is_empty()
        });
        if consistent {
            control_matches(program, size, transitions, binding, out);
        }
        binding.pop();
    }
}
