//! Canonical loop recognition.

use strata_ir::{Condition, Expr, Program, StateId, TransitionId};
use tracing::trace;

use super::{LoopBounds, loop_bounds};

/// A recognised sequential loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInfo {
    pub guard: StateId,
    pub before: StateId,
    pub after: StateId,
    /// Body states in execution order. The guard enters the first; the last
    /// jumps back to the guard.
    pub body: Vec<StateId>,
    pub var: String,
    pub bounds: LoopBounds,
    /// Condition on the transition into the body.
    pub condition: Condition,
    /// Value assigned to the loop variable on the back edge.
    pub increment: Expr,
    pub init_edge: TransitionId,
    pub back_edge: TransitionId,
    pub enter_edge: TransitionId,
    pub exit_edge: TransitionId,
}

impl LoopInfo {
    pub fn first(&self) -> StateId {
        self.body[0]
    }

    pub fn last(&self) -> StateId {
        self.body[self.body.len() - 1]
    }

    pub fn niter(&self) -> Option<i64> {
        self.bounds.niter()
    }
}

/// Recognise the loop guarded by `guard`.
///
/// The body must be a linear chain of states without other entries or exits.
/// Returns `None` for any other shape, for an increment that is not a non-zero
/// constant stride, and for conditions [`loop_bounds`] cannot interpret.
pub fn detect_loop(program: &Program, guard: StateId) -> Option<LoopInfo> {
    let ins = program.in_transitions(guard);
    let outs = program.out_transitions(guard);
    if ins.len() != 2 || outs.len() != 2 {
        return None;
    }

    // The back edge assigns the loop variable a value depending on itself.
    let (back_edge, init_edge, var, increment) = ins.iter().find_map(|&back| {
        let init = *ins.iter().find(|&&t| t != back)?;
        let back_assign = &program.transition(back)?.assignments;
        let init_assign = &program.transition(init)?.assignments;
        back_assign
            .iter()
            .find(|(name, value)| value.contains_symbol(name) && init_assign.contains_key(*name))
            .map(|(name, value)| (back, init, name.clone(), value.clone()))
    })?;
    let (before, _) = program.transition_endpoints(init_edge)?;
    let (tail, _) = program.transition_endpoints(back_edge)?;

    let (enter_edge, exit_edge, body) = outs.iter().find_map(|&enter| {
        let exit = *outs.iter().find(|&&t| t != enter)?;
        let (_, first) = program.transition_endpoints(enter)?;
        let body = body_chain(program, guard, first, tail, back_edge)?;
        Some((enter, exit, body))
    })?;
    let (_, after) = program.transition_endpoints(exit_edge)?;
    if body.contains(&before) || body.contains(&after) {
        return None;
    }

    let stride = increment.offset_from(&var).filter(|s| *s != 0)?;
    let init = program.transition(init_edge)?.assignments.get(&var)?.clone();
    let condition = program.transition(enter_edge)?.condition.clone();
    let bounds = loop_bounds(&var, &init, &condition, stride)?;
    trace!(guard = guard.index(), var, start = %bounds.start, end = %bounds.end, stride, "detected loop");

    Some(LoopInfo {
        guard,
        before,
        after,
        body,
        var,
        bounds,
        condition,
        increment,
        init_edge,
        back_edge,
        enter_edge,
        exit_edge,
    })
}

/// States from `first` to `tail` when they form a chain with single entries
/// and exits and `tail` leaves only through `back_edge`.
fn body_chain(
    program: &Program,
    guard: StateId,
    first: StateId,
    tail: StateId,
    back_edge: TransitionId,
) -> Option<Vec<StateId>> {
    let mut chain = vec![first];
    let mut current = first;
    loop {
        if current == guard || program.in_transitions(current).len() != 1 {
            return None;
        }
        let outs = program.out_transitions(current);
        if current == tail {
            return (outs == [back_edge]).then_some(chain);
        }
        let [next] = outs.as_slice() else { return None };
        let (_, next) = program.transition_endpoints(*next)?;
        if chain.contains(&next) {
            return None;
        }
        chain.push(next);
        current = next;
    }
}
