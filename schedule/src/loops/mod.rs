//! State-machine loops: detection, peeling, trivial-loop removal and sinking an
//! outer loop into the scopes of its body.
//!
//! A canonical loop is a guard state with two in-transitions (the init edge from
//! the state before the loop and the back edge from the loop tail) and two
//! out-transitions (into the body under the loop condition, and out of the loop
//! under its negation).

pub mod detect;
pub mod peel;
pub mod sink;
pub mod trivial;

use strata_ir::{CmpOp, Condition, Expr, InterstateEdge, Match, Pattern, Program, expr::floor_div};

pub use detect::{LoopInfo, detect_loop};
pub use peel::{ForcedPeeling, peel_loop};
pub use sink::{SinkLoop, sink_loop};
pub use trivial::RemoveTrivialLoop;

/// Control pattern binding `[before, guard, body, after]`.
pub fn loop_pattern() -> Pattern {
    Pattern::control(4, [(0, 1), (1, 2), (1, 3)])
}

/// Loop bound by a [`loop_pattern`] match, if the roles agree with detection.
pub fn matched_loop(program: &Program, candidate: &Match) -> Option<LoopInfo> {
    let info = detect_loop(program, candidate.node(1)?)?;
    let roles = [Some(info.before), Some(info.first()), Some(info.after)];
    (roles == [candidate.node(0), candidate.node(2), candidate.node(3)]).then_some(info)
}

/// Remove the guard of a loop whose body runs straight through once.
///
/// `before` is linked to the first body state with the init edge, and the last
/// body state to `after` with the loop variable set to the value it has when
/// the loop exits.
pub(crate) fn splice_out_guard(program: &mut Program, info: &LoopInfo) {
    let init = program.remove_transition(info.init_edge).unwrap_or_default();
    program.add_transition(info.before, info.first(), init);

    let back = program.remove_transition(info.back_edge).unwrap_or_default();
    let exit = program.remove_transition(info.exit_edge).unwrap_or_default();
    let exit_value = info.bounds.end.clone() + info.bounds.stride;
    let mut leave = InterstateEdge::assign(&info.var, exit_value.clone());
    for (name, value) in back.assignments.into_iter().filter(|(n, _)| *n != info.var) {
        leave.assignments.insert(name, value.subs(&info.var, &info.bounds.end));
    }
    for (name, value) in exit.assignments {
        leave.assignments.insert(name, value.subs(&info.var, &exit_value));
    }
    program.add_transition(info.last(), info.after, leave);

    program.remove_transition(info.enter_edge);
    program.remove_state(info.guard);
}

/// Drop a loop whose condition fails on entry: `before` goes straight to
/// `after`, and the guard and body states are removed.
pub(crate) fn bypass_loop(program: &mut Program, info: &LoopInfo) {
    let init = program.remove_transition(info.init_edge).unwrap_or_default();
    let exit = program.remove_transition(info.exit_edge).unwrap_or_default();
    let mut skip = InterstateEdge { condition: init.condition, assignments: init.assignments.clone() };
    for (name, value) in exit.assignments {
        skip.assignments.insert(name, value.subs_all(&init.assignments));
    }
    program.add_transition(info.before, info.after, skip);
    for &state in &info.body {
        program.remove_state(state);
    }
    program.remove_state(info.guard);
}

/// Iteration space of a loop: `start`, `start + stride`, ... up to `end` inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBounds {
    pub start: Expr,
    /// Last value the loop variable takes.
    pub end: Expr,
    pub stride: i64,
}

impl LoopBounds {
    /// Number of iterations when it is a compile-time constant.
    pub fn niter(&self) -> Option<i64> {
        let span = self.end.const_diff(&self.start)?;
        Some((floor_div(span, self.stride) + 1).max(0))
    }

    /// Value of the loop variable at iteration `n` (zero based).
    pub fn value_at(&self, n: i64) -> Expr {
        self.start.clone() + n * self.stride
    }
}

/// Bounds of `for var = init; condition; var += stride`.
///
/// `condition` must compare `var + c` against an expression free of `var`, on
/// either side, with an ordering operator that agrees with the sign of
/// `stride`. Anything else is `None`.
pub fn loop_bounds(var: &str, init: &Expr, condition: &Condition, stride: i64) -> Option<LoopBounds> {
    let Condition::Compare { lhs, op, rhs } = condition else { return None };
    let (offset, op, bound) = match (lhs.offset_from(var), rhs.offset_from(var)) {
        (Some(c), None) if !rhs.contains_symbol(var) => (c, *op, rhs.clone()),
        (None, Some(c)) if !lhs.contains_symbol(var) => (c, op.flip(), lhs.clone()),
        _ => return None,
    };
    let bound = bound - offset;
    let end = match op {
        CmpOp::Lt if stride > 0 => bound - 1,
        CmpOp::Le if stride > 0 => bound,
        CmpOp::Gt if stride < 0 => bound + 1,
        CmpOp::Ge if stride < 0 => bound,
        _ => return None,
    };
    let end = match end.const_diff(init) {
        Some(span) if stride.abs() != 1 => init.clone() + floor_div(span, stride) * stride,
        _ => end,
    };
    Some(LoopBounds { start: init.clone(), end, stride })
}
