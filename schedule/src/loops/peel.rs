//! Loop peeling.
//!
//! Peeled iterations are copies of the body chain with the loop variable
//! substituted by its value in that iteration. Peeling from the front moves the
//! loop start; peeling from the back tightens the loop condition.

use strata_ir::{CmpOp, Condition, Expr, InterstateEdge, Match, Pattern, Program, StateId};
use tracing::debug;

use super::{LoopInfo, loop_pattern, matched_loop};
use crate::config::PeelConfig;
use crate::error::*;
use crate::transform::Transformation;

/// Peels iterations off any detected loop, without profitability checks.
///
/// Loops with a constant trip count below the peel count are left alone.
#[derive(Debug, Clone, Default)]
pub struct ForcedPeeling {
    pub config: PeelConfig,
}

impl ForcedPeeling {
    pub fn new(config: PeelConfig) -> Self {
        Self { config }
    }
}

impl Transformation for ForcedPeeling {
    fn name(&self) -> &'static str {
        "forced_peeling"
    }

    fn patterns(&self) -> Vec<Pattern> {
        vec![loop_pattern()]
    }

    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool {
        let count = self.config.count;
        count > 0 && matched_loop(program, candidate).is_some_and(|info| info.niter().is_none_or(|n| n >= count))
    }

    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()> {
        let info = matched_loop(program, candidate).ok_or_else(|| {
            LoopNotDetectedSnafu { pass: self.name(), state: candidate.node(1).map_or(0, |s| s.index()) }.build()
        })?;
        peel_loop(program, &info, self.config.count, self.config.begin)?;
        Ok(())
    }
}

/// Peel `count` iterations off the front (`begin`) or back of `info`'s loop.
///
/// Returns the copied states in execution order.
#[tracing::instrument(skip_all, fields(guard = info.guard.index(), var = %info.var, count, begin))]
pub fn peel_loop(program: &mut Program, info: &LoopInfo, count: i64, begin: bool) -> Result<Vec<StateId>> {
    let mut copies = Vec::new();
    if begin {
        let init = program.remove_transition(info.init_edge).unwrap_or_default();
        let mut prev = info.before;
        let mut edge = init;
        for n in 0..count {
            let (first, last, states) = copy_body(program, info, &info.bounds.value_at(n), &format!("peel{n}"))?;
            program.add_transition(prev, first, edge);
            copies.extend(states);
            prev = last;
            edge = InterstateEdge::default();
        }
        program.add_transition(prev, info.guard, edge.with_assignment(&info.var, info.bounds.value_at(count)));
    } else {
        let stride = info.bounds.stride;
        let last_in_loop = info.bounds.end.clone() - count * stride;
        let op = if stride > 0 { CmpOp::Le } else { CmpOp::Ge };
        let condition = Condition::compare(Expr::sym(&info.var), op, last_in_loop);
        if let Some(enter) = program.transition_mut(info.enter_edge) {
            enter.condition = condition.clone();
        }

        let exit = program.remove_transition(info.exit_edge).unwrap_or_default();
        let mut prev = info.guard;
        let mut edge = InterstateEdge::new(condition.negate());
        for n in 0..count {
            let value = info.bounds.end.clone() - (count - 1 - n) * stride;
            let (first, last, states) = copy_body(program, info, &value, &format!("peel_end{n}"))?;
            program.add_transition(prev, first, edge);
            copies.extend(states);
            prev = last;
            edge = InterstateEdge::default();
        }

        // Leave the loop variable where the original loop would have.
        let exit_value = info.bounds.end.clone() + stride;
        let mut leave = InterstateEdge::assign(&info.var, exit_value.clone());
        for (name, value) in exit.assignments {
            leave.assignments.insert(name, value.subs(&info.var, &exit_value));
        }
        program.add_transition(prev, info.after, leave);
    }
    debug!(copies = copies.len(), "peeled");
    Ok(copies)
}

/// Copy the body chain with the loop variable fixed to `value`.
///
/// Returns the first and last copied state and every copy in order.
fn copy_body(
    program: &mut Program,
    info: &LoopInfo,
    value: &Expr,
    tag: &str,
) -> Result<(StateId, StateId, Vec<StateId>)> {
    let mut copies = Vec::with_capacity(info.body.len());
    for &state in &info.body {
        let mut copy = program.state(state)?.clone();
        copy.label = format!("{}_{tag}", copy.label);
        copy.substitute(&info.var, value);
        copies.push(program.add_state_with(copy));
    }
    for (pair, copy) in info.body.windows(2).zip(copies.windows(2)) {
        for t in program.transitions_between(pair[0], pair[1]) {
            let Some(edge) = program.transition(t) else { continue };
            let edge = InterstateEdge {
                condition: edge.condition.subs(&info.var, value),
                assignments: edge.assignments.iter().map(|(n, v)| (n.clone(), v.subs(&info.var, value))).collect(),
            };
            program.add_transition(copy[0], copy[1], edge);
        }
    }
    Ok((copies[0], copies[copies.len() - 1], copies))
}
