//! Register caching of a loop-carried transient.
//!
//! When a loop only ever touches a transient at a few constant offsets from
//! the loop variable, the swept axis can be folded into a ring of exactly that
//! many slots: index `k + o` becomes `(k + o) mod size`. Offsets that are live
//! in the same iteration stay distinct modulo `size` because they span less
//! than `size`.

use std::collections::BTreeSet;

use strata_ir::{EdgeId, Expr, Match, Node, Pattern, Program, Range, State, StateId};
use tracing::{debug, trace};

use crate::config::RegisterCacheConfig;
use crate::error::*;
use crate::transform::Transformation;

#[derive(Debug, Clone)]
pub struct RegisterCache {
    pub config: RegisterCacheConfig,
}

impl RegisterCache {
    pub fn new(config: RegisterCacheConfig) -> Self {
        Self { config }
    }

    /// Loop variable assigned on the edge entering the guard from `before`.
    fn loop_var(program: &Program, before: StateId, guard: StateId) -> Option<String> {
        let init = *program.transitions_between(before, guard).first()?;
        program.transition(init)?.assignments.keys().next().cloned()
    }

    /// Swept axis and ring size for the loop bound by `candidate`.
    fn plan(&self, program: &Program, candidate: &Match) -> Option<(String, usize, i64)> {
        let (before, guard, body) = (candidate.node(0)?, candidate.node(1)?, candidate.node(2)?);
        let array = program.array(&self.config.array).ok()?;
        if !array.transient {
            return None;
        }
        let var = Self::loop_var(program, before, guard)?;
        let state = program.state(body).ok()?;

        let mut axes = BTreeSet::new();
        let mut offsets = Vec::new();
        for e in array_edges(state, &self.config.array) {
            let memlet = &state.edge(e)?.memlet;
            if !memlet.data_is(&self.config.array) {
                return None;
            }
            for d in memlet.subset.dims_with_symbol(&var) {
                let range = memlet.subset.dim(d)?;
                let begin = range.begin.offset_from(&var)?;
                if range.end.offset_from(&var)? != begin {
                    trace!(array = %self.config.array, "not a single point on the swept axis");
                    return None;
                }
                axes.insert(d);
                offsets.push(begin);
            }
        }
        let axes: Vec<usize> = axes.into_iter().collect();
        let &[axis] = axes.as_slice() else { return None };
        let size = offsets.iter().max()? - offsets.iter().min()? + 1;

        // Every index folded outside the body must be a single point too.
        for sid in program.state_ids() {
            let state = program.state(sid).ok()?;
            for e in array_edges(state, &self.config.array) {
                let memlet = &state.edge(e)?.memlet;
                let range = memlet.subset.dim(axis)?;
                if !memlet.data_is(&self.config.array) || range.begin != range.end {
                    return None;
                }
            }
        }
        Some((var, axis, size))
    }
}

impl Transformation for RegisterCache {
    fn name(&self) -> &'static str {
        "register_cache"
    }

    fn patterns(&self) -> Vec<Pattern> {
        vec![Pattern::control(3, [(0, 1), (1, 2), (2, 1)])]
    }

    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool {
        self.plan(program, candidate).is_some()
    }

    #[tracing::instrument(skip_all, fields(array = %self.config.array))]
    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()> {
        let (var, axis, size) = self.plan(program, candidate).ok_or_else(|| {
            StructuralAssumptionSnafu { pass: self.name(), reason: "loop does not sweep the array at constant offsets" }
                .build()
        })?;
        let name = self.config.array.as_str();
        for sid in program.state_ids() {
            let state = program.state_mut(sid)?;
            for e in array_edges(state, name) {
                let Some(range) = state.edge_mut(e).and_then(|edge| edge.memlet.subset.dim_mut(axis)) else { continue };
                *range = Range {
                    begin: Expr::modulo(range.begin.clone(), Expr::int(size)),
                    end: Expr::modulo(range.end.clone(), Expr::int(size)),
                    step: range.step.clone(),
                };
            }
        }

        let array = program.array_mut(name)?;
        let others_unit = array.shape.iter().enumerate().all(|(d, s)| d == axis || *s == Expr::int(1));
        if others_unit {
            array.shape[axis] = Expr::int(size);
        }
        debug!(%var, axis, size, shrunk = others_unit, "register cache");
        Ok(())
    }
}

/// Edges with an access node of `data` at either end.
fn array_edges(state: &State, data: &str) -> Vec<EdgeId> {
    state
        .edge_ids()
        .into_iter()
        .filter(|&e| {
            state.endpoints(e).is_some_and(|(s, d)| {
                [s, d]
                    .into_iter()
                    .any(|n| state.node(n).is_ok_and(|node| matches!(node, Node::Access(a) if a.data == data)))
            })
        })
        .collect()
}
