//! Removal of loops that run exactly once.

use strata_ir::{Match, Pattern, Program};
use tracing::debug;

use super::{loop_pattern, matched_loop, splice_out_guard};
use crate::error::*;
use crate::transform::Transformation;

/// Splices a single-iteration loop into straight-line control flow and drops
/// its guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveTrivialLoop;

impl Transformation for RemoveTrivialLoop {
    fn name(&self) -> &'static str {
        "remove_trivial_loop"
    }

    fn patterns(&self) -> Vec<Pattern> {
        vec![loop_pattern()]
    }

    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool {
        matched_loop(program, candidate).is_some_and(|info| info.bounds.start.const_diff(&info.bounds.end) == Some(0))
    }

    #[tracing::instrument(skip_all)]
    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()> {
        let info = matched_loop(program, candidate).ok_or_else(|| {
            LoopNotDetectedSnafu { pass: self.name(), state: candidate.node(1).map_or(0, |s| s.index()) }.build()
        })?;

        splice_out_guard(program, &info);
        debug!(var = %info.var, value = %info.bounds.start, "removed trivial loop");
        Ok(())
    }
}
