//! Pass interface and a minimal fixpoint driver.
//!
//! A pass declares the subgraph shapes it rewrites as [`Pattern`]s. The driver
//! enumerates matches with [`find_matches`], asks the pass whether a binding is
//! applicable and, if so, hands it to [`Transformation::apply`]. Applicability is
//! a plain `bool`: a declined match is not an error.

use strata_ir::{Match, Pattern, Program, find_matches};
use tracing::{debug, trace};

use crate::error::*;

/// Upper bound on rewrites performed by [`apply_repeated`].
pub const MAX_REWRITES: usize = 1000;

pub trait Transformation {
    fn name(&self) -> &'static str;

    /// Subgraph shapes this pass rewrites.
    fn patterns(&self) -> Vec<Pattern>;

    /// Whether `candidate` can be rewritten. Must not mutate anything.
    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool;

    /// Rewrite `candidate`. Only called after [`Transformation::can_be_applied`]
    /// returned `true` for the same binding.
    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()>;
}

/// First applicable match of `pass` in `program`, in pattern order.
pub fn first_match(program: &Program, pass: &dyn Transformation) -> Option<Match> {
    pass.patterns()
        .iter()
        .flat_map(|pattern| find_matches(program, pattern))
        .find(|candidate| pass.can_be_applied(program, candidate))
}

/// Apply the first applicable match of `pass`; reports whether one was found.
#[tracing::instrument(skip_all, fields(pass = pass.name(), program = %program.name))]
pub fn apply_once(program: &mut Program, pass: &dyn Transformation) -> Result<bool> {
    let Some(candidate) = first_match(program, pass) else {
        trace!("no applicable match");
        return Ok(false);
    };
    debug!(nodes = ?candidate.nodes, state = ?candidate.state, "applying");
    pass.apply(program, &candidate)?;
    Ok(true)
}

/// Apply `pass` until no match is applicable; returns the number of rewrites.
#[tracing::instrument(skip_all, fields(pass = pass.name(), program = %program.name))]
pub fn apply_repeated(program: &mut Program, pass: &dyn Transformation) -> Result<usize> {
    let mut count = 0;
    while apply_once(program, pass)? {
        count += 1;
        snafu::ensure!(
            count < MAX_REWRITES,
            StructuralAssumptionSnafu {
                pass: pass.name(),
                reason: format!("no fixpoint after {MAX_REWRITES} rewrites"),
            }
        );
    }
    debug!(count, "fixpoint reached");
    Ok(count)
}
