//! Property-based tests for the IR.
//!
//! Uses proptest to verify invariants across wide input spaces.

#[cfg(test)]
mod expr_props;

pub mod generators;
