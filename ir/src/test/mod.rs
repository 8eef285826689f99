//! Test suites for the IR.
//!
//! `property::generators` is public so downstream crates can reuse the
//! strategies through the `proptest` feature.

pub mod property;
