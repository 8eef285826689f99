//! Property-based tests for the rewrite passes.

mod register_cache;
mod tiling;
