//! Rewrite passes over the `strata-ir` dataflow representation.
//!
//! Every pass implements [`Transformation`]: it describes the subgraphs it
//! rewrites as patterns, decides applicability per match and rewrites one
//! match at a time. [`apply_once`] and [`apply_repeated`] drive a pass over a
//! program.
//!
//! # Module Organization
//!
//! - [`tiling`] - Domain tiling into a parallel scope over a nested tile program
//! - [`prune`] - Dead transient outputs of composite computations
//! - [`kloop`] - Extraction of a sequential loop into a nested program
//! - [`loops`] - Loop detection, peeling, trivial-loop removal and loop sinking
//! - [`pipeline`] - Ring-buffer pipelining of sequential sweeps
//! - [`register_cache`] - Folding a loop-carried transient into a ring
//! - [`fusion`] - Map fusion by replication
//! - [`config`] - Per-pass options
//! - [`transform`] - The pass interface and driver

pub mod config;
pub mod error;
pub mod fusion;
pub mod kloop;
pub mod loops;
pub mod pipeline;
pub mod prune;
pub mod register_cache;
pub mod tiling;
pub mod transform;


pub use config::{KLoopConfig, PeelConfig, PrefetchConfig, RegisterCacheConfig, TilingConfig};
pub use error::{Error, Result};
pub use fusion::MapFusion;
pub use kloop::{KLoopExtraction, extract_kloop};
pub use loops::{ForcedPeeling, LoopInfo, RemoveTrivialLoop, SinkLoop, detect_loop, peel_loop, sink_loop};
pub use pipeline::{PrefetchField, PrefetchKCaches, prefetch_nested};
pub use prune::OutputPruning;
pub use register_cache::RegisterCache;
pub use tiling::tile_domain;
pub use transform::{MAX_REWRITES, Transformation, apply_once, apply_repeated, first_match};
