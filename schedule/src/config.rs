//! Per-pass options.
//!
//! Options are set once before a rewrite runs; there is no other configuration
//! channel. Every config has a `Default` and a `builder()` with the same
//! defaults.

use bon::bon;
use strata_ir::{CmpOp, Condition, Expr, StorageType};

use crate::error::*;
use crate::loops::{LoopBounds, loop_bounds};

// ============================================================================
// Domain tiling
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingConfig {
    /// Tile extent along the first domain axis.
    pub tile_i: i64,
    /// Tile extent along the second domain axis.
    pub tile_j: i64,
    /// Storage class given to transients of the tiled program.
    pub storage: StorageType,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self { tile_i: 8, tile_j: 8, storage: StorageType::CpuThreadLocal }
    }
}

#[bon]
impl TilingConfig {
    #[builder]
    pub fn builder(
        #[builder(default = 8)] tile_i: i64,
        #[builder(default = 8)] tile_j: i64,
        #[builder(default = StorageType::CpuThreadLocal)] storage: StorageType,
    ) -> Self {
        Self { tile_i, tile_j, storage }
    }
}

// ============================================================================
// K-loop extraction
// ============================================================================

/// Sequential loop `for var = init; condition; var = step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KLoopConfig {
    pub var: String,
    pub init: Expr,
    pub condition: Condition,
    /// Value assigned to `var` after every iteration, e.g. `k + 1`.
    pub step: Expr,
}

impl Default for KLoopConfig {
    fn default() -> Self {
        Self {
            var: "k".into(),
            init: Expr::int(0),
            condition: Condition::compare(Expr::sym("k"), CmpOp::Lt, Expr::sym("K")),
            step: Expr::sym("k") + 1,
        }
    }
}

#[bon]
impl KLoopConfig {
    /// Parse and check the loop description.
    ///
    /// The condition must compare `var` against a bound with `<`, `<=`, `>` or
    /// `>=`, and `step` must move `var` by a non-zero constant towards it.
    #[builder]
    pub fn builder(
        #[builder(into, default = String::from("k"))] var: String,
        #[builder(into, default = String::from("0"))] init: String,
        #[builder(into, default = String::from("k<K"))] condition: String,
        #[builder(into, default = String::from("k+1"))] step: String,
    ) -> Result<Self> {
        let config = Self {
            init: Expr::parse(&init)?,
            condition: Condition::parse(&condition)?,
            step: Expr::parse(&step)?,
            var,
        };
        config.bounds()?;
        Ok(config)
    }

    /// First and last iteration value and the constant stride.
    pub fn bounds(&self) -> Result<LoopBounds> {
        let stride = self.step.offset_from(&self.var).filter(|s| *s != 0).ok_or_else(|| {
            let reason = format!("`{}` is not `{} + c` with c != 0", self.step, self.var);
            InvalidConfigSnafu { option: "step", reason }.build()
        })?;
        loop_bounds(&self.var, &self.init, &self.condition, stride).ok_or_else(|| {
            InvalidConfigSnafu {
                option: "condition",
                reason: format!("`{}` does not bound `{}` in the direction of the step", self.condition, self.var),
            }
            .build()
        })
    }

    /// Inclusive `[k_min, k_max]` covered by the loop, whatever its direction.
    pub fn range(&self) -> Result<(Expr, Expr)> {
        let bounds = self.bounds()?;
        Ok(if bounds.stride > 0 { (bounds.start, bounds.end) } else { (bounds.end, bounds.start) })
    }
}

// ============================================================================
// Pipelining
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrefetchConfig {
    /// Storage class of the ring buffers.
    pub storage: StorageType,
    /// Arrays to buffer; `None` buffers every array the loop sweeps.
    pub arrays: Option<Vec<String>>,
    /// Arrays whose buffered writes are written back to the real array.
    pub store: Vec<String>,
}

#[bon]
impl PrefetchConfig {
    #[builder]
    pub fn builder(
        #[builder(default)] storage: StorageType,
        arrays: Option<Vec<String>>,
        #[builder(default)] store: Vec<String>,
    ) -> Self {
        Self { storage, arrays, store }
    }

    pub fn selects(&self, name: &str) -> bool {
        self.arrays.as_ref().is_none_or(|a| a.iter().any(|n| n == name))
    }

    pub fn stores(&self, name: &str) -> bool {
        self.store.iter().any(|n| n == name)
    }
}

// ============================================================================
// Register cache and peeling
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCacheConfig {
    /// Transient array turned into a ring buffer.
    pub array: String,
}

#[bon]
impl RegisterCacheConfig {
    #[builder]
    pub fn builder(#[builder(into)] array: String) -> Self {
        Self { array }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeelConfig {
    /// Iterations to peel.
    pub count: i64,
    /// Peel from the first iteration when `true`, from the last otherwise.
    pub begin: bool,
}

impl Default for PeelConfig {
    fn default() -> Self {
        Self { count: 1, begin: true }
    }
}

#[bon]
impl PeelConfig {
    #[builder]
    pub fn builder(#[builder(default = 1)] count: i64, #[builder(default = true)] begin: bool) -> Self {
        Self { count, begin }
    }
}
