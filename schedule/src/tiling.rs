//! Domain tiling.
//!
//! The whole program moves into a nested graph that runs once per tile of the
//! `I x J` domain:
//!
//! ```text
//! a -> [global_tiling(tile_i, tile_j)] -> nested(I = min(ti, I - tile_i), ...) -> [exit] -> b
//! ```
//!
//! Arrays whose extent along a domain axis is `I + c` (or `J + c`) are handed
//! to the tile as the window `[tile_i, min(tile_i + ti, I) + c - 1]`, so the
//! constant halo frame `c` comes along with every tile. Other dimensions are
//! passed whole.

use std::collections::BTreeMap;

use strata_ir::{AccessType, EdgeId, Expr, Memlet, Node, Program, Range, Scope, State, StateId, Subset};
use tracing::debug;

use crate::config::TilingConfig;
use crate::error::*;

/// Domain extent symbols, one per tiled axis.
pub const DOMAIN: [&str; 2] = ["I", "J"];
/// Tile origin parameters of the tiling scope.
pub const TILE_PARAMS: [&str; 2] = ["tile_i", "tile_j"];
pub const SCOPE_LABEL: &str = "global_tiling";

/// Wrap `program` in a collapsed two-dimensional tiling scope.
///
/// Returns the state holding the scope.
#[tracing::instrument(skip_all, fields(program = %program.name, tile_i = config.tile_i, tile_j = config.tile_j))]
pub fn tile_domain(program: &mut Program, config: &TilingConfig) -> Result<StateId> {
    let tiles = [config.tile_i, config.tile_j];
    for (option, tile) in [("tile_i", config.tile_i), ("tile_j", config.tile_j)] {
        snafu::ensure!(tile > 0, InvalidConfigSnafu { option, reason: format!("tile extent {tile} is not positive") });
    }

    let (inputs, outputs) = external_accesses(program);
    let mut inner = program.clone();
    inner.name = format!("{}_tile", program.name);
    for array in inner.arrays.values_mut().filter(|a| a.transient) {
        array.storage = config.storage;
        array.tile_size = Some((config.tile_i, config.tile_j));
    }
    let mut mapping: BTreeMap<String, Expr> =
        inner.free_symbols().into_iter().map(|s| (s.clone(), Expr::sym(s))).collect();
    for ((extent, param), tile) in DOMAIN.iter().zip(TILE_PARAMS).zip(tiles) {
        let residual = Expr::min(Expr::int(tile), Expr::sym(*extent) - Expr::sym(param));
        mapping.insert(extent.to_string(), residual);
    }

    program.clear_states();
    let mut state = State::new(SCOPE_LABEL);
    let params = DOMAIN.iter().zip(TILE_PARAMS).zip(tiles).map(|((extent, param), tile)| {
        (param.to_string(), Range::new(0, Expr::sym(*extent) - 1, tile))
    });
    let mut scope = Scope::new(SCOPE_LABEL, params);
    scope.collapse = 2;
    let (entry, exit) = state.add_scope(scope);
    let nested = state.add_nested(inner, inputs.keys().cloned(), outputs.keys().cloned(), mapping);

    for (name, &num_accesses) in &inputs {
        let array = program.array(name)?;
        let read = state.add_read(name);
        let outer = Memlet::new(name, Subset::full(&array.shape)).with_num_accesses(num_accesses);
        let window = tile_window(&array.shape, array.is_scalar(), tiles);
        let inner = Memlet::new(name, window).with_num_accesses(num_accesses);
        state.add_scoped_read(read, entry, nested, name, outer, inner)?;
    }
    for (name, &num_accesses) in &outputs {
        let array = program.array(name)?;
        let write = state.add_write(name);
        let window = tile_window(&array.shape, array.is_scalar(), tiles);
        let inner = Memlet::new(name, window).with_num_accesses(num_accesses);
        let outer = Memlet::new(name, Subset::full(&array.shape)).with_num_accesses(num_accesses);
        state.add_scoped_write(nested, name, exit, write, inner, outer)?;
    }
    // Keep the nested graph inside the scope when it has no inputs or outputs.
    if inputs.is_empty() {
        state.add_edge(entry, None, nested, None, Memlet::empty());
    }
    if outputs.is_empty() {
        state.add_edge(nested, None, exit, None, Memlet::empty());
    }
    let sid = program.add_state_with(state);

    let transients: Vec<String> = program.arrays.iter().filter(|(_, a)| a.transient).map(|(n, _)| n.clone()).collect();
    for name in transients {
        program.remove_array_if_unreferenced(&name);
    }
    debug!(inputs = inputs.len(), outputs = outputs.len(), "tiled domain");
    Ok(sid)
}

/// Subset of one tile: the halo-extended window on tiled axes, whole elsewhere.
pub fn tile_window(shape: &[Expr], scalar: bool, tiles: [i64; 2]) -> Subset {
    if scalar {
        return Subset::scalar();
    }
    Subset::new(shape.iter().enumerate().map(|(d, extent)| {
        let axis = DOMAIN.get(d).filter(|name| extent.contains_symbol(name));
        match axis {
            Some(name) => {
                let domain = Expr::sym(*name);
                let origin = Expr::sym(TILE_PARAMS[d]);
                let frame = extent.clone() - domain.clone();
                let end = Expr::min(origin.clone() + tiles[d], domain) + frame - 1;
                Range::new(origin, end, 1)
            }
            None => Range::full(extent),
        }
    }))
}

/// Non-transient arrays read and written anywhere in the program, with the
/// number of accesses on their edges.
fn external_accesses(program: &Program) -> (BTreeMap<String, i64>, BTreeMap<String, i64>) {
    let mut inputs = BTreeMap::new();
    let mut outputs = BTreeMap::new();
    for sid in program.state_ids() {
        let Ok(state) = program.state(sid) else { continue };
        for (id, node) in state.nodes() {
            let Node::Access(access) = node else { continue };
            if !program.array(&access.data).is_ok_and(|a| !a.transient) {
                continue;
            }
            if matches!(access.access, AccessType::ReadOnly | AccessType::ReadWrite) {
                *inputs.entry(access.data.clone()).or_insert(0) += num_accesses(state, &state.out_edges(id));
            }
            if matches!(access.access, AccessType::WriteOnly | AccessType::ReadWrite) {
                *outputs.entry(access.data.clone()).or_insert(0) += num_accesses(state, &state.in_edges(id));
            }
        }
    }
    (inputs, outputs)
}

fn num_accesses(state: &State, edges: &[EdgeId]) -> i64 {
    edges.iter().filter_map(|&e| state.edge(e)).map(|e| e.memlet.num_accesses).sum()
}
