//! Property tests for tile windows and the tiling rewrite.

use std::collections::{BTreeMap, HashMap};

use proptest::prelude::*;
use strata_ir::{Bindings, Expr, Program};

use crate::config::TilingConfig;
use crate::test::helpers::*;
use crate::tiling::{TILE_PARAMS, tile_domain, tile_window};

/// Inclusive bounds of the window of the tile at `origin`.
fn bounds(shape: &[Expr], tiles: [i64; 2], extents: [i64; 2], origin: [i64; 2]) -> Vec<(i64, i64)> {
    let mut bindings: Bindings = HashMap::from([("I".to_string(), extents[0]), ("J".to_string(), extents[1])]);
    bindings.extend(TILE_PARAMS.iter().map(|p| p.to_string()).zip(origin));
    tile_window(shape, false, tiles)
        .ranges()
        .iter()
        .map(|r| (r.begin.eval(&bindings).unwrap(), r.end.eval(&bindings).unwrap()))
        .collect()
}

fn origins(extents: [i64; 2], tiles: [i64; 2]) -> impl Iterator<Item = [i64; 2]> {
    (0..extents[0])
        .step_by(tiles[0] as usize)
        .flat_map(move |i| (0..extents[1]).step_by(tiles[1] as usize).map(move |j| [i, j]))
}

fn stencil() -> Program {
    let mut program = Program::new("stencil");
    program.add_array("a", array(&["I + 1", "J"])).unwrap();
    program.add_array("b", array(&["I", "J"])).unwrap();
    let s = program.add_state("s");
    let domain = [("i", "0:I - 1"), ("j", "0:J - 1")];
    add_map(&mut program, s, "f", &domain, &[("a", "i, j"), ("a", "i + 1, j")], &[("b", "i, j")]);
    program
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Without a halo the windows of all tiles cover the domain exactly once.
    #[test]
    fn windows_partition_domain(i in 1i64..=12, j in 1i64..=12, ti in 1i64..=6, tj in 1i64..=6) {
        let shape = [Expr::sym("I"), Expr::sym("J")];
        let mut covered: BTreeMap<(i64, i64), usize> = BTreeMap::new();
        for origin in origins([i, j], [ti, tj]) {
            let window = bounds(&shape, [ti, tj], [i, j], origin);
            for x in window[0].0..=window[0].1 {
                for y in window[1].0..=window[1].1 {
                    *covered.entry((x, y)).or_default() += 1;
                }
            }
        }
        prop_assert_eq!(covered.len() as i64, i * j);
        prop_assert!(covered.iter().all(|(&(x, y), &n)| n == 1 && x < i && y < j));
    }

    /// A halo of `h` extends every window by `h` without leaving the array.
    #[test]
    fn halo_windows_stay_in_bounds(i in 1i64..=12, j in 1i64..=12, ti in 1i64..=6, tj in 1i64..=6, h in 0i64..=3) {
        let shape = [Expr::sym("I") + h, Expr::sym("J") + h];
        for origin in origins([i, j], [ti, tj]) {
            let window = bounds(&shape, [ti, tj], [i, j], origin);
            for (d, &(begin, end)) in window.iter().enumerate() {
                let extent = [i, j][d];
                prop_assert_eq!(begin, origin[d]);
                prop_assert_eq!(end, (origin[d] + [ti, tj][d]).min(extent) + h - 1);
                prop_assert!(end < extent + h);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Tiling never changes what a program computes.
    #[test]
    fn tiling_preserves_results(i in 1i64..=5, j in 1i64..=5, ti in 1i64..=4, tj in 1i64..=4) {
        let before = stencil();
        let mut after = before.clone();
        let config = TilingConfig::builder().tile_i(ti).tile_j(tj).build();
        tile_domain(&mut after, &config).unwrap();
        let (_, run) = assert_equivalent(&before, &after, &[("I", i), ("J", j)]);
        prop_assert_eq!(run.arrays["b"].len() as i64, i * j);
    }
}
