use std::collections::HashMap;

use strata_ir::{Expr, Node, Program, StorageType};
use test_case::test_case;

use crate::config::TilingConfig;
use crate::error::Error;
use crate::test::helpers::*;
use crate::tiling::{SCOPE_LABEL, tile_domain, tile_window};

/// `tmp = f(a, a + halo); b = g(tmp)` over the `I x J` domain.
fn halo_program() -> Program {
    let mut program = Program::new("stencil");
    program.add_array("a", array(&["I + 2", "J + 2"])).unwrap();
    program.add_array("b", array(&["I", "J"])).unwrap();
    program.add_array("tmp", array(&["I", "J"]).transient()).unwrap();
    let s = program.add_state("s");
    let domain = [("i", "0:I - 1"), ("j", "0:J - 1")];
    add_map(&mut program, s, "f", &domain, &[("a", "i, j"), ("a", "i + 2, j + 2")], &[("tmp", "i, j")]);
    add_map(&mut program, s, "g", &domain, &[("tmp", "i, j")], &[("b", "i, j")]);
    program.validate().unwrap();
    program
}

#[test]
fn test_tiling_structure() {
    let mut program = halo_program();
    let config = TilingConfig::builder().tile_i(2).tile_j(2).build();
    let sid = tile_domain(&mut program, &config).unwrap();
    program.validate().unwrap();

    assert_eq!(program.state_ids(), vec![sid]);
    assert!(!program.arrays.contains_key("tmp"));
    let state = program.state(sid).unwrap();
    let entry = state.nodes().find_map(|(_, n)| n.as_scope_entry()).unwrap();
    assert_eq!(entry.scope.label, SCOPE_LABEL);
    assert_eq!(entry.scope.params.as_slice(), ["tile_i", "tile_j"]);
    assert_eq!(entry.scope.collapse, 2);
    assert_eq!(entry.scope.ranges[0].step, Expr::int(2));

    let nested = state.nodes().find_map(|(_, n)| n.as_nested()).unwrap();
    assert_eq!(nested.inputs.iter().collect::<Vec<_>>(), ["a"]);
    assert_eq!(nested.outputs.iter().collect::<Vec<_>>(), ["b"]);
    let tmp = nested.program.array("tmp").unwrap();
    assert_eq!(tmp.storage, StorageType::CpuThreadLocal);
    assert_eq!(tmp.tile_size, Some((2, 2)));

    let bindings = HashMap::from([("I".to_string(), 5), ("tile_i".to_string(), 4)]);
    assert_eq!(nested.symbol_mapping["I"].eval(&bindings).unwrap(), 1);
}

#[test_case(5, 3, 2, 2 ; "ragged tiles")]
#[test_case(4, 4, 2, 2 ; "exact tiles")]
#[test_case(3, 2, 8, 8 ; "single tile")]
#[test_case(6, 5, 1, 3 ; "thin tiles")]
fn test_tiling_preserves_results(i: i64, j: i64, tile_i: i64, tile_j: i64) {
    let before = halo_program();
    let mut after = before.clone();
    let config = TilingConfig::builder().tile_i(tile_i).tile_j(tile_j).build();
    tile_domain(&mut after, &config).unwrap();
    let (_, actual) = assert_equivalent(&before, &after, &[("I", i), ("J", j)]);
    assert_eq!(actual.arrays["b"].len() as i64, i * j);
}

#[test]
fn test_tiling_without_outputs_keeps_scope_connected() {
    let mut program = Program::new("reads_only");
    program.add_array("a", array(&["I", "J"])).unwrap();
    program.add_array("t", array(&["I", "J"]).transient()).unwrap();
    let s = program.add_state("s");
    add_map(&mut program, s, "f", &[("i", "0:I - 1"), ("j", "0:J - 1")], &[("a", "i, j")], &[("t", "i, j")]);
    let sid = tile_domain(&mut program, &TilingConfig::default()).unwrap();
    program.validate().unwrap();
    let state = program.state(sid).unwrap();
    let nested = state.nodes().find(|(_, n)| matches!(n, Node::Nested(_))).map(|(id, _)| id).unwrap();
    assert_eq!(state.out_degree(nested), 1);
    assert!(state.edge(state.out_edges(nested)[0]).unwrap().memlet.is_empty());
}

#[test]
fn test_tiling_rejects_empty_tiles() {
    let mut program = halo_program();
    let config = TilingConfig::builder().tile_i(0).build();
    let err = tile_domain(&mut program, &config).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { option: "tile_i", .. }));
}

#[test]
fn test_tile_window_keeps_halo_and_whole_dims() {
    let shape = [Expr::parse("I + 2").unwrap(), Expr::sym("J"), Expr::int(5)];
    let window = tile_window(&shape, false, [4, 4]);
    let bindings = HashMap::from([
        ("I".to_string(), 10),
        ("J".to_string(), 6),
        ("tile_i".to_string(), 8),
        ("tile_j".to_string(), 4),
    ]);
    let bounds: Vec<(i64, i64)> = window
        .ranges()
        .iter()
        .map(|r| (r.begin.eval(&bindings).unwrap(), r.end.eval(&bindings).unwrap()))
        .collect();
    assert_eq!(bounds, [(8, 11), (4, 5), (0, 4)]);
    assert_eq!(tile_window(&[Expr::int(1)], true, [4, 4]), strata_ir::Subset::scalar());
}
