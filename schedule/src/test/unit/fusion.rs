use strata_ir::{Node, Program};

use crate::fusion::MapFusion;
use crate::test::helpers::*;
use crate::transform::{apply_once, apply_repeated};

/// `y[i] = f(x[i])` then `z[i] = g(y[i], y[i + 1])`.
fn producer_consumer(transient: bool) -> Program {
    let mut program = Program::new("fuse");
    program.add_array("x", array(&["N + 1"])).unwrap();
    let y = array(&["N"]);
    program.add_array("y", if transient { y.transient() } else { y }).unwrap();
    program.add_array("z", array(&["N"])).unwrap();
    let s = program.add_state("s");
    add_map(&mut program, s, "f", &[("i", "0:N - 1")], &[("x", "i")], &[("y", "i")]);
    add_map(&mut program, s, "g", &[("i", "0:N - 2")], &[("y", "i"), ("y", "i + 1")], &[("z", "i")]);
    program.validate().unwrap();
    program
}

fn computations(program: &Program, label: &str) -> usize {
    count_nodes(program, |n| matches!(n, Node::Computation(c) if c.label == label))
}

#[test]
fn test_fusion_replicates_producer() {
    let before = producer_consumer(true);
    let mut after = before.clone();
    assert_eq!(apply_repeated(&mut after, &MapFusion).unwrap(), 1);

    assert!(!after.arrays.contains_key("y"));
    assert_eq!(computations(&after, "f"), 2);
    assert_eq!(computations(&after, "g"), 1);
    assert_eq!(count_nodes(&after, |n| matches!(n, Node::ScopeEntry(_))), 1);

    let (_, run) = assert_equivalent(&before, &after, &[("N", 4)]);
    assert_eq!(run.arrays["z"][&vec![1]], "g.out0(f.out0(x[1]), f.out0(x[2]))");
    assert_eq!(run.max_reads("x"), 2);
}

#[test]
fn test_fusion_declines_real_intermediate() {
    let mut program = producer_consumer(false);
    assert!(!apply_once(&mut program, &MapFusion).unwrap());
}

#[test]
fn test_fusion_declines_different_parameters() {
    let mut program = Program::new("fuse");
    program.add_array("x", array(&["N"])).unwrap();
    program.add_array("y", array(&["N"]).transient()).unwrap();
    program.add_array("z", array(&["N"])).unwrap();
    let s = program.add_state("s");
    add_map(&mut program, s, "f", &[("i", "0:N - 1")], &[("x", "i")], &[("y", "i")]);
    add_map(&mut program, s, "g", &[("j", "0:N - 1")], &[("y", "j")], &[("z", "j")]);
    assert!(!apply_once(&mut program, &MapFusion).unwrap());
}

#[test]
fn test_fusion_declines_shared_intermediate() {
    let mut program = producer_consumer(true);
    let s = program.start.unwrap();
    let y = *program.state(s).unwrap().access_nodes("y").last().unwrap();
    let state = program.state_mut(s).unwrap();
    let c = state.add_computation(strata_ir::Computation::new("h", ["in0"], Vec::<String>::new()));
    state.add_edge(y, None, c, Some("in0"), memlet("y", "0"));
    assert!(!apply_once(&mut program, &MapFusion).unwrap());
}

#[test]
fn test_fusion_declines_intermediate_read_later() {
    let mut before = producer_consumer(true);
    before.add_array("w", array(&["N"])).unwrap();
    let s = before.start.unwrap();
    let later = before.add_state_after(s, "later");
    add_tasklet(&mut before, later, "h", &[("y", "0")], &[("w", "0")]);
    before.validate().unwrap();

    let mut after = before.clone();
    assert_eq!(apply_repeated(&mut after, &MapFusion).unwrap(), 0);
    assert!(after.arrays.contains_key("y"));
    let (_, run) = assert_equivalent(&before, &after, &[("N", 4)]);
    assert_eq!(run.arrays["w"][&vec![0]], "h.out0(f.out0(x[0]))");
}
