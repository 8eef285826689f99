use crate::condition::Condition;
use crate::data::{Array, DType};
use crate::error::Error;
use crate::expr::Expr;
use crate::memlet::Memlet;
use crate::node::Computation;
use crate::program::{InterstateEdge, Program};

fn program_with_copy() -> Program {
    let mut program = Program::new("p");
    program.add_array("a", Array::new([Expr::sym("K")], DType::Float64)).unwrap();
    program.add_array("b", Array::new([Expr::sym("K")], DType::Float64)).unwrap();
    let s = program.add_state("s");
    let state = program.state_mut(s).unwrap();
    let a = state.add_read("a");
    let b = state.add_write("b");
    let f = state.add_computation(Computation::new("f", ["x"], ["y"]));
    state.add_edge(a, None, f, Some("x"), Memlet::simple("a", "k").unwrap());
    state.add_edge(f, Some("y"), b, None, Memlet::simple("b", "k").unwrap());
    program
}

#[test]
fn test_duplicate_array() {
    let mut program = program_with_copy();
    let err = program.add_array("a", Array::scalar(DType::Int32)).unwrap_err();
    assert!(matches!(err, Error::DuplicateArray { .. }));
}

#[test]
fn test_temp_names_are_fresh() {
    let mut program = program_with_copy();
    program.add_array("__tmp0", Array::scalar(DType::Int32)).unwrap();
    assert_eq!(program.temp_data_name(), "__tmp1");
    assert_eq!(program.temp_data_name(), "__tmp2");
}

#[test]
fn test_add_loop_shape() {
    let mut program = program_with_copy();
    let body = program.start.unwrap();
    let states = program.add_loop(
        None,
        body,
        None,
        "k",
        Expr::int(0),
        Condition::parse("k < K").unwrap(),
        Expr::parse("k + 1").unwrap(),
        None,
    );
    assert_eq!(program.start, Some(states.before));
    assert_eq!(program.in_transitions(states.guard).len(), 2);
    assert_eq!(program.out_transitions(states.guard).len(), 2);
    assert_eq!(program.successors(states.before), vec![states.guard]);
    let init = program.transitions_between(states.before, states.guard)[0];
    assert_eq!(program.transition(init).unwrap().assignments["k"], Expr::int(0));
    let exit = program.transitions_between(states.guard, states.after)[0];
    assert_eq!(program.transition(exit).unwrap().condition, Condition::parse("k >= K").unwrap());
    program.validate().unwrap();
}

#[test]
fn test_add_state_before_redirects() {
    let mut program = program_with_copy();
    let s = program.start.unwrap();
    let t = program.add_state("t");
    program.add_transition(s, t, InterstateEdge::assign("x", 1));
    let before = program.add_state_before(t, "pre");
    assert_eq!(program.successors(s), vec![before]);
    assert_eq!(program.successors(before), vec![t]);
    let moved = program.transitions_between(s, before)[0];
    assert_eq!(program.transition(moved).unwrap().assignments["x"], Expr::int(1));
}

#[test]
fn test_validate_rank_mismatch() {
    let mut program = program_with_copy();
    let s = program.start.unwrap();
    let state = program.state_mut(s).unwrap();
    let a = state.access_nodes("a")[0];
    let extra = state.add_write("b");
    state.add_edge(a, None, extra, None, Memlet::simple("a", "k, 0").unwrap());
    assert!(matches!(program.validate(), Err(Error::RankMismatch { .. })));
}

#[test]
fn test_validate_undeclared_connector() {
    let mut program = program_with_copy();
    let s = program.start.unwrap();
    let state = program.state_mut(s).unwrap();
    let a = state.access_nodes("a")[0];
    let f = state.nodes().find(|(_, n)| n.as_computation().is_some()).unwrap().0;
    state.add_edge(a, None, f, Some("z"), Memlet::simple("a", "k").unwrap());
    assert!(matches!(program.validate(), Err(Error::UndeclaredConnector { .. })));
}

#[test]
fn test_validate_connector_arity() {
    let mut program = program_with_copy();
    let s = program.start.unwrap();
    let state = program.state_mut(s).unwrap();
    let f = state.nodes().find(|(_, n)| n.as_computation().is_some()).unwrap().0;
    state.node_mut(f).unwrap().add_in_connector("unused");
    assert!(matches!(program.validate(), Err(Error::ConnectorArity { count: 0, .. })));
}

#[test]
fn test_remove_array_if_unreferenced() {
    let mut program = program_with_copy();
    program.add_array("c", Array::scalar(DType::Int32).transient()).unwrap();
    assert!(program.remove_array_if_unreferenced("c"));
    assert!(!program.remove_array_if_unreferenced("a"));
    assert!(program.arrays.contains_key("a"));
}

#[test]
fn test_free_symbols_exclude_assigned() {
    let mut program = program_with_copy();
    let body = program.start.unwrap();
    let (condition, step) = (Condition::parse("k < K").unwrap(), Expr::parse("k + 1").unwrap());
    program.add_loop(None, body, None, "k", Expr::int(0), condition, step, None);
    let symbols: Vec<_> = program.free_symbols().into_iter().collect();
    assert_eq!(symbols, ["K"]);
}
