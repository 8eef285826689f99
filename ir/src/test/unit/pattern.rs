use crate::condition::Condition;
use crate::expr::Expr;
use crate::memlet::Memlet;
use crate::node::{Computation, Scope};
use crate::pattern::{NodeKind, Pattern, find_matches};
use crate::program::{InterstateEdge, Program};
use crate::subset::Range;

#[test]
fn test_dataflow_path_matches() {
    let mut program = Program::new("p");
    let s = program.add_state("s");
    let state = program.state_mut(s).unwrap();
    let (entry, exit) = state.add_scope(Scope::new("m", [("i".to_string(), Range::new(0, 3, 1))]));
    let a = state.add_read("a");
    let f = state.add_computation(Computation::new("f", ["x"], ["y"]));
    let g = state.add_computation(Computation::new("g", ["x"], ["y"]));
    let (outer, inner) = (Memlet::simple("a", "0:3").unwrap(), Memlet::simple("a", "i").unwrap());
    state.add_scoped_read(a, entry, f, "x", outer, inner).unwrap();
    state.add_edge(entry, None, g, None, Memlet::empty());
    state.add_edge(f, None, exit, None, Memlet::empty());
    state.add_edge(g, None, exit, None, Memlet::empty());

    let pattern = Pattern::path([NodeKind::ScopeEntry, NodeKind::Computation, NodeKind::ScopeExit]);
    let matches = find_matches(&program, &pattern);
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].nodes.as_slice(), &[entry, f, exit]);
    assert_eq!(matches[1].nodes.as_slice(), &[entry, g, exit]);
    assert!(matches.iter().all(|m| m.state == Some(s)));

    let none = find_matches(&program, &Pattern::path([NodeKind::Access, NodeKind::Computation]));
    assert!(none.is_empty());
}

#[test]
fn test_control_pattern_finds_loop() {
    let mut program = Program::new("p");
    let body = program.add_state("body");
    let (condition, step) = (Condition::parse("k < 4").unwrap(), Expr::parse("k + 1").unwrap());
    let states = program.add_loop(None, body, None, "k", Expr::int(0), condition, step, None);
    let unrelated = program.add_state("other");
    program.add_transition(states.after, unrelated, InterstateEdge::default());

    // before -> guard -> body -> guard
    let pattern = Pattern::control(3, [(0, 1), (1, 2), (2, 1)]);
    let matches = find_matches(&program, &pattern);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].nodes.as_slice(), &[states.before, states.guard, body]);
    assert_eq!(matches[0].state, None);
}
