use strata_ir::{Condition, Expr, InterstateEdge, Node, Program, StateId};
use test_case::test_case;

use crate::config::PeelConfig;
use crate::loops::{ForcedPeeling, RemoveTrivialLoop, SinkLoop, detect_loop};
use crate::test::helpers::*;
use crate::transform::{apply_once, apply_repeated};

fn guard(program: &Program) -> StateId {
    program.state_by_label("guard").unwrap()
}

/// `a[k] = f(a[k - 1])` for `k = 1..6`.
fn recurrence() -> Program {
    sweep(&[("a", &["N"], false)], &[("a", "k - 1")], &[("a", "k")], "1", "k < 6", "k + 1").0
}

// ============================================================================
// Detection
// ============================================================================

#[test_case("0", "k < 10", "k + 1", "9", Some(10) ; "ascending")]
#[test_case("0", "k <= 10", "k + 2", "10", Some(6) ; "inclusive stride two")]
#[test_case("0", "k < 10", "k + 3", "9", Some(4) ; "stride three rounds down")]
#[test_case("9", "k >= 0", "k - 1", "0", Some(10) ; "descending")]
#[test_case("0", "10 > k", "k + 1", "9", Some(10) ; "bound on the left")]
#[test_case("0", "k + 1 < 10", "k + 1", "8", Some(9) ; "offset variable")]
#[test_case("0", "k < K", "k + 1", "K - 1", None ; "symbolic")]
fn test_detect_bounds(init: &str, condition: &str, step: &str, end: &str, niter: Option<i64>) {
    let (program, body) = sweep(&[("a", &["K"], false)], &[("a", "0")], &[("a", "1")], init, condition, step);
    let info = detect_loop(&program, guard(&program)).unwrap();
    assert_eq!(info.var, "k");
    assert_eq!(info.body, [body]);
    assert_eq!(info.bounds.start, Expr::parse(init).unwrap());
    assert_eq!(info.bounds.end, Expr::parse(end).unwrap());
    assert_eq!(info.niter(), niter);
}

#[test_case("0", "k > 10", "k + 1" ; "condition against step")]
#[test_case("0", "k < 10", "2 * k" ; "non-constant stride")]
#[test_case("0", "k != 10", "k + 1" ; "inequality")]
fn test_detect_rejects(init: &str, condition: &str, step: &str) {
    let (program, _) = sweep(&[("a", &["K"], false)], &[("a", "0")], &[("a", "1")], init, condition, step);
    assert!(detect_loop(&program, guard(&program)).is_none());
}

#[test]
fn test_detect_rejects_branching_body() {
    let (mut program, body) = sweep(&[("a", &["K"], false)], &[("a", "0")], &[("a", "1")], "0", "k < 4", "k + 1");
    let side = program.add_state("side");
    program.add_transition(body, side, InterstateEdge::new(Condition::parse("k == 2").unwrap()));
    assert!(detect_loop(&program, guard(&program)).is_none());
}

#[test]
fn test_detect_multi_state_body() {
    let (mut program, body) = sweep(&[("a", &["K"], false)], &[("a", "0")], &[("a", "1")], "0", "k < 4", "k + 1");
    let tail = program.add_state_after(body, "tail");
    let info = detect_loop(&program, guard(&program)).unwrap();
    assert_eq!(info.body, [body, tail]);
    assert_eq!(info.last(), tail);
}

// ============================================================================
// Trivial loops
// ============================================================================

#[test]
fn test_remove_trivial_loop() {
    let arrays: &[(&str, &[&str], bool)] = &[("a", &["N"], false), ("b", &["N"], false)];
    let (before, body) = sweep(arrays, &[("a", "k")], &[("b", "k")], "3", "k < 4", "k + 1");
    let mut after = before.clone();
    assert_eq!(apply_repeated(&mut after, &RemoveTrivialLoop).unwrap(), 1);
    assert!(after.state_by_label("guard").is_none());
    assert_eq!(after.predecessors(body).len(), 1);
    let (_, run) = assert_equivalent(&before, &after, &[("N", 5)]);
    assert_eq!(run.arrays["b"][&vec![3]], "f.out0(a[3])");
}

#[test]
fn test_trivial_loop_leaves_exit_value() {
    let (mut program, body) = sweep(&[("a", &["N"], false)], &[("a", "k")], &[("a", "k")], "3", "k < 4", "k + 1");
    assert!(apply_once(&mut program, &RemoveTrivialLoop).unwrap());
    let leave = program.out_transitions(body)[0];
    assert_eq!(program.transition(leave).unwrap().assignments["k"], Expr::int(4));
}

#[test]
fn test_keeps_loop_with_two_iterations() {
    let (mut program, _) = sweep(&[("a", &["N"], false)], &[("a", "k")], &[("a", "k")], "2", "k < 4", "k + 1");
    assert!(!apply_once(&mut program, &RemoveTrivialLoop).unwrap());
}

// ============================================================================
// Peeling
// ============================================================================

#[test_case(1, true ; "one from the front")]
#[test_case(2, true ; "two from the front")]
#[test_case(1, false ; "one from the back")]
#[test_case(2, false ; "two from the back")]
fn test_forced_peeling(count: i64, begin: bool) {
    let before = recurrence();
    let mut after = before.clone();
    let pass = ForcedPeeling::new(PeelConfig::builder().count(count).begin(begin).build());
    assert!(apply_once(&mut after, &pass).unwrap());
    let info = detect_loop(&after, guard(&after)).unwrap();
    assert_eq!(info.niter(), Some(5 - count));
    assert_eq!(after.state_ids().len(), before.state_ids().len() + count as usize);
    let (_, run) = assert_equivalent(&before, &after, &[("N", 6)]);
    assert_eq!(run.arrays["a"][&vec![5]], "f.out0(f.out0(f.out0(f.out0(f.out0(a[0])))))");
}

#[test]
fn test_peeling_substitutes_loop_variable() {
    let mut program = recurrence();
    assert!(apply_once(&mut program, &ForcedPeeling::default()).unwrap());
    let peeled = program.state_by_label("body_peel0").unwrap();
    let state = program.state(peeled).unwrap();
    assert!(!state.free_symbols().contains("k"));
}

#[test]
fn test_peeling_zero_declines() {
    let mut program = recurrence();
    let pass = ForcedPeeling::new(PeelConfig::builder().count(0).build());
    assert!(!apply_once(&mut program, &pass).unwrap());
}

#[test_case(5, true ; "whole loop")]
#[test_case(6, false ; "more than the loop runs")]
fn test_peeling_respects_trip_count(count: i64, applies: bool) {
    let before = recurrence();
    let mut after = before.clone();
    let pass = ForcedPeeling::new(PeelConfig::builder().count(count).build());
    assert_eq!(apply_once(&mut after, &pass).unwrap(), applies);
    assert_equivalent(&before, &after, &[("N", 6)]);
}

// ============================================================================
// Sinking
// ============================================================================

/// `b[i, k] = f(a[i, k])` inside a scope over `i`, in a state-machine loop
/// over `k`.
fn outer_loop() -> Program {
    let mut program = Program::new("outer");
    program.add_array("a", array(&["I", "K"])).unwrap();
    program.add_array("b", array(&["I", "K"])).unwrap();
    let body = program.add_state("body");
    add_map(&mut program, body, "f", &[("i", "0:I - 1")], &[("a", "i, k")], &[("b", "i, k")]);
    program.add_loop(
        None,
        body,
        None,
        "k",
        Expr::int(0),
        Condition::parse("k < K").unwrap(),
        Expr::parse("k + 1").unwrap(),
        None,
    );
    program
}

#[test]
fn test_sink_loop() {
    let before = outer_loop();
    let mut after = before.clone();
    assert_eq!(apply_repeated(&mut after, &SinkLoop).unwrap(), 1);
    assert!(after.state_by_label("guard").is_none());
    assert_eq!(count_nodes(&after, |n| matches!(n, Node::Nested(_))), 1);
    let inner = nested_programs(&after)[0];
    assert!(detect_loop(inner, guard(inner)).is_some());
    assert_equivalent(&before, &after, &[("I", 2), ("K", 3)]);
}

#[test]
fn test_sink_declines_unscoped_computation() {
    let mut program = recurrence();
    assert!(!apply_once(&mut program, &SinkLoop).unwrap());
}

/// Two body states over `i`: `b[i, k] = f(c[i, k])`, then `g` on `a[i, k]`
/// writing either `c[i, k + 1]` for the next iteration or a separate `d`.
fn two_stage(carried: bool) -> Program {
    let mut program = Program::new("two_stage");
    program.add_array("a", array(&["I", "K"])).unwrap();
    program.add_array("b", array(&["I", "K"])).unwrap();
    program.add_array("c", array(&["I", "K + 1"])).unwrap();
    program.add_array("d", array(&["I", "K"])).unwrap();
    let first = program.add_state("first");
    add_map(&mut program, first, "f", &[("i", "0:I - 1")], &[("c", "i, k")], &[("b", "i, k")]);
    program.add_loop(
        None,
        first,
        None,
        "k",
        Expr::int(0),
        Condition::parse("k < K").unwrap(),
        Expr::parse("k + 1").unwrap(),
        None,
    );
    let second = program.add_state_after(first, "second");
    let write = if carried { ("c", "i, k + 1") } else { ("d", "i, k") };
    add_map(&mut program, second, "g", &[("i", "0:I - 1")], &[("a", "i, k")], &[write]);
    program
}

#[test]
fn test_sink_two_independent_states() {
    let before = two_stage(false);
    let mut after = before.clone();
    assert_eq!(apply_repeated(&mut after, &SinkLoop).unwrap(), 1);
    assert_eq!(count_nodes(&after, |n| matches!(n, Node::Nested(_))), 2);
    assert_equivalent(&before, &after, &[("I", 2), ("K", 3)]);
}

#[test]
fn test_sink_declines_carried_dependence() {
    let before = two_stage(true);
    let mut after = before.clone();
    assert!(!apply_once(&mut after, &SinkLoop).unwrap());
    assert!(after.state_by_label("guard").is_some());
    assert_equivalent(&before, &after, &[("I", 2), ("K", 3)]);
}
