use test_case::test_case;

use crate::condition::{CmpOp, Condition};
use crate::expr::{Bindings, Expr};

#[test_case("k<K", CmpOp::Lt; "lt")]
#[test_case("k <= K - 1", CmpOp::Le; "le")]
#[test_case("k>=0", CmpOp::Ge; "ge")]
#[test_case("k > -1", CmpOp::Gt; "gt")]
#[test_case("k == 3", CmpOp::Eq; "eq")]
#[test_case("k != 3", CmpOp::Ne; "ne")]
fn test_parse_operator(input: &str, op: CmpOp) {
    let Condition::Compare { lhs, op: parsed, .. } = Condition::parse(input).unwrap() else {
        panic!("expected a comparison");
    };
    assert_eq!(lhs, Expr::sym("k"));
    assert_eq!(parsed, op);
}

#[test]
fn test_parse_nested_parentheses() {
    let cond = Condition::parse("min(k, 2) < (K - 1)").unwrap();
    assert_eq!(cond.to_string(), "min(2, k) < K - 1");
}

#[test]
fn test_parse_rejects_missing_operator() {
    assert!(Condition::parse("k + 1").is_err());
}

#[test_case(CmpOp::Lt, 2, 3, true)]
#[test_case(CmpOp::Lt, 3, 3, false)]
#[test_case(CmpOp::Ge, 3, 3, true)]
#[test_case(CmpOp::Gt, 3, 3, false)]
fn test_negate_complements(op: CmpOp, lhs: i64, rhs: i64, holds: bool) {
    assert_eq!(op.holds(lhs, rhs), holds);
    assert_eq!(op.negate().holds(lhs, rhs), !holds);
    assert_eq!(op.flip().holds(rhs, lhs), holds);
}

#[test]
fn test_eval_and_subs() {
    let cond = Condition::parse("k < K").unwrap();
    let bindings: Bindings = [("K".to_string(), 4)].into_iter().collect();
    assert!(cond.subs("k", &Expr::int(3)).eval(&bindings).unwrap());
    assert!(!cond.subs("k", &Expr::int(4)).eval(&bindings).unwrap());
    assert!(cond.negate().subs("k", &Expr::int(4)).eval(&bindings).unwrap());
}
