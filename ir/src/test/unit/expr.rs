use test_case::test_case;

use crate::error::Error;
use crate::expr::{Bindings, Expr};

fn e(text: &str) -> Expr {
    Expr::parse(text).unwrap()
}

#[test_case("k + 1 - 1", "k"; "cancel_constant")]
#[test_case("(k + 1) - (k - 2)", "3"; "symbolic_difference")]
#[test_case("2*k + 3*k", "5*k"; "collect_terms")]
#[test_case("k - 1 + I", "I + k - 1"; "sorted_terms")]
#[test_case("(2*k + 4)/2", "k + 2"; "exact_division")]
#[test_case("(k + 4)%2", "k%2"; "modulo_drops_multiples")]
#[test_case("(k - 1)%3", "(k + 2)%3"; "modulo_normalises_constant")]
#[test_case("min(k - 1, k + 1)", "k - 1"; "min_constant_difference")]
#[test_case("max(k - 1, k + 1, k)", "k + 1"; "max_variadic")]
#[test_case("Min(8, I - tile_i)", "min(8, I - tile_i)"; "capitalised_min")]
#[test_case("-7/2", "-4"; "floor_division")]
#[test_case("-7%3", "2"; "floor_modulo")]
#[test_case("k*(j + 1) - k*(j + 1)", "0"; "product_cancels")]
fn test_canonical_form(input: &str, expected: &str) {
    assert_eq!(e(input).to_string(), expected);
    assert_eq!(e(input), e(expected));
}

#[test]
fn test_offset_from() {
    assert_eq!(e("k - 2").offset_from("k"), Some(-2));
    assert_eq!(e("k + K").offset_from("k"), None);
    assert_eq!(e("2*k").offset_from("k"), None);
}

#[test]
fn test_free_symbols() {
    let symbols: Vec<_> = e("min(I, tile_i + 8) + k*2").free_symbols().into_iter().collect();
    assert_eq!(symbols, ["I", "k", "tile_i"]);
}

#[test]
fn test_subs_recanonicalises() {
    let expr = e("min(tile_i + 8, I) - tile_i");
    let substituted = expr.subs("I", &e("tile_i + 3"));
    assert_eq!(substituted, Expr::int(3));
}

#[test]
fn test_eval() {
    let bindings: Bindings = [("k".to_string(), 5), ("K".to_string(), 9)].into_iter().collect();
    assert_eq!(e("max(k - K, 0) + K%4").eval(&bindings).unwrap(), 1);
}

#[test]
fn test_eval_unbound_symbol() {
    let err = e("k + 1").eval(&Bindings::new()).unwrap_err();
    assert!(matches!(err, Error::UnboundSymbol { ref name } if name == "k"));
}

#[test]
fn test_eval_division_by_zero() {
    let bindings: Bindings = [("n".to_string(), 0)].into_iter().collect();
    let err = e("4/n").eval(&bindings).unwrap_err();
    assert!(matches!(err, Error::DivisionByZero { .. }));
}

#[test_case("k +"; "dangling_operator")]
#[test_case("(k"; "unclosed_paren")]
#[test_case("foo(k, 1)"; "unknown_function")]
#[test_case("min(k)"; "unary_min")]
#[test_case("k $ 1"; "bad_character")]
fn test_parse_errors(input: &str) {
    assert!(matches!(Expr::parse(input), Err(Error::ExprParse { .. })));
}

#[test]
fn test_expect_int() {
    assert_eq!(e("3 * 4").expect_int().unwrap(), 12);
    assert!(matches!(e("K").expect_int(), Err(Error::NonConstant { .. })));
}

#[test]
fn test_overflow_keeps_operation() {
    let sum = Expr::int(i64::MAX) + 1;
    assert!(!sum.is_int());
    assert!(matches!(sum.eval(&Bindings::new()), Err(Error::Overflow { .. })));

    let scaled = Expr::sym("k") * i64::MAX * 2;
    let bindings: Bindings = [("k".to_string(), 1)].into_iter().collect();
    assert!(matches!(scaled.eval(&bindings), Err(Error::Overflow { .. })));
}

#[test]
fn test_overflow_in_division() {
    let quotient = Expr::floor_div(Expr::int(i64::MIN), Expr::int(-1));
    assert!(!quotient.is_int());
    assert!(matches!(quotient.eval(&Bindings::new()), Err(Error::Overflow { .. })));
    assert_eq!(Expr::modulo(Expr::int(i64::MIN), Expr::int(-1)), Expr::int(0));
}

#[test]
fn test_display_extreme_constant() {
    assert_eq!((Expr::sym("k") + i64::MIN).to_string(), "k - 9223372036854775808");
}
