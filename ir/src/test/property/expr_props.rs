//! Property tests for expression canonicalisation.

use proptest::prelude::*;

use crate::expr::Expr;

use super::generators::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Canonicalisation never changes the value of an expression.
    #[test]
    fn canonical_form_preserves_value(raw in arb_raw_expr(), bindings in arb_bindings()) {
        let expr = raw.build();
        prop_assert_eq!(expr.eval(&bindings).unwrap(), raw.eval(&bindings), "canonical form: {}", expr);
    }

    /// Printing and re-parsing yields the same canonical expression.
    #[test]
    fn display_round_trips(raw in arb_raw_expr()) {
        let expr = raw.build();
        let reparsed = Expr::parse(&expr.to_string()).unwrap();
        prop_assert_eq!(reparsed, expr);
    }

    /// Substituting a constant and evaluating agrees with binding it.
    #[test]
    fn subs_matches_binding(raw in arb_raw_expr(), bindings in arb_bindings(), sym in arb_symbol()) {
        let expr = raw.build();
        let value = bindings[sym];
        let substituted = expr.subs(sym, &Expr::int(value));
        prop_assert!(!substituted.contains_symbol(sym));
        prop_assert_eq!(substituted.eval(&bindings).unwrap(), expr.eval(&bindings).unwrap());
    }

    /// `x - x` always folds to zero.
    #[test]
    fn self_difference_is_zero(raw in arb_raw_expr()) {
        let expr = raw.build();
        prop_assert_eq!(expr.clone() - expr, Expr::int(0));
    }

    /// `min`/`max` bracket both operands.
    #[test]
    fn min_max_bracket(a in arb_raw_expr(), b in arb_raw_expr(), bindings in arb_bindings()) {
        let (ea, eb) = (a.build(), b.build());
        let lo = Expr::min(ea.clone(), eb.clone()).eval(&bindings).unwrap();
        let hi = Expr::max(ea.clone(), eb.clone()).eval(&bindings).unwrap();
        let (va, vb) = (ea.eval(&bindings).unwrap(), eb.eval(&bindings).unwrap());
        prop_assert_eq!(lo, va.min(vb));
        prop_assert_eq!(hi, va.max(vb));
    }
}
