//! Property tests for register caching.

use std::collections::BTreeSet;

use proptest::prelude::*;
use strata_ir::expr::floor_mod;
use strata_ir::test::property::generators::arb_offsets;

use crate::config::RegisterCacheConfig;
use crate::register_cache::RegisterCache;
use crate::test::helpers::*;
use crate::transform::apply_once;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Offsets live in one iteration land in distinct slots of the ring.
    #[test]
    fn folded_offsets_do_not_collide(offsets in arb_offsets(), k in -50i64..=50) {
        let size = offsets[offsets.len() - 1] - offsets[0] + 1;
        let slots: BTreeSet<i64> = offsets.iter().map(|o| floor_mod(k + o, size)).collect();
        prop_assert_eq!(slots.len(), offsets.len());
    }

    /// Folding the sliding window into a ring keeps every result.
    #[test]
    fn ring_preserves_results(offsets in arb_offsets()) {
        let before = ring(&offsets);
        let mut after = before.clone();
        let pass = RegisterCache::new(RegisterCacheConfig::builder().array("t").build());
        prop_assert!(apply_once(&mut after, &pass).unwrap());

        let span = offsets[offsets.len() - 1] - offsets[0];
        prop_assert_eq!(after.array("t").unwrap().shape[0].clone(), strata_ir::Expr::int(span + 1));
        let (_, run) = assert_equivalent(&before, &after, &[("N", span + 4)]);
        prop_assert_eq!(run.arrays["b"].len(), 4);
    }
}
