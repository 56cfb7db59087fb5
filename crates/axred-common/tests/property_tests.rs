//! Property-based tests for the shared value types.

use axred_common::{DType, DeviceLimits, ScalarValue};
use proptest::prelude::*;

fn arb_limits() -> impl Strategy<Value = DeviceLimits> {
    (
        1_usize..=256 * 1024, // local_memory_bytes
        1_usize..=1024,       // max_local_workers
        1_usize..=1 << 20,    // max_grid_size
    )
        .prop_map(|(lmem, workers, grid)| DeviceLimits::new(lmem, workers, grid))
}

fn arb_real_dtype() -> impl Strategy<Value = DType> {
    prop::sample::select(DType::ALL.iter().copied().filter(|d| !d.is_complex()).collect::<Vec<_>>())
}

proptest! {
    #[test]
    fn initial_local_size_fits_device(limits in arb_limits(), dtype in arb_real_dtype()) {
        let ls = limits.initial_local_size(dtype.size_in_bytes());
        prop_assert!(ls <= limits.max_local_workers);
        prop_assert!(ls * dtype.size_in_bytes() <= limits.local_memory_bytes);
    }

    #[test]
    fn scalar_cast_lands_on_target_type(v in any::<i32>(), dtype in arb_real_dtype()) {
        let cast = ScalarValue::I32(v).cast(dtype).unwrap();
        prop_assert_eq!(cast.dtype(), dtype);
        prop_assert_eq!(cast.to_ne_bytes().len(), dtype.size_in_bytes());
    }

    #[test]
    fn small_ints_survive_any_cast(v in 0_i32..=127, dtype in arb_real_dtype()) {
        let cast = ScalarValue::I32(v).cast(dtype).unwrap();
        prop_assert_eq!(cast.as_i128(), i128::from(v));
    }
}
