//! Local-size negotiation.
//!
//! The local size must be fixed before compilation because it sizes the
//! local scratch array and unrolls the tree phase, yet whether a size is
//! usable is only known after compilation. The negotiator starts from the
//! largest plausible power of two and halves until the compiled kernel
//! accepts it.

use axred_common::{LocalSizeAttempt, ReduxError, Result};
use tracing::debug;

use crate::device::CompiledKernel;

/// Smallest power-of-two exponent `e` with `2^e >= n` (`n >= 1`).
pub fn ceil_log2(n: usize) -> u32 {
    n.max(1).next_power_of_two().trailing_zeros()
}

/// Find a power-of-two local size the compiled kernel accepts.
///
/// `init_local_size` is the configuration's estimate and `max_ls` the
/// per-unit extent; the first candidate is the smaller of the two rounded up
/// to a power of two. `build` compiles a kernel for a candidate size; its
/// errors are returned unchanged.
pub fn negotiate_local_size<K, F>(
    init_local_size: usize,
    max_ls: usize,
    mut build: F,
) -> Result<(K, usize)>
where
    K: CompiledKernel,
    F: FnMut(usize) -> Result<K>,
{
    let start = init_local_size.min(max_ls).max(1);
    let limit = ceil_log2(start);
    let mut candidate = 1_usize << limit;
    let mut attempts = Vec::with_capacity(limit as usize + 1);

    for _ in 0..=limit {
        let kernel = build(candidate)?;
        let supported = kernel.max_supported_local_size();
        debug!(requested = candidate, supported, "local size attempt");
        if candidate <= supported {
            return Ok((kernel, candidate));
        }
        attempts.push(LocalSizeAttempt { requested: candidate, supported });
        candidate /= 2;
    }

    Err(ReduxError::UnstableLocalSize { attempts })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    struct FakeKernel {
        max: usize,
    }

    impl CompiledKernel for FakeKernel {
        fn max_supported_local_size(&self) -> usize {
            self.max
        }
    }

    fn negotiate_with_cap(init: usize, max_ls: usize, cap: usize) -> (Result<usize>, Vec<usize>) {
        let built = RefCell::new(Vec::new());
        let result = negotiate_local_size(init, max_ls, |ls| {
            built.borrow_mut().push(ls);
            Ok(FakeKernel { max: cap })
        })
        .map(|(_, ls)| ls);
        (result, built.into_inner())
    }

    #[test]
    fn ceil_log2_values() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(256), 8);
    }

    #[test]
    fn accepts_first_candidate_when_supported() {
        let (ls, built) = negotiate_with_cap(256, 1000, 256);
        assert_eq!(ls.unwrap(), 256);
        assert_eq!(built, vec![256]);
    }

    #[test]
    fn rounds_small_extent_up_to_power_of_two() {
        let (ls, built) = negotiate_with_cap(256, 6, 256);
        assert_eq!(ls.unwrap(), 8);
        assert_eq!(built, vec![8]);
    }

    #[test]
    fn halves_until_kernel_accepts() {
        let (ls, built) = negotiate_with_cap(256, 1 << 20, 48);
        assert_eq!(ls.unwrap(), 32);
        assert_eq!(built, vec![256, 128, 64, 32]);
    }

    #[test]
    fn zero_extent_is_clamped_to_one() {
        let (ls, built) = negotiate_with_cap(256, 0, 256);
        assert_eq!(ls.unwrap(), 1);
        assert_eq!(built, vec![1]);
    }

    #[test]
    fn failure_reports_every_attempt() {
        let (result, built) = negotiate_with_cap(8, 100, 0);
        assert_eq!(built, vec![8, 4, 2, 1]);
        match result.unwrap_err() {
            ReduxError::UnstableLocalSize { attempts } => {
                let requested: Vec<_> = attempts.iter().map(|a| a.requested).collect();
                assert_eq!(requested, vec![8, 4, 2, 1]);
                assert!(attempts.iter().all(|a| a.supported == 0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn build_errors_propagate_unchanged() {
        let result: Result<(FakeKernel, usize)> =
            negotiate_local_size(4, 4, |_| Err(ReduxError::device("compiler exploded")));
        assert!(matches!(result, Err(ReduxError::Device { reason }) if reason == "compiler exploded"));
    }
}
