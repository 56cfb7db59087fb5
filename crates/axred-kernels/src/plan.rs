//! Structured description of one reduction kernel, consumed by the source
//! emitter and by the host executor.
//!
//! # Index reconstruction
//!
//! A launch runs one unit per output element. Each unit recovers its
//! coordinates from the flat unit id by a mixed-radix decomposition over
//! the kept axes, innermost axis first:
//!
//! ```text
//! pos[k] = id % dim[k]; id = id / dim[k]      for kept k > 0
//! pos[0] = id                                 when axis 0 is kept
//! ```
//!
//! The grid-stride loop index is decomposed the same way over the reduced
//! axes. Both walks come from [`radix_steps`], so the emitted source and the
//! host executor cannot disagree on the order.

use axred_common::{DType, ReduxError, Result};

use crate::args::KernelArg;

/// Name of the generated kernel entry point.
pub const KERNEL_NAME: &str = "reduk";

/// Name of the output parameter.
pub const OUT_NAME: &str = "out";

// ---------------------------------------------------------------------------
// Axis partition
// ---------------------------------------------------------------------------

/// Split of the axes into kept and reduced sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AxisPartition {
    redux: Vec<bool>,
}

impl AxisPartition {
    /// At least one axis must be reduced.
    pub fn new(redux: Vec<bool>) -> Result<Self> {
        if !redux.iter().any(|&r| r) {
            return Err(ReduxError::config("reduction is along no axes"));
        }
        Ok(Self { redux })
    }

    pub fn nd(&self) -> usize {
        self.redux.len()
    }

    pub fn mask(&self) -> &[bool] {
        &self.redux
    }

    pub fn is_reduced(&self, axis: usize) -> bool {
        self.redux.get(axis).copied().unwrap_or(false)
    }

    /// Extents of the kept axes, outermost first.
    pub fn out_shape(&self, dims: &[usize]) -> Vec<usize> {
        dims.iter().zip(&self.redux).filter(|(_, r)| !**r).map(|(d, _)| *d).collect()
    }

    /// Decomposition walk over the kept axes (unit id).
    pub fn kept_steps(&self) -> Vec<RadixStep> {
        radix_steps(self.nd(), |axis| !self.redux[axis])
    }

    /// Decomposition walk over the reduced axes (loop index).
    pub fn reduced_steps(&self) -> Vec<RadixStep> {
        radix_steps(self.nd(), |axis| self.redux[axis])
    }
}

// ---------------------------------------------------------------------------
// Mixed-radix walk
// ---------------------------------------------------------------------------

/// One digit of a mixed-radix decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RadixStep {
    pub axis: usize,
    /// Axis 0 takes whatever quotient is left instead of a remainder.
    pub takes_quotient: bool,
}

/// Steps for the selected axes from `nd - 1` down to `0`.
pub fn radix_steps(nd: usize, selected: impl Fn(usize) -> bool) -> Vec<RadixStep> {
    (0..nd)
        .rev()
        .filter(|&axis| selected(axis))
        .map(|axis| RadixStep { axis, takes_quotient: axis == 0 })
        .collect()
}

/// Walk `steps` over `index`, returning `(axis, position)` pairs in step
/// order.
pub fn decompose(mut index: usize, dims: &[usize], steps: &[RadixStep]) -> Vec<(usize, usize)> {
    steps
        .iter()
        .map(|step| {
            if step.takes_quotient {
                return (step.axis, index);
            }
            let dim = dims[step.axis];
            let pos = index.checked_rem(dim).unwrap_or(0);
            index = index.checked_div(dim).unwrap_or(0);
            (step.axis, pos)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Kernel plan
// ---------------------------------------------------------------------------

/// Everything needed to emit (or execute) one kernel variant.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelPlan {
    pub name: String,
    pub preamble: String,
    pub reduce_expr: String,
    pub neutral: String,
    /// Per-element expression with accessors already rewritten.
    pub map_expr: String,
    pub out_arg: KernelArg,
    pub arguments: Vec<KernelArg>,
    pub partition: AxisPartition,
    pub local_size: usize,
}

impl KernelPlan {
    pub fn nd(&self) -> usize {
        self.partition.nd()
    }

    pub fn dtype_out(&self) -> DType {
        self.out_arg.dtype()
    }

    /// Active-worker counts of the tree phase: `L/2, L/4, ..., 1`.
    pub fn halvings(&self) -> Vec<usize> {
        std::iter::successors(Some(self.local_size / 2), |&h| (h > 1).then_some(h / 2))
            .take_while(|&h| h >= 1)
            .collect()
    }

    pub fn array_args(&self) -> impl Iterator<Item = &KernelArg> {
        self.arguments.iter().filter(|a| a.is_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(local_size: usize) -> KernelPlan {
        KernelPlan {
            name: KERNEL_NAME.into(),
            preamble: String::new(),
            reduce_expr: "a + b".into(),
            neutral: "0".into(),
            map_expr: "x[0]".into(),
            out_arg: KernelArg::array(DType::F32, OUT_NAME),
            arguments: vec![KernelArg::array(DType::F32, "x")],
            partition: AxisPartition::new(vec![false, true]).unwrap(),
            local_size,
        }
    }

    #[test]
    fn empty_or_all_false_mask_rejected() {
        assert!(matches!(AxisPartition::new(vec![]), Err(ReduxError::InvalidConfiguration(_))));
        assert!(AxisPartition::new(vec![false, false]).is_err());
    }

    #[test]
    fn steps_run_innermost_first() {
        let p = AxisPartition::new(vec![false, true, false, true]).unwrap();
        let kept: Vec<_> = p.kept_steps().iter().map(|s| s.axis).collect();
        let reduced: Vec<_> = p.reduced_steps().iter().map(|s| s.axis).collect();
        assert_eq!(kept, vec![2, 0]);
        assert_eq!(reduced, vec![3, 1]);
        assert!(p.kept_steps()[1].takes_quotient);
        assert!(!p.reduced_steps()[1].takes_quotient);
    }

    #[test]
    fn out_shape_keeps_unreduced_dims() {
        let p = AxisPartition::new(vec![true, false, true]).unwrap();
        assert_eq!(p.out_shape(&[2, 3, 4]), vec![3]);
    }

    #[test]
    fn decompose_matches_row_major_order() {
        let dims = [2, 3, 4];
        let steps = radix_steps(3, |_| true);
        for flat in 0..24 {
            let coords = decompose(flat, &dims, &steps);
            let (i0, i1, i2) = (coords[2].1, coords[1].1, coords[0].1);
            assert_eq!(i0 * 12 + i1 * 4 + i2, flat);
        }
    }

    #[test]
    fn decompose_over_subset_ignores_other_axes() {
        // reduced axes 0 and 2 of a [2, 3, 4] array: extent 8
        let steps = radix_steps(3, |a| a != 1);
        assert_eq!(decompose(5, &[2, 3, 4], &steps), vec![(2, 1), (0, 1)]);
    }

    #[test]
    fn halvings_for_power_of_two() {
        assert_eq!(plan(8).halvings(), vec![4, 2, 1]);
        assert_eq!(plan(2).halvings(), vec![1]);
        assert!(plan(1).halvings().is_empty());
    }
}
