//! Strided device arrays and the values passed to a reduction call.

use axred_common::{DType, Element, ReduxError, Result, ScalarValue};

use crate::plan::{decompose, radix_steps};

/// An N-dimensional view over a device buffer.
///
/// Strides and the offset are in bytes. Strides may be negative or zero
/// as long as every addressed element lies inside the buffer.
#[derive(Debug, Clone)]
pub struct GpuArray<B> {
    buffer: B,
    dtype: DType,
    shape: Vec<usize>,
    strides: Vec<isize>,
    offset: usize,
}

/// Row-major byte strides for `shape`.
pub fn c_strides(shape: &[usize], elem_size: usize) -> Vec<isize> {
    let mut strides = vec![0_isize; shape.len()];
    let mut acc = elem_size as isize;
    for (stride, &dim) in strides.iter_mut().zip(shape).rev() {
        *stride = acc;
        acc *= dim.max(1) as isize;
    }
    strides
}

impl<B> GpuArray<B> {
    /// A C-contiguous array covering `buffer` from byte 0.
    pub fn contiguous(buffer: B, dtype: DType, shape: Vec<usize>) -> Self {
        let strides = c_strides(&shape, dtype.size_in_bytes());
        Self { buffer, dtype, shape, strides, offset: 0 }
    }

    /// An arbitrary strided view.
    pub fn from_parts(
        buffer: B,
        dtype: DType,
        shape: Vec<usize>,
        strides: Vec<isize>,
        offset: usize,
    ) -> Result<Self> {
        if strides.len() != shape.len() {
            return Err(ReduxError::argument(format!(
                "{} strides given for a {}-d shape",
                strides.len(),
                shape.len()
            )));
        }
        Ok(Self { buffer, dtype, shape, strides, offset })
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major contiguous, ignoring strides of unit or empty axes.
    pub fn is_c_contiguous(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        let expected = c_strides(&self.shape, self.dtype.size_in_bytes());
        self.shape
            .iter()
            .zip(self.strides.iter().zip(&expected))
            .all(|(&dim, (have, want))| dim == 1 || have == want)
    }

    /// Lowest and one-past-highest byte touched by the view.
    pub fn byte_extent(&self) -> (isize, isize) {
        let base = self.offset as isize;
        if self.is_empty() {
            return (base, base);
        }
        let (mut lo, mut hi) = (base, base);
        for (&dim, &stride) in self.shape.iter().zip(&self.strides) {
            let span = (dim as isize - 1) * stride;
            if span < 0 {
                lo += span;
            } else {
                hi += span;
            }
        }
        (lo, hi + self.dtype.size_in_bytes() as isize)
    }

    /// The same data with axes reordered: axis `k` of the result is axis
    /// `axes[k]` of `self`.
    pub fn permuted(&self, axes: &[usize]) -> Result<Self>
    where
        B: Clone,
    {
        let mut seen = vec![false; self.ndim()];
        if axes.len() != self.ndim() {
            return Err(ReduxError::argument(format!(
                "permutation {axes:?} does not match {} axes",
                self.ndim()
            )));
        }
        for &axis in axes {
            if axis >= self.ndim() || seen[axis] {
                return Err(ReduxError::argument(format!("invalid permutation {axes:?}")));
            }
            seen[axis] = true;
        }
        Ok(Self {
            buffer: self.buffer.clone(),
            dtype: self.dtype,
            shape: axes.iter().map(|&a| self.shape[a]).collect(),
            strides: axes.iter().map(|&a| self.strides[a]).collect(),
            offset: self.offset,
        })
    }
}

/// Read the elements of `array` in row-major order from the raw `bytes` of
/// its buffer, following strides and offset.
pub fn gather<T: Element, B>(bytes: &[u8], array: &GpuArray<B>) -> Result<Vec<T>> {
    if array.dtype() != T::DTYPE {
        return Err(ReduxError::argument(format!(
            "cannot read {} elements as {}",
            array.dtype(),
            T::DTYPE
        )));
    }
    let size = T::DTYPE.size_in_bytes();
    let steps = radix_steps(array.ndim(), |_| true);
    let mut values = Vec::with_capacity(array.len());
    for flat in 0..array.len() {
        let mut at = array.offset() as isize;
        for (axis, pos) in decompose(flat, array.shape(), &steps) {
            at += pos as isize * array.strides()[axis];
        }
        let slot = usize::try_from(at)
            .ok()
            .and_then(|start| bytes.get(start..start.checked_add(size)?))
            .ok_or_else(|| {
                ReduxError::argument(format!("element at byte {at} lies outside the buffer"))
            })?;
        values.push(bytemuck::pod_read_unaligned(slot));
    }
    Ok(values)
}

/// A runtime value for one formal argument of a reduction.
#[derive(Debug)]
pub enum CallArg<'a, B> {
    Array(&'a GpuArray<B>),
    Scalar(ScalarValue),
}

impl<B> Clone for CallArg<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for CallArg<'_, B> {}

impl<'a, B> From<&'a GpuArray<B>> for CallArg<'a, B> {
    fn from(array: &'a GpuArray<B>) -> Self {
        Self::Array(array)
    }
}

impl<B> From<ScalarValue> for CallArg<'_, B> {
    fn from(value: ScalarValue) -> Self {
        Self::Scalar(value)
    }
}

/// One marshaled kernel launch argument, in ABI order.
#[derive(Debug)]
pub enum LaunchArg<'a, B> {
    U32(u32),
    I32(i32),
    Buffer(&'a B),
    Scalar(ScalarValue),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_strides_row_major() {
        assert_eq!(c_strides(&[2, 3, 4], 4), vec![48, 16, 4]);
        assert_eq!(c_strides(&[], 8), Vec::<isize>::new());
    }

    #[test]
    fn contiguous_view_reports_contiguous() {
        let a = GpuArray::contiguous((), DType::F32, vec![2, 3]);
        assert!(a.is_c_contiguous());
        assert_eq!(a.len(), 6);
        assert_eq!(a.byte_extent(), (0, 24));
    }

    #[test]
    fn permuted_view_is_not_contiguous() {
        let a = GpuArray::contiguous((), DType::F32, vec![2, 3]);
        let t = a.permuted(&[1, 0]).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.strides(), &[4, 12]);
        assert!(!t.is_c_contiguous());
        assert_eq!(t.byte_extent(), (0, 24));
    }

    #[test]
    fn unit_axes_ignore_stride() {
        let a = GpuArray::from_parts((), DType::I32, vec![1, 3], vec![999, 4], 0).unwrap();
        assert!(a.is_c_contiguous());
    }

    #[test]
    fn negative_strides_extend_downwards() {
        let a = GpuArray::from_parts((), DType::F64, vec![4], vec![-8], 24).unwrap();
        assert_eq!(a.byte_extent(), (0, 32));
    }

    #[test]
    fn bad_permutations_rejected() {
        let a = GpuArray::contiguous((), DType::F32, vec![2, 3]);
        assert!(a.permuted(&[0]).is_err());
        assert!(a.permuted(&[0, 0]).is_err());
        assert!(a.permuted(&[0, 2]).is_err());
    }

    #[test]
    fn gather_reads_strided_view() {
        let bytes: Vec<u8> = [1_i16, 2, 3, 4, 5, 6].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let a = GpuArray::from_parts((), DType::I16, vec![3], vec![-4], 8).unwrap();
        assert_eq!(gather::<i16, _>(&bytes, &a).unwrap(), vec![5, 3, 1]);
        let wide = GpuArray::from_parts((), DType::I16, vec![4], vec![4], 0).unwrap();
        assert!(gather::<i16, _>(&bytes, &wide).is_err());
        assert!(gather::<u16, _>(&bytes, &a).is_err());
    }

    #[test]
    fn stride_count_must_match() {
        assert!(GpuArray::from_parts((), DType::F32, vec![2, 3], vec![4], 0).is_err());
    }
}
