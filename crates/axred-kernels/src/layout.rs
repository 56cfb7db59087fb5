//! Shape discovery over the runtime arguments of a call.

use axred_common::{ReduxError, Result};

use crate::array::CallArg;

/// Geometry shared by the array arguments of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgLayout {
    pub nd: usize,
    pub dims: Vec<usize>,
}

/// Inspect the arguments of a call without broadcasting: every array must
/// have exactly the same shape. Strides and offsets are read per array
/// when the launch arguments are marshaled.
pub fn check_args<B>(args: &[CallArg<'_, B>]) -> Result<ArgLayout> {
    let mut dims: Option<&[usize]> = None;

    let arrays = args.iter().filter_map(|arg| match arg {
        CallArg::Array(array) => Some(array),
        CallArg::Scalar(_) => None,
    });
    for array in arrays {
        match dims {
            None => dims = Some(array.shape()),
            Some(expected) if expected != array.shape() => {
                return Err(ReduxError::ShapeMismatch {
                    expected: expected.to_vec(),
                    actual: array.shape().to_vec(),
                });
            }
            Some(_) => {}
        }
    }

    let Some(dims) = dims else {
        return Err(ReduxError::argument("at least one array argument is required"));
    };
    Ok(ArgLayout { nd: dims.len(), dims: dims.to_vec() })
}
