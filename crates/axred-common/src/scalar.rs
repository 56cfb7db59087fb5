//! By-value scalar kernel arguments.

use std::fmt;

use crate::dtype::DType;

/// A scalar passed by value to a kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl ScalarValue {
    pub fn dtype(&self) -> DType {
        match self {
            Self::I8(_) => DType::I8,
            Self::U8(_) => DType::U8,
            Self::I16(_) => DType::I16,
            Self::U16(_) => DType::U16,
            Self::I32(_) => DType::I32,
            Self::U32(_) => DType::U32,
            Self::I64(_) => DType::I64,
            Self::U64(_) => DType::U64,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32(_) | Self::F64(_))
    }

    /// Value widened to `f64`.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::I8(v) => v as f64,
            Self::U8(v) => v as f64,
            Self::I16(v) => v as f64,
            Self::U16(v) => v as f64,
            Self::I32(v) => v as f64,
            Self::U32(v) => v as f64,
            Self::I64(v) => v as f64,
            Self::U64(v) => v as f64,
            Self::F32(v) => v as f64,
            Self::F64(v) => v,
        }
    }

    /// Integer value; floats truncate toward zero.
    pub fn as_i128(&self) -> i128 {
        match *self {
            Self::I8(v) => v as i128,
            Self::U8(v) => v as i128,
            Self::I16(v) => v as i128,
            Self::U16(v) => v as i128,
            Self::I32(v) => v as i128,
            Self::U32(v) => v as i128,
            Self::I64(v) => v as i128,
            Self::U64(v) => v as i128,
            Self::F32(v) => v as i128,
            Self::F64(v) => v as i128,
        }
    }

    /// Convert to `dtype` with C cast semantics (integers wrap, floats
    /// truncate). Complex targets have no scalar form and return `None`.
    pub fn cast(self, dtype: DType) -> Option<Self> {
        if self.is_float() {
            let v = self.as_f64();
            let out = match dtype {
                DType::I8 => Self::I8(v as i8),
                DType::U8 => Self::U8(v as u8),
                DType::I16 => Self::I16(v as i16),
                DType::U16 => Self::U16(v as u16),
                DType::I32 => Self::I32(v as i32),
                DType::U32 => Self::U32(v as u32),
                DType::I64 => Self::I64(v as i64),
                DType::U64 => Self::U64(v as u64),
                DType::F32 => Self::F32(v as f32),
                DType::F64 => Self::F64(v),
                DType::C64 | DType::C128 => return None,
            };
            return Some(out);
        }

        let v = self.as_i128();
        let out = match dtype {
            DType::I8 => Self::I8(v as i8),
            DType::U8 => Self::U8(v as u8),
            DType::I16 => Self::I16(v as i16),
            DType::U16 => Self::U16(v as u16),
            DType::I32 => Self::I32(v as i32),
            DType::U32 => Self::U32(v as u32),
            DType::I64 => Self::I64(v as i64),
            DType::U64 => Self::U64(v as u64),
            DType::F32 => Self::F32(v as f32),
            DType::F64 => Self::F64(v as f64),
            DType::C64 | DType::C128 => return None,
        };
        Some(out)
    }

    /// Native-endian byte image, as copied into device argument slots.
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        match *self {
            Self::I8(v) => v.to_ne_bytes().to_vec(),
            Self::U8(v) => v.to_ne_bytes().to_vec(),
            Self::I16(v) => v.to_ne_bytes().to_vec(),
            Self::U16(v) => v.to_ne_bytes().to_vec(),
            Self::I32(v) => v.to_ne_bytes().to_vec(),
            Self::U32(v) => v.to_ne_bytes().to_vec(),
            Self::I64(v) => v.to_ne_bytes().to_vec(),
            Self::U64(v) => v.to_ne_bytes().to_vec(),
            Self::F32(v) => v.to_ne_bytes().to_vec(),
            Self::F64(v) => v.to_ne_bytes().to_vec(),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I8(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ScalarValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_primitive! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_float_to_int_truncates() {
        assert_eq!(ScalarValue::F64(2.9).cast(DType::I32), Some(ScalarValue::I32(2)));
        assert_eq!(ScalarValue::F32(-2.9).cast(DType::I64), Some(ScalarValue::I64(-2)));
    }

    #[test]
    fn cast_int_wraps_like_c() {
        assert_eq!(ScalarValue::I32(300).cast(DType::U8), Some(ScalarValue::U8(44)));
        assert_eq!(ScalarValue::I32(-1).cast(DType::U32), Some(ScalarValue::U32(u32::MAX)));
    }

    #[test]
    fn cast_to_complex_is_none() {
        assert_eq!(ScalarValue::F32(1.0).cast(DType::C64), None);
    }

    #[test]
    fn dtype_follows_variant() {
        assert_eq!(ScalarValue::from(3u16).dtype(), DType::U16);
        assert_eq!(ScalarValue::from(3.0f64).dtype(), DType::F64);
    }

    #[test]
    fn byte_image_width() {
        for value in [ScalarValue::I8(1), ScalarValue::U32(1), ScalarValue::F64(1.0)] {
            assert_eq!(value.to_ne_bytes().len(), value.dtype().size_in_bytes());
        }
    }
}
