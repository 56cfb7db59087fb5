//! Element types understood by the kernel generator and the devices.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReduxError;

/// Numeric element type of an array or scalar kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "int8")]
    I8,
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "int16")]
    I16,
    #[serde(rename = "uint16")]
    U16,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "uint32")]
    U32,
    #[serde(rename = "int64")]
    I64,
    #[serde(rename = "uint64")]
    U64,
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
    #[serde(rename = "complex64")]
    C64,
    #[serde(rename = "complex128")]
    C128,
}

impl DType {
    /// Every supported type, narrowest first within each family.
    pub const ALL: [DType; 12] = [
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::C64,
        Self::C128,
    ];

    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 | Self::C64 => 8,
            Self::C128 => 16,
        }
    }

    /// C spelling used in generated kernel source.
    pub const fn c_name(self) -> &'static str {
        match self {
            Self::I8 => "char",
            Self::U8 => "unsigned char",
            Self::I16 => "short",
            Self::U16 => "unsigned short",
            Self::I32 => "int",
            Self::U32 => "unsigned int",
            Self::I64 => "long",
            Self::U64 => "unsigned long",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::C64 => "cfloat_t",
            Self::C128 => "cdouble_t",
        }
    }

    /// Canonical short name (`float32`, `int8`, ...).
    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "int8",
            Self::U8 => "uint8",
            Self::I16 => "int16",
            Self::U16 => "uint16",
            Self::I32 => "int32",
            Self::U32 => "uint32",
            Self::I64 => "int64",
            Self::U64 => "uint64",
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::C64 => "complex64",
            Self::C128 => "complex128",
        }
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::I8
                | Self::U8
                | Self::I16
                | Self::U16
                | Self::I32
                | Self::U32
                | Self::I64
                | Self::U64
        )
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub const fn is_complex(self) -> bool {
        matches!(self, Self::C64 | Self::C128)
    }

    /// Types that need double-precision support on the device.
    pub const fn needs_double(self) -> bool {
        matches!(self, Self::F64 | Self::C128)
    }

    /// Parse a C type spelling as it appears in argument declarations
    /// and casts (`float`, `unsigned int`, `uchar`, ...).
    pub fn from_c_name(name: &str) -> Option<Self> {
        let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ");
        let dtype = match normalized.as_str() {
            "char" | "signed char" => Self::I8,
            "unsigned char" | "uchar" => Self::U8,
            "short" | "signed short" | "short int" => Self::I16,
            "unsigned short" | "ushort" | "unsigned short int" => Self::U16,
            "int" | "signed int" | "signed" => Self::I32,
            "unsigned int" | "uint" | "unsigned" => Self::U32,
            "long" | "signed long" | "long int" => Self::I64,
            "unsigned long" | "ulong" | "unsigned long int" => Self::U64,
            "float" => Self::F32,
            "double" => Self::F64,
            "cfloat_t" => Self::C64,
            "cdouble_t" => Self::C128,
            _ => return None,
        };
        Some(dtype)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = ReduxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let short = match lowered.as_str() {
            "i8" | "int8" => Some(Self::I8),
            "u8" | "uint8" => Some(Self::U8),
            "i16" | "int16" => Some(Self::I16),
            "u16" | "uint16" => Some(Self::U16),
            "i32" | "int32" => Some(Self::I32),
            "u32" | "uint32" => Some(Self::U32),
            "i64" | "int64" => Some(Self::I64),
            "u64" | "uint64" => Some(Self::U64),
            "f32" | "float32" => Some(Self::F32),
            "f64" | "float64" => Some(Self::F64),
            "c64" | "complex64" => Some(Self::C64),
            "c128" | "complex128" => Some(Self::C128),
            _ => None,
        };
        short.or_else(|| Self::from_c_name(&lowered)).ok_or_else(|| ReduxError::Parse {
            input: s.to_string(),
            reason: "unknown element type".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Host element types
// ---------------------------------------------------------------------------

/// Plain host type that maps one-to-one onto a [`DType`].
pub trait Element: bytemuck::Pod + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
            }
        )*
    };
}

impl_element! {
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
