//! Kernel argument descriptors and the C declaration parser.

use std::fmt;

use axred_common::{DType, ReduxError, Result};
use serde::{Deserialize, Serialize};

/// Qualifiers accepted (and dropped) in argument declarations.
const QUALIFIERS: &[&str] = &[
    "const",
    "volatile",
    "restrict",
    "__restrict",
    "__restrict__",
    "GLOBAL_MEM",
    "__global",
    "global",
];

/// One formal parameter of a reduction: a strided array or a by-value scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KernelArg {
    Array { dtype: DType, name: String },
    Scalar { dtype: DType, name: String },
}

impl KernelArg {
    pub fn array(dtype: DType, name: impl Into<String>) -> Self {
        Self::Array { dtype, name: name.into() }
    }

    pub fn scalar(dtype: DType, name: impl Into<String>) -> Self {
        Self::Scalar { dtype, name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Array { name, .. } | Self::Scalar { name, .. } => name,
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::Array { dtype, .. } | Self::Scalar { dtype, .. } => *dtype,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    /// Element storage type (`float`, `unsigned int`, ...).
    pub fn ctype(&self) -> &'static str {
        self.dtype().c_name()
    }

    /// Parameter type as written in the kernel signature: a global pointer
    /// for arrays, the plain element type for scalars.
    pub fn decl_type(&self) -> String {
        match self {
            Self::Array { dtype, .. } => format!("GLOBAL_MEM {} *", dtype.c_name()),
            Self::Scalar { dtype, .. } => dtype.c_name().to_string(),
        }
    }
}

impl fmt::Display for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array { .. } => write!(f, "{}{}", self.decl_type(), self.name()),
            Self::Scalar { .. } => write!(f, "{} {}", self.decl_type(), self.name()),
        }
    }
}

/// `true` for a valid C identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Parse a comma-separated list of C parameter declarations such as
/// `"const float *x, float *y, float alpha"`.
///
/// A `*` or a trailing `[]` marks an array argument; everything else is a
/// scalar. Address-space and cv qualifiers are ignored.
pub fn parse_c_args(decls: &str) -> Result<Vec<KernelArg>> {
    if decls.trim().is_empty() {
        return Ok(Vec::new());
    }
    decls.split(',').map(parse_one).collect()
}

fn parse_one(decl: &str) -> Result<KernelArg> {
    let mut text = decl.trim().to_string();
    let mut is_array = false;

    if let Some(stripped) = text.strip_suffix("[]") {
        text = stripped.trim_end().to_string();
        is_array = true;
    }
    if text.contains('*') {
        if text.matches('*').count() > 1 {
            return Err(ReduxError::parse(decl, "pointer-to-pointer arguments are not supported"));
        }
        is_array = true;
        text = text.replace('*', " * ");
    }

    let words: Vec<&str> = text
        .split_whitespace()
        .filter(|w| *w != "*" && !QUALIFIERS.contains(w))
        .collect();

    let Some((name, type_words)) = words.split_last() else {
        return Err(ReduxError::parse(decl, "empty argument declaration"));
    };
    if type_words.is_empty() {
        return Err(ReduxError::parse(decl, "missing argument type"));
    }
    if !is_identifier(name) {
        return Err(ReduxError::parse(decl, format!("`{name}` is not a valid argument name")));
    }

    let type_name = type_words.join(" ");
    let dtype = DType::from_c_name(&type_name)
        .ok_or_else(|| ReduxError::parse(decl, format!("unknown type `{type_name}`")))?;

    Ok(if is_array {
        KernelArg::array(dtype, *name)
    } else {
        KernelArg::scalar(dtype, *name)
    })
}
