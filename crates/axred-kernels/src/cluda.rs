//! Portability header prepended to generated kernels.
//!
//! Generated source only uses the macros below, so the same text builds
//! as OpenCL C or CUDA depending on which header is put in front of it.

use std::fmt;

use axred_common::DType;

use crate::args::KernelArg;

/// Optional device features a kernel's element types depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NumericFlags {
    /// Stores narrower than 32 bits.
    pub have_small: bool,
    pub have_double: bool,
    pub have_complex: bool,
}

impl NumericFlags {
    /// Flags needed by `arguments` and an output of type `dtype_out`.
    ///
    /// Only array arguments count towards `have_small`: scalars are passed
    /// by value and never stored through a pointer.
    pub fn for_arguments(arguments: &[KernelArg], dtype_out: DType) -> Self {
        let mut flags = Self::default();
        let out = KernelArg::array(dtype_out, "out");
        for arg in arguments.iter().chain(std::iter::once(&out)) {
            let dtype = arg.dtype();
            flags.have_small |= arg.is_array() && dtype.size_in_bytes() < 4;
            flags.have_double |= dtype.needs_double();
            flags.have_complex |= dtype.is_complex();
        }
        flags
    }
}

/// Source dialect of the backend compiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Dialect {
    #[default]
    OpenCl,
    Cuda,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenCl => write!(f, "opencl"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = axred_common::ReduxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opencl" | "cl" => Ok(Self::OpenCl),
            "cuda" => Ok(Self::Cuda),
            other => Err(axred_common::ReduxError::parse(other, "unknown kernel dialect")),
        }
    }
}

const OPENCL_MACROS: &str = "\
#define KERNEL __kernel
#define GLOBAL_MEM __global
#define LOCAL_MEM __local
#define LID_0 get_local_id(0)
#define GID_0 get_group_id(0)
#define LDIM_0 get_local_size(0)
#define local_barrier() barrier(CLK_LOCAL_MEM_FENCE)
#define infinity INFINITY
";

const CUDA_MACROS: &str = "\
#define KERNEL extern \"C\" __global__
#define GLOBAL_MEM
#define LOCAL_MEM __shared__
#define LID_0 threadIdx.x
#define GID_0 blockIdx.x
#define LDIM_0 blockDim.x
#define local_barrier() __syncthreads()
#define infinity __int_as_float(0x7f800000)
";

/// Feature pragmas and typedefs selected by `flags`.
pub fn support_header(dialect: Dialect, flags: NumericFlags) -> String {
    let mut out = String::new();
    if dialect == Dialect::OpenCl {
        if flags.have_small {
            out.push_str("#pragma OPENCL EXTENSION cl_khr_byte_addressable_store : enable\n");
        }
        if flags.have_double {
            out.push_str("#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n");
        }
    }
    if flags.have_complex {
        out.push_str("typedef float2 cfloat_t;\n");
        if flags.have_double {
            out.push_str("typedef double2 cdouble_t;\n");
        }
    }
    out
}

/// Full header: support shims followed by the portability macros.
pub fn header(dialect: Dialect, flags: NumericFlags) -> String {
    let macros = match dialect {
        Dialect::OpenCl => OPENCL_MACROS,
        Dialect::Cuda => CUDA_MACROS,
    };
    let mut out = support_header(dialect, flags);
    out.push_str(macros);
    out
}
