//! Parametric generator and launcher for axis-reduction kernels.
//!
//! A [`ReductionKernel`] collapses any subset of the axes of one or more
//! equally shaped strided arrays. For every call it synthesizes a kernel
//! (one work-group per output element, grid-stride accumulation followed
//! by a local-memory tree), negotiates a power-of-two local size with the
//! device compiler and launches it.
//!
//! ```no_run
//! use axred_common::DType;
//! use axred_kernels::{CallArg, ComputeDevice, HostDevice, ReductionKernel};
//!
//! # fn main() -> axred_common::Result<()> {
//! let device = HostDevice::default();
//! let x = device.upload(&[1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3])?;
//! let sum_rows = ReductionKernel::builder(DType::F32, "0", "a + b", vec![false, true])
//!     .build(device.limits())?;
//! let out = sum_rows.call(&device, &[CallArg::Array(&x)], None)?;
//! assert_eq!(device.download::<f32>(&out)?, vec![6.0, 15.0]);
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod array;
pub mod cache;
pub mod cluda;
pub mod device;
pub mod expr;
pub mod host;
pub mod layout;
pub mod negotiate;
pub mod plan;
pub mod reduction;
pub mod source;

#[cfg(feature = "opencl")]
pub mod opencl;

pub use args::{KernelArg, parse_c_args};
pub use array::{CallArg, GpuArray, LaunchArg};
pub use cache::{CacheKey, KernelCache};
pub use cluda::{Dialect, NumericFlags};
pub use device::{CompiledKernel, ComputeDevice};
pub use host::{HostBuffer, HostDevice};
pub use layout::{ArgLayout, check_args};
pub use negotiate::negotiate_local_size;
pub use plan::{AxisPartition, KernelPlan};
pub use reduction::{ReductionBuilder, ReductionKernel};
pub use source::KernelSource;

#[cfg(feature = "opencl")]
pub use opencl::OpenClDevice;
