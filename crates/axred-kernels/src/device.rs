//! Device abstraction used by the invocation driver.

use std::rc::Rc;
use std::sync::Arc;

use axred_common::{DeviceLimits, Result};

use crate::array::LaunchArg;
use crate::cluda::NumericFlags;
use crate::source::KernelSource;

/// A kernel after compilation.
pub trait CompiledKernel {
    /// Largest local size this kernel can be launched with, as reported by
    /// the compiler for the built binary (register and local-memory
    /// pressure may push it below the device maximum).
    fn max_supported_local_size(&self) -> usize;
}

impl<K: CompiledKernel + ?Sized> CompiledKernel for Rc<K> {
    fn max_supported_local_size(&self) -> usize {
        (**self).max_supported_local_size()
    }
}

impl<K: CompiledKernel + ?Sized> CompiledKernel for Arc<K> {
    fn max_supported_local_size(&self) -> usize {
        (**self).max_supported_local_size()
    }
}

/// Memory, compilation and launch services of a compute device.
pub trait ComputeDevice {
    type Buffer;
    type Kernel: CompiledKernel;

    /// Immutable limits snapshot.
    fn limits(&self) -> DeviceLimits;

    /// Allocate an uninitialized buffer of `bytes` bytes.
    fn alloc(&self, bytes: usize) -> Result<Self::Buffer>;

    /// Compile `source` with the shims selected by `flags`.
    fn build(&self, source: &KernelSource, flags: NumericFlags) -> Result<Self::Kernel>;

    /// Run `kernel` with `grid_size` units of `local_size` workers each.
    ///
    /// `args` follow the kernel's parameter order exactly.
    fn launch(
        &self,
        kernel: &Self::Kernel,
        args: &[LaunchArg<'_, Self::Buffer>],
        local_size: usize,
        grid_size: usize,
    ) -> Result<()>;
}
