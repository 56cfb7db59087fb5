//! Reduction configuration and the per-call invocation driver.

use axred_common::{DType, DeviceLimits, ReduxError, Result};
use tracing::debug;

use crate::args::{KernelArg, is_identifier, parse_c_args};
use crate::array::{CallArg, GpuArray, LaunchArg};
use crate::cache::{CacheKey, KernelCache};
use crate::cluda::NumericFlags;
use crate::device::ComputeDevice;
use crate::expr;
use crate::layout::check_args;
use crate::negotiate::negotiate_local_size;
use crate::plan::{AxisPartition, KERNEL_NAME, KernelPlan, OUT_NAME};
use crate::source::KernelSource;

/// Argument name used when no arguments are declared.
pub const DEFAULT_INPUT_NAME: &str = "_reduce_input";

/// Identifiers the generated kernel declares itself.
const RESERVED_NAMES: &[&str] = &["n", "i", "ii", "lid", "acc", "tmp", "ldata", "pos", OUT_NAME];

/// Suffixes the generated kernel appends to array argument names.
const ARRAY_SUFFIXES: &[&str] = &["_data", "_offset", "_base", "_p"];

/// Builder for [`ReductionKernel`].
#[derive(Debug, Clone)]
pub struct ReductionBuilder {
    dtype_out: DType,
    neutral: String,
    reduce_expr: String,
    redux: Vec<bool>,
    map_expr: Option<String>,
    arguments: Option<Vec<KernelArg>>,
    arguments_decl: Option<String>,
    preamble: String,
    max_local_size: Option<usize>,
}

impl ReductionBuilder {
    /// Per-element expression, written with `name[i]` accessors.
    pub fn map_expr(mut self, expr: impl Into<String>) -> Self {
        self.map_expr = Some(expr.into());
        self
    }

    pub fn arguments(mut self, arguments: Vec<KernelArg>) -> Self {
        self.arguments = Some(arguments);
        self.arguments_decl = None;
        self
    }

    /// Arguments as C declarations, e.g. `"const float *x, float a"`.
    pub fn arguments_str(mut self, decls: impl Into<String>) -> Self {
        self.arguments_decl = Some(decls.into());
        self.arguments = None;
        self
    }

    /// Source placed before the kernel (helper functions, defines).
    pub fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    /// Cap on the initial local-size estimate.
    pub fn max_local_size(mut self, cap: Option<usize>) -> Self {
        self.max_local_size = cap;
        self
    }

    pub fn build(self, limits: DeviceLimits) -> Result<ReductionKernel> {
        let partition = AxisPartition::new(self.redux)?;

        // Only an absent list defaults; an explicit empty one has no array
        // argument and is rejected below.
        let arguments = match (self.arguments, self.arguments_decl) {
            (Some(arguments), _) => arguments,
            (None, Some(decl)) => parse_c_args(&decl)?,
            (None, None) => vec![KernelArg::array(self.dtype_out, DEFAULT_INPUT_NAME)],
        };
        check_names(&arguments)?;
        if !arguments.iter().any(KernelArg::is_array) {
            return Err(ReduxError::config("at least one array argument is required"));
        }

        let map_src = match self.map_expr {
            Some(expr) => expr,
            None if arguments.len() == 1 => format!("{}[i]", arguments[0].name()),
            None => {
                return Err(ReduxError::config(format!(
                    "{} arguments need an explicit map expression",
                    arguments.len()
                )));
            }
        };
        let map_expr = expr::massage(&map_src).map_err(|e| invalid_expr("map", &map_src, e))?;
        expr::parse(&self.reduce_expr).map_err(|e| invalid_expr("reduce", &self.reduce_expr, e))?;
        expr::parse(&self.neutral).map_err(|e| invalid_expr("neutral", &self.neutral, e))?;

        let flags = NumericFlags::for_arguments(&arguments, self.dtype_out);
        let mut init_local_size = limits.initial_local_size(self.dtype_out.size_in_bytes());
        if let Some(cap) = self.max_local_size {
            init_local_size = init_local_size.min(cap);
        }
        debug!(
            dtype_out = %self.dtype_out,
            nd = partition.nd(),
            arguments = arguments.len(),
            init_local_size,
            "reduction configured"
        );

        Ok(ReductionKernel {
            preamble: self.preamble,
            reduce_expr: self.reduce_expr,
            neutral: self.neutral,
            map_expr,
            out_arg: KernelArg::array(self.dtype_out, OUT_NAME),
            arguments,
            partition,
            flags,
            limits,
            init_local_size,
        })
    }
}

fn invalid_expr(what: &str, src: &str, err: ReduxError) -> ReduxError {
    ReduxError::config(format!("invalid {what} expression `{src}`: {err}"))
}

fn check_names(arguments: &[KernelArg]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for arg in arguments {
        let name = arg.name();
        if !is_identifier(name) {
            return Err(ReduxError::config(format!("`{name}` is not a valid argument name")));
        }
        if !seen.insert(name) {
            return Err(ReduxError::config(format!("argument `{name}` is declared twice")));
        }
        let is_dim = name
            .strip_prefix("dim")
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()));
        if RESERVED_NAMES.contains(&name) || is_dim {
            return Err(ReduxError::config(format!("argument name `{name}` is reserved")));
        }
    }
    // `x_p` would collide with the cursor generated for an array `x`.
    for arg in arguments.iter().filter(|a| a.is_array()) {
        for suffix in ARRAY_SUFFIXES {
            let derived = format!("{}{suffix}", arg.name());
            if seen.contains(derived.as_str()) {
                return Err(ReduxError::config(format!(
                    "argument `{derived}` collides with array `{}`",
                    arg.name()
                )));
            }
        }
    }
    Ok(())
}

/// An immutable reduction configuration.
///
/// Each call rebuilds the kernel for the array rank and negotiated local
/// size; [`call_cached`](Self::call_cached) memoizes the builds instead.
#[derive(Debug, Clone)]
pub struct ReductionKernel {
    preamble: String,
    reduce_expr: String,
    neutral: String,
    map_expr: String,
    out_arg: KernelArg,
    arguments: Vec<KernelArg>,
    partition: AxisPartition,
    flags: NumericFlags,
    limits: DeviceLimits,
    init_local_size: usize,
}

impl ReductionKernel {
    /// Start a configuration: output type, identity literal, `REDUCE(a, b)`
    /// body and per-axis mask (`true` = collapsed).
    pub fn builder(
        dtype_out: DType,
        neutral: impl Into<String>,
        reduce_expr: impl Into<String>,
        redux: Vec<bool>,
    ) -> ReductionBuilder {
        ReductionBuilder {
            dtype_out,
            neutral: neutral.into(),
            reduce_expr: reduce_expr.into(),
            redux,
            map_expr: None,
            arguments: None,
            arguments_decl: None,
            preamble: String::new(),
            max_local_size: None,
        }
    }

    pub fn dtype_out(&self) -> DType {
        self.out_arg.dtype()
    }

    pub fn arguments(&self) -> &[KernelArg] {
        &self.arguments
    }

    pub fn partition(&self) -> &AxisPartition {
        &self.partition
    }

    /// Massaged per-element expression.
    pub fn map_expr(&self) -> &str {
        &self.map_expr
    }

    pub fn flags(&self) -> NumericFlags {
        self.flags
    }

    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    pub fn init_local_size(&self) -> usize {
        self.init_local_size
    }

    /// Plan of the kernel variant for local size `local_size`.
    pub fn plan(&self, local_size: usize) -> KernelPlan {
        KernelPlan {
            name: KERNEL_NAME.to_string(),
            preamble: self.preamble.clone(),
            reduce_expr: self.reduce_expr.clone(),
            neutral: self.neutral.clone(),
            map_expr: self.map_expr.clone(),
            out_arg: self.out_arg.clone(),
            arguments: self.arguments.clone(),
            partition: self.partition.clone(),
            local_size,
        }
    }

    /// Kernel source for local size `local_size` (a power of two).
    pub fn source(&self, local_size: usize) -> Result<KernelSource> {
        KernelSource::render(&self.plan(local_size))
    }

    /// Run the reduction, building the kernel anew.
    ///
    /// `args` match the declared arguments positionally. When `out` is
    /// given it must have the output shape, type `dtype_out` and be
    /// C-contiguous; it is filled and returned.
    pub fn call<D: ComputeDevice>(
        &self,
        device: &D,
        args: &[CallArg<'_, D::Buffer>],
        out: Option<GpuArray<D::Buffer>>,
    ) -> Result<GpuArray<D::Buffer>> {
        self.invoke(device, args, out, |ls| self.build_kernel(device, ls))
    }

    /// Like [`call`](Self::call) but reuses kernels from `cache`, which
    /// must only ever be used with this configuration.
    pub fn call_cached<D>(
        &self,
        device: &D,
        cache: &mut KernelCache<D::Kernel>,
        args: &[CallArg<'_, D::Buffer>],
        out: Option<GpuArray<D::Buffer>>,
    ) -> Result<GpuArray<D::Buffer>>
    where
        D: ComputeDevice,
        D::Kernel: Clone,
    {
        let nd = self.partition.nd();
        self.invoke(device, args, out, |local_size| {
            cache.get_or_build(CacheKey { nd, local_size }, || {
                self.build_kernel(device, local_size)
            })
        })
    }

    fn build_kernel<D: ComputeDevice>(&self, device: &D, local_size: usize) -> Result<D::Kernel> {
        let source = self.source(local_size)?;
        debug!(local_size, nd = self.partition.nd(), "building reduction kernel");
        device.build(&source, self.flags)
    }

    fn invoke<D, F>(
        &self,
        device: &D,
        args: &[CallArg<'_, D::Buffer>],
        out: Option<GpuArray<D::Buffer>>,
        build: F,
    ) -> Result<GpuArray<D::Buffer>>
    where
        D: ComputeDevice,
        F: FnMut(usize) -> Result<D::Kernel>,
    {
        self.check_call_args(args)?;
        let layout = check_args(args)?;
        if layout.nd != self.partition.nd() {
            return Err(ReduxError::argument(format!(
                "reduction mask has {} axes but the arrays have {}",
                self.partition.nd(),
                layout.nd
            )));
        }

        let n: usize = layout.dims.iter().product();
        let out_shape = self.partition.out_shape(&layout.dims);
        let grid_size: usize = out_shape.iter().product();
        if grid_size > self.limits.max_grid_size {
            return Err(ReduxError::GridTooLarge {
                grid_size,
                max_grid_size: self.limits.max_grid_size,
            });
        }
        let extent = if grid_size == 0 { 0 } else { n / grid_size };

        // Scalars and geometry are converted before anything touches the device.
        let dims = layout.dims.iter().map(|&d| to_u32(d, "dimension")).collect::<Result<Vec<_>>>()?;
        let extent_u32 = to_u32(extent, "reduced extent")?;
        let mut tail = Vec::new();
        for (decl, arg) in self.arguments.iter().zip(args) {
            match arg {
                CallArg::Array(array) => {
                    tail.push(LaunchArg::Buffer(array.buffer()));
                    tail.push(LaunchArg::U32(to_u32(array.offset(), "offset")?));
                    for &stride in array.strides() {
                        let stride = i32::try_from(stride).map_err(|_| {
                            ReduxError::argument(format!(
                                "stride {stride} of `{}` does not fit in 32 bits",
                                decl.name()
                            ))
                        })?;
                        tail.push(LaunchArg::I32(stride));
                    }
                }
                CallArg::Scalar(value) => {
                    let converted = value.cast(decl.dtype()).ok_or_else(|| {
                        ReduxError::argument(format!(
                            "cannot convert {value} to {} for `{}`",
                            decl.dtype(),
                            decl.name()
                        ))
                    })?;
                    tail.push(LaunchArg::Scalar(converted));
                }
            }
        }

        let out = match out {
            Some(out) => {
                self.check_output(&out, &out_shape)?;
                out
            }
            None => {
                let bytes = grid_size * self.dtype_out().size_in_bytes();
                GpuArray::contiguous(device.alloc(bytes)?, self.dtype_out(), out_shape)
            }
        };
        if grid_size == 0 {
            debug!("empty output, nothing to launch");
            return Ok(out);
        }

        let (kernel, local_size) = negotiate_local_size(self.init_local_size, extent, build)?;

        let mut launch_args = Vec::with_capacity(2 + dims.len() + tail.len());
        launch_args.push(LaunchArg::U32(extent_u32));
        launch_args.push(LaunchArg::Buffer(out.buffer()));
        launch_args.extend(dims.into_iter().map(LaunchArg::U32));
        launch_args.extend(tail);

        debug!(grid_size, local_size, extent, "launching reduction kernel");
        device.launch(&kernel, &launch_args, local_size, grid_size)?;
        Ok(out)
    }

    fn check_call_args<B>(&self, args: &[CallArg<'_, B>]) -> Result<()> {
        if args.len() != self.arguments.len() {
            return Err(ReduxError::argument(format!(
                "expected {} arguments, got {}",
                self.arguments.len(),
                args.len()
            )));
        }
        for (decl, arg) in self.arguments.iter().zip(args) {
            match (decl, arg) {
                (KernelArg::Array { dtype, name }, CallArg::Array(array)) => {
                    if array.dtype() != *dtype {
                        return Err(ReduxError::argument(format!(
                            "`{name}` expects {dtype} elements, got {}",
                            array.dtype()
                        )));
                    }
                }
                (KernelArg::Scalar { .. }, CallArg::Scalar(_)) => {}
                (KernelArg::Array { name, .. }, CallArg::Scalar(_)) => {
                    return Err(ReduxError::argument(format!("`{name}` expects an array")));
                }
                (KernelArg::Scalar { name, .. }, CallArg::Array(_)) => {
                    return Err(ReduxError::argument(format!("`{name}` expects a scalar")));
                }
            }
        }
        Ok(())
    }

    fn check_output<B>(&self, out: &GpuArray<B>, out_shape: &[usize]) -> Result<()> {
        if out.shape() != out_shape {
            return Err(ReduxError::ShapeMismatch {
                expected: out_shape.to_vec(),
                actual: out.shape().to_vec(),
            });
        }
        if out.dtype() != self.dtype_out() {
            return Err(ReduxError::argument(format!(
                "output has {} elements, expected {}",
                out.dtype(),
                self.dtype_out()
            )));
        }
        if !out.is_c_contiguous() {
            return Err(ReduxError::argument("output array must be C-contiguous"));
        }
        Ok(())
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ReduxError::argument(format!("{what} {value} does not fit in 32 bits")))
}
