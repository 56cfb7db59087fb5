//! `axred run`: reduce inline data on the configured backend.

use anyhow::{Context, Result, bail};
use axred_common::{Backend, DType, ReduxError, ReduxSettings, ScalarValue};
use axred_kernels::{
    CallArg, ComputeDevice, GpuArray, HostDevice, KernelArg, KernelCache, ReductionKernel,
};
use clap::Parser;
use serde_json::json;
use tracing::{debug, info};

use super::{OutputFormat, ReductionArgs};

/// Reduce inline data
#[derive(Debug, Parser)]
pub struct RunCommand {
    #[command(flatten)]
    pub reduction: ReductionArgs,

    /// Shape of the input array, comma separated
    #[arg(long, value_name = "DIMS", value_delimiter = ',', required = true)]
    pub shape: Vec<usize>,

    /// Input values in row-major order, comma separated
    #[arg(long, value_name = "VALUES", value_delimiter = ',', allow_hyphen_values = true)]
    pub data: Vec<f64>,

    /// Values of the scalar arguments, in declaration order
    #[arg(long = "scalar", value_name = "VALUE", value_delimiter = ',', allow_hyphen_values = true)]
    pub scalars: Vec<f64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,
}

/// Result of a run, downloaded to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub values: Vec<f64>,
}

impl RunCommand {
    pub fn execute(self, settings: &ReduxSettings) -> Result<()> {
        let reduced = match settings.backend {
            Backend::Host => {
                let device = HostDevice::from_settings(&settings.device);
                let reduced = self.run_on(&device, settings)?;
                debug!(
                    builds = device.builds(),
                    launches = device.launches(),
                    allocations = device.allocations(),
                    "host device counters"
                );
                reduced
            }
            #[cfg(feature = "opencl")]
            Backend::OpenCl => {
                let device = axred_kernels::OpenClDevice::first_gpu()?;
                self.run_on(&device, settings)?
            }
            #[cfg(not(feature = "opencl"))]
            Backend::OpenCl => bail!("the OpenCL backend is not compiled in (enable the `opencl` feature)"),
        };

        match self.output_format {
            OutputFormat::Text => print!("{}", render_text(&reduced)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&render_json(&reduced))?),
        }
        Ok(())
    }

    fn run_on<D>(&self, device: &D, settings: &ReduxSettings) -> Result<Reduced>
    where
        D: Transfer,
        D::Kernel: Clone,
    {
        let kernel = self.reduction.build_for(settings, device.limits())?;
        let input = self.upload_input(device, &kernel)?;

        let mut scalars = self.scalars.iter();
        let mut args = Vec::with_capacity(kernel.arguments().len());
        for arg in kernel.arguments() {
            match arg {
                KernelArg::Array { .. } => args.push(CallArg::Array(&input)),
                KernelArg::Scalar { name, .. } => {
                    let Some(&value) = scalars.next() else {
                        bail!("no value given for scalar argument `{name}` (use --scalar)");
                    };
                    args.push(CallArg::Scalar(ScalarValue::F64(value)));
                }
            }
        }
        if scalars.next().is_some() {
            bail!("more --scalar values than scalar arguments");
        }

        info!(shape = ?self.shape, backend = %settings.backend, "running reduction");
        let out = if settings.kernel_cache {
            let mut cache = KernelCache::new();
            let out = kernel.call_cached(device, &mut cache, &args, None)?;
            debug!(hits = cache.hits(), misses = cache.misses(), "kernel cache");
            out
        } else {
            kernel.call(device, &args, None)?
        };

        let values = device.download_values(&out).context("failed to read the result")?;
        Ok(Reduced { shape: out.shape().to_vec(), dtype: out.dtype(), values })
    }

    fn upload_input<D: Transfer>(
        &self,
        device: &D,
        kernel: &ReductionKernel,
    ) -> Result<GpuArray<D::Buffer>> {
        let mut arrays = kernel.arguments().iter().filter(|arg| arg.is_array());
        let (Some(array), None) = (arrays.next(), arrays.next()) else {
            bail!("`run` supports exactly one array argument");
        };
        device
            .upload_values(&self.data, array.dtype(), self.shape.clone())
            .with_context(|| format!("failed to upload `{}`", array.name()))
    }
}

fn render_text(reduced: &Reduced) -> String {
    let values: Vec<String> = reduced.values.iter().map(|v| v.to_string()).collect();
    format!("shape: {:?}\n{}\n", reduced.shape, values.join(" "))
}

fn render_json(reduced: &Reduced) -> serde_json::Value {
    let values: Vec<serde_json::Value> = if reduced.dtype.is_integer() {
        reduced.values.iter().map(|&v| json!(v as i64)).collect()
    } else {
        reduced.values.iter().map(|&v| json!(v)).collect()
    };
    json!({
        "shape": reduced.shape,
        "dtype": reduced.dtype.name(),
        "values": values,
    })
}

/// Host-side `f64` transfers for any real element type.
trait Transfer: ComputeDevice {
    fn upload_values(
        &self,
        values: &[f64],
        dtype: DType,
        shape: Vec<usize>,
    ) -> axred_common::Result<GpuArray<Self::Buffer>>;

    fn download_values(&self, array: &GpuArray<Self::Buffer>) -> axred_common::Result<Vec<f64>>;
}

/// Evaluate `$body` with `$t` bound to the Rust type of `$dtype`.
macro_rules! with_element_type {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DType::I8 => {
                type $t = i8;
                $body
            }
            DType::U8 => {
                type $t = u8;
                $body
            }
            DType::I16 => {
                type $t = i16;
                $body
            }
            DType::U16 => {
                type $t = u16;
                $body
            }
            DType::I32 => {
                type $t = i32;
                $body
            }
            DType::U32 => {
                type $t = u32;
                $body
            }
            DType::I64 => {
                type $t = i64;
                $body
            }
            DType::U64 => {
                type $t = u64;
                $body
            }
            DType::F32 => {
                type $t = f32;
                $body
            }
            DType::F64 => {
                type $t = f64;
                $body
            }
            other @ (DType::C64 | DType::C128) => {
                Err(ReduxError::argument(format!("{other} data cannot be given inline")))
            }
        }
    };
}

macro_rules! impl_transfer {
    ($device:ty) => {
        impl Transfer for $device {
            fn upload_values(
                &self,
                values: &[f64],
                dtype: DType,
                shape: Vec<usize>,
            ) -> axred_common::Result<GpuArray<Self::Buffer>> {
                with_element_type!(dtype, T => {
                    let typed: Vec<T> = values.iter().map(|&v| v as T).collect();
                    self.upload(&typed, shape)
                })
            }

            fn download_values(
                &self,
                array: &GpuArray<Self::Buffer>,
            ) -> axred_common::Result<Vec<f64>> {
                with_element_type!(array.dtype(), T => {
                    let typed: Vec<T> = self.download(array)?;
                    Ok(typed.into_iter().map(|v| v as f64).collect())
                })
            }
        }
    };
}

impl_transfer!(HostDevice);

#[cfg(feature = "opencl")]
impl_transfer!(axred_kernels::OpenClDevice);
