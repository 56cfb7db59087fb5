//! `axred info`: effective backend and device limits.

use anyhow::Result;
use axred_common::{Backend, DType, DeviceLimits, ReduxSettings};
use clap::Parser;
use console::style;
use serde_json::json;

use super::OutputFormat;

/// Element types whose initial local size is reported.
const REPORTED_DTYPES: [DType; 4] = [DType::I32, DType::F32, DType::F64, DType::C128];

/// Show the effective device limits
#[derive(Debug, Parser)]
pub struct InfoCommand {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,
}

#[derive(Debug)]
struct DeviceReport {
    backend: Backend,
    device_name: String,
    limits: DeviceLimits,
    kernel_local_size_cap: Option<usize>,
    kernel_cache: bool,
    max_local_size: Option<usize>,
}

impl DeviceReport {
    fn gather(settings: &ReduxSettings) -> Result<Self> {
        let (device_name, limits) = match settings.backend {
            Backend::Host => ("host reference device".to_string(), settings.limits()),
            #[cfg(feature = "opencl")]
            Backend::OpenCl => {
                use axred_kernels::ComputeDevice;
                let device = axred_kernels::OpenClDevice::first_gpu()?;
                (device.device_name().to_string(), device.limits())
            }
            #[cfg(not(feature = "opencl"))]
            Backend::OpenCl => ("unavailable (built without `opencl`)".to_string(), settings.limits()),
        };
        Ok(Self {
            backend: settings.backend,
            device_name,
            limits,
            kernel_local_size_cap: settings.device.kernel_local_size_cap,
            kernel_cache: settings.kernel_cache,
            max_local_size: settings.max_local_size,
        })
    }

    fn initial_local_size(&self, dtype: DType) -> usize {
        let size = self.limits.initial_local_size(dtype.size_in_bytes());
        match self.max_local_size {
            Some(cap) => size.min(cap),
            None => size,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let initial: serde_json::Map<String, serde_json::Value> = REPORTED_DTYPES
            .iter()
            .map(|&dtype| (dtype.name().to_string(), json!(self.initial_local_size(dtype))))
            .collect();
        json!({
            "backend": self.backend.to_string(),
            "device": self.device_name,
            "limits": self.limits,
            "kernel_local_size_cap": self.kernel_local_size_cap,
            "kernel_cache": self.kernel_cache,
            "max_local_size": self.max_local_size,
            "initial_local_size": initial,
        })
    }

    fn print_text(&self) {
        println!("{}", style("Device").bold().cyan());
        println!("  backend:     {}", self.backend);
        println!("  device:      {}", self.device_name);
        println!("  limits:      {}", self.limits);
        if let Some(cap) = self.kernel_local_size_cap {
            println!("  kernel cap:  {cap}");
        }
        println!();
        println!("{}", style("Reductions").bold().cyan());
        println!("  kernel cache: {}", if self.kernel_cache { "on" } else { "off" });
        if let Some(cap) = self.max_local_size {
            println!("  local size cap: {cap}");
        }
        println!("  initial local size:");
        for dtype in REPORTED_DTYPES {
            println!("    {:<12} {}", dtype.name(), self.initial_local_size(dtype));
        }
    }
}

impl InfoCommand {
    pub fn execute(self, settings: &ReduxSettings) -> Result<()> {
        let report = DeviceReport::gather(settings)?;
        match self.output_format {
            OutputFormat::Text => report.print_text(),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.to_json())?),
        }
        Ok(())
    }
}
