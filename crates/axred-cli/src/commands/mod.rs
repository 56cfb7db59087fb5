//! Subcommands and the reduction description they share.

use anyhow::{Context, Result, bail};
use axred_common::{DType, DeviceLimits, ReduxSettings};
use axred_kernels::ReductionKernel;
use clap::{Args, ValueEnum};

mod info;
mod run;
mod source;

pub use info::InfoCommand;
pub use run::RunCommand;
pub use source::SourceCommand;

/// Output format of data-producing commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parse one mask entry: `1`/`true`/`y` reduce the axis, `0`/`false`/`n`
/// keep it.
pub fn parse_axis_flag(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "y" | "yes" => Ok(true),
        "0" | "false" | "f" | "n" | "no" => Ok(false),
        other => bail!("`{other}` is not an axis flag (use 1 to reduce, 0 to keep)"),
    }
}

/// Description of a reduction on the command line.
#[derive(Debug, Clone, Args)]
pub struct ReductionArgs {
    /// Per-axis mask, comma separated: 1 reduces the axis, 0 keeps it
    #[arg(long, value_name = "MASK", value_delimiter = ',', required = true, value_parser = parse_axis_flag)]
    pub redux: Vec<bool>,

    /// Output element type (float32, int32, "unsigned int", ...)
    #[arg(long, value_name = "TYPE", default_value = "float32")]
    pub dtype: DType,

    /// Identity element of the reduction
    #[arg(long, value_name = "EXPR", default_value = "0", allow_hyphen_values = true)]
    pub neutral: String,

    /// Body of REDUCE(a, b)
    #[arg(long, value_name = "EXPR", default_value = "a + b")]
    pub reduce: String,

    /// Per-element expression using name[i] accessors
    #[arg(long = "map", value_name = "EXPR")]
    pub map_expr: Option<String>,

    /// Argument declarations, e.g. "const float *x, float alpha"
    #[arg(long = "args", value_name = "DECLS")]
    pub arguments: Option<String>,

    /// Source placed before the kernel
    #[arg(long, value_name = "TEXT")]
    pub preamble: Option<String>,
}

impl ReductionArgs {
    /// Build the reduction against the configured limits.
    pub fn build(&self, settings: &ReduxSettings) -> Result<ReductionKernel> {
        self.build_for(settings, settings.limits())
    }

    /// Build the reduction against `limits`, typically those reported by
    /// the device it will run on.
    pub fn build_for(&self, settings: &ReduxSettings, limits: DeviceLimits) -> Result<ReductionKernel> {
        let mut builder = ReductionKernel::builder(
            self.dtype,
            self.neutral.clone(),
            self.reduce.clone(),
            self.redux.clone(),
        )
        .max_local_size(settings.max_local_size);
        if let Some(map) = &self.map_expr {
            builder = builder.map_expr(map.clone());
        }
        if let Some(decls) = &self.arguments {
            builder = builder.arguments_str(decls.clone());
        }
        if let Some(preamble) = &self.preamble {
            builder = builder.preamble(preamble.clone());
        }
        builder.build(limits).context("invalid reduction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_flags() {
        assert!(parse_axis_flag("1").unwrap());
        assert!(parse_axis_flag(" TRUE ").unwrap());
        assert!(!parse_axis_flag("0").unwrap());
        assert!(parse_axis_flag("2").is_err());
    }
}
