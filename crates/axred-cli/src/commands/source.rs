//! `axred source`: print a synthesized kernel.

use anyhow::{Context, Result};
use axred_common::ReduxSettings;
use axred_kernels::Dialect;
use axred_kernels::cluda;
use clap::Parser;
use tracing::info;

use super::ReductionArgs;

/// Print the kernel generated for a reduction
#[derive(Debug, Parser)]
pub struct SourceCommand {
    #[command(flatten)]
    pub reduction: ReductionArgs,

    /// Local size (power of two); defaults to the largest power of two not
    /// above the configured estimate
    #[arg(long, value_name = "N")]
    pub local_size: Option<usize>,

    /// Prepend the portability header for this dialect (opencl, cuda)
    #[arg(long, value_name = "DIALECT")]
    pub header: Option<Dialect>,
}

/// Largest power of two `<= n`, at least 1.
fn floor_power_of_two(n: usize) -> usize {
    if n <= 1 { 1 } else { 1 << (usize::BITS - 1 - n.leading_zeros()) }
}

impl SourceCommand {
    pub fn execute(self, settings: &ReduxSettings) -> Result<()> {
        let kernel = self.reduction.build(settings)?;
        let local_size =
            self.local_size.unwrap_or_else(|| floor_power_of_two(kernel.init_local_size()));
        info!(local_size, nd = kernel.partition().nd(), "rendering kernel source");
        let source = kernel.source(local_size).context("failed to render kernel source")?;

        if let Some(dialect) = self.header {
            print!("{}", cluda::header(dialect, kernel.flags()));
            println!();
        }
        print!("{}", source.text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_power_of_two_values() {
        assert_eq!(floor_power_of_two(0), 1);
        assert_eq!(floor_power_of_two(1), 1);
        assert_eq!(floor_power_of_two(255), 128);
        assert_eq!(floor_power_of_two(256), 256);
    }
}
