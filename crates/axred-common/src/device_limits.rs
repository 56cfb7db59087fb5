//! Device limits consulted when sizing and launching a reduction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Immutable snapshot of the limits a reduction is planned against.
///
/// A reduction copies this value at construction; later changes on the
/// device side are not observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Local (work-group shared) memory available to one unit.
    pub local_memory_bytes: usize,
    /// Maximum number of workers in one unit.
    pub max_local_workers: usize,
    /// Maximum number of units in one launch.
    pub max_grid_size: usize,
}

impl DeviceLimits {
    pub const fn new(
        local_memory_bytes: usize,
        max_local_workers: usize,
        max_grid_size: usize,
    ) -> Self {
        Self { local_memory_bytes, max_local_workers, max_grid_size }
    }

    /// Limits of a typical discrete GPU, used by tests and the host device.
    pub const fn mock() -> Self {
        Self {
            local_memory_bytes: 32 * 1024, // 32 KB
            max_local_workers: 256,
            max_grid_size: 65_535,
        }
    }

    /// Largest local size whose `elem_size`-byte scratch buffer fits in
    /// local memory and which the device accepts per unit.
    pub fn initial_local_size(&self, elem_size: usize) -> usize {
        let by_memory = self.local_memory_bytes / elem_size.max(1);
        by_memory.min(self.max_local_workers)
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self::mock()
    }
}

/// Format a byte count into a human-readable string.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: usize) -> String {
    const MB: usize = 1024 * 1024;
    const KB: usize = 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

impl fmt::Display for DeviceLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Local memory:    {}", format_bytes(self.local_memory_bytes))?;
        writeln!(f, "Max local size:  {}", self.max_local_workers)?;
        write!(f, "Max grid size:   {}", self.max_grid_size)
    }
}
