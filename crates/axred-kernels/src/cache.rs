//! Memoization of compiled reduction kernels.

use std::collections::HashMap;

use axred_common::Result;
use tracing::debug;

/// Key of a compiled variant: array rank and local size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub nd: usize,
    pub local_size: usize,
}

/// Compiled kernels of one [`ReductionKernel`](crate::ReductionKernel),
/// keyed by rank and local size.
///
/// A cache must only be used with the reduction that filled it; kernels
/// of other reductions share the same keys.
#[derive(Debug)]
pub struct KernelCache<K> {
    entries: HashMap<CacheKey, K>,
    hits: u64,
    misses: u64,
}

impl<K> Default for KernelCache<K> {
    fn default() -> Self {
        Self { entries: HashMap::new(), hits: 0, misses: 0 }
    }
}

impl<K: Clone> KernelCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached kernel for `key`, building and storing it on a miss.
    /// Failed builds are not cached.
    pub fn get_or_build<F>(&mut self, key: CacheKey, build: F) -> Result<K>
    where
        F: FnOnce() -> Result<K>,
    {
        if let Some(kernel) = self.entries.get(&key) {
            self.hits += 1;
            debug!(nd = key.nd, local_size = key.local_size, "kernel cache hit");
            return Ok(kernel.clone());
        }
        self.misses += 1;
        debug!(nd = key.nd, local_size = key.local_size, "kernel cache miss");
        let kernel = build()?;
        self.entries.insert(key, kernel.clone());
        Ok(kernel)
    }

    pub fn contains(&self, key: CacheKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
