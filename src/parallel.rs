//! Worker pool configuration for the extract stage
//!
//! Each run builds its own Rayon pool instead of touching the global one, so
//! the library can be driven repeatedly from one process (tests included).

use crate::errors::{EnsStatError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

/// Configuration for parallel processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    pub fn new(num_threads: Option<usize>) -> Self {
        Self { num_threads }
    }

    /// Threads the pool will have once built
    pub fn effective_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Build a dedicated pool with the configured number of threads
    pub fn build_pool(&self) -> Result<ThreadPool> {
        let threads = self.effective_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ens-stat-{i}"))
            .build()
            .map_err(|e| {
                EnsStatError::ThreadPoolError(format!(
                    "Failed to initialize thread pool with {} threads: {}",
                    threads, e
                ))
            })?;

        info!(
            threads,
            available_cores = num_cpus::get(),
            "Configured worker pool"
        );
        Ok(pool)
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self::new(None)
    }
}
