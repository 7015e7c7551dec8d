use crate::error::{Result, VesperError};

/// Bounded worker pool; `workers == 0` means one thread per CPU.
pub fn build_pool(workers: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("vesper-worker-{i}"))
        .build()
        .map_err(|e| VesperError::config(format!("worker pool: {e}")))
}
