// src/context.rs

use rayon::ThreadPool;
use std::time::Instant;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Result;

/// Per-run execution state, created once at startup and handed to every
/// component. Nothing in the crate reaches for global state instead.
pub struct ExecutionContext {
    config: PipelineConfig,
    pool: ThreadPool,
    started: Instant,
}

impl ExecutionContext {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("covid-lake-{}", i))
            .build()?;
        info!(
            threads = pool.current_num_threads(),
            output_root = %config.output_root.display(),
            "execution context ready"
        );
        Ok(Self {
            config,
            pool,
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `op` on the context's worker pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Release the context. Dropping it has the same effect; this just logs.
    pub fn close(self) {
        info!(elapsed = ?self.started.elapsed(), "execution context released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_honours_thread_count() {
        let cfg = PipelineConfig {
            threads: 2,
            ..PipelineConfig::default()
        };
        let ctx = ExecutionContext::new(cfg).unwrap();
        let n = ctx.install(rayon::current_num_threads);
        assert_eq!(n, 2);
        ctx.close();
    }
}
