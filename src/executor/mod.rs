//! Parallel task execution
//!
//! Fans a batch of async jobs out onto the tokio runtime, bounded by a
//! semaphore, and collects one result per job in submission order.

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use indicatif::ProgressBar;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Bounded parallel executor
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    max_concurrent: usize,
    progress: Option<ProgressBar>,
}

impl ParallelExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            progress: None,
        }
    }

    /// Tick `progress` once per finished job.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    #[cfg(test)]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every job, at most `max_concurrent` at a time.
    ///
    /// The returned vector lines up with `jobs`. A job that panics shows up
    /// as an `Err` in its slot.
    pub async fn run_all<F, T>(&self, jobs: Vec<F>) -> Vec<Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        debug!(
            "Dispatching {} job(s) (max {} concurrent)",
            jobs.len(),
            self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let semaphore = semaphore.clone();
                let progress = self.progress.clone();

                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .context("Executor semaphore closed")?;
                    let result = job.await;
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                    result
                })
            })
            .collect();

        let results = join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow!("Job did not complete: {}", e)),
            })
            .collect();

        if let Some(ref pb) = self.progress {
            pb.finish_and_clear();
        }

        results
    }
}
