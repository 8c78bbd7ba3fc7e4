//! Bounded, staggered admission of per-instance workers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::errors::AutomationError;
use crate::settings::{secs, PoolSettings};

/// Runs one job per instance with at most `max_workers` jobs in flight.
/// Consecutive admissions are spaced at least `stagger` apart so instances
/// do not all boot at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_workers: usize,
    stagger: Duration,
}

impl WorkerPool {
    pub fn new(max_workers: usize, stagger: Duration) -> Self {
        Self {
            max_workers: max_workers.max(1),
            stagger,
        }
    }

    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self::new(settings.max_workers, secs(settings.stagger_secs))
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs `job` for every id and returns results in completion order.
    pub async fn run_all<F, Fut, T>(
        &self,
        instance_ids: Vec<u32>,
        job: F,
    ) -> Vec<(u32, Result<T, AutomationError>)>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, AutomationError>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut workers = JoinSet::new();
        let mut last_admission: Option<Instant> = None;
        let mut results = Vec::with_capacity(instance_ids.len());

        for instance_id in instance_ids {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    results.push((
                        instance_id,
                        Err(AutomationError::Internal(format!("worker pool closed: {e}"))),
                    ));
                    continue;
                }
            };
            if let Some(previous) = last_admission {
                tokio::time::sleep_until(previous + self.stagger).await;
            }
            last_admission = Some(Instant::now());

            info!("Admitting worker for instance {instance_id}");
            let work = job(instance_id);
            workers.spawn(async move {
                let _permit = permit;
                (instance_id, work.await)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((instance_id, result)) => {
                    debug!("Worker for instance {instance_id} finished");
                    results.push((instance_id, result));
                }
                Err(e) => error!("Worker task failed: {e}"),
            }
        }
        results
    }
}
