//! Pool local de ejecución de jobs.
//!
//! Igual que un worker con `max_concurrency` slots: cada job toma un permiso
//! del semáforo antes de correr y lo libera al terminar. Un job cancelado
//! mientras espera slot no llega a ejecutarse.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use async_trait::async_trait;
use grid_common::{Job, JobContext, JobDispatcher, JobOutcome, JobResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::runner::run_job;

#[derive(Debug, Default)]
struct PoolStats {
    jobs_started: u64,
    jobs_succeeded: u64,
    jobs_failed: u64,
    jobs_cancelled: u64,
    total_job_time_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PoolMetrics {
    pub max_concurrency: u32,
    pub active_jobs: u32,
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub avg_job_ms: Option<f64>,
}

pub struct WorkerPool {
    max_concurrency: usize,
    slots: Arc<Semaphore>,
    stats: Mutex<PoolStats>,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        info!("pool de jobs local con concurrency={}", max_concurrency);

        Self {
            max_concurrency,
            slots: Arc::new(Semaphore::new(max_concurrency)),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    fn lock_stats(&self) -> MutexGuard<'_, PoolStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metrics(&self) -> PoolMetrics {
        let stats = self.lock_stats();
        let active = self.max_concurrency - self.slots.available_permits();

        let avg_ms = if stats.jobs_succeeded > 0 {
            Some(stats.total_job_time_ms as f64 / stats.jobs_succeeded as f64)
        } else {
            None
        };

        PoolMetrics {
            max_concurrency: self.max_concurrency as u32,
            active_jobs: active as u32,
            jobs_started: stats.jobs_started,
            jobs_succeeded: stats.jobs_succeeded,
            jobs_failed: stats.jobs_failed,
            jobs_cancelled: stats.jobs_cancelled,
            avg_job_ms: avg_ms,
        }
    }
}

#[async_trait]
impl JobDispatcher for WorkerPool {
    async fn dispatch(&self, job: Job, ctx: JobContext) -> JobResult {
        let cancel = ctx.cancellation_token().clone();

        // Esperar un slot libre (o la cancelación, lo que llegue primero)
        let permit = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,
            acquired = self.slots.clone().acquire_owned() => acquired.ok(),
        };

        // la cancelación puede llegar justo cuando se libera el slot
        let Some(permit) = permit.filter(|_| !cancel.is_cancelled()) else {
            debug!(task_id = %ctx.task_id(), job_id = %job.id, "job cancelado esperando slot");
            self.lock_stats().jobs_cancelled += 1;
            return JobResult::cancelled(ctx.task_id(), job.id);
        };

        self.lock_stats().jobs_started += 1;
        let started = Instant::now();

        let result = run_job(job, ctx).await;

        // Liberar el slot al terminar
        drop(permit);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut stats = self.lock_stats();
        match result.outcome {
            JobOutcome::Success { .. } => {
                stats.jobs_succeeded += 1;
                stats.total_job_time_ms += elapsed_ms;
            }
            JobOutcome::Failure { .. } => stats.jobs_failed += 1,
            JobOutcome::Cancelled => stats.jobs_cancelled += 1,
        }
        drop(stats);

        result
    }
}
