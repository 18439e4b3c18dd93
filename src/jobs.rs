//! Asynchronous ingest job lifecycle.
//!
//! Accept assigns a job id and persists the row; a fixed worker pool drains
//! a bounded queue and runs the Memory Manager. Jobs for one user are
//! serialized (per-user concurrency defaults to 1) so a later job observes
//! the full effect of an earlier one; cross-user execution is limited only
//! by the pool size. Idempotency keys return the existing job inside the
//! retention window. No cancellation: a running job finishes or fails.
//!
//!     (none) --accept--> accepted --start--> running --ok--> done
//!                                              \--err--> failed

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::constants::{JOB_GC_INTERVAL_SECS, JOB_RETENTION_SECS, JOB_WALL_CLOCK_SECS};
use crate::errors::{AppError, Result, ValidationErrorExt};
use crate::memory::{IngestInput, IngestJob, JobStatus, MemoryManager, MemoryStore};
use crate::metrics;
use crate::validation;

/// Everything a client hands to POST /v1/ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub input: IngestInput,
    pub idempotency_key: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

pub struct JobManager {
    store: Arc<MemoryStore>,
    tx: mpsc::Sender<Uuid>,
    user_gates: parking_lot::Mutex<HashMap<String, Arc<Semaphore>>>,
    per_user_concurrency: usize,
    accept_timeout: Duration,
}

impl JobManager {
    /// Build the manager and start its worker pool and GC sweeper.
    pub fn spawn(
        store: Arc<MemoryStore>,
        manager: Arc<MemoryManager>,
        config: &ServerConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Uuid>(config.job_queue_capacity);
        let job_manager = Arc::new(Self {
            store: store.clone(),
            tx,
            user_gates: parking_lot::Mutex::new(HashMap::new()),
            per_user_concurrency: config.per_user_concurrency,
            accept_timeout: config.request_timeout,
        });

        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..config.worker_pool_size {
            let rx = rx.clone();
            let job_manager = job_manager.clone();
            let manager = manager.clone();
            tokio::spawn(async move {
                job_manager.worker_loop(worker_id, rx, manager).await;
            });
        }

        {
            let job_manager = job_manager.clone();
            tokio::spawn(async move {
                job_manager.gc_loop().await;
            });
        }

        job_manager
    }

    // ========================================================================
    // Accept
    // ========================================================================

    /// Accept an ingest request: idempotency lookup, job row, enqueue.
    /// Returns immediately with the (possibly pre-existing) job.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.input.user_id))]
    pub async fn accept(&self, request: IngestRequest) -> Result<IngestJob> {
        validation::validate_user_id(&request.input.user_id).map_validation_err("user_id")?;
        validation::validate_scope(request.input.scope, request.input.agent_id.as_deref())
            .map_validation_err("scope")?;
        if let Some(key) = &request.idempotency_key {
            validation::validate_idempotency_key(key).map_validation_err("Idempotency-Key")?;
        }

        let store = self.store.clone();
        let user_id = request.input.user_id.clone();
        let idempotency_key = request.idempotency_key.clone();

        // Idempotency check and job-row write share one critical section so
        // two concurrent sends with the same key cannot both create jobs.
        let accepted: std::result::Result<IngestJob, IngestJob> = {
            let request = request.clone();
            tokio::task::spawn_blocking(move || -> Result<_> {
                let _guard = store.write_guard();

                if let Some(key) = &idempotency_key {
                    if let Some(existing_id) = store
                        .idem_lookup(&user_id, key)
                        .map_err(AppError::Internal)?
                    {
                        if let Some(existing) =
                            store.get_job(&existing_id).map_err(AppError::Internal)?
                        {
                            return Ok(Err(existing));
                        }
                    }
                }

                let job = IngestJob {
                    job_id: Uuid::new_v4(),
                    idempotency_key: idempotency_key.clone(),
                    user_id: user_id.clone(),
                    scope: request.input.scope,
                    agent_id: request.input.agent_id.clone(),
                    text: request.input.text.clone(),
                    source: request.input.source.clone(),
                    event_time: request.input.event_time,
                    metadata: request.metadata.clone(),
                    received_at: Utc::now(),
                    status: JobStatus::Accepted,
                    result: None,
                    error: None,
                };
                store.put_job(&job).map_err(AppError::Internal)?;
                if let Some(key) = &idempotency_key {
                    store
                        .idem_put(&user_id, key, &job.job_id)
                        .map_err(AppError::Internal)?;
                }
                Ok(Ok(job))
            })
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("accept task panicked: {e}")))??
        };

        let job = match accepted {
            Err(existing) => {
                metrics::INGEST_JOBS_TOTAL
                    .with_label_values(&["deduplicated"])
                    .inc();
                return Ok(existing);
            }
            Ok(job) => job,
        };

        // A full queue blocks up to the request deadline, then rejects
        match tokio::time::timeout(self.accept_timeout, self.tx.send(job.job_id)).await {
            Ok(Ok(())) => {
                metrics::INGEST_JOBS_TOTAL
                    .with_label_values(&["accepted"])
                    .inc();
                metrics::JOB_QUEUE_DEPTH.inc();
                Ok(job)
            }
            _ => {
                let store = self.store.clone();
                let job_clone = job.clone();
                let _ = tokio::task::spawn_blocking(move || store.delete_job(&job_clone)).await;
                Err(AppError::ResourceExhausted(
                    "Ingest queue is full; retry later".to_string(),
                ))
            }
        }
    }

    /// Poll a job.
    pub async fn status(&self, job_id: Uuid) -> Result<IngestJob> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.get_job(&job_id))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("status task panicked: {e}")))?
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::NotFound(format!("ingest job {job_id}")))
    }

    // ========================================================================
    // Workers
    // ========================================================================

    fn user_gate(&self, user_id: &str) -> Arc<Semaphore> {
        self.user_gates
            .lock()
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_user_concurrency)))
            .clone()
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        rx: Arc<Mutex<mpsc::Receiver<Uuid>>>,
        manager: Arc<MemoryManager>,
    ) {
        loop {
            let job_id = {
                let mut rx = rx.lock().await;
                match rx.recv().await {
                    Some(id) => id,
                    None => return,
                }
            };
            metrics::JOB_QUEUE_DEPTH.dec();

            let mut job = {
                let store = self.store.clone();
                match tokio::task::spawn_blocking(move || store.get_job(&job_id)).await {
                    Ok(Ok(Some(job))) => job,
                    other => {
                        tracing::warn!(worker_id, %job_id, ?other, "dequeued job row missing");
                        continue;
                    }
                }
            };

            // Per-user serialization: semaphore acquires are FIFO, so jobs
            // for one user run in the order they were queued.
            let gate = self.user_gate(&job.user_id);
            let _permit = match gate.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => continue,
            };

            job.status = JobStatus::Running;
            if let Err(e) = self.persist(&job).await {
                tracing::error!(%job_id, error = %e, "failed to mark job running");
                continue;
            }
            metrics::ACTIVE_JOBS.inc();

            let input = IngestInput {
                user_id: job.user_id.clone(),
                text: job.text.clone(),
                source: job.source.clone(),
                scope: job.scope,
                agent_id: job.agent_id.clone(),
                event_time: job.event_time,
                input_channel: crate::memory::InputChannel::for_source(job.source.as_deref()),
            };

            let started = std::time::Instant::now();
            let outcome = tokio::time::timeout(
                Duration::from_secs(JOB_WALL_CLOCK_SECS),
                manager.ingest(&input),
            )
            .await;

            match outcome {
                Ok(Ok(result)) => {
                    tracing::info!(
                        %job_id,
                        created = result.created_count,
                        updated = result.updated_count,
                        skipped = result.skipped_count,
                        "ingest job done"
                    );
                    job.status = JobStatus::Done;
                    job.result = Some(result);
                }
                Ok(Err(err)) => {
                    tracing::warn!(%job_id, error = %err, "ingest job failed");
                    job.status = JobStatus::Failed;
                    job.error = Some(err.to_string());
                }
                Err(_elapsed) => {
                    tracing::warn!(%job_id, "ingest job exceeded wall-clock cap");
                    job.status = JobStatus::Failed;
                    job.error = Some(format!(
                        "job exceeded wall-clock cap of {JOB_WALL_CLOCK_SECS}s"
                    ));
                }
            }

            metrics::ACTIVE_JOBS.dec();
            metrics::INGEST_JOB_DURATION.observe(started.elapsed().as_secs_f64());
            metrics::INGEST_JOBS_TOTAL
                .with_label_values(&[job.status.as_str()])
                .inc();

            if let Err(e) = self.persist(&job).await {
                tracing::error!(%job_id, error = %e, "failed to persist terminal job state");
            }
        }
    }

    async fn persist(&self, job: &IngestJob) -> anyhow::Result<()> {
        let store = self.store.clone();
        let job = job.clone();
        tokio::task::spawn_blocking(move || store.put_job(&job))
            .await
            .map_err(|e| anyhow::anyhow!("persist task panicked: {e}"))?
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Terminal rows are retained for the idempotency window, then removed
    /// together with their idempotency keys.
    async fn gc_loop(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(JOB_GC_INTERVAL_SECS));
        interval.tick().await; // skip the immediate first tick
        loop {
            interval.tick().await;
            let store = self.store.clone();
            let swept = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
                let cutoff = Utc::now() - ChronoDuration::seconds(JOB_RETENTION_SECS as i64);
                let jobs = store.terminal_jobs_before(cutoff)?;
                let count = jobs.len();
                for job in jobs {
                    store.delete_job(&job)?;
                }
                Ok(count)
            })
            .await;

            match swept {
                Ok(Ok(count)) if count > 0 => {
                    tracing::debug!(count, "garbage-collected terminal ingest jobs");
                }
                Ok(Err(e)) => tracing::warn!(error = %e, "job GC sweep failed"),
                _ => {}
            }
        }
    }
}
