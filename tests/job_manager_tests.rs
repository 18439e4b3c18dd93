//! Job lifecycle tests: acceptance, idempotency, background execution,
//! failure capture, and per-user ordering.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use cortex_memory::adapters::embedder::HashingEmbedder;
use cortex_memory::adapters::{Adapters, Analysis, AnalyzeHints, Analyzer, EvidenceSnippet, HeuristicAnalyzer, Synthesis};
use cortex_memory::config::ServerConfig;
use cortex_memory::jobs::{IngestRequest, JobManager};
use cortex_memory::memory::{
    IngestInput, IngestJob, InputChannel, JobStatus, MemoryManager, MemoryStore, Scope,
};

const DIM: usize = 32;

// ═══════════════════════════════════════════════════════════════════════
// Test infrastructure
// ═══════════════════════════════════════════════════════════════════════

/// Analyzer that is permanently down.
struct DownAnalyzer;

#[async_trait]
impl Analyzer for DownAnalyzer {
    async fn analyze(&self, _text: &str, _hints: &AnalyzeHints) -> Result<Analysis> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn summarize(
        &self,
        _query: &str,
        _app_context: Option<&serde_json::Value>,
        _evidence: &[EvidenceSnippet],
    ) -> Result<Synthesis> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

/// Embedder that maps everything to one vector (forces supersession between
/// same-type chunks).
struct ConstEmbedder;

#[async_trait]
impl cortex_memory::adapters::Embedder for ConstEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut v = vec![0.0f32; DIM];
        v[0] = 1.0;
        Ok(texts.iter().map(|_| v.clone()).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn mode(&self) -> &'static str {
        "hashing"
    }
}

struct Fixture {
    jobs: Arc<JobManager>,
    store: Arc<MemoryStore>,
    _dir: TempDir,
}

fn fixture(
    analyzer: Arc<dyn Analyzer>,
    embedder: Arc<dyn cortex_memory::adapters::Embedder>,
) -> Fixture {
    fixture_with_workers(analyzer, embedder, 2)
}

fn fixture_with_workers(
    analyzer: Arc<dyn Analyzer>,
    embedder: Arc<dyn cortex_memory::adapters::Embedder>,
    worker_pool_size: usize,
) -> Fixture {
    let dir = TempDir::new().expect("create temp dir");
    let config = ServerConfig {
        storage_path: dir.path().to_path_buf(),
        embedding_dim: DIM,
        worker_pool_size,
        ..ServerConfig::default()
    };
    let store = Arc::new(MemoryStore::open(dir.path()).expect("open store"));
    let adapters = Adapters::new(analyzer, embedder);
    let manager = Arc::new(MemoryManager::new(store.clone(), adapters, &config));
    let jobs = JobManager::spawn(store.clone(), manager, &config);
    Fixture {
        jobs,
        store,
        _dir: dir,
    }
}

fn request(user: &str, text: &str, key: Option<&str>) -> IngestRequest {
    IngestRequest {
        input: IngestInput {
            user_id: user.to_string(),
            text: text.to_string(),
            source: Some("chat".to_string()),
            scope: Scope::Global,
            agent_id: None,
            event_time: None,
            input_channel: InputChannel::Chat,
        },
        idempotency_key: key.map(String::from),
        metadata: None,
    }
}

/// Poll until the job reaches a terminal state.
async fn wait_terminal(jobs: &JobManager, job_id: uuid::Uuid) -> IngestJob {
    for _ in 0..300 {
        let job = jobs.status(job_id).await.unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

// ═══════════════════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn job_runs_to_done_with_result() {
    let fx = fixture(Arc::new(HeuristicAnalyzer), Arc::new(HashingEmbedder::new(DIM)));

    let job = fx
        .jobs
        .accept(request("u1", "I live in Tokyo", None))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Accepted);

    let done = wait_terminal(&fx.jobs, job.job_id).await;
    assert_eq!(done.status, JobStatus::Done);
    let result = done.result.expect("done jobs carry a result");
    assert_eq!(result.created_count, 1);
    assert_eq!(result.memory_ids.len(), 1);

    // The write is visible through the store
    assert_eq!(fx.store.user_memories("u1").unwrap().len(), 1);
}

#[tokio::test]
async fn analyzer_outage_fails_the_job() {
    let fx = fixture(Arc::new(DownAnalyzer), Arc::new(HashingEmbedder::new(DIM)));

    let job = fx
        .jobs
        .accept(request("u1", "anything", None))
        .await
        .unwrap();
    let failed = wait_terminal(&fx.jobs, job.job_id).await;

    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.expect("failed jobs carry an error");
    assert!(error.contains("unavailable"), "got: {error}");
    assert!(fx.store.user_memories("u1").unwrap().is_empty());
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let fx = fixture(Arc::new(HeuristicAnalyzer), Arc::new(HashingEmbedder::new(DIM)));
    let err = fx.jobs.status(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn invalid_scope_is_rejected_at_accept() {
    let fx = fixture(Arc::new(HeuristicAnalyzer), Arc::new(HashingEmbedder::new(DIM)));

    let mut req = request("u1", "anything", None);
    req.input.scope = Scope::Agent; // agent scope without agent_id
    let err = fx.jobs.accept(req).await.unwrap_err();
    assert_eq!(err.code(), "invalid_argument");
}

// ═══════════════════════════════════════════════════════════════════════
// Idempotency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn same_idempotency_key_returns_same_job() {
    let fx = fixture(Arc::new(HeuristicAnalyzer), Arc::new(HashingEmbedder::new(DIM)));

    let first = fx
        .jobs
        .accept(request("u1", "I live in Tokyo", Some("abc")))
        .await
        .unwrap();
    let second = fx
        .jobs
        .accept(request("u1", "I live in Tokyo", Some("abc")))
        .await
        .unwrap();
    assert_eq!(first.job_id, second.job_id);

    // Replays after completion return the terminal job, and the end state
    // matches ingesting once
    let done = wait_terminal(&fx.jobs, first.job_id).await;
    let replay = fx
        .jobs
        .accept(request("u1", "I live in Tokyo", Some("abc")))
        .await
        .unwrap();
    assert_eq!(replay.job_id, first.job_id);
    assert_eq!(replay.status, done.status);
    assert_eq!(fx.store.user_memories("u1").unwrap().len(), 1);
}

#[tokio::test]
async fn different_keys_and_users_get_distinct_jobs() {
    let fx = fixture(Arc::new(HeuristicAnalyzer), Arc::new(HashingEmbedder::new(DIM)));

    let a = fx
        .jobs
        .accept(request("u1", "I live in Tokyo", Some("key-a")))
        .await
        .unwrap();
    let b = fx
        .jobs
        .accept(request("u1", "I live in Tokyo", Some("key-b")))
        .await
        .unwrap();
    assert_ne!(a.job_id, b.job_id);

    // Same key under another user is a different job
    let c = fx
        .jobs
        .accept(request("u2", "I live in Tokyo", Some("key-a")))
        .await
        .unwrap();
    assert_ne!(a.job_id, c.job_id);
}

#[tokio::test]
async fn no_key_always_creates_new_jobs() {
    let fx = fixture(Arc::new(HeuristicAnalyzer), Arc::new(HashingEmbedder::new(DIM)));

    let a = fx
        .jobs
        .accept(request("u1", "I live in Tokyo", None))
        .await
        .unwrap();
    let b = fx
        .jobs
        .accept(request("u1", "I live in Tokyo", None))
        .await
        .unwrap();
    assert_ne!(a.job_id, b.job_id);
}

// ═══════════════════════════════════════════════════════════════════════
// Per-user ordering
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn later_job_observes_earlier_jobs_writes() {
    // ConstEmbedder makes the second fact a restatement of the first, so the
    // second job can only report "updated" if it ran after the first one's
    // write became visible. A single worker makes the queue order exact.
    let fx = fixture_with_workers(Arc::new(HeuristicAnalyzer), Arc::new(ConstEmbedder), 1);

    let first = fx
        .jobs
        .accept(request("u1", "I live in Tokyo", None))
        .await
        .unwrap();
    let second = fx
        .jobs
        .accept(request("u1", "I moved to Osaka", None))
        .await
        .unwrap();

    let first_done = wait_terminal(&fx.jobs, first.job_id).await;
    let second_done = wait_terminal(&fx.jobs, second.job_id).await;

    assert_eq!(first_done.result.unwrap().created_count, 1);
    let second_result = second_done.result.unwrap();
    assert_eq!(second_result.created_count, 0);
    assert_eq!(second_result.updated_count, 1);

    // One lineage with one current row
    let current: Vec<_> = fx
        .store
        .user_memories("u1")
        .unwrap()
        .into_iter()
        .filter(|m| m.is_current())
        .collect();
    assert_eq!(current.len(), 1);
    assert!(current[0].content.contains("Osaka"));
}
