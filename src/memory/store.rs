//! Storage backend for the memory system.
//!
//! Two RocksDB databases: the main database holds memory rows, audit rows,
//! and job rows as JSON values; the index database holds pointer keys for
//! dedup lookups, per-user scans, and idempotency keys.
//!
//! Key layout (main):
//!   mem:{memory_uuid}                      -> MemoryRecord
//!   audit:{memory_uuid}:{nanos:020}:{uuid} -> AuditRecord
//!   job:{job_uuid}                         -> IngestJob
//!
//! Key layout (index):
//!   hash:{user}:{scope}:{agent}:{content_hash} -> memory uuid (current rows only)
//!   user:{user}:{memory_uuid}                  -> 1
//!   idem:{user}:{idempotency_key}              -> job uuid
//!
//! The `hash:` keyspace enforces the dedup uniqueness constraint: at most one
//! current row per `(user, scope, agent, content_hash)`. Mutators must hold
//! the store write guard across their check-then-write sequence; a
//! supersede's two row changes go through a single WriteBatch so readers see
//! either both or neither.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rocksdb::{IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::types::*;

/// Persistent store for memories, audit logs, and ingest jobs.
pub struct MemoryStore {
    db: Arc<DB>,
    index_db: Arc<DB>,
    /// Serializes check-then-write mutation sequences (the embedded-store
    /// equivalent of `SELECT ... FOR UPDATE` on the predecessor row).
    write_lock: parking_lot::Mutex<()>,
    storage_path: PathBuf,
}

impl MemoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_max_write_buffer_number(4);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_background_jobs(4);
        opts.set_level_compaction_dynamic_level_bytes(true);

        use rocksdb::{BlockBasedOptions, Cache};
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&Cache::new_lru_cache(128 * 1024 * 1024));
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        let db = Arc::new(DB::open(&opts, path.join("memories"))?);
        let index_db = Arc::new(DB::open(&opts, path.join("memory_index"))?);

        Ok(Self {
            db,
            index_db,
            write_lock: parking_lot::Mutex::new(()),
            storage_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    /// Acquire the mutation guard. Hold it across any check-then-write
    /// sequence (dedup lookup + insert, supersede, retire).
    pub fn write_guard(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    // ========================================================================
    // Key builders
    // ========================================================================

    fn mem_key(id: &MemoryId) -> String {
        format!("mem:{}", id.0)
    }

    fn hash_key(user_id: &str, scope: Scope, agent_id: Option<&str>, hash: &str) -> String {
        format!(
            "hash:{}:{}:{}:{}",
            user_id,
            scope.as_str(),
            agent_id.unwrap_or(""),
            hash
        )
    }

    fn user_key(user_id: &str, id: &MemoryId) -> String {
        format!("user:{}:{}", user_id, id.0)
    }

    fn audit_key(record: &AuditRecord) -> String {
        let nanos = record.created_at.timestamp_nanos_opt().unwrap_or(0);
        format!("audit:{}:{:020}:{}", record.memory_id.0, nanos, record.id)
    }

    fn job_key(id: &Uuid) -> String {
        format!("job:{id}")
    }

    fn idem_key(user_id: &str, key: &str) -> String {
        format!("idem:{user_id}:{key}")
    }

    fn sync_opts() -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true); // fsync WAL before returning
        write_opts
    }

    // ========================================================================
    // Memory rows
    // ========================================================================

    /// Insert a brand-new memory row plus its create audit entry.
    ///
    /// Fails if another current row already occupies the same
    /// `(user, scope, agent, content_hash)` slot; callers hold the write
    /// guard so the check and the write are one critical section.
    pub fn insert(&self, record: &MemoryRecord, audit: &AuditRecord) -> Result<()> {
        if let Some(hash) = &record.content_hash {
            if let Some(existing) = self.find_current_by_hash(
                &record.user_id,
                record.scope,
                record.agent_id.as_deref(),
                hash,
            )? {
                return Err(anyhow!("duplicate content_hash, existing memory {existing}"));
            }
        }

        let mut batch = WriteBatch::default();
        batch.put(
            Self::mem_key(&record.id).as_bytes(),
            serde_json::to_vec(record)?,
        );
        batch.put(Self::audit_key(audit).as_bytes(), serde_json::to_vec(audit)?);
        self.db
            .write_opt(batch, &Self::sync_opts())
            .context("insert memory row")?;

        let mut index_batch = WriteBatch::default();
        index_batch.put(
            Self::user_key(&record.user_id, &record.id).as_bytes(),
            b"1",
        );
        if let Some(hash) = &record.content_hash {
            if record.is_current() {
                index_batch.put(
                    Self::hash_key(
                        &record.user_id,
                        record.scope,
                        record.agent_id.as_deref(),
                        hash,
                    )
                    .as_bytes(),
                    record.id.0.to_string().as_bytes(),
                );
            }
        }
        self.index_db
            .write_opt(index_batch, &Self::sync_opts())
            .context("insert memory indices")?;

        Ok(())
    }

    /// Retire `old` and insert `new` in one atomic write.
    ///
    /// Both rows land in a single WriteBatch on the main database, so a
    /// reader observes either the pre-supersession or the post-supersession
    /// lineage, never a half-applied one.
    pub fn supersede(
        &self,
        old: &MemoryRecord,
        new: &MemoryRecord,
        audits: &[AuditRecord],
    ) -> Result<()> {
        debug_assert!(old.valid_to.is_some(), "old row must be retired");
        debug_assert_eq!(new.supersedes_id, Some(old.id));
        debug_assert_eq!(Some(new.valid_from), old.valid_to);

        let mut batch = WriteBatch::default();
        batch.put(Self::mem_key(&old.id).as_bytes(), serde_json::to_vec(old)?);
        batch.put(Self::mem_key(&new.id).as_bytes(), serde_json::to_vec(new)?);
        for audit in audits {
            batch.put(Self::audit_key(audit).as_bytes(), serde_json::to_vec(audit)?);
        }
        self.db
            .write_opt(batch, &Self::sync_opts())
            .context("supersede rows")?;

        let mut index_batch = WriteBatch::default();
        if let Some(hash) = &old.content_hash {
            index_batch.delete(
                Self::hash_key(&old.user_id, old.scope, old.agent_id.as_deref(), hash)
                    .as_bytes(),
            );
        }
        index_batch.put(Self::user_key(&new.user_id, &new.id).as_bytes(), b"1");
        if let Some(hash) = &new.content_hash {
            index_batch.put(
                Self::hash_key(&new.user_id, new.scope, new.agent_id.as_deref(), hash)
                    .as_bytes(),
                new.id.0.to_string().as_bytes(),
            );
        }
        self.index_db
            .write_opt(index_batch, &Self::sync_opts())
            .context("supersede indices")?;

        Ok(())
    }

    /// Overwrite an existing row in place (PATCH, retire, touch).
    ///
    /// `previous_hash` must carry the row's hash as it was stored before the
    /// update so the dedup index follows content edits and retirements.
    pub fn update(
        &self,
        record: &MemoryRecord,
        previous_hash: Option<&str>,
        audit: Option<&AuditRecord>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put(
            Self::mem_key(&record.id).as_bytes(),
            serde_json::to_vec(record)?,
        );
        if let Some(audit) = audit {
            batch.put(Self::audit_key(audit).as_bytes(), serde_json::to_vec(audit)?);
        }
        self.db
            .write_opt(batch, &Self::sync_opts())
            .context("update memory row")?;

        let mut index_batch = WriteBatch::default();
        if let Some(prev) = previous_hash {
            index_batch.delete(
                Self::hash_key(&record.user_id, record.scope, record.agent_id.as_deref(), prev)
                    .as_bytes(),
            );
        }
        if record.is_current() {
            if let Some(hash) = &record.content_hash {
                index_batch.put(
                    Self::hash_key(
                        &record.user_id,
                        record.scope,
                        record.agent_id.as_deref(),
                        hash,
                    )
                    .as_bytes(),
                    record.id.0.to_string().as_bytes(),
                );
            }
        }
        self.index_db
            .write_opt(index_batch, &Self::sync_opts())
            .context("update memory indices")?;

        Ok(())
    }

    /// Retrieve a memory by ID.
    pub fn get(&self, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        match self.db.get(Self::mem_key(id).as_bytes())? {
            Some(value) => {
                let record = serde_json::from_slice(&value)
                    .with_context(|| format!("deserialize memory {}", id.0))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Hard-delete a memory row, its index entries, and its audit rows.
    pub fn delete_hard(&self, record: &MemoryRecord) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.delete(Self::mem_key(&record.id).as_bytes());
        // Audit rows cascade with the memory
        let audit_prefix = format!("audit:{}:", record.id.0);
        for key in self.scan_keys(&self.db, &audit_prefix)? {
            batch.delete(key.as_bytes());
        }
        self.db
            .write_opt(batch, &Self::sync_opts())
            .context("hard delete memory")?;

        let mut index_batch = WriteBatch::default();
        index_batch.delete(Self::user_key(&record.user_id, &record.id).as_bytes());
        if record.is_current() {
            if let Some(hash) = &record.content_hash {
                index_batch.delete(
                    Self::hash_key(&record.user_id, record.scope, record.agent_id.as_deref(), hash)
                        .as_bytes(),
                );
            }
        }
        self.index_db
            .write_opt(index_batch, &Self::sync_opts())
            .context("hard delete indices")?;

        Ok(())
    }

    /// Exact-duplicate lookup among current rows.
    pub fn find_current_by_hash(
        &self,
        user_id: &str,
        scope: Scope,
        agent_id: Option<&str>,
        hash: &str,
    ) -> Result<Option<MemoryId>> {
        let key = Self::hash_key(user_id, scope, agent_id, hash);
        match self.index_db.get(key.as_bytes())? {
            Some(value) => {
                let id_str = String::from_utf8_lossy(&value);
                let uuid = Uuid::parse_str(&id_str)
                    .map_err(|e| anyhow!("corrupt hash index value '{id_str}': {e}"))?;
                Ok(Some(MemoryId(uuid)))
            }
            None => Ok(None),
        }
    }

    /// All memory rows belonging to one user.
    pub fn user_memories(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
        let prefix = format!("user:{user_id}:");
        let mut memories = Vec::new();
        for key in self.scan_keys(&self.index_db, &prefix)? {
            let id_str = &key[prefix.len()..];
            if let Ok(uuid) = Uuid::parse_str(id_str) {
                if let Some(memory) = self.get(&MemoryId(uuid))? {
                    memories.push(memory);
                }
            }
        }
        Ok(memories)
    }

    /// All memory rows in the store, capped at `limit`.
    pub fn all_memories(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut memories = Vec::new();
        let iter = self.db.iterator(IteratorMode::From(
            b"mem:",
            rocksdb::Direction::Forward,
        ));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(b"mem:") {
                break;
            }
            let record: MemoryRecord = serde_json::from_slice(&value)
                .context("deserialize memory during full scan")?;
            memories.push(record);
            if memories.len() >= limit {
                break;
            }
        }
        Ok(memories)
    }

    /// Best-effort `last_accessed` refresh. Non-sync writes; retrieval must
    /// not fail when this does.
    pub fn touch_last_accessed(&self, ids: &[MemoryId], at: DateTime<Utc>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for id in ids {
            if let Some(mut record) = self.get(id)? {
                record.last_accessed = Some(at);
                batch.put(Self::mem_key(id).as_bytes(), serde_json::to_vec(&record)?);
            }
        }
        self.db.write(batch).context("touch last_accessed")?;
        Ok(())
    }

    // ========================================================================
    // Audit rows
    // ========================================================================

    /// Append an audit record outside a row mutation (e.g. soft delete is
    /// written together with its row; restores use this directly).
    pub fn append_audit(&self, audit: &AuditRecord) -> Result<()> {
        self.db
            .put_opt(
                Self::audit_key(audit).as_bytes(),
                serde_json::to_vec(audit)?,
                &Self::sync_opts(),
            )
            .context("append audit row")?;
        Ok(())
    }

    /// Audit trail for a memory in chronological order.
    pub fn audit_for(&self, memory_id: &MemoryId) -> Result<Vec<AuditRecord>> {
        let prefix = format!("audit:{}:", memory_id.0);
        let mut records = Vec::new();
        let iter = self.db.iterator(IteratorMode::From(
            prefix.as_bytes(),
            rocksdb::Direction::Forward,
        ));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            records.push(serde_json::from_slice(&value).context("deserialize audit row")?);
        }
        Ok(records)
    }

    // ========================================================================
    // Ingest jobs + idempotency keys
    // ========================================================================

    pub fn put_job(&self, job: &IngestJob) -> Result<()> {
        self.db
            .put_opt(
                Self::job_key(&job.job_id).as_bytes(),
                serde_json::to_vec(job)?,
                &Self::sync_opts(),
            )
            .context("put job row")?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &Uuid) -> Result<Option<IngestJob>> {
        match self.db.get(Self::job_key(job_id).as_bytes())? {
            Some(value) => Ok(Some(
                serde_json::from_slice(&value).context("deserialize job row")?,
            )),
            None => Ok(None),
        }
    }

    pub fn delete_job(&self, job: &IngestJob) -> Result<()> {
        self.db.delete(Self::job_key(&job.job_id).as_bytes())?;
        if let Some(key) = &job.idempotency_key {
            self.index_db
                .delete(Self::idem_key(&job.user_id, key).as_bytes())?;
        }
        Ok(())
    }

    pub fn idem_lookup(&self, user_id: &str, key: &str) -> Result<Option<Uuid>> {
        match self.index_db.get(Self::idem_key(user_id, key).as_bytes())? {
            Some(value) => {
                let id_str = String::from_utf8_lossy(&value);
                Ok(Uuid::parse_str(&id_str).ok())
            }
            None => Ok(None),
        }
    }

    pub fn idem_put(&self, user_id: &str, key: &str, job_id: &Uuid) -> Result<()> {
        self.index_db
            .put_opt(
                Self::idem_key(user_id, key).as_bytes(),
                job_id.to_string().as_bytes(),
                &Self::sync_opts(),
            )
            .context("put idempotency key")?;
        Ok(())
    }

    /// Terminal jobs older than `cutoff`, eligible for garbage collection.
    pub fn terminal_jobs_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<IngestJob>> {
        let mut jobs = Vec::new();
        let iter = self.db.iterator(IteratorMode::From(
            b"job:",
            rocksdb::Direction::Forward,
        ));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(b"job:") {
                break;
            }
            let job: IngestJob = serde_json::from_slice(&value).context("deserialize job row")?;
            if job.status.is_terminal() && job.received_at < cutoff {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Flush both databases (graceful shutdown).
    pub fn flush(&self) -> Result<()> {
        use rocksdb::FlushOptions;

        let mut flush_opts = FlushOptions::default();
        flush_opts.set_wait(true);

        self.db
            .flush_opt(&flush_opts)
            .map_err(|e| anyhow!("flush main database: {e}"))?;
        self.index_db
            .flush_opt(&flush_opts)
            .map_err(|e| anyhow!("flush index database: {e}"))?;
        Ok(())
    }

    /// Cheap read round-trip used by the health endpoint.
    pub fn ping(&self) -> Result<()> {
        self.db.get(b"mem:__ping__")?;
        Ok(())
    }

    fn scan_keys(&self, db: &DB, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let iter = db.iterator(IteratorMode::From(
            prefix.as_bytes(),
            rocksdb::Direction::Forward,
        ));
        for item in iter {
            let (key, _) = item?;
            let key_str = String::from_utf8_lossy(&key).into_owned();
            if !key_str.starts_with(prefix) {
                break;
            }
            keys.push(key_str);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (MemoryStore, TempDir) {
        let dir = TempDir::new().expect("create temp dir");
        let store = MemoryStore::open(dir.path()).expect("open store");
        (store, dir)
    }

    fn record(user: &str, content: &str, hash: &str) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: MemoryId::new(),
            user_id: user.into(),
            scope: Scope::Global,
            agent_id: None,
            content: content.into(),
            content_hash: Some(hash.into()),
            embedding: Some(vec![0.1, 0.2, 0.3]),
            memory_type: MemoryType::Fact,
            tags: vec!["test".into()],
            related_entities: Default::default(),
            importance: 3,
            confidence: 0.7,
            source: None,
            input_channel: InputChannel::Api,
            event_time: None,
            valid_from: now,
            valid_to: None,
            supersedes_id: None,
            last_accessed: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn create_audit(id: MemoryId) -> AuditRecord {
        AuditRecord::new(id, AuditAction::Create, ActorType::System, None)
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let (store, _dir) = open_store();
        let rec = record("u1", "User lives in Tokyo", "h1");
        store.insert(&rec, &create_audit(rec.id)).unwrap();

        let loaded = store.get(&rec.id).unwrap().expect("row exists");
        assert_eq!(loaded.content, "User lives in Tokyo");
        assert_eq!(loaded.content_hash.as_deref(), Some("h1"));
        assert!(loaded.is_current());

        let audits = store.audit_for(&rec.id).unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, AuditAction::Create);
    }

    #[test]
    fn test_hash_uniqueness_enforced() {
        let (store, _dir) = open_store();
        let a = record("u1", "User lives in Tokyo", "same");
        let b = record("u1", "User lives in Tokyo", "same");
        store.insert(&a, &create_audit(a.id)).unwrap();
        assert!(store.insert(&b, &create_audit(b.id)).is_err());

        // Different bucket, same hash is fine
        let mut c = record("u1", "User lives in Tokyo", "same");
        c.scope = Scope::Agent;
        c.agent_id = Some("finance".into());
        store.insert(&c, &create_audit(c.id)).unwrap();
    }

    #[test]
    fn test_supersede_moves_hash_slot() {
        let (store, _dir) = open_store();
        let mut old = record("u1", "User lives in Tokyo", "h_old");
        store.insert(&old, &create_audit(old.id)).unwrap();

        let now = Utc::now();
        old.valid_to = Some(now);
        old.updated_at = now;
        let mut new = record("u1", "User lives in Osaka", "h_new");
        new.valid_from = now;
        new.supersedes_id = Some(old.id);

        store
            .supersede(&old, &new, &[create_audit(new.id)])
            .unwrap();

        assert!(store
            .find_current_by_hash("u1", Scope::Global, None, "h_old")
            .unwrap()
            .is_none());
        assert_eq!(
            store
                .find_current_by_hash("u1", Scope::Global, None, "h_new")
                .unwrap(),
            Some(new.id)
        );

        let old_loaded = store.get(&old.id).unwrap().unwrap();
        assert!(!old_loaded.is_current());
        let new_loaded = store.get(&new.id).unwrap().unwrap();
        assert_eq!(new_loaded.supersedes_id, Some(old.id));
    }

    #[test]
    fn test_retire_frees_hash_slot() {
        let (store, _dir) = open_store();
        let mut rec = record("u1", "content", "h1");
        store.insert(&rec, &create_audit(rec.id)).unwrap();

        rec.valid_to = Some(Utc::now());
        store.update(&rec, Some("h1"), None).unwrap();

        assert!(store
            .find_current_by_hash("u1", Scope::Global, None, "h1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_hard_delete_cascades_audit() {
        let (store, _dir) = open_store();
        let rec = record("u1", "content", "h1");
        store.insert(&rec, &create_audit(rec.id)).unwrap();
        store
            .append_audit(&AuditRecord::new(
                rec.id,
                AuditAction::Update,
                ActorType::User,
                None,
            ))
            .unwrap();
        assert_eq!(store.audit_for(&rec.id).unwrap().len(), 2);

        store.delete_hard(&rec).unwrap();
        assert!(store.get(&rec.id).unwrap().is_none());
        assert!(store.audit_for(&rec.id).unwrap().is_empty());
        assert!(store.user_memories("u1").unwrap().is_empty());
    }

    #[test]
    fn test_user_scan_is_isolated() {
        let (store, _dir) = open_store();
        let a = record("alice", "a", "ha");
        let b = record("bob", "b", "hb");
        store.insert(&a, &create_audit(a.id)).unwrap();
        store.insert(&b, &create_audit(b.id)).unwrap();

        let alice = store.user_memories("alice").unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].user_id, "alice");
    }

    #[test]
    fn test_job_round_trip_and_idempotency() {
        let (store, _dir) = open_store();
        let job = IngestJob {
            job_id: Uuid::new_v4(),
            idempotency_key: Some("abc".into()),
            user_id: "u1".into(),
            scope: Scope::Global,
            agent_id: None,
            text: "hello".into(),
            source: Some("chat".into()),
            event_time: None,
            metadata: None,
            received_at: Utc::now(),
            status: JobStatus::Accepted,
            result: None,
            error: None,
        };
        store.put_job(&job).unwrap();
        store.idem_put("u1", "abc", &job.job_id).unwrap();

        assert_eq!(store.idem_lookup("u1", "abc").unwrap(), Some(job.job_id));
        assert!(store.idem_lookup("u1", "other").unwrap().is_none());
        assert!(store.idem_lookup("u2", "abc").unwrap().is_none());

        let loaded = store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Accepted);
    }

    #[test]
    fn test_terminal_job_gc_scan() {
        let (store, _dir) = open_store();
        let mut done = IngestJob {
            job_id: Uuid::new_v4(),
            idempotency_key: None,
            user_id: "u1".into(),
            scope: Scope::Global,
            agent_id: None,
            text: "t".into(),
            source: None,
            event_time: None,
            metadata: None,
            received_at: Utc::now() - chrono::Duration::days(2),
            status: JobStatus::Done,
            result: None,
            error: None,
        };
        store.put_job(&done).unwrap();

        done.job_id = Uuid::new_v4();
        done.status = JobStatus::Running;
        store.put_job(&done).unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(1);
        let eligible = store.terminal_jobs_before(cutoff).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].status, JobStatus::Done);
    }

    #[test]
    fn test_touch_last_accessed() {
        let (store, _dir) = open_store();
        let rec = record("u1", "content", "h1");
        store.insert(&rec, &create_audit(rec.id)).unwrap();

        let at = Utc::now();
        store.touch_last_accessed(&[rec.id], at).unwrap();
        let loaded = store.get(&rec.id).unwrap().unwrap();
        assert_eq!(loaded.last_accessed, Some(at));
    }
}
