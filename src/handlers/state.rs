//! Shared application state wired at startup.

use std::sync::Arc;

use anyhow::Result;

use crate::adapters::{
    analyzer::{GeminiAnalyzer, HeuristicAnalyzer},
    embedder::{GeminiEmbedder, HashingEmbedder},
    Adapters,
};
use crate::config::ServerConfig;
use crate::jobs::JobManager;
use crate::memory::{MemoryManager, MemoryStore, RetrievalEngine};
use crate::synthesizer::Synthesizer;

/// Application state type alias
pub type AppState = Arc<ServiceState>;

/// All long-lived components, built once and shared across handlers and
/// workers. Must be constructed inside a tokio runtime (the job manager
/// spawns its worker pool immediately).
pub struct ServiceState {
    config: ServerConfig,
    store: Arc<MemoryStore>,
    manager: Arc<MemoryManager>,
    retrieval: RetrievalEngine,
    synthesizer: Synthesizer,
    jobs: Arc<JobManager>,
    adapter_mode: &'static str,
}

impl ServiceState {
    /// Build with adapters selected from configuration: Gemini when an LLM
    /// key is present, the deterministic pair otherwise.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>> {
        let adapters = if config.has_llm() {
            Adapters::new(
                Arc::new(GeminiAnalyzer::new(
                    config.llm_api_key.clone(),
                    &config.llm_model,
                )),
                Arc::new(GeminiEmbedder::new(
                    config.llm_api_key.clone(),
                    &config.embedding_model,
                    config.embedding_dim,
                )),
            )
        } else {
            Adapters::new(
                Arc::new(HeuristicAnalyzer),
                Arc::new(HashingEmbedder::new(config.embedding_dim)),
            )
        };
        Self::with_adapters(config, adapters)
    }

    /// Build with caller-supplied adapters (tests inject deterministic or
    /// scripted implementations here).
    pub fn with_adapters(config: ServerConfig, adapters: Adapters) -> Result<Arc<Self>> {
        let store = Arc::new(MemoryStore::open(&config.storage_path)?);
        let manager = Arc::new(MemoryManager::new(store.clone(), adapters.clone(), &config));
        let retrieval = RetrievalEngine::new(store.clone(), adapters.clone(), &config);
        let synthesizer = Synthesizer::new(adapters.clone());
        let jobs = JobManager::spawn(store.clone(), manager.clone(), &config);

        Ok(Arc::new(Self {
            adapter_mode: adapters.embedder.mode(),
            config,
            store,
            manager,
            retrieval,
            synthesizer,
            jobs,
        }))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn manager(&self) -> &MemoryManager {
        &self.manager
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn adapter_mode(&self) -> &'static str {
        self.adapter_mode
    }
}
