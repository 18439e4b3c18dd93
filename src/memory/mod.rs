//! Memory domain: data model, persistence, ingestion, and retrieval.

pub mod manager;
pub mod retrieval;
pub mod store;
pub mod types;

pub use manager::{ForceCreateInput, IngestInput, MemoryManager, MemoryPatch};
pub use retrieval::{ContextParams, QueryFilter, QueryPage, RetrievalEngine, ScoredMemory};
pub use store::MemoryStore;
pub use types::*;
