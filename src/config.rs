//! Configuration management for Cortex-Memory.
//!
//! All configurable parameters in one place with environment variable
//! overrides. Sensible defaults for development, explicit settings for
//! production. The loaded value is passed to components; there is no
//! process-wide configuration singleton.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::constants::*;

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins (empty = allow all)
    pub allowed_origins: Vec<String>,
    /// Allowed HTTP methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PATCH".to_string(),
                "DELETE".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec![
                "Content-Type".to_string(),
                "X-API-KEY".to_string(),
                "Idempotency-Key".to_string(),
            ],
        }
    }
}

impl CorsConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(origins) = env::var("CORTEX_CORS_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(methods) = env::var("CORTEX_CORS_METHODS") {
            config.allowed_methods = methods
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config
    }

    pub fn is_restricted(&self) -> bool {
        !self.allowed_origins.is_empty()
    }

    /// Convert to tower-http CorsLayer
    pub fn to_layer(&self) -> tower_http::cors::CorsLayer {
        use tower_http::cors::{AllowOrigin, Any, CorsLayer};

        let mut layer = CorsLayer::new();

        if self.allowed_origins.is_empty() {
            layer = layer.allow_origin(Any);
        } else {
            let origins: Vec<_> = self
                .allowed_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();
            if origins.is_empty() {
                layer = layer.allow_origin(Any);
            } else {
                layer = layer.allow_origin(AllowOrigin::list(origins));
            }
        }

        let methods: Vec<axum::http::Method> = self
            .allowed_methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        if methods.is_empty() {
            layer = layer.allow_methods(Any);
        } else {
            layer = layer.allow_methods(methods);
        }

        let headers: Vec<axum::http::HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        if headers.is_empty() {
            layer = layer.allow_headers(Any);
        } else {
            layer = layer.allow_headers(headers);
        }

        layer
    }
}

/// Server configuration loaded from environment with defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server port (default: 8200)
    pub port: u16,

    /// Storage path for the RocksDB-backed store (default: ./cortex_data)
    pub storage_path: PathBuf,

    /// Whether running in production mode
    pub is_production: bool,

    /// Gemini API key for the analyzer/embedder adapters.
    /// Empty means development mode with the built-in deterministic adapters.
    pub llm_api_key: String,

    /// Gemini model used for analysis and synthesis
    pub llm_model: String,

    /// Gemini model used for embeddings
    pub embedding_model: String,

    /// Embedding vector dimension
    pub embedding_dim: usize,

    /// Semantic near-duplicate threshold for fact/state/policy upserts
    pub upsert_threshold: f32,

    /// Window after which a `state` memory is demoted from context evidence
    pub state_freshness_window: Duration,

    /// Character budget for context evidence assembly
    pub context_budget_chars: usize,

    /// Background ingest worker pool size
    pub worker_pool_size: usize,

    /// Max concurrently running jobs per user
    pub per_user_concurrency: usize,

    /// Bounded job queue capacity
    pub job_queue_capacity: usize,

    /// End-to-end deadline for synchronous endpoints
    pub request_timeout: Duration,

    /// Rate limit: requests per second (default: 500)
    pub rate_limit_per_second: u64,

    /// Rate limit: burst size (default: 1000)
    pub rate_limit_burst: u32,

    /// Maximum concurrent in-flight requests (default: 200)
    pub max_concurrent_requests: usize,

    /// CORS configuration
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8200,
            storage_path: PathBuf::from("./cortex_data"),
            is_production: false,
            llm_api_key: String::new(),
            llm_model: "gemini-2.5-flash-lite".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            upsert_threshold: DEFAULT_UPSERT_THRESHOLD,
            state_freshness_window: Duration::from_secs(DEFAULT_STATE_FRESHNESS_SECS),
            context_budget_chars: DEFAULT_CONTEXT_BUDGET_CHARS,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            per_user_concurrency: DEFAULT_PER_USER_CONCURRENCY,
            job_queue_capacity: DEFAULT_JOB_QUEUE_CAPACITY,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_per_second: 500,
            rate_limit_burst: 1000,
            max_concurrent_requests: 200,
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    #[allow(clippy::field_reassign_with_default)] // env overrides need a mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.is_production = env::var("CORTEX_ENV")
            .map(|v| {
                let v = v.to_lowercase();
                v == "production" || v == "prod"
            })
            .unwrap_or(false);

        if let Ok(val) = env::var("CORTEX_PORT") {
            if let Ok(port) = val.parse() {
                config.port = port;
            }
        }

        if let Ok(val) = env::var("CORTEX_STORAGE_PATH") {
            config.storage_path = PathBuf::from(val);
        }

        if let Ok(val) = env::var("CORTEX_LLM_API_KEY") {
            config.llm_api_key = val;
        }

        if let Ok(val) = env::var("CORTEX_LLM_MODEL") {
            config.llm_model = val;
        }

        if let Ok(val) = env::var("CORTEX_EMBEDDING_MODEL") {
            config.embedding_model = val;
        }

        if let Ok(val) = env::var("CORTEX_EMBEDDING_DIM") {
            if let Ok(n) = val.parse() {
                config.embedding_dim = n;
            }
        }

        if let Ok(val) = env::var("CORTEX_UPSERT_THRESHOLD") {
            if let Ok(n) = val.parse::<f32>() {
                config.upsert_threshold = n.clamp(0.0, 1.0);
            }
        }

        if let Ok(val) = env::var("CORTEX_STATE_FRESHNESS_SECONDS") {
            if let Ok(n) = val.parse() {
                config.state_freshness_window = Duration::from_secs(n);
            }
        }

        if let Ok(val) = env::var("CORTEX_CONTEXT_BUDGET_CHARS") {
            if let Ok(n) = val.parse() {
                config.context_budget_chars = n;
            }
        }

        if let Ok(val) = env::var("CORTEX_WORKER_POOL_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.worker_pool_size = n.max(1);
            }
        }

        if let Ok(val) = env::var("CORTEX_PER_USER_CONCURRENCY") {
            if let Ok(n) = val.parse::<usize>() {
                config.per_user_concurrency = n.max(1);
            }
        }

        if let Ok(val) = env::var("CORTEX_JOB_QUEUE_CAPACITY") {
            if let Ok(n) = val.parse::<usize>() {
                config.job_queue_capacity = n.max(1);
            }
        }

        if let Ok(val) = env::var("CORTEX_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                config.request_timeout = Duration::from_secs(n);
            }
        }

        if let Ok(val) = env::var("CORTEX_RATE_LIMIT") {
            if let Ok(n) = val.parse() {
                config.rate_limit_per_second = n;
            }
        }

        if let Ok(val) = env::var("CORTEX_RATE_BURST") {
            if let Ok(n) = val.parse() {
                config.rate_limit_burst = n;
            }
        }

        if let Ok(val) = env::var("CORTEX_MAX_CONCURRENT") {
            if let Ok(n) = val.parse() {
                config.max_concurrent_requests = n;
            }
        }

        config.cors = CorsConfig::from_env();

        config
    }

    /// True when the Gemini adapters should be used instead of the
    /// deterministic development fallbacks.
    pub fn has_llm(&self) -> bool {
        !self.llm_api_key.trim().is_empty()
    }

    /// Log the current configuration.
    pub fn log(&self) {
        info!("Configuration:");
        info!(
            "   Mode: {}",
            if self.is_production {
                "PRODUCTION"
            } else {
                "Development"
            }
        );
        info!("   Port: {}", self.port);
        info!("   Storage: {:?}", self.storage_path);
        info!(
            "   Adapters: {}",
            if self.has_llm() {
                "gemini"
            } else {
                "deterministic (no CORTEX_LLM_API_KEY)"
            }
        );
        info!("   Embedding dim: {}", self.embedding_dim);
        info!("   Upsert threshold: {:.2}", self.upsert_threshold);
        info!(
            "   State freshness window: {}s",
            self.state_freshness_window.as_secs()
        );
        info!("   Context budget: {} chars", self.context_budget_chars);
        info!(
            "   Workers: {} (per-user concurrency: {})",
            self.worker_pool_size, self.per_user_concurrency
        );
        info!("   Job queue capacity: {}", self.job_queue_capacity);
        info!(
            "   Request timeout: {}s",
            self.request_timeout.as_secs()
        );
        info!(
            "   Rate limit: {} req/sec (burst: {})",
            self.rate_limit_per_second, self.rate_limit_burst
        );
        if self.cors.is_restricted() {
            info!("   CORS origins: {:?}", self.cors.allowed_origins);
        } else {
            info!("   CORS: Permissive (all origins allowed)");
        }
    }
}

/// Environment variable documentation
#[allow(unused)] // Public API - available for CLI help output
pub fn print_env_help() {
    println!("Cortex-Memory Configuration Environment Variables:");
    println!();
    println!("  CORTEX_ENV                      - 'production' or 'prod' for production mode");
    println!("  CORTEX_PORT                     - Server port (default: 8200)");
    println!("  CORTEX_STORAGE_PATH             - Store directory (default: ./cortex_data)");
    println!("  CORTEX_API_KEYS                 - Comma-separated API keys (required in production)");
    println!("  CORTEX_DEV_API_KEY              - Development API key override");
    println!("  CORTEX_LLM_API_KEY              - Gemini API key (empty = deterministic adapters)");
    println!("  CORTEX_LLM_MODEL                - Analysis model (default: gemini-2.5-flash-lite)");
    println!("  CORTEX_EMBEDDING_MODEL          - Embedding model (default: text-embedding-004)");
    println!("  CORTEX_EMBEDDING_DIM            - Embedding dimension (default: 768)");
    println!("  CORTEX_UPSERT_THRESHOLD         - Near-duplicate threshold (default: 0.95)");
    println!("  CORTEX_STATE_FRESHNESS_SECONDS  - State demotion window (default: 86400)");
    println!("  CORTEX_CONTEXT_BUDGET_CHARS     - Context char budget (default: 6000)");
    println!("  CORTEX_WORKER_POOL_SIZE         - Ingest workers (default: 4)");
    println!("  CORTEX_PER_USER_CONCURRENCY     - Jobs per user at once (default: 1)");
    println!("  CORTEX_JOB_QUEUE_CAPACITY       - Bounded job queue size (default: 256)");
    println!("  CORTEX_REQUEST_TIMEOUT_SECONDS  - Sync endpoint deadline (default: 30)");
    println!("  CORTEX_RATE_LIMIT               - Requests per second (default: 500)");
    println!("  CORTEX_RATE_BURST               - Burst size (default: 1000)");
    println!("  CORTEX_MAX_CONCURRENT           - Max concurrent requests (default: 200)");
    println!("  CORTEX_CORS_ORIGINS             - Comma-separated allowed origins (default: all)");
    println!();
    println!("  RUST_LOG                        - Log level (e.g., info, debug, trace)");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// `env::set_var` is process-global; tests touching env hold this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8200);
        assert_eq!(config.embedding_dim, 768);
        assert!((config.upsert_threshold - 0.95).abs() < f32::EPSILON);
        assert_eq!(config.state_freshness_window.as_secs(), 86_400);
        assert!(!config.is_production);
        assert!(!config.has_llm());
    }

    #[test]
    fn test_env_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("CORTEX_PORT", "9999");
        env::set_var("CORTEX_UPSERT_THRESHOLD", "0.9");
        env::set_var("CORTEX_STATE_FRESHNESS_SECONDS", "3600");

        let config = ServerConfig::from_env();
        assert_eq!(config.port, 9999);
        assert!((config.upsert_threshold - 0.9).abs() < 1e-6);
        assert_eq!(config.state_freshness_window.as_secs(), 3600);

        env::remove_var("CORTEX_PORT");
        env::remove_var("CORTEX_UPSERT_THRESHOLD");
        env::remove_var("CORTEX_STATE_FRESHNESS_SECONDS");
    }

    #[test]
    fn test_threshold_clamped() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("CORTEX_UPSERT_THRESHOLD", "1.5");
        let config = ServerConfig::from_env();
        assert!(config.upsert_threshold <= 1.0);
        env::remove_var("CORTEX_UPSERT_THRESHOLD");
    }

    #[test]
    fn test_cors_default_is_permissive() {
        let cors = CorsConfig::default();
        assert!(!cors.is_restricted());
        let _layer = cors.to_layer(); // should not panic
    }
}
