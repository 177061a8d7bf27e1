//! Environment-driven configuration for the Stratum ingestion control plane,
//! following the same single `AppConfig::from_env()` entry point the
//! platform's other services use.

pub mod chunking;
pub mod feature_toggles;
pub mod thresholds;
pub mod vocabulary;

use chunking::ChunkingDefaults;
use feature_toggles::FeatureToggles;
use thresholds::MatchThresholds;
use vocabulary::RelationshipAllowlist;

/// Which embedding/extraction provider backs the pipeline (spec.md §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
    Cloud,
    Local,
}

impl ProviderKind {
    fn from_env() -> Self {
        match std::env::var("EMBEDDING_PROVIDER").ok().as_deref() {
            Some("cloud") => ProviderKind::Cloud,
            Some("local") => ProviderKind::Local,
            Some("mock") => ProviderKind::Mock,
            _ => ProviderKind::Mock,
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub qdrant_url: String,
    pub object_store_dir: String,

    pub provider: ProviderKind,
    pub openai_api_key: Option<String>,
    pub local_provider_url: String,
    pub embedding_model: String,
    pub embedding_dims: usize,

    pub match_thresholds: MatchThresholds,
    pub chunking_defaults: ChunkingDefaults,
    pub relationship_allowlist: RelationshipAllowlist,

    pub inline_artifact_limit_bytes: usize,
    pub worker_pool_size: usize,
    pub approval_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub stalled_job_timeout_secs: i64,
    pub job_retention_days: i64,
    pub provider_retry_budget: u32,
    pub provider_call_timeout_secs: u64,
    pub orphan_retry_budget: u32,

    pub feature_toggles: FeatureToggles,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/stratum".to_string()),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            qdrant_url: std::env::var("QDRANT_URL")
                .unwrap_or_else(|_| "http://localhost:6334".to_string()),
            object_store_dir: std::env::var("OBJECT_STORE_DIR")
                .unwrap_or_else(|_| "/tmp/stratum-objects".to_string()),

            provider: ProviderKind::from_env(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            local_provider_url: std::env::var("LOCAL_PROVIDER_URL")
                .unwrap_or_else(|_| "http://localhost:8100".to_string()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dims: env_usize("EMBEDDING_DIMS", 1536),

            match_thresholds: MatchThresholds::from_env(),
            chunking_defaults: ChunkingDefaults::from_env(),
            relationship_allowlist: RelationshipAllowlist::from_env(),

            inline_artifact_limit_bytes: env_usize("INLINE_ARTIFACT_LIMIT_BYTES", 10 * 1024),
            worker_pool_size: env_usize("WORKER_POOL_SIZE", 4),
            approval_ttl_secs: env_usize("APPROVAL_TTL_SECS", 24 * 60 * 60) as i64,
            sweep_interval_secs: env_usize("SWEEP_INTERVAL_SECS", 60) as u64,
            stalled_job_timeout_secs: env_usize("STALLED_JOB_TIMEOUT_SECS", 30 * 60) as i64,
            job_retention_days: env_usize("JOB_RETENTION_DAYS", 7) as i64,
            provider_retry_budget: env_usize("PROVIDER_RETRY_BUDGET", 3) as u32,
            provider_call_timeout_secs: env_usize("PROVIDER_CALL_TIMEOUT_SECS", 60) as u64,
            orphan_retry_budget: env_usize("ORPHAN_RETRY_BUDGET", 1) as u32,

            feature_toggles: FeatureToggles::from_env_path(),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
