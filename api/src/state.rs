use std::sync::Arc;

use stratum_artifacts::ArtifactStore;
use stratum_broker::ProgressBroker;
use stratum_config::AppConfig;
use stratum_jobs::CancellationRegistry;
use stratum_provider::Embedder;
use stratum_store::{GraphStore, ObjectStore, RelationalStore};

/// Everything a handler needs, assembled once at startup and shared via
/// `web::Data` (spec.md §6 "thin actix-web surface... no business logic in
/// the handler layer"). Mirrors the platform's `AppState` pattern
/// (`chunker::models::AppState`), generalized from one `RwLock<HashMap>`
/// job registry to the full set of control-plane facades.
pub struct AppState {
    pub config: AppConfig,
    pub relational: Arc<dyn RelationalStore>,
    pub graph: Arc<dyn GraphStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub artifacts: ArtifactStore,
    pub broker: Arc<ProgressBroker>,
    pub cancellation: Arc<CancellationRegistry>,
    pub embedder: Arc<dyn Embedder>,
}
