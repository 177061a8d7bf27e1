mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use sqlx::PgPool;
use stratum_artifacts::ArtifactStore;
use stratum_broker::ProgressBroker;
use stratum_config::{AppConfig, ProviderKind};
use stratum_jobs::{CancellationRegistry, JobHandler, Scheduler, SchedulerConfig, WorkerPool};
use stratum_observability::{init_tracing, observability, TracingConfig};
use stratum_provider::cloud::CloudProvider;
use stratum_provider::local::LocalProvider;
use stratum_provider::mock::MockProvider;
use stratum_provider::{Embedder, Extractor};
use stratum_source_embed::{RegenerationHandler, RegenerationWorker};
use stratum_store::{FilesystemObjectStore, GraphStore, ObjectStore, PostgresGraphStore, PostgresRelationalStore, RelationalStore};
use stratum_upsert::{IngestFileHandler, IngestionHandler, UpsertEngine};
use tracing::info;

use crate::state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_tracing(TracingConfig::for_service("stratum-api"));

    let config = AppConfig::from_env();
    let port = std::env::var("STRATUM_API_PORT").unwrap_or_else(|_| "8090".to_string()).parse::<u16>().expect("invalid STRATUM_API_PORT");
    let host = std::env::var("STRATUM_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

    info!(database_url = %config.database_url, "connecting to the job/artifact/source database");
    let pool = PgPool::connect(&config.database_url)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e))?;

    let graph: Arc<dyn GraphStore> = Arc::new(PostgresGraphStore::new(pool.clone()));
    let relational: Arc<dyn RelationalStore> = Arc::new(PostgresRelationalStore::new(pool));
    let objects: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(config.object_store_dir.clone()));
    let artifacts = ArtifactStore::new(relational.clone(), objects.clone(), config.inline_artifact_limit_bytes);

    let (embedder, extractor) = build_providers(&config);

    let upsert_engine = Arc::new(UpsertEngine::new(
        graph.clone(),
        embedder.clone(),
        extractor,
        config.match_thresholds,
        config.relationship_allowlist.clone(),
        config.provider_retry_budget,
    ));
    let ingest_text: Arc<dyn JobHandler> = Arc::new(IngestionHandler::new(upsert_engine.clone(), objects.clone()));
    let ingest_file: Arc<dyn JobHandler> = Arc::new(IngestFileHandler(IngestionHandler::new(upsert_engine, objects.clone())));

    let regen_worker = Arc::new(RegenerationWorker::new(
        graph.clone(),
        relational.clone(),
        embedder.clone(),
        config.chunking_defaults.sentence_max_chars,
    ));
    let regen_handler: Arc<dyn JobHandler> = Arc::new(RegenerationHandler::new(regen_worker));

    let broker = Arc::new(ProgressBroker::new(relational.clone()));
    let cancellation = Arc::new(CancellationRegistry::new());
    let worker_id = std::env::var("HOSTNAME").unwrap_or_else(|_| "stratum-api".to_string());

    let pool_handle = Arc::new(WorkerPool::new(
        relational.clone(),
        vec![ingest_text, ingest_file, regen_handler],
        cancellation.clone(),
        broker.clone(),
        worker_id.clone(),
        config.worker_pool_size,
        Duration::from_millis(250),
    ));
    tokio::spawn(pool_handle.run());

    let scheduler = Arc::new(Scheduler::new(
        relational.clone(),
        cancellation.clone(),
        worker_id,
        SchedulerConfig {
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            approval_ttl_secs: config.approval_ttl_secs,
            stalled_job_timeout_secs: config.stalled_job_timeout_secs,
            job_retention: chrono::Duration::days(config.job_retention_days),
            orphan_retry_budget: config.orphan_retry_budget,
        },
    ));
    tokio::spawn(scheduler.run());

    let state = Arc::new(AppState {
        config: config.clone(),
        relational,
        graph,
        objects,
        artifacts,
        broker,
        cancellation,
        embedder,
    });

    info!(%host, port, "stratum-api listening");

    HttpServer::new(move || {
        let cors = Cors::default().allow_any_origin().allow_any_method().allow_any_header().supports_credentials();
        App::new()
            .wrap(cors)
            .wrap(observability("stratum-api"))
            .app_data(web::Data::new(state.clone()))
            .route("/health", web::get().to(handlers::health::health_check))
            .route("/jobs", web::post().to(handlers::jobs::submit_job))
            .route("/jobs/{id}", web::get().to(handlers::jobs::get_job))
            .route("/jobs/{id}/approve", web::post().to(handlers::jobs::approve_job))
            .route("/jobs/{id}/cancel", web::post().to(handlers::jobs::cancel_job))
            .route("/jobs/{id}/stream", web::get().to(handlers::jobs::stream_job))
            .route("/concepts/search", web::get().to(handlers::search::search_concepts))
            .route("/paths", web::get().to(handlers::search::search_paths))
            .route("/sources/search", web::get().to(handlers::search::search_sources))
            .route("/artifacts", web::post().to(handlers::artifacts::create_artifact))
            .route("/artifacts", web::get().to(handlers::artifacts::list_artifacts))
            .route("/artifacts/{id}", web::get().to(handlers::artifacts::get_artifact))
            .route("/artifacts/{id}", web::delete().to(handlers::artifacts::delete_artifact))
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}

fn build_providers(config: &AppConfig) -> (Arc<dyn Embedder>, Arc<dyn Extractor>) {
    (build_embedder(config), build_extractor(config))
}

fn build_embedder(config: &AppConfig) -> Arc<dyn Embedder> {
    match config.provider {
        ProviderKind::Mock => Arc::new(MockProvider::new(config.embedding_dims, Default::default())),
        ProviderKind::Cloud => Arc::new(CloudProvider::new(
            config.openai_api_key.clone().unwrap_or_default(),
            config.embedding_model.clone(),
            config.embedding_dims,
        )),
        ProviderKind::Local => Arc::new(LocalProvider::new(config.local_provider_url.clone(), config.embedding_model.clone(), config.embedding_dims)),
    }
}

fn build_extractor(config: &AppConfig) -> Arc<dyn Extractor> {
    match config.provider {
        ProviderKind::Mock => Arc::new(MockProvider::new(config.embedding_dims, Default::default())),
        ProviderKind::Cloud => Arc::new(CloudProvider::new(
            config.openai_api_key.clone().unwrap_or_default(),
            config.embedding_model.clone(),
            config.embedding_dims,
        )),
        ProviderKind::Local => Arc::new(LocalProvider::new(config.local_provider_url.clone(), config.embedding_model.clone(), config.embedding_dims)),
    }
}
