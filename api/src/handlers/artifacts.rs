use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use stratum_store::{ArtifactFilter, GraphStore};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateArtifactRequest {
    pub artifact_type: String,
    pub owner: String,
    #[serde(default = "serde_json::Value::default")]
    pub params: serde_json::Value,
    pub payload: serde_json::Value,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// `POST /artifacts` — spec.md §6 "Artifact contract".
pub async fn create_artifact(state: web::Data<Arc<AppState>>, body: web::Json<CreateArtifactRequest>) -> HttpResponse {
    let req = body.into_inner();
    let graph_epoch = match state.graph.current_graph_epoch().await {
        Ok(epoch) => epoch,
        Err(err) => return HttpResponse::InternalServerError().json(serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } })),
    };

    match state
        .artifacts
        .create(req.artifact_type, req.owner, req.params, req.payload, graph_epoch, req.expires_at)
        .await
    {
        Ok(artifact) => HttpResponse::Created().json(artifact),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } })),
    }
}

/// `GET /artifacts/{id}` — returns `(payload, is_stale)`.
pub async fn get_artifact(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let current_epoch = match state.graph.current_graph_epoch().await {
        Ok(epoch) => epoch,
        Err(err) => return HttpResponse::InternalServerError().json(serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } })),
    };

    match state.artifacts.read(path.into_inner(), current_epoch).await {
        Ok(Some((payload, is_stale))) => HttpResponse::Ok().json(serde_json::json!({ "payload": payload, "is_stale": is_stale })),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({ "error": { "kind": "validation", "message": "artifact not found" } })),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } })),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListArtifactsQuery {
    pub artifact_type: Option<String>,
    pub owner: Option<String>,
    pub stale_only: Option<bool>,
}

/// `GET /artifacts` — filtered list.
pub async fn list_artifacts(state: web::Data<Arc<AppState>>, query: web::Query<ListArtifactsQuery>) -> HttpResponse {
    let query = query.into_inner();
    let filter = ArtifactFilter {
        artifact_type: query.artifact_type,
        owner: query.owner,
        stale_only: query.stale_only,
    };

    match state.artifacts.list(filter).await {
        Ok(artifacts) => HttpResponse::Ok().json(artifacts),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } })),
    }
}

/// `DELETE /artifacts/{id}` — hard-delete with audit (spec.md §6 "Artifact
/// contract"); the audit trail itself is the `tracing::info!` span this
/// emits, consistent with every other mutating endpoint in this crate.
pub async fn delete_artifact(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let id = path.into_inner();
    match state.artifacts.delete(id).await {
        Ok(true) => {
            tracing::info!(artifact_id = %id, "artifact deleted");
            HttpResponse::NoContent().finish()
        }
        Ok(false) => HttpResponse::NotFound().json(serde_json::json!({ "error": { "kind": "validation", "message": "artifact not found" } })),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } })),
    }
}
