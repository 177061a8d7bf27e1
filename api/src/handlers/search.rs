use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use stratum_provider::Embedder;
use stratum_store::{GraphStore, RelationalStore};
use uuid::Uuid;

use crate::state::AppState;

fn default_min_similarity() -> f32 {
    0.7
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct ConceptSearchQuery {
    pub q: String,
    pub ontology: Option<String>,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct ConceptSearchHit {
    pub concept_id: Uuid,
    pub label: String,
    pub similarity: f32,
    pub evidence_count: u64,
}

/// `GET /concepts/search` — spec.md §6 "Concept search".
pub async fn search_concepts(state: web::Data<Arc<AppState>>, query: web::Query<ConceptSearchQuery>) -> HttpResponse {
    let query = query.into_inner();
    let embedding = match state.embedder.embed(&[query.q.clone()]).await {
        Ok(mut vectors) => vectors.remove(0),
        Err(err) => return HttpResponse::BadGateway().json(serde_json::json!({ "error": { "kind": "provider_unavailable", "message": err.to_string() } })),
    };

    let candidates = match state
        .graph
        .search_concepts(query.ontology.as_deref(), &embedding, query.min_similarity, query.limit, query.offset)
        .await
    {
        Ok(candidates) => candidates,
        Err(err) => return HttpResponse::InternalServerError().json(serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } })),
    };

    let mut hits = Vec::with_capacity(candidates.len());
    for (concept, similarity) in candidates {
        let evidence_count = state.graph.evidence_count(concept.id).await.unwrap_or(0);
        hits.push(ConceptSearchHit {
            concept_id: concept.id,
            label: concept.label,
            similarity,
            evidence_count,
        });
    }
    HttpResponse::Ok().json(hits)
}

#[derive(Debug, Deserialize)]
pub struct PathSearchQuery {
    pub from: Uuid,
    pub to: Uuid,
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    #[serde(default = "default_path_k")]
    pub k: usize,
}

fn default_max_hops() -> u32 {
    4
}

fn default_path_k() -> usize {
    5
}

/// `GET /paths` — spec.md §6 "Path search".
pub async fn search_paths(state: web::Data<Arc<AppState>>, query: web::Query<PathSearchQuery>) -> HttpResponse {
    let query = query.into_inner();
    match state.graph.find_paths(query.from, query.to, query.max_hops, query.k).await {
        Ok(paths) => HttpResponse::Ok().json(paths),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } })),
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceSearchQuery {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct SourceSearchHit {
    pub source_id: Uuid,
    pub chunk_text: String,
    pub start: u32,
    pub end: u32,
    pub full_text: String,
    pub similarity: f32,
    pub is_stale: bool,
}

/// `GET /sources/search` — spec.md §6 "Source search".
pub async fn search_sources(state: web::Data<Arc<AppState>>, query: web::Query<SourceSearchQuery>) -> HttpResponse {
    let query = query.into_inner();
    let embedding = match state.embedder.embed(&[query.q.clone()]).await {
        Ok(mut vectors) => vectors.remove(0),
        Err(err) => return HttpResponse::BadGateway().json(serde_json::json!({ "error": { "kind": "provider_unavailable", "message": err.to_string() } })),
    };

    let matches = match state.relational.search_source_embeddings(&embedding, query.limit).await {
        Ok(matches) => matches,
        Err(err) => return HttpResponse::InternalServerError().json(serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } })),
    };

    let mut hits = Vec::with_capacity(matches.len());
    for entry in matches {
        let full_text = state
            .graph
            .get_source(entry.embedding_row.source_id)
            .await
            .ok()
            .flatten()
            .map(|s| s.full_text)
            .unwrap_or_default();
        hits.push(SourceSearchHit {
            source_id: entry.embedding_row.source_id,
            chunk_text: entry.embedding_row.chunk_text,
            start: entry.embedding_row.start_byte,
            end: entry.embedding_row.end_byte,
            full_text,
            similarity: entry.similarity,
            is_stale: entry.is_stale,
        });
    }
    HttpResponse::Ok().json(hits)
}
