use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use stratum_models::{
    Artifact, ArtifactPayload, CostEstimate, Job, JobError, JobKind, JobResult, JobState,
    Progress, ProcessingMode, Source, SourceEmbedding,
};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::relational::{
    ArtifactFilter, JobFilter, JobPatch, Pagination, RegenSelector, RelationalStore,
    SourceEmbeddingMatch,
};
use crate::util::cosine_similarity;

/// Postgres-backed `RelationalStore` (spec.md §4.A). `progress`, `result`,
/// `error`, `cost_estimate` and `chunk_plan` are stored as `jsonb` columns;
/// the CAS in `update_state_atomically` is a single `UPDATE ... WHERE state
/// = $from` so two racing workers can never both observe success
/// (spec.md §8 "At-most-once processing start"). A partial unique index on
/// `(dedup_key, ontology)` for terminal states backs
/// `find_job_by_dedup_key`.
pub struct PostgresRelationalStore {
    pool: PgPool,
}

impl PostgresRelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> StoreResult<Job> {
        let kind_str: String = row.try_get("kind")?;
        let state_str: String = row.try_get("state")?;
        let mode_str: String = row.try_get("processing_mode")?;
        let progress: Value = row.try_get("progress")?;
        let cost_estimate: Option<Value> = row.try_get("cost_estimate")?;
        let chunk_plan: Option<Value> = row.try_get("chunk_plan")?;
        let result: Option<Value> = row.try_get("result")?;
        let error: Option<Value> = row.try_get("error")?;

        Ok(Job {
            id: row.try_get("id")?,
            kind: parse_kind(&kind_str),
            owner: row.try_get("owner")?,
            ontology: row.try_get("ontology")?,
            submitted_at: row.try_get("submitted_at")?,
            state: parse_state(&state_str),
            cost_estimate: cost_estimate.map(serde_json::from_value::<CostEstimate>).transpose()?,
            chunk_plan: chunk_plan.map(serde_json::from_value).transpose()?,
            processing_mode: if mode_str == "parallel" {
                ProcessingMode::Parallel
            } else {
                ProcessingMode::Serial
            },
            progress: serde_json::from_value::<Progress>(progress)?,
            result: result.map(serde_json::from_value::<JobResult>).transpose()?,
            error: error.map(serde_json::from_value::<JobError>).transpose()?,
            dedup_key: row.try_get("dedup_key")?,
            force: row.try_get("force")?,
            approval_deadline: row.try_get("approval_deadline")?,
            terminal_at: row.try_get("terminal_at")?,
            client_request_id: row.try_get("client_request_id")?,
            worker_id: row.try_get("worker_id")?,
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        })
    }

    fn row_to_source_embedding(row: &sqlx::postgres::PgRow) -> StoreResult<SourceEmbedding> {
        let embedding: Value = row.try_get("embedding")?;
        Ok(SourceEmbedding {
            source_id: row.try_get("source_id")?,
            chunk_index: row.try_get::<i32, _>("chunk_index")? as u32,
            strategy: row.try_get("strategy")?,
            start_byte: row.try_get::<i32, _>("start_byte")? as u32,
            end_byte: row.try_get::<i32, _>("end_byte")? as u32,
            chunk_text: row.try_get("chunk_text")?,
            chunk_hash: row.try_get("chunk_hash")?,
            source_hash: row.try_get("source_hash")?,
            embedding: serde_json::from_value(embedding)?,
            model: row.try_get("model")?,
            dims: row.try_get::<i32, _>("dims")? as usize,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_artifact(row: &sqlx::postgres::PgRow) -> StoreResult<Artifact> {
        let payload_kind: String = row.try_get("payload_kind")?;
        let payload: Value = row.try_get("payload")?;
        let payload = if payload_kind == "object_store" {
            let key: String = serde_json::from_value(payload)?;
            ArtifactPayload::ObjectStore { key }
        } else {
            ArtifactPayload::Inline(payload)
        };
        Ok(Artifact {
            id: row.try_get("id")?,
            artifact_type: row.try_get("artifact_type")?,
            owner: row.try_get("owner")?,
            params: row.try_get("params")?,
            payload,
            created_at: row.try_get("created_at")?,
            graph_epoch: row.try_get("graph_epoch")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

fn parse_kind(s: &str) -> JobKind {
    match s {
        "ingest_text" => JobKind::IngestText,
        "ingest_file" => JobKind::IngestFile,
        "ingest_image" => JobKind::IngestImage,
        "restore" => JobKind::Restore,
        "regenerate_embeddings" => JobKind::RegenerateEmbeddings,
        _ => JobKind::Analysis,
    }
}

fn parse_state(s: &str) -> JobState {
    match s {
        "submitted" => JobState::Submitted,
        "pending" => JobState::Pending,
        "awaiting_approval" => JobState::AwaitingApproval,
        "approved" => JobState::Approved,
        "queued" => JobState::Queued,
        "processing" => JobState::Processing,
        "completed" => JobState::Completed,
        "failed" => JobState::Failed,
        "cancelled" => JobState::Cancelled,
        _ => JobState::Expired,
    }
}

fn state_str(state: JobState) -> &'static str {
    match state {
        JobState::Submitted => "submitted",
        JobState::Pending => "pending",
        JobState::AwaitingApproval => "awaiting_approval",
        JobState::Approved => "approved",
        JobState::Queued => "queued",
        JobState::Processing => "processing",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
        JobState::Cancelled => "cancelled",
        JobState::Expired => "expired",
    }
}

#[async_trait]
impl RelationalStore for PostgresRelationalStore {
    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, kind, owner, ontology, submitted_at, state, cost_estimate, chunk_plan,
                processing_mode, progress, result, error, dedup_key, force, approval_deadline,
                terminal_at, client_request_id, worker_id, retry_count
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
            "#,
        )
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(&job.owner)
        .bind(&job.ontology)
        .bind(job.submitted_at)
        .bind(state_str(job.state))
        .bind(job.cost_estimate.as_ref().map(serde_json::to_value).transpose()?)
        .bind(job.chunk_plan.as_ref().map(serde_json::to_value).transpose()?)
        .bind(if job.processing_mode == ProcessingMode::Parallel {
            "parallel"
        } else {
            "serial"
        })
        .bind(serde_json::to_value(&job.progress)?)
        .bind(job.result.as_ref().map(serde_json::to_value).transpose()?)
        .bind(job.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(&job.dedup_key)
        .bind(job.force)
        .bind(job.approval_deadline)
        .bind(job.terminal_at)
        .bind(&job.client_request_id)
        .bind(&job.worker_id)
        .bind(job.retry_count as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn find_job_by_dedup_key(
        &self,
        dedup_key: &str,
        ontology: &str,
    ) -> StoreResult<Option<Job>> {
        let row = sqlx::query(
            "SELECT * FROM jobs WHERE dedup_key = $1 AND ontology = $2 AND state IN ('completed','failed','cancelled','expired') ORDER BY submitted_at DESC LIMIT 1",
        )
        .bind(dedup_key)
        .bind(ontology)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list_jobs(&self, filter: JobFilter, page: Pagination) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::text IS NULL OR owner = $2)
              AND ($3::text IS NULL OR ontology = $3)
            ORDER BY submitted_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.state.map(state_str))
        .bind(&filter.owner)
        .bind(&filter.ontology)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn update_state_atomically(
        &self,
        id: Uuid,
        from: JobState,
        to: JobState,
        patch: JobPatch,
    ) -> StoreResult<bool> {
        let progress = patch.progress.as_ref().map(serde_json::to_value).transpose()?;
        let result = patch.result.as_ref().map(serde_json::to_value).transpose()?;
        let error = patch.error.as_ref().map(serde_json::to_value).transpose()?;
        let worker_id = patch.worker_id.clone().flatten();
        let approval_deadline = patch.approval_deadline.flatten();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                state = $1,
                progress = COALESCE($2, progress),
                result = COALESCE($3, result),
                error = COALESCE($4, error),
                worker_id = CASE WHEN $5 THEN $6 ELSE worker_id END,
                terminal_at = COALESCE($7, terminal_at),
                retry_count = COALESCE($8, retry_count),
                approval_deadline = CASE WHEN $9 THEN $10 ELSE approval_deadline END
            WHERE id = $11 AND state = $12
            "#,
        )
        .bind(state_str(to))
        .bind(progress)
        .bind(result)
        .bind(error)
        .bind(patch.worker_id.is_some())
        .bind(worker_id)
        .bind(patch.terminal_at)
        .bind(patch.retry_count.map(|v| v as i32))
        .bind(patch.approval_deadline.is_some())
        .bind(approval_deadline)
        .bind(id)
        .bind(state_str(from))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn save_progress_snapshot(&self, id: Uuid, progress: Progress) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET progress = $1 WHERE id = $2")
            .bind(serde_json::to_value(&progress)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn garbage_collect_jobs(
        &self,
        older_than: DateTime<Utc>,
        states: &[JobState],
    ) -> StoreResult<u64> {
        let state_strs: Vec<&str> = states.iter().copied().map(state_str).collect();
        let result = sqlx::query(
            "DELETE FROM jobs WHERE state = ANY($1) AND terminal_at < $2",
        )
        .bind(&state_strs)
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_source_embedding(&self, row: SourceEmbedding) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO source_embeddings (
                source_id, chunk_index, strategy, start_byte, end_byte, chunk_text,
                chunk_hash, source_hash, embedding, model, dims, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            ON CONFLICT (source_id, chunk_index, strategy) DO UPDATE SET
                start_byte = EXCLUDED.start_byte,
                end_byte = EXCLUDED.end_byte,
                chunk_text = EXCLUDED.chunk_text,
                chunk_hash = EXCLUDED.chunk_hash,
                source_hash = EXCLUDED.source_hash,
                embedding = EXCLUDED.embedding,
                model = EXCLUDED.model,
                dims = EXCLUDED.dims,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(row.source_id)
        .bind(row.chunk_index as i32)
        .bind(&row.strategy)
        .bind(row.start_byte as i32)
        .bind(row.end_byte as i32)
        .bind(&row.chunk_text)
        .bind(&row.chunk_hash)
        .bind(&row.source_hash)
        .bind(serde_json::to_value(&row.embedding)?)
        .bind(&row.model)
        .bind(row.dims as i32)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn source_embeddings_for(&self, source_id: Uuid) -> StoreResult<Vec<SourceEmbedding>> {
        let rows = sqlx::query(
            "SELECT * FROM source_embeddings WHERE source_id = $1 ORDER BY chunk_index",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_source_embedding).collect()
    }

    async fn delete_source_embeddings_for(&self, source_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM source_embeddings WHERE source_id = $1")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stale_or_missing_sources(&self, selector: RegenSelector) -> StoreResult<Vec<Source>> {
        let rows = match &selector {
            RegenSelector::All => {
                sqlx::query(
                    r#"
                    SELECT s.* FROM sources s
                    WHERE s.content_hash IS NULL
                       OR EXISTS (
                           SELECT 1 FROM source_embeddings se
                           WHERE se.source_id = s.id AND se.source_hash <> s.content_hash
                       )
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
            RegenSelector::Ontology(ontology) => {
                sqlx::query(
                    r#"
                    SELECT s.* FROM sources s
                    WHERE s.ontology = $1
                      AND (s.content_hash IS NULL
                       OR EXISTS (
                           SELECT 1 FROM source_embeddings se
                           WHERE se.source_id = s.id AND se.source_hash <> s.content_hash
                       ))
                    "#,
                )
                .bind(ontology)
                .fetch_all(&self.pool)
                .await?
            }
            RegenSelector::Source(id) => {
                sqlx::query("SELECT * FROM sources WHERE id = $1")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Source {
                id: row.try_get("id")?,
                ontology: row.try_get("ontology")?,
                document_name: row.try_get("document_name")?,
                paragraph_index: row.try_get::<i32, _>("paragraph_index")? as usize,
                full_text: row.try_get("full_text")?,
                content_hash: row.try_get("content_hash")?,
                object_store_pointer: row.try_get("object_store_pointer")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(out)
    }

    async fn search_source_embeddings(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> StoreResult<Vec<SourceEmbeddingMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT se.*, s.content_hash AS source_content_hash
            FROM source_embeddings se
            LEFT JOIN sources s ON s.id = se.source_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding_row = Self::row_to_source_embedding(row)?;
            let similarity = cosine_similarity(&embedding_row.embedding, query_embedding);
            let source_content_hash: Option<String> = row.try_get("source_content_hash")?;
            let is_stale = source_content_hash
                .map(|h| h != embedding_row.source_hash)
                .unwrap_or(true);
            scored.push(SourceEmbeddingMatch {
                embedding_row,
                similarity,
                is_stale,
            });
        }
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn create_artifact(&self, artifact: Artifact) -> StoreResult<()> {
        let (payload_kind, payload) = match &artifact.payload {
            ArtifactPayload::Inline(value) => ("inline", value.clone()),
            ArtifactPayload::ObjectStore { key } => {
                ("object_store", serde_json::to_value(key)?)
            }
        };
        sqlx::query(
            r#"
            INSERT INTO artifacts (
                id, artifact_type, owner, params, payload_kind, payload, created_at,
                graph_epoch, expires_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(artifact.id)
        .bind(&artifact.artifact_type)
        .bind(&artifact.owner)
        .bind(&artifact.params)
        .bind(payload_kind)
        .bind(payload)
        .bind(artifact.created_at)
        .bind(artifact.graph_epoch)
        .bind(artifact.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_artifact(&self, id: Uuid) -> StoreResult<Option<Artifact>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_artifact).transpose()
    }

    async fn list_artifacts(&self, filter: ArtifactFilter) -> StoreResult<Vec<Artifact>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM artifacts
            WHERE ($1::text IS NULL OR artifact_type = $1)
              AND ($2::text IS NULL OR owner = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(&filter.artifact_type)
        .bind(&filter.owner)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::row_to_artifact(row)?);
        }
        if let Some(stale_only) = filter.stale_only {
            let current_epoch_row = sqlx::query("SELECT value FROM graph_epoch WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;
            let current_epoch: i64 = current_epoch_row.try_get("value")?;
            out.retain(|a| a.is_stale(current_epoch) == stale_only);
        }
        Ok(out)
    }

    async fn delete_artifact(&self, id: Uuid) -> StoreResult<Option<Artifact>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let artifact = row.as_ref().map(Self::row_to_artifact).transpose()?;
        if artifact.is_some() {
            sqlx::query("DELETE FROM artifacts WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(artifact)
    }

    async fn get_config_value(&self, key: &str) -> StoreResult<Option<Value>> {
        let row = sqlx::query("SELECT value FROM config_kv WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<Value, _>("value")).transpose().map_err(Into::into)
    }

    async fn set_config_value(&self, key: &str, value: Value) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO config_kv (key, value) VALUES ($1, $2) ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
