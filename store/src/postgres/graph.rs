use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use stratum_models::{Concept, Instance, Relationship, Source};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::graph::{GraphStore, PathMatch, RelationshipMergeOutcome};
use crate::util::cosine_similarity;

/// Postgres-backed `GraphStore`, following `the platform's database crate`'s
/// `Database::new` pool-construction pattern and
/// `graph_rag::graph_db::operations::GraphOperations`'s query shape
/// (spec.md §4.A). Embeddings are stored as `jsonb` float arrays rather than
/// a `pgvector` column — the teacher stack carries no `pgvector` dependency,
/// so similarity ranking is done application-side after a per-ontology scan,
/// same as `InMemoryGraphStore` (see DESIGN.md).
pub struct PostgresGraphStore {
    pool: PgPool,
}

impl PostgresGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_concept(row: &sqlx::postgres::PgRow) -> StoreResult<Concept> {
        let search_terms: serde_json::Value = row.try_get("search_terms")?;
        let embedding: serde_json::Value = row.try_get("embedding")?;
        let provenance: serde_json::Value = row.try_get("provenance")?;
        Ok(Concept {
            id: row.try_get("id")?,
            ontology: row.try_get("ontology")?,
            label: row.try_get("label")?,
            search_terms: serde_json::from_value(search_terms)?,
            description: row.try_get("description")?,
            embedding: serde_json::from_value(embedding)?,
            provenance: serde_json::from_value(provenance)?,
        })
    }

    fn row_to_source(row: &sqlx::postgres::PgRow) -> StoreResult<Source> {
        Ok(Source {
            id: row.try_get("id")?,
            ontology: row.try_get("ontology")?,
            document_name: row.try_get("document_name")?,
            paragraph_index: row.try_get::<i32, _>("paragraph_index")? as usize,
            full_text: row.try_get("full_text")?,
            content_hash: row.try_get("content_hash")?,
            object_store_pointer: row.try_get("object_store_pointer")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl GraphStore for PostgresGraphStore {
    async fn top_k_similar_concepts(
        &self,
        ontology: &str,
        embedding: &[f32],
        k: usize,
    ) -> StoreResult<Vec<(Concept, f32)>> {
        let rows = sqlx::query("SELECT * FROM concepts WHERE ontology = $1")
            .bind(ontology)
            .fetch_all(&self.pool)
            .await?;
        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let concept = Self::row_to_concept(row)?;
            let score = cosine_similarity(&concept.embedding, embedding);
            scored.push((concept, score));
        }
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn find_concept(&self, id: Uuid) -> StoreResult<Option<Concept>> {
        let row = sqlx::query("SELECT * FROM concepts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_concept).transpose()
    }

    async fn create_concept(&self, concept: Concept) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO concepts (id, ontology, label, search_terms, description, embedding, provenance)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(concept.id)
        .bind(&concept.ontology)
        .bind(&concept.label)
        .bind(serde_json::to_value(&concept.search_terms)?)
        .bind(&concept.description)
        .bind(serde_json::to_value(&concept.embedding)?)
        .bind(serde_json::to_value(&concept.provenance)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn extend_search_terms(&self, concept_id: Uuid, terms: &[String]) -> StoreResult<()> {
        let Some(row) = sqlx::query("SELECT search_terms FROM concepts WHERE id = $1")
            .bind(concept_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Err(StoreError::NotFound(format!("concept {concept_id}")));
        };
        let existing: serde_json::Value = row.try_get("search_terms")?;
        let mut set: HashSet<String> = serde_json::from_value(existing)?;
        set.extend(terms.iter().cloned());
        let merged: Vec<String> = set.into_iter().collect();
        sqlx::query("UPDATE concepts SET search_terms = $1 WHERE id = $2")
            .bind(serde_json::to_value(&merged)?)
            .bind(concept_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_provenance(&self, concept_id: Uuid, source_id: Uuid) -> StoreResult<()> {
        let Some(row) = sqlx::query("SELECT provenance FROM concepts WHERE id = $1")
            .bind(concept_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Err(StoreError::NotFound(format!("concept {concept_id}")));
        };
        let existing: serde_json::Value = row.try_get("provenance")?;
        let mut set: HashSet<Uuid> = serde_json::from_value(existing)?;
        set.insert(source_id);
        sqlx::query("UPDATE concepts SET provenance = $1 WHERE id = $2")
            .bind(serde_json::to_value(&set)?)
            .bind(concept_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_evidence(&self, instance: Instance) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO instances (id, concept_id, source_id, quote) VALUES ($1, $2, $3, $4)",
        )
        .bind(instance.id)
        .bind(instance.concept_id)
        .bind(instance.source_id)
        .bind(&instance.quote)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_relationship(
        &self,
        relationship: Relationship,
    ) -> StoreResult<RelationshipMergeOutcome> {
        let existing = sqlx::query(
            "SELECT confidence, provenance FROM relationships WHERE from_concept_id = $1 AND to_concept_id = $2 AND relation_type = $3",
        )
        .bind(relationship.from_concept_id)
        .bind(relationship.to_concept_id)
        .bind(&relationship.relation_type)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(row) => {
                let current_confidence: f32 = row.try_get("confidence")?;
                let existing_provenance: serde_json::Value = row.try_get("provenance")?;
                let mut provenance: HashSet<Uuid> = serde_json::from_value(existing_provenance)?;
                provenance.extend(relationship.provenance);
                let confidence = current_confidence.max(relationship.confidence);
                sqlx::query(
                    "UPDATE relationships SET confidence = $1, provenance = $2 WHERE from_concept_id = $3 AND to_concept_id = $4 AND relation_type = $5",
                )
                .bind(confidence)
                .bind(serde_json::to_value(&provenance)?)
                .bind(relationship.from_concept_id)
                .bind(relationship.to_concept_id)
                .bind(&relationship.relation_type)
                .execute(&self.pool)
                .await?;
                Ok(RelationshipMergeOutcome::Merged)
            }
            None => {
                sqlx::query(
                    "INSERT INTO relationships (from_concept_id, to_concept_id, relation_type, confidence, provenance) VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(relationship.from_concept_id)
                .bind(relationship.to_concept_id)
                .bind(&relationship.relation_type)
                .bind(relationship.confidence)
                .bind(serde_json::to_value(&relationship.provenance)?)
                .execute(&self.pool)
                .await?;
                Ok(RelationshipMergeOutcome::Created)
            }
        }
    }

    async fn create_source(&self, source: Source) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, ontology, document_name, paragraph_index, full_text, content_hash, object_store_pointer, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(source.id)
        .bind(&source.ontology)
        .bind(&source.document_name)
        .bind(source.paragraph_index as i32)
        .bind(&source.full_text)
        .bind(&source.content_hash)
        .bind(&source.object_store_pointer)
        .bind(source.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_source).transpose()
    }

    async fn update_source_full_text(
        &self,
        id: Uuid,
        full_text: String,
        content_hash: String,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE sources SET full_text = $1, content_hash = $2 WHERE id = $3",
        )
        .bind(&full_text)
        .bind(&content_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("source {id}")));
        }
        Ok(())
    }

    async fn update_source_content_hash(&self, id: Uuid, content_hash: String) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sources SET content_hash = $1 WHERE id = $2")
            .bind(&content_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("source {id}")));
        }
        Ok(())
    }

    async fn delete_ontology_cascade(&self, ontology: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM instances WHERE concept_id IN (SELECT id FROM concepts WHERE ontology = $1)",
        )
        .bind(ontology)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM relationships WHERE from_concept_id IN (SELECT id FROM concepts WHERE ontology = $1) OR to_concept_id IN (SELECT id FROM concepts WHERE ontology = $1)",
        )
        .bind(ontology)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM concepts WHERE ontology = $1")
            .bind(ontology)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sources WHERE ontology = $1")
            .bind(ontology)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_paths(
        &self,
        from: Uuid,
        to: Uuid,
        max_hops: u32,
        k: usize,
    ) -> StoreResult<Vec<PathMatch>> {
        // Bounded recursive CTE over relationships, following
        // `graph_rag::graph_db::operations::find_related_entities`'s shape.
        let rows = sqlx::query(
            r#"
            WITH RECURSIVE walk AS (
                SELECT
                    ARRAY[from_concept_id, to_concept_id] AS path,
                    ARRAY[relation_type] AS rel_types,
                    to_concept_id AS current,
                    1 AS depth
                FROM relationships
                WHERE from_concept_id = $1

                UNION ALL

                SELECT
                    w.path || r.to_concept_id,
                    w.rel_types || r.relation_type,
                    r.to_concept_id,
                    w.depth + 1
                FROM relationships r
                JOIN walk w ON r.from_concept_id = w.current
                WHERE w.depth < $3 AND NOT r.to_concept_id = ANY(w.path)
            )
            SELECT path, rel_types FROM walk WHERE current = $2 LIMIT $4
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(max_hops as i32)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let concept_ids: Vec<Uuid> = row.try_get("path")?;
            let relation_types: Vec<String> = row.try_get("rel_types")?;
            out.push(PathMatch {
                concept_ids,
                relation_types,
            });
        }
        Ok(out)
    }

    async fn search_concepts(
        &self,
        ontology: Option<&str>,
        query_embedding: &[f32],
        min_similarity: f32,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<(Concept, f32)>> {
        let rows = match ontology {
            Some(ontology) => {
                sqlx::query("SELECT * FROM concepts WHERE ontology = $1")
                    .bind(ontology)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query("SELECT * FROM concepts").fetch_all(&self.pool).await?,
        };
        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let concept = Self::row_to_concept(row)?;
            let score = cosine_similarity(&concept.embedding, query_embedding);
            if score >= min_similarity {
                scored.push((concept, score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().skip(offset).take(limit).collect())
    }

    async fn evidence_count(&self, concept_id: Uuid) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM instances WHERE concept_id = $1")
            .bind(concept_id)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn bump_graph_epoch(&self) -> StoreResult<i64> {
        let row = sqlx::query(
            "UPDATE graph_epoch SET value = value + 1 WHERE id = 1 RETURNING value",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("value")?)
    }

    async fn current_graph_epoch(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT value FROM graph_epoch WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("value")?)
    }

    async fn recent_concepts(&self, ontology: &str, limit: usize) -> StoreResult<Vec<Concept>> {
        let rows = sqlx::query(
            "SELECT * FROM concepts WHERE ontology = $1 ORDER BY created_at DESC NULLS LAST LIMIT $2",
        )
        .bind(ontology)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::row_to_concept(row)?);
        }
        Ok(out)
    }
}
