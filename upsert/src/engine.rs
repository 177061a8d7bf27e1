use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use stratum_chunker::chunk_ingestion;
use stratum_config::thresholds::MatchThresholds;
use stratum_config::vocabulary::RelationshipAllowlist;
use stratum_jobs::WorkerContext;
use stratum_matcher::{MatchDecision, VectorMatcher};
use stratum_models::{
    Concept, ContextConcept, EventLevel, ExtractionContext, IngestionStats, Instance,
    ProcessingMode, Relationship, Source,
};
use stratum_provider::{Embedder, Extractor, ProviderResult};
use stratum_store::{GraphStore, RelationshipMergeOutcome};
use uuid::Uuid;

use crate::error::{UpsertError, UpsertResult};

/// Chunks of the growing graph the extractor is shown, per spec.md §4.E
/// step 2 ("up to the N most recent concepts").
const CONTEXT_WINDOW: usize = 20;
/// Bound on concurrently in-flight chunks in parallel mode — a courtesy to
/// the provider and graph store, not a correctness requirement.
const PARALLEL_CONCURRENCY: usize = 8;

/// Per-chunk counters, folded into the document-level `IngestionStats`
/// after each chunk commits (spec.md §4.E step 7).
#[derive(Debug, Default)]
struct ChunkDelta {
    concepts_created: u64,
    concepts_matched: u64,
    relationships_created: u64,
    relationships_merged: u64,
    relationships_dropped: u64,
    evidence_appended: u64,
    warnings: Vec<String>,
}

impl ChunkDelta {
    fn counters(&self) -> HashMap<String, u64> {
        let mut map = HashMap::new();
        map.insert("concepts_created".to_string(), self.concepts_created);
        map.insert("concepts_matched".to_string(), self.concepts_matched);
        map.insert("relationships_created".to_string(), self.relationships_created);
        map.insert("relationships_merged".to_string(), self.relationships_merged);
        map.insert("relationships_dropped".to_string(), self.relationships_dropped);
        map.insert("evidence_appended".to_string(), self.evidence_appended);
        map
    }
}

fn fold(stats: &mut IngestionStats, delta: &ChunkDelta) {
    stats.concepts_created += delta.concepts_created;
    stats.concepts_matched += delta.concepts_matched;
    stats.relationships_created += delta.relationships_created;
    stats.relationships_merged += delta.relationships_merged;
    stats.relationships_dropped += delta.relationships_dropped;
    stats.evidence_appended += delta.evidence_appended;
}

/// Tagged outcome of processing one document, following the worker-function
/// convention spec.md §9 prescribes ("return a tagged result type
/// `(Done | Failed{cause} | Cancelled{partial})`") rather than exceptions.
#[derive(Debug)]
pub enum DocumentOutcome {
    Completed {
        stats: IngestionStats,
        warnings: Vec<String>,
    },
    Failed {
        stats: IngestionStats,
        warnings: Vec<String>,
        chunk_index: Option<usize>,
        error: UpsertError,
    },
    Cancelled {
        stats: IngestionStats,
        warnings: Vec<String>,
    },
}

/// The recursive upsert engine (spec.md §4.E): per ingestion chunk, embed →
/// assemble context → extract → match-or-create concepts → resolve and
/// merge relationships → bump the graph epoch → emit progress. Grounded on
/// `graph_rag::services::chunk_processor::ChunkProcessor::process_chunks`
/// (extract → fuse → link loop) and
/// `graph_rag::knowledge_fusion::fusion_engine::FusionEngine::fuse_entities`
/// (the match-or-create step, generalized here from entity deduplication
/// alone to the full concept/relationship/evidence pipeline, driven by
/// `stratum-matcher` instead of `EntityResolver`).
pub struct UpsertEngine {
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    matcher: VectorMatcher,
    allowlist: RelationshipAllowlist,
    retry_budget: u32,
}

impl UpsertEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        thresholds: MatchThresholds,
        allowlist: RelationshipAllowlist,
        retry_budget: u32,
    ) -> Self {
        let matcher = VectorMatcher::new(graph.clone(), thresholds);
        Self {
            graph,
            embedder,
            extractor,
            matcher,
            allowlist,
            retry_budget,
        }
    }

    /// Retry a provider call on `ProviderError::Unavailable` with
    /// exponential backoff, up to `retry_budget` attempts per call
    /// (spec.md §7 "retried with exponential backoff up to a per-job
    /// budget"). `ProviderError::InvalidRequest` is never retried.
    async fn with_retry<T, F, Fut>(&self, mut f: F) -> UpsertResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.retry_budget.max(1) => {
                    attempt += 1;
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
                    tracing::warn!(attempt, error = %err, "retrying provider call after transient failure");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(UpsertError::Provider(err)),
            }
        }
    }

    /// Chunk `full_text`, then run every chunk through the engine in the
    /// requested `mode` (spec.md §4.E "Processing mode").
    pub async fn process_document(
        &self,
        ontology: &str,
        document_name: &str,
        full_text: &str,
        target_words: usize,
        overlap_words: usize,
        mode: ProcessingMode,
        ctx: &WorkerContext,
    ) -> DocumentOutcome {
        let chunks = chunk_ingestion(full_text, target_words, overlap_words);
        let total = chunks.len();
        let mut stats = IngestionStats {
            chunks_total: total,
            ..Default::default()
        };
        let mut warnings = Vec::new();

        match mode {
            ProcessingMode::Serial => {
                for chunk in chunks {
                    if ctx.is_cancelled() {
                        return DocumentOutcome::Cancelled { stats, warnings };
                    }
                    match self
                        .process_chunk(ontology, document_name, chunk.paragraph_index, &chunk.text, ctx)
                        .await
                    {
                        Ok(delta) => {
                            fold(&mut stats, &delta);
                            stats.chunks_done += 1;
                            warnings.extend(delta.warnings.iter().cloned());
                            ctx.emit("ingest", stats.chunks_done, total, None, delta.counters(), EventLevel::Info);
                        }
                        Err(UpsertError::Cancelled) => return DocumentOutcome::Cancelled { stats, warnings },
                        Err(error) => {
                            return DocumentOutcome::Failed {
                                stats,
                                warnings,
                                chunk_index: Some(chunk.index),
                                error,
                            };
                        }
                    }
                }
                DocumentOutcome::Completed { stats, warnings }
            }
            ProcessingMode::Parallel => {
                // Chunks run concurrently (spec.md §4.E "Parallel"): each
                // builds its own label-to-id map against whatever context
                // snapshot existed when it started, so near-duplicate
                // concepts are possible — a later consolidation pass
                // (out of scope here) resolves them. Unlike serial mode,
                // a chunk failure does not stop the others; the job is
                // still marked failed overall if any chunk failed
                // (spec.md §4.E "Failure within a chunk").
                let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
                let results: Vec<(usize, UpsertResult<ChunkDelta>)> = stream::iter(chunks)
                    .map(|chunk| async move {
                        let result = self
                            .process_chunk(ontology, document_name, chunk.paragraph_index, &chunk.text, ctx)
                            .await;
                        (chunk.index, result)
                    })
                    .buffer_unordered(PARALLEL_CONCURRENCY)
                    .collect()
                    .await;
                debug_assert_eq!(results.len(), indices.len());

                let mut cancelled = false;
                let mut first_failure: Option<(usize, UpsertError)> = None;
                for (index, result) in results {
                    match result {
                        Ok(delta) => {
                            fold(&mut stats, &delta);
                            stats.chunks_done += 1;
                            warnings.extend(delta.warnings.iter().cloned());
                            ctx.emit("ingest", stats.chunks_done, total, None, delta.counters(), EventLevel::Info);
                        }
                        Err(UpsertError::Cancelled) => cancelled = true,
                        Err(error) => {
                            if first_failure.is_none() {
                                first_failure = Some((index, error));
                            }
                        }
                    }
                }

                if cancelled {
                    return DocumentOutcome::Cancelled { stats, warnings };
                }
                if let Some((index, error)) = first_failure {
                    return DocumentOutcome::Failed {
                        stats,
                        warnings,
                        chunk_index: Some(index),
                        error,
                    };
                }
                DocumentOutcome::Completed { stats, warnings }
            }
        }
    }

    /// Run steps 1-6 of spec.md §4.E for a single ingestion chunk.
    /// Cancellation is checked at the top of the chunk and before every
    /// provider call (spec.md §5 "Suspension points").
    async fn process_chunk(
        &self,
        ontology: &str,
        document_name: &str,
        paragraph_index: usize,
        chunk_text: &str,
        ctx: &WorkerContext,
    ) -> UpsertResult<ChunkDelta> {
        if ctx.is_cancelled() {
            return Err(UpsertError::Cancelled);
        }

        // spec.md §3 "Source" is created during ingestion, one row per
        // ingestion chunk.
        let source = Source {
            id: Uuid::new_v4(),
            ontology: ontology.to_string(),
            document_name: document_name.to_string(),
            paragraph_index,
            full_text: chunk_text.to_string(),
            content_hash: None,
            object_store_pointer: None,
            created_at: Utc::now(),
        };
        self.graph.create_source(source.clone()).await?;

        // Step 1 (diagnostic only — spec.md §4.E "used for logging/diagnostic").
        if let Ok(mut embeddings) = self.with_retry(|| self.embedder.embed(&[chunk_text.to_string()])).await {
            if let Some(vector) = embeddings.pop() {
                tracing::debug!(source_id = %source.id, dims = vector.len(), "diagnostic chunk embedding computed");
            }
        }

        if ctx.is_cancelled() {
            return Err(UpsertError::Cancelled);
        }

        // Step 2: assemble context from the current graph.
        let recent = self.graph.recent_concepts(ontology, CONTEXT_WINDOW).await?;
        let context = ExtractionContext {
            recent_concepts: recent
                .into_iter()
                .map(|c| ContextConcept {
                    id: c.id,
                    label: c.label,
                    description: c.description,
                })
                .collect(),
        };

        if ctx.is_cancelled() {
            return Err(UpsertError::Cancelled);
        }

        // Step 3: extract.
        let extraction = self.with_retry(|| self.extractor.extract(chunk_text, &context)).await?;

        let mut delta = ChunkDelta::default();
        let mut label_to_id: HashMap<String, Uuid> = HashMap::new();

        // Step 4: match-or-create each extracted concept.
        for extracted in &extraction.concepts {
            if ctx.is_cancelled() {
                return Err(UpsertError::Cancelled);
            }

            let embed_text = if extracted.search_terms.is_empty() {
                extracted.label.clone()
            } else {
                format!("{} {}", extracted.label, extracted.search_terms.join(" "))
            };
            let mut embeddings = self.with_retry(|| self.embedder.embed(&[embed_text.clone()])).await?;
            let embedding = embeddings.pop().unwrap_or_default();

            let decision = self.matcher.match_candidate(ontology, &embedding).await?;
            let concept_id = match decision {
                MatchDecision::Matched(existing, _score) => {
                    self.graph.extend_search_terms(existing.id, &extracted.search_terms).await?;
                    self.graph.add_provenance(existing.id, source.id).await?;
                    delta.concepts_matched += 1;
                    existing.id
                }
                // Ambiguous matches are left for a human via the (out of
                // scope) MCP tool surface; the ingestion pipeline treats
                // them the same as no match (spec.md §4.D step 4).
                MatchDecision::Ambiguous(_) | MatchDecision::NoMatch => {
                    let id = Uuid::new_v4();
                    let concept = Concept {
                        id,
                        ontology: ontology.to_string(),
                        label: extracted.label.clone(),
                        search_terms: extracted.search_terms.clone(),
                        description: extracted.description.clone(),
                        embedding,
                        provenance: std::iter::once(source.id).collect(),
                    };
                    self.graph.create_concept(concept).await?;
                    delta.concepts_created += 1;
                    id
                }
            };

            let instance = Instance {
                id: Uuid::new_v4(),
                concept_id,
                source_id: source.id,
                quote: extracted.quote.clone(),
            };
            self.graph.append_evidence(instance).await?;
            delta.evidence_appended += 1;
            label_to_id.insert(extracted.label.clone(), concept_id);
        }

        // Step 5: resolve and merge relationships.
        for rel in &extraction.relationships {
            if ctx.is_cancelled() {
                return Err(UpsertError::Cancelled);
            }

            let (Some(&from), Some(&to)) = (label_to_id.get(&rel.from_label), label_to_id.get(&rel.to_label)) else {
                delta.relationships_dropped += 1;
                delta.warnings.push(format!(
                    "dropped relationship {} -[{}]-> {}: unresolved endpoint label",
                    rel.from_label, rel.relation_type, rel.to_label
                ));
                continue;
            };

            let relation_type = rel.relation_type.to_uppercase();
            if !self.allowlist.is_allowed(&relation_type) {
                delta.relationships_dropped += 1;
                delta.warnings.push(format!(
                    "dropped relationship {} -[{}]-> {}: type not in allowlist",
                    rel.from_label, relation_type, rel.to_label
                ));
                continue;
            }

            let relationship = Relationship {
                from_concept_id: from,
                to_concept_id: to,
                relation_type,
                confidence: rel.confidence,
                provenance: std::iter::once(source.id).collect(),
            };
            match self.graph.upsert_relationship(relationship).await? {
                RelationshipMergeOutcome::Created => delta.relationships_created += 1,
                RelationshipMergeOutcome::Merged => delta.relationships_merged += 1,
            }
        }

        // Step 6: bump the global graph_change_counter once per committed chunk.
        self.graph.bump_graph_epoch().await?;

        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_jobs::{CancellationRegistry, NullProgressSink};
    use stratum_provider::mock::{MockMode, MockProvider};
    use stratum_store::InMemoryGraphStore;

    fn ctx() -> (WorkerContext, Arc<CancellationRegistry>) {
        let registry = Arc::new(CancellationRegistry::new());
        let job_id = Uuid::new_v4();
        let token = registry.register(job_id);
        (
            WorkerContext {
                job_id,
                cancel: token,
                progress: Arc::new(NullProgressSink),
            },
            registry,
        )
    }

    fn engine(mode: MockMode, graph: Arc<dyn GraphStore>) -> UpsertEngine {
        let provider = Arc::new(MockProvider::new(16, mode));
        UpsertEngine::new(
            graph,
            provider.clone(),
            provider,
            MatchThresholds::default(),
            RelationshipAllowlist::default(),
            3,
        )
    }

    #[tokio::test]
    async fn serial_mode_processes_every_chunk_and_creates_concepts() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let engine = engine(MockMode::Default, graph.clone());
        let (worker_ctx, _registry) = ctx();

        let text = "Alpha exists. Beta follows alpha. Gamma follows beta.";
        let outcome = engine
            .process_document("T", "doc", text, 1000, 0, ProcessingMode::Serial, &worker_ctx)
            .await;

        match outcome {
            DocumentOutcome::Completed { stats, warnings } => {
                assert_eq!(stats.chunks_done, stats.chunks_total);
                assert!(stats.concepts_created >= 3);
                assert!(stats.relationships_created >= 1);
                assert!(warnings.is_empty());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parallel_mode_completes_all_chunks() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let engine = engine(MockMode::Simple, graph.clone());
        let (worker_ctx, _registry) = ctx();

        let words: Vec<String> = (0..4000).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let outcome = engine
            .process_document("T", "doc", &text, 500, 0, ProcessingMode::Parallel, &worker_ctx)
            .await;

        match outcome {
            DocumentOutcome::Completed { stats, .. } => {
                assert!(stats.chunks_total > 1);
                assert_eq!(stats.chunks_done, stats.chunks_total);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_before_first_chunk_yields_cancelled_outcome() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let engine = engine(MockMode::Default, graph.clone());
        let (worker_ctx, registry) = ctx();
        registry.cancel(worker_ctx.job_id);

        let outcome = engine
            .process_document("T", "doc", "Alpha exists. Beta follows.", 1000, 0, ProcessingMode::Serial, &worker_ctx)
            .await;

        match outcome {
            DocumentOutcome::Cancelled { stats, .. } => assert_eq!(stats.chunks_done, 0),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_ingestion_matches_rather_than_duplicates_concepts() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let engine = engine(MockMode::Simple, graph.clone());

        let (first_ctx, _r1) = ctx();
        let first = engine
            .process_document("T", "doc", "Distributed authority model.", 1000, 0, ProcessingMode::Serial, &first_ctx)
            .await;
        let DocumentOutcome::Completed { stats: first_stats, .. } = first else {
            panic!("expected first ingestion to complete");
        };
        assert_eq!(first_stats.concepts_created, 1);

        let (second_ctx, _r2) = ctx();
        let second = engine
            .process_document("T", "doc", "Distributed authority model.", 1000, 0, ProcessingMode::Serial, &second_ctx)
            .await;
        let DocumentOutcome::Completed { stats: second_stats, .. } = second else {
            panic!("expected second ingestion to complete");
        };
        assert_eq!(second_stats.concepts_created, 0);
        assert_eq!(second_stats.concepts_matched, 1);
    }

    #[tokio::test]
    async fn relationship_with_disallowed_type_is_dropped_with_warning() {
        struct ForbiddenRelationExtractor;
        #[async_trait::async_trait]
        impl Extractor for ForbiddenRelationExtractor {
            async fn extract(
                &self,
                _chunk_text: &str,
                _context: &ExtractionContext,
            ) -> ProviderResult<stratum_models::ExtractionResult> {
                Ok(stratum_models::ExtractionResult {
                    concepts: vec![
                        stratum_models::ExtractedConcept {
                            label: "A".to_string(),
                            search_terms: vec![],
                            description: None,
                            quote: "A".to_string(),
                        },
                        stratum_models::ExtractedConcept {
                            label: "B".to_string(),
                            search_terms: vec![],
                            description: None,
                            quote: "B".to_string(),
                        },
                    ],
                    relationships: vec![stratum_models::ExtractedRelationship {
                        from_label: "A".to_string(),
                        to_label: "B".to_string(),
                        relation_type: "FROBNICATES".to_string(),
                        confidence: 0.9,
                    }],
                })
            }
        }

        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let provider = Arc::new(MockProvider::new(16, MockMode::Empty));
        let engine = UpsertEngine::new(
            graph,
            provider,
            Arc::new(ForbiddenRelationExtractor),
            MatchThresholds::default(),
            RelationshipAllowlist::default(),
            3,
        );
        let (worker_ctx, _registry) = ctx();

        let outcome = engine
            .process_document("T", "doc", "irrelevant", 1000, 0, ProcessingMode::Serial, &worker_ctx)
            .await;

        match outcome {
            DocumentOutcome::Completed { stats, warnings } => {
                assert_eq!(stats.relationships_dropped, 1);
                assert_eq!(stats.relationships_created, 0);
                assert!(warnings.iter().any(|w| w.contains("allowlist")));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn relationship_with_unresolved_endpoint_is_dropped_with_warning() {
        struct DanglingRelationExtractor;
        #[async_trait::async_trait]
        impl Extractor for DanglingRelationExtractor {
            async fn extract(
                &self,
                _chunk_text: &str,
                _context: &ExtractionContext,
            ) -> ProviderResult<stratum_models::ExtractionResult> {
                Ok(stratum_models::ExtractionResult {
                    concepts: vec![stratum_models::ExtractedConcept {
                        label: "A".to_string(),
                        search_terms: vec![],
                        description: None,
                        quote: "A".to_string(),
                    }],
                    relationships: vec![stratum_models::ExtractedRelationship {
                        from_label: "A".to_string(),
                        to_label: "Nonexistent".to_string(),
                        relation_type: "IMPLIES".to_string(),
                        confidence: 0.9,
                    }],
                })
            }
        }

        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let provider = Arc::new(MockProvider::new(16, MockMode::Empty));
        let engine = UpsertEngine::new(
            graph,
            provider,
            Arc::new(DanglingRelationExtractor),
            MatchThresholds::default(),
            RelationshipAllowlist::default(),
            3,
        );
        let (worker_ctx, _registry) = ctx();

        let outcome = engine
            .process_document("T", "doc", "irrelevant", 1000, 0, ProcessingMode::Serial, &worker_ctx)
            .await;

        match outcome {
            DocumentOutcome::Completed { stats, warnings } => {
                assert_eq!(stats.relationships_dropped, 1);
                assert!(warnings.iter().any(|w| w.contains("unresolved endpoint")));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }
}
