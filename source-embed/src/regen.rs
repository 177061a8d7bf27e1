use std::sync::Arc;

use stratum_provider::Embedder;
use stratum_store::{GraphStore, RegenSelector, RelationalStore, StoreResult};

use crate::worker::SourceEmbedWorker;

/// Per-source outcome of a regeneration pass, reported so the caller can
/// drive a progress event (spec.md §4.F "with progress reporting").
#[derive(Debug, Clone)]
pub struct RegenOutcome {
    pub source_id: uuid::Uuid,
    pub rows_written: usize,
}

/// The same worker type as `SourceEmbedWorker`, parameterized by a selector
/// instead of a single `Source` (spec.md §4.F "Regeneration"). Covers both
/// legacy sources with a null `content_hash` and sources whose current hash
/// has drifted from what was recorded at embedding time.
pub struct RegenerationWorker {
    graph: Arc<dyn GraphStore>,
    relational: Arc<dyn RelationalStore>,
    worker: SourceEmbedWorker,
}

impl RegenerationWorker {
    pub fn new(graph: Arc<dyn GraphStore>, relational: Arc<dyn RelationalStore>, embedder: Arc<dyn Embedder>, sentence_max_chars: usize) -> Self {
        let worker = SourceEmbedWorker::new(graph.clone(), relational.clone(), embedder, sentence_max_chars);
        Self {
            graph,
            relational,
            worker,
        }
    }

    /// Run one sweep over `selector`, re-embedding every stale or missing
    /// source it names. `on_progress` is invoked after each source so the
    /// caller can emit a `ProgressEvent` and observe a cancellation flag
    /// between sources — the sweep does not itself know about jobs or the
    /// broker (spec.md §1 keeps those concerns in `stratum-jobs`).
    pub async fn run<F>(&self, selector: RegenSelector, mut on_progress: F) -> StoreResult<Vec<RegenOutcome>>
    where
        F: FnMut(&RegenOutcome) -> bool,
    {
        let stale = self.relational.stale_or_missing_sources(selector).await?;
        let mut outcomes = Vec::with_capacity(stale.len());

        for source in stale {
            let rows_written = self.worker.embed_source(&source).await?;
            let outcome = RegenOutcome {
                source_id: source.id,
                rows_written,
            };
            let keep_going = on_progress(&outcome);
            outcomes.push(outcome);
            if !keep_going {
                break;
            }
        }

        Ok(outcomes)
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stratum_models::Source;
    use stratum_provider::mock::MockProvider;
    use stratum_store::{InMemoryGraphStore, InMemoryRelationalStore};
    use uuid::Uuid;

    fn source(ontology: &str, text: &str, content_hash: Option<String>) -> Source {
        Source {
            id: Uuid::new_v4(),
            ontology: ontology.to_string(),
            document_name: "doc".to_string(),
            paragraph_index: 0,
            full_text: text.to_string(),
            content_hash,
            object_store_pointer: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn regenerates_a_single_named_source() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(MockProvider::default());

        let src = source("T", "Legacy source with no hash yet.", None);
        graph.create_source(src.clone()).await.unwrap();

        let regen = RegenerationWorker::new(graph.clone(), relational.clone(), embedder, 500);
        let outcomes = regen.run(RegenSelector::Source(src.id), |_| true).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].source_id, src.id);
        assert!(outcomes[0].rows_written >= 1);

        let updated = graph.get_source(src.id).await.unwrap().unwrap();
        assert!(updated.content_hash.is_some());
    }

    #[tokio::test]
    async fn stops_early_when_progress_callback_signals_stop() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(MockProvider::default());

        let a = source("T", "Source A body text.", None);
        let b = source("T", "Source B body text.", None);
        graph.create_source(a.clone()).await.unwrap();
        graph.create_source(b.clone()).await.unwrap();

        let regen = RegenerationWorker::new(graph.clone(), relational.clone(), embedder, 500);
        let outcomes = regen.run(RegenSelector::Source(a.id), |_| false).await.unwrap();
        assert_eq!(outcomes.len(), 1);
    }
}
