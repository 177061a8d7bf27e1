use async_trait::async_trait;
use stratum_models::{ExtractedConcept, ExtractedRelationship, ExtractionContext, ExtractionResult};

use crate::error::ProviderResult;
use crate::{Embedder, Extractor};

/// Selects the shape of `MockExtractor`'s deterministic output (spec.md
/// §4.B "selectable by a mode flag (default/simple/complex/empty)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    #[default]
    Default,
    Simple,
    Complex,
    Empty,
}

/// A deterministic embedder and extractor requiring no network access or
/// API keys, so the ingestion pipeline and its tests can run standalone
/// (spec.md §4.B "mock provider").
pub struct MockProvider {
    dims: usize,
    mode: MockMode,
}

impl MockProvider {
    pub fn new(dims: usize, mode: MockMode) -> Self {
        Self { dims, mode }
    }

    pub fn with_mode(mode: MockMode) -> Self {
        Self::new(32, mode)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(32, MockMode::Default)
    }
}

/// Hash a string into a deterministic, L2-normalized embedding of `dims`
/// floats. Same input always yields the same output, satisfying the
/// `Embedder` "pure" contract for test providers (spec.md §4.B).
fn deterministic_embedding(text: &str, dims: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut vec = vec![0.0f32; dims];
    for (i, word) in text.split_whitespace().enumerate() {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        (i as u64).hash(&mut hasher);
        let h = hasher.finish();
        let slot = (h as usize) % dims;
        // Stable pseudo-random sign/magnitude derived from the hash.
        let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
        vec[slot] += sign * (((h >> 8) % 1000) as f32 / 1000.0 + 0.1);
    }
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
    vec
}

#[async_trait]
impl Embedder for MockProvider {
    async fn embed(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| deterministic_embedding(t, self.dims)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "mock-embedder-v1"
    }
}

#[async_trait]
impl Extractor for MockProvider {
    async fn extract(&self, chunk_text: &str, context: &ExtractionContext) -> ProviderResult<ExtractionResult> {
        match self.mode {
            MockMode::Empty => Ok(ExtractionResult::default()),
            MockMode::Simple => Ok(simple_extraction(chunk_text)),
            MockMode::Complex => Ok(complex_extraction(chunk_text, context)),
            MockMode::Default => Ok(default_extraction(chunk_text, context)),
        }
    }
}

/// One concept per capitalized multi-word phrase found in the chunk, no
/// relationships — enough for tests that only care about concept creation.
fn simple_extraction(chunk_text: &str) -> ExtractionResult {
    let label = first_sentence(chunk_text);
    ExtractionResult {
        concepts: vec![ExtractedConcept {
            label: label.clone(),
            search_terms: vec![],
            description: None,
            quote: label,
        }],
        relationships: vec![],
    }
}

/// Two concepts and a relationship between them, and — if prior context is
/// non-empty — a relationship back to the most recent prior concept, so
/// tests exercising cross-chunk closure have something to resolve.
fn complex_extraction(chunk_text: &str, context: &ExtractionContext) -> ExtractionResult {
    let sentences: Vec<&str> = chunk_text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let label_a = sentences.first().map(|s| s.to_string()).unwrap_or_else(|| "Concept A".to_string());
    let label_b = sentences.get(1).map(|s| s.to_string()).unwrap_or_else(|| "Concept B".to_string());

    let mut relationships = vec![ExtractedRelationship {
        from_label: label_a.clone(),
        to_label: label_b.clone(),
        relation_type: "SUPPORTS".to_string(),
        confidence: 0.9,
    }];

    if let Some(prior) = context.recent_concepts.first() {
        relationships.push(ExtractedRelationship {
            from_label: prior.label.clone(),
            to_label: label_a.clone(),
            relation_type: "ENABLES".to_string(),
            confidence: 0.7,
        });
    }

    ExtractionResult {
        concepts: vec![
            ExtractedConcept {
                label: label_a.clone(),
                search_terms: vec![],
                description: Some(format!("Extracted from: {label_a}")),
                quote: label_a,
            },
            ExtractedConcept {
                label: label_b.clone(),
                search_terms: vec![],
                description: Some(format!("Extracted from: {label_b}")),
                quote: label_b,
            },
        ],
        relationships,
    }
}

/// One concept per sentence in the chunk, chained by IMPLIES edges — the
/// default used by most unit and integration tests.
fn default_extraction(chunk_text: &str, _context: &ExtractionContext) -> ExtractionResult {
    let sentences: Vec<String> = chunk_text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let concepts: Vec<ExtractedConcept> = sentences
        .iter()
        .map(|s| ExtractedConcept {
            label: s.clone(),
            search_terms: vec![],
            description: None,
            quote: s.clone(),
        })
        .collect();

    let relationships = sentences
        .windows(2)
        .map(|pair| ExtractedRelationship {
            from_label: pair[0].clone(),
            to_label: pair[1].clone(),
            relation_type: "IMPLIES".to_string(),
            confidence: 0.8,
        })
        .collect();

    ExtractionResult { concepts, relationships }
}

fn first_sentence(text: &str) -> String {
    text.split(['.', '!', '?'])
        .next()
        .unwrap_or(text)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let mock = MockProvider::default();
        let a = mock.embed(&["Distributed Authority".to_string()]).await.unwrap();
        let b = mock.embed(&["Distributed Authority".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn empty_mode_extracts_nothing() {
        let mock = MockProvider::with_mode(MockMode::Empty);
        let result = mock.extract("Anything at all.", &ExtractionContext::default()).await.unwrap();
        assert!(result.concepts.is_empty());
        assert!(result.relationships.is_empty());
    }

    #[tokio::test]
    async fn default_mode_chains_sentence_concepts() {
        let mock = MockProvider::with_mode(MockMode::Default);
        let result = mock
            .extract("Alpha exists. Beta follows alpha.", &ExtractionContext::default())
            .await
            .unwrap();
        assert_eq!(result.concepts.len(), 2);
        assert_eq!(result.relationships.len(), 1);
    }
}
