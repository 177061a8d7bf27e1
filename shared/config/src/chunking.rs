use serde::{Deserialize, Serialize};

/// Default sizing for ingestion and sentence chunking (spec.md §4.C),
/// overridable per submission via `IngestSubmission::target_words` /
/// `overlap_words`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingDefaults {
    pub target_words: usize,
    pub overlap_words: usize,
    pub sentence_max_chars: usize,
}

impl Default for ChunkingDefaults {
    fn default() -> Self {
        Self {
            target_words: 1000,
            overlap_words: 200,
            sentence_max_chars: 500,
        }
    }
}

impl ChunkingDefaults {
    pub fn from_env() -> Self {
        Self {
            target_words: env_usize("CHUNK_TARGET_WORDS", 1000),
            overlap_words: env_usize("CHUNK_OVERLAP_WORDS", 200),
            sentence_max_chars: env_usize("SENTENCE_CHUNK_MAX_CHARS", 500),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
