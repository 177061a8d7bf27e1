use sha2::{Digest, Sha256};

/// `sha256(text)` as a lowercase hex string — the integrity primitive used
/// throughout the ingestion pipeline: `Source.content_hash`,
/// `SourceEmbedding.chunk_hash`/`source_hash`, and the job dedup key
/// (spec.md §3, §4.F, §4.E "Duplicate detection").
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// The dedup key from spec.md §6: `sha256(canonicalize(text) || "\0" || ontology)`.
/// Canonicalization trims surrounding whitespace and collapses internal
/// runs of whitespace so trivially re-formatted resubmissions still hit the
/// same key.
pub fn dedup_key(text: &str, ontology: &str) -> String {
    let canonical = canonicalize(text);
    let mut buf = String::with_capacity(canonical.len() + 1 + ontology.len());
    buf.push_str(&canonical);
    buf.push('\0');
    buf.push_str(ontology);
    sha256_hex(&buf)
}

fn canonicalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex("hello"), sha256_hex("hello"));
        assert_ne!(sha256_hex("hello"), sha256_hex("world"));
    }

    #[test]
    fn dedup_key_ignores_whitespace_formatting() {
        let a = dedup_key("Hello   world.\n", "T");
        let b = dedup_key("Hello world.", "T");
        assert_eq!(a, b);
    }

    #[test]
    fn dedup_key_is_ontology_scoped() {
        let a = dedup_key("Hello world.", "T1");
        let b = dedup_key("Hello world.", "T2");
        assert_ne!(a, b);
    }
}
