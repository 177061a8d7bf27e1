use stratum_models::IngestionChunk;

/// A word with the index of the paragraph (blank-line-delimited block) it
/// belongs to, used to stamp each emitted chunk with a `paragraph_index`.
struct PositionedWord<'a> {
    text: &'a str,
    paragraph_index: usize,
    /// True if a sentence terminator (`.`, `!`, `?`) ends this word, which
    /// makes it an acceptable break point when the window can't reach a
    /// paragraph boundary.
    ends_sentence: bool,
}

fn positioned_words(full_text: &str) -> Vec<PositionedWord<'_>> {
    let mut words = Vec::new();
    let mut paragraph_index = 0usize;
    let mut saw_blank = false;

    for line in full_text.lines() {
        if line.trim().is_empty() {
            if !words.is_empty() {
                saw_blank = true;
            }
            continue;
        }
        if saw_blank {
            paragraph_index += 1;
            saw_blank = false;
        }
        for word in line.split_whitespace() {
            let ends_sentence = word
                .chars()
                .last()
                .map(|c| c == '.' || c == '!' || c == '?')
                .unwrap_or(false);
            words.push(PositionedWord {
                text: word,
                paragraph_index,
                ends_sentence,
            });
        }
    }

    words
}

/// Look back from `end` (exclusive) toward `start` for the closest
/// paragraph or sentence boundary, within a window of `lookback` words, so a
/// chunk cut honors prose structure instead of landing mid-sentence
/// (spec.md §4.C "honoring paragraph/sentence boundaries").
fn snap_to_boundary(words: &[PositionedWord], start: usize, end: usize, lookback: usize) -> usize {
    let floor = start + 1;
    let window_start = end.saturating_sub(lookback).max(floor);

    // Prefer a paragraph boundary: the first word after `i` starts a new
    // paragraph relative to word `i`.
    for i in (window_start..end).rev() {
        if i + 1 < words.len() && words[i + 1].paragraph_index != words[i].paragraph_index {
            return i + 1;
        }
    }
    // Fall back to a sentence boundary.
    for i in (window_start..end).rev() {
        if words[i].ends_sentence {
            return i + 1;
        }
    }
    end
}

/// Chunk `full_text` into ~`target_words`-word ingestion chunks with
/// `overlap_words` of carry-over between consecutive chunks (spec.md §4.C
/// "Ingestion chunking"). For a document of N words this produces
/// `ceil((N - overlap) / (target - overlap))` chunks when no boundary
/// snapping shifts a cut point; the last chunk may be shorter than target.
///
/// `target_words` and `overlap_words` are expected to already be clamped to
/// the 500–2000 / sane-overlap ranges `stratum-config` validates; this
/// function accepts whatever it's given and degrades gracefully (an
/// overlap >= target just stops progressing via the `advance` floor below).
pub fn chunk_ingestion(full_text: &str, target_words: usize, overlap_words: usize) -> Vec<IngestionChunk> {
    let words = positioned_words(full_text);
    if words.is_empty() {
        return Vec::new();
    }

    let target_words = target_words.max(1);
    let overlap_words = overlap_words.min(target_words.saturating_sub(1));
    let lookback = (target_words / 6).max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < words.len() {
        let raw_end = (start + target_words).min(words.len());
        let end = if raw_end < words.len() {
            snap_to_boundary(&words, start, raw_end, lookback)
        } else {
            raw_end
        };
        // Guard against a boundary snap collapsing the chunk to empty.
        let end = end.max(start + 1).min(words.len());

        let text = words[start..end]
            .iter()
            .map(|w| w.text)
            .collect::<Vec<_>>()
            .join(" ");
        chunks.push(IngestionChunk {
            index,
            paragraph_index: words[start].paragraph_index,
            text,
        });
        index += 1;

        if end >= words.len() {
            break;
        }
        let next_start = end.saturating_sub(overlap_words);
        // Always make forward progress even if overlap >= chunk length.
        start = next_start.max(start + 1);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_doc(n: usize) -> String {
        (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_ingestion("", 1000, 200).is_empty());
        assert!(chunk_ingestion("   \n  ", 1000, 200).is_empty());
    }

    #[test]
    fn short_document_is_a_single_chunk() {
        let doc = words_doc(50);
        let chunks = chunk_ingestion(&doc, 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn chunk_count_matches_formula_without_boundaries() {
        // No paragraph breaks and no sentence terminators, so no boundary
        // snapping perturbs the arithmetic sliding window.
        let target = 100;
        let overlap = 20;
        let n = 1000;
        let doc = words_doc(n);
        let chunks = chunk_ingestion(&doc, target, overlap);
        let expected = ((n - overlap) as f64 / (target - overlap) as f64).ceil() as usize;
        assert_eq!(chunks.len(), expected);
    }

    #[test]
    fn last_chunk_may_be_short() {
        let doc = words_doc(250);
        let chunks = chunk_ingestion(&doc, 100, 20);
        let last = chunks.last().unwrap();
        let last_word_count = last.text.split_whitespace().count();
        assert!(last_word_count <= 100);
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let doc = words_doc(300);
        let chunks = chunk_ingestion(&doc, 100, 20);
        assert!(chunks.len() >= 2);
        let first_words: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let second_words: Vec<&str> = chunks[1].text.split_whitespace().collect();
        let tail = &first_words[first_words.len().saturating_sub(20)..];
        assert_eq!(tail, &second_words[..tail.len()]);
    }

    #[test]
    fn paragraph_index_advances_across_blank_lines() {
        let doc = format!("{}\n\n{}", words_doc(10), words_doc(10));
        let chunks = chunk_ingestion(&doc, 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].paragraph_index, 0);
    }
}
