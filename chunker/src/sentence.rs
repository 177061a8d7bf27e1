use stratum_models::SentenceSpan;

/// Split `full_text` into `<= max_chars`-byte chunks at sentence boundaries
/// (spec.md §4.C "Sentence chunking"), used by the source embedding worker
/// (spec.md §4.F). Degenerate inputs: empty text yields no chunks; text
/// with no sentence terminator yields a single chunk covering the whole
/// text, even if it exceeds `max_chars`.
pub fn chunk_sentences(full_text: &str, max_chars: usize) -> Vec<SentenceSpan> {
    if full_text.is_empty() {
        return Vec::new();
    }

    let boundaries = sentence_end_offsets(full_text);
    if boundaries.is_empty() {
        return vec![SentenceSpan {
            index: 0,
            text: full_text.to_string(),
            start_byte: 0,
            end_byte: full_text.len() as u32,
        }];
    }

    let mut spans = Vec::new();
    let mut chunk_start = 0usize;
    let mut segment_start = 0usize;
    let mut index = 0u32;

    for &sentence_end in &boundaries {
        if sentence_end - chunk_start > max_chars && sentence_end > segment_start && segment_start > chunk_start {
            push_span(&mut spans, full_text, &mut index, chunk_start, segment_start);
            chunk_start = segment_start;
        }
        segment_start = sentence_end;
    }
    if segment_start > chunk_start {
        push_span(&mut spans, full_text, &mut index, chunk_start, segment_start);
    }
    // Trailing text after the last sentence terminator (e.g. no closing
    // punctuation) belongs in its own chunk rather than being dropped.
    if segment_start < full_text.len() {
        push_span(&mut spans, full_text, &mut index, segment_start, full_text.len());
    }

    spans
}

fn push_span(spans: &mut Vec<SentenceSpan>, full_text: &str, index: &mut u32, start: usize, end: usize) {
    let text = full_text[start..end].trim();
    if text.is_empty() {
        return;
    }
    // Re-derive exact byte offsets of the trimmed text within the slice so
    // `full_text[start:end] == chunk_text` holds (spec.md §3 "SourceEmbedding").
    let trim_offset = full_text[start..end].find(text).unwrap_or(0);
    let real_start = start + trim_offset;
    let real_end = real_start + text.len();
    spans.push(SentenceSpan {
        index: *index,
        text: text.to_string(),
        start_byte: real_start as u32,
        end_byte: real_end as u32,
    });
    *index += 1;
}

/// Byte offsets (exclusive end) of each sentence-terminating punctuation
/// mark followed by whitespace or end-of-string.
fn sentence_end_offsets(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut offsets = Vec::new();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'.' || b == b'!' || b == b'?' {
            let next_is_boundary = bytes
                .get(i + 1)
                .map(|&n| n == b' ' || n == b'\n' || n == b'\t')
                .unwrap_or(true);
            if next_is_boundary {
                offsets.push(i + 1);
            }
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_sentences("", 500).is_empty());
    }

    #[test]
    fn no_terminator_yields_single_chunk() {
        let text = "no terminator here just words and words";
        let spans = chunk_sentences(text, 10);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, text);
        assert_eq!(spans[0].start_byte, 0);
        assert_eq!(spans[0].end_byte, text.len() as u32);
    }

    #[test]
    fn splits_at_sentence_boundaries_within_budget() {
        let text = "First sentence. Second sentence. Third sentence.";
        let spans = chunk_sentences(text, 20);
        assert!(spans.len() > 1);
        for span in &spans {
            assert_eq!(&text[span.start_byte as usize..span.end_byte as usize], span.text);
        }
    }

    #[test]
    fn offsets_round_trip_into_source_text() {
        let text = "Alpha beta. Gamma delta epsilon zeta. Eta theta iota kappa lambda.";
        let spans = chunk_sentences(text, 25);
        for span in &spans {
            assert_eq!(&text[span.start_byte as usize..span.end_byte as usize], span.text);
        }
    }

    #[test]
    fn single_sentence_under_budget_is_one_chunk() {
        let text = "Short sentence here.";
        let spans = chunk_sentences(text, 500);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, text);
    }
}
