//! Paragraph-boundary text chunker.
//!
//! Splits document text into [`TextChunk`]s that respect a configurable
//! `max_chars` limit. Every blank-line-delimited paragraph becomes its own
//! chunk so that each retrieval unit stays semantically coherent.
//!
//! # Algorithm
//!
//! 1. Split the text into paragraphs on blank lines (lines that are empty
//!    or contain only whitespace). Trim each paragraph; drop empty ones.
//! 2. A paragraph within `max_chars` characters is emitted as one chunk.
//! 3. A longer paragraph is split into sentences (`.`, `!`, `?` followed by
//!    whitespace) and the sentences are packed greedily: the running chunk
//!    grows until adding the next sentence would exceed `max_chars`, at which
//!    point it is flushed and the sentence starts a new chunk.
//! 4. A single sentence longer than `max_chars` is hard-split at the last
//!    whitespace inside the bound, or at a character boundary if there is
//!    none.
//!
//! Chunks never overlap: each one is a slice of the source text, recorded
//! with its byte span, and only whitespace is lost between them. Empty or
//! whitespace-only text yields no chunks at all.
//!
//! # Example
//!
//! ```rust
//! use kb_harness_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", 800);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].ordinal, 1);
//! assert_eq!(chunks[1].text, "Second paragraph.");
//! ```

use std::ops::Range;

use crate::models::TextChunk;

/// Split text into chunks on paragraph boundaries, respecting `max_chars`.
///
/// Returns chunks with contiguous ordinals starting at 0. A `max_chars` of
/// zero is treated as one.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);
    let mut spans: Vec<Range<usize>> = Vec::new();

    for para in paragraph_spans(text) {
        if char_len(&text[para.clone()]) <= max_chars {
            spans.push(para);
            continue;
        }

        let mut pieces = Vec::new();
        for sentence in sentence_spans(text, para) {
            hard_split(text, sentence, max_chars, &mut pieces);
        }
        pack(text, pieces, max_chars, &mut spans);
    }

    spans
        .into_iter()
        .enumerate()
        .map(|(i, span)| TextChunk {
            ordinal: i as i64,
            text: text[span.clone()].to_string(),
            span,
        })
        .collect()
}

/// Number of characters (Unicode scalar values) in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte spans of trimmed, non-empty paragraphs.
fn paragraph_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut current: Option<Range<usize>> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_range = offset..offset + line.len();
        offset += line.len();

        if line.trim().is_empty() {
            if let Some(para) = current.take() {
                spans.extend(trim_span(text, para));
            }
            continue;
        }

        current = match current {
            Some(para) => Some(para.start..line_range.end),
            None => Some(line_range),
        };
    }

    if let Some(para) = current {
        spans.extend(trim_span(text, para));
    }

    spans
}

/// Byte spans of the trimmed sentences inside `para`.
fn sentence_spans(text: &str, para: Range<usize>) -> Vec<Range<usize>> {
    let body = &text[para.clone()];
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = body.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            spans.extend(trim_span(text, para.start + start..para.start + end));
            start = end;
        }
    }

    if start < body.len() {
        spans.extend(trim_span(text, para.start + start..para.end));
    }

    spans
}

/// Split `span` into pieces of at most `max_chars` characters.
fn hard_split(text: &str, span: Range<usize>, max_chars: usize, out: &mut Vec<Range<usize>>) {
    let mut remaining = Some(span);

    while let Some(range) = remaining.take() {
        let s = &text[range.clone()];
        let limit = match s.char_indices().nth(max_chars) {
            Some((i, _)) => i,
            None => {
                out.push(range);
                break;
            }
        };

        let split_at = match s[..limit].rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => pos,
            _ => limit,
        };

        out.extend(trim_span(text, range.start..range.start + split_at));
        remaining = trim_span(text, range.start + split_at..range.end);
    }
}

/// Greedily merge consecutive pieces while the merged slice fits the bound.
fn pack(text: &str, pieces: Vec<Range<usize>>, max_chars: usize, out: &mut Vec<Range<usize>>) {
    let mut current: Option<Range<usize>> = None;

    for piece in pieces {
        current = match current {
            None => Some(piece),
            Some(cur) => {
                let merged = cur.start..piece.end;
                if char_len(&text[merged.clone()]) <= max_chars {
                    Some(merged)
                } else {
                    out.push(cur);
                    Some(piece)
                }
            }
        };
    }

    out.extend(current);
}

/// Shrink `range` to exclude leading and trailing whitespace.
fn trim_span(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let s = &text[range.clone()];
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = s.len() - s.trim_start().len();
    Some(range.start + lead..range.start + lead + trimmed.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hard splits may cut inside a word, so compare with whitespace removed.
    fn normalize_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_three_paragraphs() {
        let text = "Para one about cats.\n\nPara two about dogs.\n\nPara three about birds.";
        let chunks = chunk_text(text, 800);
        assert_eq!(chunks.len(), 3);
        let ordinals: Vec<i64> = chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        assert_eq!(chunks[0].text, "Para one about cats.");
        assert_eq!(chunks[1].text, "Para two about dogs.");
        assert_eq!(chunks[2].text, "Para three about birds.");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 800).is_empty());
    }

    #[test]
    fn test_whitespace_only_text() {
        assert!(chunk_text("  \n\n \t\n   \n", 800).is_empty());
    }

    #[test]
    fn test_blank_lines_with_spaces_and_crlf() {
        let text = "First line\r\nstill first.\r\n   \r\nSecond.\r\n";
        let chunks = chunk_text(text, 800);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First line\r\nstill first.");
        assert_eq!(chunks[1].text, "Second.");
    }

    #[test]
    fn test_single_newline_stays_in_paragraph() {
        let chunks = chunk_text("line one\nline two", 800);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "line one\nline two");
    }

    #[test]
    fn test_long_paragraph_packs_sentences() {
        // Each sentence is 10 chars; two sentences plus a space is 21.
        let text = "Aaaa aaaa. Bbbb bbbb. Cccc cccc. Dddd dddd.";
        let chunks = chunk_text(text, 21);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Aaaa aaaa. Bbbb bbbb.", "Cccc cccc. Dddd dddd."]);
    }

    #[test]
    fn test_sentence_packing_flushes_before_overflow() {
        let text = "One. Two two two. Three.";
        let chunks = chunk_text(text, 12);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["One.", "Two two two.", "Three."]);
    }

    #[test]
    fn test_decimal_point_is_not_a_sentence_boundary() {
        let text = "Version 2.5 ships today. It is fast.";
        let chunks = chunk_text(text, 25);
        assert_eq!(chunks[0].text, "Version 2.5 ships today.");
        assert_eq!(chunks[1].text, "It is fast.");
    }

    #[test]
    fn test_oversized_sentence_hard_split() {
        let text = "word ".repeat(40);
        let chunks = chunk_text(&text, 12);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(char_len(&c.text) <= 12, "chunk too long: {:?}", c.text);
            assert!(!c.text.starts_with(' ') && !c.text.ends_with(' '));
        }
    }

    #[test]
    fn test_unbroken_run_split_at_char_boundary() {
        let text = "x".repeat(25);
        let chunks = chunk_text(&text, 10);
        let lens: Vec<usize> = chunks.iter().map(|c| char_len(&c.text)).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text(text, 3);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.is_empty());
            assert!(char_len(&c.text) <= 3);
        }
    }

    #[test]
    fn test_length_bound_holds() {
        let text = (0..40)
            .map(|i| format!("Sentence number {} talks about topic {}. It goes on.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ");
        for max in [1, 7, 30, 64, 200] {
            for c in chunk_text(&text, max) {
                assert!(char_len(&c.text) <= max, "max={} chunk={:?}", max, c.text);
            }
        }
    }

    #[test]
    fn test_spans_do_not_overlap_and_match_text() {
        let text = "Alpha beta. Gamma delta!\n\n\nEpsilon? Zeta eta theta iota.\n\nKappa";
        let chunks = chunk_text(text, 15);
        for c in &chunks {
            assert_eq!(&text[c.span.clone()], c.text);
        }
        for pair in chunks.windows(2) {
            assert!(pair[0].span.end <= pair[1].span.start);
        }
    }

    #[test]
    fn test_reconstruction_loses_only_whitespace() {
        let text = "  Intro line.\n\nA much longer paragraph. It has several sentences! \
                    Does it? Yes it does.\n\n\n   \nTrailing words here   ";
        for max in [5, 20, 80, 800] {
            let chunks = chunk_text(text, max);
            let joined = chunks
                .iter()
                .map(|c| c.text.as_str())
                .collect::<String>();
            assert_eq!(normalize_ws(&joined), normalize_ws(text), "max={}", max);
        }
    }

    #[test]
    fn test_ordinals_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i as i64, "Ordinal mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha.\n\nBeta. Gamma. Delta.\n\nEpsilon";
        assert_eq!(chunk_text(text, 8), chunk_text(text, 8));
    }
}
