//! Render retrieval results as a grounding block for a generation prompt.

use crate::search::ScoredResult;

/// Default character budget for [`format_context`].
pub const DEFAULT_CONTEXT_MAX_CHARS: usize = 4000;

/// Returned when there is nothing to ground on.
pub const NO_CONTEXT: &str = "No relevant context found.";

/// An entry is skipped (and formatting stops) when less than this much room
/// is left for its text.
const MIN_ENTRY_CHARS: i64 = 100;

/// Slack reserved per entry for separators.
const ENTRY_OVERHEAD: i64 = 10;

/// Format results as numbered entries:
///
/// ```text
/// [1. notes/launch.md] (score: 0.87)
/// Chunk text...
/// ```
///
/// Entries are emitted in rank order until `max_chars` is used up; the last
/// one is cut short with `...` if needed.
pub fn format_context(results: &[ScoredResult], max_chars: usize) -> String {
    if results.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let mut parts: Vec<String> = Vec::new();
    let mut used: i64 = 0;

    for (i, r) in results.iter().enumerate() {
        let header = format!(
            "[{}. {}] (score: {:.2})",
            i + 1,
            r.chunk.source_id,
            r.combined_score
        );
        let available = max_chars as i64 - used - header.chars().count() as i64 - ENTRY_OVERHEAD;
        if available <= MIN_ENTRY_CHARS {
            break;
        }

        let available = available as usize;
        let text = if r.chunk.text.chars().count() > available {
            let kept: String = r.chunk.text.chars().take(available - 3).collect();
            format!("{}...", kept)
        } else {
            r.chunk.text.clone()
        };

        let entry = format!("{}\n{}\n", header, text);
        used += entry.chars().count() as i64;
        parts.push(entry);
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn result(source_id: &str, text: &str, score: f64) -> ScoredResult {
        ScoredResult {
            chunk: Chunk {
                id: "id".to_string(),
                source_id: source_id.to_string(),
                ordinal: 0,
                text: text.to_string(),
                char_len: text.chars().count() as i64,
                span_start: 0,
                span_end: text.len() as i64,
            },
            lexical_score: 0.0,
            semantic_score: 0.0,
            combined_score: score,
        }
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(format_context(&[], 4000), NO_CONTEXT);
    }

    #[test]
    fn test_entries_numbered_with_scores() {
        let out = format_context(
            &[result("a.md", "first", 0.874), result("b.md", "second", 0.5)],
            4000,
        );
        assert_eq!(
            out,
            "[1. a.md] (score: 0.87)\nfirst\n\n[2. b.md] (score: 0.50)\nsecond\n"
        );
    }

    #[test]
    fn test_long_text_trimmed_to_budget() {
        let long = "x".repeat(1000);
        let out = format_context(&[result("a.md", &long, 1.0)], 300);
        assert!(out.chars().count() <= 300);
        assert!(out.trim_end().ends_with("..."));
    }

    #[test]
    fn test_stops_when_budget_exhausted() {
        let text = "y".repeat(150);
        let results: Vec<ScoredResult> = (0..5).map(|_| result("a.md", &text, 0.9)).collect();
        let out = format_context(&results, 400);
        assert!(out.contains("[1. a.md]"));
        assert!(out.contains("[2. a.md]"));
        assert!(!out.contains("[3. a.md]"));
    }

    #[test]
    fn test_tiny_budget_yields_nothing() {
        assert_eq!(format_context(&[result("a.md", "text", 1.0)], 50), "");
    }
}
