//! Tokenisation and BM25 scoring shared by the lexical search backends.
//!
//! SQLite's FTS5 computes BM25 itself; this module supplies the tokeniser
//! used to build safe FTS5 `MATCH` expressions and an in-process BM25 for
//! the in-memory store.

use std::collections::HashMap;

/// BM25 term-frequency saturation.
const K1: f64 = 1.2;
/// BM25 length normalisation.
const B: f64 = 0.75;

/// Lowercased alphanumeric terms of `text`, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Build an FTS5 `MATCH` expression that ORs the quoted query terms.
///
/// Quoting every term keeps user punctuation (`?`, `-`, `"`, `:`) from being
/// parsed as FTS5 syntax. Returns `None` when the query has no terms.
pub fn fts5_match_query(query: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in tokenize(query) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Term statistics for one indexed text.
#[derive(Debug, Clone, Default)]
pub struct TermCounts {
    counts: HashMap<String, u32>,
    len: u32,
}

impl TermCounts {
    pub fn new(text: &str) -> Self {
        let mut counts = HashMap::new();
        let mut len = 0;
        for term in tokenize(text) {
            *counts.entry(term).or_insert(0) += 1;
            len += 1;
        }
        Self { counts, len }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn tf(&self, term: &str) -> u32 {
        self.counts.get(term).copied().unwrap_or(0)
    }
}

/// Score every document against `query` with Okapi BM25.
///
/// Returns `(index, score)` for documents that contain at least one query
/// term. Scores increase with term frequency and decrease with document
/// frequency.
pub fn bm25_scores(query: &str, docs: &[&TermCounts]) -> Vec<(usize, f64)> {
    let mut terms = tokenize(query);
    terms.sort();
    terms.dedup();
    if terms.is_empty() || docs.is_empty() {
        return Vec::new();
    }

    let n = docs.len() as f64;
    let avg_len = docs.iter().map(|d| d.len() as f64).sum::<f64>() / n;
    let avg_len = if avg_len > 0.0 { avg_len } else { 1.0 };

    let idf: Vec<f64> = terms
        .iter()
        .map(|t| {
            let df = docs.iter().filter(|d| d.tf(t) > 0).count() as f64;
            ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
        })
        .collect();

    docs.iter()
        .enumerate()
        .filter_map(|(i, doc)| {
            let mut score = 0.0;
            let mut matched = false;
            for (term, idf) in terms.iter().zip(&idf) {
                let tf = doc.tf(term) as f64;
                if tf == 0.0 {
                    continue;
                }
                matched = true;
                let norm = K1 * (1.0 - B + B * doc.len() as f64 / avg_len);
                score += idf * tf * (K1 + 1.0) / (tf + norm);
            }
            matched.then_some((i, score))
        })
        .collect()
}
