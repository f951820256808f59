use crate::index::TermStatistics;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

lazy_static! {
    static ref STRAY_MARKUP: Regex = Regex::new(r"<br>|</p>|</a>|</em>|</strong>|</b>|<p>|</big>").expect("valid regex");
    static ref PUNCTUATION: Regex = Regex::new(r#"[.|,:;!"]"#).expect("valid regex");
    static ref CONTRACTIONS: Regex = Regex::new(r"'s|'re").expect("valid regex");
}

const LINK_PREFIXES: &[&str] = &["http:", "src=\"http:", "href=\"http:"];

fn keep_token(token: &str) -> bool {
    token.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && !LINK_PREFIXES.iter().any(|p| token.starts_with(p))
}

/// Strips markup fragments, punctuation and contractions. Tokens carrying `=` are attributes and yield nothing.
pub fn clean_token(token: &str) -> String {
    if token.contains('=') {
        return String::new();
    }
    let out = STRAY_MARKUP.replace_all(token, " ");
    let out = PUNCTUATION.replace_all(&out, " ");
    let out = CONTRACTIONS.replace_all(&out, "");
    out.trim().to_string()
}

/// Lowercases, filters and cleans `text`, then counts the surviving terms.
pub fn term_counts(text: &str) -> BTreeMap<String, u32> {
    let lowered = text.to_lowercase();
    let mut counts = BTreeMap::new();
    for raw in lowered.split_whitespace().filter(|t| keep_token(t)) {
        for term in clean_token(raw).split_whitespace() {
            *counts.entry(term.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Sparse term weights for one document. `tf` is fixed at construction; `weights` holds
/// the TF-IDF projection from the last call to [`TermVector::apply_idf`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermVector {
    tf: BTreeMap<String, f64>,
    weights: BTreeMap<String, f64>,
}

impl TermVector {
    pub fn from_text(text: &str) -> Self { Self::from_counts(&term_counts(text)) }

    /// Augmented term frequency: `0.5 + 0.5 * count / max_count`.
    pub fn from_counts(counts: &BTreeMap<String, u32>) -> Self {
        let max = counts.values().copied().max().unwrap_or(0);
        let tf: BTreeMap<String, f64> = counts
            .iter()
            .filter(|(_, &c)| c > 0)
            .map(|(t, &c)| (t.clone(), 0.5 + 0.5 * c as f64 / max as f64))
            .collect();
        Self { weights: tf.clone(), tf }
    }

    pub fn len(&self) -> usize { self.tf.len() }
    pub fn is_empty(&self) -> bool { self.tf.is_empty() }
    pub fn terms(&self) -> impl Iterator<Item = &str> { self.tf.keys().map(String::as_str) }
    pub fn tf(&self, term: &str) -> Option<f64> { self.tf.get(term).copied() }
    pub fn weight(&self, term: &str) -> Option<f64> { self.weights.get(term).copied() }
    pub fn weights(&self) -> &BTreeMap<String, f64> { &self.weights }

    /// Whether both vectors were built from the same term counts.
    pub fn same_terms(&self, other: &TermVector) -> bool { self.tf == other.tf }

    /// Recomputes `weights` as `tf * ln(N / df)`. Terms with no document frequency are
    /// an integrity fault: they are logged and left out. Returns the number left out.
    pub fn apply_idf(&mut self, stats: &TermStatistics, doc_id: &str) -> usize {
        let mut dropped = 0;
        self.weights = self
            .tf
            .iter()
            .filter_map(|(term, tf)| match stats.idf(term) {
                Some(idf) => Some((term.clone(), tf * idf)),
                None => {
                    tracing::error!(doc_id, term = term.as_str(), "term missing from document frequencies, dropped");
                    dropped += 1;
                    None
                }
            })
            .collect();
        dropped
    }
}

/// Cosine of the two weight vectors projected onto the union of their terms.
/// A zero-magnitude side yields NaN, which callers treat as "no similarity".
pub fn cosine(a: &TermVector, b: &TermVector) -> f64 {
    let mut left = a.weights.iter().peekable();
    let mut right = b.weights.iter().peekable();
    let (mut dot, mut na, mut nb) = (0.0, 0.0, 0.0);
    loop {
        match (left.peek(), right.peek()) {
            (Some((ta, wa)), Some((tb, wb))) => match ta.cmp(tb) {
                std::cmp::Ordering::Less => { na += *wa * *wa; left.next(); }
                std::cmp::Ordering::Greater => { nb += *wb * *wb; right.next(); }
                std::cmp::Ordering::Equal => {
                    dot += *wa * *wb;
                    na += *wa * *wa;
                    nb += *wb * *wb;
                    left.next();
                    right.next();
                }
            },
            (Some((_, wa)), None) => { na += *wa * *wa; left.next(); }
            (None, Some((_, wb))) => { nb += *wb * *wb; right.next(); }
            (None, None) => break,
        }
    }
    dot / (na.sqrt() * nb.sqrt())
}
