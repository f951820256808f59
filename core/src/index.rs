use crate::tokenizer::TermVector;
use crate::DocId;
use std::collections::{BTreeSet, HashMap};
use time::OffsetDateTime;

/// Document frequencies over the active corpus of one partition.
#[derive(Debug, Clone, Default)]
pub struct TermStatistics {
    df: HashMap<String, u32>,
    num_docs: usize,
}

impl TermStatistics {
    pub fn new() -> Self { Self::default() }
    pub fn num_docs(&self) -> usize { self.num_docs }
    pub fn vocabulary_len(&self) -> usize { self.df.len() }
    pub fn document_frequency(&self, term: &str) -> u32 { self.df.get(term).copied().unwrap_or(0) }

    pub fn add_document(&mut self, vector: &TermVector) {
        for term in vector.terms() {
            *self.df.entry(term.to_string()).or_insert(0) += 1;
        }
        self.num_docs += 1;
    }

    /// Decrements df for every term of `vector`. A term that is already at zero is clamped
    /// and logged; the count of such terms is returned.
    pub fn remove_document(&mut self, vector: &TermVector) -> usize {
        let mut clamped = 0;
        for term in vector.terms() {
            match self.df.get_mut(term) {
                Some(c) if *c > 1 => *c -= 1,
                Some(_) => { self.df.remove(term); }
                None => {
                    tracing::error!(term, "document frequency would drop below zero, clamped");
                    clamped += 1;
                }
            }
        }
        self.num_docs = self.num_docs.saturating_sub(1);
        clamped
    }

    /// `ln(N / df)`, or `None` when the term has no document frequency.
    pub fn idf(&self, term: &str) -> Option<f64> {
        let df = self.document_frequency(term);
        if df == 0 || self.num_docs == 0 {
            return None;
        }
        Some((self.num_docs as f64 / df as f64).ln())
    }

    pub fn clear(&mut self) {
        self.df.clear();
        self.num_docs = 0;
    }
}

/// Active documents ordered by creation time, ties broken by id.
#[derive(Debug, Clone, Default)]
pub struct CorpusIndex {
    entries: BTreeSet<(OffsetDateTime, DocId)>,
    created: HashMap<DocId, OffsetDateTime>,
}

impl CorpusIndex {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn contains(&self, id: &str) -> bool { self.created.contains_key(id) }
    pub fn created_at(&self, id: &str) -> Option<OffsetDateTime> { self.created.get(id).copied() }

    /// Inserts or moves `id`. Returns the previous creation time if it was present.
    pub fn insert(&mut self, id: DocId, created_at: OffsetDateTime) -> Option<OffsetDateTime> {
        let previous = self.remove(&id);
        self.entries.insert((created_at, id.clone()));
        self.created.insert(id, created_at);
        previous
    }

    pub fn remove(&mut self, id: &str) -> Option<OffsetDateTime> {
        let at = self.created.remove(id)?;
        self.entries.remove(&(at, id.to_string()));
        Some(at)
    }

    /// The oldest document, if it was created strictly before `cutoff`.
    pub fn oldest_before(&self, cutoff: OffsetDateTime) -> Option<&DocId> {
        self.entries.first().filter(|(at, _)| *at < cutoff).map(|(_, id)| id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &DocId> { self.entries.iter().map(|(_, id)| id) }

    pub fn iter(&self) -> impl Iterator<Item = (OffsetDateTime, &DocId)> { self.entries.iter().map(|(at, id)| (*at, id)) }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.created.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn df_tracks_add_and_remove() {
        let mut stats = TermStatistics::new();
        let a = TermVector::from_text("red apple");
        let b = TermVector::from_text("green apple");
        stats.add_document(&a);
        stats.add_document(&b);
        assert_eq!(stats.document_frequency("apple"), 2);
        assert_eq!(stats.idf("apple"), Some(0.0));
        assert!((stats.idf("red").unwrap() - 2f64.ln()).abs() < 1e-12);
        assert_eq!(stats.remove_document(&a), 0);
        assert_eq!(stats.document_frequency("apple"), 1);
        assert_eq!(stats.document_frequency("red"), 0);
        assert_eq!(stats.idf("red"), None);
    }

    #[test]
    fn removing_unknown_terms_clamps() {
        let mut stats = TermStatistics::new();
        stats.add_document(&TermVector::from_text("one"));
        assert_eq!(stats.remove_document(&TermVector::from_text("two three")), 2);
        assert_eq!(stats.document_frequency("one"), 1);
    }

    #[test]
    fn ordered_by_time_then_id() {
        let t = datetime!(2024-05-01 12:00 UTC);
        let mut idx = CorpusIndex::new();
        idx.insert("b".into(), t);
        idx.insert("a".into(), t);
        idx.insert("c".into(), t - time::Duration::hours(1));
        let order: Vec<_> = idx.ids().cloned().collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(idx.oldest_before(t).map(String::as_str), Some("c"));
        assert_eq!(idx.oldest_before(t - time::Duration::hours(2)), None);
        assert_eq!(idx.insert("c".into(), t + time::Duration::hours(1)), Some(t - time::Duration::hours(1)));
        assert_eq!(idx.ids().last().map(String::as_str), Some("c"));
        assert_eq!(idx.len(), 3);
    }
}
