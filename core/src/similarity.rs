use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::LATE_WRITE_GRACE;
use crate::error::{RankError, Result};
use crate::index::{CorpusIndex, TermStatistics};
use crate::persist::DocumentSource;
use crate::tokenizer::{cosine, TermVector};
use crate::{DocId, Document};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

const CHECK_EVERY: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Span of history kept active, measured back from the refresh instant.
    pub window: Duration,
    pub threshold: f64,
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Similar {
    pub doc_id: DocId,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub full: bool,
    pub added: usize,
    pub updated: usize,
    pub evicted: usize,
    pub active: usize,
    pub dropped_terms: usize,
}

/// Lower triangle of the pairwise distance matrix, filled lazily.
#[derive(Debug, Default)]
struct DistanceCache {
    cells: Vec<Option<f64>>,
}

impl DistanceCache {
    fn reset(&mut self, n: usize) { self.cells = vec![None; n * n.saturating_sub(1) / 2]; }

    fn slot(i: usize, j: usize) -> usize {
        let (row, col) = if i > j { (i, j) } else { (j, i) };
        row * (row - 1) / 2 + col
    }

    fn get(&self, i: usize, j: usize) -> Option<f64> { self.cells.get(Self::slot(i, j)).copied().flatten() }

    fn set(&mut self, i: usize, j: usize, value: f64) {
        if let Some(cell) = self.cells.get_mut(Self::slot(i, j)) {
            *cell = Some(value);
        }
    }
}

/// Sliding-window TF-IDF model over one partition's documents.
pub struct SimilarityEngine {
    partition: String,
    source: Arc<dyn DocumentSource>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    stats: TermStatistics,
    index: CorpusIndex,
    vectors: HashMap<DocId, TermVector>,
    order: Vec<DocId>,
    positions: HashMap<DocId, usize>,
    cache: DistanceCache,
    built: bool,
    last_end: Option<OffsetDateTime>,
}

impl SimilarityEngine {
    pub fn new(partition: impl Into<String>, source: Arc<dyn DocumentSource>, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Self {
            partition: partition.into(),
            source,
            clock,
            settings,
            stats: TermStatistics::new(),
            index: CorpusIndex::new(),
            vectors: HashMap::new(),
            order: Vec::new(),
            positions: HashMap::new(),
            cache: DistanceCache::default(),
            built: false,
            last_end: None,
        }
    }

    pub fn partition(&self) -> &str { &self.partition }
    pub fn is_built(&self) -> bool { self.built }
    pub fn len(&self) -> usize { self.vectors.len() }
    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }
    pub fn contains(&self, id: &str) -> bool { self.vectors.contains_key(id) }
    pub fn stats(&self) -> &TermStatistics { &self.stats }
    pub fn vector(&self, id: &str) -> Option<&TermVector> { self.vectors.get(id) }
    pub fn window_end(&self) -> Option<OffsetDateTime> { self.last_end }

    /// True until the model has been built up to the clock's current instant.
    pub fn is_stale(&self) -> bool {
        match (self.built, self.last_end) {
            (true, Some(end)) => self.clock.now() > end,
            _ => true,
        }
    }

    /// Brings the model up to the current instant of the engine's clock.
    pub fn refresh(&mut self, cancel: &CancelToken) -> Result<BuildReport> {
        let end = self.clock.now();
        self.refresh_window(end - self.settings.window, end, cancel)
    }

    /// Rebuilds over `[start, end]`. An invalid window is logged and retried once with the
    /// configured window ending at `end`.
    pub fn refresh_window(&mut self, start: OffsetDateTime, end: OffsetDateTime, cancel: &CancelToken) -> Result<BuildReport> {
        match self.build(start, end, cancel) {
            Err(e @ RankError::InvalidWindow { .. }) => {
                tracing::warn!(partition = self.partition.as_str(), error = %e, "falling back to default window");
                self.build(end - self.settings.window, end, cancel)
            }
            other => other,
        }
    }

    fn build(&mut self, start: OffsetDateTime, end: OffsetDateTime, cancel: &CancelToken) -> Result<BuildReport> {
        if start >= end {
            return Err(RankError::InvalidWindow { start, end });
        }
        cancel.check()?;
        self.built = false;
        let mut report = BuildReport::default();

        match self.last_end {
            None => {
                let docs = self.source.documents(&self.partition, start, end)?;
                if docs.len() < 2 {
                    tracing::error!(partition = self.partition.as_str(), found = docs.len(), "not enough documents to build model");
                    return Err(RankError::InsufficientData { found: docs.len() });
                }
                self.clear();
                report.full = true;
                for doc in docs {
                    cancel.check()?;
                    self.admit(doc, start, &mut report);
                }
            }
            Some(since) => {
                while let Some(id) = self.index.oldest_before(start).cloned() {
                    cancel.check()?;
                    self.evict(&id);
                    report.evicted += 1;
                }
                // Writes can land after the previous read with an older stamp, so re-read a grace span.
                let from = (since - LATE_WRITE_GRACE).max(start);
                for doc in self.source.documents(&self.partition, from, end)? {
                    cancel.check()?;
                    self.admit(doc, start, &mut report);
                }
            }
        }

        cancel.check()?;
        report.dropped_terms = self.finalize();
        report.active = self.vectors.len();
        self.built = true;
        self.last_end = Some(end);
        tracing::info!(
            partition = self.partition.as_str(),
            full = report.full,
            added = report.added,
            updated = report.updated,
            evicted = report.evicted,
            active = report.active,
            vocabulary = self.stats.vocabulary_len(),
            "similarity model refreshed"
        );
        Ok(report)
    }

    fn clear(&mut self) {
        self.stats.clear();
        self.index.clear();
        self.vectors.clear();
        self.order.clear();
        self.positions.clear();
        self.cache.reset(0);
    }

    /// Adds `doc`, replacing an older version of it. Documents created before `start` and
    /// unchanged re-reads are ignored.
    fn admit(&mut self, doc: Document, start: OffsetDateTime, report: &mut BuildReport) {
        if doc.created_at < start {
            return;
        }
        let vector = TermVector::from_text(&doc.text);
        if let Some(current) = self.vectors.get(&doc.id) {
            if self.index.created_at(&doc.id) == Some(doc.created_at) && current.same_terms(&vector) {
                return;
            }
            self.evict(&doc.id);
            report.updated += 1;
        } else {
            report.added += 1;
        }
        self.stats.add_document(&vector);
        self.index.insert(doc.id.clone(), doc.created_at);
        self.vectors.insert(doc.id, vector);
    }

    fn evict(&mut self, id: &str) {
        if let Some(vector) = self.vectors.remove(id) {
            self.stats.remove_document(&vector);
        }
        self.index.remove(id);
    }

    fn finalize(&mut self) -> usize {
        let stats = &self.stats;
        let dropped: usize = if self.settings.parallel {
            self.vectors.par_iter_mut().map(|(id, v)| v.apply_idf(stats, id)).sum()
        } else {
            self.vectors.iter_mut().map(|(id, v)| v.apply_idf(stats, id)).sum()
        };
        self.order = self.index.ids().cloned().collect();
        self.positions = self.order.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        self.cache.reset(self.order.len());
        dropped
    }

    fn distance_at(&mut self, i: usize, j: usize) -> f64 {
        if i == j {
            return 1.0;
        }
        if let Some(d) = self.cache.get(i, j) {
            return d;
        }
        let d = cosine(&self.vectors[self.order[i].as_str()], &self.vectors[self.order[j].as_str()]);
        self.cache.set(i, j, d);
        d
    }

    /// Cosine similarity of two active documents, `None` if the model is not built or
    /// either document is outside it. A document is always at 1.0 with itself.
    pub fn distance(&mut self, a: &str, b: &str) -> Option<f64> {
        if !self.built {
            return None;
        }
        if a == b {
            return self.contains(a).then_some(1.0);
        }
        let (i, j) = (*self.positions.get(a)?, *self.positions.get(b)?);
        Some(self.distance_at(i, j))
    }

    fn fill_row(&mut self, pos: usize) {
        let missing: Vec<usize> = (0..self.order.len()).filter(|&o| o != pos && self.cache.get(pos, o).is_none()).collect();
        let computed: Vec<(usize, f64)> = {
            let (vectors, order) = (&self.vectors, &self.order);
            let me = &vectors[order[pos].as_str()];
            missing.par_iter().map(|&o| (o, cosine(me, &vectors[order[o].as_str()]))).collect()
        };
        for (o, d) in computed {
            self.cache.set(pos, o, d);
        }
    }

    /// Documents scoring above the threshold against `id`, best first, including `id` itself.
    /// Equal scores keep corpus order. Unknown ids yield an empty list. A stale model is
    /// refreshed first.
    pub fn similar_to(&mut self, id: &str, cancel: &CancelToken) -> Result<Vec<Similar>> {
        if self.is_stale() {
            self.refresh(cancel)?;
        }
        self.neighbours(id, cancel)
    }

    /// Like [`SimilarityEngine::similar_to`] against the model as last built, without refreshing.
    pub fn neighbours(&mut self, id: &str, cancel: &CancelToken) -> Result<Vec<Similar>> {
        let Some(&pos) = self.positions.get(id) else {
            tracing::debug!(partition = self.partition.as_str(), doc_id = id, "document not in similarity model");
            return Ok(Vec::new());
        };
        if self.settings.parallel {
            self.fill_row(pos);
        }
        let mut out = Vec::new();
        for other in 0..self.order.len() {
            if other % CHECK_EVERY == 0 {
                cancel.check()?;
            }
            let d = self.distance_at(pos, other);
            if !d.is_nan() && d > self.settings.threshold {
                out.push(Similar { doc_id: self.order[other].clone(), score: d });
            }
        }
        out.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(out)
    }

    /// Up to `k` most similar documents other than `id` itself.
    pub fn top_similar(&mut self, id: &str, k: usize, cancel: &CancelToken) -> Result<Vec<Similar>> {
        let mut similar = self.similar_to(id, cancel)?;
        similar.retain(|s| s.doc_id != id);
        similar.truncate(k);
        Ok(similar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangular_slots_are_unique() {
        let n = 6;
        let mut seen = std::collections::HashSet::new();
        for i in 0..n {
            for j in 0..i {
                assert_eq!(DistanceCache::slot(i, j), DistanceCache::slot(j, i));
                assert!(seen.insert(DistanceCache::slot(i, j)));
            }
        }
        assert_eq!(seen.len(), n * (n - 1) / 2);
        assert!(seen.iter().all(|&s| s < n * (n - 1) / 2));
    }
}
