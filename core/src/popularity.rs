use crate::cancel::CancelToken;
use crate::citation::{canonicalize, CitationGraph};
use crate::config::RankerConfig;
use crate::error::{RankError, Result};
use crate::recency::{num_periods, recency_curve};
use crate::DocId;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;
use time::{Duration, OffsetDateTime};

/// Scores at or below this are never divided by.
pub const NORMALIZER_FLOOR: f64 = 1e-10;
const SCORE_SCALE: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlIndexEntry<'a> {
    pub doc_id: &'a str,
    pub created_at: OffsetDateTime,
}

/// A URL cited in a period that has no citations in total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityIssue {
    pub url: String,
    pub period: usize,
    pub url_count: u32,
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} has {} citations in period {} whose total is zero", self.url, self.url_count, self.period)
    }
}

impl From<IntegrityIssue> for RankError {
    fn from(issue: IntegrityIssue) -> Self { RankError::integrity(issue.url.clone(), issue.to_string()) }
}

#[derive(Debug, Clone, Default)]
pub struct PopularityScores {
    /// Scores of URLs that map to a tracked document, divided by the best of them, best first.
    pub resolved: Vec<(DocId, f64)>,
    /// Scores of URLs with no known document, normalized among themselves, best first.
    pub unresolved: Vec<(String, f64)>,
    /// Largest raw resolved score, or the floor when nothing scored above it.
    pub normalizer: f64,
    pub issues: Vec<IntegrityIssue>,
    pub expired_citations: usize,
    pub dropped_urls: usize,
}

/// Citation counts per period for one URL, plus the instants that fell out of the window.
struct Bucketed {
    url: String,
    counts: Vec<u32>,
    expired: Vec<OffsetDateTime>,
}

/// Recency-weighted citation share: `sum_p 1000 * weights[p] * counts[p] / totals[p]`.
/// A period where the URL has citations but the total is zero is reported and skipped.
pub fn weighted_score(url: &str, counts: &[u32], totals: &[u32], weights: &[f64], issues: &mut Vec<IntegrityIssue>) -> f64 {
    let mut score = 0.0;
    for (period, (&count, &weight)) in counts.iter().zip(weights).enumerate() {
        if count == 0 {
            continue;
        }
        match totals.get(period).copied().unwrap_or(0) {
            0 => {
                tracing::error!(url, period, count, "period total is zero for a cited url, skipping period");
                issues.push(IntegrityIssue { url: url.to_string(), period, url_count: count });
            }
            total => score += SCORE_SCALE * weight * count as f64 / total as f64,
        }
    }
    score
}

/// Divides every score by the largest one when that exceeds [`NORMALIZER_FLOOR`].
pub fn normalize<K>(scores: &mut [(K, f64)]) -> f64 {
    let max = scores.iter().map(|(_, s)| *s).fold(NORMALIZER_FLOOR, f64::max);
    if max > NORMALIZER_FLOOR {
        for (_, s) in scores.iter_mut() {
            *s /= max;
        }
    }
    max
}

fn rank_desc<K: Ord>(scores: &mut [(K, f64)]) {
    scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

/// Recency-weighted citation popularity for one partition.
#[derive(Debug, Clone)]
pub struct PopularityScorer {
    lookback: Duration,
    period: Duration,
    retention: Duration,
    weights: Vec<f64>,
    parallel: bool,
    url_index: HashMap<String, (DocId, OffsetDateTime)>,
}

impl PopularityScorer {
    pub fn new(config: &RankerConfig) -> Self {
        let periods = num_periods(config.lookback_hours, config.period_minutes);
        Self {
            lookback: config.lookback(),
            period: config.period(),
            retention: config.retention(),
            weights: recency_curve(periods),
            parallel: config.parallel,
            url_index: HashMap::new(),
        }
    }

    pub fn num_periods(&self) -> usize { self.weights.len() }
    pub fn weights(&self) -> &[f64] { &self.weights }
    pub fn tracked_urls(&self) -> usize { self.url_index.len() }

    /// Registers `url` (canonicalized here) as the address of `doc_id`.
    pub fn track_document(&mut self, url: &str, doc_id: &str, created_at: OffsetDateTime) {
        self.url_index.insert(canonicalize(url), (doc_id.to_string(), created_at));
    }

    pub fn resolve(&self, url: &str) -> Option<UrlIndexEntry<'_>> {
        self.url_index.get(url).map(|(id, at)| UrlIndexEntry { doc_id: id, created_at: *at })
    }

    /// Drops URL index entries for documents created before `now - (lookback + buffer)`.
    pub fn prune_index(&mut self, now: OffsetDateTime) -> usize {
        let cutoff = now - self.retention;
        let before = self.url_index.len();
        self.url_index.retain(|_, (_, at)| *at >= cutoff);
        before - self.url_index.len()
    }

    /// Period index of a citation at `at`; future citations land in period 0.
    pub fn period_of(&self, now: OffsetDateTime, at: OffsetDateTime) -> usize {
        let age = now - at;
        if age.is_negative() {
            return 0;
        }
        (age.whole_seconds() / self.period.whole_seconds().max(1)) as usize
    }

    fn bucket(&self, now: OffsetDateTime, url: &str, times: &std::collections::BTreeMap<OffsetDateTime, u32>) -> Bucketed {
        let n = self.weights.len();
        let mut counts = vec![0u32; n];
        let mut expired = Vec::new();
        for (&at, &count) in times {
            match self.period_of(now, at) {
                p if p < n => counts[p] += count,
                _ => expired.push(at),
            }
        }
        Bucketed { url: url.to_string(), counts, expired }
    }

    /// Scores every URL in `graph` as of `now`, then removes expired citations and
    /// URLs left without any.
    pub fn score(&mut self, graph: &mut CitationGraph, now: OffsetDateTime, cancel: &CancelToken) -> Result<PopularityScores> {
        cancel.check()?;
        let buckets: Vec<Bucketed> = if self.parallel {
            graph.entries().par_iter().map(|(url, times)| self.bucket(now, url, times)).collect()
        } else {
            graph.entries().iter().map(|(url, times)| self.bucket(now, url, times)).collect()
        };
        cancel.check()?;

        let mut totals = vec![0u32; self.weights.len()];
        for b in &buckets {
            for (t, c) in totals.iter_mut().zip(&b.counts) {
                *t += c;
            }
        }

        let mut out = PopularityScores::default();
        let mut scored: Vec<(String, f64)> = Vec::with_capacity(buckets.len());
        for b in &buckets {
            if b.counts.iter().all(|&c| c == 0) {
                continue;
            }
            let s = weighted_score(&b.url, &b.counts, &totals, &self.weights, &mut out.issues);
            scored.push((b.url.clone(), s));
        }
        for (url, s) in scored {
            match self.url_index.get(&url) {
                Some((doc_id, _)) => out.resolved.push((doc_id.clone(), s)),
                None => out.unresolved.push((url, s)),
            }
        }
        out.normalizer = normalize(&mut out.resolved);
        normalize(&mut out.unresolved);
        rank_desc(&mut out.resolved);
        rank_desc(&mut out.unresolved);

        for b in &buckets {
            out.expired_citations += graph.drop_instants(&b.url, &b.expired);
        }
        out.dropped_urls = graph.prune_empty();

        tracing::info!(
            urls = buckets.len(),
            resolved = out.resolved.len(),
            unresolved = out.unresolved.len(),
            expired = out.expired_citations,
            dropped = out.dropped_urls,
            "popularity scored"
        );
        Ok(out)
    }

    pub fn lookback(&self) -> Duration { self.lookback }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn scorer() -> PopularityScorer {
        PopularityScorer::new(&RankerConfig { parallel: false, ..RankerConfig::default() })
    }

    #[test]
    fn zero_total_is_reported_and_skipped() {
        let mut issues = Vec::new();
        let s = weighted_score("a.example", &[2, 1], &[4, 0], &[1.0, 0.5], &mut issues);
        assert_eq!(s, 500.0);
        assert_eq!(issues, vec![IntegrityIssue { url: "a.example".into(), period: 1, url_count: 1 }]);
    }

    #[test]
    fn integrity_fault_does_not_stop_other_urls() {
        let weights = [1.0, 0.9, 0.8];
        let totals = [7, 0, 0];
        let mut issues = Vec::new();
        let faulty = weighted_score("a.example", &[5, 0, 2], &totals, &weights, &mut issues);
        let healthy = weighted_score("b.example", &[2, 0, 0], &totals, &weights, &mut issues);
        assert!((faulty - 1000.0 * 5.0 / 7.0).abs() < 1e-9);
        assert!((healthy - 1000.0 * 2.0 / 7.0).abs() < 1e-9);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].period, 2);
        assert!(matches!(RankError::from(issues[0].clone()), RankError::DataIntegrity { .. }));
    }

    #[test]
    fn normalizes_to_unit_max() {
        let mut v = vec![("a", 4.0), ("b", 2.0)];
        assert_eq!(normalize(&mut v), 4.0);
        assert_eq!(v, vec![("a", 1.0), ("b", 0.5)]);
        let mut tiny = vec![("a", 1e-12)];
        normalize(&mut tiny);
        assert_eq!(tiny[0].1, 1e-12);
    }

    #[test]
    fn periods_from_age() {
        let s = scorer();
        let now = datetime!(2024-05-01 12:00 UTC);
        assert_eq!(s.period_of(now, now + Duration::minutes(5)), 0);
        assert_eq!(s.period_of(now, now - Duration::minutes(14)), 0);
        assert_eq!(s.period_of(now, now - Duration::minutes(15)), 1);
        assert_eq!(s.period_of(now, now - Duration::hours(36)), 144);
    }

    #[test]
    fn recent_citations_outweigh_old_ones() {
        let mut s = scorer();
        let now = datetime!(2024-05-01 12:00 UTC);
        s.track_document("http://news.example/fresh", "fresh", now - Duration::hours(1));
        let mut g = CitationGraph::new();
        g.add_citation("news.example/fresh", now - Duration::minutes(5));
        g.add_citation("news.example/stale", now - Duration::hours(30));
        g.add_citation("news.example/gone", now - Duration::hours(40));
        let scores = s.score(&mut g, now, &CancelToken::new()).unwrap();
        assert_eq!(scores.resolved, vec![("fresh".to_string(), 1.0)]);
        assert_eq!(scores.unresolved.len(), 1);
        assert!(scores.normalizer > 900.0);
        assert_eq!(scores.expired_citations, 1);
        assert!(g.citations("news.example/gone").is_none());
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn resolved_scores_are_scaled_by_the_best_resolved_url() {
        let mut s = scorer();
        let now = datetime!(2024-05-01 12:00 UTC);
        s.track_document("a.example", "a", now - Duration::hours(1));
        let mut g = CitationGraph::new();
        g.add_citations(["a.example", "q.example"], now - Duration::minutes(5));
        g.add_citation("q.example", now - Duration::minutes(5));
        let scores = s.score(&mut g, now, &CancelToken::new()).unwrap();
        assert_eq!(scores.resolved, vec![("a".to_string(), 1.0)]);
        assert!((scores.normalizer - 1000.0 / 3.0).abs() < 1e-9);
        assert_eq!(scores.unresolved, vec![("q.example".to_string(), 1.0)]);
    }

    #[test]
    fn index_pruned_past_retention() {
        let mut s = scorer();
        let now = datetime!(2024-05-01 12:00 UTC);
        s.track_document("a.example", "a", now - Duration::hours(43));
        s.track_document("b.example", "b", now - Duration::hours(41));
        assert_eq!(s.prune_index(now), 1);
        assert!(s.resolve("a.example").is_none());
        assert_eq!(s.resolve("b.example").map(|e| e.doc_id), Some("b"));
    }
}
