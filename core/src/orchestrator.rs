use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::{PartitionConfig, RankerConfig, LATE_WRITE_GRACE};
use crate::error::{ErrorKind, RankError, Result};
use crate::partition::{AppliedRecord, PartitionContext};
use crate::persist::RankingStore;
use crate::popularity::PopularityScores;
use crate::record::{CitationRecord, RankingRecord};
use crate::DocId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;

/// Popularity rows scoring below this are not persisted.
pub const MIN_PERSISTED_SCORE: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankerState {
    Uninitialized,
    Initializing,
    Ready,
    Refreshing,
    Cancelled,
    Failed,
}

impl RankerState {
    pub fn is_terminal(&self) -> bool { matches!(self, RankerState::Cancelled | RankerState::Failed) }
}

/// A popular document with the documents most similar to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingCluster {
    pub title: DocId,
    pub score: f64,
    pub members: Vec<(DocId, f64)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Citation records applied this cycle, new documents and updates alike.
    pub records: usize,
    pub retracted: usize,
    pub scored_urls: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub clusters: usize,
    pub persisted: usize,
    pub integrity_issues: usize,
    pub pruned_records: usize,
}

/// Drives one partition: fetch citations, score, optionally cluster, persist, sleep.
pub struct RankingOrchestrator {
    context: PartitionContext,
    store: Arc<dyn RankingStore>,
    clock: Arc<dyn Clock>,
    config: RankerConfig,
    state: RankerState,
    last_fetch: Option<OffsetDateTime>,
}

impl RankingOrchestrator {
    pub fn new<S: RankingStore + 'static>(partition: &PartitionConfig, config: RankerConfig, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let context = PartitionContext::new(&partition.name, partition.mode, &config, store.clone(), clock.clone());
        Self { context, store, clock, config, state: RankerState::Uninitialized, last_fetch: None }
    }

    pub fn state(&self) -> RankerState { self.state }
    pub fn context(&self) -> &PartitionContext { &self.context }
    pub fn partition(&self) -> &str { &self.context.name }

    /// Runs cycles until cancelled. Cancellation ends with `Ok`; any other error leaves the
    /// ranker `Failed` and is returned.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<()> {
        tracing::info!(partition = self.partition(), mode = ?self.context.mode, "ranker starting");
        let outcome = self.drive(cancel);
        match outcome {
            Err(RankError::Cancelled) => {
                self.state = RankerState::Cancelled;
                tracing::info!(partition = self.partition(), "ranker cancelled");
                Ok(())
            }
            Err(e) => {
                tracing::error!(partition = self.partition(), error = %e, "ranker failed");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    fn drive(&mut self, cancel: &CancelToken) -> Result<()> {
        loop {
            let started = self.clock.now();
            self.run_cycle(cancel)?;
            let elapsed = self.clock.now() - started;
            let remaining = self.config.run_period() - elapsed;
            let pause = std::time::Duration::try_from(remaining).unwrap_or(std::time::Duration::ZERO);
            tracing::debug!(partition = self.partition(), pause_secs = pause.as_secs(), "sleeping until next cycle");
            cancel.sleep(pause)?;
        }
    }

    /// One fetch, score and persist pass. The first call loads `lookback + buffer` hours of history.
    pub fn run_cycle(&mut self, cancel: &CancelToken) -> Result<CycleReport> {
        if self.state.is_terminal() {
            return Err(RankError::Halted { partition: self.context.name.clone() });
        }
        self.state = if self.state == RankerState::Uninitialized { RankerState::Initializing } else { RankerState::Refreshing };
        match self.cycle(cancel) {
            Ok(report) => {
                self.state = RankerState::Ready;
                Ok(report)
            }
            Err(RankError::Cancelled) => {
                self.state = RankerState::Cancelled;
                Err(RankError::Cancelled)
            }
            Err(e) => {
                self.state = RankerState::Failed;
                Err(e)
            }
        }
    }

    fn cycle(&mut self, cancel: &CancelToken) -> Result<CycleReport> {
        let now = self.clock.now();
        let mut report = CycleReport::default();
        (report.records, report.retracted) = self.ingest_citations(now, cancel)?;

        let scores = self.context.scorer.score(&mut self.context.graph, now, cancel)?;
        report.scored_urls = scores.resolved.len() + scores.unresolved.len();
        report.resolved = scores.resolved.len();
        report.unresolved = scores.unresolved.len();
        report.integrity_issues = scores.issues.len();

        let rankings = if self.context.mode.clusters() {
            let clusters = self.clusters_for(&scores, cancel)?;
            report.clusters = clusters.len();
            clusters
                .into_iter()
                .map(|c| (c.title, RankingRecord::Cluster { score: c.score, similar: c.members }))
                .collect::<Vec<_>>()
        } else {
            scores
                .resolved
                .iter()
                .filter(|(_, s)| *s >= MIN_PERSISTED_SCORE)
                .map(|(id, s)| (id.clone(), RankingRecord::Popularity { score: *s }))
                .collect()
        };

        cancel.check()?;
        self.store.replace_rankings(&self.context.name, &rankings)?;
        report.persisted = rankings.len();

        self.context.scorer.prune_index(now);
        let cutoff = now - self.config.retention();
        self.context.applied.retain(|_, r| r.created_at >= cutoff);
        report.pruned_records = self.store.prune_citations(&self.context.name, now - self.config.citation_retention())?;

        tracing::info!(
            partition = self.partition(),
            records = report.records,
            retracted = report.retracted,
            resolved = report.resolved,
            unresolved = report.unresolved,
            clusters = report.clusters,
            persisted = report.persisted,
            pruned = report.pruned_records,
            "ranking cycle complete"
        );
        Ok(report)
    }

    /// Pulls citation records created since the last fetch into the graph and URL index.
    /// The read reaches back a grace span behind the previous cutoff; records already applied
    /// are skipped and a changed record replaces the citations of its previous version.
    /// Returns the number of records applied and of citations retracted.
    fn ingest_citations(&mut self, now: OffsetDateTime, cancel: &CancelToken) -> Result<(usize, usize)> {
        let floor = now - self.config.retention();
        let from = self.last_fetch.map_or(floor, |last| (last - LATE_WRITE_GRACE).max(floor));
        cancel.check()?;
        let records = self.store.citations_between(&self.context.name, from, now)?;
        let counted_from = now - self.config.lookback();
        let fetched = records.len();
        let (mut applied, mut retracted) = (0, 0);
        for (doc_id, record) in records {
            cancel.check()?;
            if let Some(n) = self.apply_record(doc_id, record, counted_from) {
                applied += 1;
                retracted += n;
            }
        }
        self.last_fetch = Some(now);
        tracing::debug!(partition = self.partition(), fetched, applied, retracted, "citations fetched");
        Ok((applied, retracted))
    }

    /// Feeds one record into the graph. `None` when the same record was already applied,
    /// otherwise the number of superseded citations removed.
    fn apply_record(&mut self, doc_id: DocId, record: CitationRecord, counted_from: OffsetDateTime) -> Option<usize> {
        let ctx = &mut self.context;
        let mut retracted = 0;
        if let Some(previous) = ctx.applied.get(&doc_id) {
            if previous.created_at == record.created_at && previous.cited == record.cited {
                return None;
            }
            if previous.counted {
                for url in &previous.cited {
                    if ctx.graph.remove_citation(url, previous.created_at) {
                        retracted += 1;
                    }
                }
            }
            tracing::debug!(partition = ctx.name.as_str(), doc_id = doc_id.as_str(), retracted, "citation record superseded");
        }
        ctx.scorer.track_document(&record.url, &doc_id, record.created_at);
        let counted = record.created_at >= counted_from;
        if counted {
            ctx.graph.add_citations(record.cited.iter().map(String::as_str), record.created_at);
        }
        ctx.applied.insert(doc_id, AppliedRecord { created_at: record.created_at, cited: record.cited, counted });
        Some(retracted)
    }

    fn clusters_for(&mut self, scores: &PopularityScores, cancel: &CancelToken) -> Result<Vec<RankingCluster>> {
        match self.context.engine.refresh(cancel) {
            Ok(_) => self.cluster(&scores.resolved, cancel),
            Err(e) if e.kind() == ErrorKind::Validation => {
                tracing::warn!(partition = self.partition(), error = %e, "similarity model unavailable, ranking without clusters");
                Ok(singletons(scores.resolved.iter().cloned()))
            }
            Err(e) => Err(e),
        }
    }

    /// Greedy clustering over the similarity model as last refreshed: the most popular
    /// unclaimed document takes its top similar unclaimed documents as members, until fewer
    /// than `cluster_fan_out` remain.
    pub fn cluster(&mut self, resolved: &[(DocId, f64)], cancel: &CancelToken) -> Result<Vec<RankingCluster>> {
        let k = self.config.cluster_fan_out;
        let mut pool: HashMap<DocId, f64> = resolved.iter().cloned().collect();
        let mut claimed: HashSet<DocId> = HashSet::new();
        let mut clusters = Vec::new();

        while pool.len() >= k && !pool.is_empty() {
            cancel.check()?;
            let Some((title, score)) = most_popular(&pool) else { break };
            pool.remove(&title);
            claimed.insert(title.clone());
            let members: Vec<(DocId, f64)> = self
                .context
                .engine
                .neighbours(&title, cancel)?
                .into_iter()
                .filter(|s| s.doc_id != title && !claimed.contains(&s.doc_id))
                .take(k)
                .map(|s| (s.doc_id, s.score))
                .collect();
            for (id, _) in &members {
                pool.remove(id);
                claimed.insert(id.clone());
            }
            clusters.push(RankingCluster { title, score, members });
        }

        clusters.extend(singletons(pool.into_iter()));
        clusters.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(clusters)
    }
}

fn most_popular(pool: &HashMap<DocId, f64>) -> Option<(DocId, f64)> {
    pool.iter()
        .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(id, s)| (id.clone(), *s))
}

fn singletons(scores: impl Iterator<Item = (DocId, f64)>) -> Vec<RankingCluster> {
    let mut out: Vec<RankingCluster> =
        scores.map(|(title, score)| RankingCluster { title, score, members: Vec::new() }).collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.title.cmp(&b.title)));
    out
}
