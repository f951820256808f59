use crate::citation::CitationGraph;
use crate::clock::Clock;
use crate::config::{RankerConfig, RankingMode};
use crate::persist::DocumentSource;
use crate::popularity::PopularityScorer;
use crate::similarity::{EngineSettings, SimilarityEngine};
use crate::DocId;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

/// The citation record of a document as last fed into the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRecord {
    pub created_at: OffsetDateTime,
    pub cited: Vec<String>,
    /// Whether its citations were counted, i.e. it was inside the lookback window.
    pub counted: bool,
}

/// Everything one partition's ranker owns. Partitions never share mutable state.
pub struct PartitionContext {
    pub name: String,
    pub mode: RankingMode,
    pub graph: CitationGraph,
    pub scorer: PopularityScorer,
    pub engine: SimilarityEngine,
    /// Latest applied record per document, so a re-ingested document can retract its old citations.
    pub applied: HashMap<DocId, AppliedRecord>,
}

impl PartitionContext {
    pub fn new(name: &str, mode: RankingMode, config: &RankerConfig, source: Arc<dyn DocumentSource>, clock: Arc<dyn Clock>) -> Self {
        let settings = EngineSettings {
            window: config.retention(),
            threshold: config.similarity_threshold,
            parallel: config.parallel,
        };
        Self {
            name: name.to_string(),
            mode,
            graph: CitationGraph::new(),
            scorer: PopularityScorer::new(config),
            engine: SimilarityEngine::new(name, source, clock, settings),
            applied: HashMap::new(),
        }
    }
}
