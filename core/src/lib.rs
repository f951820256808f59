pub mod cancel;
pub mod citation;
pub mod clock;
pub mod config;
pub mod error;
pub mod index;
pub mod orchestrator;
pub mod partition;
pub mod persist;
pub mod popularity;
pub mod recency;
pub mod record;
pub mod similarity;
pub mod tokenizer;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PartitionConfig, RankerConfig, RankingMode};
pub use error::{ErrorKind, RankError, Result};
pub use index::{CorpusIndex, TermStatistics};
pub use orchestrator::{CycleReport, RankerState, RankingCluster, RankingOrchestrator};
pub use partition::PartitionContext;
pub use persist::{CitationSource, DocumentSource, RankingSink, RankingStore, SledStore};
pub use popularity::{PopularityScorer, PopularityScores};
pub use record::{CitationRecord, RankingRecord};
pub use similarity::{Similar, SimilarityEngine};
pub use tokenizer::TermVector;

pub type DocId = String;

/// A ranked content item as stored by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub partition: String,
    pub created_at: OffsetDateTime,
    /// URL the document was fetched from, as requested.
    pub url: String,
    pub text: String,
}
