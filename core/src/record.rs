//! Text encodings for citation and ranking rows.
//!
//! Citations: `created_at|doc_url|cited_url_1|cited_url_2...` with an RFC 3339 timestamp.
//! Rankings: `R|score` for popularity-only rows and `S|score|id|sim|id|sim...` for clusters.
//! Scores are written with 10 decimal digits.

use crate::error::{RankError, Result};
use crate::DocId;
use std::fmt;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq)]
pub struct CitationRecord {
    pub created_at: OffsetDateTime,
    /// Canonical URL of the citing document.
    pub url: String,
    /// Canonical URLs it links to, de-duplicated.
    pub cited: Vec<String>,
}

impl CitationRecord {
    pub fn encode(&self) -> Result<String> {
        let stamp = self
            .created_at
            .format(&Rfc3339)
            .map_err(|e| RankError::MalformedRecord(format!("timestamp {}: {e}", self.created_at)))?;
        let mut out = stamp;
        for part in std::iter::once(&self.url).chain(self.cited.iter()) {
            if part.contains(SEPARATOR) {
                return Err(RankError::MalformedRecord(format!("url contains separator: {part}")));
            }
            out.push(SEPARATOR);
            out.push_str(part);
        }
        Ok(out)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let mut parts = raw.split(SEPARATOR);
        let stamp = parts.next().unwrap_or_default();
        let created_at = OffsetDateTime::parse(stamp, &Rfc3339)
            .map_err(|e| RankError::MalformedRecord(format!("timestamp {stamp:?}: {e}")))?;
        let url = match parts.next() {
            Some(u) if !u.is_empty() => u.to_string(),
            _ => return Err(RankError::MalformedRecord(format!("missing document url in {raw:?}"))),
        };
        let cited = parts.filter(|p| !p.is_empty()).map(str::to_string).collect();
        Ok(Self { created_at, url, cited })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RankingRecord {
    Popularity { score: f64 },
    Cluster { score: f64, similar: Vec<(DocId, f64)> },
}

impl RankingRecord {
    pub fn score(&self) -> f64 {
        match self {
            RankingRecord::Popularity { score } | RankingRecord::Cluster { score, .. } => *score,
        }
    }
}

impl fmt::Display for RankingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankingRecord::Popularity { score } => write!(f, "R|{score:.10}"),
            RankingRecord::Cluster { score, similar } => {
                write!(f, "S|{score:.10}")?;
                for (id, sim) in similar {
                    write!(f, "|{id}|{sim:.10}")?;
                }
                Ok(())
            }
        }
    }
}

fn parse_score(raw: &str) -> Result<f64> {
    raw.parse::<f64>().map_err(|e| RankError::MalformedRecord(format!("score {raw:?}: {e}")))
}

impl FromStr for RankingRecord {
    type Err = RankError;

    fn from_str(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        match parts.as_slice() {
            ["R", score] => Ok(RankingRecord::Popularity { score: parse_score(score)? }),
            ["S", score, rest @ ..] if rest.len() % 2 == 0 => {
                let similar = rest
                    .chunks(2)
                    .map(|pair| -> Result<(DocId, f64)> { Ok((pair[0].to_string(), parse_score(pair[1])?)) })
                    .collect::<Result<Vec<_>>>()?;
                Ok(RankingRecord::Cluster { score: parse_score(score)?, similar })
            }
            _ => Err(RankError::MalformedRecord(format!("ranking row {raw:?}"))),
        }
    }
}
