use crate::error::{RankError, Result};
use crate::record::{CitationRecord, RankingRecord};
use crate::{DocId, Document};
use sled::{Batch, Db, Tree};
use std::collections::HashSet;
use std::path::Path;
use time::{Duration, OffsetDateTime};

/// Read access to stored documents. Ranges are `[from, to]` on creation time.
pub trait DocumentSource: Send + Sync {
    fn documents(&self, partition: &str, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<Document>>;
    fn document(&self, partition: &str, id: &str) -> Result<Option<Document>>;
}

/// Read access to citation records. Ranges are `[from, to)` so consecutive fetches never overlap.
pub trait CitationSource: Send + Sync {
    fn citations_between(&self, partition: &str, from: OffsetDateTime, to: OffsetDateTime)
        -> Result<Vec<(DocId, CitationRecord)>>;
}

pub trait RankingSink: Send + Sync {
    /// Atomically replaces every ranking row of `partition`.
    fn replace_rankings(&self, partition: &str, rankings: &[(DocId, RankingRecord)]) -> Result<()>;
    /// Deletes citation records created before `before`. Returns how many were removed.
    fn prune_citations(&self, partition: &str, before: OffsetDateTime) -> Result<usize>;
}

pub trait RankingStore: DocumentSource + CitationSource + RankingSink {}
impl<T: DocumentSource + CitationSource + RankingSink> RankingStore for T {}

/// 8-byte big-endian microsecond stamp with the sign bit flipped, so byte order is time order.
fn time_prefix(at: OffsetDateTime) -> [u8; 8] {
    let micros = (at.unix_timestamp_nanos() / 1_000) as i64;
    ((micros as u64) ^ (1 << 63)).to_be_bytes()
}

fn time_key(at: OffsetDateTime, id: &str) -> Vec<u8> {
    let mut key = time_prefix(at).to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

fn id_of(key: &[u8]) -> Result<DocId> {
    std::str::from_utf8(key.get(8..).unwrap_or_default())
        .map(str::to_string)
        .map_err(|e| RankError::MalformedRecord(format!("document key: {e}")))
}

/// Document, citation and ranking store on sled. Each partition gets its own trees:
/// `docs/<p>` and `citations/<p>` keyed by creation time then id, `doc_keys/<p>` and
/// `citation_keys/<p>` mapping id to that key, and `rankings/<p>` keyed by id.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> { Ok(Self { db: sled::open(path)? }) }

    pub fn temporary() -> Result<Self> { Ok(Self { db: sled::Config::new().temporary(true).open()? }) }

    fn tree(&self, kind: &str, partition: &str) -> Result<Tree> { Ok(self.db.open_tree(format!("{kind}/{partition}"))?) }

    /// Moves `id` to `key` in a time-ordered tree, dropping its previous entry.
    fn upsert(&self, data: &Tree, keys: &Tree, id: &str, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        data.insert(key.as_slice(), value)?;
        if let Some(old) = keys.insert(id.as_bytes(), key.as_slice())? {
            if old.as_ref() != key.as_slice() {
                data.remove(old)?;
            }
        }
        Ok(())
    }

    pub fn put_document(&self, doc: &Document) -> Result<()> {
        let data = self.tree("docs", &doc.partition)?;
        let keys = self.tree("doc_keys", &doc.partition)?;
        let value = bincode::serialize(doc)?;
        self.upsert(&data, &keys, &doc.id, time_key(doc.created_at, &doc.id), value)
    }

    pub fn put_citation_record(&self, partition: &str, id: &str, record: &CitationRecord) -> Result<()> {
        let data = self.tree("citations", partition)?;
        let keys = self.tree("citation_keys", partition)?;
        let value = record.encode()?.into_bytes();
        self.upsert(&data, &keys, id, time_key(record.created_at, id), value)
    }

    /// Ranking rows of `partition`, best score first.
    pub fn rankings(&self, partition: &str) -> Result<Vec<(DocId, RankingRecord)>> {
        let mut rows = Vec::new();
        for item in self.tree("rankings", partition)?.iter() {
            let (k, v) = item?;
            let id = String::from_utf8_lossy(&k).into_owned();
            let raw = String::from_utf8_lossy(&v);
            rows.push((id, raw.parse::<RankingRecord>()?));
        }
        rows.sort_by(|a, b| b.1.score().total_cmp(&a.1.score()).then_with(|| a.0.cmp(&b.0)));
        Ok(rows)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl DocumentSource for SledStore {
    fn documents(&self, partition: &str, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<Document>> {
        let tree = self.tree("docs", partition)?;
        let end = time_prefix(to + Duration::microseconds(1));
        let mut docs = Vec::new();
        for item in tree.range(time_prefix(from)..end) {
            let (_, v) = item?;
            docs.push(bincode::deserialize::<Document>(&v)?);
        }
        Ok(docs)
    }

    fn document(&self, partition: &str, id: &str) -> Result<Option<Document>> {
        let Some(key) = self.tree("doc_keys", partition)?.get(id.as_bytes())? else { return Ok(None) };
        match self.tree("docs", partition)?.get(key)? {
            Some(v) => Ok(Some(bincode::deserialize(&v)?)),
            None => Ok(None),
        }
    }
}

impl CitationSource for SledStore {
    fn citations_between(&self, partition: &str, from: OffsetDateTime, to: OffsetDateTime)
        -> Result<Vec<(DocId, CitationRecord)>> {
        let tree = self.tree("citations", partition)?;
        let mut out = Vec::new();
        for item in tree.range(time_prefix(from)..time_prefix(to)) {
            let (k, v) = item?;
            let id = id_of(&k)?;
            match CitationRecord::decode(&String::from_utf8_lossy(&v)) {
                Ok(record) => out.push((id, record)),
                Err(e) => tracing::warn!(partition, doc_id = id.as_str(), error = %e, "skipping citation record"),
            }
        }
        Ok(out)
    }
}

impl RankingSink for SledStore {
    fn replace_rankings(&self, partition: &str, rankings: &[(DocId, RankingRecord)]) -> Result<()> {
        let tree = self.tree("rankings", partition)?;
        let fresh: HashSet<&str> = rankings.iter().map(|(id, _)| id.as_str()).collect();
        let mut batch = Batch::default();
        for key in tree.iter().keys() {
            let key = key?;
            if !fresh.contains(String::from_utf8_lossy(&key).as_ref()) {
                batch.remove(key);
            }
        }
        for (id, record) in rankings {
            batch.insert(id.as_bytes(), record.to_string().into_bytes());
        }
        tree.apply_batch(batch)?;
        Ok(())
    }

    fn prune_citations(&self, partition: &str, before: OffsetDateTime) -> Result<usize> {
        let data = self.tree("citations", partition)?;
        let keys = self.tree("citation_keys", partition)?;
        let mut removed = 0;
        for item in data.range(..time_prefix(before)) {
            let (k, _) = item?;
            data.remove(&k)?;
            keys.remove(id_of(&k)?.as_bytes())?;
            removed += 1;
        }
        Ok(removed)
    }
}
