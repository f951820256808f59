pub mod fetch;
pub mod resolve;

use anyhow::Result;
use citerank_core::citation::canonicalize;
use citerank_core::{CitationRecord, Document};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;

pub use fetch::{HttpFetcher, Page, PageSource};
pub use resolve::{clean_citations, extract_citations, LinkResolver, NoExpansion, ShortLinkResolver};

/// SHA-1 hex digest of a canonical URL.
pub fn document_id(canonical_url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(canonical_url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A fetched page as it is stored: the document plus its citation record.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub document: Document,
    pub citations: CitationRecord,
}

impl Ingested {
    pub fn assemble(url: &str, partition: &str, text: String, cited: Vec<String>, created_at: OffsetDateTime) -> Self {
        let canonical = canonicalize(url);
        let document = Document {
            id: document_id(&canonical),
            partition: partition.to_string(),
            created_at,
            url: url.to_string(),
            text,
        };
        Self { document, citations: CitationRecord { created_at, url: canonical, cited } }
    }

    pub fn id(&self) -> &str { &self.document.id }

    /// Moves the creation time of both the document and its citation record to `at`.
    pub fn restamp(&mut self, at: OffsetDateTime) {
        self.document.created_at = at;
        self.citations.created_at = at;
    }
}

/// Fetches `url` and turns it into a document with its outgoing citations.
pub async fn ingest(
    pages: &dyn PageSource,
    resolver: &dyn LinkResolver,
    url: &Url,
    partition: &str,
    now: OffsetDateTime,
) -> Result<Ingested> {
    let mut target = url.clone();
    target.set_fragment(None);
    let page = pages.fetch(&target).await?;
    let cited = extract_citations(&page.html, resolver).await;
    let text = if page.title.is_empty() { page.text } else { format!("{}\n{}", page.title, page.text) };
    Ok(Ingested::assemble(target.as_str(), partition, text, cited, now))
}

/// One line of the crawler's JSONL output, which `ranker import` reads back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Canonical cited URLs. When absent, links are extracted from `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<String>>,
}

impl DocumentLine {
    pub fn from_ingested(item: &Ingested) -> Self {
        Self {
            id: Some(item.document.id.clone()),
            url: item.document.url.clone(),
            text: item.document.text.clone(),
            created_at: item.document.created_at.format(&Rfc3339).ok(),
            citations: Some(item.citations.cited.clone()),
        }
    }

    /// Builds the stored form. Missing timestamps become `now`; missing ids are derived from the URL.
    pub fn into_ingested(self, partition: &str, now: OffsetDateTime) -> Result<Ingested> {
        let created_at = match self.created_at.as_deref() {
            Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)?,
            None => now,
        };
        let cited = match self.citations {
            Some(c) => clean_citations(c),
            None => clean_citations(citerank_core::citation::extract_links(&self.text)),
        };
        let mut item = Ingested::assemble(&self.url, partition, self.text, cited, created_at);
        if let Some(id) = self.id.filter(|id| !id.is_empty()) {
            item.document.id = id;
        }
        Ok(item)
    }
}
