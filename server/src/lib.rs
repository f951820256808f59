use anyhow::Result;
use citerank_core::similarity::{EngineSettings, Similar};
use citerank_core::{CancelToken, Clock, DocumentSource, ErrorKind, RankError, SimilarityEngine, SledStore};
use citerank_crawler::{ingest, Ingested, LinkResolver, PageSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

/// Longest request line read from a connection, terminator included.
pub const MAX_LINE: u64 = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `POST` / `PUT`: fetch and store.
    Ingest,
    /// `GET`: fetch, store, then answer with the most similar stored document.
    Lookup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub partition: String,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub default_partition: String,
    pub partitions: Vec<String>,
    pub engine: EngineSettings,
}

impl ServerSettings {
    fn partition_for(&self, tag: Option<&str>) -> String {
        tag.and_then(|t| self.partitions.iter().find(|p| p.eq_ignore_ascii_case(t)))
            .cloned()
            .unwrap_or_else(|| self.default_partition.clone())
    }
}

fn is_tag(s: &str) -> bool { !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') }

/// Parses `METHOD URL[?partitionTag] [VERSION]`.
pub fn parse_request(line: &str, settings: &ServerSettings) -> Result<Request, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if !(2..=3).contains(&tokens.len()) {
        return Err(format!("Invalid request line: {line}"));
    }
    let method = match tokens[0].to_ascii_uppercase().as_str() {
        "GET" => Method::Lookup,
        "POST" | "PUT" => Method::Ingest,
        other => return Err(format!("Unsupported method: {other}")),
    };
    let (raw, tag) = match tokens[1].rsplit_once('?') {
        Some((base, tag)) if is_tag(tag) => (base, Some(tag)),
        _ => (tokens[1], None),
    };
    let url = Url::parse(raw).map_err(|e| format!("Invalid URL {raw}: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("Invalid URL {raw}: not http(s)"));
    }
    Ok(Request { method, url, partition: settings.partition_for(tag) })
}

pub fn error_response(message: &str) -> String { format!("Status: ERROR\nMessage: {message}\n") }

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SledStore>,
    pub pages: Arc<dyn PageSource>,
    pub resolver: Arc<dyn LinkResolver>,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<ServerSettings>,
    engines: Arc<Mutex<HashMap<String, Arc<Mutex<SimilarityEngine>>>>>,
}

impl AppState {
    pub fn new(
        store: Arc<SledStore>,
        pages: Arc<dyn PageSource>,
        resolver: Arc<dyn LinkResolver>,
        clock: Arc<dyn Clock>,
        settings: ServerSettings,
    ) -> Self {
        Self { store, pages, resolver, clock, settings: Arc::new(settings), engines: Arc::default() }
    }

    /// The partition's own similarity engine, created on first use.
    fn engine(&self, partition: &str) -> Arc<Mutex<SimilarityEngine>> {
        let mut engines = self.engines.lock();
        engines
            .entry(partition.to_string())
            .or_insert_with(|| {
                let source: Arc<dyn DocumentSource> = self.store.clone();
                Arc::new(Mutex::new(SimilarityEngine::new(partition, source, self.clock.clone(), self.settings.engine)))
            })
            .clone()
    }

    /// Fetches and stores the page. Records are stamped when written, after the fetch, so a
    /// slow fetch cannot produce a record older than reads that already happened.
    async fn store_page(&self, req: &Request) -> Result<Ingested> {
        let mut item = ingest(self.pages.as_ref(), self.resolver.as_ref(), &req.url, &req.partition, self.clock.now()).await?;
        item.restamp(self.clock.now());
        self.store.put_document(&item.document)?;
        self.store.put_citation_record(&req.partition, item.id(), &item.citations)?;
        tracing::info!(partition = req.partition.as_str(), doc_id = item.id(), citations = item.citations.cited.len(), "document stored");
        Ok(item)
    }

    async fn most_similar(&self, partition: &str, id: &str) -> Result<Option<Similar>> {
        let engine = self.engine(partition);
        let id = id.to_string();
        let best = tokio::task::spawn_blocking(move || -> Result<Vec<Similar>, RankError> {
            let cancel = CancelToken::new();
            engine.lock().top_similar(&id, 1, &cancel)
        })
        .await??;
        Ok(best.into_iter().next())
    }

    async fn lookup(&self, req: &Request) -> Result<String> {
        let item = self.store_page(req).await?;
        let Some(best) = self.most_similar(&req.partition, item.id()).await? else {
            return Ok(error_response("Could not fetch a similar document"));
        };
        let doc = self
            .store
            .document(&req.partition, &best.doc_id)?
            .ok_or_else(|| RankError::UnknownDocument(best.doc_id.clone()))?;
        Ok(format!(
            "Status: SUCCESS\nMessage: Similar document found.\nURL: {}\nSimilarity Score: {}\n{}\n",
            doc.url, best.score, doc.text
        ))
    }

    /// Produces the full response text for one request line.
    pub async fn respond(&self, line: &str) -> String {
        let req = match parse_request(line, &self.settings) {
            Ok(req) => req,
            Err(msg) => {
                tracing::warn!(line, "rejected request");
                return error_response(&msg);
            }
        };
        let outcome = match req.method {
            Method::Ingest => self
                .store_page(&req)
                .await
                .map(|item| format!("Status: SUCCESS\nMessage: Document stored.\nID: {}\n", item.id())),
            Method::Lookup => self.lookup(&req).await,
        };
        outcome.unwrap_or_else(|e| {
            tracing::warn!(url = %req.url, partition = req.partition.as_str(), error = %e, "request failed");
            match e.downcast_ref::<RankError>().map(RankError::kind) {
                Some(ErrorKind::Validation) => error_response("Could not fetch a similar document"),
                _ => error_response(&format!("{e}")),
            }
        })
    }
}

async fn handle_connection(stream: TcpStream, state: &AppState) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut line = String::new();
    BufReader::new(read.take(MAX_LINE)).read_line(&mut line).await?;
    let response = if line.ends_with('\n') || (line.len() as u64) < MAX_LINE {
        state.respond(line.trim_end()).await
    } else {
        tracing::warn!(bytes = line.len(), "request line too long");
        error_response("Request line too long")
    };
    write.write_all(response.as_bytes()).await?;
    write.shutdown().await?;
    Ok(())
}

/// Accepts connections until `shutdown` resolves. Each connection carries one request line.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: impl Future<Output = ()>) -> Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &state).await {
                        tracing::warn!(%peer, error = %e, "connection failed");
                    }
                });
            }
        }
    }
}
