use anyhow::{anyhow, Result};
use async_trait::async_trait;
use citerank_core::similarity::EngineSettings;
use citerank_core::{DocumentSource, SledStore, SystemClock};
use citerank_crawler::{document_id, NoExpansion, Page, PageSource};
use citerank_server::{serve, AppState, ServerSettings, MAX_LINE};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct StaticPages(HashMap<&'static str, &'static str>);

#[async_trait]
impl PageSource for StaticPages {
    async fn fetch(&self, url: &url::Url) -> Result<Page> {
        let body = self.0.get(url.as_str()).ok_or_else(|| anyhow!("no page at {url}"))?;
        Page::parse(url.as_str(), &format!("<html><body><p>{body}</p></body></html>"))
    }
}

const A: &str = "http://dev.example/ownership";
const B: &str = "http://dev.example/lifetimes";
const C: &str = "http://garden.example/tomatoes";
const D: &str = "http://dev.example/guide";

fn state(store: Arc<SledStore>) -> AppState {
    let pages = StaticPages(HashMap::from([
        (A, "rust compiler borrow checker ownership lifetimes"),
        (B, "the rust compiler borrow checker and lifetimes explained"),
        (C, "gardening tomatoes soil water sunlight <a href=\"http://seeds.example/\">seeds</a>"),
        (D, "rust compiler borrow checker ownership lifetimes guide"),
    ]));
    let settings = ServerSettings {
        default_partition: "general".into(),
        partitions: vec!["general".into(), "tech".into()],
        engine: EngineSettings { window: time::Duration::hours(42), threshold: 0.5, parallel: true },
    };
    AppState::new(store, Arc::new(pages), Arc::new(NoExpansion), Arc::new(SystemClock), settings)
}

#[tokio::test]
async fn get_returns_most_similar_stored_document() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let app = state(store.clone());

    for url in [A, B, C] {
        let resp = app.respond(&format!("POST {url}?tech HTTP/1.1")).await;
        assert!(resp.starts_with("Status: SUCCESS"), "{resp}");
    }
    let stored = store.document("tech", &document_id("garden.example/tomatoes")).unwrap().unwrap();
    assert!(stored.text.contains("tomatoes"));

    let resp = app.respond(&format!("GET {D}?tech HTTP/1.1")).await;
    let lines: Vec<&str> = resp.lines().collect();
    assert_eq!(lines[0], "Status: SUCCESS", "{resp}");
    assert_eq!(lines[2], format!("URL: {A}"));
    let score: f64 = lines[3].trim_start_matches("Similarity Score: ").parse().unwrap();
    assert!(score > 0.5 && score < 1.0, "{score}");
    assert!(resp.contains("rust compiler borrow checker ownership lifetimes"));
}

#[tokio::test]
async fn lookup_without_neighbours_is_an_error_response() {
    let dir = tempdir().unwrap();
    let app = state(Arc::new(SledStore::open(dir.path()).unwrap()));
    let resp = app.respond(&format!("GET {A} HTTP/1.1")).await;
    assert!(resp.starts_with("Status: ERROR"), "{resp}");
    assert!(resp.contains("Could not fetch a similar document"));

    let resp = app.respond("GET http://unknown.example/page HTTP/1.1").await;
    assert!(resp.starts_with("Status: ERROR"));
    let resp = app.respond("HELLO").await;
    assert!(resp.starts_with("Status: ERROR"));
}

#[tokio::test]
async fn serves_requests_over_tcp() {
    let dir = tempdir().unwrap();
    let app = state(Arc::new(SledStore::open(dir.path()).unwrap()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, app, async {
        let _ = stopped.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(format!("POST {C} HTTP/1.1\r\n").as_bytes()).await.unwrap();
    let mut resp = String::new();
    stream.read_to_string(&mut resp).await.unwrap();
    assert!(resp.starts_with("Status: SUCCESS"), "{resp}");
    assert!(resp.contains(&document_id("garden.example/tomatoes")));

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn overlong_request_lines_are_rejected() {
    let dir = tempdir().unwrap();
    let app = state(Arc::new(SledStore::open(dir.path()).unwrap()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, app, async {
        let _ = stopped.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all("a".repeat(MAX_LINE as usize).as_bytes()).await.unwrap();
    let mut resp = String::new();
    stream.read_to_string(&mut resp).await.unwrap();
    assert!(resp.starts_with("Status: ERROR"), "{resp}");
    assert!(resp.contains("too long"));

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
