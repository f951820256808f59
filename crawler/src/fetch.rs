use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;

pub const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub url: String,
    pub title: String,
    /// Inner HTML of `<body>`, used for link extraction.
    pub html: String,
    /// Visible text of `<body>`, used for term vectors.
    pub text: String,
}

fn selector(css: &str) -> Result<Selector> { Selector::parse(css).map_err(|e| anyhow!("selector {css}: {e:?}")) }

impl Page {
    pub fn parse(url: &str, raw: &str) -> Result<Self> {
        let doc = Html::parse_document(raw);
        let (title_sel, body_sel) = (selector("title")?, selector("body")?);
        let title = doc.select(&title_sel).next().map(|n| n.text().collect::<String>()).unwrap_or_default();
        let body = doc.select(&body_sel).next();
        let html = body.map(|n| n.inner_html()).unwrap_or_default();
        let text = body
            .map(|n| n.text().map(str::trim).filter(|t| !t.is_empty()).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        Ok(Self { url: url.to_string(), title: title.trim().to_string(), html, text })
    }
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Page>;
}

/// Fetches HTML pages over HTTP. Non-HTML, non-2xx and oversized responses are errors.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent.to_string())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Page> {
        let resp = self.client.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            bail!("{url}: status {}", resp.status());
        }
        if let Some(ct) = resp.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            if !ct.starts_with("text/html") {
                bail!("{url}: not html ({ct})");
            }
        }
        let bytes = resp.bytes().await?;
        if bytes.len() > MAX_PAGE_BYTES {
            bail!("{url}: body of {} bytes exceeds limit", bytes.len());
        }
        tracing::debug!(%url, bytes = bytes.len(), "page fetched");
        Page::parse(url.as_str(), &String::from_utf8_lossy(&bytes))
    }
}
