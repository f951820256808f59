use anyhow::Result;
use async_trait::async_trait;
use citerank_core::citation::{canonicalize, extract_links, is_short_link};
use citerank_core::record::SEPARATOR;
use reqwest::{header, Client};
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Returns the target `link` points at, or `link` itself. Never fails.
    async fn expand(&self, link: &str) -> String;
}

/// Leaves every link as written.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExpansion;

#[async_trait]
impl LinkResolver for NoExpansion {
    async fn expand(&self, link: &str) -> String { link.to_string() }
}

/// Expands link-shortener URLs with a single HEAD request, without following redirects.
#[derive(Clone)]
pub struct ShortLinkResolver {
    client: Client,
}

impl ShortLinkResolver {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent.to_string())
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn follow(&self, link: &str) -> Result<Option<String>> {
        let target = Url::parse(link).or_else(|_| Url::parse(&format!("http://{link}")))?;
        let resp = self.client.head(target).send().await?;
        if !resp.status().is_redirection() {
            return Ok(None);
        }
        Ok(resp.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()).map(str::to_string))
    }
}

#[async_trait]
impl LinkResolver for ShortLinkResolver {
    async fn expand(&self, link: &str) -> String {
        if !is_short_link(link) {
            return link.to_string();
        }
        match self.follow(link).await {
            Ok(Some(to)) => {
                tracing::debug!(from = link, to = to.as_str(), "short link expanded");
                to
            }
            Ok(None) => link.to_string(),
            Err(e) => {
                tracing::debug!(link, error = %e, "short link left unexpanded");
                link.to_string()
            }
        }
    }
}

/// Canonicalizes and de-duplicates links, dropping empty ones and any containing the record separator.
pub fn clean_citations(links: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for link in links {
        let c = canonicalize(&link);
        if c.is_empty() || c.contains(SEPARATOR) || out.contains(&c) {
            continue;
        }
        out.push(c);
    }
    out
}

/// Canonical citations of an HTML fragment, with short links expanded through `resolver`.
pub async fn extract_citations(html: &str, resolver: &dyn LinkResolver) -> Vec<String> {
    let mut expanded = Vec::new();
    for link in extract_links(html) {
        expanded.push(resolver.expand(&link).await);
    }
    clean_citations(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Table(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl LinkResolver for Table {
        async fn expand(&self, link: &str) -> String { self.0.get(link).map_or(link, |t| *t).to_string() }
    }

    #[tokio::test]
    async fn expands_then_canonicalizes() {
        let resolver = Table(HashMap::from([("http://bit.ly/abc", "https://www.News.example/story#top")]));
        let html = r#"<a href="http://bit.ly/abc">s</a> <a href="http://news.example/story/">again</a>
            <a href="http://x.example/a|b">bad</a> <a href="https://blog.example/post">b</a>"#;
        let cites = extract_citations(html, &resolver).await;
        assert_eq!(cites, vec!["news.example/story", "blog.example/post"]);
    }

    #[tokio::test]
    async fn long_links_are_not_expanded() {
        let resolver = ShortLinkResolver::new("citerank-test", Duration::from_millis(50)).unwrap();
        let link = "https://news.example.com/2024/05/01/a-long-story";
        assert_eq!(resolver.expand(link).await, link);
    }
}
