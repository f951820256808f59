use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;

lazy_static! {
    static ref SCHEME: Regex = Regex::new(r"^https?://").expect("valid regex");
    static ref WWW: Regex = Regex::new(r"^www\.").expect("valid regex");
    static ref ENCODED_SPACE: Regex = Regex::new(r"&nbsp;|\+").expect("valid regex");
    static ref WHITESPACE: Regex = Regex::new(r"[\n\r ]+").expect("valid regex");
    static ref FRAGMENT: Regex = Regex::new(r"#.*$").expect("valid regex");
    static ref TRAILING: Regex = Regex::new(r"(/|%20)+$").expect("valid regex");
    static ref ANCHOR: Regex = RegexBuilder::new(r"<a\s([^>]+)>")
        .case_insensitive(true)
        .build()
        .expect("valid regex");
    static ref HREF: Regex = RegexBuilder::new(r#"href\s*=\s*"([^"]+)""#)
        .case_insensitive(true)
        .build()
        .expect("valid regex");
}

fn canonicalize_once(url: &str) -> String {
    let url = url.to_lowercase();
    let url = SCHEME.replace(&url, "");
    let url = WWW.replace(&url, "");
    let url = url.replace("&amp;", "&");
    let url = ENCODED_SPACE.replace_all(&url, "%20");
    let url = WHITESPACE.replace_all(&url, "");
    let url = FRAGMENT.replace(&url, "");
    TRAILING.replace(&url, "").into_owned()
}

/// Canonical form used as the identity of a cited URL: lower case, no scheme, no leading
/// `www.`, no fragment, no whitespace, no trailing slashes or encoded spaces. Idempotent.
pub fn canonicalize(url: &str) -> String {
    let mut current = canonicalize_once(url);
    // Every pass that changes a canonical-so-far string shortens it.
    for _ in 0..=current.len() {
        let next = canonicalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Whether `url` looks like a link-shortener address worth expanding.
pub fn is_short_link(url: &str) -> bool {
    if url.len() > 30 {
        return false;
    }
    let parts: Vec<&str> = url.split('/').collect();
    if !(2..=4).contains(&parts.len()) {
        return false;
    }
    parts[parts.len() - 2..].iter().all(|p| p.len() <= 10)
}

/// Raw `href` targets of anchor tags in `html`, first occurrence order, without duplicates.
pub fn extract_links(html: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for anchor in ANCHOR.captures_iter(html) {
        let Some(href) = HREF.captures(&anchor[1]).map(|c| c[1].trim().to_string()) else { continue };
        if !href.is_empty() && !links.contains(&href) {
            links.push(href);
        }
    }
    links
}

/// Citation timestamps per canonical URL, with a count per instant.
#[derive(Debug, Clone, Default)]
pub struct CitationGraph {
    entries: HashMap<String, BTreeMap<OffsetDateTime, u32>>,
}

impl CitationGraph {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn citations(&self, url: &str) -> Option<&BTreeMap<OffsetDateTime, u32>> { self.entries.get(url) }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<OffsetDateTime, u32>)> { self.entries.iter() }
    pub(crate) fn entries(&self) -> &HashMap<String, BTreeMap<OffsetDateTime, u32>> { &self.entries }

    pub fn add_citation(&mut self, url: &str, at: OffsetDateTime) {
        *self.entries.entry(url.to_string()).or_default().entry(at).or_insert(0) += 1;
    }

    /// Records one citation of each URL at `at`. URLs are expected canonical and distinct.
    pub fn add_citations<'a>(&mut self, urls: impl IntoIterator<Item = &'a str>, at: OffsetDateTime) {
        for url in urls {
            self.add_citation(url, at);
        }
    }

    /// Removes one citation of `url` at `at`. The URL disappears once its counts reach zero.
    pub fn remove_citation(&mut self, url: &str, at: OffsetDateTime) -> bool {
        let Some(times) = self.entries.get_mut(url) else { return false };
        let Some(count) = times.get_mut(&at) else { return false };
        *count -= 1;
        if *count == 0 {
            times.remove(&at);
        }
        if times.is_empty() {
            self.entries.remove(url);
        }
        true
    }

    /// Drops every citation instant of `url` listed in `instants`.
    pub fn drop_instants(&mut self, url: &str, instants: &[OffsetDateTime]) -> usize {
        let Some(times) = self.entries.get_mut(url) else { return 0 };
        instants.iter().filter(|at| times.remove(*at).is_some()).count()
    }

    /// Removes URLs with no remaining citations.
    pub fn prune_empty(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, times| times.values().any(|&c| c > 0));
        before - self.entries.len()
    }
}
