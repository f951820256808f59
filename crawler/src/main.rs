use anyhow::{anyhow, Result};
use citerank_crawler::{ingest, DocumentLine, HttpFetcher, LinkResolver, NoExpansion, PageSource, ShortLinkResolver};
use clap::Parser;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Fetch seed pages into import-ready JSONL documents")]
struct Cli {
    /// Path to a file with seed URLs (one per line)
    #[arg(long)]
    seeds: String,
    /// Output JSONL file path
    #[arg(long, default_value = "./sample_data/crawl.jsonl")]
    output: String,
    /// Partition the documents belong to
    #[arg(long, default_value = "general")]
    partition: String,
    /// Number of pages fetched at once
    #[arg(long, default_value_t = 16)]
    concurrency: usize,
    /// Request timeout seconds
    #[arg(long, default_value_t = 12)]
    timeout_secs: u64,
    /// Timeout for the HEAD request that expands a short link
    #[arg(long, default_value_t = 5)]
    short_link_timeout_secs: u64,
    /// Skip short-link expansion entirely
    #[arg(long, default_value_t = false)]
    no_expand: bool,
    #[arg(long, default_value = "citerank-bot/0.1 (+https://example.com/bot)")]
    user_agent: String,
}

fn load_seeds(path: &str) -> Result<Vec<Url>> {
    let mut seen = HashSet::new();
    let mut seeds = Vec::new();
    for line in BufReader::new(File::open(path)?).lines() {
        let s = line?.trim().to_string();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        match Url::parse(&s).or_else(|_| Url::parse(&format!("https://{s}"))) {
            Ok(u) if seen.insert(u.to_string()) => seeds.push(u),
            Ok(_) => {}
            Err(e) => tracing::warn!(seed = s.as_str(), error = %e, "skipping seed"),
        }
    }
    Ok(seeds)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();
    if let Some(dir) = std::path::Path::new(&args.output).parent() {
        fs::create_dir_all(dir).ok();
    }

    let mut frontier = load_seeds(&args.seeds)?;
    if frontier.is_empty() {
        return Err(anyhow!("no valid seeds"));
    }
    tracing::info!(seeds = frontier.len(), concurrency = args.concurrency, output = args.output.as_str(), "crawl starting");

    let pages: Arc<dyn PageSource> = Arc::new(HttpFetcher::new(&args.user_agent, Duration::from_secs(args.timeout_secs))?);
    let resolver: Arc<dyn LinkResolver> = if args.no_expand {
        Arc::new(NoExpansion)
    } else {
        Arc::new(ShortLinkResolver::new(&args.user_agent, Duration::from_secs(args.short_link_timeout_secs))?)
    };

    let mut out = BufWriter::new(File::create(&args.output)?);
    let mut inflight = JoinSet::new();
    let (mut emitted, mut failed) = (0usize, 0usize);
    frontier.reverse();

    while !frontier.is_empty() || !inflight.is_empty() {
        while inflight.len() < args.concurrency.max(1) {
            let Some(url) = frontier.pop() else { break };
            let (pages, resolver, partition) = (pages.clone(), resolver.clone(), args.partition.clone());
            inflight.spawn(async move {
                let now = time::OffsetDateTime::now_utc();
                let res = ingest(pages.as_ref(), resolver.as_ref(), &url, &partition, now).await;
                (url, res)
            });
        }
        let Some(joined) = inflight.join_next().await else { break };
        match joined {
            Ok((_, Ok(item))) => {
                serde_json::to_writer(&mut out, &DocumentLine::from_ingested(&item))?;
                out.write_all(b"\n")?;
                emitted += 1;
                if emitted % 100 == 0 {
                    tracing::info!(emitted, remaining = frontier.len(), "progress");
                }
            }
            Ok((url, Err(e))) => {
                failed += 1;
                tracing::warn!(%url, error = %e, "fetch failed");
            }
            Err(e) => {
                failed += 1;
                tracing::error!(error = %e, "fetch task panicked");
            }
        }
    }
    out.flush()?;

    tracing::info!(emitted, failed, output = args.output.as_str(), "crawl done");
    Ok(())
}
