use anyhow::Result;
use citerank_core::similarity::EngineSettings;
use citerank_core::{RankerConfig, SledStore, SystemClock};
use citerank_crawler::{HttpFetcher, ShortLinkResolver};
use citerank_server::{serve, AppState, ServerSettings};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Store directory
    #[arg(long, default_value = "./data/citerank")]
    db: String,
    /// Ranker config; supplies partitions, similarity threshold and window
    #[arg(long, default_value = "./ranker.json")]
    config: String,
    /// Partition used when a request carries no known tag
    #[arg(long, default_value = "general")]
    default_partition: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Page fetch timeout seconds
    #[arg(long, default_value_t = 12)]
    timeout_secs: u64,
    #[arg(long, default_value = "citerank-bot/0.1 (+https://example.com/bot)")]
    user_agent: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let cfg = RankerConfig::load(&args.config)?;

    let mut partitions: Vec<String> = cfg.partitions.iter().map(|p| p.name.clone()).collect();
    if !partitions.contains(&args.default_partition) {
        partitions.push(args.default_partition.clone());
    }
    let settings = ServerSettings {
        default_partition: args.default_partition.clone(),
        partitions,
        engine: EngineSettings { window: cfg.retention(), threshold: cfg.similarity_threshold, parallel: cfg.parallel },
    };

    let store = Arc::new(SledStore::open(&args.db)?);
    let pages = Arc::new(HttpFetcher::new(&args.user_agent, Duration::from_secs(args.timeout_secs))?);
    let resolver = Arc::new(ShortLinkResolver::new(&args.user_agent, Duration::from_secs(cfg.short_link_timeout_secs))?);
    let state = AppState::new(store.clone(), pages, resolver, Arc::new(SystemClock), settings);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, db = args.db.as_str(), "listener ready");
    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    store.flush()?;
    Ok(())
}
