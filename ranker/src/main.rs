use anyhow::{bail, Result};
use citerank_core::{
    CancelToken, Clock, DocumentSource, RankerConfig, RankingOrchestrator, RankingRecord, SledStore, SystemClock,
};
use citerank_crawler::DocumentLine;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ranker")]
#[command(about = "Rank documents by citation popularity and textual similarity", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ranking loop for every configured partition until Ctrl-C
    Run {
        /// Store directory
        #[arg(long, default_value = "./data/citerank")]
        db: String,
        /// JSON config file; defaults apply when absent
        #[arg(long, default_value = "./ranker.json")]
        config: String,
    },
    /// Store documents and their citation records from JSON/JSONL files or a directory
    Import {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        #[arg(long, default_value = "./data/citerank")]
        db: String,
        #[arg(long)]
        partition: String,
    },
    /// Print the persisted rankings of a partition, best first
    Show {
        #[arg(long, default_value = "./data/citerank")]
        db: String,
        #[arg(long)]
        partition: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { db, config } => run(&db, &config).await,
        Commands::Import { input, db, partition } => import(&input, &db, &partition),
        Commands::Show { db, partition, limit } => show(&db, &partition, limit),
    }
}

async fn run(db: &str, config: &str) -> Result<()> {
    let cfg = RankerConfig::load(config)?;
    if cfg.partitions.is_empty() {
        bail!("no partitions configured in {config}");
    }
    let store = Arc::new(SledStore::open(db)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cancel = CancelToken::new();

    let mut tasks = Vec::new();
    for partition in &cfg.partitions {
        let mut ranker = RankingOrchestrator::new(partition, cfg.clone(), store.clone(), clock.clone());
        let cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || ranker.run(&cancel));
        tasks.push((partition.name.clone(), handle));
    }
    tracing::info!(partitions = tasks.len(), db, "rankers started");

    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                cancel.cancel();
            }
        })
    };

    for (partition, task) in tasks {
        match task.await {
            Ok(Ok(())) => tracing::info!(partition = partition.as_str(), "ranker stopped"),
            Ok(Err(e)) => tracing::error!(partition = partition.as_str(), error = %e, "ranker failed"),
            Err(e) => tracing::error!(partition = partition.as_str(), error = %e, "ranker task panicked"),
        }
    }
    watcher.abort();
    store.flush()?;
    Ok(())
}

fn input_files(input: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files.sort();
    files
}

fn read_jsonl<R: BufRead>(reader: R) -> Result<Vec<DocumentLine>> {
    let mut docs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        docs.push(serde_json::from_str(&line)?);
    }
    Ok(docs)
}

fn read_json(value: serde_json::Value) -> Result<Vec<DocumentLine>> {
    Ok(match value {
        serde_json::Value::Array(arr) => arr.into_iter().map(serde_json::from_value).collect::<Result<_, _>>()?,
        obj @ serde_json::Value::Object(_) => vec![serde_json::from_value(obj)?],
        _ => Vec::new(),
    })
}

fn import(input: &str, db: &str, partition: &str) -> Result<()> {
    let store = SledStore::open(db)?;
    let now = time::OffsetDateTime::now_utc();
    let (mut stored, mut citations) = (0usize, 0usize);

    for file in input_files(Path::new(input)) {
        let reader = BufReader::new(File::open(&file)?);
        let lines = if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(reader)?
        } else {
            read_json(serde_json::from_reader(reader)?)?
        };
        for line in lines {
            let item = line.into_ingested(partition, now)?;
            store.put_document(&item.document)?;
            store.put_citation_record(partition, item.id(), &item.citations)?;
            stored += 1;
            citations += item.citations.cited.len();
        }
    }
    store.flush()?;
    tracing::info!(stored, citations, partition, "import complete");
    Ok(())
}

fn show(db: &str, partition: &str, limit: usize) -> Result<()> {
    let store = SledStore::open(db)?;
    let rows = store.rankings(partition)?;
    tracing::debug!(rows = rows.len(), partition, "rankings loaded");
    for (rank, (id, record)) in rows.iter().take(limit).enumerate() {
        let url = store.document(partition, id)?.map(|d| d.url).unwrap_or_default();
        println!("{:>3}. {:.6}  {id}  {url}", rank + 1, record.score());
        if let RankingRecord::Cluster { similar, .. } = record {
            for (member, sim) in similar {
                println!("       ~ {member} ({sim:.4})");
            }
        }
    }
    Ok(())
}
