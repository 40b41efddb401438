use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use skein_client::{PageParser, ReqwestFetcher};
use skein_core::{
    DedupFilter, Engine, EngineConfig, Extractor, Generator, MemoryFilter, NullFilter, Pipeline,
    ProcessorRef, SchemaValidator, SerialRegistry, print_record,
};
use skein_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "skein", version, about = "Concurrent web crawl engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl from one or more seed URLs, printing one JSON record per page
    Crawl(CrawlArgs),

    /// Show records saved by `crawl --save`
    Records {
        /// Only show records for this URL
        #[arg(short, long)]
        url: Option<String>,

        /// Number of records to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(clap::Args)]
struct CrawlArgs {
    /// Seed URLs
    #[arg(required = true)]
    urls: Vec<String>,

    /// Fetch workers (0 = one task per request)
    #[arg(short, long, env = "SKEIN_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Stop following links beyond this depth (seeds are depth 0)
    #[arg(short = 'd', long)]
    max_depth: Option<u64>,

    /// Only follow links on the same host as the page
    #[arg(long, default_value_t = false)]
    same_host: bool,

    /// Dedup filter
    #[arg(long, value_enum, default_value_t = FilterKind::Memory)]
    filter: FilterKind,

    /// Save records to the database (requires DATABASE_URL)
    #[arg(long, default_value_t = false)]
    save: bool,

    /// JSON Schema that every record must satisfy
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Drop records failing the schema instead of reporting them
    #[arg(long, default_value_t = false, requires = "schema")]
    drop_invalid: bool,

    #[arg(long, env = "SKEIN_REQUEST_BUFFER", default_value_t = 100)]
    request_buffer: usize,

    #[arg(long, env = "SKEIN_RESULT_BUFFER", default_value_t = 100)]
    result_buffer: usize,

    #[arg(long, env = "SKEIN_RECORD_BUFFER", default_value_t = 100)]
    record_buffer: usize,

    /// Bound on concurrent extractions
    #[arg(long, env = "SKEIN_EXTRACT_WORKERS")]
    extract_workers: Option<usize>,

    /// Bound on concurrent sink runs
    #[arg(long, env = "SKEIN_SINK_WORKERS")]
    sink_workers: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Allow fetching private and loopback addresses
    #[arg(long, default_value_t = false)]
    allow_private_urls: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FilterKind {
    /// Exact in-memory set, forgotten on exit
    Memory,
    /// Fingerprint set in PostgreSQL, shared across runs (requires DATABASE_URL)
    Postgres,
    /// No deduplication
    None,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("skein=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl(args) => cmd_crawl(args).await?,
        Commands::Records { url, limit } => {
            let (db, _) = connect_db().await?;
            cmd_records(url.as_deref(), limit, &db).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<(Database, DatabaseConfig)> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok((db, config))
}

async fn cmd_crawl(args: CrawlArgs) -> Result<()> {
    let mut config = EngineConfig::default()
        .with_workers(args.workers)
        .with_buffers(args.request_buffer, args.result_buffer, args.record_buffer);
    if let Some(n) = args.extract_workers {
        config = config.with_extract_workers(n);
    }
    if let Some(n) = args.sink_workers {
        config = config.with_sink_workers(n);
    }

    let mut fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(args.timeout))
        .context("Failed to create HTTP client")?;
    if args.allow_private_urls {
        fetcher = fetcher.allow_private_urls();
    }

    let mut page = PageParser::new();
    if let Some(depth) = args.max_depth {
        page = page.with_max_depth(depth);
    }
    if args.same_host {
        page = page.same_host();
    }
    let extractor = Extractor::single(Arc::new(page));

    let db = if args.save || args.filter == FilterKind::Postgres {
        Some(connect_db().await?)
    } else {
        None
    };

    let mut processors: Vec<ProcessorRef> = Vec::new();
    if let Some(path) = &args.schema {
        let mut validator = SchemaValidator::from_file(path).map_err(|e| anyhow::anyhow!(e))?;
        if args.drop_invalid {
            validator = validator.dropping();
        }
        processors.push(Arc::new(validator));
    }
    if let (true, Some((db, _))) = (args.save, &db) {
        processors.push(Arc::new(db.record_repo()));
    }
    processors.push(print_record());
    let pipeline = Pipeline::new(processors).map_err(|e| anyhow::anyhow!(e))?;

    let source = Generator::from_urls(&args.urls).map_err(|e| anyhow::anyhow!(e))?;

    match args.filter {
        FilterKind::Memory => {
            crawl(fetcher, extractor, pipeline, MemoryFilter::new(), config, source).await
        }
        FilterKind::None => crawl(fetcher, extractor, pipeline, NullFilter, config, source).await,
        FilterKind::Postgres => {
            let Some((db, db_config)) = &db else {
                anyhow::bail!("--filter postgres requires DATABASE_URL");
            };
            let filter = db.fingerprint_filter(&db_config.filter_set);
            tracing::info!(set = %db_config.filter_set, "Using persistent dedup set");
            crawl(fetcher, extractor, pipeline, filter, config, source).await
        }
    }
}

/// Run one engine until the crawl drains or Ctrl-C, then print its summary.
async fn crawl<D: DedupFilter>(
    fetcher: ReqwestFetcher,
    extractor: Extractor,
    pipeline: Pipeline,
    filter: D,
    config: EngineConfig,
    source: Generator,
) -> Result<()> {
    let registry = SerialRegistry::new();
    let engine = Engine::new(fetcher, extractor, pipeline, filter, config, &registry)
        .map_err(|e| anyhow::anyhow!(e))?;
    let (handle, mut errors) = engine.run(source);

    let mut failures = 0usize;
    let mut duplicates = 0usize;
    let mut log_error = |err: skein_core::CrawlError| {
        if err.is_duplicate() {
            duplicates += 1;
            tracing::debug!(error = %err, "Skipped");
        } else {
            failures += 1;
            tracing::warn!(error = %err, "Crawl error");
        }
    };

    {
        let drained = handle.wait_drained();
        tokio::pin!(drained);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut drained => {
                    tracing::info!("Crawl drained");
                    break;
                }
                _ = &mut ctrl_c => {
                    tracing::warn!("Interrupted, shutting down");
                    break;
                }
                Some(err) = errors.recv() => log_error(err),
            }
        }
    }

    let summary = handle.summary();
    handle.shutdown().await;
    while let Some(err) = errors.recv().await {
        log_error(err);
    }

    eprintln!("{summary}");
    eprintln!("errors: {failures} | duplicates skipped: {duplicates}");
    Ok(())
}

async fn cmd_records(url: Option<&str>, limit: usize, db: &Database) -> Result<()> {
    let repo = db.record_repo();
    let records = repo
        .list_recent(url, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if records.is_empty() {
        match url {
            Some(url) => println!("No records found for url={url}"),
            None => println!("No records found"),
        }
        return Ok(());
    }

    for record in &records {
        println!(
            "  {} {} {} (hash: {}...)",
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.id,
            record.url.as_deref().unwrap_or("-"),
            short_hash(&record.data_hash),
        );
    }

    let total = repo.count().await.map_err(|e| anyhow::anyhow!(e))?;
    println!("\nShowing {} of {} records", records.len(), total);

    Ok(())
}

/// First eight characters of a stored hash, or all of it if shorter.
fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
