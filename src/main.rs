use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use feedscribe::db::{ConnectionPool, Repository};
use feedscribe::feed::parse_opml_file;
use feedscribe::models::FeedSpec;
use feedscribe::{Collaborators, Config, Pipeline, Result};

/// Pulls RSS/Atom feeds into SQLite, summarizes new articles and appends
/// them to one Markdown document per feed.
#[derive(Parser)]
#[command(name = "feedscribe", version)]
struct Cli {
    /// Path to the TOML config. Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest, enrich, publish and mirror in one go.
    Run {
        /// OPML feed list, overriding `opml_path`.
        #[arg(long)]
        opml: Option<PathBuf>,

        /// Do not mirror the output directory afterwards.
        #[arg(long)]
        skip_sync: bool,
    },

    /// Fetch every feed and store new entries.
    Ingest {
        #[arg(long)]
        opml: Option<PathBuf>,
    },

    /// Fetch article text and summaries for stored entries.
    Enrich,

    /// Append unwritten entries to the Markdown documents.
    Publish,

    /// Mirror the output directory to the remote.
    Sync,

    /// List feed tables with their row counts.
    Tables,

    /// Drop one feed table and its registry entry.
    DropTable { name: String },

    /// Clear every written flag so the next publish starts over.
    ResetWritten,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run { opml, skip_sync } => {
            let feeds = load_feeds(&config, opml.as_deref())?;
            let sync = !skip_sync && config.mirror.enabled;
            let pipeline = Pipeline::open(config.clone(), Collaborators::from_config(&config)?).await?;
            let report = pipeline.run(&feeds, sync).await?;

            println!(
                "Ingested {} new entries from {} feeds ({} fetch failures)",
                report.ingest.inserted, report.ingest.feeds, report.ingest.fetch_failures
            );
            println!(
                "Fetched {} articles, wrote {} summaries",
                report.enrich.text_fetched, report.enrich.summarized
            );
            println!(
                "Published {} entries across {} feeds",
                report.publish.written, report.publish.tables
            );
            match report.mirrored {
                Some(true) => println!("Mirrored {}", config.output_dir),
                Some(false) => println!("Mirror sync failed; see log"),
                None => {}
            }
        }
        Commands::Ingest { opml } => {
            let feeds = load_feeds(&config, opml.as_deref())?;
            let pipeline = Pipeline::open(config.clone(), Collaborators::from_config(&config)?).await?;
            let result = pipeline.ingest(&feeds).await;
            pipeline.close().await;
            let report = result?;
            println!(
                "Ingested {} new entries ({} duplicates, {} invalid) from {} feeds",
                report.inserted, report.duplicates, report.invalid, report.feeds
            );
        }
        Commands::Enrich => {
            let pipeline = Pipeline::open(config.clone(), Collaborators::from_config(&config)?).await?;
            let result = pipeline.enrich().await;
            pipeline.close().await;
            let report = result?;
            println!(
                "Fetched {} articles ({} failed), wrote {} summaries ({} failed)",
                report.text_fetched, report.text_failed, report.summarized, report.summary_failed
            );
        }
        Commands::Publish => {
            let pipeline = Pipeline::open(config.clone(), Collaborators::from_config(&config)?).await?;
            let result = pipeline.publish().await;
            pipeline.close().await;
            let report = result?;
            println!(
                "Published {} entries across {} feeds",
                report.written, report.tables
            );
        }
        Commands::Sync => {
            let pipeline = Pipeline::open(config.clone(), Collaborators::from_config(&config)?).await?;
            let mirrored = pipeline.mirror().await;
            pipeline.close().await;
            match mirrored {
                Some(true) => println!("Mirrored {}", config.output_dir),
                Some(false) => println!("Mirror sync failed; see log"),
                None => println!("Mirror is not configured"),
            }
        }
        Commands::Tables => {
            let pool = open_store(&config).await?;
            let repo = Repository::acquire(&pool).await?;
            for table in repo.list_tables().await? {
                println!("{}\t{}", table, repo.row_count(&table).await?);
            }
            drop(repo);
            pool.close_all().await;
        }
        Commands::DropTable { name } => {
            let pool = open_store(&config).await?;
            let dropped = Repository::acquire(&pool).await?.drop_table(&name).await?;
            pool.close_all().await;
            if dropped {
                println!("Dropped {}", name);
            } else {
                println!("No feed table named {}", name);
            }
        }
        Commands::ResetWritten => {
            let pool = open_store(&config).await?;
            let reset = Repository::acquire(&pool).await?.reset_written_flags().await?;
            pool.close_all().await;
            println!("Cleared {} written flags", reset);
        }
    }

    Ok(())
}

fn load_feeds(config: &Config, opml: Option<&Path>) -> Result<Vec<FeedSpec>> {
    let path = opml.map_or_else(|| PathBuf::from(&config.opml_path), Path::to_path_buf);
    let feeds = parse_opml_file(&path)?;
    tracing::info!("Loaded {} feeds from {}", feeds.len(), path.display());
    Ok(feeds)
}

/// Store access for the maintenance commands, which need no network clients.
async fn open_store(config: &Config) -> Result<ConnectionPool> {
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let pool = ConnectionPool::new(&config.db_path, config.pool.max_connections);
    Repository::acquire(&pool).await?.init_schema().await?;
    Ok(pool)
}
