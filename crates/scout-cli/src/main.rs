use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use scout_core::filter::{FilterCriteria, RawFilterQuery};
use scout_storage::PgStore;
use scout_sync::{
    connect_store, load_seed_file, BackendKind, CatalogConfig, CatalogService, SeedOutcome,
};
use scout_web::AppState;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "scout-cli")]
#[command(about = "Opportunity Scout command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the JSON API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Load the seed file first if the catalog is empty.
        #[arg(long)]
        seed: bool,
    },
    /// Filter the catalog and print matches.
    Search {
        #[arg(long, default_value = "")]
        q: String,
        #[arg(long = "category", value_delimiter = ',')]
        categories: Vec<String>,
        #[arg(long = "location", value_delimiter = ',')]
        locations: Vec<String>,
        /// Deadline window in days; may be given more than once.
        #[arg(long = "deadline", value_delimiter = ',')]
        deadlines: Vec<String>,
        /// Date windows are measured from. Defaults to today (UTC).
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Populate an empty catalog from a YAML seed file.
    Seed {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Apply pending Postgres migrations.
    Migrate,
    /// List every known tag name.
    Tags,
    /// Replace an opportunity's tags with exactly the given names.
    Retag { id: String, tags: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = CatalogConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        seed: false,
    }) {
        Commands::Serve { port, seed } => {
            let service = service(&config).await?;
            if seed || seeds_memory_store(&config) {
                seed_catalog(&service, &config.seed_file).await?;
            }
            scout_web::serve(AppState::new(service), port.unwrap_or(config.web_port)).await?;
        }
        Commands::Search {
            q,
            categories,
            locations,
            deadlines,
            as_of,
            json,
        } => {
            let (criteria, rejected) = FilterCriteria::parse_lenient(&RawFilterQuery {
                query: q,
                categories,
                locations,
                deadlines,
            });
            for err in &rejected {
                debug!(error = %err, "ignoring filter value");
            }
            let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
            let matches = browse_service(&config).await?.search(&criteria, as_of).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else {
                for o in &matches {
                    println!(
                        "{}  {:<11}  {} ({}) [{}]",
                        o.deadline,
                        o.kind.as_str(),
                        o.title,
                        o.organization,
                        o.location
                    );
                }
                println!("{} match(es)", matches.len());
            }
        }
        Commands::Seed { file } => {
            let path = file.unwrap_or_else(|| config.seed_file.clone());
            let service = service(&config).await?;
            let outcome = seed_catalog(&service, &path).await?;
            if outcome.skipped {
                println!("catalog already has entries; nothing seeded");
            } else {
                println!("seeded {} opportunities from {}", outcome.created, path.display());
            }
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running catalog migrations")?;
            println!("migrations applied");
        }
        Commands::Tags => {
            for name in browse_service(&config).await?.all_tags().await? {
                println!("{name}");
            }
        }
        Commands::Retag { id, tags } => {
            let report = service(&config).await?.reconciler().reconcile(&id, tags).await?;
            println!(
                "retagged {}: linked={} created={}",
                report.opportunity_id,
                report.linked.join(","),
                report.created.join(",")
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SCOUT_LOG_JSON")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn service(config: &CatalogConfig) -> Result<CatalogService> {
    Ok(CatalogService::new(connect_store(config).await?))
}

/// Memory-backed catalogs start empty and are seeded before read-only commands.
async fn browse_service(config: &CatalogConfig) -> Result<CatalogService> {
    let service = service(config).await?;
    if seeds_memory_store(config) {
        seed_catalog(&service, &config.seed_file).await?;
    }
    Ok(service)
}

/// True when the memory backend is selected and the seed file is present. A
/// missing file leaves the catalog empty rather than failing startup.
fn seeds_memory_store(config: &CatalogConfig) -> bool {
    if config.backend != BackendKind::Memory {
        return false;
    }
    if !config.seed_file.exists() {
        warn!(path = %config.seed_file.display(), "seed file not found; starting empty");
        return false;
    }
    true
}

async fn seed_catalog(service: &CatalogService, path: &Path) -> Result<SeedOutcome> {
    let entries = load_seed_file(path).await?;
    let outcome = service
        .seed_if_empty(entries)
        .await
        .with_context(|| format!("seeding from {}", path.display()))?;
    info!(
        path = %path.display(),
        created = outcome.created,
        skipped = outcome.skipped,
        "seed finished"
    );
    Ok(outcome)
}
