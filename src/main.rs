use sql_policy::catalog::CatalogCache;
use sql_policy::config::{CatalogConfig, PolicyConfig};
use sql_policy::diagnostics::interpret_sql_error;
use sql_policy::policy::{SqlPolicy, ALL_TIME_HINT};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sql-policy")]
#[command(about = "Validate and rewrite LLM-proposed SQL against the analytics allowlist")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a query and print the rewritten form as JSON
    Check {
        /// The proposed SQL
        sql: String,

        /// Bound parameters as a JSON array (e.g. '["Squat", 5]')
        #[arg(long)]
        params: Option<String>,

        /// Skip the default time window
        #[arg(long)]
        all_time: bool,
    },
    /// Print the catalog the validator currently allows
    Catalog {
        /// Reflect the schema even if the cached copy is fresh
        #[arg(long)]
        refresh: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let catalog = CatalogCache::from_config(CatalogConfig::from_env())?;

    match args.command {
        Commands::Check { sql, params, all_time } => {
            let params: Vec<Value> = match params {
                Some(raw) => serde_json::from_str(&raw).context("--params must be a JSON array")?,
                None => Vec::new(),
            };
            let sql = if all_time { format!("{} {}", ALL_TIME_HINT, sql) } else { sql };

            catalog.load(false).await;
            let policy = SqlPolicy::new(PolicyConfig::from_env());
            match policy.check(&sql, params, &catalog) {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                Err(err) => {
                    let diagnosis = interpret_sql_error(&err.to_string());
                    error!("Query rejected: {}", err);
                    println!("{}", serde_json::to_string_pretty(&diagnosis)?);
                    std::process::exit(1);
                }
            }
        }
        Commands::Catalog { refresh } => {
            let tables = catalog.load(refresh).await;
            info!("Serving {} tables (generation {})", tables.len(), catalog.generation());
            println!("{}", catalog.snapshot().context());
        }
    }

    Ok(())
}
