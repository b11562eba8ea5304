use anyhow::{Context, Result, anyhow};
use clap::Parser;
use ethvault_accounts::config::Config;
use ethvault_accounts::db::VaultDb;

/// Create the vault schema and tables in Postgres.
#[derive(Parser, Debug)]
#[command(name = "vault-migrate")]
struct Args {
    /// Postgres URL. Defaults to VAULT_DB_URL, then DATABASE_URL.
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("load configuration")?;
    let database_url = args
        .database_url
        .or(config.db_url)
        .ok_or_else(|| anyhow!("no database url: pass --database-url or set VAULT_DB_URL"))?;

    let db = VaultDb::connect(&database_url, &config.service_name).await?;
    db.ensure_schema().await?;
    tracing::info!(service = %db.service_name(), "vault schema is up to date");
    Ok(())
}
