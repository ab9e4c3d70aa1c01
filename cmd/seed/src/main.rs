//! `seed`: bootstraps a clinic database.
//!
//! The admin credentials come from `MEDIBOOK_SEED_ADMIN_EMAIL` (default
//! `admin@medibook.local`) and `MEDIBOOK_SEED_ADMIN_PASSWORD` (required).

use std::sync::Arc;

use anyhow::{bail, Context};
use configs::Settings;
use seed::{seed, AdminSeed};
use services::Repositories;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "db-postgres")]
use secrecy::ExposeSecret;

const DEFAULT_ADMIN_EMAIL: &str = "admin@medibook.local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.level)))
        .init();

    let admin = AdminSeed {
        email: std::env::var("MEDIBOOK_SEED_ADMIN_EMAIL").unwrap_or_else(|_| DEFAULT_ADMIN_EMAIL.to_string()),
        password: std::env::var("MEDIBOOK_SEED_ADMIN_PASSWORD")
            .context("MEDIBOOK_SEED_ADMIN_PASSWORD must be set")?,
    };

    let repos = open_database(&settings).await?;
    let report = seed(&repos, &admin).await?;
    println!(
        "seeded {} appointment types, {} availability windows{}",
        report.types_created,
        report.windows_created,
        if report.admin_created { ", admin account" } else { "" }
    );
    Ok(())
}

#[cfg(feature = "db-postgres")]
async fn open_database(settings: &Settings) -> anyhow::Result<Repositories> {
    let Some(url) = &settings.database.url else {
        bail!("database.url is not configured; there is nothing durable to seed");
    };
    let store = storage_adapters::PgStore::connect(url.expose_secret(), settings.database.max_connections).await?;
    store.migrate().await?;
    Ok(Repositories::from_store(Arc::new(store)))
}

#[cfg(not(feature = "db-postgres"))]
async fn open_database(_settings: &Settings) -> anyhow::Result<Repositories> {
    bail!("seed was built without postgres support")
}
