//! Utility to seed the default lookup catalogue (sources, industries, ...).
//!
//! Safe to run repeatedly: values that already exist are left alone.

use rust_crm_api::config::Config;
use rust_crm_api::db::Database;
use rust_crm_api::pg_store::PgStore;
use rust_crm_api::settings::SettingsService;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_crm_api=info,seed_lookups=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url, config.db_max_connections).await?;
    let service = SettingsService::new(Arc::new(PgStore::new(db.pool.clone())));

    let created = service.seed_lookups().await?;
    println!("Seeded lookup values:");
    for (category, count) in &created {
        println!("- {}: {} new", category, count);
    }

    let stats = service.seed_statistics().await?;
    println!();
    println!("Lookup values per category:");
    for (category, count) in &stats {
        println!("- {}: {}", category, count);
    }
    println!();
    println!("Total: {}", stats.values().sum::<usize>());

    Ok(())
}
