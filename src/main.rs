mod aggregate;
mod conversation;
mod domain;
mod error;
mod lookup;
mod motivation;
mod norm;
mod nutrition;
mod profile;
mod report;
mod store;
mod telegram;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::lookup::{OpenFoodFacts, RetryPolicy};
use crate::store::SqliteStore;
use crate::telegram::{AppState, start_bot};

/// Telegram calorie tracker with a lean-body-mass based daily norm.
#[derive(Parser, Debug)]
#[command(name = "calorie-companion")]
#[command(about = "Track calories against a daily norm derived from lean body mass")]
#[command(version)]
struct Args {
    /// Path to the SQLite database holding profiles, goal history and meals.
    /// Created on first start.
    /// Can also be set via CALORIE_DATABASE environment variable.
    #[arg(
        value_name = "FILE",
        env = "CALORIE_DATABASE",
        default_value = "calorie-companion.db"
    )]
    database: PathBuf,

    /// IANA time zone for users who have not set their own.
    /// Can also be set via CALORIE_DEFAULT_TZ environment variable.
    #[arg(
        long,
        value_name = "ZONE",
        env = "CALORIE_DEFAULT_TZ",
        default_value = "UTC"
    )]
    default_tz: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Values from .env do not override the real environment
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init();

    // Parse command line arguments
    let args = Args::parse();

    if args.default_tz.trim().parse::<chrono_tz::Tz>().is_err() {
        bail!("Unknown default time zone: {}", args.default_tz);
    }

    println!("Opening database: {}", args.database.display());
    let store = SqliteStore::open(&args.database)
        .await
        .with_context(|| format!("Failed to open database {}", args.database.display()))?;

    println!();
    println!("=== Data Summary ===");
    println!();
    println!("Users:         {}", store.user_count().await?);
    println!("Logged meals:  {}", store.entry_count().await?);
    println!("Default zone:  {}", args.default_tz);

    let food_lookup = OpenFoodFacts::new().context("Failed to create food database client")?;
    let state = Arc::new(AppState::new(
        store,
        Box::new(food_lookup),
        RetryPolicy::default(),
        args.default_tz.trim().to_string(),
    ));

    println!();
    println!("Starting bot");
    start_bot(state).await;

    Ok(())
}
