#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(clippy::missing_const_for_fn)]
#![deny(clippy::nursery)]
#![deny(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

//! Operator tool: dump the stored snapshot history for one item in
//! one country, newest window first limited by an optional hour count.
//!
//! Usage: history <country> <item_id> [hours]

use color_eyre::eyre::eyre;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

use torn_stock::{history::HistoryStore, util::now_epoch};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    std::env::set_var(
        "RUST_LOG",
        std::env::var("RUST_LOG").unwrap_or_else(|_| String::from("info")),
    );

    // initialize tracing
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let country = args.next().ok_or_else(|| eyre!("missing country code"))?;
    let item_id: i64 = args
        .next()
        .ok_or_else(|| eyre!("missing item id"))?
        .parse()?;
    let hours: i64 = match args.next() {
        Some(hours) => hours.parse()?,
        None => 24,
    };

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| String::from("sqlite://torn-stock.db?mode=rwc"));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;
    let store = HistoryStore::open(pool).await?;

    let end = now_epoch();
    let snapshots = store
        .query_range(&country, item_id, end - hours * 3600, end)
        .await?;

    info!(
        %country,
        item_id,
        hours,
        rows = snapshots.len(),
        "stored history"
    );
    for snapshot in snapshots {
        info!(
            timestamp = snapshot.timestamp,
            quantity = snapshot.quantity,
            trend = snapshot.trend,
            near_restock = snapshot.near_restock,
            "snapshot"
        );
    }

    Ok(())
}
