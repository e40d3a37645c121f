//! The collection cycle: fetch the travel export, log quantity
//! snapshots with derived analytics, correlate tracked items with
//! market prices, and publish the per-country report.

use chrono::Utc;
use metrics::{histogram, increment_counter};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{
    analysis,
    client::{MarketApi, StockFeedApi},
    entities::{
        flight_time_minutes, AggregatedReport, ItemMetadata, PriceQuote, StockReportEntry,
        StockSnapshot, TravelExport,
    },
    error::CollectorError,
    history::HistoryStore,
    prices::{is_tracked_type, PriceService},
    rate_limit::{Channel, RateLimiter},
    state::StateStore,
    util::now_epoch,
    validation,
};

const TREND_WINDOW_HOURS: i64 = 24;

/// Backoff applied when the feed explicitly signals a rate limit
/// during the metadata load.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum CycleMode {
    /// Periodic quantity-only cycle; never fetches prices.
    Scheduled,
    /// User-triggered cycle that also fetches live market prices. An
    /// empty country list means all countries.
    Manual { countries: Vec<String> },
}

impl CycleMode {
    fn country_filter(&self) -> Option<&[String]> {
        match self {
            Self::Scheduled => None,
            Self::Manual { countries } if countries.is_empty() => None,
            Self::Manual { countries } => Some(countries),
        }
    }

    const fn fetches_prices(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }
}

pub struct Collector<F, M> {
    feed: F,
    prices: PriceService<M>,
    history: HistoryStore,
    state: StateStore,
    limiter: Arc<RateLimiter>,
    metadata: RwLock<HashMap<(String, i64), ItemMetadata>>,
    // Serializes cycles so the timer and a manual refresh can never
    // mutate shared caches mid-flight.
    cycle_lock: Mutex<()>,
}

impl<F: StockFeedApi, M: MarketApi> Collector<F, M> {
    pub fn new(
        feed: F,
        prices: PriceService<M>,
        history: HistoryStore,
        state: StateStore,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            feed,
            prices,
            history,
            state,
            limiter,
            metadata: RwLock::new(HashMap::new()),
            cycle_lock: Mutex::new(()),
        }
    }

    pub const fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Loads static metadata and seeds the item-type cache. Metadata
    /// is required for all downstream computation, so any failure here
    /// propagates.
    pub async fn initialize(&self) -> Result<(), CollectorError> {
        self.load_static_metadata().await?;

        if self.prices.load_types().await? == 0 {
            match self.prices.prefetch_types().await {
                Ok(count) => info!(count, "seeded item type cache from the catalog"),
                // Types are then discovered per item on demand.
                Err(err) => warn!("bulk item type fetch failed: {err}"),
            }
        }
        Ok(())
    }

    /// Rebuilds the `(country, item) -> metadata` map from the feed.
    /// When the upstream answers with a rate-limit envelope it has
    /// asked for a slowdown, so we back off a fixed delay and try
    /// again for as long as it takes.
    pub async fn load_static_metadata(&self) -> Result<(), CollectorError> {
        let export = loop {
            self.limiter.wait(Channel::BulkFeed).await;
            let raw = match self.feed.travel_export().await {
                Ok(raw) => raw,
                Err(err) if err.is_rate_limit() => {
                    warn!("feed rate limited during metadata load, backing off: {err}");
                    tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                    continue;
                }
                Err(err) => return Err(err),
            };
            match validation::validate_yata_response(&raw) {
                Ok(()) => {}
                Err(err) if err.is_rate_limit() => {
                    warn!("feed rate limited during metadata load, backing off: {err}");
                    tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                    continue;
                }
                Err(err) => return Err(err),
            }
            break serde_json::from_value::<TravelExport>(raw)?;
        };

        let mut map = HashMap::new();
        for (country, entry) in &export.stocks {
            for item in &entry.stocks {
                if item.id <= 0 || item.name.is_empty() {
                    continue;
                }
                let flight = flight_time_minutes(country)
                    .or(item.flight_time)
                    .unwrap_or_else(|| {
                        warn!(%country, item.id, "no flight time known, assuming 0");
                        0
                    });
                map.insert(
                    (country.clone(), item.id),
                    ItemMetadata {
                        country: country.clone(),
                        id: item.id,
                        name: item.name.clone(),
                        cost: item.cost,
                        flight_time_minutes: flight,
                    },
                );
            }
        }

        info!(items = map.len(), "static metadata loaded");
        *self.metadata.write().await = map;
        Ok(())
    }

    /// Runs one full cycle. Feed-level failures abort before anything
    /// is published; snapshots already written stay written.
    pub async fn run_cycle(&self, mode: CycleMode) -> Result<(), CollectorError> {
        let _guard = self.cycle_lock.lock().await;
        let cycle_start = Instant::now();
        increment_counter!("stock_cycle");

        self.limiter.wait(Channel::BulkFeed).await;
        let raw = self.feed.travel_export().await?;
        validation::validate_yata_response(&raw)?;
        let export: TravelExport = serde_json::from_value(raw)?;

        let filter = mode.country_filter();
        let in_scope = |country: &str| {
            filter.map_or(true, |countries| {
                countries.iter().any(|c| c == country)
            })
        };

        // Log snapshots tagged with trend and restock analytics.
        let mut observed_items = BTreeSet::new();
        for (country, entry) in &export.stocks {
            if !in_scope(country) {
                continue;
            }
            for item in &entry.stocks {
                let history = self
                    .history
                    .query_range(country, item.id, 0, now_epoch())
                    .await?;
                let trend = analysis::calculate_trend(&history, TREND_WINDOW_HOURS);
                let outlook = analysis::predict_restock(&history);

                self.history
                    .save_snapshot(&StockSnapshot {
                        timestamp: export.timestamp,
                        country: country.clone(),
                        item_id: item.id,
                        quantity: item.quantity,
                        trend: Some(trend),
                        near_restock: outlook.map(|o| o.near_min),
                        created_at: Utc::now(),
                    })
                    .await?;
                observed_items.insert(item.id);
            }
        }

        // Manual refresh fetches live prices, one item at a time; the
        // rate limiter depends on these never running in parallel.
        let mut fetched: HashMap<i64, PriceQuote> = HashMap::new();
        if mode.fetches_prices() {
            for item_id in &observed_items {
                let quote = self.prices.price_for_item(*item_id).await;
                fetched.insert(*item_id, quote);
            }
        }

        // Aggregate tracked items into the per-country report.
        let metadata = self.metadata.read().await;
        let mut report = AggregatedReport::new();
        for (country, entry) in &export.stocks {
            if !in_scope(country) {
                continue;
            }
            for item in &entry.stocks {
                let Some(meta) = metadata.get(&(country.clone(), item.id)) else {
                    continue;
                };
                let quote = fetched
                    .get(&item.id)
                    .cloned()
                    .or_else(|| self.prices.cached_quote(item.id));

                let item_type = match &quote {
                    Some(q) if q.item_type.is_some() => q.item_type.clone(),
                    _ => self.prices.cached_type(item.id).await,
                };
                let Some(item_type) = item_type else { continue };
                if !is_tracked_type(&item_type) {
                    continue;
                }

                let market_price = quote.map_or(0, |q| q.price);
                report
                    .entry(country.clone())
                    .or_insert_with(Vec::new)
                    .push(StockReportEntry {
                        id: meta.id,
                        name: meta.name.clone(),
                        cost: meta.cost,
                        flight_time_minutes: meta.flight_time_minutes,
                        quantity: item.quantity,
                        market_price,
                        profit_per_minute: profit_per_minute(
                            meta.cost,
                            market_price,
                            meta.flight_time_minutes,
                        ),
                        timestamp: export.timestamp,
                        item_type,
                    });
            }
        }
        drop(metadata);

        let version = self.state.publish_report(&report).await?;
        histogram!("stock_cycle_time", cycle_start.elapsed());
        info!(
            version,
            countries = report.len(),
            items = observed_items.len(),
            "cycle complete"
        );
        Ok(())
    }
}

/// The ranking metric: one-way profit per minute of flight. The
/// round-trip divisor variant was dropped; the flight time here is
/// one-way, and relative ordering is unchanged either way.
pub fn profit_per_minute(cost: i64, market_price: i64, flight_time_minutes: i64) -> f64 {
    if flight_time_minutes <= 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let per_minute = (market_price - cost) as f64 / flight_time_minutes as f64;
    per_minute
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profit_is_zero_without_flight_time() {
        assert_eq!(profit_per_minute(400, 35_000, 0), 0.0);
        assert_eq!(profit_per_minute(400, 35_000, -5), 0.0);
    }

    #[test]
    fn profit_divides_margin_by_flight_time() {
        assert_eq!(profit_per_minute(400, 35_000, 26), (35_000.0 - 400.0) / 26.0);
        // A losing item is simply negative, not clamped.
        assert_eq!(profit_per_minute(5_000, 1_000, 10), -400.0);
    }
}
