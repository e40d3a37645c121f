//! Market price resolution with a short-lived price cache and a
//! persistent item-type cache. Only "Plushie" and "Flower" items are
//! worth a market call; everything else short-circuits to a zero
//! quote once its type is known.

use metrics::increment_counter;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::{
    client::MarketApi,
    entities::{ItemMarket, PriceQuote},
    error::CollectorError,
    rate_limit::{Channel, RateLimiter},
    state::StateStore,
    util::now_epoch_ms,
    validation,
};

pub const TRACKED_TYPES: [&str; 2] = ["Plushie", "Flower"];

const PRICE_TTL: Duration = Duration::from_secs(5 * 60);

/// Listings further than this from the upstream average are treated as
/// outliers.
const PRICE_BAND: f64 = 0.10;
const LISTING_SAMPLE: usize = 5;

pub fn is_tracked_type(item_type: &str) -> bool {
    TRACKED_TYPES.contains(&item_type)
}

pub struct PriceService<M> {
    client: M,
    limiter: Arc<RateLimiter>,
    state: StateStore,
    cache: Cache<i64, PriceQuote>,
    types: RwLock<HashMap<i64, String>>,
}

impl<M: MarketApi> PriceService<M> {
    pub fn new(client: M, limiter: Arc<RateLimiter>, state: StateStore) -> Self {
        Self::with_ttl(client, limiter, state, PRICE_TTL)
    }

    pub fn with_ttl(
        client: M,
        limiter: Arc<RateLimiter>,
        state: StateStore,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            limiter,
            state,
            cache: Cache::builder().time_to_live(ttl).build(),
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Loads the persisted type cache into memory. Called once at
    /// startup, before the first cycle.
    pub async fn load_types(&self) -> Result<usize, CollectorError> {
        let types = self.state.item_types().await?;
        let count = types.len();
        *self.types.write().await = types;
        Ok(count)
    }

    /// Bulk-populates the type cache from the full item catalog, so
    /// the first cycle does not discover types one market call at a
    /// time.
    pub async fn prefetch_types(&self) -> Result<usize, CollectorError> {
        self.limiter.wait(Channel::Market).await;
        let catalog = self.client.item_catalog().await?;
        let items = catalog
            .get("items")
            .and_then(serde_json::Value::as_object)
            .ok_or(CollectorError::Upstream {
                code: None,
                status: None,
                message: "item catalog is missing `items`".to_owned(),
            })?;

        let mut types = HashMap::with_capacity(items.len());
        for (id, item) in items {
            let Ok(id) = id.parse::<i64>() else { continue };
            if let Some(item_type) = item.get("type").and_then(serde_json::Value::as_str) {
                types.insert(id, item_type.to_owned());
            }
        }

        self.state.set_item_types(&types).await?;
        let count = types.len();
        *self.types.write().await = types;
        Ok(count)
    }

    pub async fn known_type_count(&self) -> usize {
        self.types.read().await.len()
    }

    pub async fn cached_type(&self, item_id: i64) -> Option<String> {
        self.types.read().await.get(&item_id).cloned()
    }

    /// A live cached quote, if one exists. Expired entries are never
    /// returned (cache TTL).
    pub fn cached_quote(&self, item_id: i64) -> Option<PriceQuote> {
        self.cache.get(&item_id)
    }

    /// Resolves the market price for one item. Never fails: any
    /// transport or validation error degrades to a zero quote so one
    /// bad item cannot abort a cycle.
    pub async fn price_for_item(&self, item_id: i64) -> PriceQuote {
        match self.lookup(item_id).await {
            Ok(quote) => quote,
            Err(err) => {
                increment_counter!("stock_price_lookup_failed");
                warn!(item_id, "price lookup failed: {err}");
                PriceQuote {
                    price: 0,
                    item_type: None,
                    fetched_at_ms: now_epoch_ms(),
                }
            }
        }
    }

    async fn lookup(&self, item_id: i64) -> Result<PriceQuote, CollectorError> {
        if let Some(hit) = self.cache.get(&item_id) {
            increment_counter!("stock_price_cache_hit");
            return Ok(hit);
        }

        // A known non-tracked type never needs a market call.
        if let Some(cached_type) = self.cached_type(item_id).await {
            if !is_tracked_type(&cached_type) {
                return Ok(PriceQuote {
                    price: 0,
                    item_type: Some(cached_type),
                    fetched_at_ms: now_epoch_ms(),
                });
            }
        }

        self.limiter.wait(Channel::Market).await;
        let raw = self.client.item_market(item_id).await?;
        validation::validate_torn_market_response(&raw)?;
        let market: ItemMarket = serde_json::from_value(raw["itemmarket"].clone())?;

        self.remember_type(item_id, &market.item.item_type).await?;

        if !is_tracked_type(&market.item.item_type) {
            return Ok(PriceQuote {
                price: 0,
                item_type: Some(market.item.item_type),
                fetched_at_ms: now_epoch_ms(),
            });
        }

        let Some(price) = average_listing_price(&market, item_id) else {
            return Ok(PriceQuote {
                price: 0,
                item_type: Some(market.item.item_type),
                fetched_at_ms: now_epoch_ms(),
            });
        };

        let quote = PriceQuote {
            price,
            item_type: Some(market.item.item_type),
            fetched_at_ms: now_epoch_ms(),
        };
        self.cache.insert(item_id, quote.clone()).await;
        Ok(quote)
    }

    async fn remember_type(&self, item_id: i64, item_type: &str) -> Result<(), CollectorError> {
        let mut types = self.types.write().await;
        let previous = types.insert(item_id, item_type.to_owned());
        if previous.as_deref() != Some(item_type) {
            self.state.set_item_types(&types).await?;
        }
        Ok(())
    }
}

/// Averages the first few listings that sit within the price band
/// around the upstream's own average. Listings arrive sorted ascending
/// by price.
fn average_listing_price(market: &ItemMarket, item_id: i64) -> Option<i64> {
    #[allow(clippy::cast_precision_loss)]
    let reference = market.item.average_price as f64;
    let band = reference * PRICE_BAND;

    #[allow(clippy::cast_precision_loss)]
    let survivors: Vec<f64> = market
        .listings
        .iter()
        .map(|l| l.price as f64)
        .filter(|price| (price - reference).abs() <= band)
        .take(LISTING_SAMPLE)
        .collect();

    if survivors.is_empty() {
        warn!(item_id, "no listings within {PRICE_BAND} of the average");
        return None;
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let average = (survivors.iter().sum::<f64>() / survivors.len() as f64).round() as i64;
    Some(average)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use sqlx::SqlitePool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubMarket {
        response: Value,
        calls: AtomicUsize,
    }

    impl StubMarket {
        fn new(response: Value) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketApi for &StubMarket {
        async fn item_market(&self, _item_id: i64) -> Result<Value, CollectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }

        async fn item_catalog(&self) -> Result<Value, CollectorError> {
            Ok(json!({"items": {"268": {"type": "Plushie"}, "5": {"type": "Melee"}}}))
        }
    }

    fn plushie_market(prices: &[i64]) -> Value {
        json!({
            "itemmarket": {
                "item": {"type": "Plushie", "average_price": 35_000},
                "listings": prices.iter().map(|p| json!({"price": p})).collect::<Vec<_>>()
            }
        })
    }

    async fn service<'a>(
        stub: &'a StubMarket,
        ttl: Duration,
    ) -> PriceService<&'a StubMarket> {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let state = StateStore::open(pool).await.unwrap();
        let limiter = Arc::new(RateLimiter::with_delays(
            Duration::ZERO,
            Duration::ZERO,
        ));
        PriceService::with_ttl(stub, limiter, state, ttl)
    }

    #[tokio::test]
    async fn averages_listings_within_the_band() {
        let stub = StubMarket::new(plushie_market(&[34_000, 35_000, 36_000, 90_000]));
        let service = service(&stub, Duration::from_secs(300)).await;

        let quote = service.price_for_item(268).await;
        assert_eq!(quote.price, 35_000);
        assert_eq!(quote.item_type.as_deref(), Some("Plushie"));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_the_network() {
        let stub = StubMarket::new(plushie_market(&[35_000]));
        let service = service(&stub, Duration::from_secs(300)).await;

        let first = service.price_for_item(268).await;
        let second = service.price_for_item(268).await;
        assert_eq!(stub.calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let stub = StubMarket::new(plushie_market(&[35_000]));
        let service = service(&stub, Duration::from_millis(50)).await;

        let first = service.price_for_item(268).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = service.price_for_item(268).await;

        assert_eq!(stub.calls(), 2);
        assert!(second.fetched_at_ms > first.fetched_at_ms);
    }

    #[tokio::test]
    async fn known_non_tracked_type_short_circuits() {
        let stub = StubMarket::new(json!({
            "itemmarket": {
                "item": {"type": "Melee", "average_price": 1_000},
                "listings": [{"price": 1_000}]
            }
        }));
        let service = service(&stub, Duration::from_secs(300)).await;

        let first = service.price_for_item(5).await;
        assert_eq!(first.price, 0);
        assert_eq!(first.item_type.as_deref(), Some("Melee"));
        assert_eq!(stub.calls(), 1);

        // The type is now cached, so the second lookup never fetches.
        let second = service.price_for_item(5).await;
        assert_eq!(second.price, 0);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn no_surviving_listings_means_zero_price() {
        let stub = StubMarket::new(plushie_market(&[90_000, 95_000]));
        let service = service(&stub, Duration::from_secs(300)).await;

        let quote = service.price_for_item(268).await;
        assert_eq!(quote.price, 0);
        assert_eq!(quote.item_type.as_deref(), Some("Plushie"));
    }

    #[tokio::test]
    async fn errors_degrade_to_zero_quote() {
        let stub = StubMarket::new(json!({"error": {"error": "Incorrect key"}}));
        let service = service(&stub, Duration::from_secs(300)).await;

        let quote = service.price_for_item(268).await;
        assert_eq!(quote.price, 0);
        assert!(quote.item_type.is_none());
    }

    #[tokio::test]
    async fn prefetch_seeds_the_type_cache() {
        let stub = StubMarket::new(plushie_market(&[35_000]));
        let service = service(&stub, Duration::from_secs(300)).await;

        assert_eq!(service.known_type_count().await, 0);
        let count = service.prefetch_types().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(service.cached_type(5).await.as_deref(), Some("Melee"));

        // Persisted, so a fresh load sees it.
        let persisted = service.state.item_types().await.unwrap();
        assert_eq!(persisted[&268], "Plushie");
    }
}
