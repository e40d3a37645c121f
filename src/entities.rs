use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::validation::lenient_i64;

/// Foreign countries reachable by travel, with one-way flight time in
/// minutes (standard airstrip).
pub const COUNTRIES: [(&str, &str, i64); 11] = [
    ("mex", "Mexico", 26),
    ("cay", "Cayman Islands", 35),
    ("can", "Canada", 41),
    ("haw", "Hawaii", 134),
    ("uni", "United Kingdom", 159),
    ("arg", "Argentina", 167),
    ("swi", "Switzerland", 175),
    ("jap", "Japan", 225),
    ("chi", "China", 242),
    ("uae", "UAE", 271),
    ("sou", "South Africa", 297),
];

pub fn flight_time_minutes(country: &str) -> Option<i64> {
    COUNTRIES
        .iter()
        .find(|(code, _, _)| *code == country)
        .map(|(_, _, minutes)| *minutes)
}

pub fn is_known_country(country: &str) -> bool {
    COUNTRIES.iter().any(|(code, _, _)| *code == country)
}

/// Static per-item metadata, rebuilt on every metadata reload.
#[derive(Debug, Clone, Serialize)]
pub struct ItemMetadata {
    pub country: String,
    pub id: i64,
    pub name: String,
    pub cost: i64,
    pub flight_time_minutes: i64,
}

/// One persisted quantity observation for an item/country/time triple.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockSnapshot {
    pub timestamp: i64,
    pub country: String,
    pub item_id: i64,
    pub quantity: i64,
    pub trend: Option<f64>,
    pub near_restock: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// A resolved market price, cached for five minutes.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub price: i64,
    pub item_type: Option<String>,
    pub fetched_at_ms: i64,
}

/// Summary of the observed quantity range for one item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RestockOutlook {
    pub min_quantity: i64,
    pub max_quantity: i64,
    pub avg_quantity: f64,
    pub near_min: bool,
}

/// One row of the published per-country report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReportEntry {
    pub id: i64,
    pub name: String,
    pub cost: i64,
    pub flight_time_minutes: i64,
    pub quantity: i64,
    pub market_price: i64,
    pub profit_per_minute: f64,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub item_type: String,
}

/// The aggregated result published wholesale each cycle, keyed by
/// country code.
pub type AggregatedReport = BTreeMap<String, Vec<StockReportEntry>>;

/// Typed form of the YATA travel export, parsed after validation.
#[derive(Debug, Clone, Deserialize)]
pub struct TravelExport {
    pub timestamp: i64,
    pub stocks: BTreeMap<String, CountryStocks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountryStocks {
    pub update: i64,
    pub stocks: Vec<FeedItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedItem {
    pub id: i64,
    pub name: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub quantity: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub cost: i64,
    pub flight_time: Option<i64>,
}

/// Typed form of the Torn item market response.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemMarket {
    pub item: MarketItem,
    pub listings: Vec<MarketListing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub average_price: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketListing {
    #[serde(deserialize_with = "lenient_i64")]
    pub price: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_items_accept_numeric_strings() {
        let item: FeedItem = serde_json::from_value(serde_json::json!({
            "id": 268,
            "name": "Teddy Bear Plushie",
            "quantity": "1000",
            "cost": null
        }))
        .unwrap();
        assert_eq!(item.quantity, 1000);
        assert_eq!(item.cost, 0);
        assert!(item.flight_time.is_none());
    }

    #[test]
    fn flight_table_covers_known_codes() {
        assert_eq!(flight_time_minutes("mex"), Some(26));
        assert_eq!(flight_time_minutes("sou"), Some(297));
        assert_eq!(flight_time_minutes("atlantis"), None);
        assert!(is_known_country("uae"));
        assert!(!is_known_country("atlantis"));
    }
}
