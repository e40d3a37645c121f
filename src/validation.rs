//! Structural checks applied to upstream payloads before they are
//! parsed into typed form. The deep validators report the first
//! violation with a descriptive error; the shallow `is_valid_*` checks
//! are cheap boolean guards.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::{entities::is_known_country, error::CollectorError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("missing or malformed `stocks` object")]
    MissingStocks,
    #[error("missing numeric `timestamp`")]
    MissingTimestamp,
    #[error("country `{0}` is missing its `update` field")]
    CountryMissingUpdate(String),
    #[error("country `{0}` is missing its `stocks` array")]
    CountryMissingStocks(String),
    #[error("item in `{country}` is missing `{field}`")]
    ItemField {
        country: String,
        field: &'static str,
    },
    #[error("missing or malformed `itemmarket` object")]
    MissingItemMarket,
    #[error("`itemmarket` is missing its `item` object")]
    MissingMarketItem,
    #[error("`itemmarket` is missing its `listings` array")]
    MissingListings,
    #[error("snapshot is missing `{0}`")]
    SnapshotField(&'static str),
}

/// Shallow shape check for the travel export.
pub fn is_valid_stock_data(value: &Value) -> bool {
    value.get("stocks").map_or(false, Value::is_object)
        && value.get("timestamp").map_or(false, Value::is_number)
}

/// Shallow shape check for the item market response.
pub fn is_valid_market_data(value: &Value) -> bool {
    value.get("itemmarket").map_or(false, Value::is_object)
}

/// Coerces a JSON value to a number. Numeric strings pass through,
/// anything else yields the default.
pub fn sanitize_number(value: &Value, default: f64) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(default),
        Value::String(s) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Serde adapter over [`sanitize_number`] for feed fields that may
/// arrive as numeric strings.
pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    #[allow(clippy::cast_possible_truncation)]
    let coerced = sanitize_number(&value, 0.0) as i64;
    Ok(coerced)
}

/// Extracts a structured `{error: {code, error}}` envelope, if present.
pub fn upstream_error(value: &Value, status: Option<u16>) -> Option<CollectorError> {
    let envelope = value.get("error")?;
    let message = envelope
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown upstream error")
        .to_owned();
    Some(CollectorError::Upstream {
        code: envelope.get("code").and_then(Value::as_i64),
        status,
        message,
    })
}

/// Deep validation of the YATA travel export. Unknown country codes
/// only warn, so a new destination cannot break collection.
pub fn validate_yata_response(value: &Value) -> Result<(), CollectorError> {
    if let Some(err) = upstream_error(value, None) {
        return Err(err);
    }
    if !value.is_object() {
        return Err(ValidationError::NotAnObject.into());
    }
    let stocks = value
        .get("stocks")
        .and_then(Value::as_object)
        .ok_or(ValidationError::MissingStocks)?;
    if value.get("timestamp").map_or(true, |t| !t.is_number()) {
        return Err(ValidationError::MissingTimestamp.into());
    }

    for (country, entry) in stocks {
        if !is_known_country(country) {
            warn!(%country, "unrecognized country code in feed");
        }
        if entry.get("update").map_or(true, |u| !u.is_number()) {
            return Err(ValidationError::CountryMissingUpdate(country.clone()).into());
        }
        let items = entry
            .get("stocks")
            .and_then(Value::as_array)
            .ok_or_else(|| ValidationError::CountryMissingStocks(country.clone()))?;
        for item in items {
            for field in ["id", "name", "quantity", "cost"] {
                if item.get(field).map_or(true, Value::is_null) {
                    return Err(ValidationError::ItemField {
                        country: country.clone(),
                        field,
                    }
                    .into());
                }
            }
        }
    }

    Ok(())
}

/// Deep validation of the Torn item market response.
pub fn validate_torn_market_response(value: &Value) -> Result<(), CollectorError> {
    if let Some(err) = upstream_error(value, None) {
        return Err(err);
    }
    let market = value
        .get("itemmarket")
        .and_then(Value::as_object)
        .ok_or(ValidationError::MissingItemMarket)?;
    if market.get("item").map_or(true, |i| !i.is_object()) {
        return Err(ValidationError::MissingMarketItem.into());
    }
    if market.get("listings").map_or(true, |l| !l.is_array()) {
        return Err(ValidationError::MissingListings.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed() -> Value {
        json!({
            "timestamp": 1_700_000_000,
            "stocks": {
                "mex": {
                    "update": 1_700_000_000,
                    "stocks": [
                        {"id": 268, "name": "Teddy Bear Plushie", "quantity": 500, "cost": 400}
                    ]
                }
            }
        })
    }

    #[test]
    fn accepts_well_formed_feed() {
        assert!(validate_yata_response(&feed()).is_ok());
        assert!(is_valid_stock_data(&feed()));
    }

    #[test]
    fn accepts_unknown_country_code() {
        let mut value = feed();
        let entry = value["stocks"]["mex"].clone();
        value["stocks"]["atlantis"] = entry;
        assert!(validate_yata_response(&value).is_ok());
    }

    #[test]
    fn rejects_missing_stocks() {
        let value = json!({"timestamp": 1});
        assert!(matches!(
            validate_yata_response(&value),
            Err(CollectorError::Validation(ValidationError::MissingStocks))
        ));
        assert!(!is_valid_stock_data(&value));
    }

    #[test]
    fn rejects_missing_timestamp() {
        let mut value = feed();
        value.as_object_mut().unwrap().remove("timestamp");
        assert!(matches!(
            validate_yata_response(&value),
            Err(CollectorError::Validation(
                ValidationError::MissingTimestamp
            ))
        ));
    }

    #[test]
    fn rejects_country_without_stocks_array() {
        let mut value = feed();
        value["stocks"]["mex"]
            .as_object_mut()
            .unwrap()
            .remove("stocks");
        assert!(matches!(
            validate_yata_response(&value),
            Err(CollectorError::Validation(
                ValidationError::CountryMissingStocks(_)
            ))
        ));
    }

    #[test]
    fn rejects_item_missing_required_fields() {
        for field in ["id", "name", "quantity", "cost"] {
            let mut value = feed();
            value["stocks"]["mex"]["stocks"][0]
                .as_object_mut()
                .unwrap()
                .remove(field);
            let err = validate_yata_response(&value).unwrap_err();
            assert!(
                matches!(
                    err,
                    CollectorError::Validation(ValidationError::ItemField { field: f, .. })
                    if f == field
                ),
                "expected rejection for missing {field}"
            );
        }
    }

    #[test]
    fn surfaces_rate_limit_envelope() {
        let value = json!({"error": {"code": 3, "error": "Too many requests"}});
        let err = validate_yata_response(&value).unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[test]
    fn market_response_checks() {
        let good = json!({
            "itemmarket": {
                "item": {"type": "Plushie", "average_price": 35_000},
                "listings": [{"price": 35_000}]
            }
        });
        assert!(validate_torn_market_response(&good).is_ok());
        assert!(is_valid_market_data(&good));

        let envelope = json!({"error": {"error": "Incorrect key"}});
        assert!(validate_torn_market_response(&envelope).is_err());

        let empty = json!({});
        assert!(matches!(
            validate_torn_market_response(&empty),
            Err(CollectorError::Validation(
                ValidationError::MissingItemMarket
            ))
        ));

        let mut no_listings = good.clone();
        no_listings["itemmarket"]
            .as_object_mut()
            .unwrap()
            .remove("listings");
        assert!(matches!(
            validate_torn_market_response(&no_listings),
            Err(CollectorError::Validation(ValidationError::MissingListings))
        ));
    }

    #[test]
    fn sanitize_number_coercions() {
        assert_eq!(sanitize_number(&json!(1000), 0.0), 1000.0);
        assert_eq!(sanitize_number(&json!("1000"), 0.0), 1000.0);
        assert_eq!(sanitize_number(&json!("not a number"), 0.0), 0.0);
        assert_eq!(sanitize_number(&json!(null), 7.0), 7.0);
        assert_eq!(sanitize_number(&json!([1]), 0.0), 0.0);
    }
}
