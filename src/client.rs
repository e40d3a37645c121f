//! HTTP clients for the two upstreams. Both return raw JSON so the
//! validators can inspect the shape before anything is parsed into
//! typed form. Structured error envelopes are surfaced as
//! [`CollectorError::Upstream`] with the HTTP status attached.

use async_trait::async_trait;
use serde_json::Value;

use crate::{error::CollectorError, validation};

pub const YATA_BASE: &str = "https://yata.yt";
pub const TORN_BASE: &str = "https://api.torn.com";

#[async_trait]
pub trait StockFeedApi: Send + Sync {
    /// Fetches the per-country travel export.
    async fn travel_export(&self) -> Result<Value, CollectorError>;
}

#[async_trait]
pub trait MarketApi: Send + Sync {
    /// Fetches the market listings for one item.
    async fn item_market(&self, item_id: i64) -> Result<Value, CollectorError>;

    /// Fetches the full item catalog, used once to seed the type cache.
    async fn item_catalog(&self) -> Result<Value, CollectorError>;
}

#[derive(Debug, Clone)]
pub struct YataClient {
    http: reqwest::Client,
    base: String,
}

impl YataClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base(http, YATA_BASE)
    }

    pub fn with_base(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
        }
    }
}

#[async_trait]
impl StockFeedApi for YataClient {
    async fn travel_export(&self) -> Result<Value, CollectorError> {
        let url = format!("{}/api/v1/travel/export/", self.base);
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let body: Value = response.json().await?;
        if let Some(err) = validation::upstream_error(&body, Some(status)) {
            return Err(err);
        }
        Ok(body)
    }
}

#[derive(Debug, Clone)]
pub struct TornClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
}

impl TornClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self::with_base(http, TORN_BASE, api_key)
    }

    pub fn with_base(
        http: reqwest::Client,
        base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base: base.into(),
            api_key: api_key.into(),
        }
    }

    async fn get(&self, url: String) -> Result<Value, CollectorError> {
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let body: Value = response.json().await?;
        if let Some(err) = validation::upstream_error(&body, Some(status)) {
            return Err(err);
        }
        Ok(body)
    }
}

#[async_trait]
impl MarketApi for TornClient {
    async fn item_market(&self, item_id: i64) -> Result<Value, CollectorError> {
        self.get(format!(
            "{}/v2/market/{item_id}/itemmarket?offset=0&key={}",
            self.base, self.api_key
        ))
        .await
    }

    async fn item_catalog(&self) -> Result<Value, CollectorError> {
        self.get(format!(
            "{}/torn/?selections=items&key={}",
            self.base, self.api_key
        ))
        .await
    }
}
