use axum::response::IntoResponse;
use reqwest::StatusCode;
use thiserror::Error;

use crate::validation::ValidationError;

/// Failures of the collection pipeline. Price lookups absorb these and
/// degrade to a zero quote; feed-level failures abort the whole cycle.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("invalid upstream payload: {0}")]
    Validation(#[from] ValidationError),

    /// Structured error envelope returned by an upstream API.
    #[error("upstream error (code {code:?}, status {status:?}): {message}")]
    Upstream {
        code: Option<i64>,
        status: Option<u16>,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("storage failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("missing configuration: {0}")]
    Config(String),
}

impl CollectorError {
    /// True when the upstream explicitly asked us to slow down.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            Self::Upstream { code: Some(3), .. }
                | Self::Upstream {
                    status: Some(429),
                    ..
                }
        )
    }
}

pub struct AppError(pub color_eyre::eyre::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Something went wrong: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<color_eyre::eyre::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
