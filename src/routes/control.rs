//! Control endpoints standing in for the extension's message channel:
//! manual refresh and collector restart.

use axum::{extract::State, http::StatusCode, Json};
use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{collector::CycleMode, error::AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// Country codes to refresh; empty means all.
    #[serde(default)]
    pub countries: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshed: bool,
}

pub async fn manual_refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    if !state.collector_ready {
        return Err(AppError(color_eyre::eyre::eyre!(
            "no API key configured, collector is idle"
        )));
    }

    increment_counter!("stock_manual_refresh");
    info!(countries = ?payload.countries, "manual refresh requested");

    state
        .collector
        .run_cycle(CycleMode::Manual {
            countries: payload.countries,
        })
        .await?;

    Ok(Json(RefreshResponse { refreshed: true }))
}

pub async fn restart(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    if !state.collector_ready {
        return Err(AppError(color_eyre::eyre::eyre!(
            "no API key configured, collector is idle"
        )));
    }

    info!("collector restart requested");
    state.collector.initialize().await?;
    Ok(StatusCode::NO_CONTENT)
}
