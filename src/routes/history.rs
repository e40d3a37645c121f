use axum::{
    extract::{Path, Query, State},
    Json,
};
use metrics::{histogram, increment_counter};
use serde::Deserialize;
use std::time::Instant;

use crate::{entities::StockSnapshot, error::AppError, util::now_epoch, AppState};

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RangeQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// Read-only range query over the stored snapshots.
pub async fn item_history(
    State(state): State<AppState>,
    Path((country, item_id)): Path<(String, i64)>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<StockSnapshot>>, AppError> {
    increment_counter!("stock_history_request");

    let start = Instant::now();
    let snapshots = state
        .history
        .query_range(
            &country,
            item_id,
            query.start.unwrap_or(0),
            query.end.unwrap_or_else(now_epoch),
        )
        .await?;
    histogram!("stock_query", start.elapsed(), "type" => "item_history");

    Ok(Json(snapshots))
}
