//! Pure trend and restock math over an ordered-by-time slice of
//! snapshots. Kept free of I/O so the collector can feed it whatever
//! history it has on hand.

use crate::{
    entities::{RestockOutlook, StockSnapshot},
    util::now_epoch,
};

/// Mean of consecutive percentage changes over the trailing window, in
/// percent. Fewer than two in-window points yield 0. Pairs whose
/// previous quantity is zero are skipped, since the percentage change
/// from an empty shelf is undefined.
pub fn calculate_trend(history: &[StockSnapshot], window_hours: i64) -> f64 {
    let cutoff = now_epoch() - window_hours * 3600;
    let recent: Vec<&StockSnapshot> = history.iter().filter(|s| s.timestamp >= cutoff).collect();
    if recent.len() < 2 {
        return 0.0;
    }

    let mut deltas = Vec::with_capacity(recent.len() - 1);
    for pair in recent.windows(2) {
        let (prev, curr) = (pair[0], pair[1]);
        if prev.quantity == 0 {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        deltas.push((curr.quantity - prev.quantity) as f64 / prev.quantity as f64 * 100.0);
    }
    if deltas.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    mean
}

/// Where the latest observation sits in the historically observed
/// range. `near_min` flags the bottom 20% of the range, the usual
/// prelude to a restock.
pub fn predict_restock(history: &[StockSnapshot]) -> Option<RestockOutlook> {
    if history.len() < 2 {
        return None;
    }

    let quantities: Vec<i64> = history.iter().map(|s| s.quantity).collect();
    let min_quantity = *quantities.iter().min()?;
    let max_quantity = *quantities.iter().max()?;
    #[allow(clippy::cast_precision_loss)]
    let avg_quantity = quantities.iter().sum::<i64>() as f64 / quantities.len() as f64;

    #[allow(clippy::cast_precision_loss)]
    let threshold = min_quantity as f64 + (max_quantity - min_quantity) as f64 * 0.2;
    let latest = history.last()?;
    #[allow(clippy::cast_precision_loss)]
    let near_min = (latest.quantity as f64) <= threshold;

    Some(RestockOutlook {
        min_quantity,
        max_quantity,
        avg_quantity,
        near_min,
    })
}
