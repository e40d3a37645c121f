#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(clippy::missing_const_for_fn)]
#![deny(clippy::nursery)]
#![deny(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;

use client::{TornClient, YataClient};

pub mod analysis;
pub mod client;
pub mod collector;
pub mod config;
pub mod entities;
pub mod error;
pub mod history;
pub mod prices;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod util;
pub mod validation;

/// The collector as wired in production, against the real upstreams.
pub type LiveCollector = collector::Collector<YataClient, TornClient>;

#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<LiveCollector>,
    pub history: history::HistoryStore,
    /// Whether an API key was configured; without one the collector
    /// stays idle and refresh requests are rejected.
    pub collector_ready: bool,
}
