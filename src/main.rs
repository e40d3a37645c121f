use axum::{
    routing::{get, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use color_eyre::eyre::eyre;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use torn_stock::{
    client::{TornClient, YataClient},
    collector::{Collector, CycleMode},
    config::Config,
    history::HistoryStore,
    prices::PriceService,
    rate_limit::RateLimiter,
    routes,
    state::StateStore,
    AppState, LiveCollector,
};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    // initialize tracing
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let history = HistoryStore::open(pool.clone()).await?;
    let state_store = StateStore::open(pool).await?;

    let http = reqwest::Client::new();
    let limiter = Arc::new(RateLimiter::new());

    let api_key = config.torn_api_key.clone().unwrap_or_default();
    let collector: Arc<LiveCollector> = Arc::new(Collector::new(
        YataClient::new(http.clone()),
        PriceService::new(
            TornClient::new(http, api_key),
            Arc::clone(&limiter),
            state_store.clone(),
        ),
        history.clone(),
        state_store,
        limiter,
    ));

    let collector_ready = config.torn_api_key.is_some();
    let _scheduler = if collector_ready {
        if let Err(err) = collector.initialize().await {
            // Stay up for history queries; a restart request can retry.
            error!("initialization failed, collector is idle: {err}");
        }
        Some(start_scheduler(&config.poll_schedule, Arc::clone(&collector)).await?)
    } else {
        warn!("TORN_API_KEY is not set, collector stays idle");
        None
    };

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = Router::new()
        .route("/collector/refresh", post(routes::control::manual_refresh))
        .route("/collector/restart", post(routes::control::restart))
        .route("/history/:country/:item_id", get(routes::history::item_history))
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            collector,
            history,
            collector_ready,
        });

    info!("listening on {}", config.bind_addr);
    axum::Server::bind(&config.bind_addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn start_scheduler(
    schedule: &str,
    collector: Arc<LiveCollector>,
) -> color_eyre::Result<JobScheduler> {
    let mut scheduler = JobScheduler::new()
        .await
        .map_err(|e| eyre!("scheduler: {e}"))?;

    let job = Job::new_async(schedule, move |_uuid, _lock| {
        let collector = Arc::clone(&collector);
        Box::pin(async move {
            if let Err(err) = collector.run_cycle(CycleMode::Scheduled).await {
                error!("scheduled cycle failed: {err}");
            }
        })
    })
    .map_err(|e| eyre!("bad poll schedule: {e}"))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| eyre!("scheduler: {e}"))?;
    scheduler.start().await.map_err(|e| eyre!("scheduler: {e}"))?;

    info!(schedule, "periodic collection scheduled");
    Ok(scheduler)
}
