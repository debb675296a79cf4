use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epiboard_core::domain::history::HistoricalSeries;
use epiboard_core::error::SourceError;
use epiboard_core::series::{top_countries, CountrySeries};
use epiboard_core::service::StatsService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = epiboard_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let service = Arc::new(StatsService::from_settings(&settings)?);
    tokio::spawn(poll_history(
        service.clone(),
        Duration::from_secs(settings.poll_interval_secs),
    ));

    let state = AppState {
        service,
        top_countries: settings.top_countries,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/live", get(get_live))
        .route("/live/columns", get(get_live_columns))
        .route("/history", get(get_history))
        .route("/history/countries", get(get_countries))
        .route("/history/top", get(get_top))
        .route("/history/:country", get(get_country))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, source = %settings.source_url, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    service: Arc<StatsService>,
    top_countries: usize,
}

// Keeps the history cache warm. The cache itself decides whether a day has
// passed and a network refresh is due.
async fn poll_history(service: Arc<StatsService>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match service.historical_series().await {
            Ok(series) => tracing::info!(countries = series.len(), "history poll"),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "history poll failed");
            }
        }
    }
}

fn error_status(e: &anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(e);
    tracing::error!(error = %e, "request failed");
    match e.downcast_ref::<SourceError>() {
        Some(err) if err.is_fetch() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ApiLive {
    sorting_allowed: bool,
    columns: Vec<ApiColumn>,
    rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct ApiColumn {
    id: String,
    name: String,
}

async fn get_live(State(state): State<AppState>) -> Result<Json<ApiLive>, StatusCode> {
    let snapshot = state
        .service
        .live_snapshot()
        .await
        .map_err(|e| error_status(&e))?;

    let rows = snapshot
        .rows
        .iter()
        .map(|row| {
            snapshot
                .columns
                .iter()
                .cloned()
                .zip(row.iter().map(|c| serde_json::to_value(c).unwrap_or(Value::Null)))
                .collect::<Map<String, Value>>()
        })
        .collect();

    Ok(Json(ApiLive {
        sorting_allowed: snapshot.sorting_allowed,
        columns: pair_columns(&snapshot.columns, &snapshot.display_columns),
        rows,
    }))
}

async fn get_live_columns(
    State(state): State<AppState>,
) -> Result<Json<Vec<ApiColumn>>, StatusCode> {
    let columns = state
        .service
        .live_columns()
        .await
        .map_err(|e| error_status(&e))?;
    Ok(Json(pair_columns(&columns.canonical, &columns.display)))
}

// Display labels fall back to the id when the source has fewer labels.
fn pair_columns(ids: &[String], names: &[String]) -> Vec<ApiColumn> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| ApiColumn {
            id: id.clone(),
            name: names.get(i).cloned().unwrap_or_else(|| id.clone()),
        })
        .collect()
}

async fn history(state: &AppState) -> Result<Arc<HistoricalSeries>, StatusCode> {
    state
        .service
        .historical_series()
        .await
        .map_err(|e| error_status(&e))
}

async fn get_history(State(state): State<AppState>) -> Result<Json<HistoricalSeries>, StatusCode> {
    let series = history(&state).await?;
    Ok(Json(series.as_ref().clone()))
}

async fn get_countries(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    let series = history(&state).await?;
    Ok(Json(series.countries().map(str::to_string).collect()))
}

#[derive(Debug, Deserialize)]
struct TopQuery {
    limit: Option<usize>,
}

async fn get_top(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Result<Json<Vec<CountrySeries>>, StatusCode> {
    let series = history(&state).await?;
    let limit = query.limit.unwrap_or(state.top_countries);
    let out = top_countries(&series, limit)
        .into_iter()
        .filter_map(|country| {
            series
                .get(&country)
                .map(|records| CountrySeries::from_records(&country, records))
        })
        .collect();
    Ok(Json(out))
}

async fn get_country(
    State(state): State<AppState>,
    Path(country): Path<String>,
) -> Result<Json<CountrySeries>, StatusCode> {
    let series = history(&state).await?;
    let records = series.get(&country).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(CountrySeries::from_records(&country, records)))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &epiboard_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_columns_falls_back_to_ids() {
        let ids = vec!["Country".to_string(), "Cases".to_string()];
        let names = vec!["Country, Other".to_string()];
        let cols = pair_columns(&ids, &names);
        assert_eq!(cols[0].name, "Country, Other");
        assert_eq!(cols[1].name, "Cases");
    }

    #[test]
    fn fetch_errors_map_to_bad_gateway() {
        let err = anyhow::Error::new(SourceError::Fetch {
            url: "https://example.org/".to_string(),
            status: Some(503),
            detail: "unavailable".to_string(),
        });
        assert_eq!(error_status(&err), StatusCode::BAD_GATEWAY);

        let err = anyhow::Error::new(SourceError::parse("live_table", "no table"));
        assert_eq!(error_status(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
