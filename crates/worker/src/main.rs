use clap::Parser;
use epiboard_core::service::StatsService;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "epiboard_worker")]
struct Args {
    /// Refresh the history cache even if today's checkpoint is already written.
    #[arg(long)]
    force: bool,

    /// Fetch everything but leave the on-disk cache untouched.
    #[arg(long)]
    dry_run: bool,

    /// Also fetch the live table and log a summary.
    #[arg(long)]
    live: bool,
}

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

    let args = Args::parse();
    let service = StatsService::from_settings(&settings)?;
    let started_at = chrono::Utc::now();

    if args.live {
        match service.live_snapshot().await {
            Ok(snapshot) => {
                let leader = snapshot
                    .typed_rows()
                    .and_then(|rows| rows.into_iter().next())
                    .map(|r| format!("{} ({} cases)", r.country, r.cases));
                tracing::info!(
                    rows = snapshot.rows.len(),
                    sorting_allowed = snapshot.sorting_allowed,
                    leader = leader.as_deref().unwrap_or("-"),
                    "live snapshot"
                );
            }
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "live snapshot failed");
            }
        }
    }

    if args.dry_run {
        let series = service.fetch_all_countries().await?;
        tracing::info!(
            countries = series.len(),
            dry_run = true,
            elapsed_ms = (chrono::Utc::now() - started_at).num_milliseconds(),
            "history fetched (dry-run)"
        );
        return Ok(());
    }

    if !args.force && !service.cache().needs_refresh().await {
        tracing::info!(
            checkpoint = %service.cache().checkpoint_path().display(),
            "history cache is fresh; nothing to do"
        );
        return Ok(());
    }

    match service.refresh_history().await {
        Ok(series) => {
            tracing::info!(
                countries = series.len(),
                source = service.source_name(),
                elapsed_ms = (chrono::Utc::now() - started_at).num_milliseconds(),
                "history cache refreshed"
            );
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "history refresh failed");
            Err(err)
        }
    }
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
