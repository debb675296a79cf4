use crate::cache::HistoryCache;
use crate::config::Settings;
use crate::domain::history::{DailyRecord, HistoricalSeries};
use crate::domain::live::{Cell, LiveStatsSnapshot, CANONICAL_COLUMNS};
use crate::error::SourceError;
use crate::extract::html::{self, CountryLink};
use crate::extract::{chart, table};
use crate::source::http::HttpPageSource;
use crate::source::PageSource;
use reqwest::Url;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const MAX_LOGGED_FAILURES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveColumns {
    pub canonical: Vec<String>,
    pub display: Vec<String>,
}

/// Entry point for everything the dashboard reads.
pub struct StatsService {
    source: Arc<dyn PageSource>,
    base: Url,
    cache: Arc<HistoryCache>,
    fetch_concurrency: usize,
    progress_every: usize,
    // Display labels from the most recent live fetch in this process.
    display_columns: tokio::sync::Mutex<Option<Vec<String>>>,
}

impl StatsService {
    pub fn new(source: Arc<dyn PageSource>, base: Url, cache: Arc<HistoryCache>) -> Self {
        Self {
            source,
            base,
            cache,
            fetch_concurrency: 4,
            progress_every: 25,
            display_columns: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let source = HttpPageSource::from_settings(settings)?;
        let cache = HistoryCache::new(settings.cache_dir.clone());
        Ok(Self::new(Arc::new(source), settings.source_base()?, Arc::new(cache))
            .with_fetch_concurrency(settings.fetch_concurrency)
            .with_progress_every(settings.refresh_progress_every))
    }

    pub fn with_fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n.max(1);
        self
    }

    pub fn with_progress_every(mut self, n: usize) -> Self {
        self.progress_every = n;
        self
    }

    pub fn cache(&self) -> &HistoryCache {
        &self.cache
    }

    pub fn source_name(&self) -> &'static str {
        self.source.source_name()
    }

    /// Fetches and normalizes the landing page table. Never cached.
    pub async fn live_snapshot(&self) -> anyhow::Result<LiveStatsSnapshot> {
        let page = self.source.fetch_page(self.base.as_str()).await?;
        let raw = html::first_table(&page)?;
        let normalized = table::normalize(raw);

        *self.display_columns.lock().await = Some(normalized.display_columns.clone());

        let snapshot = build_snapshot(normalized);
        tracing::info!(
            rows = snapshot.rows.len(),
            sorting_allowed = snapshot.sorting_allowed,
            "live snapshot fetched"
        );
        Ok(snapshot)
    }

    /// Canonical ids and the source's labels. Fetches only if no live fetch
    /// has happened yet in this process.
    pub async fn live_columns(&self) -> anyhow::Result<LiveColumns> {
        let cached = self.display_columns.lock().await.clone();
        let display = match cached {
            Some(display) => display,
            None => {
                let snapshot = self.live_snapshot().await?;
                snapshot.display_columns
            }
        };
        Ok(LiveColumns {
            canonical: CANONICAL_COLUMNS.iter().map(|s| s.to_string()).collect(),
            display,
        })
    }

    /// Cached series; refetches at most once per calendar day.
    pub async fn historical_series(&self) -> anyhow::Result<Arc<HistoricalSeries>> {
        self.cache.load(|| self.fetch_all_countries()).await
    }

    /// Refetches and persists regardless of the checkpoint.
    pub async fn refresh_history(&self) -> anyhow::Result<Arc<HistoricalSeries>> {
        self.cache.refresh(|| self.fetch_all_countries()).await
    }

    /// One request per country linked from the landing page, at most
    /// `fetch_concurrency` in flight. Failed countries are skipped; a page
    /// without charts yields an empty series for that country.
    pub async fn fetch_all_countries(&self) -> anyhow::Result<HistoricalSeries> {
        let page = self.source.fetch_page(self.base.as_str()).await?;
        let links = html::country_links(&page, &self.base)?;
        if links.is_empty() {
            return Err(SourceError::parse("country_index", "no country links on landing page").into());
        }

        let total = links.len();
        tracing::info!(countries = total, concurrency = self.fetch_concurrency, "fetching country pages");

        let semaphore = Arc::new(Semaphore::new(self.fetch_concurrency));
        let mut tasks = JoinSet::new();
        for link in links {
            let semaphore = semaphore.clone();
            let source = self.source.clone();
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let result = fetch_country(source.as_ref(), &link).await;
                (link, result)
            });
        }

        let mut collected: Vec<(String, Vec<DailyRecord>)> = Vec::with_capacity(total);
        let mut failures: usize = 0;
        let mut empty: usize = 0;
        let mut processed: usize = 0;
        while let Some(joined) = tasks.join_next().await {
            processed += 1;
            match joined {
                Ok((link, Ok(records))) => {
                    if records.is_empty() {
                        empty += 1;
                        tracing::debug!(country = %link.name, "no chart data on country page");
                    }
                    collected.push((link.name, records));
                }
                Ok((link, Err(err))) => {
                    failures += 1;
                    if failures <= MAX_LOGGED_FAILURES {
                        tracing::warn!(
                            country = %link.name,
                            url = %link.url,
                            failure_count = failures,
                            error = %err,
                            "country fetch failed; skipping country"
                        );
                    }
                }
                Err(err) => {
                    failures += 1;
                    tracing::error!(error = %err, "country fetch task aborted");
                }
            }

            if self.progress_every != 0
                && (processed == total || processed % self.progress_every == 0)
            {
                tracing::info!(
                    processed,
                    total,
                    countries = collected.len(),
                    empty,
                    failures,
                    "history refresh progress"
                );
            }
        }

        if collected.is_empty() {
            return Err(SourceError::parse(
                "history",
                format!("every country page failed ({failures} of {total})"),
            )
            .into());
        }

        let series: BTreeMap<String, Vec<DailyRecord>> = collected.into_iter().collect();
        Ok(HistoricalSeries(series))
    }
}

async fn fetch_country(
    source: &dyn PageSource,
    link: &CountryLink,
) -> Result<Vec<DailyRecord>, SourceError> {
    tracing::debug!(country = %link.name, url = %link.url, "fetching country page");
    let page = source.fetch_page(&link.url).await?;
    let scripts = html::script_texts(&page)?;
    Ok(chart::extract_daily_records(&link.name, &scripts))
}

/// Drops continent subtotal rows, then orders by Cases when the canonical
/// schema applies. Drifted tables keep the source order.
pub fn build_snapshot(normalized: table::NormalizedTable) -> LiveStatsSnapshot {
    let mut snapshot = LiveStatsSnapshot {
        columns: normalized.columns,
        display_columns: normalized.display_columns,
        sorting_allowed: normalized.sorting_allowed,
        rows: normalized.rows,
    };

    match subtotal_columns(&snapshot) {
        Some((country, continent)) => {
            let before = snapshot.rows.len();
            snapshot.rows.retain(|r| !is_subtotal(r, country, continent));
            tracing::debug!(removed = before - snapshot.rows.len(), "dropped subtotal rows");
        }
        None => tracing::warn!("no country/continent columns; subtotal rows kept"),
    }

    if !snapshot.sorting_allowed {
        return snapshot;
    }
    if let Some(cases) = snapshot.column_index("Cases") {
        if snapshot.rows.iter().all(|r| r[cases].as_i64().is_some()) {
            snapshot
                .rows
                .sort_by(|a, b| b[cases].as_i64().cmp(&a[cases].as_i64()));
        } else {
            tracing::warn!("Cases column is not numeric; leaving source order");
        }
    }

    snapshot
}

// Canonical ids first; a drifted table is matched on its raw labels.
fn subtotal_columns(snapshot: &LiveStatsSnapshot) -> Option<(usize, usize)> {
    if snapshot.sorting_allowed {
        return Some((
            snapshot.column_index("Country")?,
            snapshot.column_index("Continents")?,
        ));
    }
    let country = snapshot.columns.iter().position(|c| c.starts_with("Country"))?;
    let continent = snapshot
        .columns
        .iter()
        .position(|c| c == "Continent" || c == "Continents")?;
    Some((country, continent))
}

fn is_subtotal(row: &[Cell], country: usize, continent: usize) -> bool {
    row[country] == row[continent]
}
