pub mod cache;
pub mod domain;
pub mod error;
pub mod extract;
pub mod series;
pub mod service;
pub mod source;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;

    pub const DEFAULT_SOURCE_URL: &str = "https://www.worldometers.info/coronavirus/";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_RETRIES: u32 = 2;
    const DEFAULT_FETCH_CONCURRENCY: usize = 4;
    // Dashboard re-render cadence; does not force a network fetch.
    const DEFAULT_POLL_INTERVAL_SECS: u64 = 20 * 60;
    const DEFAULT_TOP_COUNTRIES: usize = 30;
    const DEFAULT_PROGRESS_EVERY: usize = 25;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub source_url: String,
        pub cache_dir: PathBuf,
        pub http_timeout_secs: u64,
        pub http_retries: u32,
        pub fetch_concurrency: usize,
        pub poll_interval_secs: u64,
        pub top_countries: usize,
        pub refresh_progress_every: usize,
        pub sentry_dsn: Option<String>,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                source_url: DEFAULT_SOURCE_URL.to_string(),
                cache_dir: PathBuf::from("."),
                http_timeout_secs: DEFAULT_TIMEOUT_SECS,
                http_retries: DEFAULT_RETRIES,
                fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
                poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
                top_countries: DEFAULT_TOP_COUNTRIES,
                refresh_progress_every: DEFAULT_PROGRESS_EVERY,
                sentry_dsn: None,
            }
        }
    }

    fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
        std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let defaults = Self::default();
            let settings = Self {
                source_url: std::env::var("SOURCE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(defaults.source_url),
                cache_dir: std::env::var("CACHE_DIR")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or(defaults.cache_dir),
                http_timeout_secs: env_parse::<u64>("HTTP_TIMEOUT_SECS")
                    .unwrap_or(defaults.http_timeout_secs),
                http_retries: env_parse::<u32>("HTTP_RETRIES").unwrap_or(defaults.http_retries),
                fetch_concurrency: env_parse::<usize>("FETCH_CONCURRENCY")
                    .filter(|n| *n >= 1)
                    .unwrap_or(defaults.fetch_concurrency),
                poll_interval_secs: env_parse::<u64>("POLL_INTERVAL_SECS")
                    .filter(|n| *n >= 1)
                    .unwrap_or(defaults.poll_interval_secs),
                top_countries: env_parse::<usize>("TOP_COUNTRIES").unwrap_or(defaults.top_countries),
                refresh_progress_every: env_parse::<usize>("REFRESH_PROGRESS_EVERY")
                    .unwrap_or(defaults.refresh_progress_every),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            };
            settings.source_base()?;
            Ok(settings)
        }

        /// Landing page URL with a trailing slash so relative country links
        /// resolve beneath it.
        pub fn source_base(&self) -> anyhow::Result<reqwest::Url> {
            let mut raw = self.source_url.trim().to_string();
            if !raw.ends_with('/') {
                raw.push('/');
            }
            reqwest::Url::parse(&raw).with_context(|| format!("SOURCE_URL is not a valid URL: {raw}"))
        }
    }

}
