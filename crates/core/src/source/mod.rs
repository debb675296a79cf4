pub mod http;

use crate::error::SourceError;

/// Read-only access to the source site. Returns raw HTML.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch_page(&self, url: &str) -> Result<String, SourceError>;
}
