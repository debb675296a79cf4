use std::fmt;

/// Failure taxonomy for the scrape pipeline. Travels inside `anyhow::Error` so
/// callers can `downcast_ref::<SourceError>()` to decide how to react.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Transport failure or non-success HTTP status.
    Fetch {
        url: String,
        status: Option<u16>,
        detail: String,
    },
    /// Expected table/script structure absent or malformed.
    Parse { stage: &'static str, detail: String },
    /// Persisting the historical cache failed.
    CacheWrite { path: String, detail: String },
}

impl SourceError {
    pub fn parse(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::Parse {
            stage,
            detail: detail.into(),
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }

    /// Transport errors and 429/5xx are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch { status: None, .. } => true,
            Self::Fetch {
                status: Some(code), ..
            } => *code == 429 || (500..=599).contains(code),
            _ => false,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch {
                url,
                status: Some(status),
                detail,
            } => write!(f, "fetch error (url={url}, status={status}): {detail}"),
            Self::Fetch {
                url,
                status: None,
                detail,
            } => write!(f, "fetch error (url={url}): {detail}"),
            Self::Parse { stage, detail } => write!(f, "parse error (stage={stage}): {detail}"),
            Self::CacheWrite { path, detail } => {
                write!(f, "cache write error (path={path}): {detail}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// A column that could not be converted to its numeric type. Never fatal; the
/// column is left as text and this is logged.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionError {
    pub column: String,
    pub target: &'static str,
    pub value: String,
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot coerce column {} to {}: invalid value {:?}",
            self.column, self.target, self.value
        )
    }
}

impl std::error::Error for CoercionError {}
