pub mod browser;
pub mod http;
pub mod snapshot;

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;
pub use snapshot::SnapshotFetcher;

use async_trait::async_trait;
use url::Url;

use crate::utils::FetchError;

/// Raw markup for one identity, plus the address it was finally served from
/// when the fetcher can observe redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub html: String,
    pub observed_identity: Option<String>,
}

impl RawDocument {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            observed_identity: None,
        }
    }
}

/// Retrieves raw markup for an identity. Implementations may use HTTP, a
/// headless browser, or local snapshots; the pipeline only sees this seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, identity: &str) -> Result<RawDocument, FetchError>;
}

/// Absolute http(s) identities are used as-is; anything else is joined onto
/// `base`.
pub fn resolve_url(base: &Url, identity: &str) -> Result<Url, FetchError> {
    let identity = identity.trim();
    let invalid = |reason: String| FetchError::InvalidIdentity {
        identity: identity.to_string(),
        reason,
    };

    if identity.is_empty() {
        return Err(invalid("empty identity".to_string()));
    }

    let url = match Url::parse(identity) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(identity).map_err(|e| invalid(e.to_string()))?,
        Err(e) => return Err(invalid(e.to_string())),
    };

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}
