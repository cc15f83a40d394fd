//! Initial tabular payload fetch.
//!
//! Only the first client to open an empty document fetches: it pulls the
//! tabular export of the resource and populates the document from it. Later
//! joiners inherit state from peers and never fetch.

use async_trait::async_trait;
use gridmesh_types::{PayloadError, SheetData, parse_export};
use tracing::{info, warn};
use url::Url;

use crate::constants::FETCH_TIMEOUT;

/// Errors from fetching the initial payload.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no payload source configured")]
    Unavailable,
    #[error("invalid payload URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),
}

/// Where first openers get their sheets from.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Sheets for the resource at `path`.
    async fn fetch(&self, path: &str, token: Option<&str>) -> Result<Vec<SheetData>, FetchError>;
}

/// Fetch, falling back to one default (padded on load) empty sheet on any
/// failure. Session start never aborts on a bad payload.
pub async fn initial_sheets(
    source: &dyn PayloadSource,
    path: &str,
    token: Option<&str>,
) -> Vec<SheetData> {
    match source.fetch(path, token).await {
        Ok(sheets) if !sheets.is_empty() => {
            info!("Fetched {} sheets for {}", sheets.len(), path);
            sheets
        }
        Ok(_) => vec![SheetData::default_sheet()],
        Err(FetchError::Unavailable) => vec![SheetData::default_sheet()],
        Err(e) => {
            warn!("Initial fetch for {} failed, starting empty: {}", path, e);
            vec![SheetData::default_sheet()]
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// GETs `<base>/<resource path>` and parses the JSON export.
#[derive(Clone)]
pub struct HttpPayloadSource {
    http: reqwest::Client,
    base: Url,
}

impl HttpPayloadSource {
    pub fn new(base: Url) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("gridmesh/{}", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self { http, base })
    }

    /// Export URL for a resource path.
    pub fn export_url(&self, path: &str) -> Result<Url, FetchError> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        Ok(base.join(path.trim_start_matches('/'))?)
    }
}

#[async_trait]
impl PayloadSource for HttpPayloadSource {
    async fn fetch(&self, path: &str, token: Option<&str>) -> Result<Vec<SheetData>, FetchError> {
        let url = self.export_url(path)?;
        let mut request = self.http.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Http { status: status.as_u16(), body });
        }

        let text = response.text().await?;
        Ok(parse_export(&text)?)
    }
}

// ============================================================================
// Static
// ============================================================================

/// Serves fixed sheets. `StaticPayloadSource::empty()` reports no source.
#[derive(Clone, Debug, Default)]
pub struct StaticPayloadSource {
    sheets: Option<Vec<SheetData>>,
}

impl StaticPayloadSource {
    pub fn new(sheets: Vec<SheetData>) -> Self {
        Self { sheets: Some(sheets) }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayloadSource for StaticPayloadSource {
    async fn fetch(&self, _path: &str, _token: Option<&str>) -> Result<Vec<SheetData>, FetchError> {
        self.sheets.clone().ok_or(FetchError::Unavailable)
    }
}
