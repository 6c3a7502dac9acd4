/*
[INPUT]:  HTTP configuration (base URL, timeouts), release source coordinates, running version
[OUTPUT]: Configured reqwest client implementing UpdateTransport
[POS]:    HTTP layer - release lookups and streaming artifact download
[UPDATE]: When adding connection options or changing client behavior
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use tokio::io::AsyncWriteExt;

use crate::error::{Result, UpdateError};
use crate::release::{ReleaseInfo, ReleasePayload};
use crate::transport::{ProgressSink, UpdateTransport, artifact_path};
use crate::version::Version;

/// Default release API
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

const RELEASE_ACCEPT: &str = "application/vnd.github+json";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout for API calls. Artifact downloads are not bounded by it.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("autofarm-updater/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Where releases are published
#[derive(Debug, Clone)]
pub struct ReleaseSource {
    pub owner: String,
    pub repo: String,
    pub api_base_url: String,
    /// Substring an asset name must contain; `None` takes the first asset
    pub asset_pattern: Option<String>,
}

impl ReleaseSource {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            asset_pattern: None,
        }
    }
}

/// Release API client
#[derive(Debug)]
pub struct ReleaseClient {
    http_client: Client,
    api_base_url: Url,
    config: ClientConfig,
    source: ReleaseSource,
    current_version: Version,
}

impl ReleaseClient {
    /// Create a new client with default configuration
    pub fn new(source: ReleaseSource, current_version: &str) -> Result<Self> {
        Self::with_config(ClientConfig::default(), source, current_version)
    }

    /// Create a new client with custom configuration
    pub fn with_config(
        config: ClientConfig,
        source: ReleaseSource,
        current_version: &str,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        let mut api_base_url = Url::parse(&source.api_base_url)?;
        if !api_base_url.path().ends_with('/') {
            let path = format!("{}/", api_base_url.path());
            api_base_url.set_path(&path);
        }

        Ok(Self {
            http_client,
            api_base_url,
            config,
            current_version: Version::parse(current_version)?,
            source,
        })
    }

    pub fn current_version(&self) -> &Version {
        &self.current_version
    }

    /// Build request builder for release API endpoints
    fn api_request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = self.api_base_url.join(endpoint)?;
        Ok(self
            .http_client
            .request(method, url)
            .timeout(self.config.timeout)
            .header(ACCEPT, RELEASE_ACCEPT)
            .header(USER_AGENT, &self.config.user_agent))
    }

    /// Fetch the latest published release.
    ///
    /// GET /repos/{owner}/{repo}/releases/latest
    ///
    /// A 404 means the repository has no published release yet.
    pub async fn latest_release(&self) -> Result<Option<ReleasePayload>> {
        let endpoint = format!(
            "repos/{}/{}/releases/latest",
            self.source.owner, self.source.repo
        );
        let response = self.api_request(Method::GET, &endpoint)?.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            tracing::debug!(
                owner = %self.source.owner,
                repo = %self.source.repo,
                "no published release"
            );
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpdateError::api_error(status, body));
        }

        let body = response.text().await?;
        let payload: ReleasePayload = serde_json::from_str(&body)?;
        Ok(Some(payload))
    }
}

#[async_trait]
impl UpdateTransport for ReleaseClient {
    async fn check_version(&self) -> Result<Option<ReleaseInfo>> {
        let Some(payload) = self.latest_release().await? else {
            return Ok(None);
        };
        if payload.draft || payload.prerelease {
            tracing::debug!(tag = %payload.tag_name, "skipping draft/prerelease");
            return Ok(None);
        }

        let latest = payload.version()?;
        if latest <= self.current_version {
            tracing::debug!(
                latest = %latest,
                current = %self.current_version,
                "running version is up to date"
            );
            return Ok(None);
        }

        let info = payload.into_release_info(self.source.asset_pattern.as_deref())?;
        tracing::info!(
            version = %info.version,
            asset = %info.asset_name,
            size = info.size,
            "newer release found"
        );
        Ok(Some(info))
    }

    async fn download_artifact(
        &self,
        release: &ReleaseInfo,
        dest_dir: &Path,
        progress: &mut (dyn ProgressSink + Send),
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = artifact_path(dest_dir, release)?;
        let url = Url::parse(&release.download_url)?;

        let response = self
            .http_client
            .get(url)
            .header(USER_AGENT, &self.config.user_agent)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpdateError::api_error(status, body));
        }

        let total = response
            .content_length()
            .filter(|len| *len > 0)
            .unwrap_or(release.size);
        progress.started(total);

        let file = tokio::fs::File::create(&path).await?;
        let downloaded = match write_body(file, response, progress).await {
            Ok(downloaded) => downloaded,
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    tracing::debug!(path = %path.display(), error = %cleanup, "partial artifact not removed");
                }
                return Err(err);
            }
        };

        tracing::info!(
            path = %path.display(),
            downloaded,
            total,
            "artifact written"
        );
        Ok(path)
    }
}

/// Streams the response body into `file`; returns the number of bytes written.
async fn write_body(
    mut file: tokio::fs::File,
    response: reqwest::Response,
    progress: &mut (dyn ProgressSink + Send),
) -> Result<u64> {
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        progress.advanced(downloaded);
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(downloaded)
}
