/*
[INPUT]:  Release API JSON payloads
[OUTPUT]: Typed release/asset structs and the resolved ReleaseInfo handed to callers
[POS]:    Data layer - release metadata
[UPDATE]: When the release API schema changes
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};
use crate::version::Version;

/// Raw `releases/latest` response (only the fields we use)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasePayload {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<AssetPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPayload {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
    /// `sha256:<hex>` when the host publishes digests
    #[serde(default)]
    pub digest: Option<String>,
}

impl AssetPayload {
    pub fn sha256(&self) -> Option<String> {
        self.digest
            .as_deref()
            .and_then(|digest| digest.strip_prefix("sha256:"))
            .map(|hex| hex.to_ascii_lowercase())
    }
}

/// A newer release resolved to a single downloadable artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: String,
    pub tag: String,
    pub asset_name: String,
    pub download_url: String,
    /// Declared artifact size in bytes (0 when unknown)
    pub size: u64,
    pub sha256: Option<String>,
}

impl ReleasePayload {
    pub fn version(&self) -> Result<Version> {
        Version::parse(&self.tag_name)
    }

    /// Pick the first asset whose name contains `pattern`, or the first asset.
    pub fn select_asset(&self, pattern: Option<&str>) -> Result<&AssetPayload> {
        let found = match pattern {
            Some(pattern) => self.assets.iter().find(|asset| asset.name.contains(pattern)),
            None => self.assets.first(),
        };
        found.ok_or_else(|| UpdateError::NoAsset {
            tag: self.tag_name.clone(),
            pattern: pattern.map(str::to_string),
        })
    }

    pub fn into_release_info(self, pattern: Option<&str>) -> Result<ReleaseInfo> {
        let version = self.version()?;
        let asset = self.select_asset(pattern)?;
        Ok(ReleaseInfo {
            version: version.to_string(),
            tag: self.tag_name.clone(),
            asset_name: asset.name.clone(),
            download_url: asset.browser_download_url.clone(),
            size: asset.size,
            sha256: asset.sha256(),
        })
    }
}
