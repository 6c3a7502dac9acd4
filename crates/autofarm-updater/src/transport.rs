/*
[INPUT]:  Release lookups and artifact downloads requested by the update coordinator
[OUTPUT]: UpdateTransport/ProgressSink seams plus artifact verification
[POS]:    Transport layer - the only surface the application core depends on
[UPDATE]: When changing what a transport must report during a download
*/

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{Result, UpdateError};
use crate::release::ReleaseInfo;

const VERIFY_CHUNK_SIZE: usize = 64 * 1024;

/// Receives download progress from a transport.
///
/// `started` is called once before any byte is reported; `advanced` receives the
/// cumulative number of bytes written so far.
pub trait ProgressSink {
    fn started(&mut self, total: u64);
    fn advanced(&mut self, downloaded: u64);
}

/// Source of newer releases and their artifacts.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    /// Returns the newest release if it is strictly newer than the running build.
    async fn check_version(&self) -> Result<Option<ReleaseInfo>>;

    /// Streams the release artifact into `dest_dir` and returns the written path.
    async fn download_artifact(
        &self,
        release: &ReleaseInfo,
        dest_dir: &Path,
        progress: &mut (dyn ProgressSink + Send),
    ) -> Result<PathBuf>;
}

/// Checks that a downloaded artifact is complete and matches its published digest.
pub async fn verify_artifact(path: &Path, release: &ReleaseInfo) -> Result<()> {
    let metadata = tokio::fs::metadata(path).await?;
    if release.size > 0 && metadata.len() != release.size {
        return Err(UpdateError::Integrity(format!(
            "{} is {} bytes, expected {}",
            path.display(),
            metadata.len(),
            release.size
        )));
    }

    if let Some(expected) = release.sha256.as_deref() {
        let actual = sha256_file(path).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(UpdateError::Integrity(format!(
                "{} sha256 {actual} does not match published {expected}",
                path.display()
            )));
        }
    }

    tracing::debug!(
        path = %path.display(),
        size = metadata.len(),
        digest_checked = release.sha256.is_some(),
        "artifact verified"
    );
    Ok(())
}

async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; VERIFY_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Final path component of an asset name, refusing names that escape `dest_dir`.
pub(crate) fn artifact_path(dest_dir: &Path, release: &ReleaseInfo) -> Result<PathBuf> {
    let file_name = Path::new(&release.asset_name)
        .file_name()
        .ok_or_else(|| UpdateError::NoAsset {
            tag: release.tag.clone(),
            pattern: Some(release.asset_name.clone()),
        })?;
    Ok(dest_dir.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(size: u64, sha256: Option<&str>) -> ReleaseInfo {
        ReleaseInfo {
            version: "2.0.0".to_string(),
            tag: "v2.0.0".to_string(),
            asset_name: "autofarm.bin".to_string(),
            download_url: "http://localhost/autofarm.bin".to_string(),
            size,
            sha256: sha256.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_verify_accepts_matching_size_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autofarm.bin");
        tokio::fs::write(&path, b"hello").await.unwrap();

        // sha256("hello")
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        verify_artifact(&path, &release(5, Some(digest))).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autofarm.bin");
        tokio::fs::write(&path, b"hel").await.unwrap();

        let err = verify_artifact(&path, &release(5, None)).await.unwrap_err();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn test_verify_rejects_digest_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autofarm.bin");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let err = verify_artifact(&path, &release(0, Some("00ff"))).await.unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_artifact_path_strips_directories() {
        let mut info = release(0, None);
        info.asset_name = "../../etc/autofarm.bin".to_string();
        let path = artifact_path(Path::new("/tmp/updates"), &info).unwrap();
        assert_eq!(path, Path::new("/tmp/updates/autofarm.bin"));
    }
}
