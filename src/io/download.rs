//! Streaming downloads with checksum verification.
//!
//! Bodies are streamed to disk while a SHA-256 digest accumulates, so a
//! checksum failure never costs a second read of the artifact. Mismatching
//! downloads are deleted before the error is returned.

use std::path::Path;

use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
}

/// Download `url` to `dest`, returning the SHA-256 of the body.
pub async fn fetch_to_file(client: &Client, url: &str, dest: &Path) -> Result<String, DownloadError> {
    let response = client.get(url).send().await?.error_for_status()?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
    }
    file.flush().await?;

    Ok(hex::encode(hasher.finalize()))
}

/// Download `url` to `dest` and require the body to hash to
/// `expected_sha256`. On mismatch the file is deleted.
pub async fn fetch_verified(
    client: &Client,
    url: &str,
    dest: &Path,
    expected_sha256: &str,
) -> Result<(), DownloadError> {
    let actual = fetch_to_file(client, url, dest).await?;
    if !actual.eq_ignore_ascii_case(expected_sha256) {
        tokio::fs::remove_file(dest).await.ok();
        return Err(DownloadError::ChecksumMismatch {
            url: url.to_string(),
            expected: expected_sha256.to_string(),
            actual,
        });
    }
    Ok(())
}

/// SHA-256 of a file already on disk, lowercase hex.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_sha256() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello").unwrap();

        assert_eq!(
            file_sha256(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_file_sha256_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        assert_eq!(
            file_sha256(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
