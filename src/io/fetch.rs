//! Repository index and package fetching.
//!
//! Indices are fetched together with their detached signatures and verified
//! through the external gpg binary before anything trusts them. Package
//! downloads land in the content-keyed cache; a cached artifact whose
//! checksum still matches is reused without touching the network.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::repo::{RepoError, Repository, RepositoryIndex};
use crate::io::download::{self, DownloadError};

/// Concurrent package downloads per transaction.
const DOWNLOAD_PARALLELISM: usize = 12;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("signature verification failed for {0}")]
    BadSignature(PathBuf),

    #[error("gpg binary not found; install gnupg or pass --skip-gpg")]
    GpgMissing,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Network-facing side of a transaction.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    /// Skip signature verification entirely (`--skip-gpg`).
    pub skip_gpg: bool,
    /// Never hit the network; only cached artifacts are acceptable
    /// (`--skip-download`).
    pub skip_download: bool,
}

impl Fetcher {
    pub fn new(skip_gpg: bool, skip_download: bool) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("basalt/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(DownloadError::Http)?;
        Ok(Self {
            client,
            skip_gpg,
            skip_download,
        })
    }

    /// Refresh the index of every enabled repository into `state_dir`.
    ///
    /// Each repo contributes `{id}.idx` and `{id}.idx.sig`; a failed
    /// signature check deletes both artifacts and fails the sync.
    pub async fn sync_indices(
        &self,
        repos: &[Repository],
        state_dir: &Path,
    ) -> Result<Vec<(Repository, RepositoryIndex)>, FetchError> {
        tokio::fs::create_dir_all(state_dir).await?;
        let mut indices = Vec::new();

        for repo in repos.iter().filter(|r| r.enabled) {
            let idx_path = state_dir.join(format!("{}.idx", repo.id));
            let sig_path = state_dir.join(format!("{}.idx.sig", repo.id));

            if !self.skip_download {
                let idx_url = format!("{}/{}.idx", repo.url, repo.id);
                let sig_url = format!("{}.sig", idx_url);

                tracing::info!(repo = %repo.id, url = %idx_url, "syncing repository index");
                download::fetch_to_file(&self.client, &idx_url, &idx_path).await?;
                download::fetch_to_file(&self.client, &sig_url, &sig_path).await?;
            }

            if !self.skip_gpg {
                if let Err(e) = verify_signature(&idx_path, &sig_path) {
                    tokio::fs::remove_file(&idx_path).await.ok();
                    tokio::fs::remove_file(&sig_path).await.ok();
                    return Err(e);
                }
                tracing::debug!(repo = %repo.id, "index signature ok");
            }

            indices.push((repo.clone(), RepositoryIndex::load(&idx_path)?));
        }

        Ok(indices)
    }

    /// Load previously synced indices from `state_dir` without any network
    /// or signature work. Missing indices are skipped.
    pub fn load_cached_indices(
        repos: &[Repository],
        state_dir: &Path,
    ) -> Result<Vec<(Repository, RepositoryIndex)>, FetchError> {
        let mut indices = Vec::new();
        for repo in repos.iter().filter(|r| r.enabled) {
            let idx_path = state_dir.join(format!("{}.idx", repo.id));
            if idx_path.exists() {
                indices.push((repo.clone(), RepositoryIndex::load(&idx_path)?));
            } else {
                tracing::warn!(repo = %repo.id, "no cached index; run `basalt sync`");
            }
        }
        Ok(indices)
    }

    /// Download a set of package archives into `cache_dir`, at most
    /// [`DOWNLOAD_PARALLELISM`] at a time. Cached files with a matching
    /// checksum are reused. Returns the path per job, input order.
    pub async fn download_packages(
        &self,
        jobs: Vec<PackageDownload>,
        cache_dir: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        tokio::fs::create_dir_all(cache_dir).await?;

        let semaphore = Arc::new(Semaphore::new(DOWNLOAD_PARALLELISM));
        let mut set: JoinSet<Result<(usize, PathBuf), FetchError>> = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let dest = cache_dir.join(&job.filename);
            let client = self.client.clone();
            let skip_download = self.skip_download;
            let semaphore = semaphore.clone();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");

                if dest.exists() {
                    let cached = download::file_sha256(&dest)?;
                    if cached.eq_ignore_ascii_case(&job.checksum) {
                        tracing::debug!(file = %job.filename, "using cached package");
                        return Ok((index, dest));
                    }
                    tracing::warn!(file = %job.filename, "cached package is stale, refetching");
                    tokio::fs::remove_file(&dest).await.ok();
                }

                if skip_download {
                    return Err(FetchError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("{} not in cache and downloads are disabled", job.filename),
                    )));
                }

                let url = format!("{}/{}", job.repo_url, job.filename);
                tracing::info!(file = %job.filename, "downloading");
                download::fetch_verified(&client, &url, &dest, &job.checksum).await?;
                Ok((index, dest))
            });
        }

        let mut paths: Vec<Option<PathBuf>> = Vec::new();
        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            match joined? {
                Ok((index, path)) => {
                    if paths.len() <= index {
                        paths.resize(index + 1, None);
                    }
                    paths[index] = Some(path);
                }
                Err(e) if failure.is_none() => failure = Some(e),
                Err(_) => {}
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        Ok(paths.into_iter().flatten().collect())
    }
}

/// One package archive to obtain.
#[derive(Debug, Clone)]
pub struct PackageDownload {
    pub repo_url: String,
    pub filename: String,
    /// Expected SHA-256, lowercase hex.
    pub checksum: String,
}

/// Verify a detached signature with the external gpg binary.
fn verify_signature(artifact: &Path, signature: &Path) -> Result<(), FetchError> {
    let gpg = which::which("gpg").map_err(|_| FetchError::GpgMissing)?;

    let status = Command::new(gpg)
        .arg("--verify")
        .arg(signature)
        .arg(artifact)
        .status()?;

    if status.success() {
        Ok(())
    } else {
        Err(FetchError::BadSignature(artifact.to_path_buf()))
    }
}
