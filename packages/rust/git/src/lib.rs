//! Repository cloning for RepoSearch.
//!
//! Shells out to the host `git` CLI, so its transports and credential
//! helpers apply unchanged.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use reposearch_shared::{RepoSearchError, RepoSource, Result};

/// Default git executable, resolved through `PATH`.
const DEFAULT_GIT_BIN: &str = "git";

/// A repository that was cloned successfully.
#[derive(Debug, Clone)]
pub struct ClonedRepo {
    /// Checkout name (directory name under the repos dir, index key).
    pub name: String,
    /// The URL it was cloned from.
    pub url: String,
    /// Absolute or repos-dir-relative path of the checkout.
    pub path: PathBuf,
}

/// Clones repositories into a single parent directory.
#[derive(Debug, Clone)]
pub struct GitCloner {
    repos_dir: PathBuf,
    depth: Option<u32>,
    git_bin: String,
}

impl GitCloner {
    /// Create a cloner writing checkouts under `repos_dir`.
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            depth: None,
            git_bin: DEFAULT_GIT_BIN.to_string(),
        }
    }

    /// Limit clones to the last `depth` commits.
    pub fn with_depth(mut self, depth: Option<u32>) -> Self {
        self.depth = depth.filter(|d| *d > 0);
        self
    }

    /// Use a specific git executable instead of the one on `PATH`.
    pub fn with_git_bin(mut self, git_bin: impl Into<String>) -> Self {
        self.git_bin = git_bin.into();
        self
    }

    /// Report the git version, failing if the executable cannot be run.
    pub async fn git_version(&self) -> Result<String> {
        let output = Command::new(&self.git_bin)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                RepoSearchError::Git(format!("failed to run `{}`: {e}. Is git installed?", self.git_bin))
            })?;

        if !output.status.success() {
            return Err(RepoSearchError::Git(format!(
                "`{} --version` exited with {}",
                self.git_bin, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Clone `source` into `<repos_dir>/<name>`, replacing any existing checkout.
    #[instrument(skip_all, fields(url = %source.url))]
    pub async fn clone_repo(&self, source: &RepoSource) -> Result<ClonedRepo> {
        let name = source.resolved_name()?;
        let path = self.repos_dir.join(&name);

        tokio::fs::create_dir_all(&self.repos_dir)
            .await
            .map_err(|e| RepoSearchError::io(&self.repos_dir, e))?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "removing existing checkout");
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| RepoSearchError::io(&path, e))?;
        }

        let mut cmd = Command::new(&self.git_bin);
        cmd.arg("clone").arg("--quiet");
        if let Some(depth) = self.depth {
            cmd.arg("--depth").arg(depth.to_string());
        }
        cmd.arg("--")
            .arg(&source.url)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // Never block on an interactive credential prompt.
            .env("GIT_TERMINAL_PROMPT", "0");

        info!(name = %name, path = %path.display(), depth = ?self.depth, "cloning repository");

        let output = cmd.output().await.map_err(|e| {
            RepoSearchError::Git(format!("failed to spawn `{}`: {e}", self.git_bin))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(name = %name, status = %output.status, "clone failed");
            // A failed clone can leave a partial directory behind.
            let _ = tokio::fs::remove_dir_all(&path).await;
            return Err(RepoSearchError::Git(format!(
                "cloning {} failed ({}): {}",
                source.url,
                output.status,
                stderr.trim()
            )));
        }

        Ok(ClonedRepo {
            name,
            url: source.url.clone(),
            path,
        })
    }
}
