//! Application configuration for RepoSearch.
//!
//! User config lives at `~/.reposearch/reposearch.toml`.
//! CLI flags (and their environment variables) override config file values,
//! which override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RepoSearchError, Result};
use crate::types::RepoSource;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "reposearch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".reposearch";

/// Upper bound accepted by the FTS5 `snippet()` function for its token count.
pub const MAX_SNIPPET_TOKENS: u32 = 64;

// ---------------------------------------------------------------------------
// Config structs (matching reposearch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Clone, index, and search settings.
    #[serde(default)]
    pub index: IndexSettings,

    /// Repositories to clone and index.
    #[serde(default = "default_repos")]
    pub repos: Vec<RepoSource>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            index: IndexSettings::default(),
            repos: default_repos(),
        }
    }
}

fn default_repos() -> Vec<RepoSource> {
    vec![
        RepoSource::new("https://github.com/runarhageland/strompris.git"),
        RepoSource::new("https://github.com/runarhageland/k8slab.git"),
    ]
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`.
    ///
    /// IPv6 literals are bracketed; hostnames are left for the resolver.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_body_bytes() -> usize {
    64 * 1024
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Directory repositories are cloned into.
    #[serde(default = "default_repos_dir")]
    pub repos_dir: String,

    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Files strictly larger than this are not indexed.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Directory names never descended into.
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,

    /// Relative-path glob patterns excluded from the index.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Shallow clone depth (`git clone --depth`). Full history when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_depth: Option<u32>,

    /// Maximum number of hits returned by a search.
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,

    /// Number of tokens in a result preview.
    #[serde(default = "default_snippet_tokens")]
    pub snippet_tokens: u32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            repos_dir: default_repos_dir(),
            db_path: default_db_path(),
            max_file_bytes: default_max_file_bytes(),
            skip_dirs: default_skip_dirs(),
            exclude_patterns: Vec::new(),
            clone_depth: None,
            search_limit: default_search_limit(),
            snippet_tokens: default_snippet_tokens(),
        }
    }
}

fn default_repos_dir() -> String {
    "repos".into()
}
fn default_db_path() -> String {
    "repo_search.db".into()
}
fn default_max_file_bytes() -> u64 {
    1_000_000
}
fn default_skip_dirs() -> Vec<String> {
    vec![".git".into()]
}
fn default_search_limit() -> u32 {
    50
}
fn default_snippet_tokens() -> u32 {
    50
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from the file config)
// ---------------------------------------------------------------------------

/// Runtime indexing configuration consumed by the cloner and indexer.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Directory repositories are cloned into.
    pub repos_dir: PathBuf,
    /// Files strictly larger than this are skipped.
    pub max_file_bytes: u64,
    /// Directory names never descended into.
    pub skip_dirs: Vec<String>,
    /// Relative-path glob patterns excluded from the index.
    pub exclude_patterns: Vec<String>,
    /// Shallow clone depth.
    pub clone_depth: Option<u32>,
}

impl From<&AppConfig> for IndexConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            repos_dir: PathBuf::from(&config.index.repos_dir),
            max_file_bytes: config.index.max_file_bytes,
            skip_dirs: config.index.skip_dirs.clone(),
            exclude_patterns: config.index.exclude_patterns.clone(),
            clone_depth: config.index.clone_depth,
        }
    }
}

/// Runtime search settings shared by the CLI and the web server.
#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    /// Maximum number of hits per query.
    pub limit: u32,
    /// Preview length in tokens, already clamped to what FTS5 accepts.
    pub snippet_tokens: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SearchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            limit: config.index.search_limit.max(1),
            snippet_tokens: config.index.snippet_tokens.clamp(1, MAX_SNIPPET_TOKENS),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.reposearch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RepoSearchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.reposearch/reposearch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RepoSearchError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        RepoSearchError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RepoSearchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RepoSearchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RepoSearchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configurations that would fail later in a less obvious way.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.server.port == 0 {
        return Err(RepoSearchError::config("server.port must be non-zero"));
    }
    if config.index.max_file_bytes == 0 {
        return Err(RepoSearchError::config("index.max_file_bytes must be non-zero"));
    }
    if config.index.search_limit == 0 {
        return Err(RepoSearchError::config("index.search_limit must be non-zero"));
    }

    let mut names = HashSet::new();
    for repo in &config.repos {
        let name = repo.resolved_name()?;
        if !names.insert(name.clone()) {
            return Err(RepoSearchError::config(format!(
                "duplicate repository name '{name}' (from {}); set an explicit name",
                repo.url
            )));
        }
    }
    Ok(())
}

/// Convenience for callers holding only a URL list (e.g. `--repo` flags).
pub fn sources_from_urls<I, S>(urls: I) -> Vec<RepoSource>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    urls.into_iter().map(RepoSource::new).collect()
}
