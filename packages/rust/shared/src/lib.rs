//! Shared types, error model, and configuration for RepoSearch.
//!
//! This crate is the foundation depended on by all other RepoSearch crates.
//! It provides:
//! - [`RepoSearchError`]: the unified error type
//! - Domain types ([`RepoSource`], [`IndexedFile`], [`SearchHit`], [`IndexStats`])
//! - Configuration ([`AppConfig`], [`IndexConfig`], [`SearchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, IndexConfig, IndexSettings, MAX_SNIPPET_TOKENS, SearchConfig, ServerConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, sources_from_urls,
    validate_config,
};
pub use error::{RepoSearchError, Result};
pub use types::{
    IndexStats, IndexedFile, JobId, RepoRecord, RepoSource, SearchHit, repo_name_from_url,
    validate_repo_name,
};
