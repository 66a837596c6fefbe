//! Core domain types for RepoSearch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{RepoSearchError, Result};

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for index job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// RepoSource
// ---------------------------------------------------------------------------

/// A repository to clone and index (`[[repos]]` entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSource {
    /// Anything `git clone` accepts: https, ssh, scp-style, or a local path.
    pub url: String,
    /// Checkout directory and index name. Derived from the URL when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RepoSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }

    /// The explicit name if set, otherwise the one derived from the URL.
    pub fn resolved_name(&self) -> Result<String> {
        match &self.name {
            Some(name) => validate_repo_name(name).map(|()| name.clone()),
            None => repo_name_from_url(&self.url),
        }
    }
}

/// Derive a checkout name from a clone URL: the last path segment minus its extension.
///
/// `https://github.com/owner/tools.git` → `tools`,
/// `git@github.com:owner/tools.git` → `tools`,
/// `/srv/git/tools/` → `tools`.
pub fn repo_name_from_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');

    let last_segment = match Url::parse(trimmed) {
        Ok(parsed) if parsed.scheme().len() > 1 => parsed
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(str::to_string)
            .unwrap_or_default(),
        // scp-style (`host:path`), Windows drive letters, or plain paths
        _ => trimmed
            .rsplit(['/', '\\'])
            .next()
            .map(|s| s.rsplit(':').next().unwrap_or(s))
            .unwrap_or_default()
            .to_string(),
    };

    let name = strip_extension(&last_segment);
    validate_repo_name(name)
        .map_err(|_| {
            RepoSearchError::validation(format!("cannot derive a repository name from '{url}'"))
        })
        .map(|()| name.to_string())
}

/// Drop the final `.ext`, keeping leading-dot names intact (`.dotfiles` stays).
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// A repository name doubles as a directory name, so it must be a single safe segment.
pub fn validate_repo_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(RepoSearchError::validation(format!(
            "invalid repository name '{name}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Indexed data
// ---------------------------------------------------------------------------

/// One text file stored in the full-text index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    /// Owning repository.
    pub repo_name: String,
    /// Path relative to the checkout root, `/`-separated.
    pub filepath: String,
    /// Final path component.
    pub filename: String,
    /// Full UTF-8 file content.
    pub content: String,
    /// Local modification time, ISO-8601 without offset.
    pub last_modified: String,
}

/// A single search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub repo_name: String,
    pub filepath: String,
    pub filename: String,
    /// Content excerpt around the match, with `...` marking elisions.
    pub preview: String,
    /// Byte ranges of matched terms within `preview`, ascending and non-overlapping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<(usize, usize)>,
}

impl SearchHit {
    /// Split the preview into `(text, is_match)` runs for rendering.
    ///
    /// Ranges that are out of bounds or not on char boundaries are ignored.
    pub fn preview_segments(&self) -> Vec<(&str, bool)> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        for &(start, end) in &self.highlights {
            if start < cursor
                || end <= start
                || end > self.preview.len()
                || !self.preview.is_char_boundary(start)
                || !self.preview.is_char_boundary(end)
            {
                continue;
            }
            if start > cursor {
                segments.push((&self.preview[cursor..start], false));
            }
            segments.push((&self.preview[start..end], true));
            cursor = end;
        }

        if cursor < self.preview.len() {
            segments.push((&self.preview[cursor..], false));
        }
        segments
    }
}

/// A row of the `repos` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRecord {
    pub name: String,
    pub url: String,
    pub cloned_at: Option<DateTime<Utc>>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub file_count: u64,
}

/// Counters collected while indexing one or more repositories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_indexed: u64,
    pub files_skipped_large: u64,
    pub files_skipped_binary: u64,
    pub files_excluded: u64,
    pub files_failed: u64,
    pub bytes_indexed: u64,
}

impl IndexStats {
    /// Files seen but not indexed, for any reason.
    pub fn files_skipped(&self) -> u64 {
        self.files_skipped_large + self.files_skipped_binary + self.files_excluded
    }
}

impl std::ops::AddAssign for IndexStats {
    fn add_assign(&mut self, rhs: Self) {
        self.files_indexed += rhs.files_indexed;
        self.files_skipped_large += rhs.files_skipped_large;
        self.files_skipped_binary += rhs.files_skipped_binary;
        self.files_excluded += rhs.files_excluded;
        self.files_failed += rhs.files_failed;
        self.bytes_indexed += rhs.bytes_indexed;
    }
}
