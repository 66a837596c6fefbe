//! libSQL storage layer for the repository index.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the
//! repository registry, index job history, and the `file_contents` FTS5
//! table that backs search.
//!
//! **Access rules:**
//! - `reposearch index` / `serve`: read-write via [`Storage::open`]
//! - `reposearch search` / `repos`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use reposearch_shared::{
    IndexedFile, JobId, RepoRecord, RepoSearchError, Result, SearchHit,
};

/// Marks the start of a matched term inside a raw FTS5 snippet.
const HIGHLIGHT_OPEN: char = '\u{1}';
/// Marks the end of a matched term inside a raw FTS5 snippet.
const HIGHLIGHT_CLOSE: char = '\u{2}';

/// Column index of `content` in `file_contents`, used for previews.
const CONTENT_COLUMN: i64 = 3;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| RepoSearchError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RepoSearchError::Storage(format!(
                "database not found at {} (run `reposearch index` first)",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        RepoSearchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(RepoSearchError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Index maintenance
    // -----------------------------------------------------------------------

    /// Drop every indexed file and repository record.
    pub async fn clear_index(&self) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute_batch("DELETE FROM file_contents; DELETE FROM repos;")
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;
        tracing::debug!("index cleared");
        Ok(())
    }

    /// Remove all indexed files belonging to one repository.
    pub async fn delete_repo_files(&self, repo_name: &str) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM file_contents WHERE repo_name = ?1",
                params![repo_name],
            )
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))
    }

    /// Count indexed files, optionally restricted to one repository.
    pub async fn count_files(&self, repo_name: Option<&str>) -> Result<u64> {
        let mut rows = match repo_name {
            Some(name) => {
                self.conn
                    .query(
                        "SELECT COUNT(*) FROM file_contents WHERE repo_name = ?1",
                        params![name],
                    )
                    .await
            }
            None => {
                self.conn
                    .query("SELECT COUNT(*) FROM file_contents", params![])
                    .await
            }
        }
        .map_err(|e| RepoSearchError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| RepoSearchError::Storage(e.to_string()))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(RepoSearchError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // File operations
    // -----------------------------------------------------------------------

    /// Insert a single file into the full-text index.
    pub async fn insert_file(&self, file: &IndexedFile) -> Result<()> {
        self.check_writable()?;
        insert_file_on(&self.conn, file).await
    }

    /// Insert a batch of files in one transaction.
    pub async fn insert_files(&self, files: &[IndexedFile]) -> Result<()> {
        self.check_writable()?;
        if files.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;

        for file in files {
            // Dropping `tx` on error rolls the batch back.
            insert_file_on(&tx, file).await?;
        }

        tx.commit()
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Repository operations
    // -----------------------------------------------------------------------

    /// Record a freshly cloned repository (insert or refresh on conflict by name).
    pub async fn upsert_repo(&self, name: &str, url: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO repos (name, url, cloned_at, indexed_at, file_count)
                 VALUES (?1, ?2, ?3, NULL, 0)
                 ON CONFLICT(name) DO UPDATE SET
                   url = excluded.url,
                   cloned_at = excluded.cloned_at,
                   indexed_at = NULL,
                   file_count = 0",
                params![name, url, now.as_str()],
            )
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Stamp a repository as indexed with its file count.
    pub async fn mark_repo_indexed(&self, name: &str, file_count: u64) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let updated = self
            .conn
            .execute(
                "UPDATE repos SET indexed_at = ?1, file_count = ?2 WHERE name = ?3",
                params![now.as_str(), file_count as i64, name],
            )
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;

        if updated == 0 {
            return Err(RepoSearchError::Storage(format!(
                "repository '{name}' is not registered"
            )));
        }
        Ok(())
    }

    /// List all registered repositories, ordered by name.
    pub async fn list_repos(&self) -> Result<Vec<RepoRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, url, cloned_at, indexed_at, file_count FROM repos ORDER BY name",
                params![],
            )
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?
        {
            results.push(row_to_repo_record(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Index job operations
    // -----------------------------------------------------------------------

    /// Insert a new index job. Returns the generated job ID.
    pub async fn insert_index_job(&self) -> Result<JobId> {
        self.check_writable()?;
        let id = JobId::new();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO index_jobs (id, started_at) VALUES (?1, ?2)",
                params![id.to_string(), now.as_str()],
            )
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Update an index job with completion data.
    pub async fn finish_index_job(&self, job_id: &JobId, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE index_jobs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, job_id.to_string()],
            )
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Stats JSON of the most recently finished index job, if any.
    pub async fn last_index_job_stats(&self) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stats_json FROM index_jobs
                 WHERE finished_at IS NOT NULL
                 ORDER BY id DESC LIMIT 1",
                params![],
            )
            .await
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(RepoSearchError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Full-text search across every indexed file.
    ///
    /// `query` uses FTS5 query syntax. A blank query returns no hits.
    pub async fn search(
        &self,
        query: &str,
        limit: u32,
        snippet_tokens: u32,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let open = HIGHLIGHT_OPEN.to_string();
        let close = HIGHLIGHT_CLOSE.to_string();
        let mut rows = self
            .conn
            .query(
                "SELECT repo_name, filepath, filename,
                        snippet(file_contents, ?1, ?2, ?3, '...', ?4) AS preview
                 FROM file_contents
                 WHERE file_contents MATCH ?5
                 ORDER BY rank
                 LIMIT ?6",
                params![
                    CONTENT_COLUMN,
                    open,
                    close,
                    i64::from(snippet_tokens),
                    query,
                    i64::from(limit)
                ],
            )
            .await
            .map_err(classify_query_error)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify_query_error)? {
            let raw_preview: String = row.get(3).unwrap_or_default();
            let (preview, highlights) = split_highlights(&raw_preview);
            results.push(SearchHit {
                repo_name: row
                    .get(0)
                    .map_err(|e| RepoSearchError::Storage(e.to_string()))?,
                filepath: row
                    .get(1)
                    .map_err(|e| RepoSearchError::Storage(e.to_string()))?,
                filename: row
                    .get(2)
                    .map_err(|e| RepoSearchError::Storage(e.to_string()))?,
                preview,
                highlights,
            });
        }

        tracing::debug!(query, hits = results.len(), "search completed");
        Ok(results)
    }
}

/// Insert one file through any connection-like handle (plain or transaction).
async fn insert_file_on(conn: &Connection, file: &IndexedFile) -> Result<()> {
    conn.execute(
        "INSERT INTO file_contents (repo_name, filepath, filename, content, last_modified)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            file.repo_name.as_str(),
            file.filepath.as_str(),
            file.filename.as_str(),
            file.content.as_str(),
            file.last_modified.as_str(),
        ],
    )
    .await
    .map_err(|e| RepoSearchError::Storage(format!("insert {}: {e}", file.filepath)))?;
    Ok(())
}

/// FTS5 reports malformed MATCH expressions as ordinary SQL errors; surface
/// those as query errors so callers can blame the input rather than the disk.
fn classify_query_error(e: libsql::Error) -> RepoSearchError {
    let msg = e.to_string();
    let lowered = msg.to_lowercase();
    if lowered.contains("fts5")
        || lowered.contains("syntax error")
        || lowered.contains("no such column")
        || lowered.contains("unterminated string")
        || lowered.contains("unknown special query")
    {
        RepoSearchError::Query(msg)
    } else {
        RepoSearchError::Storage(msg)
    }
}

/// Strip highlight markers from a raw snippet, returning the plain text and
/// the byte ranges of highlighted terms within it.
fn split_highlights(raw: &str) -> (String, Vec<(usize, usize)>) {
    let mut text = String::with_capacity(raw.len());
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;

    for ch in raw.chars() {
        match ch {
            HIGHLIGHT_OPEN => start = Some(text.len()),
            HIGHLIGHT_CLOSE => {
                if let Some(s) = start.take() {
                    if text.len() > s {
                        ranges.push((s, text.len()));
                    }
                }
            }
            _ => text.push(ch),
        }
    }

    (text, ranges)
}

/// Convert a database row to a [`RepoRecord`].
fn row_to_repo_record(row: &libsql::Row) -> Result<RepoRecord> {
    Ok(RepoRecord {
        name: row
            .get::<String>(0)
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?,
        url: row
            .get::<String>(1)
            .map_err(|e| RepoSearchError::Storage(e.to_string()))?,
        cloned_at: parse_optional_date(row.get::<String>(2).ok())?,
        indexed_at: parse_optional_date(row.get::<String>(3).ok())?,
        file_count: row.get::<i64>(4).map(|v| v.max(0) as u64).unwrap_or(0),
    })
}

fn parse_optional_date(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| RepoSearchError::Storage(format!("invalid date: {e}")))
        })
        .transpose()
}
