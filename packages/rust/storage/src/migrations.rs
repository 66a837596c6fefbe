//! SQL migration definitions for the RepoSearch database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: repos, index_jobs, file_contents FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Repositories known to the index
CREATE TABLE IF NOT EXISTS repos (
    name        TEXT PRIMARY KEY,
    url         TEXT NOT NULL,
    cloned_at   TEXT,
    indexed_at  TEXT,
    file_count  INTEGER NOT NULL DEFAULT 0
);

-- Index run history
CREATE TABLE IF NOT EXISTS index_jobs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

-- Full-text index over every indexed file; all columns are searchable
CREATE VIRTUAL TABLE IF NOT EXISTS file_contents USING fts5(
    repo_name,
    filepath,
    filename,
    content,
    last_modified
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
