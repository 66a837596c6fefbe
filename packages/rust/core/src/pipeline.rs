//! End-to-end `index` pipeline: repo list → clone → walk → FTS5 index.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};

use reposearch_git::GitCloner;
use reposearch_indexer::Indexer;
use reposearch_shared::{
    IndexConfig, IndexStats, JobId, RepoSearchError, RepoSource, Result,
};
use reposearch_storage::Storage;

/// Configuration for the `index_repositories` pipeline.
#[derive(Debug, Clone)]
pub struct IndexRunConfig {
    /// Repositories to index, in order.
    pub repos: Vec<RepoSource>,
    /// Clone and walk settings.
    pub index: IndexConfig,
    /// Index existing checkouts under `repos_dir` instead of cloning.
    pub skip_clone: bool,
}

/// How one repository fared.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepoStatus {
    /// Cloned (or found) and indexed.
    Indexed { stats: IndexStats },
    /// Could not be cloned or located; nothing was indexed.
    CloneFailed { error: String },
    /// Cloned, but storing its files failed part-way.
    IndexFailed { error: String },
}

/// Per-repository outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RepoOutcome {
    /// Resolved repository name, or the URL when no name could be derived.
    pub name: String,
    pub url: String,
    #[serde(flatten)]
    pub status: RepoStatus,
}

impl RepoOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RepoStatus::Indexed { .. })
    }
}

/// Result of the `index_repositories` pipeline.
#[derive(Debug)]
pub struct IndexRunResult {
    /// Index job identifier (row in `index_jobs`).
    pub job_id: JobId,
    /// Outcomes in input order.
    pub repos: Vec<RepoOutcome>,
    /// Stats summed over all successfully indexed repositories.
    pub totals: IndexStats,
    /// Total elapsed time.
    pub elapsed: Duration,
}

impl IndexRunResult {
    /// Number of repositories that were indexed.
    pub fn succeeded(&self) -> usize {
        self.repos.iter().filter(|r| r.is_success()).count()
    }

    /// Number of repositories that failed at any stage.
    pub fn failed(&self) -> usize {
        self.repos.len() - self.succeeded()
    }
}

/// JSON shape stored in `index_jobs.stats_json`.
#[derive(Serialize)]
struct JobSummary<'a> {
    status: &'static str,
    totals: &'a IndexStats,
    repos: &'a [RepoOutcome],
    elapsed_ms: u128,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a repository is cloned.
    fn repo_started(&self, url: &str, current: usize, total: usize);
    /// Called once a repository is indexed or has failed.
    fn repo_finished(&self, outcome: &RepoOutcome);
    /// Called when the pipeline completes.
    fn done(&self, result: &IndexRunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn repo_started(&self, _url: &str, _current: usize, _total: usize) {}
    fn repo_finished(&self, _outcome: &RepoOutcome) {}
    fn done(&self, _result: &IndexRunResult) {}
}

/// Rebuild the whole index from `config.repos`.
///
/// 1. Open an index job
/// 2. Clear the existing index
/// 3. Per repository: clone (or locate), register, walk + index
/// 4. Close the job with a JSON summary
///
/// A repository that fails is recorded in the result and skipped; only
/// storage failures outside a single repository abort the run.
#[instrument(skip_all, fields(repos = config.repos.len(), skip_clone = config.skip_clone))]
pub async fn index_repositories(
    config: &IndexRunConfig,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<IndexRunResult> {
    let start = Instant::now();

    progress.phase("Preparing index");
    let job_id = storage.insert_index_job().await?;
    storage.clear_index().await?;

    let cloner = GitCloner::new(config.index.repos_dir.clone()).with_depth(config.index.clone_depth);
    let indexer = Indexer::new(config.index.clone());

    let total = config.repos.len();
    let mut outcomes = Vec::with_capacity(total);
    let mut totals = IndexStats::default();

    for (i, source) in config.repos.iter().enumerate() {
        progress.repo_started(&source.url, i + 1, total);

        let outcome = index_one(config, source, &cloner, &indexer, storage).await;
        match &outcome.status {
            RepoStatus::Indexed { stats } => totals += *stats,
            RepoStatus::CloneFailed { error } | RepoStatus::IndexFailed { error } => {
                warn!(repo = %outcome.name, %error, "repository not indexed");
            }
        }

        progress.repo_finished(&outcome);
        outcomes.push(outcome);
    }

    let result = IndexRunResult {
        job_id,
        repos: outcomes,
        totals,
        elapsed: start.elapsed(),
    };

    let summary = JobSummary {
        status: if result.failed() == 0 {
            "completed"
        } else {
            "completed_with_errors"
        },
        totals: &result.totals,
        repos: &result.repos,
        elapsed_ms: result.elapsed.as_millis(),
    };
    let stats_json = serde_json::to_string(&summary)
        .map_err(|e| RepoSearchError::Storage(format!("serialize job summary: {e}")))?;
    storage.finish_index_job(&result.job_id, &stats_json).await?;

    progress.done(&result);

    info!(
        job_id = %result.job_id,
        succeeded = result.succeeded(),
        failed = result.failed(),
        files_indexed = result.totals.files_indexed,
        elapsed_ms = result.elapsed.as_millis(),
        "index pipeline complete"
    );

    Ok(result)
}

/// Clone (or locate) and index a single repository.
async fn index_one(
    config: &IndexRunConfig,
    source: &RepoSource,
    cloner: &GitCloner,
    indexer: &Indexer,
    storage: &Storage,
) -> RepoOutcome {
    let outcome = |name: String, status| RepoOutcome {
        name,
        url: source.url.clone(),
        status,
    };

    let located = if config.skip_clone {
        locate_checkout(&config.index, source)
    } else {
        cloner
            .clone_repo(source)
            .await
            .map(|cloned| (cloned.name, cloned.path))
    };

    let (name, path) = match located {
        Ok(found) => found,
        Err(e) => {
            let name = source.resolved_name().unwrap_or_else(|_| source.url.clone());
            return outcome(name, RepoStatus::CloneFailed { error: e.to_string() });
        }
    };

    let indexed = async {
        storage.upsert_repo(&name, &source.url).await?;
        let stats = indexer.index_repository(&name, &path, storage).await?;
        storage.mark_repo_indexed(&name, stats.files_indexed).await?;
        Ok::<_, RepoSearchError>(stats)
    }
    .await;

    match indexed {
        Ok(stats) => outcome(name, RepoStatus::Indexed { stats }),
        Err(e) => {
            // Earlier batches may already be committed.
            match storage.delete_repo_files(&name).await {
                Ok(removed) if removed > 0 => {
                    warn!(repo = %name, removed, "discarded partially indexed files");
                }
                Ok(_) => {}
                Err(cleanup) => {
                    warn!(repo = %name, error = %cleanup, "failed to discard partial index");
                }
            }
            outcome(name, RepoStatus::IndexFailed { error: e.to_string() })
        }
    }
}

/// Find an existing checkout for `source` under the repos dir.
fn locate_checkout(index: &IndexConfig, source: &RepoSource) -> Result<(String, PathBuf)> {
    let name = source.resolved_name()?;
    let path = index.repos_dir.join(&name);
    if !path.is_dir() {
        return Err(RepoSearchError::Git(format!(
            "no checkout for '{name}' at {}",
            path.display()
        )));
    }
    Ok((name, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Command;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn index_config(repos_dir: &Path) -> IndexConfig {
        IndexConfig {
            repos_dir: repos_dir.to_path_buf(),
            max_file_bytes: 1_000_000,
            skip_dirs: vec![".git".into()],
            exclude_patterns: vec![],
            clone_depth: None,
        }
    }

    async fn test_storage(root: &Path) -> Storage {
        Storage::open(&root.join("index.db")).await.expect("open db")
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    }

    /// Records callbacks so tests can assert on the reporting sequence.
    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.events.lock().unwrap().push(format!("phase:{name}"));
        }
        fn repo_started(&self, _url: &str, current: usize, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start:{current}/{total}"));
        }
        fn repo_finished(&self, outcome: &RepoOutcome) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finish:{}:{}", outcome.name, outcome.is_success()));
        }
        fn done(&self, result: &IndexRunResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done:{}", result.succeeded()));
        }
    }

    #[tokio::test]
    async fn indexes_existing_checkouts_without_git() {
        let root = std::env::temp_dir().join(format!("rs-core-test-{}", Uuid::now_v7()));
        let repos_dir = root.join("repos");
        write(&repos_dir.join("alpha/src/lib.rs"), "pub fn alpha_marker() {}");
        write(&repos_dir.join("beta/README.md"), "beta readme");

        let storage = test_storage(&root).await;
        let config = IndexRunConfig {
            repos: vec![
                RepoSource::new("https://example.com/team/alpha.git"),
                RepoSource::new("https://example.com/team/beta.git"),
                RepoSource::new("https://example.com/team/missing.git"),
            ],
            index: index_config(&repos_dir),
            skip_clone: true,
        };
        let progress = RecordingProgress::default();

        let result = index_repositories(&config, &storage, &progress)
            .await
            .expect("pipeline");

        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.totals.files_indexed, 2);
        assert!(matches!(
            result.repos[2].status,
            RepoStatus::CloneFailed { .. }
        ));
        assert_eq!(result.repos[2].name, "missing");

        let hits = storage.search("alpha_marker", 10, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].repo_name, "alpha");

        let repos = storage.list_repos().await.unwrap();
        assert_eq!(repos.len(), 2);
        assert!(repos.iter().all(|r| r.file_count == 1));

        let job = storage.last_index_job_stats().await.unwrap().unwrap();
        assert!(job.contains("completed_with_errors"));
        assert!(job.contains("clone_failed"));

        let events = progress.events.lock().unwrap().clone();
        assert_eq!(events.first().map(String::as_str), Some("phase:Preparing index"));
        assert!(events.contains(&"start:3/3".to_string()));
        assert!(events.contains(&"finish:missing:false".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("done:2"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn rerun_replaces_previous_index() {
        let root = std::env::temp_dir().join(format!("rs-core-test-{}", Uuid::now_v7()));
        let repos_dir = root.join("repos");
        write(&repos_dir.join("alpha/old.txt"), "obsolete content");

        let storage = test_storage(&root).await;
        let mut config = IndexRunConfig {
            repos: vec![RepoSource::new("https://example.com/alpha.git")],
            index: index_config(&repos_dir),
            skip_clone: true,
        };
        index_repositories(&config, &storage, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(storage.search("obsolete", 10, 10).await.unwrap().len(), 1);

        std::fs::remove_file(repos_dir.join("alpha/old.txt")).unwrap();
        write(&repos_dir.join("gamma/new.txt"), "fresh content");
        config.repos = vec![RepoSource::new("https://example.com/gamma.git")];
        index_repositories(&config, &storage, &SilentProgress)
            .await
            .unwrap();

        assert!(storage.search("obsolete", 10, 10).await.unwrap().is_empty());
        assert_eq!(storage.search("fresh", 10, 10).await.unwrap().len(), 1);
        let repos = storage.list_repos().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "gamma");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failed_repository_leaves_nothing_searchable() {
        let root = std::env::temp_dir().join(format!("rs-core-test-{}", Uuid::now_v7()));
        let repos_dir = root.join("repos");
        write(&repos_dir.join("alpha/notes.txt"), "half indexed content");
        write(&repos_dir.join("beta/notes.txt"), "beta survives");

        let storage = test_storage(&root).await;

        // Let rows reach `file_contents`, then fail when alpha is marked indexed.
        let raw = libsql::Builder::new_local(root.join("index.db"))
            .build()
            .await
            .unwrap();
        raw.connect()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_alpha BEFORE UPDATE ON repos
                 WHEN NEW.name = 'alpha'
                 BEGIN SELECT RAISE(ABORT, 'alpha rejected'); END;",
            )
            .await
            .unwrap();

        let config = IndexRunConfig {
            repos: vec![
                RepoSource::new("https://example.com/alpha.git"),
                RepoSource::new("https://example.com/beta.git"),
            ],
            index: index_config(&repos_dir),
            skip_clone: true,
        };
        let result = index_repositories(&config, &storage, &SilentProgress)
            .await
            .expect("pipeline");

        assert!(matches!(
            result.repos[0].status,
            RepoStatus::IndexFailed { .. }
        ));
        assert!(result.repos[1].is_success());
        assert_eq!(storage.count_files(Some("alpha")).await.unwrap(), 0);
        assert!(storage.search("half", 10, 10).await.unwrap().is_empty());
        assert_eq!(storage.search("survives", 10, 10).await.unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn clones_and_indexes_local_repository() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let root = std::env::temp_dir().join(format!("rs-core-test-{}", Uuid::now_v7()));
        let upstream = root.join("upstream/strompris");
        write(&upstream.join("app/main.py"), "def spot_price():\n    return 0.42\n");
        git(&upstream, &["init", "--quiet"]);
        git(&upstream, &["add", "."]);
        git(&upstream, &["commit", "--quiet", "-m", "initial"]);

        let storage = test_storage(&root).await;
        let config = IndexRunConfig {
            repos: vec![
                RepoSource::new(upstream.to_string_lossy()),
                RepoSource::new(root.join("upstream/nope").to_string_lossy()),
            ],
            index: index_config(&root.join("repos")),
            skip_clone: false,
        };

        let result = index_repositories(&config, &storage, &SilentProgress)
            .await
            .expect("pipeline");
        assert_eq!(result.succeeded(), 1);
        assert!(matches!(
            result.repos[1].status,
            RepoStatus::CloneFailed { .. }
        ));

        let hits = storage.search("spot_price", 10, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].repo_name, "strompris");
        assert_eq!(hits[0].filepath, "app/main.py");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = RepoOutcome {
            name: "alpha".into(),
            url: "https://example.com/alpha.git".into(),
            status: RepoStatus::CloneFailed {
                error: "boom".into(),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "clone_failed");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["name"], "alpha");
    }
}
