//! Checkout walker and full-text indexer.
//!
//! Walks a cloned repository, keeps the files that are small enough and
//! valid UTF-8, and stores them in the `file_contents` FTS5 table in batches.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use reposearch_shared::{IndexConfig, IndexStats, IndexedFile, RepoSearchError, Result};
use reposearch_storage::Storage;

/// Number of files written per storage transaction.
const BATCH_SIZE: usize = 200;

/// What happened to a single file during indexing.
#[derive(Debug)]
enum FileOutcome {
    Indexed(IndexedFile),
    TooLarge(u64),
    NotUtf8,
    Excluded,
    Failed(String),
}

/// Indexes repository checkouts into [`Storage`].
pub struct Indexer {
    rules: Arc<FileRules>,
}

/// Which files are indexed. Shared with blocking filesystem tasks.
struct FileRules {
    config: IndexConfig,
    exclude: Vec<ExcludePattern>,
}

/// A compiled exclude glob. Patterns without `/` match the file name only.
struct ExcludePattern {
    regex: Regex,
    name_only: bool,
}

impl Indexer {
    /// Create an indexer. Invalid exclude patterns are logged and ignored.
    pub fn new(config: IndexConfig) -> Self {
        let exclude = config
            .exclude_patterns
            .iter()
            .filter_map(|p| match glob_to_regex(p) {
                Some(regex) => Some(ExcludePattern {
                    regex,
                    name_only: !p.contains('/'),
                }),
                None => {
                    warn!(pattern = %p, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();

        Self {
            rules: Arc::new(FileRules { config, exclude }),
        }
    }

    /// Index every eligible file under `repo_path` as belonging to `repo_name`.
    ///
    /// Per-file failures are logged and counted; they never abort the repository.
    #[instrument(skip(self, storage), fields(repo_path = %repo_path.display()))]
    pub async fn index_repository(
        &self,
        repo_name: &str,
        repo_path: &Path,
        storage: &Storage,
    ) -> Result<IndexStats> {
        let mut stats = IndexStats::default();

        let rules = Arc::clone(&self.rules);
        let root = repo_path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || rules.walk(&root))
            .await
            .map_err(|e| RepoSearchError::io(repo_path, std::io::Error::other(e)))?;

        debug!(candidates = files.len(), "walked checkout");

        let mut batch: Vec<IndexedFile> = Vec::with_capacity(BATCH_SIZE);
        for chunk in files.chunks(BATCH_SIZE) {
            let rules = Arc::clone(&self.rules);
            let root = repo_path.to_path_buf();
            let repo = repo_name.to_string();
            let paths = chunk.to_vec();
            let loaded = tokio::task::spawn_blocking(move || {
                paths
                    .into_iter()
                    .map(|path| {
                        let outcome = rules.load_file(&repo, &root, &path);
                        (path, outcome)
                    })
                    .collect::<Vec<_>>()
            })
            .await
            .map_err(|e| RepoSearchError::io(repo_path, std::io::Error::other(e)))?;

            for (path, outcome) in loaded {
                match outcome {
                    FileOutcome::Indexed(file) => {
                        stats.files_indexed += 1;
                        stats.bytes_indexed += file.content.len() as u64;
                        batch.push(file);
                    }
                    FileOutcome::TooLarge(size) => {
                        debug!(path = %path.display(), size, "skipping large file");
                        stats.files_skipped_large += 1;
                    }
                    FileOutcome::NotUtf8 => {
                        debug!(path = %path.display(), "skipping non-UTF-8 file");
                        stats.files_skipped_binary += 1;
                    }
                    FileOutcome::Excluded => {
                        stats.files_excluded += 1;
                    }
                    FileOutcome::Failed(error) => {
                        warn!(path = %path.display(), %error, "error processing file");
                        stats.files_failed += 1;
                    }
                }
            }

            storage.insert_files(&batch).await?;
            batch.clear();
        }

        info!(
            files_indexed = stats.files_indexed,
            files_skipped = stats.files_skipped(),
            files_failed = stats.files_failed,
            bytes = stats.bytes_indexed,
            "repository indexed"
        );
        Ok(stats)
    }
}

impl FileRules {
    /// Collect regular files under `root` in a stable order, pruning skipped
    /// directories. Symlinks are never followed.
    fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot read directory");
                    continue;
                }
            };

            let mut subdirs = Vec::new();
            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                let path = entry.path();
                if file_type.is_dir() {
                    let name = entry.file_name();
                    if self
                        .config
                        .skip_dirs
                        .iter()
                        .any(|skip| name.to_str() == Some(skip.as_str()))
                    {
                        continue;
                    }
                    subdirs.push(path);
                } else if file_type.is_file() {
                    files.push(path);
                }
            }

            // Reverse so the stack pops directories in ascending order.
            subdirs.sort();
            stack.extend(subdirs.into_iter().rev());
        }

        files.sort();
        files
    }

    /// Decide whether `path` is indexed and, if so, load it.
    fn load_file(&self, repo_name: &str, root: &Path, path: &Path) -> FileOutcome {
        let relative = relative_path(root, path);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.is_excluded(&relative, &filename) {
            return FileOutcome::Excluded;
        }

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => return FileOutcome::Failed(e.to_string()),
        };
        if metadata.len() > self.config.max_file_bytes {
            return FileOutcome::TooLarge(metadata.len());
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => return FileOutcome::Failed(e.to_string()),
        };
        let Ok(content) = String::from_utf8(bytes) else {
            return FileOutcome::NotUtf8;
        };

        let last_modified = metadata
            .modified()
            .map(isoformat_local)
            .unwrap_or_default();

        FileOutcome::Indexed(IndexedFile {
            repo_name: repo_name.to_string(),
            filepath: relative,
            filename,
            content,
            last_modified,
        })
    }

    fn is_excluded(&self, relative: &str, filename: &str) -> bool {
        self.exclude.iter().any(|p| {
            if p.name_only {
                p.regex.is_match(filename)
            } else {
                p.regex.is_match(relative)
            }
        })
    }
}

/// `path` relative to `root`, always `/`-separated.
fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Convert a glob-like pattern to an anchored regex.
///
/// `**/` matches zero or more leading directories.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*/", "(?:.*/)?")
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", "[^/]");
    Regex::new(&format!("^{escaped}$")).ok()
}

/// Local wall-clock time in ISO-8601 without offset; fractional seconds
/// appear only when non-zero, as microseconds.
fn isoformat_local(time: SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    isoformat(local.naive_local())
}

fn isoformat(time: NaiveDateTime) -> String {
    if time.nanosecond() / 1_000 == 0 {
        time.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        time.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn config(max_file_bytes: u64, exclude: &[&str]) -> IndexConfig {
        IndexConfig {
            repos_dir: PathBuf::from("repos"),
            max_file_bytes,
            skip_dirs: vec![".git".into()],
            exclude_patterns: exclude.iter().map(|s| s.to_string()).collect(),
            clone_depth: None,
        }
    }

    /// Lay out a small checkout with one file of every kind the indexer distinguishes.
    fn fixture_checkout() -> PathBuf {
        let root = std::env::temp_dir().join(format!("rs-index-test-{}", Uuid::now_v7()));
        let write = |rel: &str, bytes: &[u8]| {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, bytes).unwrap();
        };

        write("README.md", b"# Widgets\nA widget catalogue.\n");
        write("src/main.rs", b"fn main() { println!(\"hello widgets\"); }\n");
        write("src/nested/deep.txt", b"deeply nested note\n");
        write(".git/config", b"[core]\n\tbare = false\n");
        write("assets/logo.bin", &[0xff, 0xfe, 0x00, 0x81]);
        write("data/huge.csv", &[b'a'; 512]);
        write("target/debug/out.txt", b"build output\n");
        write("Cargo.lock", b"# lockfile\n");
        root
    }

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("rs_index_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn indexes_text_files_and_counts_skips() {
        let root = fixture_checkout();
        let storage = test_storage().await;
        let indexer = Indexer::new(config(256, &["target/**", "*.lock"]));

        let stats = indexer
            .index_repository("widgets", &root, &storage)
            .await
            .expect("index");

        assert_eq!(stats.files_indexed, 3);
        assert_eq!(stats.files_skipped_large, 1);
        assert_eq!(stats.files_skipped_binary, 1);
        assert_eq!(stats.files_excluded, 2);
        assert_eq!(stats.files_failed, 0);
        assert_eq!(storage.count_files(Some("widgets")).await.unwrap(), 3);

        let hits = storage.search("nested", 10, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filepath, "src/nested/deep.txt");
        assert_eq!(hits[0].filename, "deep.txt");

        // .git contents are never indexed
        assert!(storage.search("bare", 10, 10).await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn size_limit_is_inclusive() {
        let root = fixture_checkout();
        let storage = test_storage().await;
        // huge.csv is exactly 512 bytes: at the limit it is still indexed
        let indexer = Indexer::new(config(512, &["target/**"]));

        let stats = indexer
            .index_repository("widgets", &root, &storage)
            .await
            .unwrap();
        assert_eq!(stats.files_skipped_large, 0);
        assert_eq!(stats.files_indexed, 5);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn batches_larger_than_one_transaction() {
        let root = std::env::temp_dir().join(format!("rs-index-batch-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&root).unwrap();
        for i in 0..(BATCH_SIZE + 7) {
            std::fs::write(root.join(format!("file{i:04}.txt")), format!("entry {i}")).unwrap();
        }
        let storage = test_storage().await;
        let indexer = Indexer::new(config(1_000_000, &[]));

        let stats = indexer
            .index_repository("many", &root, &storage)
            .await
            .unwrap();
        assert_eq!(stats.files_indexed as usize, BATCH_SIZE + 7);
        assert_eq!(
            storage.count_files(None).await.unwrap() as usize,
            BATCH_SIZE + 7
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn walk_is_sorted_and_prunes_skip_dirs() {
        let root = fixture_checkout();
        let indexer = Indexer::new(config(1_000_000, &[]));
        let rels: Vec<String> = indexer
            .rules
            .walk(&root)
            .iter()
            .map(|p| relative_path(&root, p))
            .collect();

        assert!(!rels.iter().any(|r| r.starts_with(".git/")));
        let mut sorted = rels.clone();
        sorted.sort();
        assert_eq!(rels, sorted);
        assert!(rels.contains(&"src/nested/deep.txt".to_string()));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[test]
    fn walk_does_not_follow_symlinks() {
        let root = fixture_checkout();
        std::os::unix::fs::symlink(root.join("src"), root.join("src-link")).unwrap();
        std::os::unix::fs::symlink(root.join("README.md"), root.join("README-link.md")).unwrap();

        let indexer = Indexer::new(config(1_000_000, &[]));
        let rels: Vec<String> = indexer
            .rules
            .walk(&root)
            .iter()
            .map(|p| relative_path(&root, p))
            .collect();
        assert!(!rels.iter().any(|r| r.contains("link")));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn glob_patterns() {
        let re = glob_to_regex("target/**").unwrap();
        assert!(re.is_match("target/debug/out.txt"));
        assert!(!re.is_match("src/target.rs"));

        let re = glob_to_regex("*.lock").unwrap();
        assert!(re.is_match("Cargo.lock"));
        assert!(!re.is_match("sub/Cargo.lock"));

        let re = glob_to_regex("**/*.md").unwrap();
        assert!(re.is_match("README.md"));
        assert!(re.is_match("src/x.md"));
        assert!(re.is_match("docs/a/b.md"));
        assert!(!re.is_match("src/x.rs"));

        let re = glob_to_regex("docs/**").unwrap();
        assert!(re.is_match("docs/a/b.md"));
        assert!(!re.is_match("src/docs.md"));

        let re = glob_to_regex("src/**/mod.rs").unwrap();
        assert!(re.is_match("src/mod.rs"));
        assert!(re.is_match("src/a/b/mod.rs"));

        let re = glob_to_regex("docs/?.md").unwrap();
        assert!(re.is_match("docs/a.md"));
        assert!(!re.is_match("docs/ab.md"));
    }

    #[tokio::test]
    async fn double_star_prefix_excludes_root_files() {
        let root = fixture_checkout();
        let storage = test_storage().await;
        let indexer = Indexer::new(config(1_000_000, &["**/*.md", "target/**"]));

        indexer
            .index_repository("widgets", &root, &storage)
            .await
            .unwrap();
        assert!(storage.search("catalogue", 10, 10).await.unwrap().is_empty());
        assert_eq!(storage.search("nested", 10, 10).await.unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn name_only_patterns_match_nested_files() {
        let indexer = Indexer::new(config(1_000_000, &["*.lock"]));
        assert!(indexer.rules.is_excluded("vendor/sub/Cargo.lock", "Cargo.lock"));
        assert!(!indexer.rules.is_excluded("src/lock.rs", "lock.rs"));
    }

    #[test]
    fn isoformat_matches_python_style() {
        let whole = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 3)
            .unwrap();
        assert_eq!(isoformat(whole), "2024-03-09T07:05:03");

        let fractional = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(7, 5, 3, 120)
            .unwrap();
        assert_eq!(isoformat(fractional), "2024-03-09T07:05:03.000120");
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/checkouts/widgets");
        let path = root.join("src").join("lib.rs");
        assert_eq!(relative_path(root, &path), "src/lib.rs");
    }
}
