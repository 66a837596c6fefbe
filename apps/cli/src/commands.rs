//! CLI command definitions, routing, and tracing setup.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use reposearch_core::{
    IndexRunConfig, IndexRunResult, ProgressReporter, RepoOutcome, RepoStatus,
    index_repositories,
};
use reposearch_git::GitCloner;
use reposearch_shared::{
    AppConfig, IndexConfig, SearchConfig, SearchHit, init_config, load_config, load_config_from,
    sources_from_urls, validate_config,
};
use reposearch_storage::Storage;
use reposearch_web::AppState;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// RepoSearch: full-text search over git repositories.
#[derive(Parser)]
#[command(
    name = "reposearch",
    version,
    about = "Clone git repositories, index their files, and search them over HTTP.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.reposearch/reposearch.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `[index] db_path`.
    #[arg(long, global = true, env = "REPOSEARCH_DB", value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Index the configured repositories, then serve the search UI.
    Serve {
        /// Interface to bind.
        #[arg(long, env = "REPOSEARCH_HOST")]
        host: Option<String>,

        /// Port to listen on.
        #[arg(long, env = "REPOSEARCH_PORT")]
        port: Option<u16>,

        /// Serve the existing database without re-indexing.
        #[arg(long)]
        skip_index: bool,

        /// Index existing checkouts instead of cloning.
        #[arg(long, conflicts_with = "skip_index")]
        no_clone: bool,
    },

    /// Clone and index repositories, then exit.
    Index {
        /// Repository URL (repeatable). Defaults to the configured list.
        #[arg(long = "repo", value_name = "URL")]
        repos: Vec<String>,

        /// Index existing checkouts instead of cloning.
        #[arg(long)]
        no_clone: bool,
    },

    /// Run a full-text query against the index.
    Search {
        /// FTS5 query, e.g. `tokio AND spawn` or `filename:readme`.
        query: String,

        /// Maximum number of results.
        #[arg(short, long)]
        limit: Option<u32>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List indexed repositories.
    Repos {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
///
/// Logs go to stderr so `--json` output on stdout stays machine-readable.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "reposearch=info",
        1 => "reposearch=debug,tower_http=debug",
        _ => "reposearch=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides {
        config: cli.config,
        db: cli.db,
    };

    match cli.command {
        Command::Serve {
            host,
            port,
            skip_index,
            no_clone,
        } => cmd_serve(&overrides, host, port, skip_index, no_clone).await,
        Command::Index { repos, no_clone } => cmd_index(&overrides, repos, no_clone).await,
        Command::Search { query, limit, json } => cmd_search(&overrides, &query, limit, json).await,
        Command::Repos { json } => cmd_repos(&overrides, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&overrides).await,
        },
    }
}

/// Global flags that adjust the loaded configuration.
struct Overrides {
    config: Option<PathBuf>,
    db: Option<PathBuf>,
}

impl Overrides {
    /// Load the config file (explicit path or default location) and apply flags.
    fn load(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut AppConfig) {
        if let Some(db) = &self.db {
            config.index.db_path = db.to_string_lossy().into_owned();
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(
    overrides: &Overrides,
    host: Option<String>,
    port: Option<u16>,
    skip_index: bool,
    no_clone: bool,
) -> Result<()> {
    let mut config = overrides.load()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    validate_config(&config)?;

    let db_path = PathBuf::from(&config.index.db_path);
    let storage = Storage::open(&db_path)
        .await
        .wrap_err_with(|| format!("opening database {}", db_path.display()))?;

    if skip_index {
        let files = storage.count_files(None).await?;
        info!(files, "skipping indexing, serving existing database");
    } else {
        let result = run_index(&config, &storage, no_clone).await?;
        print_index_summary(&result);
        if result.failed() > 0 {
            warn!(
                failed = result.failed(),
                "some repositories were not indexed, serving partial results"
            );
        }
    }

    let state = AppState::new(storage, SearchConfig::from(&config));
    info!(addr = %config.server.bind_addr(), "starting search server");
    reposearch_web::serve(&config.server, state).await?;
    Ok(())
}

async fn cmd_index(overrides: &Overrides, repos: Vec<String>, no_clone: bool) -> Result<()> {
    let mut config = overrides.load()?;
    if !repos.is_empty() {
        config.repos = sources_from_urls(repos);
    }
    validate_config(&config)?;

    let db_path = PathBuf::from(&config.index.db_path);
    let storage = Storage::open(&db_path)
        .await
        .wrap_err_with(|| format!("opening database {}", db_path.display()))?;

    let result = run_index(&config, &storage, no_clone).await?;
    print_index_summary(&result);

    if result.failed() > 0 {
        return Err(eyre!(
            "{} of {} repositories failed to index",
            result.failed(),
            result.repos.len()
        ));
    }
    Ok(())
}

/// Shared by `serve` and `index`: check git, then run the pipeline with a spinner.
async fn run_index(config: &AppConfig, storage: &Storage, no_clone: bool) -> Result<IndexRunResult> {
    let index = IndexConfig::from(config);

    if !no_clone {
        let version = GitCloner::new(index.repos_dir.clone())
            .git_version()
            .await
            .wrap_err("git is required to clone repositories (use --no-clone to index existing checkouts)")?;
        info!(%version, "git found");
    }

    let run_config = IndexRunConfig {
        repos: config.repos.clone(),
        index,
        skip_clone: no_clone,
    };

    info!(
        repos = run_config.repos.len(),
        db = %config.index.db_path,
        "indexing repositories"
    );

    let reporter = CliProgress::new();
    let result = index_repositories(&run_config, storage, &reporter).await?;
    Ok(result)
}

fn print_index_summary(result: &IndexRunResult) {
    println!();
    println!("  Index rebuilt ({})", result.job_id);
    println!("  Repositories: {} ok, {} failed", result.succeeded(), result.failed());
    println!("  Files:        {}", result.totals.files_indexed);
    println!("  Skipped:      {}", result.totals.files_skipped());
    println!("  Time:         {:.1}s", result.elapsed.as_secs_f64());
    for outcome in result.repos.iter().filter(|o| !o.is_success()) {
        if let RepoStatus::CloneFailed { error } | RepoStatus::IndexFailed { error } =
            &outcome.status
        {
            println!("  ! {}: {error}", outcome.name);
        }
    }
    println!();
}

async fn cmd_search(
    overrides: &Overrides,
    query: &str,
    limit: Option<u32>,
    json: bool,
) -> Result<()> {
    let config = overrides.load()?;
    let search = SearchConfig::from(&config);
    let limit = limit.unwrap_or(search.limit).max(1);

    let storage = open_existing(&config).await?;
    let hits = storage.search(query, limit, search.snippet_tokens).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results for '{query}'.");
        return Ok(());
    }

    let color = std::io::stdout().is_terminal();
    for hit in &hits {
        println!("{}  {}", hit.repo_name, hit.filepath);
        println!("    {}", render_preview(hit, color));
    }
    println!();
    println!("{} result{}", hits.len(), if hits.len() == 1 { "" } else { "s" });
    Ok(())
}

/// Single-line preview with matches emphasised (bold on a terminal, `[..]` otherwise).
fn render_preview(hit: &SearchHit, color: bool) -> String {
    let (open, close) = if color { ("\x1b[1;33m", "\x1b[0m") } else { ("[", "]") };
    let mut out = String::new();
    for (text, is_match) in hit.preview_segments() {
        let text = text.replace(['\n', '\r'], " ");
        if is_match {
            out.push_str(open);
            out.push_str(&text);
            out.push_str(close);
        } else {
            out.push_str(&text);
        }
    }
    out
}

async fn cmd_repos(overrides: &Overrides, json: bool) -> Result<()> {
    let config = overrides.load()?;
    let storage = open_existing(&config).await?;
    let repos = storage.list_repos().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&repos)?);
        return Ok(());
    }

    if repos.is_empty() {
        println!("No repositories indexed.");
        return Ok(());
    }

    for repo in &repos {
        let indexed = repo
            .indexed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "not indexed".into());
        println!(
            "{:<24} {:>8} files  {}  {}",
            repo.name, repo.file_count, indexed, repo.url
        );
    }

    if let Some(stats) = storage.last_index_job_stats().await? {
        let summary: serde_json::Value = serde_json::from_str(&stats)?;
        println!();
        println!(
            "Last index run: {} in {} ms",
            summary["status"].as_str().unwrap_or("unknown"),
            summary["elapsed_ms"]
        );
    }
    Ok(())
}

async fn open_existing(config: &AppConfig) -> Result<Storage> {
    let db_path = Path::new(&config.index.db_path);
    Storage::open_readonly(db_path).await.wrap_err_with(|| {
        format!(
            "cannot open index at {} (run `reposearch index` first)",
            db_path.display()
        )
    })
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(overrides: &Overrides) -> Result<()> {
    let config = overrides.load()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn repo_started(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Indexing [{current}/{total}] {url}"));
    }

    fn repo_finished(&self, outcome: &RepoOutcome) {
        let line = match &outcome.status {
            RepoStatus::Indexed { stats } => {
                format!("  ✓ {} ({} files)", outcome.name, stats.files_indexed)
            }
            RepoStatus::CloneFailed { .. } => format!("  ✗ {} (clone failed)", outcome.name),
            RepoStatus::IndexFailed { .. } => format!("  ✗ {} (index failed)", outcome.name),
        };
        self.spinner.println(line);
    }

    fn done(&self, _result: &IndexRunResult) {
        self.spinner.finish_and_clear();
    }
}
