//! CLI binary for edgequake-enex2notion.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `MigrationConfig`, drives a progress bar and prints the final report.
//!
//! Exit status: 0 when everything was delivered, 2 when some notes,
//! resources or files failed (see the report), 1 on a run-fatal error (the
//! report of the work done before it is printed first).

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_enex2notion::enex;
use edgequake_enex2notion::{
    MigrationConfig, MigrationProgressCallback, MigrationReport, Migrator, ParentKind,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per file, reset by `on_file_start`; per-note lines above it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Reading");
        bar.set_message("export…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn truncate(s: &str, max: usize) -> String {
        if s.chars().count() > max {
            let cut: String = s.chars().take(max - 1).collect();
            format!("{cut}\u{2026}")
        } else {
            s.to_string()
        }
    }
}

impl MigrationProgressCallback for CliProgressCallback {
    fn on_file_start(&self, path: &Path, total_notes: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} notes  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_style(style);
        self.bar.set_length(total_notes as u64);
        self.bar.set_position(0);
        self.bar.set_prefix("Migrating");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{} ({} notes)", path.display(), total_notes))
        ));
    }

    fn on_note_start(&self, _index: usize, _total: usize, title: &str) {
        self.bar.set_message(Self::truncate(title, 40));
    }

    fn on_note_skipped(&self, _index: usize, _total: usize, _title: &str) {
        self.bar.inc(1);
    }

    fn on_note_complete(&self, index: usize, total: usize, title: &str, _page_id: &str) {
        self.bar.println(format!(
            "  {} {:>4}/{:<4} {}",
            green("✓"),
            index,
            total,
            Self::truncate(title, 60)
        ));
        self.bar.inc(1);
    }

    fn on_note_error(&self, index: usize, total: usize, title: &str, error: &str) {
        self.bar.println(format!(
            "  {} {:>4}/{:<4} {}  {}",
            red("✗"),
            index,
            total,
            Self::truncate(title, 40),
            red(&Self::truncate(error, 80))
        ));
        self.bar.inc(1);
    }

    fn on_upload_complete(&self, completed: usize, total: usize) {
        self.bar
            .set_message(dim(&format!("attachments {completed}/{total}")));
    }

    fn on_upload_error(&self, hash: &str, error: &str) {
        self.bar.println(format!(
            "      {} attachment {}  {}",
            red("✗"),
            &hash[..hash.len().min(8)],
            dim(&Self::truncate(error, 80))
        ));
    }

    fn on_file_complete(&self, _path: &Path, _delivered: usize, _failed: usize) {
        self.bar.set_message("");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Summarise an export (no credentials needed)
  enex2notion --inspect-only Notebook.enex

  # Convert everything without touching Notion
  enex2notion --dry-run exports/

  # Migrate under a page, resumable
  enex2notion --parent 0123456789abcdef0123456789abcdef \
              --checkpoint migration.json Notebook.enex

  # Migrate into a database (Tags / Created / Updated / Author / Source properties)
  enex2notion --database --parent $DB_ID exports/*.enex

  # Machine-readable report
  enex2notion --json Notebook.enex > report.json

ATTACHMENTS:
  Notion cannot host arbitrary files through its public API, so attachments
  are uploaded to a blob host first. The upload endpoint receives the raw
  bytes (Content-Type = MIME type, ?filename=…) and must answer with JSON
  {"secure_url": "https://…"} or {"url": "https://…"}. Without an endpoint,
  attachments are left out and listed in the report.

RESUMING:
  With --checkpoint, every delivered note and uploaded attachment is recorded
  immediately. Re-running the same command skips finished work. Ctrl-C stops
  after the note in progress.

ENVIRONMENT VARIABLES:
  NOTION_TOKEN               Notion integration token
  NOTION_PARENT_ID           Parent page (or database with --database)
  ENEX2NOTION_UPLOAD_URL     Blob-host upload endpoint
  ENEX2NOTION_UPLOAD_TOKEN   Bearer token for the upload endpoint
  ENEX2NOTION_CHECKPOINT     Checkpoint file path
  RUST_LOG                   Log filter (overrides -v / -q)

EXIT STATUS:
  0  all notes delivered
  1  fatal error (bad token, parent not found, missing input, checkpoint);
     the report of the work done before it is printed first
  2  finished, but some notes, attachments or files failed (see report)
"#;

/// Migrate Evernote exports (.enex) to Notion.
#[derive(Parser, Debug)]
#[command(
    name = "enex2notion",
    version,
    about = "Migrate Evernote exports (.enex) to Notion pages",
    long_about = "Convert Evernote .enex exports into Notion pages: ENML is mapped to Notion \
blocks (headings, lists, to-dos, tables, code, quotes, images, files, PDFs), attachments are \
uploaded to a blob host, and delivery respects Notion's rate limits with a resumable checkpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// .enex files, or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Notion integration token.
    #[arg(long, env = "NOTION_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Parent page id (or database id with --database).
    #[arg(long, env = "NOTION_PARENT_ID")]
    parent: Option<String>,

    /// Treat --parent as a database and fill its properties.
    #[arg(long, env = "ENEX2NOTION_DATABASE")]
    database: bool,

    /// Blob-host upload endpoint for attachments.
    #[arg(long, env = "ENEX2NOTION_UPLOAD_URL")]
    upload_url: Option<String>,

    /// Bearer token for the upload endpoint.
    #[arg(long, env = "ENEX2NOTION_UPLOAD_TOKEN", hide_env_values = true)]
    upload_token: Option<String>,

    /// Checkpoint file for resumable runs.
    #[arg(long, env = "ENEX2NOTION_CHECKPOINT")]
    checkpoint: Option<PathBuf>,

    /// Concurrent attachment uploads.
    #[arg(short, long, env = "ENEX2NOTION_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Retries per API call or upload.
    #[arg(long, env = "ENEX2NOTION_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Sustained Notion API requests per second.
    #[arg(long, env = "ENEX2NOTION_RATE", default_value_t = 3.0)]
    rate: f64,

    /// Notion API burst capacity.
    #[arg(long, env = "ENEX2NOTION_BURST", default_value_t = 10)]
    burst: u32,

    /// Do not prepend the metadata callout.
    #[arg(long, env = "ENEX2NOTION_NO_METADATA")]
    no_metadata: bool,

    /// Parse and convert only; no uploads or API calls.
    #[arg(long)]
    dry_run: bool,

    /// Summarise the exports and exit.
    #[arg(long)]
    inspect_only: bool,

    /// Print the report (or inspection) as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "ENEX2NOTION_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ENEX2NOTION_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ENEX2NOTION_QUIET")]
    quiet: bool,

    /// Notion API request timeout in seconds.
    #[arg(long, env = "ENEX2NOTION_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Upload request timeout in seconds.
    #[arg(long, env = "ENEX2NOTION_UPLOAD_TIMEOUT", default_value_t = 120)]
    upload_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs would fight the progress bar; it carries the feedback.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let files = expand_inputs(&cli.inputs)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        return inspect_files(&files, cli.json);
    }

    // ── Build config and run ─────────────────────────────────────────────
    let cli_progress = show_progress.then(CliProgressCallback::new);
    let progress_cb = cli_progress
        .clone()
        .map(|p| p as Arc<dyn MigrationProgressCallback>);
    let config = build_config(&cli, progress_cb)?;
    let migrator = Migrator::from_config(config).context("Failed to start migration")?;

    let cancel = migrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: finishing the note in progress, then stopping");
            eprintln!("\n{} stopping after the note in progress…", cyan("⚠"));
            cancel.cancel();
        }
    });

    let result = migrator.migrate_files(&files).await;
    if let Some(p) = &cli_progress {
        p.finish();
    }
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            // Work done before a halt is still worth showing.
            if let Some(partial) = e.report() {
                print_report(partial, &cli)?;
            }
            return Err(anyhow::Error::new(e).context("Migration failed"));
        }
    };

    print_report(&report, &cli)?;

    if report.has_failures() {
        std::process::exit(2);
    }
    Ok(())
}

/// Map CLI args to `MigrationConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<MigrationConfig> {
    let mut builder = MigrationConfig::builder()
        .parent_kind(if cli.database {
            ParentKind::Database
        } else {
            ParentKind::Page
        })
        .upload_concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .rate_per_sec(cli.rate)
        .burst(cli.burst)
        .include_metadata(!cli.no_metadata)
        .dry_run(cli.dry_run)
        .api_timeout_secs(cli.api_timeout)
        .upload_timeout_secs(cli.upload_timeout);

    if let Some(ref token) = cli.token {
        builder = builder.notion_token(token);
    }
    if let Some(ref parent) = cli.parent {
        builder = builder.parent_id(parent);
    }
    if let Some(ref url) = cli.upload_url {
        builder = builder.upload_url(url);
    }
    if let Some(ref token) = cli.upload_token {
        builder = builder.upload_token(token);
    }
    if let Some(ref path) = cli.checkpoint {
        builder = builder.checkpoint_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Files as given; directories expand to their `.enex` files, sorted.
fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to list {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("enex"))
                })
                .collect();
            found.sort();
            if found.is_empty() {
                anyhow::bail!("No .enex files in {}", input.display());
            }
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn inspect_files(files: &[PathBuf], json: bool) -> Result<()> {
    let mut summaries = Vec::new();
    for file in files {
        let summary = enex::inspect(file)
            .with_context(|| format!("Failed to inspect {}", file.display()))?;
        summaries.push((file.display().to_string(), summary));
    }

    if json {
        let value: serde_json::Map<String, serde_json::Value> = summaries
            .into_iter()
            .map(|(file, s)| serde_json::to_value(s).map(|v| (file, v)))
            .collect::<Result<_, _>>()
            .context("Failed to serialise summary")?;
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to serialise summary")?
        );
        return Ok(());
    }

    for (file, s) in summaries {
        println!("File:         {}", file);
        println!("Notes:        {}", s.notes);
        println!(
            "Attachments:  {} ({:.1} MB)",
            s.resources,
            s.resource_bytes as f64 / 1_048_576.0
        );
        if let (Some(oldest), Some(newest)) = (s.oldest, s.newest) {
            println!(
                "Created:      {} … {}",
                oldest.format("%Y-%m-%d"),
                newest.format("%Y-%m-%d")
            );
        }
        if !s.tags.is_empty() {
            let tags: Vec<&str> = s.tags.iter().map(String::as_str).collect();
            println!("Tags ({}):    {}", tags.len(), tags.join(", "));
        }
        println!();
    }
    Ok(())
}

fn print_report(report: &MigrationReport, cli: &Cli) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("Failed to serialise report")?
        );
        return Ok(());
    }
    if cli.quiet && !report.has_failures() {
        return Ok(());
    }

    let mark = if report.has_failures() {
        cyan("⚠")
    } else {
        green("✔")
    };
    eprintln!("{mark} {}", bold(report.to_string().lines().next().unwrap_or("")));
    for line in report.to_string().lines().skip(1) {
        if line.trim_start().starts_with('✗') {
            eprintln!("{}", red(line));
        } else {
            eprintln!("{}", dim(line));
        }
    }
    Ok(())
}
