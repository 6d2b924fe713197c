//! CLI binary for bookmill.
//!
//! A thin shim over the library crate that maps CLI subcommands to the
//! supervisor and translation engine and renders progress.

use anyhow::{Context, Result};
use bookmill::{
    progress_percent, ExtractProgressCallback, ExtractSupervisor, JobRecord, JobStatus, Lang,
    OpenAiChatClient, SupervisorConfig, TranslateConfig, TranslateProgressCallback,
    TranslationEngine,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
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

// ── Progress rendering ───────────────────────────────────────────────────────

/// Terminal progress for an extraction job: one bar driven by the Progress
/// Records the supervisor forwards.
struct CliExtractProgress {
    bar: ProgressBar,
}

impl CliExtractProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ExtractProgressCallback for CliExtractProgress {
    fn on_update(&self, record: &JobRecord) {
        self.bar.set_position(record.progress as u64);
        if let Some(step) = &record.current_step {
            self.bar.set_prefix(step.clone());
        }
        self.bar.set_message(record.message.clone());
    }

    fn on_done(&self, success: bool) {
        self.bar.finish_and_clear();
        if success {
            eprintln!("{} extraction completed", green("✔"));
        }
    }
}

/// Terminal progress for a translation job.
struct CliTranslateProgress {
    bar: ProgressBar,
}

impl CliTranslateProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_prefix("Translating");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl TranslateProgressCallback for CliTranslateProgress {
    fn on_progress(&self, percent: u8, message: &str) {
        self.bar.set_position(percent as u64);
        self.bar.set_message(message.to_string());
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a book (spawns bookmill-worker; resumable after interruption)
  bookmill extract books/b1/mybook.pdf

  # Check on a job from another shell (or after a server restart)
  bookmill status books/b1/mybook.pdf

  # Cancel the running extraction, killing the worker process tree
  bookmill cancel books/b1/mybook.pdf

  # Translate the extracted markdown to Chinese, resumable per unit
  bookmill translate books/b1/mybook/mybook.md --lang zh

  # Clean up stale jobs after a crash (run at server startup/shutdown)
  bookmill sweep books/

ENVIRONMENT VARIABLES:
  BOOKMILL_OCR_CMD    OCR engine command, e.g. "marker_single"
  LLM_BASE_URL        OpenAI-compatible endpoint (default: api.openai.com/v1)
  LLM_API_KEY         API key for the endpoint
  LLM_DEFAULT_MODEL   Model for translation and domain detection
  LLM_MODELS          Comma-separated list of selectable models
"#;

/// Convert and translate books with resumable, cancellable jobs.
#[derive(Parser, Debug)]
#[command(
    name = "bookmill",
    version,
    about = "Resumable OCR extraction and chunked LLM translation for long documents",
    after_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a source document to markdown chapters via the OCR worker.
    Extract {
        /// Source document (e.g. a PDF).
        source: PathBuf,
    },
    /// Translate an extracted markdown document.
    Translate {
        /// The extraction's markdown artifact.
        source_md: PathBuf,
        /// Target language (zh or en).
        #[arg(long)]
        lang: Lang,
        /// Model override (defaults to LLM_DEFAULT_MODEL).
        #[arg(long)]
        model: Option<String>,
        /// Output directory (defaults to `<extraction dir>_<lang>`).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Show the current job record for a source document.
    Status {
        source: PathBuf,
        /// Also show translation progress for this language.
        #[arg(long)]
        lang: Option<Lang>,
    },
    /// Cancel the running extraction for a source document.
    Cancel { source: PathBuf },
    /// Reconcile all job directories under a resources root.
    Sweep { root: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let supervisor = ExtractSupervisor::new(SupervisorConfig::default());

    match cli.command {
        Command::Extract { source } => {
            let progress = CliExtractProgress::new();
            let record = supervisor
                .extract(&source, &progress)
                .await
                .with_context(|| format!("extraction of {} failed", source.display()))?;
            println!("{} {}", bold(&record.status.to_string()), dim(&record.message));
        }

        Command::Translate {
            source_md,
            lang,
            model,
            output,
        } => {
            let mut client = OpenAiChatClient::from_env()?;
            if let Some(model) = model {
                client = client.with_model(model);
            }
            let model_name = client.model().to_string();
            let engine = TranslationEngine::new(Arc::new(client), model_name, TranslateConfig::default());

            let extraction_dir = source_md
                .parent()
                .context("source markdown has no parent directory")?;
            let target_dir = output
                .unwrap_or_else(|| bookmill::paths::translation_dir(extraction_dir, lang.code()));
            let job_id = source_md
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            let progress = CliTranslateProgress::new();
            let result = engine
                .translate_document(&source_md, &target_dir, lang, &job_id, &progress)
                .await
                .with_context(|| format!("translation of {} failed", source_md.display()))?;
            progress.bar.finish_and_clear();
            eprintln!(
                "{} {} chapters written to {}",
                green("✔"),
                bold(&result.chapters.to_string()),
                result.document.parent().unwrap_or(target_dir.as_path()).display()
            );
        }

        Command::Status { source, lang } => {
            match supervisor.status(&source) {
                Some(record) => {
                    let status = match record.status {
                        JobStatus::Completed => green(&record.status.to_string()),
                        JobStatus::Error | JobStatus::Cancelled => red(&record.status.to_string()),
                        _ => bold(&record.status.to_string()),
                    };
                    println!("{status}  {}%  {}", record.progress, record.message);
                    if let Some(step) = record.current_step {
                        println!("{}", dim(&format!("step: {step}")));
                    }
                    if let Some(pid) = record.pid {
                        println!("{}", dim(&format!("worker pid: {pid}")));
                    }
                }
                None => println!("{}", dim("no job record")),
            }

            if let Some(lang) = lang {
                let extraction_dir = bookmill::paths::output_dir_for(&source);
                let target_dir = bookmill::paths::translation_dir(&extraction_dir, lang.code());
                let pct = progress_percent(&target_dir, lang);
                if pct > 0 {
                    println!("translation ({}): {pct}%", lang.code());
                }
            }
        }

        Command::Cancel { source } => {
            supervisor
                .cancel(&source)
                .await
                .with_context(|| format!("could not cancel job for {}", source.display()))?;
            eprintln!("{} job cancelled", green("✔"));
        }

        Command::Sweep { root } => {
            let cleaned = supervisor.reconcile(&root).await;
            eprintln!("{} cleaned {cleaned} stale job(s)", green("✔"));
        }
    }

    Ok(())
}
