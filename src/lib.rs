//! # bookmill
//!
//! Resumable book-conversion jobs: OCR extraction supervised as a killable
//! subprocess, and chunked LLM translation with crash-safe checkpoints.
//!
//! ## Why this crate?
//!
//! Converting a long document is a multi-stage, long-running transformation
//! — OCR extraction and chunked machine translation can take minutes to
//! hours. The hard part is not the transformation (external engines do
//! that) but the supervision: surviving process restarts without redoing
//! expensive work, cancelling mid-flight, never racing two workers onto the
//! same output, and tearing down orphans safely.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source.pdf
//!  │
//!  ├─ 1. Supervise  spawn bookmill-worker as its own OS process
//!  ├─ 2. Extract    OCR engine runs; stage lines → Progress Record
//!  ├─ 3. Resume point  `extracted` record + artifact survive restarts
//!  ├─ 4. Split      chapters NN_<title>.md + images/
//!  └─ 5. Translate  segment → per-unit LLM calls → checkpoints → merge
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bookmill::{ExtractSupervisor, NoopExtractProgress, SupervisorConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let supervisor = ExtractSupervisor::new(SupervisorConfig::default());
//!
//!     // Kill orphans from a previous run before accepting work.
//!     supervisor.reconcile(Path::new("books")).await;
//!
//!     let record = supervisor
//!         .extract(Path::new("books/b1/mybook.pdf"), &NoopExtractProgress)
//!         .await?;
//!     println!("extraction finished: {}", record.status);
//!     Ok(())
//! }
//! ```
//!
//! Translation, resumable at unit granularity:
//!
//! ```rust,no_run
//! use bookmill::{Lang, NoopTranslateProgress, OpenAiChatClient, TranslateConfig, TranslationEngine};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(OpenAiChatClient::from_env()?);
//! let model = client.model().to_string();
//! let engine = TranslationEngine::new(client, model, TranslateConfig::default());
//!
//! let output = engine
//!     .translate_document(
//!         Path::new("books/b1/mybook/mybook.md"),
//!         Path::new("books/b1/mybook_zh"),
//!         Lang::Zh,
//!         "b1",
//!         &NoopTranslateProgress,
//!     )
//!     .await?;
//! println!("{} chapters at {}", output.chapters, output.document.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bookmill` CLI and `bookmill-worker` binaries |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod images;
pub mod lang;
pub mod llm;
pub mod ocr;
pub mod paths;
pub mod progress;
pub mod prompts;
pub mod segment;
pub mod split;
pub mod supervisor;
pub mod translate;
pub mod tts;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{SupervisorConfig, SupervisorConfigBuilder, TranslateConfig, TranslateConfigBuilder};
pub use error::{BookmillError, LlmError, UnitError};
pub use lang::{detect_language, Lang};
pub use llm::{ChatClient, ChatOptions, OpenAiChatClient, TokenStream};
pub use progress::{clear_record, read_record, write_record, JobRecord, JobStatus};
pub use segment::segment;
pub use supervisor::{
    ExtractProgressCallback, ExtractSupervisor, NoopExtractProgress, ProgressEvent,
};
pub use translate::{
    language_info, progress_percent, LanguageInfo, NoopTranslateProgress,
    TranslateProgressCallback, TranslationEngine, TranslationOutput,
};
