//! Extraction worker binary.
//!
//! Spawned by the supervisor as an independent OS process so extraction can
//! be killed (tree and all) without touching the supervising server. Takes
//! only the source path and the output directory; everything else —
//! progress, resume state, the final verdict — goes through the Progress
//! Record in the output directory.
//!
//! Exit code 0 means the terminal record is `completed`; any failure writes
//! an `error` record and exits 1.

use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args_os().skip(1);
    let (Some(source), Some(output_dir)) = (args.next(), args.next()) else {
        eprintln!("Usage: bookmill-worker <source> <output_dir>");
        return ExitCode::from(2);
    };

    let source = PathBuf::from(source);
    let output_dir = PathBuf::from(output_dir);

    match bookmill::worker::run_worker(&source, &output_dir).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bookmill-worker: {e}");
            ExitCode::FAILURE
        }
    }
}
