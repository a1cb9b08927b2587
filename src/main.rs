//! Main entry point for the jarfix CLI application.
//!
//! Takes an input and an output JAR path, rewrites the input into the
//! output and reports the outcome.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use jarfix::{Cli, normalize_with};

/// Application entry point.
///
/// Argument errors are reported by clap before any work is done. A failed
/// run is reported on stderr with its cause chain and a nonzero exit status.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let report = normalize_with(&cli.input, &cli.output, &cli.options()).await?;

    if !cli.quiet {
        println!(
            "Successfully fixed JAR file '{}' and saved as '{}'",
            cli.input.display(),
            cli.output.display()
        );
        if cli.verbose > 0 {
            eprintln!(
                "{} entries written ({} files, {} directories, {} added); \
                 {} reclassified, {} duplicates dropped",
                report.entries_written(),
                report.files,
                report.directories + report.synthesized_directories,
                report.synthesized_directories,
                report.reclassified,
                report.duplicate_directories
            );
        }
    }

    Ok(())
}

/// Install the stderr log subscriber.
///
/// `RUST_LOG` takes precedence over the `-v`/`-q` flags.
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jarfix={}", cli.log_filter())));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
