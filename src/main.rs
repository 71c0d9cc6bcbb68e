use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use http_scan_rs::config::{self, ScanConfig};
use http_scan_rs::input::JobSource;
use http_scan_rs::{logging, scanner};

/// http-scan-rs — Fetch HTTP status lines and server metadata for a list of URLs.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "http-scan-rs",
    version,
    about = "Fetch HTTP status lines and server metadata for a list of URLs with a bounded worker pool.",
    long_about = None
)]
struct Cli {
    /// Path to a file with one URL per line.
    #[arg(long)]
    input: PathBuf,

    /// Number of concurrent workers. Defaults to the host's available parallelism.
    #[arg(long)]
    workers: Option<usize>,

    /// Deadline for the whole run, in seconds.
    #[arg(long, default_value_t = config::DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Write result records to this path instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// User-Agent header sent with every request.
    #[arg(long = "user-agent")]
    user_agent: Option<String>,

    /// Enable debug diagnostics on stderr.
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let workers = cli.workers.unwrap_or_else(config::default_workers);
    let mut cfg = ScanConfig::new(workers, Duration::from_secs(cli.timeout))?;
    if let Some(ua) = cli.user_agent {
        cfg = cfg.with_user_agent(ua);
    }

    let source = JobSource::open(&cli.input).await?;
    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match cli.output.as_deref() {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create output file: {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    // Ctrl-C cancels the run the same way the deadline does.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_ctrlc.cancel();
        }
    });

    let summary = scanner::scan_with_cancel(cfg, source, &mut sink, cancel).await?;
    eprintln!("{}", summary.outcome.status_line());
    Ok(())
}
