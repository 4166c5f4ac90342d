use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use memoquery::config::Config;

mod logging;
mod stresstest;
mod workloads;

use stresstest::perform_stresstest;
use workloads::WorkloadsConfig;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Enable tracing output, which is discarded but still formatted.
    #[arg(long)]
    tracing: bool,

    /// Enable metrics, which are sent to a local sink.
    #[arg(long)]
    metrics: bool,
}

fn main() {
    if let Err(error) = execute() {
        memoquery::logging::ensure_log_error(&error);
        std::process::exit(1);
    }
}

fn execute() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads = WorkloadsConfig::from_path(&cli.workloads)?;
    let config = Config::get(cli.config.as_deref())?;

    // `--tracing` installs its own subscriber that discards all output
    if !cli.tracing {
        // SAFETY: No other threads exist before the runtime is started.
        unsafe { memoquery::logging::init_logging(&config) };
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async move {
        let logging = logging::Config {
            tracing: cli.tracing,
            metrics: cli.metrics,
        };
        let _guard = logging::init(logging)?;
        if !cli.metrics {
            memoquery::metrics::configure(&config.metrics)
                .context("failed to configure metrics")?;
        }

        perform_stresstest(config, workloads, cli.duration).await
    })
}
