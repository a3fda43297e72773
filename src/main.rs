use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::sleep;

use mothership::config::{Config, load_config};
use mothership::fetch::HttpFetcher;
use mothership::metrics::METRICS;
use mothership::parser::ListingParser;
use mothership::{Collector, LogSink, Worker, WorkerError};

const USAGE: &str = "usage: crawl-mothership <mothership|worker> [config.json]";

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Load configuration
// - Initialize logging
// - Start the requested role
//
// Exit codes:
// - 0: success
// - 1: worker finished but results were not delivered
// - 2: usage / configuration / startup error
//
#[tokio::main]
async fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let role = args.next();
    let path = args.next().unwrap_or_else(|| "config.json".to_string());

    let config = match load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    init_logging(&config);

    let outcome = match role.as_deref() {
        Some("mothership") => run_mothership(&config).await,
        Some("worker") => run_worker(&config).await,
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `debug.log`.
fn init_logging(config: &Config) {
    let default = if config.debug_log() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

// ------------------------------------------------------------
// Mothership role
// ------------------------------------------------------------
//
// Runs the collector until Ctrl-C. Shutdown is cooperative:
// the accept loop and every connection stop at their next
// suspension point.
//
async fn run_mothership(config: &Config) -> anyhow::Result<ExitCode> {
    log::info!("Starting Mothership.");

    let collector = Collector::bind(&config.mothership, Arc::new(LogSink), config.debug_log())
        .await
        .with_context(|| format!("binding {}", config.mothership.address()))?;
    let handle = collector.handle()?;

    // Periodic metrics line (low-noise)
    tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(10)).await;
            log::info!("[METRICS] {}", METRICS.summary());
        }
    });

    tokio::spawn({
        let handle = handle.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Ctrl-C received, stopping");
                handle.stop();
            }
        }
    });

    collector.run().await?;
    Ok(ExitCode::SUCCESS)
}

// ------------------------------------------------------------
// Worker role
// ------------------------------------------------------------
async fn run_worker(config: &Config) -> anyhow::Result<ExitCode> {
    let worker_cfg = config
        .worker
        .clone()
        .context("config has no `worker` section")?;

    let fetcher = HttpFetcher::new(&worker_cfg.user_agent, worker_cfg.request_timeout())?;
    let parser = ListingParser::new(&worker_cfg.seed);

    let mut worker = Worker::connect(
        worker_cfg,
        &config.mothership,
        Arc::new(fetcher),
        Arc::new(parser),
        config.debug_log(),
    )
    .await;

    match worker.run().await {
        Ok(report) => {
            log::info!(
                "crawl delivered: {} pages, {} records",
                report.pages_crawled,
                report.records_extracted
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err @ WorkerError::Undelivered { .. }) => {
            let report = err.report();
            log::error!(
                "crawl finished locally ({} pages, {} records) but was not delivered: {}",
                report.pages_crawled,
                report.records_extracted,
                err
            );
            Ok(ExitCode::from(1))
        }
    }
}
