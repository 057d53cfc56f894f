//! rrproxy - a round-robin HTTP reverse-proxy load balancer
//!
//! Usage:
//!     rrproxy --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use rrproxy::backend::BackendPool;
use rrproxy::config::{Config, load_config};
use rrproxy::frontend::FrontendListener;
use rrproxy::health::{HealthMonitor, Probe};
use rrproxy::metrics::{MetricsCollector, MetricsServer};
use rrproxy::proxy::{Dispatcher, HttpForwarder, RetryPolicy};
use rrproxy::util::{ShutdownSignal, init_logging};

/// Round-robin HTTP reverse proxy with health checking.
#[derive(Parser, Debug)]
#[command(name = "rrproxy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);
    init_logging(log_level, &config.global.log_format);

    if cli.validate {
        print_summary(&config);
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        listen = %config.listen,
        backends = config.backends.len(),
        "rrproxy starting"
    );
    for backend in &config.backends {
        info!(backend = %backend, "configured backend");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run(config))
}

fn print_summary(config: &Config) {
    println!("Configuration is valid.");
    println!("  Listen: {}", config.listen);
    println!("  Backends: {}", config.backends.len());
    for backend in &config.backends {
        println!("    - {}", backend);
    }
    println!(
        "  Health check: {:?} every {}, timeout {}",
        config.health_check.check_type,
        humantime::format_duration(config.health_check.interval),
        humantime::format_duration(config.health_check.timeout),
    );
    println!(
        "  Retry: {} retries, {} delay, {} attempts",
        config.retry.max_retries,
        humantime::format_duration(config.retry.retry_delay),
        config.retry.max_attempts,
    );
}

async fn run(config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    let metrics = MetricsCollector::new();

    let pool = Arc::new(BackendPool::from_addresses(config.backends.iter().cloned()));
    for backend in pool.backends() {
        metrics.set_backend_alive(backend.address(), backend.get_status());
    }

    let mut handles = Vec::new();

    if config.global.metrics.enabled {
        let server = MetricsServer::bind(
            config.global.metrics.address,
            config.global.metrics.path.clone(),
            metrics.clone(),
        )
        .await
        .with_context(|| {
            format!(
                "failed to bind metrics server on {}",
                config.global.metrics.address
            )
        })?;
        handles.push(tokio::spawn(server.run(shutdown.subscribe())));
    }

    let monitor = HealthMonitor::new(
        Arc::clone(&pool),
        Probe::from_config(&config.health_check),
        config.health_check.interval,
        metrics.clone(),
    );
    handles.push(tokio::spawn(monitor.run(shutdown.subscribe())));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&pool),
        HttpForwarder::new(&config.proxy),
        RetryPolicy::from(&config.retry),
        metrics.clone(),
    ));
    let listener = FrontendListener::bind(
        config.listen,
        dispatcher,
        config.proxy.max_body_size,
        metrics,
    )
    .await
    .with_context(|| format!("failed to bind frontend on {}", config.listen))?;
    handles.push(tokio::spawn(listener.run(shutdown.subscribe())));

    info!("rrproxy is running");
    info!("press Ctrl+C to stop");

    shutdown.on_ctrl_c().await;

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "task ended abnormally");
        }
    }

    info!("rrproxy shut down complete");
    Ok(())
}
