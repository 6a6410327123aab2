use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use product_filter::config::ProductFilterConfig;
use product_filter::logging::{LoggingConfig, init_logging};
use product_filter::module::area::FileAreaResolver;
use product_filter::module::orbit::CommandPropagator;
use product_filter::service::ProductFilterRunner;

/// Filter satellite granules by area coverage and route the ones that pass
#[derive(Parser, Debug)]
#[command(name = "product-filter")]
#[command(about = "Filter satellite granules by area of interest")]
struct Args {
    /// Main configuration file
    #[arg(short = 'c', long)]
    config_file: String,

    /// Service section of the configuration file to run
    #[arg(short, long)]
    service: String,

    /// Logging configuration file
    #[arg(short, long)]
    logging: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("product-filter: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ProductFilterConfig::from_file(&args.config_file)?;
    let service = args.service.to_lowercase();

    let logging = match &args.logging {
        Some(path) => LoggingConfig::from_file(path)?,
        None => LoggingConfig::from_service_config(&config, &service),
    };
    let _logging_guard = init_logging(&logging, args.verbose)?;

    tracing::info!("Product filter starting, service {}", service);
    let settings = Arc::new(config.service(&service)?);

    let propagator = CommandPropagator::new(&settings.coverage_command)
        .context("coverage_command must name the orbit coverage program")?;
    if settings.subscribe_addresses.is_empty() {
        anyhow::bail!("subscribe_addresses must list at least one address");
    }

    let areas = FileAreaResolver::from_env();
    tracing::info!("Area definitions read from {}", areas.path().display());

    let cancel = CancellationToken::new();
    let mut runner = ProductFilterRunner::start(
        Arc::clone(&settings),
        Arc::new(propagator),
        Arc::new(areas),
        cancel.clone(),
    )
    .await?;

    tokio::spawn(wait_for_shutdown(cancel));

    let stats = runner.run().await;
    tracing::info!(
        "Processed {} messages: {} inside, {} outside, {} failed",
        stats.received, stats.inside, stats.outside, stats.failed
    );

    Ok(())
}

async fn wait_for_shutdown(cancel: CancellationToken) {
    shutdown_signal().await;
    cancel.cancel();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            tracing::warn!("Cannot install SIGTERM handler: {}", e);
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c() => {}
        _ = terminate.recv() => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C"),
        Err(e) => {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
