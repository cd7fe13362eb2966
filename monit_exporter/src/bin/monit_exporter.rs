//! Prometheus exporter for Monit.
//!
//! `monit_exporter serve` scrapes Monit's XML status endpoint on every
//! Prometheus request and answers with the resulting gauges. Without a
//! subcommand the help text is printed.

use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use monit_exporter::{
    collector::{self, ExporterBuilder},
    config::{self, Config, LogLevel},
    httpd,
};
use tokio::{runtime::Builder, signal};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to create exporter: {0}")]
    Exporter(#[from] collector::Error),
    #[error("HTTP server failed: {0}")]
    Httpd(#[from] httpd::Error),
}

#[derive(Parser, Debug)]
#[clap(
    name = "monit_exporter",
    version,
    about = "Monit Exporter for Prometheus",
    long_about = "Prometheus Exporter that collects Monit status information and exposes metrics."
)]
struct Cli {
    #[command(flatten)]
    args: GlobalArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Run the Monit Exporter server that collects Monit status and exposes
    /// Prometheus metrics
    Serve,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// address to listen on for the metrics endpoint
    #[clap(long, global = true, default_value = config::DEFAULT_LISTEN_ADDRESS)]
    listen_address: String,
    /// path under which metrics are exposed
    #[clap(long, global = true, default_value = config::DEFAULT_METRICS_PATH)]
    metrics_path: String,
    /// skip TLS certificate verification when scraping Monit
    #[clap(long, global = true)]
    ignore_ssl: bool,
    /// URI of Monit's XML status page
    #[clap(long, global = true, default_value = config::DEFAULT_UPSTREAM_URL)]
    monit_scrape_uri: String,
    /// basic auth user for Monit
    #[clap(long, global = true, default_value = "")]
    monit_user: String,
    /// basic auth password for Monit
    #[clap(long, global = true, default_value = "")]
    monit_password: String,
    /// log level, one of debug, info, warn, error, fatal, panic
    #[clap(long, global = true, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

impl GlobalArgs {
    fn to_config(&self) -> Config {
        Config {
            upstream_url: self.monit_scrape_uri.clone(),
            user: self.monit_user.clone(),
            password: self.monit_password.clone(),
            ignore_tls: self.ignore_ssl,
            listen_address: self.listen_address.clone(),
            metrics_path: self.metrics_path.clone(),
        }
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Unable to listen for SIGINT: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Unable to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("Received SIGINT, stopping Monit exporter gracefully."),
        () = terminate => info!("Received SIGTERM, stopping Monit exporter gracefully."),
    }
}

async fn inner_main(config: Config) -> Result<(), Error> {
    let exporter = Arc::new(ExporterBuilder::new().config(config.clone()).build()?);

    info!(
        "Starting Monit exporter on {listen_address}",
        listen_address = config.listen_address
    );
    httpd::run(
        &config.listen_address,
        &config.metrics_path,
        exporter,
        shutdown_signal(),
    )
    .await?;
    info!("Monit exporter stopped");
    Ok(())
}

fn main() -> Result<(), Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            // Logging is not set up yet and stderr is the only channel. If that
            // write fails the exit status still reports the error.
            let _ = err.print();
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(
                    tracing::level_filters::LevelFilter::from(cli.args.log_level).into(),
                )
                .from_env_lossy(),
        )
        .with_ansi(false)
        .finish()
        .init();

    let Some(Commands::Serve) = cli.command else {
        debug!("no subcommand given, printing help");
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = cli.args.to_config();
    debug!("configuration loaded: {config:?}");

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    if let Err(err) = &res {
        error!("{err}");
    }
    res
}
