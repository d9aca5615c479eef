// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cinchd: the cinch CI scheduling daemon

use anyhow::Context;
use cinch_core::config::default_config_dir;
use cinch_core::Config;
use cinch_daemon::lifecycle;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cinchd", about = "cinch scheduling daemon", version)]
struct Args {
    /// Base configuration directory
    #[arg(short = 'c', long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Daemonize into the background
    #[arg(short = 'd', long)]
    fork: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Suppress log timestamps
    #[arg(long)]
    no_timestamp: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_dir = args.config_dir.clone().unwrap_or_else(default_config_dir);

    let config = Config::load_dir(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    // Fork before the runtime and logging workers start any threads
    if args.fork {
        lifecycle::daemonize()?;
    }
    let log_file = args
        .fork
        .then(|| config.data_dir.join("cinch-daemon.log"));
    let _log_guard = init_logging(&args, log_file)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_dir = %config_dir.display(),
        data_dir = %config.data_dir.display(),
        "starting cinchd"
    );

    // The reactor is a single-threaded cooperative loop
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(lifecycle::run(config, config_dir))?;
    Ok(())
}

fn init_logging(
    args: &Args,
    log_file: Option<PathBuf>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .context("log path has no parent directory")?;
            let name = path.file_name().context("log path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None if args.no_timestamp => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr).without_time())
                .init();
            Ok(None)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            Ok(None)
        }
    }
}
