// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, locking, daemonization, shutdown.

use crate::reactor::Reactor;
use crate::signals::Signals;
use cinch_core::{Config, ConfigError, SystemClock};
use cinch_storage::{open_store, StoreError};
use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to acquire daemon lock (is another cinchd running?): {0}")]
    LockFailed(#[source] std::io::Error),

    #[error("daemonize failed: {0}")]
    Daemonize(#[from] nix::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the daemon until shutdown completes.
///
/// Startup order: data dir, exclusive pid lock, store, signal streams,
/// recovery (spool replay + orphan finalization), then the loop.
pub async fn run(config: Config, config_dir: PathBuf) -> Result<(), DaemonError> {
    std::fs::create_dir_all(&config.data_dir)?;
    let lock_path = config.data_dir.join("cinch-daemon.pid");
    // NOTE(lifetime): held to maintain the exclusive lock; released on drop
    let _lock = acquire_lock(&lock_path)?;

    let store = open_store(&config.database, &config.data_dir)?;
    let mut signals = Signals::new()?;
    let mut reactor = Reactor::new(config, config_dir, store, SystemClock)?;
    reactor.recover()?;

    info!("daemon ready");
    let result = reactor.run(&mut signals).await;

    if let Err(error) = std::fs::remove_file(&lock_path) {
        tracing::warn!(%error, "failed to remove pid file");
    }
    info!("daemon stopped");
    result.map_err(DaemonError::from)
}

fn acquire_lock(path: &Path) -> Result<File, DaemonError> {
    let mut file = File::create(path)?;
    file.try_lock_exclusive().map_err(DaemonError::LockFailed)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

/// Double-fork into the background, detaching from the controlling
/// terminal and pointing stdio at /dev/null. Must run before the tokio
/// runtime starts.
pub fn daemonize() -> Result<(), DaemonError> {
    use nix::unistd::{dup2, fork, setsid, ForkResult};
    use std::os::fd::AsRawFd;

    if let ForkResult::Parent { .. } = unsafe { fork() }? {
        std::process::exit(0);
    }
    setsid()?;
    if let ForkResult::Parent { .. } = unsafe { fork() }? {
        std::process::exit(0);
    }

    let devnull = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for target in 0..=2 {
        dup2(devnull.as_raw_fd(), target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_same_pid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinch-daemon.pid");
        let _held = acquire_lock(&path).unwrap();
        assert!(matches!(
            acquire_lock(&path),
            Err(DaemonError::LockFailed(_))
        ));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinch-daemon.pid");
        drop(acquire_lock(&path).unwrap());
        assert!(acquire_lock(&path).is_ok());
    }
}
