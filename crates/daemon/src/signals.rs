// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unix signal streams for the reactor
//!
//! SIGINT/SIGTERM shut down, SIGHUP reloads the catalog, SIGQUIT dumps
//! status, SIGUSR1 forces an immediate trigger scan. Streams are folded
//! into one `recv` future so the reactor can select on a single source.

use tokio::signal::unix::{signal, Signal, SignalKind};

/// A signal event the reactor acts on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGINT / SIGTERM
    Shutdown,
    /// SIGHUP
    Reload,
    /// SIGQUIT
    DumpStatus,
    /// SIGUSR1
    ScanTriggers,
}

pub struct Signals {
    sigint: Signal,
    sigterm: Signal,
    sighup: Signal,
    sigquit: Signal,
    sigusr1: Signal,
}

impl Signals {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sighup: signal(SignalKind::hangup())?,
            sigquit: signal(SignalKind::quit())?,
            sigusr1: signal(SignalKind::user_defined1())?,
        })
    }

    /// Wait for the next signal.
    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.sigint.recv() => SignalEvent::Shutdown,
            _ = self.sigterm.recv() => SignalEvent::Shutdown,
            _ = self.sighup.recv() => SignalEvent::Reload,
            _ = self.sigquit.recv() => SignalEvent::DumpStatus,
            _ = self.sigusr1.recv() => SignalEvent::ScanTriggers,
        }
    }
}
