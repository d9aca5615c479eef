// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cinch-daemon: the cinch CI scheduling daemon (`cinchd`)
//!
//! The daemon reads the job catalog, schedules recurring runs, admits them
//! under concurrency constraints, supervises the child processes, and
//! records every run through the store. The library surface exists for the
//! binary and for integration tests that embed the reactor directly.

pub mod arbiter;
pub mod lifecycle;
pub mod reactor;
pub mod signals;
pub mod supervisor;
pub mod watcher;

pub use lifecycle::DaemonError;
pub use reactor::Reactor;
pub use signals::{SignalEvent, Signals};
