// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrency admission and denial backoff
//!
//! The arbiter keeps one live-slot counter per concurrency group. A run
//! listing several groups is admitted only when every listed group has
//! headroom, and exactly one slot (the first listed group's) is charged.
//! Denied jobs retry under per-job exponential backoff.

use std::collections::HashMap;
use std::time::Duration;

/// First retry delay after a denial
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(5);
/// Backoff never exceeds five minutes
pub const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Result of an admission attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted { chosen_group: Option<String> },
    Denied,
}

/// Tracks live slots per concurrency group
#[derive(Debug, Default)]
pub struct Arbiter {
    active: HashMap<String, u32>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to admit a run claiming the given groups (in the job's
    /// configured order). `cap_of` resolves a group's slot cap.
    pub fn try_admit(&mut self, groups: &[String], cap_of: impl Fn(&str) -> u32) -> Admission {
        if groups.is_empty() {
            return Admission::Admitted { chosen_group: None };
        }
        let full = groups
            .iter()
            .any(|group| self.active_slots(group) >= cap_of(group));
        if full {
            return Admission::Denied;
        }
        // Every group has headroom; only the first listed group is charged
        let chosen = groups[0].clone();
        *self.active.entry(chosen.clone()).or_insert(0) += 1;
        Admission::Admitted {
            chosen_group: Some(chosen),
        }
    }

    /// Release the slot charged at admission. Exactly one call per admitted
    /// run, on the child-exit path.
    pub fn release(&mut self, chosen_group: Option<&str>) {
        let Some(group) = chosen_group else { return };
        if let Some(count) = self.active.get_mut(group) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.active.remove(group);
            }
        }
    }

    /// Live slots currently charged to a group.
    pub fn active_slots(&self, group: &str) -> u32 {
        self.active.get(group).copied().unwrap_or(0)
    }

    /// Groups with at least one live slot, for the status dump.
    pub fn busy_groups(&self) -> impl Iterator<Item = (&str, u32)> {
        self.active.iter().map(|(name, count)| (name.as_str(), *count))
    }
}

/// Per-job exponential backoff, doubling per consecutive denial
#[derive(Clone, Debug)]
pub struct Backoff {
    next_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next_delay: BACKOFF_INITIAL,
        }
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// The delay to apply now; doubles the next one up to the cap.
    pub fn delay(&mut self) -> Duration {
        let delay = self.next_delay;
        self.next_delay = (delay * 2).min(BACKOFF_MAX);
        delay
    }

    /// Reset after a successful admission.
    pub fn reset(&mut self) {
        self.next_delay = BACKOFF_INITIAL;
    }
}

#[cfg(test)]
#[path = "arbiter_tests.rs"]
mod tests;
