// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic job-name hashing for `H` schedule tokens
//!
//! `H` fields must resolve to the same value for the same job across daemon
//! restarts, while different jobs (and different fields of the same job)
//! spread across the field domain.

use sha2::{Digest, Sha256};

/// Hash a job name into a stable 64-bit value.
pub fn job_hash(job_name: &str) -> u64 {
    let digest = Sha256::digest(job_name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Map a job hash into `[lo, hi]` for the field at `field_index`.
///
/// Shifting by the field index decorrelates the fields so a job does not
/// land on the same ordinal in every domain.
pub fn fold(hash: u64, field_index: usize, lo: u32, hi: u32) -> u32 {
    debug_assert!(lo <= hi);
    let span = u64::from(hi - lo + 1);
    ((hash >> field_index) % span) as u32 + lo
}
