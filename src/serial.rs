// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! SOA serial arithmetic and diff analysis.
//!
//! Serials are compared per RFC 1982 and bumped with the unix-time
//! method: the new serial is the current unix time unless the old serial
//! is already at or past it, in which case it increments by one
//! (skipping zero). [`analyze`] inspects a strictly minimal diff and
//! reports whether anything besides the SOA serial changed, which drives
//! the bump/write-back decision.

use crate::db::{Diff, DiffOp};
use crate::errors::{SyncError, SyncResult};
use crate::records::{soa_serial, with_soa_serial};
use hickory_proto::rr::{RData, RecordType};

/// RFC 1982: is `a` greater than `b` in serial-number arithmetic?
#[must_use]
pub fn serial_gt(a: u32, b: u32) -> bool {
    if a == b {
        return false;
    }
    let half = 1u32 << 31;
    (a > b && a - b < half) || (a < b && b - a > half)
}

/// RFC 1982: is `a` less than or equal to `b`?
#[must_use]
pub fn serial_le(a: u32, b: u32) -> bool {
    a == b || serial_gt(b, a)
}

/// Compute the next serial with the unix-time method.
///
/// `now` is the current unix time truncated to 32 bits. Zero is never
/// produced; some resolvers treat it specially.
#[must_use]
pub fn next_serial_unixtime(current: u32, now: u32) -> u32 {
    if serial_gt(now, current) {
        now
    } else {
        let bumped = current.wrapping_add(1);
        if bumped == 0 {
            1
        } else {
            bumped
        }
    }
}

/// Current unix time truncated to 32 bits for serial bumps.
#[must_use]
pub fn unix_time_serial() -> u32 {
    // Truncation is the defined wrap-around of the unixtime method.
    chrono::Utc::now().timestamp() as u32
}

/// Result of analyzing a strictly minimal diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffAnalysis {
    /// True when any data other than the SOA serial changed
    pub data_changed: bool,
    /// Index of the last added SOA tuple, if the diff contains one
    pub latest_soa_add: Option<usize>,
}

/// Analyze a minimal diff for SOA handling.
///
/// Preconditions on the diff: it is strictly minimal, and every SOA
/// deletion is followed by exactly one SOA addition (the pairs are
/// self-contained). A violated precondition is a bug in diff
/// construction and yields `InvariantViolation`, which callers treat as
/// fatal.
pub fn analyze(diff: &Diff) -> SyncResult<DiffAnalysis> {
    let mut data_changed = false;
    let mut latest_soa_add = None;
    let mut pending_del_soa: Option<&RData> = None;

    for (idx, tuple) in diff.tuples().iter().enumerate() {
        if tuple.rrtype() != RecordType::SOA {
            data_changed = true;
            continue;
        }
        match tuple.op {
            DiffOp::Del => {
                if pending_del_soa.is_some() {
                    return Err(SyncError::InvariantViolation(
                        "two SOA deletions without an addition in between".to_string(),
                    ));
                }
                pending_del_soa = Some(&tuple.rdata);
            }
            DiffOp::Add => {
                latest_soa_add = Some(idx);
                match pending_del_soa.take() {
                    None => {
                        // SOA added without a preceding delete: a fresh
                        // zone is being initialized.
                        data_changed = true;
                    }
                    Some(deleted) => {
                        if !data_changed {
                            // Detect changes in SOA fields other than
                            // the serial.
                            let deleted_serial = soa_serial(deleted).ok_or_else(|| {
                                SyncError::InvariantViolation(
                                    "SOA tuple without SOA rdata".to_string(),
                                )
                            })?;
                            let normalized = with_soa_serial(&tuple.rdata, deleted_serial);
                            data_changed = normalized != *deleted;
                        }
                    }
                }
            }
        }
    }

    if pending_del_soa.is_some() {
        return Err(SyncError::InvariantViolation(
            "SOA deletion without a matching addition".to_string(),
        ));
    }

    Ok(DiffAnalysis {
        data_changed,
        latest_soa_add,
    })
}

#[cfg(test)]
#[path = "serial_tests.rs"]
mod serial_tests;
