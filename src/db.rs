// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory versioned zone database and minimal diffs.
//!
//! Each registered zone owns one [`ZoneDb`]: the authoritative in-memory
//! copy of the zone's RRsets, updated exclusively through versioned
//! transactions. A [`Version`] stages changes against a snapshot;
//! dropping it without [`Version::commit`] rolls the transaction back.
//!
//! [`Diff`] is the transaction format: an ordered list of delete/add
//! tuples. [`Diff::append_minimal`] keeps diffs strictly minimal by
//! cancelling a tuple against an earlier opposite tuple for the same
//! data instead of storing both.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use hickory_proto::rr::{Name, RData, RecordType};

use crate::errors::{SyncError, SyncResult};
use crate::records::{soa_serial, RrSet};

/// Operation of a diff tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Del,
    Add,
}

/// One record-level change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffTuple {
    pub op: DiffOp,
    pub name: Name,
    pub ttl: u32,
    pub rdata: RData,
}

impl DiffTuple {
    /// Record type of the tuple's rdata.
    #[must_use]
    pub fn rrtype(&self) -> RecordType {
        self.rdata.record_type()
    }

    fn same_data(&self, other: &Self) -> bool {
        self.name == other.name && self.ttl == other.ttl && self.rdata == other.rdata
    }
}

/// An ordered list of record-level changes forming one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    tuples: Vec<DiffTuple>,
}

impl Diff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    #[must_use]
    pub fn tuples(&self) -> &[DiffTuple] {
        &self.tuples
    }

    /// Mutable tuple access for in-place SOA serial rewrites.
    #[must_use]
    pub fn tuples_mut(&mut self) -> &mut [DiffTuple] {
        &mut self.tuples
    }

    pub fn clear(&mut self) {
        self.tuples.clear();
    }

    /// Append a tuple without minimization. Used where tuple order is
    /// fixed by construction, e.g. synthesized SOA delete/add pairs.
    pub fn append(&mut self, tuple: DiffTuple) {
        self.tuples.push(tuple);
    }

    /// Append a tuple, keeping the diff strictly minimal: an existing
    /// tuple with the opposite operation and identical
    /// (name, ttl, rdata) annihilates with the new one.
    pub fn append_minimal(&mut self, tuple: DiffTuple) {
        let opposite = match tuple.op {
            DiffOp::Del => DiffOp::Add,
            DiffOp::Add => DiffOp::Del,
        };
        if let Some(idx) = self
            .tuples
            .iter()
            .position(|existing| existing.op == opposite && existing.same_data(&tuple))
        {
            self.tuples.remove(idx);
            return;
        }
        self.tuples.push(tuple);
    }

    /// Append one delete tuple per rdata of an RRset at `name`.
    pub fn delete_rrset(&mut self, name: &Name, rrset: &RrSet) {
        for rdata in &rrset.rdatas {
            self.append_minimal(DiffTuple {
                op: DiffOp::Del,
                name: name.clone(),
                ttl: rrset.ttl,
                rdata: rdata.clone(),
            });
        }
    }

    /// Append one add tuple per rdata of an RRset at `name`.
    pub fn add_rrset(&mut self, name: &Name, rrset: &RrSet) {
        for rdata in &rrset.rdatas {
            self.append_minimal(DiffTuple {
                op: DiffOp::Add,
                name: name.clone(),
                ttl: rrset.ttl,
                rdata: rdata.clone(),
            });
        }
    }
}

/// Key of one RRset: owner name plus record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrKey {
    pub name: Name,
    pub rrtype: RecordType,
}

impl Ord for RrKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| u16::from(self.rrtype).cmp(&u16::from(other.rrtype)))
    }
}

impl PartialOrd for RrKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Load state of a zone database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbStatus {
    /// Created but not yet loaded by the host server
    NotLoaded,
    /// Serving
    Loaded,
    /// Load failed; the server answers SERVFAIL until reloaded
    Bad,
}

/// The in-memory database of one zone.
#[derive(Debug)]
pub struct ZoneDb {
    origin: Name,
    data: RwLock<BTreeMap<RrKey, RrSet>>,
    status: RwLock<DbStatus>,
}

impl ZoneDb {
    /// Empty database for a zone.
    #[must_use]
    pub fn new(origin: Name) -> Arc<Self> {
        Arc::new(Self {
            origin,
            data: RwLock::new(BTreeMap::new()),
            status: RwLock::new(DbStatus::NotLoaded),
        })
    }

    /// Zone apex name.
    #[must_use]
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// Current load state.
    #[must_use]
    pub fn status(&self) -> DbStatus {
        *self.status.read().expect("db status lock")
    }

    pub fn set_status(&self, status: DbStatus) {
        *self.status.write().expect("db status lock") = status;
    }

    /// Committed RRsets at `name`.
    #[must_use]
    pub fn node_rrsets(&self, name: &Name) -> Vec<RrSet> {
        self.data
            .read()
            .expect("db data lock")
            .iter()
            .filter(|(key, _)| key.name == *name)
            .map(|(_, rrset)| rrset.clone())
            .collect()
    }

    /// Committed SOA serial at the apex, if the zone has an SOA.
    #[must_use]
    pub fn soa_serial(&self) -> Option<u32> {
        let data = self.data.read().expect("db data lock");
        let key = RrKey {
            name: self.origin.clone(),
            rrtype: RecordType::SOA,
        };
        data.get(&key)
            .and_then(|rrset| rrset.rdatas.first())
            .and_then(soa_serial)
    }

    /// Committed SOA rdata and TTL at the apex.
    #[must_use]
    pub fn soa_rrset(&self) -> Option<RrSet> {
        let data = self.data.read().expect("db data lock");
        let key = RrKey {
            name: self.origin.clone(),
            rrtype: RecordType::SOA,
        };
        data.get(&key).cloned()
    }

    /// Total number of stored RRsets. Used by tests and diagnostics.
    #[must_use]
    pub fn rrset_count(&self) -> usize {
        self.data.read().expect("db data lock").len()
    }

    /// Open a new writable version on top of the current contents.
    ///
    /// Exactly one version is open per transaction; per-zone tasks
    /// serialize the transactions of one zone.
    #[must_use]
    pub fn new_version(self: &Arc<Self>) -> Version {
        Version {
            db: Arc::clone(self),
            staged: self.data.read().expect("db data lock").clone(),
            applied: Diff::new(),
            committed: false,
        }
    }
}

/// Apply a diff to an RRset map, validating every tuple.
fn apply_to(map: &mut BTreeMap<RrKey, RrSet>, diff: &Diff) -> SyncResult<()> {
    for tuple in diff.tuples() {
        let key = RrKey {
            name: tuple.name.clone(),
            rrtype: tuple.rrtype(),
        };
        match tuple.op {
            DiffOp::Del => {
                let rrset = map.get_mut(&key).ok_or_else(|| {
                    SyncError::NotFound(format!(
                        "no {} RRset at '{}' to delete from",
                        key.rrtype, key.name
                    ))
                })?;
                let idx = rrset.rdatas.iter().position(|rdata| *rdata == tuple.rdata);
                match idx {
                    Some(idx) => {
                        rrset.rdatas.remove(idx);
                    }
                    None => {
                        return Err(SyncError::NotFound(format!(
                            "rdata to delete not present at '{}'",
                            key.name
                        )))
                    }
                }
                if rrset.rdatas.is_empty() {
                    map.remove(&key);
                }
            }
            DiffOp::Add => {
                let rrset = map
                    .entry(key.clone())
                    .or_insert_with(|| RrSet::new(key.rrtype, tuple.ttl));
                if rrset.rdatas.contains(&tuple.rdata) {
                    return Err(SyncError::AlreadyExists(format!(
                        "rdata to add already present at '{}'",
                        key.name
                    )));
                }
                rrset.ttl = tuple.ttl;
                rrset.rdatas.push(tuple.rdata.clone());
            }
        }
    }
    Ok(())
}

/// A staged transaction against a [`ZoneDb`].
///
/// Dropping the version without calling [`Version::commit`] discards
/// every staged change.
#[derive(Debug)]
pub struct Version {
    db: Arc<ZoneDb>,
    staged: BTreeMap<RrKey, RrSet>,
    applied: Diff,
    committed: bool,
}

impl Version {
    /// RRsets at `name` as seen by this version.
    #[must_use]
    pub fn node_rrsets(&self, name: &Name) -> Vec<RrSet> {
        self.staged
            .iter()
            .filter(|(key, _)| key.name == *name)
            .map(|(_, rrset)| rrset.clone())
            .collect()
    }

    /// Apply a diff to the staged data.
    ///
    /// # Errors
    ///
    /// `NotFound` when deleting data that is not present and
    /// `AlreadyExists` when adding data that is; both indicate a diff
    /// that was not computed against this version.
    pub fn apply(&mut self, diff: &Diff) -> SyncResult<()> {
        apply_to(&mut self.staged, diff)?;
        for tuple in diff.tuples() {
            self.applied.append(tuple.clone());
        }
        Ok(())
    }

    /// Publish the applied diffs as the new committed state.
    ///
    /// The tuples are re-applied to the live data rather than swapping
    /// the snapshot in, so a transaction on another node of the zone
    /// that committed in the meantime is not lost.
    pub fn commit(mut self) -> SyncResult<()> {
        let mut data = self.db.data.write().expect("db data lock");
        apply_to(&mut data, &self.applied)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Version {
    fn drop(&mut self) {
        if !self.committed {
            // Rollback is implicit: the staged snapshot is discarded.
            self.staged.clear();
        }
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod db_tests;
