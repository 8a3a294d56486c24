// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The change applier: record entry events into database transactions.
//!
//! For every add/modify/delete of a record entry the applier opens a new
//! version on the zone's in-memory database, computes the minimal diff
//! between the stored state and the entry's desired state, appends the
//! transaction to the zone journal, commits, and bumps the SOA serial
//! with a write-back to LDAP.
//!
//! Journal writes and serial bumps only happen once the initial refresh
//! barrier has fired; during the bulk load the database is filled
//! silently and the serials stored in LDAP stay authoritative.
//!
//! All calls for one zone run on that zone's task, so exactly one
//! version is ever open per zone.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::barrier::SyncState;
use crate::db::{DbStatus, Diff, DiffOp, DiffTuple};
use crate::dn::dn_to_name;
use crate::entry::Entry;
use crate::errors::{SyncError, SyncResult};
use crate::instance::Engine;
use crate::journal::Journal;
use crate::ldap::SyncPhase;
use crate::records::{parse_rrentry, soa_serial, with_soa_serial, RrSetList};
use crate::serial::{next_serial_unixtime, unix_time_serial};
use crate::writer;

/// Apply one record-entry event to its zone database.
///
/// The change is retried once after a zone reload when the database was
/// flagged as not loaded; every other failure rolls the open version
/// back and leaves LDAP untouched, to be replayed by the next syncrepl
/// cycle.
pub(crate) async fn update_record(
    engine: &Arc<Engine>,
    entry: &Entry,
    phase: SyncPhase,
) -> SyncResult<()> {
    let names = dn_to_name(entry.dn())?;
    let zone = engine.registry.exact(&names.zone).ok_or_else(|| {
        SyncError::NotFound(format!(
            "record '{}' belongs to unmanaged zone '{}'",
            entry.dn(),
            names.zone
        ))
    })?;
    let fake_mname = engine.local_settings.get_str("fake_mname")?;

    let mut reloaded = false;
    loop {
        let sync_finished = engine.sctx.state() == SyncState::Finished;
        let mut version = zone.db.new_version();

        // Desired state: what the entry defines; empty on delete.
        let desired = if phase == SyncPhase::Delete {
            debug!(dn = %entry.dn(), "removing name from zone database");
            RrSetList::new()
        } else {
            parse_rrentry(entry, &names.zone, &fake_mname).inspect_err(|err| {
                error!(dn = %entry.dn(), error = %err, "failed to parse RR entry");
            })?
        };

        // Minimal diff: delete everything stored, add everything
        // desired; identical tuples cancel out.
        let mut diff = Diff::new();
        for rrset in version.node_rrsets(&names.name) {
            diff.delete_rrset(&names.name, &rrset);
        }
        for rrset in desired.iter() {
            diff.add_rrset(&names.name, rrset);
        }

        let mut writeback = None;
        if !diff.is_empty() {
            // Record entries never touch the apex, but validate the
            // SOA pairing invariants regardless.
            crate::serial::analyze(&diff)?;

            if sync_finished {
                // Any post-refresh data change bumps the zone serial.
                let soa = zone.db.soa_rrset().ok_or_else(|| {
                    SyncError::NotFound(format!("zone '{}' has no SOA", zone.name))
                })?;
                let old_rdata = soa.rdatas.first().cloned().ok_or_else(|| {
                    SyncError::NotFound(format!("zone '{}' has an empty SOA RRset", zone.name))
                })?;
                let current = soa_serial(&old_rdata).unwrap_or(0);
                let serial = next_serial_unixtime(current, unix_time_serial());
                diff.append(DiffTuple {
                    op: DiffOp::Del,
                    name: zone.name.clone(),
                    ttl: soa.ttl,
                    rdata: old_rdata.clone(),
                });
                diff.append(DiffTuple {
                    op: DiffOp::Add,
                    name: zone.name.clone(),
                    ttl: soa.ttl,
                    rdata: with_soa_serial(&old_rdata, serial),
                });
                writeback = Some(serial);

                // Write the transaction to the journal before commit.
                let path = engine.registry.journal_path(&zone.name)?;
                Journal::open(&path)?.write_transaction(&diff)?;
            }

            version.apply(&diff)?;
            version.commit()?;
        }

        if let Some(serial) = writeback {
            // The database is authoritative in memory; a failed
            // write-back self-heals on the next syncrepl cycle.
            if let Err(err) =
                writer::replace_serial(&engine.pool, &engine.registry, &zone.name, serial).await
            {
                error!(zone = %zone.name, serial, error = %err,
                       "serial write back to LDAP failed");
            }
        }

        // A database that is not loaded (or went bad) gets one reload,
        // then the change is applied again from the top.
        if sync_finished && zone.db.status() != DbStatus::Loaded {
            if reloaded {
                error!(zone = %zone.name, "zone is still not loaded after reload");
                return Err(SyncError::Failure(format!(
                    "zone '{}' could not be reloaded",
                    zone.name
                )));
            }
            warn!(zone = %zone.name, dn = %entry.dn(),
                  "reloading invalid zone after a change");
            engine.host.load_zone(&zone.name).await.inspect_err(|err| {
                error!(zone = %zone.name, error = %err, "unable to reload invalid zone");
            })?;
            zone.db.set_status(DbStatus::Loaded);
            reloaded = true;
            continue;
        }

        return Ok(());
    }
}
