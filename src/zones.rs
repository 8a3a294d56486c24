// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Zone and configuration entry handlers.
//!
//! Translates `idnsConfigObject`, `idnsZone` and `idnsForwardZone`
//! entry events into engine state: zone creation and teardown on the
//! host view, per-zone settings, access control, forwarding, and the
//! apex data transaction with its SOA serial policy.
//!
//! Forwarding has top priority: a master-zone entry whose forwarders
//! configure successfully is served as a forward zone and the master
//! zone is deleted.

use std::sync::Arc;

use hickory_proto::rr::Name;
use tracing::{debug, error, info};

use crate::barrier::SyncState;
use crate::constants::ATTR_ZONE_ACTIVE;
use crate::db::{DbStatus, Diff};
use crate::dn::dn_to_name;
use crate::entry::Entry;
use crate::errors::{SyncError, SyncResult};
use crate::fwd::configure_forwarders;
use crate::instance::Engine;
use crate::journal::Journal;
use crate::ldap::SyncPhase;
use crate::records::{parse_rrentry, soa_serial, with_soa_serial};
use crate::registry::ZoneInfo;
use crate::serial::{analyze, next_serial_unixtime, serial_le, unix_time_serial};
use crate::settings::{SettingUpdate, Value};
use crate::writer;

/// Handle a master or forward zone entry event.
///
/// A deleted entry or `idnsZoneActive: FALSE` tears the zone down;
/// everything else configures it.
pub(crate) async fn update_zone(
    engine: &Arc<Engine>,
    entry: &Entry,
    phase: SyncPhase,
) -> SyncResult<()> {
    let names = dn_to_name(entry.dn())?;

    let zone_active =
        phase != SyncPhase::Delete && entry.bool_value(ATTR_ZONE_ACTIVE) == Some(true);
    if !zone_active {
        return delete_zone(engine, &names.name, false).await;
    }

    if entry.class().master {
        parse_master_zoneentry(engine, entry, &names.name).await
    } else if entry.class().forward {
        parse_fwd_zoneentry(engine, entry, &names.name).await
    } else {
        Err(SyncError::NotImplemented(format!(
            "zone entry '{}' has no supported objectClass",
            entry.dn()
        )))
    }
}

/// Handle the root configuration entry.
///
/// Configuration errors are logged but never fatal; a broken global
/// entry must not take the instance down.
pub(crate) async fn update_config(engine: &Arc<Engine>, entry: &Entry) -> SyncResult<()> {
    debug!(dn = %entry.dn(), "parsing configuration object");

    match configure_forwarders(engine.host.as_ref(), entry, &Name::root()).await {
        Ok(()) | Err(SyncError::Disabled(_)) => {}
        Err(err) => {
            error!(error = %err, "global forwarder could not be set up");
        }
    }

    for (option, attr) in [
        ("dyn_update", "idnsAllowDynUpdate"),
        ("sync_ptr", "idnsAllowSyncPTR"),
    ] {
        if let Err(err) = engine.global_settings.update_from_entry(option, attr, entry) {
            error!(option, error = %err, "invalid global configuration value, ignoring");
        }
    }

    Ok(())
}

/// Handle a forward-zone entry.
async fn parse_fwd_zoneentry(engine: &Arc<Engine>, entry: &Entry, name: &Name) -> SyncResult<()> {
    match configure_forwarders(engine.host.as_ref(), entry, name).await {
        Ok(()) | Err(SyncError::Disabled(_)) => {}
        Err(err) => {
            error!(zone = %name, error = %err, "could not configure forwarding");
            return Err(err);
        }
    }

    if !engine.fwd_register.contains(name) {
        engine.fwd_register.add(name);
        info!(zone = %name, "forward zone loaded");
    }
    Ok(())
}

/// Handle a master-zone entry.
async fn parse_master_zoneentry(
    engine: &Arc<Engine>,
    entry: &Entry,
    name: &Name,
) -> SyncResult<()> {
    // Forwarding has top priority: when forwarders are set up, the
    // master zone is converted to a forward zone and nothing else of
    // the entry applies.
    match configure_forwarders(engine.host.as_ref(), entry, name).await {
        Ok(()) => {
            debug!(zone = %name, "forwarding enabled, removing master zone");
            return delete_zone(engine, name, true).await;
        }
        Err(SyncError::Disabled(_)) => {} // no forwarders; serve as master
        Err(err) => return Err(err),
    }

    let (zone, new_zone) = match engine.registry.exact(name) {
        Some(info) => (info, false),
        None => {
            engine.host.create_zone(name).await?;
            let info = engine.registry.add(name, entry.dn())?;
            engine.spawn_zone_task(name);
            debug!(zone = %name, dn = %entry.dn(), "created zone");
            (info, true)
        }
    };

    let result = configure_master_zone(engine, entry, name, &zone, new_zone).await;
    if result.is_err() && new_zone {
        // A fresh zone that could not be configured (ACL parsing or
        // data errors) is rolled back so it cannot be served empty.
        error!(zone = %name, dn = %entry.dn(), "publishing failed, rolling back");
        if let Err(rollback_err) = delete_zone(engine, name, false).await {
            error!(zone = %name, error = %rollback_err, "zone rollback failed");
        }
    }
    result
}

/// Apply settings, ACLs and the apex data transaction of a master zone.
async fn configure_master_zone(
    engine: &Arc<Engine>,
    entry: &Entry,
    name: &Name,
    zone: &Arc<ZoneInfo>,
    new_zone: bool,
) -> SyncResult<()> {
    let settings = &zone.settings;

    let ssu_changed =
        settings.update_from_entry("dyn_update", "idnsAllowDynUpdate", entry)?
            == SettingUpdate::Updated;
    settings.update_from_entry("sync_ptr", "idnsAllowSyncPTR", entry)?;
    let policy_changed =
        settings.update_from_entry("update_policy", "idnsUpdatePolicy", entry)?
            == SettingUpdate::Updated;

    if ssu_changed || policy_changed {
        debug!(zone = %name, "setting the update policy");
        let policy = if settings.get_bool("dyn_update")? {
            settings.get_str("update_policy").unwrap_or_default()
        } else {
            // An empty policy blocks updates before they reach the
            // database driver.
            String::new()
        };
        engine.host.set_update_policy(name, &policy).await?;
    }

    // Fetch allow-query and allow-transfer ACLs into the zone's
    // settings layer; an absent attribute clears the stored ACL.
    for (option, attr) in [
        ("allow_query", "idnsAllowQuery"),
        ("allow_transfer", "idnsAllowTransfer"),
    ] {
        if settings.update_from_entry(option, attr, entry)? == SettingUpdate::Ignored {
            debug!(zone = %name, option, "ACL not set");
            settings.set(option, Value::Str(String::new()))?;
        }
    }
    let allow_query = settings.get_str("allow_query")?;
    let allow_transfer = settings.get_str("allow_transfer")?;
    engine
        .host
        .set_zone_acls(
            name,
            (!allow_query.is_empty()).then_some(allow_query.as_str()),
            (!allow_transfer.is_empty()).then_some(allow_transfer.as_str()),
        )
        .await?;

    let sync_finished = engine.sctx.state() == SyncState::Finished;
    if new_zone && sync_finished {
        engine.host.publish_zone(name).await?;
    }

    // Synchronize the zone apex with the entry's data.
    let fake_mname = engine.local_settings.get_str("fake_mname")?;
    let rdatalist = parse_rrentry(entry, name, &fake_mname).inspect_err(|err| {
        error!(dn = %entry.dn(), error = %err, "failed to parse RR entry");
    })?;
    let current_serial = zone.db.soa_serial();

    let mut version = zone.db.new_version();
    let mut diff = Diff::new();
    for rrset in version.node_rrsets(name) {
        diff.delete_rrset(name, &rrset);
    }
    for rrset in rdatalist.iter() {
        diff.add_rrset(name, rrset);
    }

    // Detect whether the SOA serial is affected by the update. The
    // serial is always bumped during re-synchronization.
    let analysis = analyze(&diff)?;
    let mut writeback = None;

    if analysis.data_changed || !sync_finished {
        match analysis.latest_soa_add {
            None => {
                // The diff carries no new SOA: synthesize a fresh
                // delete/add pair around a bumped serial.
                let soa = zone.db.soa_rrset().ok_or_else(|| {
                    SyncError::NotFound(format!("zone '{name}' has no SOA"))
                })?;
                let old_rdata = soa.rdatas.first().cloned().ok_or_else(|| {
                    SyncError::NotFound(format!("zone '{name}' has an empty SOA RRset"))
                })?;
                let serial = next_serial_unixtime(
                    soa_serial(&old_rdata).unwrap_or(0),
                    unix_time_serial(),
                );
                diff.append(crate::db::DiffTuple {
                    op: crate::db::DiffOp::Del,
                    name: name.clone(),
                    ttl: soa.ttl,
                    rdata: old_rdata.clone(),
                });
                diff.append(crate::db::DiffTuple {
                    op: crate::db::DiffOp::Add,
                    name: name.clone(),
                    ttl: soa.ttl,
                    rdata: with_soa_serial(&old_rdata, serial),
                });
                writeback = Some(serial);
            }
            Some(idx) => {
                let added = soa_serial(&diff.tuples()[idx].rdata).ok_or_else(|| {
                    SyncError::InvariantViolation("SOA tuple without SOA rdata".to_string())
                })?;
                let stale =
                    current_serial.is_some_and(|current| serial_le(added, current));
                if stale {
                    // The entry tries to send the serial backwards:
                    // force a new one and write it back.
                    let serial = next_serial_unixtime(added, unix_time_serial());
                    let tuple = &mut diff.tuples_mut()[idx];
                    tuple.rdata = with_soa_serial(&tuple.rdata, serial);
                    writeback = Some(serial);
                }
                // Otherwise the diff contains the new serial already.
            }
        }
    } else if let Some(idx) = analysis.latest_soa_add {
        let added = soa_serial(&diff.tuples()[idx].rdata).ok_or_else(|| {
            SyncError::InvariantViolation("SOA tuple without SOA rdata".to_string())
        })?;
        if current_serial.is_some_and(|current| serial_le(added, current)) {
            // No data change and the serial would move backwards: the
            // whole diff is discarded so a remote peer cannot rewind
            // the zone.
            debug!(zone = %name, added, "ignoring attempt to move the serial backwards");
            diff.clear();
        }
    }

    if !diff.is_empty() {
        if sync_finished && !new_zone {
            let path = engine.registry.journal_path(name)?;
            Journal::open(&path)?.write_transaction(&diff)?;
        }
        version.apply(&diff)?;
        version.commit()?;
    }

    if let Some(serial) = writeback {
        if let Err(err) =
            writer::replace_serial(&engine.pool, &engine.registry, name, serial).await
        {
            error!(zone = %name, serial, error = %err, "serial write back to LDAP failed");
        }
    }

    // Zone loads only happen once the initial synchronization is done.
    if sync_finished && analysis.data_changed {
        engine.host.load_zone(name).await?;
        zone.db.set_status(DbStatus::Loaded);
    }

    Ok(())
}

/// Tear a zone down: forwarding, host view, registry, task and files.
pub(crate) async fn delete_zone(
    engine: &Arc<Engine>,
    name: &Name,
    preserve_forwarding: bool,
) -> SyncResult<()> {
    debug!(zone = %name, "deleting zone");

    if !preserve_forwarding {
        engine.host.delete_forwarders(name).await?;
        if engine.fwd_register.contains(name) {
            engine.fwd_register.remove(name);
            info!(zone = %name, "forward zone shutting down");
        }
    }

    let Some(_info) = engine.registry.exact(name) else {
        debug!(zone = %name, "zone not found in zone register");
        engine.host.flush_cache().await?;
        return Ok(());
    };

    engine.host.delete_zone(name).await?;
    engine.registry.remove_zone_files(name)?;
    engine.registry.delete(name);
    engine.remove_zone_task(name);
    info!(zone = %name, "zone deleted");
    Ok(())
}
