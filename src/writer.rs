// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Writing DNS data back to LDAP.
//!
//! Converts RRsets to LDAP modifications and issues them with the
//! engine's retry semantics:
//! - a modify that adds values to a missing entry falls back to adding
//!   the entry (with `objectClass: idnsRecord`) instead,
//! - deleting a missing attribute is success (idempotent delete),
//! - any other failure triggers one reconnect-and-retry.
//!
//! The SOA is special-cased: serial bumps replace only `idnsSOAserial`,
//! while dynamic SOA updates replace all five numeric fields in one
//! atomic modify.

use hickory_proto::rr::{Name, RData, RecordType};
use tracing::{debug, error, warn};

use crate::constants::{ATTR_DNS_TTL, ATTR_SOA_SERIAL, OBJECTCLASS_RECORD};
use crate::dn::rrtype_to_attribute;
use crate::errors::{SyncError, SyncResult};
use crate::ldap::{LdapError, Mod, ModOp, ResultCode};
use crate::pool::LdapPool;
use crate::records::{rdata_to_text, RrSet};
use crate::registry::ZoneRegistry;

/// One modification carrying every rdata of an RRset.
#[must_use]
pub fn rrset_to_mod(rrset: &RrSet, op: ModOp) -> Mod {
    Mod::new(
        op,
        rrtype_to_attribute(rrset.rrtype),
        rrset.rdatas.iter().map(rdata_to_text).collect(),
    )
}

/// TTL replacement attached to every value addition.
#[must_use]
pub fn ttl_mod(rrset: &RrSet) -> Mod {
    Mod::new(ModOp::Replace, ATTR_DNS_TTL, vec![rrset.ttl.to_string()])
}

/// Issue a modify (or, with `delete_node`, a delete) against `dn` with
/// the engine's fallback and retry semantics.
pub async fn modify(
    pool: &LdapPool,
    dn: &str,
    mods: &[Mod],
    delete_node: bool,
) -> SyncResult<()> {
    if !delete_node && mods.is_empty() {
        return Err(SyncError::InvariantViolation(
            "modify without modifications".to_string(),
        ));
    }
    let first_op = mods.first().map(|m| m.op);

    let mut guard = pool.get_connection().await?;
    pool.connector().ensure_bound(&mut guard).await?;

    let mut retried = false;
    loop {
        let result = if delete_node {
            debug!(dn, "deleting whole node");
            guard.handle_mut()?.delete_ext(dn).await
        } else {
            debug!(dn, op = ?first_op, "writing to LDAP");
            guard.handle_mut()?.modify_ext(dn, mods).await
        };

        let err = match result {
            Ok(()) => {
                guard.tries = 0;
                return Ok(());
            }
            Err(err) => err,
        };

        // If there is no entry yet, create it with an add operation.
        if !delete_node
            && first_op == Some(ModOp::Add)
            && err.code == ResultCode::NoSuchObject
        {
            let mut add_mods: Vec<Mod> = mods.to_vec();
            add_mods.push(Mod::new(
                ModOp::Add,
                "objectClass",
                vec![OBJECTCLASS_RECORD.to_string()],
            ));
            match guard.handle_mut()?.add_ext(dn, &add_mods).await {
                Ok(()) => {
                    guard.tries = 0;
                    return Ok(());
                }
                Err(add_err) => {
                    return Err(operation_failed(dn, "adding", &add_err));
                }
            }
        }

        // Do not error out when deleting a value that is already gone.
        if !delete_node
            && first_op == Some(ModOp::Delete)
            && err.code == ResultCode::NoSuchAttribute
        {
            debug!(dn, "attribute already absent, delete is a no-op");
            guard.tries = 0;
            return Ok(());
        }

        if !retried {
            retried = true;
            warn!(dn, error = %err, "retrying LDAP operation after reconnect");
            pool.connector()
                .handle_error(&mut guard, Some(err.code), false)
                .await?;
            continue;
        }
        return Err(operation_failed(dn, "modifying", &err));
    }
}

fn operation_failed(dn: &str, operation: &str, err: &LdapError) -> SyncError {
    error!(dn, operation, error = %err, "LDAP write failed");
    SyncError::Failure(format!("while {operation} entry '{dn}': {err}"))
}

/// Replace all five numeric SOA fields atomically in one modify call.
pub async fn modify_soa_record(pool: &LdapPool, zone_dn: &str, rdata: &RData) -> SyncResult<()> {
    let RData::SOA(soa) = rdata else {
        return Err(SyncError::InvariantViolation(
            "modify_soa_record called without SOA rdata".to_string(),
        ));
    };
    let mods = vec![
        Mod::new(ModOp::Replace, "idnsSOAserial", vec![soa.serial().to_string()]),
        Mod::new(ModOp::Replace, "idnsSOArefresh", vec![soa.refresh().to_string()]),
        Mod::new(ModOp::Replace, "idnsSOAretry", vec![soa.retry().to_string()]),
        Mod::new(ModOp::Replace, "idnsSOAexpire", vec![soa.expire().to_string()]),
        Mod::new(ModOp::Replace, "idnsSOAminimum", vec![soa.minimum().to_string()]),
    ];
    modify(pool, zone_dn, &mods, false).await
}

/// Write a new SOA serial for `zone` back to its LDAP entry.
pub async fn replace_serial(
    pool: &LdapPool,
    registry: &ZoneRegistry,
    zone: &Name,
    serial: u32,
) -> SyncResult<()> {
    let dn = registry.dn_for_name(zone)?;
    let mods = vec![Mod::new(
        ModOp::Replace,
        ATTR_SOA_SERIAL,
        vec![serial.to_string()],
    )];
    debug!(zone = %zone, serial, "writing new zone serial to LDAP");
    let result = modify(pool, &dn, &mods, false).await;
    crate::metrics::record_soa_writeback(result.is_ok());
    result
}

/// Common path of the dynamic-update write operations.
///
/// Resolves the owner's zone, refuses updates for unmanaged zones,
/// special-cases the SOA and mirrors PTR records for A/AAAA data when
/// the zone has `sync_ptr` enabled. A PTR synchronization failure fails
/// the whole operation so the client sees one consistent error.
pub async fn modify_common(
    pool: &LdapPool,
    registry: &ZoneRegistry,
    owner: &Name,
    rrset: &RrSet,
    op: ModOp,
    delete_node: bool,
) -> SyncResult<()> {
    debug_assert!(op == ModOp::Add || op == ModOp::Delete);

    let zone = registry.containing(owner).ok_or_else(|| {
        debug!(owner = %owner, "update refused: active zone not found");
        SyncError::NoPerm(format!("no active zone for '{owner}'"))
    })?;
    let owner_dn = registry.dn_for_name(owner)?;

    if rrset.rrtype == RecordType::SOA {
        if op == ModOp::Delete {
            // The SOA is never deleted from LDAP; the zone entry owns it.
            return Ok(());
        }
        let rdata = rrset.rdatas.first().ok_or_else(|| {
            SyncError::InvariantViolation("SOA update without rdata".to_string())
        })?;
        return modify_soa_record(pool, &owner_dn, rdata).await;
    }

    let mut mods = vec![rrset_to_mod(rrset, op)];
    if op == ModOp::Add {
        // For now always replace the TTL on add.
        mods.push(ttl_mod(rrset));
    }
    modify(pool, &owner_dn, &mods, delete_node).await?;

    // Keep the PTR of corresponding A/AAAA records synchronized.
    if rrset.rrtype == RecordType::A || rrset.rrtype == RecordType::AAAA {
        if !zone.settings.get_bool("sync_ptr")? {
            debug!(zone = %zone.name, "PTR record synchronization is disabled for zone");
            return Ok(());
        }
        for rdata in &rrset.rdatas {
            let ip = match rdata {
                RData::A(a) => std::net::IpAddr::V4(a.0),
                RData::AAAA(aaaa) => std::net::IpAddr::V6(aaaa.0),
                _ => continue,
            };
            crate::syncptr::sync_ptr(pool, registry, owner, ip, op).await?;
        }
    }

    Ok(())
}

/// Add the RRset's values at `owner` (dynamic update path).
pub async fn write_records(
    pool: &LdapPool,
    registry: &ZoneRegistry,
    owner: &Name,
    rrset: &RrSet,
) -> SyncResult<()> {
    modify_common(pool, registry, owner, rrset, ModOp::Add, false).await
}

/// Remove the RRset's values at `owner`; with `delete_node` the whole
/// entry is deleted.
pub async fn remove_records(
    pool: &LdapPool,
    registry: &ZoneRegistry,
    owner: &Name,
    rrset: &RrSet,
    delete_node: bool,
) -> SyncResult<()> {
    modify_common(pool, registry, owner, rrset, ModOp::Delete, delete_node).await
}

/// Remove every value of one attribute at `owner`.
pub async fn remove_attr(
    pool: &LdapPool,
    registry: &ZoneRegistry,
    owner: &Name,
    attr: &str,
) -> SyncResult<()> {
    let dn = registry.dn_for_name(owner)?;
    let mods = vec![Mod::new(ModOp::Delete, attr, Vec::new())];
    modify(pool, &dn, &mods, false).await
}

/// Delete the whole entry at `owner`.
pub async fn remove_entry(
    pool: &LdapPool,
    registry: &ZoneRegistry,
    owner: &Name,
) -> SyncResult<()> {
    let dn = registry.dn_for_name(owner)?;
    modify(pool, &dn, &[], true).await
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod writer_tests;
