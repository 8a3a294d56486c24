// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! PTR record synchronization for A/AAAA changes.
//!
//! When an address record is written and the owning zone has `sync_ptr`
//! enabled, the matching PTR record in the reverse zone is mirrored:
//! added with the A/AAAA record, removed with it. The reverse zone must
//! be managed by this engine and allow dynamic updates.
//!
//! Synchronization is strict: a PTR pointing at a different owner
//! refuses the update, and names carrying more than one PTR are not
//! supported. A failure here fails the original forward-record
//! operation so the operator sees a single consistent error.

use std::net::IpAddr;

use hickory_proto::rr::{Name, RData, RecordType};
use tracing::{debug, error};

use crate::entry::Entry;
use crate::errors::{SyncError, SyncResult};
use crate::ldap::{ModOp, Scope};
use crate::pool::LdapPool;
use crate::records::{parse_rrentry, RrSetList};
use crate::registry::ZoneRegistry;
use crate::writer;

/// Reverse-mapping owner name for an IP address: `in-addr.arpa` for
/// IPv4, nibble-form `ip6.arpa` for IPv6.
#[must_use]
pub fn ptr_name_for_ip(ip: IpAddr) -> Name {
    let text = match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa.")
        }
        IpAddr::V6(v6) => {
            let mut labels = Vec::with_capacity(32);
            for byte in v6.octets().iter().rev() {
                labels.push(format!("{:x}", byte & 0x0f));
                labels.push(format!("{:x}", byte >> 4));
            }
            format!("{}.ip6.arpa.", labels.join("."))
        }
    };
    text.parse().expect("reverse name is always valid")
}

/// What the decision table told us to do.
enum PtrAction {
    /// Nothing to do (idempotent case)
    Skip,
    /// Issue the modification; `delete_node` removes the whole entry
    Proceed { delete_node: bool },
}

/// Mirror the PTR for one address of `a_name`.
///
/// `op` is the operation applied to the A/AAAA record; the same
/// operation is applied to the PTR.
pub async fn sync_ptr(
    pool: &LdapPool,
    registry: &ZoneRegistry,
    a_name: &Name,
    ip: IpAddr,
    op: ModOp,
) -> SyncResult<()> {
    debug_assert!(op == ModOp::Add || op == ModOp::Delete);

    let ptr_name = ptr_name_for_ip(ip);
    let Some(reverse_zone) = registry.containing(&ptr_name) else {
        error!(a_name = %a_name, ip = %ip,
               "PTR record synchronization refused: no active reverse zone");
        return Err(SyncError::NoPerm(format!(
            "no active reverse zone for IP address '{ip}'"
        )));
    };

    if !reverse_zone.settings.get_bool("dyn_update")? {
        error!(a_name = %a_name, ip = %ip, zone = %reverse_zone.name,
               "PTR record synchronization refused: dynamic updates are not allowed \
                for the reverse zone");
        return Err(SyncError::NoPerm(format!(
            "dynamic updates are not allowed for reverse zone '{}'",
            reverse_zone.name
        )));
    }

    let ptr_dn = registry.dn_for_name(&ptr_name)?;
    let existing = read_ptr_records(pool, &ptr_dn, &reverse_zone.name).await?;
    let action = validate(a_name, &ptr_name, &existing, op)?;

    let delete_node = match action {
        PtrAction::Skip => {
            crate::metrics::record_ptr_sync(op, "skipped");
            return Ok(());
        }
        PtrAction::Proceed { delete_node } => delete_node,
    };

    let mut value = a_name.to_string();
    if !value.ends_with('.') {
        value.push('.');
    }
    let change = crate::ldap::Mod::new(op, "PTRRecord", vec![value]);
    let result = writer::modify(pool, &ptr_dn, &[change], delete_node).await;
    crate::metrics::record_ptr_sync(op, if result.is_ok() { "ok" } else { "error" });
    result
}

/// Fetch the RRsets stored at the PTR owner's entry.
async fn read_ptr_records(
    pool: &LdapPool,
    ptr_dn: &str,
    origin: &Name,
) -> SyncResult<RrSetList> {
    let entries = pool
        .search(ptr_dn, Scope::Base, "(objectClass=idnsRecord)")
        .await?;
    let mut list = RrSetList::new();
    for raw in entries {
        let entry = Entry::parse(raw);
        let parsed = parse_rrentry(&entry, origin, "")?;
        for rrset in parsed {
            let merged = list.find_or_create(rrset.rrtype, rrset.ttl)?;
            merged.rdatas.extend(rrset.rdatas);
        }
    }
    Ok(list)
}

/// Apply the PTR decision table.
///
/// | Forward op | Existing PTRs | Matches owner? | Action              |
/// |------------|---------------|----------------|---------------------|
/// | delete     | 0             | any            | ignore              |
/// | delete     | 1             | yes            | delete PTR          |
/// | delete     | 1             | no             | `UnexpectedToken`   |
/// | delete     | >1            | any            | `NotImplemented`    |
/// | add        | 0             | any            | add PTR             |
/// | add        | 1             | yes            | ignore (idempotent) |
/// | add        | 1             | no             | `Singleton`         |
/// | add        | >1            | any            | `NotImplemented`    |
fn validate(
    a_name: &Name,
    ptr_name: &Name,
    existing: &RrSetList,
    op: ModOp,
) -> SyncResult<PtrAction> {
    let ptr_rdatas = existing
        .find(RecordType::PTR)
        .map(|rrset| rrset.rdatas.as_slice())
        .unwrap_or(&[]);

    if ptr_rdatas.len() > 1 {
        error!(ptr = %ptr_name, count = ptr_rdatas.len(),
               "multiple PTR records under one name are not supported");
        return Err(SyncError::NotImplemented(format!(
            "multiple PTR records under name '{ptr_name}' are not supported"
        )));
    }

    let current_target = ptr_rdatas.first().and_then(|rdata| match rdata {
        RData::PTR(ptr) => Some(&ptr.0),
        _ => None,
    });
    let matches_owner = current_target
        .is_some_and(|target| target.is_fqdn() && a_name.is_fqdn() && *target == *a_name);

    match (op, current_target) {
        (ModOp::Delete, None) => {
            debug!(ptr = %ptr_name, "skipped: no PTR records found");
            Ok(PtrAction::Skip)
        }
        (ModOp::Delete, Some(target)) => {
            if !matches_owner {
                error!(ptr = %ptr_name, found = %target, expected = %a_name,
                       "existing PTR record contains unexpected value");
                return Err(SyncError::UnexpectedToken(format!(
                    "PTR record '{ptr_name}' contains '{target}' ('{a_name}' expected)"
                )));
            }
            // Delete the whole node when the PTR is the only data left.
            Ok(PtrAction::Proceed {
                delete_node: existing.len() == 1,
            })
        }
        (ModOp::Add, None) => Ok(PtrAction::Proceed { delete_node: false }),
        (ModOp::Add, Some(target)) => {
            if matches_owner {
                debug!(ptr = %ptr_name, "skipped: PTR record with desired value already present");
                Ok(PtrAction::Skip)
            } else {
                error!(ptr = %ptr_name, found = %target, expected = %a_name,
                       "existing PTR record contains unexpected value");
                Err(SyncError::Singleton(format!(
                    "PTR record '{ptr_name}' contains '{target}' ('{a_name}' or no value expected)"
                )))
            }
        }
        _ => Err(SyncError::InvariantViolation(
            "PTR synchronization with unsupported operation".to_string(),
        )),
    }
}

#[cfg(test)]
#[path = "syncptr_tests.rs"]
mod syncptr_tests;
