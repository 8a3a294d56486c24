// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Forwarder configuration from LDAP entries.
//!
//! Reads `idnsForwardPolicy` and `idnsForwarders` from the root
//! configuration entry or a forward-zone entry and reconciles the host
//! server's forward table with them. The table is only touched when the
//! policy or the forwarder list actually changed; the resolver cache is
//! flushed on every change.
//!
//! Policy `none` is an extension over the server's `first`/`only`: it
//! disables forwarding for the name regardless of any forwarder lists,
//! and is reported as [`SyncError::Disabled`] so callers can distinguish
//! "configured off" from "unchanged".

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::RwLock;

use hickory_proto::rr::Name;
use tracing::{debug, error};

use crate::constants::DNS_PORT;
use crate::entry::Entry;
use crate::errors::{SyncError, SyncResult};
use crate::host::HostDns;

/// Forwarding policy for one name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForwardPolicy {
    /// Try forwarders first, fall back to recursion
    #[default]
    First,
    /// Only ask forwarders
    Only,
    /// Forwarding disabled for this name
    None,
}

impl FromStr for ForwardPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("first") {
            Ok(Self::First)
        } else if s.eq_ignore_ascii_case("only") {
            Ok(Self::Only)
        } else if s.eq_ignore_ascii_case("none") {
            Ok(Self::None)
        } else {
            Err(SyncError::UnexpectedToken(format!(
                "invalid forward policy '{s}'; valid values: first, only, none"
            )))
        }
    }
}

impl std::fmt::Display for ForwardPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Only => write!(f, "only"),
            Self::None => write!(f, "none"),
        }
    }
}

/// One forward-table entry: policy plus forwarder addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forwarders {
    pub policy: ForwardPolicy,
    pub addrs: Vec<SocketAddr>,
}

/// Register of forward zones managed by the engine.
///
/// Needed because syncrepl deletions carry only a DN: membership here is
/// what classifies the deleted entry as a forward zone.
#[derive(Debug, Default)]
pub struct ForwardRegister {
    zones: RwLock<BTreeSet<Name>>,
}

impl ForwardRegister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, name: &Name) -> bool {
        self.zones.read().expect("fwd register lock").contains(name)
    }

    pub fn add(&self, name: &Name) {
        self.zones
            .write()
            .expect("fwd register lock")
            .insert(name.clone());
    }

    pub fn remove(&self, name: &Name) {
        self.zones.write().expect("fwd register lock").remove(name);
    }

    #[must_use]
    pub fn names(&self) -> Vec<Name> {
        self.zones
            .read()
            .expect("fwd register lock")
            .iter()
            .cloned()
            .collect()
    }
}

/// Parse one forwarder value: `ip` or `ip:port` (port defaults to 53).
pub fn parse_forwarder(text: &str) -> SyncResult<SocketAddr> {
    let text = text.trim();
    if let Ok(addr) = SocketAddr::from_str(text) {
        return Ok(addr);
    }
    let ip = IpAddr::from_str(text).map_err(|_| {
        SyncError::UnexpectedToken(format!("could not parse forwarder '{text}'"))
    })?;
    Ok(SocketAddr::new(ip, DNS_PORT))
}

/// Configure forwarding for `name` from an LDAP entry.
///
/// Reads the policy and forwarder list, diffs against the host's current
/// forward table and updates it only on change, flushing the cache.
/// For the root name (the global configuration) with no forwarders
/// defined, the host's originally configured global forwarders are
/// restored.
///
/// # Errors
///
/// `Disabled` when the resulting policy is `none` (including a zone
/// entry with no forwarders at all); `UnexpectedToken` for an invalid
/// policy value or a forwarder list with no valid entry. On those
/// errors the name's forward-table entry has been removed.
pub async fn configure_forwarders(
    host: &dyn HostDns,
    entry: &Entry,
    name: &Name,
) -> SyncResult<()> {
    let dn = entry.dn();
    let is_global_config = name.is_root();
    let object = if is_global_config {
        "global configuration"
    } else {
        "zone"
    };

    let outcome = desired_forwarders(host, entry, name, is_global_config).await;
    let desired = match outcome {
        Ok(Desired::Set(desired)) => desired,
        Ok(Desired::Remove) => {
            // A zone without forwarders has no table entry at all.
            host.delete_forwarders(name).await?;
            host.flush_cache().await?;
            return Err(SyncError::Disabled(format!(
                "no forwarders defined for '{name}'"
            )));
        }
        Err(err) => {
            // Partial configuration must not linger in the table.
            let _ = host.delete_forwarders(name).await;
            let _ = host.flush_cache().await;
            return Err(err);
        }
    };

    debug!(object, dn, policy = %desired.policy, "forward policy parsed");

    let current = host.get_forwarders(name).await;
    if current.as_ref() == Some(&desired) {
        debug!(object, dn, "forwarding table unmodified");
    } else {
        host.delete_forwarders(name).await?;
        if let Err(err) = host.replace_forwarders(name, desired.clone()).await {
            error!(object, dn, error = %err, "forwarding table update failed");
            return Err(err);
        }
        debug!(object, dn, "forwarder table was updated");
        host.flush_cache().await?;
    }

    if desired.policy == ForwardPolicy::None {
        return Err(SyncError::Disabled(format!(
            "forwarding explicitly disabled for '{name}'"
        )));
    }
    Ok(())
}

/// Desired state of one forward-table entry.
enum Desired {
    /// Install or keep this entry
    Set(Forwarders),
    /// The name must have no entry
    Remove,
}

/// Compute the desired forward-table entry from the LDAP attributes.
async fn desired_forwarders(
    host: &dyn HostDns,
    entry: &Entry,
    name: &Name,
    is_global_config: bool,
) -> SyncResult<Desired> {
    let dn = entry.dn();
    let mut policy = ForwardPolicy::First;
    if let Some(value) = entry.first_value("idnsForwardPolicy") {
        policy = value.parse().inspect_err(|err| {
            error!(dn, error = %err, "invalid idnsForwardPolicy attribute");
        })?;
    }

    if policy == ForwardPolicy::None {
        // Forwarder lists are ignored when forwarding is off.
        debug!(dn, "forwarding explicitly disabled (policy 'none')");
        return Ok(Desired::Set(Forwarders {
            policy,
            addrs: Vec::new(),
        }));
    }

    let values = entry.values("idnsForwarders").unwrap_or(&[]);
    if values.is_empty() {
        if is_global_config {
            // Fall back to the forwarders from the server configuration.
            debug!(
                dn,
                "idnsForwarders attribute is not present; global forwarders from \
                 configuration file will be used"
            );
            return Ok(Desired::Set(host.original_global_forwarders()));
        }
        debug!(
            dn,
            "idnsForwarders attribute is not present; forwarding disabled for this zone"
        );
        return Ok(Desired::Remove);
    }

    let mut addrs = Vec::new();
    for value in values {
        match parse_forwarder(value) {
            Ok(addr) => {
                debug!(dn, forwarder = %addr, "adding forwarder");
                addrs.push(addr);
            }
            Err(err) => {
                // Invalid forwarders are skipped; forwarding still works
                // when at least one valid forwarder remains.
                error!(dn, value = %value, error = %err, "could not parse forwarder");
            }
        }
    }

    if addrs.is_empty() {
        return Err(SyncError::UnexpectedToken(format!(
            "all idnsForwarders of '{dn}' are invalid"
        )));
    }

    Ok(Desired::Set(Forwarders { policy, addrs }))
}

#[cfg(test)]
#[path = "fwd_tests.rs"]
mod fwd_tests;
