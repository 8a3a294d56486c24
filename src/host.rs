// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Host DNS server interface.
//!
//! The engine never manages server views or zone objects itself; it
//! drives the hosting DNS server through the [`HostDns`] trait: zone
//! lifecycle on the view, zone access control, the forward table and the
//! resolver cache.
//!
//! [`MemoryHost`] is the in-memory reference implementation used by the
//! test suite and by embedders that only need the synchronized data.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use hickory_proto::rr::Name;

use crate::errors::{SyncError, SyncResult};
use crate::fwd::Forwarders;

/// Operations the engine needs from the hosting DNS server.
#[async_trait]
pub trait HostDns: Send + Sync {
    /// Create a master zone object for `name` on the view.
    async fn create_zone(&self, name: &Name) -> SyncResult<()>;

    /// Remove the zone from the view and destroy its object.
    async fn delete_zone(&self, name: &Name) -> SyncResult<()>;

    /// Make the zone visible to resolution.
    async fn publish_zone(&self, name: &Name) -> SyncResult<()>;

    /// (Re)load the zone's database contents.
    async fn load_zone(&self, name: &Name) -> SyncResult<()>;

    /// Install allow-query / allow-transfer ACLs; `None` clears the ACL.
    async fn set_zone_acls(
        &self,
        name: &Name,
        allow_query: Option<&str>,
        allow_transfer: Option<&str>,
    ) -> SyncResult<()>;

    /// Install the dynamic-update policy; the empty policy blocks every
    /// update.
    async fn set_update_policy(&self, name: &Name, policy: &str) -> SyncResult<()>;

    /// Current forward-table entry for exactly `name`.
    async fn get_forwarders(&self, name: &Name) -> Option<Forwarders>;

    /// Install or replace the forward-table entry for `name`.
    async fn replace_forwarders(&self, name: &Name, forwarders: Forwarders) -> SyncResult<()>;

    /// Remove the forward-table entry for `name`; removing a missing
    /// entry is a no-op.
    async fn delete_forwarders(&self, name: &Name) -> SyncResult<()>;

    /// Flush the resolver cache after forwarding changes.
    async fn flush_cache(&self) -> SyncResult<()>;

    /// Global forwarders from the server's own configuration, used as
    /// the fallback when the root entry defines none.
    fn original_global_forwarders(&self) -> Forwarders;
}

/// Per-zone state tracked by [`MemoryHost`].
#[derive(Debug, Clone, Default)]
pub struct MemoryZoneState {
    pub published: bool,
    pub loaded: bool,
    pub load_count: usize,
    pub allow_query: Option<String>,
    pub allow_transfer: Option<String>,
    pub update_policy: Option<String>,
}

/// In-memory host server for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryHost {
    zones: Mutex<BTreeMap<Name, MemoryZoneState>>,
    fwd_table: RwLock<BTreeMap<Name, Forwarders>>,
    flushes: AtomicUsize,
    original_global: Forwarders,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with preconfigured global forwarders.
    #[must_use]
    pub fn with_global_forwarders(original_global: Forwarders) -> Self {
        Self {
            original_global,
            ..Self::default()
        }
    }

    /// Whether a zone object exists on the view.
    #[must_use]
    pub fn zone_exists(&self, name: &Name) -> bool {
        self.zones.lock().expect("zones lock").contains_key(name)
    }

    /// Snapshot of one zone's state.
    #[must_use]
    pub fn zone_state(&self, name: &Name) -> Option<MemoryZoneState> {
        self.zones.lock().expect("zones lock").get(name).cloned()
    }

    /// Current forward-table entry, for assertions.
    #[must_use]
    pub fn forwarders(&self, name: &Name) -> Option<Forwarders> {
        self.fwd_table.read().expect("fwd lock").get(name).cloned()
    }

    /// Number of cache flushes so far.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostDns for MemoryHost {
    async fn create_zone(&self, name: &Name) -> SyncResult<()> {
        let mut zones = self.zones.lock().expect("zones lock");
        if zones.contains_key(name) {
            return Err(SyncError::AlreadyExists(format!(
                "zone '{name}' already exists on the view"
            )));
        }
        zones.insert(name.clone(), MemoryZoneState::default());
        Ok(())
    }

    async fn delete_zone(&self, name: &Name) -> SyncResult<()> {
        self.zones.lock().expect("zones lock").remove(name);
        Ok(())
    }

    async fn publish_zone(&self, name: &Name) -> SyncResult<()> {
        let mut zones = self.zones.lock().expect("zones lock");
        let state = zones.get_mut(name).ok_or_else(|| {
            SyncError::NotFound(format!("cannot publish unknown zone '{name}'"))
        })?;
        state.published = true;
        Ok(())
    }

    async fn load_zone(&self, name: &Name) -> SyncResult<()> {
        let mut zones = self.zones.lock().expect("zones lock");
        let state = zones.get_mut(name).ok_or_else(|| {
            SyncError::NotFound(format!("cannot load unknown zone '{name}'"))
        })?;
        state.loaded = true;
        state.load_count += 1;
        Ok(())
    }

    async fn set_zone_acls(
        &self,
        name: &Name,
        allow_query: Option<&str>,
        allow_transfer: Option<&str>,
    ) -> SyncResult<()> {
        let mut zones = self.zones.lock().expect("zones lock");
        let state = zones.get_mut(name).ok_or_else(|| {
            SyncError::NotFound(format!("cannot set ACLs on unknown zone '{name}'"))
        })?;
        state.allow_query = allow_query.map(str::to_string);
        state.allow_transfer = allow_transfer.map(str::to_string);
        Ok(())
    }

    async fn set_update_policy(&self, name: &Name, policy: &str) -> SyncResult<()> {
        let mut zones = self.zones.lock().expect("zones lock");
        let state = zones.get_mut(name).ok_or_else(|| {
            SyncError::NotFound(format!("cannot set update policy on unknown zone '{name}'"))
        })?;
        state.update_policy = Some(policy.to_string());
        Ok(())
    }

    async fn get_forwarders(&self, name: &Name) -> Option<Forwarders> {
        self.fwd_table.read().expect("fwd lock").get(name).cloned()
    }

    async fn replace_forwarders(&self, name: &Name, forwarders: Forwarders) -> SyncResult<()> {
        self.fwd_table
            .write()
            .expect("fwd lock")
            .insert(name.clone(), forwarders);
        Ok(())
    }

    async fn delete_forwarders(&self, name: &Name) -> SyncResult<()> {
        self.fwd_table.write().expect("fwd lock").remove(name);
        Ok(())
    }

    async fn flush_cache(&self) -> SyncResult<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn original_global_forwarders(&self) -> Forwarders {
        self.original_global.clone()
    }
}
