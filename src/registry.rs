// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Zone registry: the engine's own map of served zones.
//!
//! Maps absolute zone names to their LDAP DN, per-zone settings and
//! in-memory database. The registry is the authority on which zones the
//! engine manages; the host server's view is never trusted for that.
//! Longest-suffix lookup resolves record owner names to their zone.
//!
//! The registry also owns the filesystem layout for zone data:
//! `<directory>/master/<escaped-zone>/` with the zone file, journal and
//! `keys/` subdirectory, created with mode 0700 on demand.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use hickory_proto::rr::Name;
use tracing::debug;

use crate::constants::{JOURNAL_FILE, KEYS_SUBDIR, MASTER_SUBDIR, RAW_ZONE_FILE};
use crate::db::ZoneDb;
use crate::dn::relative_rdn;
use crate::errors::{SyncError, SyncResult};
use crate::settings::{create_private_dirs, SettingsSet};

/// Everything the engine keeps per registered zone.
#[derive(Debug)]
pub struct ZoneInfo {
    /// Absolute zone name
    pub name: Name,
    /// DN of the zone's LDAP entry
    pub dn: String,
    /// Per-zone settings layer (parent: global settings)
    pub settings: Arc<SettingsSet>,
    /// In-memory database, attached for the zone's lifetime
    pub db: Arc<ZoneDb>,
}

/// Registry of zones managed by one instance.
#[derive(Debug)]
pub struct ZoneRegistry {
    zones: RwLock<BTreeMap<Name, Arc<ZoneInfo>>>,
    global_settings: Arc<SettingsSet>,
}

impl ZoneRegistry {
    #[must_use]
    pub fn new(global_settings: Arc<SettingsSet>) -> Self {
        Self {
            zones: RwLock::new(BTreeMap::new()),
            global_settings,
        }
    }

    /// Register a zone.
    ///
    /// Prepares the zone's directory (including `keys/`) and removes
    /// stale zone and journal files from a previous run. Child zones of
    /// registered zones are allowed; re-registering the same name is
    /// not.
    pub fn add(&self, name: &Name, dn: &str) -> SyncResult<Arc<ZoneInfo>> {
        if !name.is_fqdn() {
            return Err(SyncError::Failure(format!(
                "zone '{name}' has a relative origin"
            )));
        }

        let zone_dir = self.zone_dir(name)?;
        create_private_dirs(&zone_dir.join(KEYS_SUBDIR))?;
        remove_file_if_present(&zone_dir.join(RAW_ZONE_FILE))?;
        remove_file_if_present(&zone_dir.join(JOURNAL_FILE))?;

        let info = Arc::new(ZoneInfo {
            name: name.clone(),
            dn: dn.to_string(),
            settings: SettingsSet::zone(dn, Arc::clone(&self.global_settings)),
            db: ZoneDb::new(name.clone()),
        });

        let mut zones = self.zones.write().expect("registry lock");
        if zones.contains_key(name) {
            return Err(SyncError::AlreadyExists(format!(
                "zone '{name}' is already registered"
            )));
        }
        zones.insert(name.clone(), Arc::clone(&info));
        crate::metrics::set_zone_count(zones.len());
        debug!(zone = %name, dn, "zone registered");
        Ok(info)
    }

    /// Remove a zone; removing an unregistered name is a no-op.
    pub fn delete(&self, name: &Name) {
        let mut zones = self.zones.write().expect("registry lock");
        if zones.remove(name).is_some() {
            crate::metrics::set_zone_count(zones.len());
            debug!(zone = %name, "zone unregistered");
        }
    }

    /// Exact-match lookup.
    #[must_use]
    pub fn exact(&self, name: &Name) -> Option<Arc<ZoneInfo>> {
        self.zones.read().expect("registry lock").get(name).cloned()
    }

    /// Deepest registered zone containing `name` (exact match
    /// included).
    #[must_use]
    pub fn containing(&self, name: &Name) -> Option<Arc<ZoneInfo>> {
        let zones = self.zones.read().expect("registry lock");
        let mut candidate = name.clone();
        loop {
            if let Some(info) = zones.get(&candidate) {
                return Some(info.clone());
            }
            if candidate.is_root() {
                return None;
            }
            candidate = candidate.base_name();
        }
    }

    /// Snapshot of all registered zone names.
    ///
    /// Iteration works on the snapshot; deleting zones while iterating
    /// the live map is forbidden, so destruction re-seeks through this
    /// after every removal.
    #[must_use]
    pub fn names(&self) -> Vec<Name> {
        self.zones.read().expect("registry lock").keys().cloned().collect()
    }

    /// Number of registered zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.read().expect("registry lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// DN of the entry storing data for `name`: the containing zone's
    /// DN, with an `idnsName=` RDN for the relative labels prefixed
    /// unless `name` is the apex itself.
    pub fn dn_for_name(&self, name: &Name) -> SyncResult<String> {
        let zone = self.containing(name).ok_or_else(|| {
            SyncError::NotFound(format!("no registered zone contains '{name}'"))
        })?;
        if zone.name == *name {
            return Ok(zone.dn.clone());
        }
        let rdn = relative_rdn(name, &zone.name)?;
        Ok(format!("{rdn}, {}", zone.dn))
    }

    /// Directory holding the zone's files.
    pub fn zone_dir(&self, zone: &Name) -> SyncResult<PathBuf> {
        let directory = self.global_settings.get_str("directory")?;
        Ok(Path::new(&directory)
            .join(MASTER_SUBDIR)
            .join(name_to_filename(zone)))
    }

    /// Path of the zone's raw zone file.
    pub fn zone_file_path(&self, zone: &Name) -> SyncResult<PathBuf> {
        Ok(self.zone_dir(zone)?.join(RAW_ZONE_FILE))
    }

    /// Path of the zone's journal.
    pub fn journal_path(&self, zone: &Name) -> SyncResult<PathBuf> {
        Ok(self.zone_dir(zone)?.join(JOURNAL_FILE))
    }

    /// Remove a zone's on-disk data.
    pub fn remove_zone_files(&self, zone: &Name) -> SyncResult<()> {
        let dir = self.zone_dir(zone)?;
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            debug!(zone = %zone, dir = %dir.display(), "removed zone files");
        }
        Ok(())
    }

    /// Remove zone directories that belong to no registered zone.
    ///
    /// Ran before each refresh so stale zone and journal files from a
    /// previous run cannot leak into the fresh state; directories of
    /// currently registered zones stay untouched.
    pub fn cleanup_files(&self) -> SyncResult<()> {
        let directory = self.global_settings.get_str("directory")?;
        let master = Path::new(&directory).join(MASTER_SUBDIR);
        create_private_dirs(&master)?;

        let registered: std::collections::BTreeSet<String> = self
            .names()
            .iter()
            .map(name_to_filename)
            .collect();
        for dir_entry in std::fs::read_dir(&master)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name().to_string_lossy().into_owned();
            if registered.contains(&file_name) {
                continue;
            }
            let path = dir_entry.path();
            debug!(path = %path.display(), "removing stale zone files");
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// Filesystem-safe form of a zone name.
///
/// ASCII letters are downcased, `[0-9_-]` and the label separator `.`
/// are preserved, every other octet becomes `%XX` (upper-case hex). The
/// final dot is omitted and the root zone is rewritten to `@` so it
/// cannot collide with the filesystem self-reference.
#[must_use]
pub fn name_to_filename(zone: &Name) -> String {
    if zone.is_root() {
        return "@".to_string();
    }
    let mut out = String::new();
    for (idx, label) in zone.iter().enumerate() {
        if idx > 0 {
            out.push('.');
        }
        for &b in label {
            match b {
                b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => out.push(b as char),
                b'A'..=b'Z' => out.push(b.to_ascii_lowercase() as char),
                _ => out.push_str(&format!("%{b:02X}")),
            }
        }
    }
    out
}

fn remove_file_if_present(path: &Path) -> SyncResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
