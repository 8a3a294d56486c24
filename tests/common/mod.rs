// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared fixtures for the integration tests.
//!
//! [`ScriptedLdap`] is a complete in-memory LDAP server double: it holds
//! a DN-keyed entry store that engine writes mutate, and a scripted
//! syncrepl stream the tests feed through [`SyncScript`]. Together with
//! [`zonedir::MemoryHost`] this drives the whole engine without any
//! external process.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::rr::Name;
use tokio::sync::mpsc;

use zonedir::errors::SyncResult;
use zonedir::ldap::{
    AuthProvider, LdapClient, LdapError, LdapHandle, LdapResult, Mod, ModOp, RawEntry,
    ResultCode, Scope, SyncMessage, SyncPhase,
};

/// Base DN used by every test.
pub const BASE_DN: &str = "cn=dns,dc=example,dc=test";

/// Shared state of the scripted directory.
#[derive(Default)]
pub struct DirectoryState {
    pub entries: Mutex<BTreeMap<String, RawEntry>>,
    /// Completed write operations, for assertions ("add <dn>",
    /// "modify <dn>", "delete <dn>")
    pub write_log: Mutex<Vec<String>>,
    pub writes: AtomicUsize,
    /// Bind outcome; `None` binds successfully
    pub bind_result: Mutex<Option<ResultCode>>,
}

impl DirectoryState {
    /// First value of an attribute of a stored entry.
    pub fn attr(&self, dn: &str, attr: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(dn)?;
        entry
            .attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .and_then(|(_, values)| values.first().cloned())
    }

    pub fn has_entry(&self, dn: &str) -> bool {
        self.entries.lock().unwrap().contains_key(dn)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Handle for feeding syncrepl messages into the engine under test.
pub struct SyncScript {
    tx: mpsc::UnboundedSender<SyncMessage>,
}

impl SyncScript {
    /// Deliver an entry event; `phase` mirrors the server's change type.
    pub fn push_entry(&self, entry: RawEntry, phase: SyncPhase) {
        self.tx
            .send(SyncMessage::Entry { entry, phase })
            .expect("sync stream closed");
    }

    /// Deliver the end-of-refresh marker.
    pub fn push_refresh_done(&self) {
        self.tx
            .send(SyncMessage::RefreshDone)
            .expect("sync stream closed");
    }
}

/// Scripted LDAP client: one directory, one syncrepl stream.
pub struct ScriptedLdap {
    state: Arc<DirectoryState>,
    sync_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncMessage>>>,
}

impl ScriptedLdap {
    /// Build the client plus the handles the test keeps.
    pub fn new() -> (Arc<Self>, Arc<DirectoryState>, SyncScript) {
        let state = Arc::new(DirectoryState::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            state: Arc::clone(&state),
            sync_rx: Mutex::new(Some(rx)),
        });
        (client, state, SyncScript { tx })
    }
}

#[async_trait]
impl LdapClient for ScriptedLdap {
    async fn connect(&self, _uri: &str, _timeout: Duration) -> LdapResult<Box<dyn LdapHandle>> {
        Ok(Box::new(ScriptedHandle {
            state: Arc::clone(&self.state),
            sync_rx: None,
            client_rx: Arc::new(Mutex::new(self.sync_rx.lock().unwrap().take())),
        }))
    }
}

struct ScriptedHandle {
    state: Arc<DirectoryState>,
    sync_rx: Option<mpsc::UnboundedReceiver<SyncMessage>>,
    /// Stream not yet claimed by sync_init
    client_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<SyncMessage>>>>,
}

#[async_trait]
impl LdapHandle for ScriptedHandle {
    async fn simple_bind(&mut self, _dn: Option<&str>, _pw: Option<&str>) -> LdapResult<()> {
        match *self.state.bind_result.lock().unwrap() {
            None => Ok(()),
            Some(code) => Err(LdapError::new(code, "bind refused")),
        }
    }

    async fn sasl_interactive_bind(&mut self, _mech: &str, _principal: &str) -> LdapResult<()> {
        Ok(())
    }

    async fn search_ext(
        &mut self,
        base: &str,
        scope: Scope,
        _filter: &str,
    ) -> LdapResult<Vec<RawEntry>> {
        let entries = self.state.entries.lock().unwrap();
        let matched: Vec<RawEntry> = match scope {
            Scope::Base => entries.get(base).cloned().into_iter().collect(),
            Scope::One | Scope::Subtree => entries
                .values()
                .filter(|entry| entry.dn.ends_with(base))
                .cloned()
                .collect(),
        };
        if matched.is_empty() {
            return Err(LdapError::new(ResultCode::NoSuchObject, "no entry"));
        }
        Ok(matched)
    }

    async fn modify_ext(&mut self, dn: &str, mods: &[Mod]) -> LdapResult<()> {
        let mut entries = self.state.entries.lock().unwrap();
        let entry = entries
            .get_mut(dn)
            .ok_or_else(|| LdapError::new(ResultCode::NoSuchObject, "no entry"))?;
        for change in mods {
            let slot = entry
                .attrs
                .iter_mut()
                .position(|(attr, _)| attr.eq_ignore_ascii_case(&change.attr));
            match change.op {
                ModOp::Add => match slot {
                    Some(idx) => entry.attrs[idx].1.extend(change.values.clone()),
                    None => entry.attrs.push((change.attr.clone(), change.values.clone())),
                },
                ModOp::Delete => {
                    let Some(idx) = slot else {
                        return Err(LdapError::new(
                            ResultCode::NoSuchAttribute,
                            "no attribute",
                        ));
                    };
                    if change.values.is_empty() {
                        entry.attrs.remove(idx);
                    } else {
                        entry.attrs[idx].1.retain(|v| !change.values.contains(v));
                        if entry.attrs[idx].1.is_empty() {
                            entry.attrs.remove(idx);
                        }
                    }
                }
                ModOp::Replace => match slot {
                    Some(idx) => entry.attrs[idx].1 = change.values.clone(),
                    None => entry.attrs.push((change.attr.clone(), change.values.clone())),
                },
            }
        }
        self.state
            .write_log
            .lock()
            .unwrap()
            .push(format!("modify {dn}"));
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ext(&mut self, dn: &str, mods: &[Mod]) -> LdapResult<()> {
        let mut entries = self.state.entries.lock().unwrap();
        if entries.contains_key(dn) {
            return Err(LdapError::new(ResultCode::Other(68), "entry exists"));
        }
        entries.insert(
            dn.to_string(),
            RawEntry {
                dn: dn.to_string(),
                attrs: mods
                    .iter()
                    .map(|m| (m.attr.clone(), m.values.clone()))
                    .collect(),
            },
        );
        self.state
            .write_log
            .lock()
            .unwrap()
            .push(format!("add {dn}"));
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_ext(&mut self, dn: &str) -> LdapResult<()> {
        self.state.entries.lock().unwrap().remove(dn);
        self.state
            .write_log
            .lock()
            .unwrap()
            .push(format!("delete {dn}"));
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn sync_init(&mut self, _base: &str, _filter: &str) -> LdapResult<()> {
        if self.sync_rx.is_none() {
            self.sync_rx = self.client_rx.lock().unwrap().take();
        }
        if self.sync_rx.is_none() {
            return Err(LdapError::new(
                ResultCode::UnavailableCriticalExtension,
                "sync stream already consumed",
            ));
        }
        Ok(())
    }

    async fn sync_poll(&mut self) -> LdapResult<SyncMessage> {
        let Some(rx) = self.sync_rx.as_mut() else {
            return Err(LdapError::new(ResultCode::Other(1), "sync not initialized"));
        };
        match rx.recv().await {
            Some(message) => Ok(message),
            None => Err(LdapError::new(ResultCode::ServerDown, "stream closed")),
        }
    }
}

/// Auth provider that always succeeds; tests never exercise Kerberos.
pub struct TestAuth;

#[async_trait]
impl AuthProvider for TestAuth {
    async fn acquire_tgt(&self, _principal: &str, _keytab: &str) -> SyncResult<()> {
        Ok(())
    }
}

// ============================================================================
// Entry builders
// ============================================================================

pub fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

pub fn zone_dn(zone: &str) -> String {
    format!("idnsName={zone}, {BASE_DN}")
}

pub fn record_dn(owner_label: &str, zone: &str) -> String {
    format!("idnsName={owner_label}, idnsName={zone}, {BASE_DN}")
}

fn to_attrs(attrs: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
    attrs
        .iter()
        .map(|(attr, values)| {
            (
                (*attr).to_string(),
                values.iter().map(|v| (*v).to_string()).collect(),
            )
        })
        .collect()
}

/// A master zone entry with a complete SOA.
pub fn zone_entry(zone: &str, serial: u32, extra: &[(&str, &[&str])]) -> RawEntry {
    let serial = serial.to_string();
    let mname = format!("ns1.{zone}");
    let rname = format!("hostmaster.{zone}");
    let mut attrs = to_attrs(&[
        ("objectClass", &["top", "idnsZone"]),
        ("idnsName", &[zone]),
        ("idnsZoneActive", &["TRUE"]),
        ("idnsSOAmName", &[mname.as_str()]),
        ("idnsSOArName", &[rname.as_str()]),
        ("idnsSOAserial", &[serial.as_str()]),
        ("idnsSOArefresh", &["3600"]),
        ("idnsSOAretry", &["900"]),
        ("idnsSOAexpire", &["604800"]),
        ("idnsSOAminimum", &["3600"]),
    ]);
    attrs.extend(to_attrs(extra));
    RawEntry {
        dn: zone_dn(zone),
        attrs,
    }
}

/// A record entry below a zone.
pub fn record_entry(owner_label: &str, zone: &str, records: &[(&str, &[&str])]) -> RawEntry {
    let mut attrs = to_attrs(&[
        ("objectClass", &["top", "idnsRecord"]),
        ("idnsName", &[owner_label]),
    ]);
    attrs.extend(to_attrs(records));
    RawEntry {
        dn: record_dn(owner_label, zone),
        attrs,
    }
}

/// The root configuration entry.
pub fn config_entry(attrs: &[(&str, &[&str])]) -> RawEntry {
    let mut all = to_attrs(&[("objectClass", &["top", "idnsConfigObject"])]);
    all.extend(to_attrs(attrs));
    RawEntry {
        dn: BASE_DN.to_string(),
        attrs: all,
    }
}

/// Poll until `check` passes or the timeout expires.
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
