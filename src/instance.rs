// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Instance lifecycle and event dispatch.
//!
//! An [`Instance`] owns everything a running engine needs: the settings
//! layers, the connection pool, the zone registry, the sync context and
//! the background tasks. Each zone gets its own single-consumer event
//! queue so all updates touching one zone are strictly serialized; an
//! instance-wide fallback queue handles configuration objects and
//! events for zones that are not registered yet.
//!
//! # Architecture
//!
//! The syncrepl watcher classifies each incoming entry and sends it to
//! the right queue. Workers process events one at a time, releasing the
//! watcher's back-pressure slot after each event. Shutdown closes every
//! queue after the watcher has stopped; events still queued at that
//! point are dropped with a log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hickory_proto::rr::Name;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::applier;
use crate::barrier::{SyncCtx, SyncState};
use crate::constants::SYNC_CONCURRENCY_LIMIT;
use crate::db::ZoneDb;
use crate::dn::{dn_equal_normalized, dn_to_name};
use crate::entry::Entry;
use crate::errors::{SyncError, SyncResult};
use crate::fwd::ForwardRegister;
use crate::host::HostDns;
use crate::ldap::{AuthProvider, LdapClient, RawEntry, SyncPhase};
use crate::pool::{Connector, LdapPool};
use crate::records::RrSet;
use crate::registry::ZoneRegistry;
use crate::settings::{validate_local_settings, InstanceConfig, SettingsSet};
use crate::shared::Shared;
use crate::watcher;
use crate::writer;
use crate::zones;

/// Which handler processes an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    /// The root configuration entry
    Config,
    /// A master or forward zone entry
    Zone,
    /// A resource-record entry
    Record,
}

impl Action {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Zone => "zone",
            Self::Record => "record",
        }
    }
}

/// One unit of work on a zone task queue.
#[derive(Debug, Clone)]
pub(crate) enum ZoneEvent {
    /// An LDAP entry changed
    Entry {
        entry: Entry,
        phase: SyncPhase,
        action: Action,
    },
    /// Drain barrier of the initial refresh
    Barrier,
}

/// Internal state shared by every task of one instance.
pub(crate) struct Engine {
    pub(crate) name: String,
    pub(crate) host: Arc<dyn HostDns>,
    pub(crate) local_settings: Arc<SettingsSet>,
    pub(crate) global_settings: Arc<SettingsSet>,
    pub(crate) pool: LdapPool,
    pub(crate) registry: ZoneRegistry,
    pub(crate) fwd_register: ForwardRegister,
    pub(crate) sctx: SyncCtx<ZoneEvent>,
    pub(crate) shared: Arc<Shared>,
    tasks: Mutex<HashMap<Name, mpsc::UnboundedSender<ZoneEvent>>>,
    fallback: Mutex<Option<mpsc::UnboundedSender<ZoneEvent>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Spawn the dedicated task for a newly registered zone.
    pub(crate) fn spawn_zone_task(self: &Arc<Self>, zone: &Name) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = self.tasks.lock().expect("task map lock");
        if tasks.contains_key(zone) {
            return;
        }
        tasks.insert(zone.clone(), tx);
        let handle = tokio::spawn(zone_worker(Arc::clone(self), rx));
        self.worker_handles
            .lock()
            .expect("worker handles lock")
            .push(handle);
        debug!(zone = %zone, "zone task started");
    }

    /// Drop a zone's task queue; the worker drains and exits.
    pub(crate) fn remove_zone_task(&self, zone: &Name) {
        if self
            .tasks
            .lock()
            .expect("task map lock")
            .remove(zone)
            .is_some()
        {
            debug!(zone = %zone, "zone task stopped");
        }
    }

    fn sender_for(&self, action: Action, zone: &Name) -> Option<mpsc::UnboundedSender<ZoneEvent>> {
        if action != Action::Config {
            if let Some(sender) = self.tasks.lock().expect("task map lock").get(zone) {
                return Some(sender.clone());
            }
        }
        // Config objects, and zones not registered yet, run on the
        // instance-wide fallback task.
        self.fallback.lock().expect("fallback lock").clone()
    }

    /// Classify one syncrepl entry and queue it on the right task.
    ///
    /// Called from the watcher, which already waited on the concurrency
    /// limiter; the worker releases the slot once the event has been
    /// processed.
    pub(crate) fn dispatch(self: &Arc<Self>, raw: RawEntry, phase: SyncPhase) -> SyncResult<()> {
        let entry = Entry::parse(raw);
        let base = self.local_settings.get_str("base")?;

        let (action, task_key) = if dn_equal_normalized(&base, entry.dn())? {
            (Action::Config, Name::root())
        } else {
            let names = dn_to_name(entry.dn())?;
            let action = match phase {
                SyncPhase::Delete => {
                    // A deleted entry carries no objectClass; recover
                    // the class from what the engine knows about the
                    // name.
                    if self.fwd_register.contains(&names.name) || names.zone.is_root() {
                        Action::Zone
                    } else {
                        Action::Record
                    }
                }
                _ => {
                    let class = entry.class();
                    if class.master || class.forward {
                        Action::Zone
                    } else if class.record {
                        Action::Record
                    } else if class.config {
                        Action::Config
                    } else {
                        return Err(SyncError::NotImplemented(format!(
                            "unsupported objectClass: dn '{}'",
                            entry.dn()
                        )));
                    }
                }
            };
            // Zone entries serialize on the zone's own task once it is
            // registered; record entries on the task of their zone.
            let task_key = match action {
                Action::Zone => names.name,
                _ => names.zone,
            };
            (action, task_key)
        };

        let sender = self
            .sender_for(action, &task_key)
            .ok_or(SyncError::ShuttingDown)?;

        // During the initial refresh every task with queued events has
        // to drain before the barrier may fire.
        if self.sctx.state() == SyncState::Init {
            self.sctx.register_task(&sender);
        }

        sender
            .send(ZoneEvent::Entry {
                entry,
                phase,
                action,
            })
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Publish and load every registered zone. Ran once the initial
    /// refresh barrier fired; before that zones stay unpublished.
    pub(crate) async fn activate_zones(&self) {
        for zone in self.registry.names() {
            let Some(info) = self.registry.exact(&zone) else {
                continue;
            };
            if let Err(err) = self.host.publish_zone(&zone).await {
                error!(zone = %zone, error = %err, "cannot publish zone");
                continue;
            }
            match self.host.load_zone(&zone).await {
                Ok(()) => {
                    info.db.set_status(crate::db::DbStatus::Loaded);
                    info!(zone = %zone, serial = ?info.db.soa_serial(), "zone activated");
                }
                Err(err) => {
                    info.db.set_status(crate::db::DbStatus::Bad);
                    error!(zone = %zone, error = %err, "zone load failed; the zone stays unloaded");
                }
            }
        }
    }

    fn take_all_senders(&self) -> Vec<mpsc::UnboundedSender<ZoneEvent>> {
        let mut senders: Vec<_> = self
            .tasks
            .lock()
            .expect("task map lock")
            .drain()
            .map(|(_, sender)| sender)
            .collect();
        if let Some(fallback) = self.fallback.lock().expect("fallback lock").take() {
            senders.push(fallback);
        }
        senders
    }
}

/// Worker loop of one task queue.
async fn zone_worker(engine: Arc<Engine>, mut rx: mpsc::UnboundedReceiver<ZoneEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ZoneEvent::Barrier => engine.sctx.task_drained(),
            ZoneEvent::Entry {
                entry,
                phase,
                action,
            } => {
                if engine.shared.exiting() {
                    warn!(dn = %entry.dn(), "dropping queued event during shutdown");
                    engine.sctx.concurr_signal();
                    continue;
                }

                let result = match action {
                    Action::Config => zones::update_config(&engine, &entry).await,
                    Action::Zone => zones::update_zone(&engine, &entry, phase).await,
                    Action::Record => applier::update_record(&engine, &entry, phase).await,
                };
                engine.sctx.concurr_signal();

                match result {
                    Ok(()) => crate::metrics::record_sync_event(action.as_str(), "ok"),
                    Err(SyncError::InvariantViolation(msg)) => {
                        // Continuing would risk serving inconsistent or
                        // insecure data.
                        error!(dn = %entry.dn(), error = %msg, "invariant violation, aborting");
                        std::process::abort();
                    }
                    Err(err) => {
                        crate::metrics::record_sync_event(action.as_str(), err.status_reason());
                        error!(dn = %entry.dn(), action = action.as_str(), error = %err,
                               "syncrepl update failed; data can be outdated until the \
                                next refresh");
                    }
                }
            }
        }
    }
}

/// A running synchronization engine.
///
/// Construct with [`Instance::start`]; the engine keeps running until
/// [`Instance::shutdown`].
pub struct Instance {
    engine: Arc<Engine>,
    watcher_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.engine.name)
            .finish()
    }
}

impl Instance {
    /// Validate the configuration, connect the pool and start the
    /// background tasks.
    ///
    /// # Errors
    ///
    /// Configuration validation failures and refused credentials
    /// (`NoPerm`) are fatal; an unreachable LDAP server is not, the
    /// watcher keeps reconnecting in the background.
    pub async fn start(
        config: InstanceConfig,
        client: Arc<dyn LdapClient>,
        host: Arc<dyn HostDns>,
        auth: Arc<dyn AuthProvider>,
    ) -> anyhow::Result<Self> {
        let name = config.name.clone();
        let local_settings = SettingsSet::local(&name, SettingsSet::defaults());
        config.fill(&local_settings)?;
        validate_local_settings(&name, &local_settings)?;
        let global_settings = SettingsSet::global(&name, Arc::clone(&local_settings));

        let shared = Arc::new(Shared::default());
        let connections = local_settings.get_uint("connections")?;
        let timeout = local_settings.get_uint("timeout")?;
        let connector = Connector::new(
            client,
            auth,
            Arc::clone(&global_settings),
            Arc::clone(&shared),
        );
        let pool = LdapPool::new(connector, connections, timeout);
        pool.connect_all().await?;

        let engine = Arc::new(Engine {
            name: name.clone(),
            host,
            registry: ZoneRegistry::new(Arc::clone(&global_settings)),
            fwd_register: ForwardRegister::new(),
            sctx: SyncCtx::new(ZoneEvent::Barrier, SYNC_CONCURRENCY_LIMIT),
            local_settings,
            global_settings,
            pool,
            shared,
            tasks: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
            worker_handles: Mutex::new(Vec::new()),
        });

        // Instance-wide fallback task for config objects and zones that
        // are not registered yet.
        let (fallback_tx, fallback_rx) = mpsc::unbounded_channel();
        *engine.fallback.lock().expect("fallback lock") = Some(fallback_tx);
        let fallback_worker = tokio::spawn(zone_worker(Arc::clone(&engine), fallback_rx));
        engine
            .worker_handles
            .lock()
            .expect("worker handles lock")
            .push(fallback_worker);

        let watcher_handle = tokio::spawn(watcher::run(Arc::clone(&engine)));
        info!(instance = %name, "LDAP synchronization instance started");

        Ok(Self {
            engine,
            watcher_handle: Mutex::new(Some(watcher_handle)),
        })
    }

    /// Stop the watcher, drain the task queues and join every
    /// background task.
    pub async fn shutdown(&self) {
        self.engine.shared.set_exiting();

        let watcher = self.watcher_handle.lock().expect("watcher lock").take();
        if let Some(handle) = watcher {
            if let Err(err) = handle.await {
                warn!(error = %err, "watcher task join failed");
            }
        }

        // The barrier may still hold registered task queues from an
        // unfinished refresh; release them so the workers can exit.
        self.engine.sctx.reset();

        // Closing the queues lets each worker drain and exit.
        drop(self.engine.take_all_senders());
        let handles: Vec<_> = {
            let mut guard = self.engine.worker_handles.lock().expect("worker handles lock");
            guard.drain(..).collect()
        };
        for result in futures::future::join_all(handles).await {
            if let Err(err) = result {
                warn!(error = %err, "zone task join failed");
            }
        }
        info!(instance = %self.engine.name, "LDAP synchronization instance stopped");
    }

    /// Current phase of the initial synchronization.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.engine.sctx.state()
    }

    /// Wait until the initial refresh completed.
    pub async fn wait_sync_finished(&self) {
        let mut rx = self.engine.sctx.subscribe();
        while *rx.borrow_and_update() != SyncState::Finished {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether an entry had to be dropped since startup.
    #[must_use]
    pub fn is_tainted(&self) -> bool {
        self.engine.shared.is_tainted()
    }

    /// In-memory database of a registered zone.
    #[must_use]
    pub fn zone_db(&self, zone: &Name) -> Option<Arc<ZoneDb>> {
        self.engine.registry.exact(zone).map(|info| Arc::clone(&info.db))
    }

    /// Names of all registered zones.
    #[must_use]
    pub fn zone_names(&self) -> Vec<Name> {
        self.engine.registry.names()
    }

    /// Path of a zone's journal file.
    pub fn journal_path(&self, zone: &Name) -> SyncResult<std::path::PathBuf> {
        self.engine.registry.journal_path(zone)
    }

    /// Dynamic-update write path: add the RRset's records at `owner`
    /// and mirror PTRs where configured.
    pub async fn write_records(&self, owner: &Name, rrset: &RrSet) -> SyncResult<()> {
        writer::write_records(&self.engine.pool, &self.engine.registry, owner, rrset).await
    }

    /// Dynamic-update write path: remove the RRset's records at
    /// `owner`; `delete_node` removes the whole entry.
    pub async fn remove_records(
        &self,
        owner: &Name,
        rrset: &RrSet,
        delete_node: bool,
    ) -> SyncResult<()> {
        writer::remove_records(
            &self.engine.pool,
            &self.engine.registry,
            owner,
            rrset,
            delete_node,
        )
        .await
    }

    /// Dynamic-update write path: delete the entry at `owner`.
    pub async fn remove_entry(&self, owner: &Name) -> SyncResult<()> {
        writer::remove_entry(&self.engine.pool, &self.engine.registry, owner).await
    }
}
