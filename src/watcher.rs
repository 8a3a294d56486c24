// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The syncrepl watcher: one dedicated task following the directory.
//!
//! Runs an RFC 4533 refreshAndPersist session over a reserved pool
//! connection: prepare (stale file cleanup, reconnect with back-off),
//! stream the refresh snapshot, fire the sync barrier on `refreshDone`,
//! then follow persistent change notifications until shutdown. Session
//! errors drop the connection handle and restart the loop from prepare.
//!
//! Every blocking wait in this loop is preemptible by the shared
//! shutdown notification.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::constants::{SYNC_FILTER, SYNC_PREPARE_RETRY_SECS};
use crate::errors::{SyncError, SyncResult};
use crate::instance::Engine;
use crate::ldap::SyncMessage;
use crate::pool::PoolGuard;

/// Watcher entry point; returns when the instance shuts down.
pub(crate) async fn run(engine: Arc<Engine>) {
    debug!("entering syncrepl watcher");

    // One connection is reserved purely for this task; it is held for
    // the whole lifetime of the watcher.
    let mut conn = match engine.pool.get_connection().await {
        Ok(conn) => conn,
        Err(err) => {
            error!(error = %err, "syncrepl watcher could not reserve a pool connection");
            return;
        }
    };

    while !engine.shared.exiting() {
        match prepare(&engine, &mut conn).await {
            Ok(()) => {}
            Err(SyncError::ShuttingDown) => break,
            Err(err) => {
                error!(error = %err, "syncrepl session setup failed, retrying");
                if !engine
                    .shared
                    .sane_sleep(Duration::from_secs(SYNC_PREPARE_RETRY_SECS))
                    .await
                {
                    break;
                }
                continue;
            }
        }

        if let Err(err) = follow(&engine, &mut conn).await {
            if engine.shared.exiting() {
                break;
            }
            warn!(error = %err, "syncrepl session lost");
            // Force a reconnect in the next prepare round.
            conn.handle = None;
        }
    }

    debug!("ending syncrepl watcher");
}

/// Clean stale files, ensure the connection is bound and start the
/// sync session.
async fn prepare(engine: &Arc<Engine>, conn: &mut PoolGuard) -> SyncResult<()> {
    engine.sctx.reset();

    // Remove stale zone & journal files from a previous run.
    engine.registry.cleanup_files()?;

    let reconnect_interval =
        u64::from(engine.global_settings.get_uint("reconnect_interval")?);
    while conn.handle.is_none() {
        if engine.shared.exiting() {
            return Err(SyncError::ShuttingDown);
        }
        error!(
            seconds = reconnect_interval,
            "ldap_syncrepl will reconnect after the reconnect interval"
        );
        if !engine
            .shared
            .sane_sleep(Duration::from_secs(reconnect_interval))
            .await
        {
            return Err(SyncError::ShuttingDown);
        }
        if let Err(err) = engine
            .pool
            .connector()
            .handle_error(conn, None, true)
            .await
        {
            warn!(error = %err, "reconnect attempt failed");
        }
    }

    let base = engine.local_settings.get_str("base")?;
    debug!(base = %base, "sending initial syncrepl lookup");
    let started = conn.handle_mut()?.sync_init(&base, SYNC_FILTER).await;
    match started {
        Ok(()) => Ok(()),
        Err(err) => {
            let hint = if err.code == crate::ldap::ResultCode::UnavailableCriticalExtension {
                ": is RFC 4533 supported by the LDAP server?"
            } else {
                ""
            };
            error!(error = %err, "unable to start SyncRepl session{hint}");
            conn.handle = None;
            Err(SyncError::NotConnected(format!("sync_init failed: {err}")))
        }
    }
}

/// Poll the session until shutdown or a session error.
async fn follow(engine: &Arc<Engine>, conn: &mut PoolGuard) -> SyncResult<()> {
    loop {
        let message = {
            let handle = conn.handle_mut()?;
            tokio::select! {
                () = engine.shared.wait_shutdown() => return Err(SyncError::ShuttingDown),
                polled = handle.sync_poll() => polled,
            }
        };

        match message {
            Ok(SyncMessage::Entry { entry, phase }) => {
                if engine.shared.exiting() {
                    return Err(SyncError::ShuttingDown);
                }
                // Back-pressure: block while too many events are in
                // flight.
                engine.sctx.concurr_wait().await;
                let dn = entry.dn.clone();
                if let Err(err) = engine.dispatch(entry, phase) {
                    engine.sctx.concurr_signal();
                    crate::metrics::record_sync_event("dispatch", err.status_reason());
                    // A single broken entry must not stop the stream,
                    // but the data is incomplete from here on.
                    engine.shared.taint();
                    error!(dn = %dn, error = %err,
                           "failed to process syncrepl entry; entry dropped");
                }
            }
            Ok(SyncMessage::RefreshDone) => {
                debug!("refresh phase complete");
                engine.sctx.barrier_wait().await;
                engine.activate_zones().await;
                info!(
                    zones = engine.registry.len(),
                    "initial LDAP synchronization complete"
                );
            }
            Err(err) => {
                return Err(SyncError::NotConnected(format!(
                    "sync_poll failed: {err}"
                )));
            }
        }
    }
}
