// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! LDAP connection pool with bounded concurrency and reconnect back-off.
//!
//! The pool holds a fixed number of connections, each guarded by its own
//! mutex; acquisition takes a semaphore slot and then the first
//! lockable connection. Acquisition is bounded: waiting longer than the
//! operation timeout times a safety multiplier indicates the pool is
//! exhausted, which is reported as a potential deadlock.
//!
//! One connection is effectively reserved for the syncrepl watcher: it
//! holds its guard for the whole session, and the minimum pool size of
//! two keeps user-triggered writes from ever blocking it.
//!
//! Reconnects follow a per-connection back-off schedule capped by the
//! `reconnect_interval` setting; forced reconnects bypass the schedule.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::constants::{RECONNECT_SCHEDULE_SECS, SEM_WAIT_TIMEOUT_MUL};
use crate::errors::{SyncError, SyncResult};
use crate::ldap::{
    AuthProvider, LdapClient, LdapError, LdapHandle, RawEntry, ResultCode, Scope,
};
use crate::settings::{AuthMethod, SettingsSet};
use crate::shared::Shared;

/// State of one pooled connection.
pub struct LdapConn {
    /// Established handle; `None` means a reconnect must succeed before
    /// any operation
    pub handle: Option<Box<dyn LdapHandle>>,
    /// Consecutive failed reconnect attempts; reset to 0 after every
    /// successful operation
    pub tries: u32,
    /// Earliest moment the next scheduled reconnect may run
    pub next_reconnect: Instant,
}

impl LdapConn {
    fn new() -> Self {
        Self {
            handle: None,
            tries: 0,
            next_reconnect: Instant::now(),
        }
    }

    /// Mutable access to the wire handle.
    pub fn handle_mut(&mut self) -> SyncResult<&mut dyn LdapHandle> {
        match self.handle.as_mut() {
            Some(handle) => Ok(handle.as_mut()),
            None => Err(SyncError::NotConnected(
                "connection has no LDAP handle".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for LdapConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConn")
            .field("connected", &self.handle.is_some())
            .field("tries", &self.tries)
            .finish()
    }
}

/// Owned guard over one pooled connection.
///
/// Dropping the guard releases the connection mutex and then the pool
/// slot, in that order.
#[derive(Debug)]
pub struct PoolGuard {
    conn: OwnedMutexGuard<LdapConn>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for PoolGuard {
    type Target = LdapConn;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for PoolGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Everything needed to (re)establish and bind a connection.
pub struct Connector {
    client: Arc<dyn LdapClient>,
    auth: Arc<dyn AuthProvider>,
    settings: Arc<SettingsSet>,
    shared: Arc<Shared>,
}

impl Connector {
    #[must_use]
    pub fn new(
        client: Arc<dyn LdapClient>,
        auth: Arc<dyn AuthProvider>,
        settings: Arc<SettingsSet>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            client,
            auth,
            settings,
            shared,
        }
    }

    /// Establish a fresh handle and bind it.
    ///
    /// The only path that changes `conn.handle`. On bind failure the
    /// handle is closed so the next operation triggers another
    /// reconnect.
    pub async fn connect(&self, conn: &mut LdapConn, force: bool) -> SyncResult<()> {
        let uri = self.settings.get_str("uri")?;
        let timeout = Duration::from_secs(u64::from(self.settings.get_uint("timeout")?));

        if !force && !self.reconnect_due(conn) {
            return Err(SyncError::NotConnected(
                "reconnect attempt throttled by back-off schedule".to_string(),
            ));
        }

        debug!(uri = %uri, "trying to establish LDAP connection");
        crate::metrics::record_reconnect();
        match self.client.connect(&uri, timeout).await {
            Ok(handle) => {
                conn.handle = Some(handle);
            }
            Err(err) => {
                conn.handle = None;
                return Err(map_bind_error(&err));
            }
        }

        match self.bind(conn).await {
            Ok(()) => {
                conn.tries = 0;
                debug!("bind to LDAP server successful");
                Ok(())
            }
            Err(err) => {
                conn.handle = None;
                Err(err)
            }
        }
    }

    /// Whether the back-off schedule allows another attempt now; also
    /// advances the schedule.
    fn reconnect_due(&self, conn: &mut LdapConn) -> bool {
        if conn.tries > 0 && Instant::now() < conn.next_reconnect {
            return false;
        }

        let interval =
            u64::from(self.settings.get_uint("reconnect_interval").unwrap_or(60));
        let idx = (conn.tries as usize).min(RECONNECT_SCHEDULE_SECS.len() - 1);
        let delay = RECONNECT_SCHEDULE_SECS[idx].min(interval);
        conn.next_reconnect = Instant::now() + Duration::from_secs(delay);
        conn.tries += 1;
        true
    }

    async fn bind(&self, conn: &mut LdapConn) -> SyncResult<()> {
        let auth_method: AuthMethod = self.settings.get_str("auth_method")?.parse()?;

        let result = match auth_method {
            AuthMethod::None => conn.handle_mut()?.simple_bind(None, None).await,
            AuthMethod::Simple => {
                let bind_dn = self.settings.get_str("bind_dn")?;
                let password = self.settings.get_str("password")?;
                conn.handle_mut()?
                    .simple_bind(Some(&bind_dn), Some(&password))
                    .await
            }
            AuthMethod::Sasl => {
                let sasl_mech = self.settings.get_str("sasl_mech")?;
                let principal = self.settings.get_str("krb5_principal")?;
                if sasl_mech.eq_ignore_ascii_case("GSSAPI") {
                    let keytab = self.settings.get_str("krb5_keytab")?;
                    // TGT acquisition is not reentrant.
                    let _kinit = self.shared.kinit_lock.lock().await;
                    if let Err(err) = self.auth.acquire_tgt(&principal, &keytab).await {
                        warn!(principal = %principal, error = %err,
                              "failed to obtain Kerberos credentials");
                        return Err(SyncError::NotConnected(format!(
                            "cannot obtain TGT for '{principal}'"
                        )));
                    }
                }
                debug!(mech = %sasl_mech, "trying interactive bind");
                conn.handle_mut()?
                    .sasl_interactive_bind(&sasl_mech, &principal)
                    .await
            }
        };

        result.map_err(|err| {
            warn!(error = %err, "bind to LDAP server failed");
            map_bind_error(&err)
        })
    }

    /// React to a failed LDAP operation.
    ///
    /// Timeouts and syntax errors surface directly (the latter indicate
    /// a bug in query construction); everything else attempts one
    /// reconnect so the caller can retry.
    pub async fn handle_error(
        &self,
        conn: &mut LdapConn,
        code: Option<ResultCode>,
        force: bool,
    ) -> SyncResult<()> {
        if conn.handle.is_some() {
            match code {
                Some(ResultCode::Timeout) => {
                    error!("LDAP query timed out. Try to adjust \"timeout\" parameter");
                    return Err(SyncError::TimedOut("LDAP operation".to_string()));
                }
                Some(
                    ResultCode::InvalidSyntax
                    | ResultCode::InvalidDnSyntax
                    | ResultCode::FilterError,
                ) => {
                    error!("invalid syntax reported by LDAP server indicates a bug");
                    return Err(SyncError::UnexpectedToken(
                        "LDAP server reported invalid syntax".to_string(),
                    ));
                }
                _ => warn!(?code, "LDAP connection error"),
            }
        } else {
            error!("connection to the LDAP server was lost");
        }

        let result = self.connect(conn, force).await;
        if result.is_ok() {
            info!("successfully reconnected to LDAP server");
        }
        result
    }

    /// Make sure the connection is usable, reconnecting if needed.
    pub async fn ensure_bound(&self, conn: &mut LdapConn) -> SyncResult<()> {
        if conn.handle.is_some() {
            return Ok(());
        }
        self.connect(conn, false).await
    }
}

/// Fixed-size pool of LDAP connections.
pub struct LdapPool {
    conns: Vec<Arc<Mutex<LdapConn>>>,
    slots: Arc<Semaphore>,
    acquire_timeout: Duration,
    connector: Connector,
}

impl LdapPool {
    /// Create an unconnected pool of `connections` slots.
    #[must_use]
    pub fn new(connector: Connector, connections: u32, op_timeout_secs: u32) -> Self {
        let connections = connections as usize;
        Self {
            conns: (0..connections)
                .map(|_| Arc::new(Mutex::new(LdapConn::new())))
                .collect(),
            slots: Arc::new(Semaphore::new(connections)),
            acquire_timeout: Duration::from_secs(u64::from(
                op_timeout_secs * SEM_WAIT_TIMEOUT_MUL,
            )),
            connector,
        }
    }

    /// The connector, for callers that need explicit reconnect control.
    #[must_use]
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Number of pooled connections.
    #[must_use]
    pub fn size(&self) -> usize {
        self.conns.len()
    }

    /// Establish every pooled connection at startup.
    ///
    /// An unreachable or slow server is tolerated (the reconnect logic
    /// recovers later); refused credentials and other hard errors abort
    /// startup with no connection left behind.
    pub async fn connect_all(&self) -> SyncResult<()> {
        for conn in &self.conns {
            let mut conn = conn.lock().await;
            match self.connector.connect(&mut conn, false).await {
                Ok(())
                | Err(SyncError::NotConnected(_))
                | Err(SyncError::TimedOut(_)) => {}
                Err(err) => {
                    error!(error = %err, "couldn't establish connection in LDAP connection pool");
                    for conn in &self.conns {
                        conn.lock().await.handle = None;
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Acquire a connection: wait for a pool slot, then lock the first
    /// free connection.
    ///
    /// # Errors
    ///
    /// `TimedOut` when no slot frees up within the bounded wait; the
    /// log suggests raising the `connections` parameter since this
    /// usually means a deadlock or an undersized pool.
    pub async fn get_connection(&self) -> SyncResult<PoolGuard> {
        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        {
            Err(_) => {
                error!(
                    "timeout in ldap_pool_getconnection(): try to raise 'connections' \
                     parameter; potential deadlock?"
                );
                return Err(SyncError::TimedOut("connection pool".to_string()));
            }
            Ok(Err(_)) => return Err(SyncError::ShuttingDown),
            Ok(Ok(permit)) => permit,
        };

        // Holding a permit guarantees a free connection exists; a retry
        // loop covers the window where another task is mid-release.
        loop {
            for conn in &self.conns {
                if let Ok(guard) = Arc::clone(conn).try_lock_owned() {
                    return Ok(PoolGuard {
                        conn: guard,
                        _permit: permit,
                    });
                }
            }
            tokio::task::yield_now().await;
        }
    }

    /// Search with reconnect-and-retry-once semantics.
    ///
    /// A `noSuchObject` result is success with an empty entry list.
    pub async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
    ) -> SyncResult<Vec<RawEntry>> {
        let mut guard = self.get_connection().await?;
        self.connector.ensure_bound(&mut guard).await?;

        debug!(base, filter, "querying LDAP");
        let mut retried = false;
        loop {
            let result = guard.handle_mut()?.search_ext(base, scope, filter).await;
            match result {
                Ok(entries) => {
                    guard.tries = 0;
                    debug!(base, count = entries.len(), "entry count");
                    return Ok(entries);
                }
                Err(LdapError {
                    code: ResultCode::NoSuchObject,
                    ..
                }) => {
                    guard.tries = 0;
                    return Ok(Vec::new());
                }
                Err(err) if !retried => {
                    retried = true;
                    self.connector
                        .handle_error(&mut guard, Some(err.code), false)
                        .await?;
                }
                Err(err) => {
                    return Err(SyncError::Failure(format!(
                        "LDAP search under '{base}' failed: {err}"
                    )));
                }
            }
        }
    }
}

/// Map a bind/connect failure to the engine error kinds.
fn map_bind_error(err: &LdapError) -> SyncError {
    match err.code {
        ResultCode::InvalidCredentials => SyncError::NoPerm(err.message.clone()),
        ResultCode::ServerDown => SyncError::NotConnected(err.message.clone()),
        ResultCode::Timeout => SyncError::TimedOut(err.message.clone()),
        _ => SyncError::Failure(err.message.clone()),
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod pool_tests;
