// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! LDAP client and authentication interfaces.
//!
//! The engine never links an LDAP library directly; it drives the
//! directory through the [`LdapClient`] / [`LdapHandle`] traits and
//! acquires Kerberos credentials through [`AuthProvider`]. This keeps the
//! wire client swappable and lets the test suite drive the whole engine
//! from scripted inputs.
//!
//! # Architecture
//!
//! [`LdapClient`] is a connection factory. Each [`LdapHandle`] is one
//! bound or unbound connection owned by a pool slot; all operations take
//! `&mut self` and are serialized by the pool's per-connection mutex.
//! RFC 4533 content synchronization is exposed as `sync_init` +
//! `sync_poll` yielding [`SyncMessage`]s.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::errors::SyncResult;

/// LDAP result codes the engine reacts to.
///
/// Every other code is carried through as [`ResultCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    /// Target entry does not exist (32)
    NoSuchObject,
    /// Target attribute does not exist on the entry (16)
    NoSuchAttribute,
    /// Bind rejected (49)
    InvalidCredentials,
    /// Transport-level failure talking to the server
    ServerDown,
    /// Operation exceeded its time limit (3 / 85)
    Timeout,
    /// Malformed attribute value (21)
    InvalidSyntax,
    /// Malformed DN (34)
    InvalidDnSyntax,
    /// Malformed search filter (87)
    FilterError,
    /// Server does not support a required control, e.g. RFC 4533 (12)
    UnavailableCriticalExtension,
    /// Any other protocol result code
    Other(u16),
}

/// Error returned by every [`LdapHandle`] operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("LDAP operation failed ({code:?}): {message}")]
pub struct LdapError {
    /// Protocol result code
    pub code: ResultCode,
    /// Server-provided or client-synthesized diagnostic
    pub message: String,
}

impl LdapError {
    /// Shorthand constructor.
    #[must_use]
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result alias for wire-level operations.
pub type LdapResult<T> = Result<T, LdapError>;

/// Search scope of `search_ext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    One,
    Subtree,
}

/// Modification operation carried by a [`Mod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

/// One attribute modification within a modify or add request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mod {
    pub op: ModOp,
    pub attr: String,
    /// Empty list on delete means "remove every value of the attribute"
    pub values: Vec<String>,
}

impl Mod {
    /// Build a modification in one expression.
    #[must_use]
    pub fn new(op: ModOp, attr: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            op,
            attr: attr.into(),
            values,
        }
    }
}

/// An entry as delivered by the wire client: DN plus attributes in
/// server order, values in server order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEntry {
    pub dn: String,
    pub attrs: Vec<(String, Vec<String>)>,
}

/// Change type attached to a syncrepl entry message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Entry added (or part of the initial refresh)
    Add,
    /// Entry modified
    Modify,
    /// Entry deleted; only the DN is meaningful
    Delete,
    /// Entry present and unchanged during refresh
    Present,
}

/// One message from the RFC 4533 refreshAndPersist session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// An entry changed (or was reported during refresh)
    Entry { entry: RawEntry, phase: SyncPhase },
    /// The refresh phase is complete; persist phase follows
    RefreshDone,
}

/// Connection factory for the directory server.
#[async_trait]
pub trait LdapClient: Send + Sync {
    /// Open an unbound connection to `uri` with the given operation
    /// timeout. Protocol version is fixed at LDAPv3.
    async fn connect(&self, uri: &str, timeout: Duration) -> LdapResult<Box<dyn LdapHandle>>;
}

/// One LDAP connection.
///
/// The engine issues only the operations named in the design: bind
/// variants as part of connection setup, `search_ext`, `modify_ext`,
/// `add_ext`, `delete_ext` and the RFC 4533 `sync_init` / `sync_poll`
/// pair.
#[async_trait]
pub trait LdapHandle: Send {
    /// Simple bind; `None`/`None` performs an anonymous bind.
    async fn simple_bind(&mut self, bind_dn: Option<&str>, password: Option<&str>)
        -> LdapResult<()>;

    /// SASL interactive bind with the given mechanism.
    async fn sasl_interactive_bind(&mut self, mech: &str, principal: &str) -> LdapResult<()>;

    /// Synchronous subtree/base search.
    async fn search_ext(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
    ) -> LdapResult<Vec<RawEntry>>;

    /// Modify an existing entry.
    async fn modify_ext(&mut self, dn: &str, mods: &[Mod]) -> LdapResult<()>;

    /// Add a new entry built from bare modifications.
    async fn add_ext(&mut self, dn: &str, mods: &[Mod]) -> LdapResult<()>;

    /// Delete a whole entry.
    async fn delete_ext(&mut self, dn: &str) -> LdapResult<()>;

    /// Start an RFC 4533 refreshAndPersist session under `base`.
    async fn sync_init(&mut self, base: &str, filter: &str) -> LdapResult<()>;

    /// Block until the session yields the next message.
    async fn sync_poll(&mut self) -> LdapResult<SyncMessage>;
}

/// Kerberos/SASL credential acquisition.
///
/// `acquire_tgt` is invoked under the instance-wide `kinit` lock; the
/// implementation does not need to be reentrant.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Obtain (or refresh) a TGT for `principal` from `keytab`.
    async fn acquire_tgt(&self, principal: &str, keytab: &str) -> SyncResult<()>;
}

/// Auth provider for deployments without SASL; any attempt to acquire a
/// ticket fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn acquire_tgt(&self, principal: &str, _keytab: &str) -> SyncResult<()> {
        Err(crate::errors::SyncError::NotImplemented(format!(
            "no auth provider configured, cannot obtain TGT for '{principal}'"
        )))
    }
}
