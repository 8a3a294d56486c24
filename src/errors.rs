// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the zonedir synchronization engine.
//!
//! This module provides the engine-wide error enum used across all
//! components:
//! - DN/name conversion and escaping failures
//! - LDAP transport and bind failures surfaced through the connection pool
//! - Zone apply, PTR synchronization and forwarding failures
//!
//! The errors provide structured handling for synchronization operations,
//! enabling better error reporting in logs and metrics.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors produced by the synchronization engine.
///
/// Each variant corresponds to one failure class the engine distinguishes;
/// the payload is a human-readable context string (entry DN, zone name or
/// similar) interpolated into the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The requested object (zone, record, forwarder entry) is not known
    #[error("not found: {0}")]
    NotFound(String),

    /// An object with the same key already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A DNS presentation-form string carried a malformed escape sequence
    ///
    /// Raised by the security-sensitive DNS-to-LDAP value escaper; the
    /// offending input is never written to LDAP.
    #[error("improperly escaped DNS string: '{0}'")]
    BadEscape(String),

    /// A record owner name is out of zone or redefines the zone apex
    #[error("bad owner name: {0}")]
    BadOwnerName(String),

    /// The input uses a construct the engine does not support
    /// (multi-valued RDN, mixed TTLs, more than one PTR, ...)
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Malformed policy value or invalid syntax; when returned for an
    /// LDAP operation built by the engine itself this indicates a bug
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),

    /// Invalid credentials, or an update was refused by policy
    #[error("permission denied: {0}")]
    NoPerm(String),

    /// The LDAP server is unreachable and reconnecting did not help
    #[error("not connected: {0}")]
    NotConnected(String),

    /// An LDAP operation exceeded the configured timeout
    #[error("timed out: {0}")]
    TimedOut(String),

    /// Forwarding for the entry is explicitly configured off
    /// (policy `none`); distinguishes "disable" from "unchanged"
    #[error("forwarding disabled: {0}")]
    Disabled(String),

    /// A PTR record with a conflicting value already exists
    #[error("singleton collision: {0}")]
    Singleton(String),

    /// An internal consistency check failed; this is a bug and the
    /// caller must treat it as fatal
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The instance is shutting down; the operation was abandoned
    #[error("shutting down")]
    ShuttingDown,

    /// Generic failure that does not fit any other category
    #[error("{0}")]
    Failure(String),
}

impl SyncError {
    /// Returns true if this error is transient and the operation may
    /// succeed when retried.
    ///
    /// Transient errors include transport failures and timeouts.
    /// Non-transient errors include bad input, refused permissions and
    /// internal bugs.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotConnected(_) | Self::TimedOut(_) | Self::Failure(_) => true,

            Self::NotFound(_)
            | Self::AlreadyExists(_)
            | Self::BadEscape(_)
            | Self::BadOwnerName(_)
            | Self::NotImplemented(_)
            | Self::UnexpectedToken(_)
            | Self::NoPerm(_)
            | Self::Disabled(_)
            | Self::Singleton(_)
            | Self::InvariantViolation(_)
            | Self::ShuttingDown => false,
        }
    }

    /// Returns a stable reason code for this error.
    ///
    /// Used as a metrics label and in structured log fields.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::BadEscape(_) => "BadEscape",
            Self::BadOwnerName(_) => "BadOwnerName",
            Self::NotImplemented(_) => "NotImplemented",
            Self::UnexpectedToken(_) => "UnexpectedToken",
            Self::NoPerm(_) => "NoPerm",
            Self::NotConnected(_) => "NotConnected",
            Self::TimedOut(_) => "TimedOut",
            Self::Disabled(_) => "Disabled",
            Self::Singleton(_) => "Singleton",
            Self::InvariantViolation(_) => "InvariantViolation",
            Self::ShuttingDown => "ShuttingDown",
            Self::Failure(_) => "Failure",
        }
    }
}

// Conversion from anyhow::Error for plumbing that aggregates foreign errors
impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failure(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Failure(format!("I/O error: {err}"))
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
