// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the zonedir engine.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// LDAP Schema Constants
// ============================================================================

/// Object class marking the single root configuration entry
pub const OBJECTCLASS_CONFIG: &str = "idnsConfigObject";

/// Object class marking an authoritative master zone entry
pub const OBJECTCLASS_ZONE: &str = "idnsZone";

/// Object class marking a forward zone entry
pub const OBJECTCLASS_FORWARD_ZONE: &str = "idnsForwardZone";

/// Object class marking a resource record entry
pub const OBJECTCLASS_RECORD: &str = "idnsRecord";

/// RDN attribute carrying zone apexes and record owner labels
pub const ATTR_IDNS_NAME: &str = "idnsName";

/// Attribute toggling a zone between served and unloaded
pub const ATTR_ZONE_ACTIVE: &str = "idnsZoneActive";

/// Per-entry TTL attribute
pub const ATTR_DNS_TTL: &str = "dnsTTL";

/// Suffix of every RR-typed attribute (`ARecord`, `AAAARecord`, ...)
pub const RECORD_ATTR_SUFFIX: &str = "Record";

/// SOA serial attribute, the only SOA field replaced on serial bumps
pub const ATTR_SOA_SERIAL: &str = "idnsSOAserial";

/// Syncrepl search filter covering every entry the engine consumes
pub const SYNC_FILTER: &str = "(|(objectClass=idnsConfigObject)\
(objectClass=idnsZone)\
(objectClass=idnsForwardZone)\
(objectClass=idnsRecord))";

// ============================================================================
// DNS Protocol Constants
// ============================================================================

/// Standard DNS port, appended to forwarders given without a port
pub const DNS_PORT: u16 = 53;

/// Default TTL for records without a `dnsTTL` attribute (1 day)
pub const DEFAULT_TTL_SECS: u32 = 86_400;

// ============================================================================
// Connection Pool Constants
// ============================================================================

/// Minimum pool size: the watcher needs one connection and the
/// update paths need a second one
pub const MIN_POOL_CONNECTIONS: u32 = 2;

/// Reconnect back-off schedule in seconds; the final entry means
/// "cap at `reconnect_interval`"
pub const RECONNECT_SCHEDULE_SECS: [u64; 4] = [2, 5, 20, u64::MAX];

/// Multiplier applied to the operation timeout when waiting for a free
/// pool slot before declaring a potential deadlock
pub const SEM_WAIT_TIMEOUT_MUL: u32 = 10;

// ============================================================================
// Synchronization Constants
// ============================================================================

/// Maximum number of syncrepl events in flight before the watcher
/// blocks; bounds memory use during the initial bulk refresh
pub const SYNC_CONCURRENCY_LIMIT: usize = 64;

/// Delay before the watcher retries a failed sync-session setup
pub const SYNC_PREPARE_RETRY_SECS: u64 = 1;

// ============================================================================
// Settings Defaults
// ============================================================================

/// Default LDAP operation timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u32 = 10;

/// Default cap on the reconnect back-off in seconds
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u32 = 60;

/// Default SASL mechanism
pub const DEFAULT_SASL_MECH: &str = "GSSAPI";

/// Working-directory prefix used when no `directory` is configured
pub const DEFAULT_DIRECTORY_PREFIX: &str = "dyndb-ldap";

// ============================================================================
// Filesystem Layout Constants
// ============================================================================

/// Subdirectory of the working directory holding per-zone data
pub const MASTER_SUBDIR: &str = "master";

/// File name of the raw (unsigned) zone file inside a zone directory
pub const RAW_ZONE_FILE: &str = "raw";

/// File name of the zone journal inside a zone directory
pub const JOURNAL_FILE: &str = "raw.jnl";

/// Subdirectory for DNSSEC key storage inside a zone directory
pub const KEYS_SUBDIR: &str = "keys";
