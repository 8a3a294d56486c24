// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Zonedir - LDAP-backed dynamic zone database engine
//!
//! Zonedir keeps a DNS server's zones and resource records synchronized
//! with an LDAP directory. It follows the directory with RFC 4533
//! syncrepl, translates every change into a minimal transaction against
//! an in-memory zone database, maintains per-zone SOA-serial
//! monotonicity with journaling, and writes dynamic updates, PTR
//! mirrors and serial bumps back to LDAP.
//!
//! ## Overview
//!
//! This library provides the core synchronization engine, including:
//!
//! - DN ↔ DNS-name conversion and the DNS-to-LDAP value escaper
//! - A bounded LDAP connection pool with reconnect back-off
//! - The syncrepl watcher and the refresh barrier coordinating the
//!   "bulk load → live follow" transition across per-zone tasks
//! - The change applier computing minimal diffs, journaling and
//!   committing versioned transactions
//! - PTR synchronization and forwarder configuration
//!
//! ## Modules
//!
//! - [`instance`] - lifecycle and the public [`Instance`] handle
//! - [`ldap`] - the [`LdapClient`] / [`AuthProvider`] interfaces
//! - [`host`] - the [`HostDns`] interface and the in-memory reference host
//! - [`db`] - the versioned in-memory zone database
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zonedir::{Instance, InstanceConfig};
//! # async fn example(
//! #     client: Arc<dyn zonedir::LdapClient>,
//! #     host: Arc<dyn zonedir::HostDns>,
//! #     auth: Arc<dyn zonedir::AuthProvider>,
//! # ) -> anyhow::Result<()> {
//! let config = InstanceConfig::from_yaml(
//!     "name: ipa\nuri: ldap://ldap.example.test\nbase: cn=dns,dc=example,dc=test\n",
//! )?;
//!
//! let instance = Instance::start(config, client, host, auth).await?;
//! instance.wait_sync_finished().await;
//! // ... serve the synchronized zones ...
//! instance.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Abstract interfaces** - drive any LDAP client and DNS server
//! - **Per-zone serialization** - every zone has its own task queue
//! - **Strict PTR mirroring** - address records keep their reverse
//!   records consistent
//! - **Prometheus metrics** - sync, pool and write-back counters

mod applier;
pub mod barrier;
pub mod constants;
pub mod db;
pub mod dn;
pub mod entry;
pub mod errors;
pub mod fwd;
pub mod host;
pub mod instance;
pub mod journal;
pub mod ldap;
pub mod metrics;
pub mod pool;
pub mod records;
pub mod registry;
pub mod serial;
pub mod settings;
pub mod shared;
pub mod syncptr;
mod watcher;
pub mod writer;
mod zones;

pub use barrier::SyncState;
pub use errors::{SyncError, SyncResult};
pub use host::{HostDns, MemoryHost};
pub use instance::Instance;
pub use ldap::{AuthProvider, LdapClient, LdapHandle};
pub use settings::InstanceConfig;
