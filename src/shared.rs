// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Process-shared state for a running instance.
//!
//! Collects the mutable singletons the engine needs in one place: the
//! shutdown flag with its wakeup, the Kerberos `kinit` lock serializing
//! credential refresh across all connections, and the taint marker set
//! when an entry had to be dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

/// Shared mutable state owned by the instance and handed to background
/// tasks as an `Arc`.
#[derive(Debug, Default)]
pub struct Shared {
    /// Set once at shutdown; read by every loop. The watcher's shutdown
    /// path is the only writer.
    exiting: AtomicBool,

    /// Woken when `exiting` flips, interrupting blocking waits.
    shutdown: Notify,

    /// Serializes GSSAPI credential refresh; TGT acquisition is not
    /// reentrant.
    pub kinit_lock: Mutex<()>,

    /// Set when an entry was dropped because it could not be parsed;
    /// the in-memory data may be incomplete until the next full refresh.
    tainted: AtomicBool,
}

impl Shared {
    /// Whether shutdown has been requested.
    #[must_use]
    pub fn exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Request shutdown and wake all blocked waits.
    pub fn set_exiting(&self) {
        self.exiting.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Wait until shutdown is requested.
    pub async fn wait_shutdown(&self) {
        if self.exiting() {
            return;
        }
        self.shutdown.notified().await;
    }

    /// Sleep that ends early on shutdown.
    ///
    /// Returns `false` if the instance is exiting and the caller should
    /// terminate its loop, `true` after a full sleep.
    pub async fn sane_sleep(&self, duration: Duration) -> bool {
        if self.exiting() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.shutdown.notified() => false,
        }
    }

    /// Mark the in-memory data as possibly incomplete.
    pub fn taint(&self) {
        if !self.tainted.swap(true, Ordering::SeqCst) {
            crate::metrics::set_tainted(true);
        }
    }

    /// Whether an entry has been dropped since startup.
    #[must_use]
    pub fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::SeqCst)
    }
}
