// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the zonedir engine.
//!
//! All metrics live in one registry with the namespace prefix
//! `zonedir_`. The crate never binds a listener; hosts expose
//! [`render`] on whatever endpoint they already serve.
//!
//! # Metrics Categories
//!
//! - **Synchronization Metrics** - syncrepl events by action and outcome,
//!   barrier state
//! - **Connection Metrics** - pool reconnect attempts
//! - **Write-back Metrics** - SOA serial write-backs and PTR mirrors
//! - **Health Metrics** - zone count and the tainted flag

use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::LazyLock;

use crate::barrier::SyncState;
use crate::ldap::ModOp;

/// Namespace prefix for all engine metrics
const METRICS_NAMESPACE: &str = "zonedir";

/// Global metrics registry.
///
/// All metrics are registered here and exposed via [`render`].
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Total number of processed syncrepl events
///
/// Labels:
/// - `action`: handler (`config`, `zone`, `record`, `dispatch`)
/// - `status`: `ok` or the error reason code
pub static SYNC_EVENTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_sync_events_total"),
        "Total number of processed syncrepl events by action and status",
    );
    let counter = CounterVec::new(opts, &["action", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of LDAP connection (re)establishment attempts
pub static RECONNECTS_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconnects_total"),
        "Total number of LDAP connection establishment attempts",
    );
    let counter = Counter::with_opts(opts).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of SOA serial write-backs to LDAP
///
/// Labels:
/// - `status`: `ok` or `error`
pub static SOA_WRITEBACKS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_soa_writebacks_total"),
        "Total number of SOA serial write-backs to LDAP by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of PTR synchronization attempts
///
/// Labels:
/// - `op`: `add` or `delete`
/// - `status`: `ok`, `skipped` or `error`
pub static PTR_SYNC_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_ptr_sync_total"),
        "Total number of PTR record synchronization attempts by operation and status",
    );
    let counter = CounterVec::new(opts, &["op", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Current phase of the initial synchronization (0=init, 1=datainit,
/// 2=refresh_done, 3=finished)
pub static SYNC_STATE: LazyLock<Gauge> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_sync_state"),
        "Current phase of the initial synchronization",
    );
    let gauge = Gauge::with_opts(opts).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Number of zones currently registered
pub static ZONES: LazyLock<Gauge> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_zones"),
        "Number of zones currently registered",
    );
    let gauge = Gauge::with_opts(opts).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Whether an entry had to be dropped since startup (0 or 1)
pub static TAINTED: LazyLock<Gauge> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_tainted"),
        "Whether an entry had to be dropped since startup",
    );
    let gauge = Gauge::with_opts(opts).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Record one processed syncrepl event.
pub fn record_sync_event(action: &str, status: &str) {
    SYNC_EVENTS_TOTAL.with_label_values(&[action, status]).inc();
}

/// Record one LDAP connection establishment attempt.
pub fn record_reconnect() {
    RECONNECTS_TOTAL.inc();
}

/// Record one SOA serial write-back.
pub fn record_soa_writeback(ok: bool) {
    SOA_WRITEBACKS_TOTAL
        .with_label_values(&[if ok { "ok" } else { "error" }])
        .inc();
}

/// Record one PTR synchronization attempt.
pub fn record_ptr_sync(op: ModOp, status: &str) {
    let op = match op {
        ModOp::Add => "add",
        ModOp::Delete => "delete",
        ModOp::Replace => "replace",
    };
    PTR_SYNC_TOTAL.with_label_values(&[op, status]).inc();
}

/// Update the synchronization state gauge.
pub fn set_sync_state(state: SyncState) {
    let value = match state {
        SyncState::Init => 0.0,
        SyncState::DataInit => 1.0,
        SyncState::RefreshDone => 2.0,
        SyncState::Finished => 3.0,
    };
    SYNC_STATE.set(value);
}

/// Update the registered-zone gauge.
pub fn set_zone_count(count: usize) {
    // Gauges are f64; zone counts fit comfortably.
    ZONES.set(count as f64);
}

/// Update the tainted flag gauge.
pub fn set_tainted(tainted: bool) {
    TAINTED.set(if tainted { 1.0 } else { 0.0 });
}

/// Render every metric in the Prometheus text exposition format.
#[must_use]
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder
        .encode(&METRICS_REGISTRY.gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
