// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! End-to-end tests for the synchronization engine.
//!
//! These tests drive a whole [`zonedir::Instance`] from a scripted LDAP
//! directory and assert on the in-memory zone databases, the journal,
//! the write-backs to LDAP and the in-memory host server.

mod common;

use std::sync::Arc;

use hickory_proto::rr::{RData, RecordType};

use common::{
    config_entry, init_tracing, name, record_dn, record_entry, wait_until, zone_dn, zone_entry,
    ScriptedLdap, TestAuth, BASE_DN,
};
use zonedir::errors::SyncError;
use zonedir::fwd::ForwardPolicy;
use zonedir::journal::Journal;
use zonedir::ldap::{RawEntry, ResultCode, SyncPhase};
use zonedir::records::RrSet;
use zonedir::serial::serial_gt;
use zonedir::{Instance, InstanceConfig, MemoryHost, SyncState};

struct TestBed {
    instance: Instance,
    host: Arc<MemoryHost>,
    ldap: Arc<common::DirectoryState>,
    script: common::SyncScript,
    _dir: tempfile::TempDir,
}

impl TestBed {
    /// Store the entry in the scripted directory and deliver the
    /// matching syncrepl message, like a real server would.
    fn feed(&self, entry: RawEntry, phase: SyncPhase) {
        {
            let mut entries = self.ldap.entries.lock().unwrap();
            if phase == SyncPhase::Delete {
                entries.remove(&entry.dn);
            } else {
                entries.insert(entry.dn.clone(), entry.clone());
            }
        }
        self.script.push_entry(entry, phase);
    }
}

async fn start_engine(config_extra: &str) -> TestBed {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = InstanceConfig::from_yaml(&format!(
        "name: test\nuri: ldap://scripted\nbase: {BASE_DN}\ndirectory: {}\n{config_extra}",
        dir.path().join("work").display()
    ))
    .unwrap();

    let (client, ldap, script) = ScriptedLdap::new();
    let host = Arc::new(MemoryHost::new());
    let instance = Instance::start(config, client, Arc::clone(&host) as _, Arc::new(TestAuth))
        .await
        .unwrap();

    TestBed {
        instance,
        host,
        ldap,
        script,
        _dir: dir,
    }
}

fn a_rrset(ttl: u32, ips: &[&str]) -> RrSet {
    let mut rrset = RrSet::new(RecordType::A, ttl);
    for ip in ips {
        rrset
            .rdatas
            .push(RData::A(hickory_proto::rr::rdata::A(ip.parse().unwrap())));
    }
    rrset
}

/// Scenario 1: initial load of one zone with one record.
#[tokio::test]
async fn test_initial_zone_load() {
    let bed = start_engine("").await;

    bed.feed(zone_entry("example.test.", 5, &[]), SyncPhase::Add);
    bed.feed(
        record_entry("www", "example.test.", &[("ARecord", &["192.0.2.1"])]),
        SyncPhase::Add,
    );
    bed.script.push_refresh_done();

    bed.instance.wait_sync_finished().await;
    assert_eq!(bed.instance.sync_state(), SyncState::Finished);

    let db = bed.instance.zone_db(&name("example.test.")).unwrap();
    // The record and the synthetic SOA are in the database.
    let rrsets = db.node_rrsets(&name("www.example.test."));
    assert_eq!(rrsets.len(), 1);
    assert_eq!(rrsets[0].rrtype, RecordType::A);
    assert_eq!(
        zonedir::records::rdata_to_text(&rrsets[0].rdatas[0]),
        "192.0.2.1"
    );

    // The serial equals the one stored in LDAP.
    assert_eq!(db.soa_serial(), Some(5));
    assert_eq!(
        bed.ldap.attr(&zone_dn("example.test."), "idnsSOAserial"),
        Some("5".to_string())
    );

    // No journal was written during the initial load.
    let journal = bed.instance.journal_path(&name("example.test.")).unwrap();
    assert!(!journal.exists());

    // The zone is published and loaded on the host.
    let state = bed.host.zone_state(&name("example.test.")).unwrap();
    assert!(state.published);
    assert!(state.loaded);

    assert!(!bed.instance.is_tainted());
    bed.instance.shutdown().await;
}

/// Scenario 2: a record added after the refresh bumps the serial,
/// writes a journal transaction and updates LDAP.
#[tokio::test]
async fn test_post_refresh_record_add() {
    let bed = start_engine("").await;

    bed.feed(zone_entry("example.test.", 5, &[]), SyncPhase::Add);
    bed.feed(
        record_entry("www", "example.test.", &[("ARecord", &["192.0.2.1"])]),
        SyncPhase::Add,
    );
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;

    let db = bed.instance.zone_db(&name("example.test.")).unwrap();
    let initial_serial = db.soa_serial().unwrap();

    // Live change: the www entry gains an AAAA record.
    bed.feed(
        record_entry(
            "www",
            "example.test.",
            &[
                ("ARecord", &["192.0.2.1"]),
                ("AAAARecord", &["2001:db8::1"]),
            ],
        ),
        SyncPhase::Modify,
    );

    let db_clone = Arc::clone(&db);
    wait_until("AAAA record applied", move || {
        db_clone
            .node_rrsets(&name("www.example.test."))
            .iter()
            .any(|rrset| rrset.rrtype == RecordType::AAAA)
    })
    .await;

    // Both address records exist now.
    let rrsets = db.node_rrsets(&name("www.example.test."));
    assert_eq!(rrsets.len(), 2);

    // The serial moved strictly forward and was written back to LDAP.
    let new_serial = db.soa_serial().unwrap();
    assert!(serial_gt(new_serial, initial_serial));
    assert_eq!(
        bed.ldap.attr(&zone_dn("example.test."), "idnsSOAserial"),
        Some(new_serial.to_string())
    );

    // Exactly one transaction in the journal.
    let journal = bed.instance.journal_path(&name("example.test.")).unwrap();
    let transactions = Journal::read_transactions(&journal).unwrap();
    assert_eq!(transactions.len(), 1);
    // The transaction carries the AAAA addition and the SOA bump.
    let rrtypes: Vec<&str> = transactions[0]
        .tuples
        .iter()
        .map(|tuple| tuple.rrtype.as_str())
        .collect();
    assert!(rrtypes.contains(&"AAAA"));
    assert!(rrtypes.contains(&"SOA"));

    bed.instance.shutdown().await;
}

/// Scenario 3: an A-record write mirrors a PTR in the reverse zone.
#[tokio::test]
async fn test_sync_ptr_mirrors_forward_write() {
    let bed = start_engine("").await;

    bed.feed(
        zone_entry(
            "example.test.",
            5,
            &[("idnsAllowSyncPTR", &["TRUE"])],
        ),
        SyncPhase::Add,
    );
    bed.feed(
        zone_entry(
            "2.0.192.in-addr.arpa.",
            1,
            &[("idnsAllowDynUpdate", &["TRUE"])],
        ),
        SyncPhase::Add,
    );
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;

    // Dynamic update: add www A 192.0.2.1.
    bed.instance
        .write_records(&name("www.example.test."), &a_rrset(300, &["192.0.2.1"]))
        .await
        .unwrap();

    // The forward record landed in LDAP...
    assert_eq!(
        bed.ldap
            .attr(&record_dn("www", "example.test."), "ARecord"),
        Some("192.0.2.1".to_string())
    );
    // ...and so did the mirrored PTR.
    assert_eq!(
        bed.ldap
            .attr(&record_dn("1", "2.0.192.in-addr.arpa."), "PTRRecord"),
        Some("www.example.test.".to_string())
    );

    // Applying the same add again is a no-op.
    let writes_before = bed.ldap.write_count();
    bed.instance
        .write_records(&name("www.example.test."), &a_rrset(300, &["192.0.2.1"]))
        .await
        .unwrap();
    // The forward write repeats, but no second PTR write happens.
    let log = bed.ldap.write_log.lock().unwrap().clone();
    let ptr_writes = log
        .iter()
        .filter(|op| op.contains("2.0.192.in-addr.arpa"))
        .count();
    assert_eq!(ptr_writes, 1);
    assert!(bed.ldap.write_count() > writes_before);

    bed.instance.shutdown().await;
}

/// PTR synchronization failures fail the forward write.
#[tokio::test]
async fn test_sync_ptr_failure_fails_forward_write() {
    let bed = start_engine("").await;

    // Reverse zone exists but refuses dynamic updates.
    bed.feed(
        zone_entry(
            "example.test.",
            5,
            &[("idnsAllowSyncPTR", &["TRUE"])],
        ),
        SyncPhase::Add,
    );
    bed.feed(zone_entry("2.0.192.in-addr.arpa.", 1, &[]), SyncPhase::Add);
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;

    let err = bed
        .instance
        .write_records(&name("www.example.test."), &a_rrset(300, &["192.0.2.1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoPerm(_)));

    bed.instance.shutdown().await;
}

/// Scenario 4: global forwarders from the configuration object.
#[tokio::test]
async fn test_global_forwarders() {
    let bed = start_engine("").await;

    bed.feed(
        config_entry(&[
            ("idnsForwarders", &["198.51.100.1"]),
            ("idnsForwardPolicy", &["only"]),
        ]),
        SyncPhase::Add,
    );
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;

    let host = Arc::clone(&bed.host);
    wait_until("root forwarders installed", move || {
        host.forwarders(&hickory_proto::rr::Name::root()).is_some()
    })
    .await;

    let fwd = bed
        .host
        .forwarders(&hickory_proto::rr::Name::root())
        .unwrap();
    assert_eq!(fwd.policy, ForwardPolicy::Only);
    assert_eq!(fwd.addrs, vec!["198.51.100.1:53".parse().unwrap()]);
    assert!(bed.host.flush_count() >= 1);

    bed.instance.shutdown().await;
}

/// Scenario 5: invalid simple-bind credentials fail startup loudly.
#[tokio::test]
async fn test_invalid_credentials_fail_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = InstanceConfig::from_yaml(&format!(
        "name: test\nuri: ldap://scripted\nbase: {BASE_DN}\ndirectory: {}\n\
         auth_method: simple\nbind_dn: cn=admin\npassword: wrong\n",
        dir.path().join("work").display()
    ))
    .unwrap();

    let (client, ldap, _script) = ScriptedLdap::new();
    *ldap.bind_result.lock().unwrap() = Some(ResultCode::InvalidCredentials);

    let host = Arc::new(MemoryHost::new());
    let err = Instance::start(config, client, host as _, Arc::new(TestAuth))
        .await
        .unwrap_err();
    let sync_err = err.downcast_ref::<SyncError>().expect("engine error");
    assert!(matches!(sync_err, SyncError::NoPerm(_)));
}

/// Scenario 6: a serial rewind without data changes is refused.
#[tokio::test]
async fn test_serial_rewind_refused() {
    let bed = start_engine("").await;

    bed.feed(zone_entry("example.test.", 5, &[]), SyncPhase::Add);
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;

    let db = bed.instance.zone_db(&name("example.test.")).unwrap();
    assert_eq!(db.soa_serial(), Some(5));
    let writes_before = bed.ldap.write_count();

    // The same zone entry with a lower serial and no other change.
    bed.feed(zone_entry("example.test.", 3, &[]), SyncPhase::Modify);

    // Give the event time to flow through the zone task.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    // The diff was discarded: serial unchanged, LDAP not rewritten.
    assert_eq!(db.soa_serial(), Some(5));
    assert_eq!(bed.ldap.write_count(), writes_before);

    bed.instance.shutdown().await;
}

/// Deactivating a zone removes it from the registry and the host.
#[tokio::test]
async fn test_zone_deactivation_removes_zone() {
    let bed = start_engine("").await;

    bed.feed(zone_entry("example.test.", 5, &[]), SyncPhase::Add);
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;
    assert!(bed.host.zone_exists(&name("example.test.")));

    let mut inactive = zone_entry("example.test.", 5, &[]);
    for (attr, values) in &mut inactive.attrs {
        if attr == "idnsZoneActive" {
            values[0] = "FALSE".to_string();
        }
    }
    bed.feed(inactive, SyncPhase::Modify);

    let host = Arc::clone(&bed.host);
    wait_until("zone removed from host", move || {
        !host.zone_exists(&name("example.test."))
    })
    .await;
    assert!(bed.instance.zone_db(&name("example.test.")).is_none());

    bed.instance.shutdown().await;
}

/// A deleted record entry empties the node but keeps the zone.
#[tokio::test]
async fn test_record_delete_removes_node() {
    let bed = start_engine("").await;

    bed.feed(zone_entry("example.test.", 5, &[]), SyncPhase::Add);
    bed.feed(
        record_entry("www", "example.test.", &[("ARecord", &["192.0.2.1"])]),
        SyncPhase::Add,
    );
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;

    let db = bed.instance.zone_db(&name("example.test.")).unwrap();
    assert_eq!(db.node_rrsets(&name("www.example.test.")).len(), 1);

    // Deletions carry only the DN.
    bed.feed(
        RawEntry {
            dn: record_dn("www", "example.test."),
            attrs: vec![],
        },
        SyncPhase::Delete,
    );

    let db_clone = Arc::clone(&db);
    wait_until("record removed", move || {
        db_clone.node_rrsets(&name("www.example.test.")).is_empty()
    })
    .await;

    // The zone itself survives with a bumped serial.
    assert!(serial_gt(db.soa_serial().unwrap(), 5));
    bed.instance.shutdown().await;
}

/// A forward-zone entry installs forwarders; master data is untouched.
#[tokio::test]
async fn test_forward_zone_entry() {
    let bed = start_engine("").await;

    let mut entry = zone_entry("fwd.test.", 1, &[]);
    entry.attrs = vec![
        (
            "objectClass".to_string(),
            vec!["top".to_string(), "idnsForwardZone".to_string()],
        ),
        ("idnsName".to_string(), vec!["fwd.test.".to_string()]),
        ("idnsZoneActive".to_string(), vec!["TRUE".to_string()]),
        (
            "idnsForwarders".to_string(),
            vec!["203.0.113.5".to_string()],
        ),
        ("idnsForwardPolicy".to_string(), vec!["first".to_string()]),
    ];
    bed.feed(entry, SyncPhase::Add);
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;

    let fwd = bed.host.forwarders(&name("fwd.test.")).unwrap();
    assert_eq!(fwd.policy, ForwardPolicy::First);
    assert_eq!(fwd.addrs, vec!["203.0.113.5:53".parse().unwrap()]);
    // Forward zones are not master zones.
    assert!(bed.instance.zone_db(&name("fwd.test.")).is_none());

    bed.instance.shutdown().await;
}

/// A broken entry is dropped, the instance keeps running and is marked
/// tainted.
#[tokio::test]
async fn test_broken_entry_taints_but_does_not_stop() {
    let bed = start_engine("").await;

    // An entry whose DN has no idnsName component.
    bed.feed(
        RawEntry {
            dn: format!("cn=bogus, {BASE_DN}"),
            attrs: vec![(
                "objectClass".to_string(),
                vec!["idnsRecord".to_string()],
            )],
        },
        SyncPhase::Add,
    );
    bed.feed(zone_entry("example.test.", 5, &[]), SyncPhase::Add);
    bed.script.push_refresh_done();

    bed.instance.wait_sync_finished().await;
    assert!(bed.instance.is_tainted());
    assert!(bed.instance.zone_db(&name("example.test.")).is_some());

    bed.instance.shutdown().await;
}

/// Zone ACLs from the entry reach the host; an entry without the
/// attribute clears the ACL again.
#[tokio::test]
async fn test_zone_acls_follow_entry() {
    let bed = start_engine("").await;

    bed.feed(
        zone_entry(
            "example.test.",
            5,
            &[
                ("idnsAllowQuery", &["192.0.2.0/24;"]),
                ("idnsAllowTransfer", &["none;"]),
            ],
        ),
        SyncPhase::Add,
    );
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;

    let state = bed.host.zone_state(&name("example.test.")).unwrap();
    assert_eq!(state.allow_query.as_deref(), Some("192.0.2.0/24;"));
    assert_eq!(state.allow_transfer.as_deref(), Some("none;"));

    // The same entry without ACL attributes clears them on the host.
    bed.feed(zone_entry("example.test.", 5, &[]), SyncPhase::Modify);
    let host = Arc::clone(&bed.host);
    wait_until("ACLs cleared", move || {
        host.zone_state(&name("example.test."))
            .is_some_and(|state| state.allow_query.is_none() && state.allow_transfer.is_none())
    })
    .await;

    bed.instance.shutdown().await;
}

/// Per-zone settings fall back through the global layer: a global
/// `idnsAllowSyncPTR` enables PTR mirroring for zones without their own
/// value.
#[tokio::test]
async fn test_global_config_settings_cascade() {
    let bed = start_engine("").await;

    bed.feed(
        config_entry(&[("idnsAllowSyncPTR", &["TRUE"])]),
        SyncPhase::Add,
    );
    // Neither zone carries idnsAllowSyncPTR itself.
    bed.feed(zone_entry("example.test.", 5, &[]), SyncPhase::Add);
    bed.feed(
        zone_entry(
            "2.0.192.in-addr.arpa.",
            1,
            &[("idnsAllowDynUpdate", &["TRUE"])],
        ),
        SyncPhase::Add,
    );
    bed.script.push_refresh_done();
    bed.instance.wait_sync_finished().await;

    bed.instance
        .write_records(&name("www.example.test."), &a_rrset(300, &["192.0.2.1"]))
        .await
        .unwrap();

    assert!(bed
        .ldap
        .has_entry(&record_dn("1", "2.0.192.in-addr.arpa.")));

    bed.instance.shutdown().await;
}
