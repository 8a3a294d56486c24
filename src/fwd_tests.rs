// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `fwd.rs`

use std::str::FromStr;

use hickory_proto::rr::Name;

use crate::entry::Entry;
use crate::errors::SyncError;
use crate::fwd::{configure_forwarders, parse_forwarder, ForwardPolicy, ForwardRegister, Forwarders};
use crate::host::{HostDns, MemoryHost};
use crate::ldap::RawEntry;

fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

fn fwd_entry(dn: &str, policy: Option<&str>, forwarders: &[&str]) -> Entry {
    let mut attrs: Vec<(String, Vec<String>)> =
        vec![("objectClass".into(), vec!["idnsForwardZone".into()])];
    if let Some(policy) = policy {
        attrs.push(("idnsForwardPolicy".into(), vec![policy.into()]));
    }
    if !forwarders.is_empty() {
        attrs.push((
            "idnsForwarders".into(),
            forwarders.iter().map(|f| (*f).to_string()).collect(),
        ));
    }
    Entry::parse(RawEntry {
        dn: dn.to_string(),
        attrs,
    })
}

#[test]
fn test_parse_forwarder_default_port() {
    assert_eq!(
        parse_forwarder("198.51.100.1").unwrap(),
        "198.51.100.1:53".parse().unwrap()
    );
    assert_eq!(
        parse_forwarder("198.51.100.1:5353").unwrap(),
        "198.51.100.1:5353".parse().unwrap()
    );
    assert_eq!(
        parse_forwarder("[2001:db8::1]:53").unwrap(),
        "[2001:db8::1]:53".parse().unwrap()
    );
    assert!(parse_forwarder("not-an-ip").is_err());
}

#[tokio::test]
async fn test_configure_forwarders_only_policy() {
    let host = MemoryHost::new();
    let entry = fwd_entry("cn=dns,dc=x", Some("only"), &["198.51.100.1"]);

    configure_forwarders(&host, &entry, &Name::root())
        .await
        .unwrap();

    let fwd = host.forwarders(&Name::root()).unwrap();
    assert_eq!(fwd.policy, ForwardPolicy::Only);
    assert_eq!(fwd.addrs, vec!["198.51.100.1:53".parse().unwrap()]);
    assert_eq!(host.flush_count(), 1);
}

#[tokio::test]
async fn test_configure_forwarders_unchanged_does_not_flush() {
    let host = MemoryHost::new();
    let entry = fwd_entry("cn=dns,dc=x", Some("only"), &["198.51.100.1"]);

    configure_forwarders(&host, &entry, &Name::root())
        .await
        .unwrap();
    configure_forwarders(&host, &entry, &Name::root())
        .await
        .unwrap();
    // Identical settings: table untouched, single flush in total.
    assert_eq!(host.flush_count(), 1);
}

#[tokio::test]
async fn test_configure_forwarders_policy_change_flushes() {
    let host = MemoryHost::new();
    let zone = name("fwd.test.");

    configure_forwarders(
        &host,
        &fwd_entry("idnsName=fwd.test.,cn=dns,dc=x", Some("first"), &["198.51.100.1"]),
        &zone,
    )
    .await
    .unwrap();
    configure_forwarders(
        &host,
        &fwd_entry("idnsName=fwd.test.,cn=dns,dc=x", Some("only"), &["198.51.100.1"]),
        &zone,
    )
    .await
    .unwrap();

    assert_eq!(host.forwarders(&zone).unwrap().policy, ForwardPolicy::Only);
    assert_eq!(host.flush_count(), 2);
}

#[tokio::test]
async fn test_configure_forwarders_policy_none_is_disabled() {
    let host = MemoryHost::new();
    let zone = name("fwd.test.");
    let entry = fwd_entry(
        "idnsName=fwd.test.,cn=dns,dc=x",
        Some("none"),
        &["198.51.100.1"],
    );

    let err = configure_forwarders(&host, &entry, &zone).await.unwrap_err();
    assert!(matches!(err, SyncError::Disabled(_)));
    // The list is ignored under policy none; the entry is present but
    // empty, shutting forwarding off for the zone.
    let fwd = host.forwarders(&zone).unwrap();
    assert_eq!(fwd.policy, ForwardPolicy::None);
    assert!(fwd.addrs.is_empty());
}

#[tokio::test]
async fn test_configure_zone_without_forwarders_removes_entry() {
    let host = MemoryHost::new();
    let zone = name("fwd.test.");
    host.replace_forwarders(
        &zone,
        Forwarders {
            policy: ForwardPolicy::First,
            addrs: vec!["198.51.100.9:53".parse().unwrap()],
        },
    )
    .await
    .unwrap();

    let entry = fwd_entry("idnsName=fwd.test.,cn=dns,dc=x", None, &[]);
    let err = configure_forwarders(&host, &entry, &zone).await.unwrap_err();
    assert!(matches!(err, SyncError::Disabled(_)));
    assert!(host.forwarders(&zone).is_none());
}

#[tokio::test]
async fn test_configure_global_without_forwarders_uses_original() {
    let original = Forwarders {
        policy: ForwardPolicy::First,
        addrs: vec!["203.0.113.7:53".parse().unwrap()],
    };
    let host = MemoryHost::with_global_forwarders(original.clone());

    let entry = fwd_entry("cn=dns,dc=x", None, &[]);
    configure_forwarders(&host, &entry, &Name::root())
        .await
        .unwrap();
    assert_eq!(host.forwarders(&Name::root()).unwrap(), original);
}

#[tokio::test]
async fn test_configure_forwarders_invalid_policy() {
    let host = MemoryHost::new();
    let entry = fwd_entry("cn=dns,dc=x", Some("sometimes"), &["198.51.100.1"]);
    let err = configure_forwarders(&host, &entry, &Name::root())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnexpectedToken(_)));
    assert!(host.forwarders(&Name::root()).is_none());
}

#[tokio::test]
async fn test_configure_forwarders_skips_invalid_entries() {
    let host = MemoryHost::new();
    let entry = fwd_entry(
        "cn=dns,dc=x",
        Some("first"),
        &["bogus", "198.51.100.1", "also-bogus"],
    );
    configure_forwarders(&host, &entry, &Name::root())
        .await
        .unwrap();
    assert_eq!(host.forwarders(&Name::root()).unwrap().addrs.len(), 1);
}

#[tokio::test]
async fn test_configure_forwarders_all_invalid_is_error() {
    let host = MemoryHost::new();
    let entry = fwd_entry("cn=dns,dc=x", Some("first"), &["bogus", "also-bogus"]);
    let err = configure_forwarders(&host, &entry, &Name::root())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnexpectedToken(_)));
}

#[test]
fn test_forward_register() {
    let register = ForwardRegister::new();
    let zone = name("fwd.test.");
    assert!(!register.contains(&zone));
    register.add(&zone);
    register.add(&zone);
    assert!(register.contains(&zone));
    assert_eq!(register.names(), vec![zone.clone()]);
    register.remove(&zone);
    assert!(!register.contains(&zone));
}
