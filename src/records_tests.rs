// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `records.rs`

use std::str::FromStr;

use hickory_proto::rr::{Name, RData, RecordType};

use crate::entry::Entry;
use crate::errors::SyncError;
use crate::ldap::RawEntry;
use crate::records::{parse_rdata, parse_rrentry, rdata_to_text, soa_serial, with_soa_serial};

fn origin() -> Name {
    Name::from_str("example.test.").unwrap()
}

fn record_entry(attrs: &[(&str, &[&str])]) -> Entry {
    let mut all: Vec<(String, Vec<String>)> =
        vec![("objectClass".into(), vec!["idnsRecord".into()])];
    all.extend(attrs.iter().map(|(name, values)| {
        (
            (*name).to_string(),
            values.iter().map(|v| (*v).to_string()).collect(),
        )
    }));
    Entry::parse(RawEntry {
        dn: "idnsName=www,idnsName=example.test.,cn=dns,dc=x".to_string(),
        attrs: all,
    })
}

#[test]
fn test_parse_a_record() {
    let rdata = parse_rdata(RecordType::A, "192.0.2.1", &origin()).unwrap();
    assert_eq!(rdata_to_text(&rdata), "192.0.2.1");
}

#[test]
fn test_parse_aaaa_record() {
    let rdata = parse_rdata(RecordType::AAAA, "2001:db8::1", &origin()).unwrap();
    assert_eq!(rdata_to_text(&rdata), "2001:db8::1");
}

#[test]
fn test_parse_relative_name_uses_origin() {
    let rdata = parse_rdata(RecordType::CNAME, "web", &origin()).unwrap();
    assert_eq!(rdata_to_text(&rdata), "web.example.test.");
}

#[test]
fn test_parse_mx_record() {
    let rdata = parse_rdata(RecordType::MX, "10 mail.example.test.", &origin()).unwrap();
    assert_eq!(rdata_to_text(&rdata), "10 mail.example.test.");
}

#[test]
fn test_parse_srv_record() {
    let rdata =
        parse_rdata(RecordType::SRV, "0 100 389 ldap.example.test.", &origin()).unwrap();
    assert_eq!(rdata_to_text(&rdata), "0 100 389 ldap.example.test.");
}

#[test]
fn test_parse_txt_with_quotes() {
    let rdata = parse_rdata(RecordType::TXT, "\"v=spf1 -all\"", &origin()).unwrap();
    assert_eq!(rdata_to_text(&rdata), "\"v=spf1 -all\"");
}

#[test]
fn test_parse_soa_record() {
    let rdata = parse_rdata(
        RecordType::SOA,
        "ns1.example.test. hostmaster.example.test. 5 3600 900 604800 3600",
        &origin(),
    )
    .unwrap();
    assert_eq!(soa_serial(&rdata), Some(5));
    assert_eq!(
        rdata_to_text(&rdata),
        "ns1.example.test. hostmaster.example.test. 5 3600 900 604800 3600"
    );
}

#[test]
fn test_parse_rejects_malformed_rdata() {
    assert!(matches!(
        parse_rdata(RecordType::A, "not-an-ip", &origin()),
        Err(SyncError::UnexpectedToken(_))
    ));
    assert!(matches!(
        parse_rdata(RecordType::MX, "10", &origin()),
        Err(SyncError::UnexpectedToken(_))
    ));
}

#[test]
fn test_parse_unsupported_type() {
    assert!(matches!(
        parse_rdata(RecordType::NAPTR, "x", &origin()),
        Err(SyncError::NotImplemented(_))
    ));
}

#[test]
fn test_with_soa_serial_replaces_only_serial() {
    let rdata = parse_rdata(
        RecordType::SOA,
        "ns1.example.test. hostmaster.example.test. 5 3600 900 604800 3600",
        &origin(),
    )
    .unwrap();
    let bumped = with_soa_serial(&rdata, 42);
    assert_eq!(soa_serial(&bumped), Some(42));
    match (&rdata, &bumped) {
        (RData::SOA(old), RData::SOA(new)) => {
            assert_eq!(old.mname(), new.mname());
            assert_eq!(old.refresh(), new.refresh());
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_parse_rrentry_groups_by_type() {
    let entry = record_entry(&[
        ("ARecord", &["192.0.2.1", "192.0.2.2"]),
        ("AAAARecord", &["2001:db8::1"]),
        ("dnsTTL", &["300"]),
    ]);
    let list = parse_rrentry(&entry, &origin(), "").unwrap();
    assert_eq!(list.len(), 2);
    let a_set = list.find(RecordType::A).unwrap();
    assert_eq!(a_set.rdatas.len(), 2);
    assert_eq!(a_set.ttl, 300);
    assert_eq!(list.find(RecordType::AAAA).unwrap().rdatas.len(), 1);
}

#[test]
fn test_parse_rrentry_master_synthesizes_soa() {
    let entry = Entry::parse(RawEntry {
        dn: "idnsName=example.test.,cn=dns,dc=x".to_string(),
        attrs: vec![
            ("objectClass".into(), vec!["idnsZone".into()]),
            ("idnsSOAmName".into(), vec!["ns1.example.test.".into()]),
            ("idnsSOArName".into(), vec!["hostmaster".into()]),
            ("idnsSOAserial".into(), vec!["7".into()]),
            ("idnsSOArefresh".into(), vec!["3600".into()]),
            ("idnsSOAretry".into(), vec!["900".into()]),
            ("idnsSOAexpire".into(), vec!["604800".into()]),
            ("idnsSOAminimum".into(), vec!["3600".into()]),
            ("NSRecord".into(), vec!["ns1".into()]),
        ],
    });
    let list = parse_rrentry(&entry, &origin(), "").unwrap();
    let soa = list.find(RecordType::SOA).unwrap();
    assert_eq!(soa_serial(&soa.rdatas[0]), Some(7));
    assert!(list.find(RecordType::NS).is_some());
}

#[test]
fn test_parse_rrentry_fake_mname_override() {
    let entry = Entry::parse(RawEntry {
        dn: "idnsName=example.test.,cn=dns,dc=x".to_string(),
        attrs: vec![
            ("objectClass".into(), vec!["idnsZone".into()]),
            ("idnsSOAmName".into(), vec!["ns1.example.test.".into()]),
            ("idnsSOArName".into(), vec!["hostmaster".into()]),
            ("idnsSOAserial".into(), vec!["7".into()]),
            ("idnsSOArefresh".into(), vec!["3600".into()]),
            ("idnsSOAretry".into(), vec!["900".into()]),
            ("idnsSOAexpire".into(), vec!["604800".into()]),
            ("idnsSOAminimum".into(), vec!["3600".into()]),
        ],
    });
    let list = parse_rrentry(&entry, &origin(), "hidden.master.test.").unwrap();
    let soa = &list.find(RecordType::SOA).unwrap().rdatas[0];
    match soa {
        RData::SOA(soa) => {
            assert_eq!(soa.mname(), &Name::from_str("hidden.master.test.").unwrap());
        }
        _ => unreachable!(),
    }
}
