// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `journal.rs`

use std::str::FromStr;

use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData};

use crate::db::{Diff, DiffOp, DiffTuple};
use crate::journal::Journal;

fn a_tuple(op: DiffOp, ip: &str) -> DiffTuple {
    DiffTuple {
        op,
        name: Name::from_str("www.example.test.").unwrap(),
        ttl: 300,
        rdata: RData::A(A(ip.parse().unwrap())),
    }
}

#[test]
fn test_journal_append_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.jnl");

    let mut diff = Diff::new();
    diff.append_minimal(a_tuple(DiffOp::Del, "192.0.2.1"));
    diff.append_minimal(a_tuple(DiffOp::Add, "192.0.2.2"));

    let mut journal = Journal::open(&path).unwrap();
    journal.write_transaction(&diff).unwrap();

    let mut second = Diff::new();
    second.append_minimal(a_tuple(DiffOp::Add, "192.0.2.3"));
    journal.write_transaction(&second).unwrap();

    let transactions = Journal::read_transactions(&path).unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0].tuples.len(), 2);
    assert_eq!(transactions[0].tuples[0].op, "del");
    assert_eq!(transactions[0].tuples[0].rrtype, "A");
    assert_eq!(transactions[0].tuples[1].rdata, "192.0.2.2");
    assert_eq!(transactions[1].tuples[0].op, "add");
}

#[test]
fn test_journal_reopen_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.jnl");

    let mut diff = Diff::new();
    diff.append_minimal(a_tuple(DiffOp::Add, "192.0.2.1"));

    {
        let mut journal = Journal::open(&path).unwrap();
        journal.write_transaction(&diff).unwrap();
    }
    {
        let mut journal = Journal::open(&path).unwrap();
        journal.write_transaction(&diff).unwrap();
    }

    assert_eq!(Journal::read_transactions(&path).unwrap().len(), 2);
}
