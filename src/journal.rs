// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Append-only zone transaction journal.
//!
//! Every committed post-refresh transaction is appended to the zone's
//! journal file so the host server can replay changes and answer IXFR.
//! Transactions are stored as JSON lines, one line per transaction.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::db::{Diff, DiffOp};
use crate::errors::{SyncError, SyncResult};
use crate::records::rdata_to_text;

/// Wire form of one journal tuple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalTuple {
    pub op: String,
    pub name: String,
    pub ttl: u32,
    pub rrtype: String,
    pub rdata: String,
}

/// Wire form of one committed transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalTransaction {
    pub tuples: Vec<JournalTuple>,
}

/// An open zone journal.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: std::fs::File,
}

impl Journal {
    /// Open the journal at `path`, creating it on first use.
    pub fn open(path: &Path) -> SyncResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| {
                SyncError::Failure(format!("cannot open journal '{}': {err}", path.display()))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append one committed transaction.
    pub fn write_transaction(&mut self, diff: &Diff) -> SyncResult<()> {
        let transaction = JournalTransaction {
            tuples: diff
                .tuples()
                .iter()
                .map(|tuple| JournalTuple {
                    op: match tuple.op {
                        DiffOp::Del => "del".to_string(),
                        DiffOp::Add => "add".to_string(),
                    },
                    name: tuple.name.to_string(),
                    ttl: tuple.ttl,
                    rrtype: tuple.rrtype().to_string(),
                    rdata: rdata_to_text(&tuple.rdata),
                })
                .collect(),
        };
        let line = serde_json::to_string(&transaction)
            .map_err(|err| SyncError::Failure(format!("cannot serialize transaction: {err}")))?;
        writeln!(self.file, "{line}").map_err(|err| {
            SyncError::Failure(format!(
                "cannot append to journal '{}': {err}",
                self.path.display()
            ))
        })?;
        self.file.flush()?;
        Ok(())
    }

    /// Read back every stored transaction. Used by tests and by hosts
    /// replaying the journal.
    pub fn read_transactions(path: &Path) -> SyncResult<Vec<JournalTransaction>> {
        let file = std::fs::File::open(path).map_err(|err| {
            SyncError::Failure(format!("cannot read journal '{}': {err}", path.display()))
        })?;
        let mut transactions = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let transaction = serde_json::from_str(&line).map_err(|err| {
                SyncError::Failure(format!(
                    "corrupt journal line in '{}': {err}",
                    path.display()
                ))
            })?;
            transactions.push(transaction);
        }
        Ok(transactions)
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod journal_tests;
