// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! RRset model and presentation-form rdata handling.
//!
//! Converts between the text values stored in RR-typed LDAP attributes
//! (`ARecord: 192.0.2.1`) and owned [`RData`] values, and assembles a
//! whole LDAP entry into the list of RRsets it defines, including the
//! SOA synthesized for master-zone entries.

use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_proto::rr::rdata::{A, AAAA, CNAME, MX, NS, PTR, SOA, SRV, TXT};
use hickory_proto::rr::{Name, RData, RecordType};

use crate::dn::parse_name;
use crate::entry::Entry;
use crate::errors::{SyncError, SyncResult};

/// One RRset: every rdata shares the type and TTL. Class is always IN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrSet {
    pub rrtype: RecordType,
    pub ttl: u32,
    pub rdatas: Vec<RData>,
}

impl RrSet {
    /// Empty RRset of the given type and TTL.
    #[must_use]
    pub fn new(rrtype: RecordType, ttl: u32) -> Self {
        Self {
            rrtype,
            ttl,
            rdatas: Vec::new(),
        }
    }
}

/// The RRsets defined by one owner name, in entry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RrSetList {
    sets: Vec<RrSet>,
}

impl RrSetList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RrSet> {
        self.sets.iter()
    }

    /// The RRset of the given type, if present.
    #[must_use]
    pub fn find(&self, rrtype: RecordType) -> Option<&RrSet> {
        self.sets.iter().find(|set| set.rrtype == rrtype)
    }

    /// Existing RRset of the given type, or a fresh one appended to the
    /// list.
    ///
    /// # Errors
    ///
    /// `NotImplemented` when an RRset of the type already exists with a
    /// different TTL; mixed TTLs within one rdata list are not
    /// supported.
    pub fn find_or_create(&mut self, rrtype: RecordType, ttl: u32) -> SyncResult<&mut RrSet> {
        if let Some(idx) = self.sets.iter().position(|set| set.rrtype == rrtype) {
            if self.sets[idx].ttl != ttl {
                return Err(SyncError::NotImplemented(
                    "different TTLs in single rdata list are not supported".to_string(),
                ));
            }
            return Ok(&mut self.sets[idx]);
        }
        self.sets.push(RrSet::new(rrtype, ttl));
        Ok(self.sets.last_mut().expect("just pushed"))
    }
}

impl IntoIterator for RrSetList {
    type Item = RrSet;
    type IntoIter = std::vec::IntoIter<RrSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.sets.into_iter()
    }
}

/// Parse an entry into the RRsets it defines at `origin`-relative names.
///
/// Master-zone entries first synthesize the SOA RRset from the
/// `idnsSOA*` attributes (`fake_mname` overriding the stored master
/// name). Every `<TYPE>Record` value is then parsed from presentation
/// form with the entry's origin; attribute mnemonics that are not known
/// record types were already skipped by [`Entry::rdata_attrs`].
pub fn parse_rrentry(entry: &Entry, origin: &Name, fake_mname: &str) -> SyncResult<RrSetList> {
    let mut list = RrSetList::new();
    let ttl = entry.ttl();

    if entry.class().master {
        let soa_text = entry.fake_soa(fake_mname)?;
        let rdata = parse_rdata(RecordType::SOA, &soa_text, origin)?;
        list.find_or_create(RecordType::SOA, ttl)?.rdatas.push(rdata);
    }

    for (_attr, rrtype, values) in entry.rdata_attrs() {
        let set = list.find_or_create(rrtype, ttl)?;
        for value in values {
            set.rdatas.push(parse_rdata(rrtype, value, origin)?);
        }
    }

    Ok(list)
}

/// Parse one presentation-form rdata value.
///
/// # Errors
///
/// `UnexpectedToken` for malformed values, `NotImplemented` for record
/// types the engine does not store.
pub fn parse_rdata(rrtype: RecordType, text: &str, origin: &Name) -> SyncResult<RData> {
    let tokens = tokenize(text)?;
    let bad = |what: &str| {
        SyncError::UnexpectedToken(format!("malformed {rrtype} rdata '{text}': {what}"))
    };

    let expect = |count: usize| -> SyncResult<()> {
        if tokens.len() == count {
            Ok(())
        } else {
            Err(bad("wrong field count"))
        }
    };

    match rrtype {
        RecordType::A => {
            expect(1)?;
            let addr: Ipv4Addr = tokens[0].parse().map_err(|_| bad("invalid IPv4 address"))?;
            Ok(RData::A(A(addr)))
        }
        RecordType::AAAA => {
            expect(1)?;
            let addr: Ipv6Addr = tokens[0].parse().map_err(|_| bad("invalid IPv6 address"))?;
            Ok(RData::AAAA(AAAA(addr)))
        }
        RecordType::NS => {
            expect(1)?;
            Ok(RData::NS(NS(parse_name(&tokens[0], origin)?)))
        }
        RecordType::CNAME => {
            expect(1)?;
            Ok(RData::CNAME(CNAME(parse_name(&tokens[0], origin)?)))
        }
        RecordType::PTR => {
            expect(1)?;
            Ok(RData::PTR(PTR(parse_name(&tokens[0], origin)?)))
        }
        RecordType::MX => {
            expect(2)?;
            let preference: u16 = tokens[0].parse().map_err(|_| bad("invalid preference"))?;
            Ok(RData::MX(MX::new(
                preference,
                parse_name(&tokens[1], origin)?,
            )))
        }
        RecordType::TXT => {
            if tokens.is_empty() {
                return Err(bad("empty TXT value"));
            }
            Ok(RData::TXT(TXT::new(tokens)))
        }
        RecordType::SRV => {
            expect(4)?;
            let priority: u16 = tokens[0].parse().map_err(|_| bad("invalid priority"))?;
            let weight: u16 = tokens[1].parse().map_err(|_| bad("invalid weight"))?;
            let port: u16 = tokens[2].parse().map_err(|_| bad("invalid port"))?;
            Ok(RData::SRV(SRV::new(
                priority,
                weight,
                port,
                parse_name(&tokens[3], origin)?,
            )))
        }
        RecordType::SOA => {
            expect(7)?;
            let serial: u32 = tokens[2].parse().map_err(|_| bad("invalid serial"))?;
            let refresh: i32 = tokens[3].parse().map_err(|_| bad("invalid refresh"))?;
            let retry: i32 = tokens[4].parse().map_err(|_| bad("invalid retry"))?;
            let expire: i32 = tokens[5].parse().map_err(|_| bad("invalid expire"))?;
            let minimum: u32 = tokens[6].parse().map_err(|_| bad("invalid minimum"))?;
            Ok(RData::SOA(SOA::new(
                parse_name(&tokens[0], origin)?,
                parse_name(&tokens[1], origin)?,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            )))
        }
        other => Err(SyncError::NotImplemented(format!(
            "record type {other} is not supported"
        ))),
    }
}

/// Presentation form of one rdata, suitable for an LDAP attribute value.
#[must_use]
pub fn rdata_to_text(rdata: &RData) -> String {
    match rdata {
        RData::A(a) => a.0.to_string(),
        RData::AAAA(aaaa) => aaaa.0.to_string(),
        RData::NS(ns) => ns.0.to_string(),
        RData::CNAME(cname) => cname.0.to_string(),
        RData::PTR(ptr) => ptr.0.to_string(),
        RData::MX(mx) => format!("{} {}", mx.preference(), mx.exchange()),
        RData::TXT(txt) => txt
            .txt_data()
            .iter()
            .map(|chunk| format!("\"{}\"", String::from_utf8_lossy(chunk).replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(" "),
        RData::SRV(srv) => format!(
            "{} {} {} {}",
            srv.priority(),
            srv.weight(),
            srv.port(),
            srv.target()
        ),
        RData::SOA(soa) => format!(
            "{} {} {} {} {} {} {}",
            soa.mname(),
            soa.rname(),
            soa.serial(),
            soa.refresh(),
            soa.retry(),
            soa.expire(),
            soa.minimum()
        ),
        other => format!("{other:?}"),
    }
}

/// Serial of an SOA rdata, if this is one.
#[must_use]
pub fn soa_serial(rdata: &RData) -> Option<u32> {
    match rdata {
        RData::SOA(soa) => Some(soa.serial()),
        _ => None,
    }
}

/// Copy of an SOA rdata with the serial replaced.
///
/// # Panics
///
/// Panics when `rdata` is not an SOA; callers check first.
#[must_use]
pub fn with_soa_serial(rdata: &RData, serial: u32) -> RData {
    match rdata {
        RData::SOA(soa) => RData::SOA(SOA::new(
            soa.mname().clone(),
            soa.rname().clone(),
            serial,
            soa.refresh(),
            soa.retry(),
            soa.expire(),
            soa.minimum(),
        )),
        other => panic!("with_soa_serial called on {other:?}"),
    }
}

/// Split a presentation-form value into tokens, honoring quoted
/// character strings (TXT data may contain whitespace).
fn tokenize(text: &str) -> SyncResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => {
                                return Err(SyncError::UnexpectedToken(format!(
                                    "unterminated escape in '{text}'"
                                )))
                            }
                        },
                        Some('"') => break,
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(SyncError::UnexpectedToken(format!(
                                "unterminated quoted string in '{text}'"
                            )))
                        }
                    }
                }
                tokens.push(std::mem::take(&mut current));
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod records_tests;
