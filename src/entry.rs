// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Parsed LDAP entry model.
//!
//! Wraps a wire-level [`RawEntry`] with the pieces the engine needs:
//! object-class flags, attribute access that preserves LDAP ordering,
//! the per-entry TTL and the synthetic SOA assembled from `idnsSOA*`
//! attributes.

use tracing::warn;

use crate::constants::{
    ATTR_DNS_TTL, DEFAULT_TTL_SECS, OBJECTCLASS_CONFIG, OBJECTCLASS_FORWARD_ZONE,
    OBJECTCLASS_RECORD, OBJECTCLASS_ZONE,
};
use crate::dn::attribute_to_rrtype;
use crate::errors::{SyncError, SyncResult};
use crate::ldap::RawEntry;
use hickory_proto::rr::RecordType;

/// Object classes of an entry, derived from its `objectClass` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryClass {
    /// `idnsConfigObject`: the single root configuration entry
    pub config: bool,
    /// `idnsZone`: an authoritative master zone
    pub master: bool,
    /// `idnsForwardZone`: a forward zone
    pub forward: bool,
    /// `idnsRecord`: a resource record entry
    pub record: bool,
}

impl EntryClass {
    /// True when no recognized object class is present.
    #[must_use]
    pub fn is_empty(self) -> bool {
        !(self.config || self.master || self.forward || self.record)
    }
}

/// A parsed LDAP entry.
///
/// Attribute names are matched case-insensitively; attribute and value
/// order is the order the server delivered.
#[derive(Debug, Clone)]
pub struct Entry {
    dn: String,
    class: EntryClass,
    attrs: Vec<(String, Vec<String>)>,
}

impl Entry {
    /// Wrap a raw entry, computing the object-class flags.
    #[must_use]
    pub fn parse(raw: RawEntry) -> Self {
        let mut class = EntryClass::default();
        for (attr, values) in &raw.attrs {
            if !attr.eq_ignore_ascii_case("objectClass") {
                continue;
            }
            for value in values {
                if value.eq_ignore_ascii_case(OBJECTCLASS_CONFIG) {
                    class.config = true;
                } else if value.eq_ignore_ascii_case(OBJECTCLASS_ZONE) {
                    class.master = true;
                } else if value.eq_ignore_ascii_case(OBJECTCLASS_FORWARD_ZONE) {
                    class.forward = true;
                } else if value.eq_ignore_ascii_case(OBJECTCLASS_RECORD) {
                    class.record = true;
                }
            }
        }
        Self {
            dn: raw.dn,
            class,
            attrs: raw.attrs,
        }
    }

    /// The entry's distinguished name.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Object-class flags.
    #[must_use]
    pub fn class(&self) -> EntryClass {
        self.class
    }

    /// All values of an attribute, in server order.
    #[must_use]
    pub fn values(&self, attr: &str) -> Option<&[String]> {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values.as_slice())
    }

    /// First value of an attribute, if any.
    #[must_use]
    pub fn first_value(&self, attr: &str) -> Option<&str> {
        self.values(attr)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Boolean attribute in the directory's `TRUE`/`FALSE` convention.
    #[must_use]
    pub fn bool_value(&self, attr: &str) -> Option<bool> {
        match self.first_value(attr) {
            Some(v) if v.eq_ignore_ascii_case("TRUE") => Some(true),
            Some(v) if v.eq_ignore_ascii_case("FALSE") => Some(false),
            _ => None,
        }
    }

    /// TTL for records of this entry: `dnsTTL` (decimal seconds or an
    /// RFC 1035 unit string such as `1h30m`), defaulting to one day.
    #[must_use]
    pub fn ttl(&self) -> u32 {
        match self.first_value(ATTR_DNS_TTL) {
            None => DEFAULT_TTL_SECS,
            Some(text) => match parse_ttl(text) {
                Ok(ttl) => ttl,
                Err(err) => {
                    warn!(dn = %self.dn, value = text, error = %err,
                          "invalid dnsTTL value, using default");
                    DEFAULT_TTL_SECS
                }
            },
        }
    }

    /// Iterate the RR-typed attributes of this entry as
    /// `(attribute, rrtype, values)`; attributes whose mnemonic is not
    /// a known record type are skipped.
    pub fn rdata_attrs(&self) -> impl Iterator<Item = (&str, RecordType, &[String])> {
        self.attrs.iter().filter_map(|(attr, values)| {
            attribute_to_rrtype(attr).map(|rrtype| (attr.as_str(), rrtype, values.as_slice()))
        })
    }

    /// Assemble the presentation form of this zone entry's SOA from the
    /// `idnsSOA*` attributes.
    ///
    /// A non-empty `fake_mname` overrides the stored master name so
    /// queries resolve against the operator's preferred master.
    ///
    /// # Errors
    ///
    /// `NotFound` when a mandatory SOA attribute is missing.
    pub fn fake_soa(&self, fake_mname: &str) -> SyncResult<String> {
        let soa_attr = |attr: &str| -> SyncResult<&str> {
            self.first_value(attr).ok_or_else(|| {
                SyncError::NotFound(format!("zone entry '{}' has no {attr}", self.dn))
            })
        };

        let mname = if fake_mname.is_empty() {
            soa_attr("idnsSOAmName")?
        } else {
            fake_mname
        };

        Ok(format!(
            "{mname} {} {} {} {} {} {}",
            soa_attr("idnsSOArName")?,
            soa_attr("idnsSOAserial")?,
            soa_attr("idnsSOArefresh")?,
            soa_attr("idnsSOAretry")?,
            soa_attr("idnsSOAexpire")?,
            soa_attr("idnsSOAminimum")?,
        ))
    }
}

/// Parse a TTL: plain decimal seconds or concatenated RFC 1035 unit
/// groups (`w`, `d`, `h`, `m`, `s`).
fn parse_ttl(text: &str) -> SyncResult<u32> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SyncError::UnexpectedToken("empty TTL".to_string()));
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text
            .parse::<u32>()
            .map_err(|_| SyncError::UnexpectedToken(format!("TTL '{text}' out of range")));
    }

    let mut total: u64 = 0;
    let mut number: Option<u64> = None;
    for ch in text.chars() {
        if let Some(digit) = ch.to_digit(10) {
            number = Some(number.unwrap_or(0) * 10 + u64::from(digit));
            continue;
        }
        let value = number
            .take()
            .ok_or_else(|| SyncError::UnexpectedToken(format!("malformed TTL '{text}'")))?;
        let unit: u64 = match ch.to_ascii_lowercase() {
            'w' => 604_800,
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => {
                return Err(SyncError::UnexpectedToken(format!(
                    "unknown TTL unit '{ch}' in '{text}'"
                )))
            }
        };
        total += value * unit;
    }
    // A trailing bare number counts as seconds
    if let Some(value) = number {
        total += value;
    }
    u32::try_from(total)
        .map_err(|_| SyncError::UnexpectedToken(format!("TTL '{text}' out of range")))
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod entry_tests;
