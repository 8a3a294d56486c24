// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! LDAP DN ↔ DNS name conversion and value escaping.
//!
//! Zone entries live at `idnsName=<zone>, <base>` and record entries at
//! `idnsName=<owner>, idnsName=<zone>, <base>`; this module converts
//! between those DNs and absolute DNS names, and escapes DNS
//! presentation-form data for embedding in DNs.
//!
//! The DNS-to-LDAP escaper mangles input that originally came from the
//! network and is security sensitive: every octet outside the safe set
//! is re-emitted as an LDAP hex escape before it can reach a DN.

use std::str::FromStr;

use hickory_proto::rr::{Name, RecordType};
use tracing::debug;

use crate::constants::{ATTR_IDNS_NAME, RECORD_ATTR_SUFFIX};
use crate::errors::{SyncError, SyncResult};

/// One `attr=value` component of a DN, value unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    pub attr: String,
    pub value: String,
}

/// A parsed distinguished name: RDNs ordered left to right.
///
/// Multi-valued RDNs (`cn=a+sn=b`) are rejected at parse time; the
/// engine does not support them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// Parse an LDAPv3 string representation (RFC 4514).
    pub fn parse(input: &str) -> SyncResult<Self> {
        let mut rdns = Vec::new();
        for component in split_unescaped(input, ',') {
            let component = component.trim();
            if component.is_empty() {
                return Err(SyncError::UnexpectedToken(format!(
                    "empty RDN in DN '{input}'"
                )));
            }
            if split_unescaped(component, '+').count() > 1 {
                return Err(SyncError::NotImplemented(
                    "multi-valued RDNs are not supported".to_string(),
                ));
            }
            let eq = find_unescaped(component, '=').ok_or_else(|| {
                SyncError::UnexpectedToken(format!("RDN without '=' in DN '{input}'"))
            })?;
            let attr = component[..eq].trim();
            if attr.is_empty() {
                return Err(SyncError::UnexpectedToken(format!(
                    "RDN with empty attribute in DN '{input}'"
                )));
            }
            let value = unescape_ldap_value(component[eq + 1..].trim())?;
            rdns.push(Rdn {
                attr: attr.to_string(),
                value,
            });
        }
        if rdns.is_empty() {
            return Err(SyncError::UnexpectedToken(format!("empty DN '{input}'")));
        }
        Ok(Self { rdns })
    }

    /// RDNs from most to least specific.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }
}

/// Names derived from a zone or record entry DN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnNames {
    /// Absolute owner name of the entry's data
    pub name: Name,
    /// Absolute zone name; the root name for zone entries themselves
    pub zone: Name,
}

/// Convert an entry DN to absolute DNS names.
///
/// Takes the first one or two consecutive `idnsName` RDNs. With one, the
/// DN denotes a zone entry: `name` is the zone apex and `zone` is the
/// root. With two, the DN denotes a record entry: `name` is the owner
/// (relative labels appended to the zone) and `zone` is the zone apex.
/// The owner must be a strict sub-domain of the zone; equality would
/// redefine the apex and is rejected.
///
/// # Errors
///
/// `NotImplemented` for multi-valued RDNs, `UnexpectedToken` when no
/// `idnsName` component is present, `BadOwnerName` for out-of-zone or
/// apex-redefining owners.
pub fn dn_to_name(dn_str: &str) -> SyncResult<DnNames> {
    let dn = Dn::parse(dn_str).inspect_err(|err| {
        debug!(dn = dn_str, error = %err, "failed to parse DN");
    })?;

    let mut idns_values = Vec::new();
    for rdn in dn.rdns() {
        if !rdn.attr.eq_ignore_ascii_case(ATTR_IDNS_NAME) {
            break;
        }
        idns_values.push(rdn.value.as_str());
        if idns_values.len() == 2 {
            break;
        }
    }

    let names = match idns_values.len() {
        0 => Err(SyncError::UnexpectedToken(format!(
            "no idnsName component found in DN '{dn_str}'"
        ))),
        1 => {
            let name = parse_name(idns_values[0], &Name::root())?;
            Ok(DnNames {
                name,
                zone: Name::root(),
            })
        }
        _ => {
            let zone = parse_name(idns_values[1], &Name::root())?;
            let name = parse_name(idns_values[0], &zone)?;
            if !zone.zone_of(&name) {
                return Err(SyncError::BadOwnerName(format!(
                    "out-of-zone data: '{name}' is not a subdomain of '{zone}'"
                )));
            }
            if name == zone {
                return Err(SyncError::BadOwnerName(format!(
                    "attempt to redefine zone apex '{zone}'"
                )));
            }
            Ok(DnNames { name, zone })
        }
    };

    names.inspect_err(|err| {
        debug!(dn = dn_str, error = %err, "failed to convert DN to DNS name");
    })
}

/// Format the labels of `owner` below `zone` as one escaped
/// `idnsName=` RDN, ready to be prefixed to the zone's DN.
///
/// `owner` must be a strict sub-domain of `zone`.
pub fn relative_rdn(owner: &Name, zone: &Name) -> SyncResult<String> {
    debug_assert!(zone.zone_of(owner));
    let extra = usize::from(owner.num_labels()) - usize::from(zone.num_labels());
    let relative = owner
        .iter()
        .take(extra)
        .map(label_to_presentation)
        .collect::<Vec<_>>()
        .join(".");
    let escaped = escape_dns_to_ldap(&relative)?;
    Ok(format!("{ATTR_IDNS_NAME}={escaped}"))
}

/// Convert a string from DNS escaping to LDAP escaping.
///
/// The input is presentation-form DNS data: `[a-zA-Z0-9._-]` passes
/// through, `\DDD` (three decimal digits) and `\c` escapes are decoded
/// to the underlying octet, and every non-preserved octet is re-emitted
/// as `\hh` (lower-case hex), the LDAP escape form.
///
/// # Errors
///
/// `BadEscape` on a truncated or non-numeric `\DDD` escape.
pub fn escape_dns_to_ldap(dns_str: &str) -> SyncResult<String> {
    let bytes = dns_str.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        if b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_' {
            out.push(b as char);
            idx += 1;
            continue;
        }

        let octet = if b == b'\\' {
            let next = *bytes
                .get(idx + 1)
                .ok_or_else(|| SyncError::BadEscape(dns_str.to_string()))?;
            if next.is_ascii_digit() {
                if idx + 3 >= bytes.len()
                    || !bytes[idx + 2].is_ascii_digit()
                    || !bytes[idx + 3].is_ascii_digit()
                {
                    return Err(SyncError::BadEscape(dns_str.to_string()));
                }
                let value = u32::from(next - b'0') * 100
                    + u32::from(bytes[idx + 2] - b'0') * 10
                    + u32::from(bytes[idx + 3] - b'0');
                if value > 255 {
                    return Err(SyncError::BadEscape(dns_str.to_string()));
                }
                idx += 4;
                value as u8
            } else {
                idx += 2;
                next
            }
        } else {
            idx += 1;
            b
        };

        out.push_str(&format!("\\{octet:02x}"));
    }

    Ok(out)
}

/// Decode LDAP value escapes (`\hh` and `\c`) back to raw octets.
pub fn unescape_ldap_value(value: &str) -> SyncResult<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;

    while idx < bytes.len() {
        if bytes[idx] != b'\\' {
            out.push(bytes[idx]);
            idx += 1;
            continue;
        }
        let next = *bytes
            .get(idx + 1)
            .ok_or_else(|| SyncError::BadEscape(value.to_string()))?;
        if next.is_ascii_hexdigit() && bytes.get(idx + 2).is_some_and(u8::is_ascii_hexdigit) {
            let hex = &value[idx + 1..idx + 3];
            let octet =
                u8::from_str_radix(hex, 16).map_err(|_| SyncError::BadEscape(value.to_string()))?;
            out.push(octet);
            idx += 3;
        } else {
            out.push(next);
            idx += 2;
        }
    }

    String::from_utf8(out).map_err(|_| SyncError::BadEscape(value.to_string()))
}

/// Compare two DNs for equality after LDAPv3 normalization.
///
/// Attribute names and values are compared case-insensitively with
/// escapes resolved, so `CN=X, DC=y` equals `cn=x,dc=Y`.
pub fn dn_equal_normalized(left: &str, right: &str) -> SyncResult<bool> {
    let left = Dn::parse(left)?;
    let right = Dn::parse(right)?;
    if left.rdns().len() != right.rdns().len() {
        return Ok(false);
    }
    Ok(left.rdns().iter().zip(right.rdns()).all(|(a, b)| {
        a.attr.eq_ignore_ascii_case(&b.attr) && a.value.eq_ignore_ascii_case(&b.value)
    }))
}

/// Map an RR-typed attribute name (`<mnemonic>Record`, suffix compared
/// case-insensitively) to its record type. Unknown mnemonics yield
/// `None` and are skipped by callers.
#[must_use]
pub fn attribute_to_rrtype(attr: &str) -> Option<RecordType> {
    let suffix_len = RECORD_ATTR_SUFFIX.len();
    if attr.len() <= suffix_len {
        return None;
    }
    let (mnemonic, suffix) = attr.split_at(attr.len() - suffix_len);
    if !suffix.eq_ignore_ascii_case(RECORD_ATTR_SUFFIX) {
        return None;
    }
    RecordType::from_str(&mnemonic.to_ascii_uppercase()).ok()
}

/// Attribute name storing records of the given type.
#[must_use]
pub fn rrtype_to_attribute(rrtype: RecordType) -> String {
    format!("{rrtype}{RECORD_ATTR_SUFFIX}")
}

/// Parse a possibly-relative presentation-form name against an origin.
///
/// `@` denotes the origin itself, as in zone files.
pub fn parse_name(text: &str, origin: &Name) -> SyncResult<Name> {
    if text == "@" {
        return Ok(origin.clone());
    }
    Name::parse(text, Some(origin))
        .map_err(|err| SyncError::UnexpectedToken(format!("invalid DNS name '{text}': {err}")))
}

/// Presentation form of one raw label, escaping the characters the DNS
/// text format reserves.
fn label_to_presentation(label: &[u8]) -> String {
    let mut out = String::with_capacity(label.len());
    for &b in label {
        match b {
            b'"' | b'(' | b')' | b'.' | b';' | b'\\' | b'@' | b'$' => {
                out.push('\\');
                out.push(b as char);
            }
            0x21..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\{b:03}")),
        }
    }
    out
}

/// Split on an unescaped separator, keeping escape sequences intact.
fn split_unescaped(input: &str, sep: char) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let bytes = input.as_bytes();
    let mut start = 0;
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'\\' {
            idx += 2;
            continue;
        }
        if bytes[idx] == sep as u8 {
            parts.push(&input[start..idx]);
            start = idx + 1;
        }
        idx += 1;
    }
    parts.push(&input[start.min(input.len())..]);
    parts.into_iter()
}

/// Byte position of the first unescaped occurrence of `needle`.
fn find_unescaped(input: &str, needle: char) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'\\' {
            idx += 2;
            continue;
        }
        if bytes[idx] == needle as u8 {
            return Some(idx);
        }
        idx += 1;
    }
    None
}

#[cfg(test)]
#[path = "dn_tests.rs"]
mod dn_tests;
