// SPDX-License-Identifier: Apache-2.0

//! Diversifier derivation: the canonical suffix that distinguishes variants
//! of the same endpoint in stub filenames.
//!
//! The canonical form sorts keys lexicographically, sorts values within each
//! key, URL-encodes both sides and joins pairs with `&`. The suffix hashes
//! that form with 64-bit FNV-1a rendered as 16 lowercase hex characters, so
//! it is deterministic across platforms and insertion orders.

use std::collections::BTreeMap;

use crate::policy::Policy;

/// Derives the diversifier for a request under `policy`.
///
/// Path variables contribute a `p-` part when the endpoint enables path
/// variants; query parameters contribute a `q-` part unless query variants
/// are disabled. Non-empty parts are joined with `--`; the result may be
/// empty.
#[must_use]
pub fn request_diversifier(
    policy: &Policy,
    endpoint_name: &str,
    query: &[(String, String)],
    path_vars: &BTreeMap<String, String>,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(2);

    if policy.path_variant_enabled(endpoint_name).0 {
        let pairs: Vec<(String, String)> = path_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let p = path_diversifier(&pairs);
        if !p.is_empty() {
            parts.push(p);
        }
    }
    if policy.query_variant_enabled(endpoint_name).0 {
        let q = query_diversifier(query);
        if !q.is_empty() {
            parts.push(q);
        }
    }
    parts.join("--")
}

#[must_use]
pub fn query_diversifier(pairs: &[(String, String)]) -> String {
    let normalized = normalize_values(pairs);
    if normalized.is_empty() {
        return String::new();
    }
    format!("q-{}", hash64_hex(&normalized))
}

#[must_use]
pub fn path_diversifier(pairs: &[(String, String)]) -> String {
    let normalized = normalize_values(pairs);
    if normalized.is_empty() {
        return String::new();
    }
    format!("p-{}", hash64_hex(&normalized))
}

/// Canonical form of a multi-valued key/value set.
#[must_use]
pub fn normalize_values(pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (key, value) in pairs {
        grouped.entry(key.as_str()).or_default().push(value.as_str());
    }

    let mut out = String::new();
    for (key, mut values) in grouped {
        values.sort_unstable();
        for value in values {
            if !out.is_empty() {
                out.push('&');
            }
            out.push_str(&query_escape(key));
            out.push('=');
            out.push_str(&query_escape(value));
        }
    }
    out
}

fn hash64_hex(value: &str) -> String {
    format!("{:016x}", fnv1a_64(value.as_bytes()))
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Form-encodes a single key or value: unreserved bytes pass through,
/// space becomes `+`, everything else `%XX`.
#[must_use]
pub fn query_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &b in value.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(hex_upper(b >> 4));
                out.push(hex_upper(b & 0x0f));
            }
        }
    }
    out
}

/// Inverse of [`query_escape`]. Malformed percent escapes pass through
/// verbatim rather than failing: the diversifier must never reject a
/// request the upstream would accept.
#[must_use]
pub fn query_unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Splits a raw query string into decoded key/value pairs, preserving
/// duplicates and order of appearance.
#[must_use]
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) => (query_unescape(key), query_unescape(value)),
            None => (query_unescape(segment), String::new()),
        })
        .collect()
}

fn hex_upper(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16)
        .unwrap_or('0')
        .to_ascii_uppercase()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
