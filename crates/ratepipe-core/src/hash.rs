//! Fingerprinting: the resume/dedup key computed from a work item's merged
//! data map.
//!
//! A fingerprint is the first 128 bits of the BLAKE3 hash of the canonical
//! JSON serialization of the data map (keys sorted, so insertion order never
//! affects the result).

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// A 128-bit fingerprint, split into two `u64` halves so it round-trips
/// through the log file as `"{hi:x}|{lo:x}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash128 {
    pub hi: u64,
    pub lo: u64,
}

impl Hash128 {
    /// Hash the canonical JSON form of `data`.
    pub fn of(data: &BTreeMap<String, String>) -> Self {
        let canonical = canonical_json(data);
        let digest = blake3::hash(canonical.as_bytes());
        let bytes = digest.as_bytes();
        let hi = u64::from_be_bytes(bytes[0..8].try_into().expect("8 bytes"));
        let lo = u64::from_be_bytes(bytes[8..16].try_into().expect("8 bytes"));
        Hash128 { hi, lo }
    }

    /// Parse the `"{hex}|{hex}"` log-column form.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (hi_s, lo_s) = s
            .split_once('|')
            .ok_or_else(|| format!("malformed hash column: {s:?}"))?;
        let hi = u64::from_str_radix(hi_s, 16).map_err(|e| e.to_string())?;
        let lo = u64::from_str_radix(lo_s, 16).map_err(|e| e.to_string())?;
        Ok(Hash128 { hi, lo })
    }
}

impl fmt::Display for Hash128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}|{:x}", self.hi, self.lo)
    }
}

/// Render `data` as JSON with keys in sorted order, stable across runs.
///
/// `BTreeMap` already iterates in key order, so serializing it through
/// `serde_json::Value::Object` (built from a `BTreeMap`, which `serde_json`
/// preserves in sorted order even when the `preserve_order` feature is
/// absent) is sufficient; we build the `Value` by hand to avoid any
/// dependency on serde_json's internal map ordering guarantees.
pub fn canonical_json(data: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(data.len() * 16 + 2);
    out.push('{');
    for (i, (k, v)) in data.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        out.push_str(&Value::String(v.clone()).to_string());
    }
    out.push('}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn fingerprint_is_stable_across_key_order() {
        let a = map(&[("a", "1"), ("b", "2")]);
        let b = map(&[("b", "2"), ("a", "1")]);
        assert_eq!(Hash128::of(&a), Hash128::of(&b));
    }

    #[test]
    fn fingerprint_differs_for_different_values() {
        let a = map(&[("a", "1")]);
        let b = map(&[("a", "2")]);
        assert_ne!(Hash128::of(&a), Hash128::of(&b));
    }

    #[test]
    fn canonical_json_is_byte_stable() {
        let a = map(&[("x", "y"), ("z", "w")]);
        assert_eq!(canonical_json(&a), canonical_json(&a));
    }

    #[test]
    fn display_and_parse_round_trip() {
        let h = Hash128 { hi: 0xdead_beef, lo: 0x1234 };
        let s = h.to_string();
        let parsed = Hash128::parse(&s).expect("should parse");
        assert_eq!(h, parsed);
    }

    #[test]
    fn parse_rejects_malformed_column() {
        assert!(Hash128::parse("not-a-hash").is_err());
    }

    #[test]
    fn empty_map_produces_braces() {
        let empty = BTreeMap::new();
        assert_eq!(canonical_json(&empty), "{}");
    }
}
