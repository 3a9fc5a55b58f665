//! MAC address normalization
//!
//! Inventory MACs are typed in by hand in every notation imaginable
//! (`aa-bb-cc-dd-ee-ff`, `aabb.ccdd.eeff`, `AABBCCDDEEFF`), while switches
//! report them colon-separated. Everything is compared in canonical form:
//! six uppercase octets joined by colons.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of hex digits in a 48-bit MAC
const MAC_DIGITS: usize = 12;

/// Input that does not reduce to exactly twelve hex digits
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed MAC address {raw:?}")]
pub struct MalformedMac {
    raw: String,
}

impl MalformedMac {
    fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
        }
    }

    /// The rejected input, unchanged
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Strip everything but letters and digits, uppercased
fn clean(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

fn is_hex(digits: &str) -> bool {
    digits.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalize a MAC written in any common notation.
pub fn normalize(raw: &str) -> Result<CanonicalMac, MalformedMac> {
    let digits = clean(raw);
    if digits.len() != MAC_DIGITS || !is_hex(&digits) {
        return Err(MalformedMac::new(raw));
    }

    let mut canonical = String::with_capacity(17);
    for (i, pair) in digits.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            canonical.push(':');
        }
        // ASCII hex digits only at this point
        canonical.push(pair[0] as char);
        canonical.push(pair[1] as char);
    }
    Ok(CanonicalMac(canonical))
}

/// A MAC in `AA:BB:CC:DD:EE:FF` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalMac(String);

impl CanonicalMac {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the address starts with the given vendor/management prefix
    pub fn has_prefix(&self, prefix: &MacPrefix) -> bool {
        let digits: String = self.0.chars().filter(|&c| c != ':').collect();
        digits.starts_with(prefix.digits())
    }
}

impl fmt::Display for CanonicalMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CanonicalMac {
    type Err = MalformedMac;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

impl TryFrom<String> for CanonicalMac {
    type Error = MalformedMac;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        normalize(&value)
    }
}

impl From<CanonicalMac> for String {
    fn from(mac: CanonicalMac) -> Self {
        mac.0
    }
}

/// Leading part of a MAC (usually an OUI such as `D4:01:C3`).
///
/// Written in any notation; compared on its hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacPrefix {
    digits: String,
    display: String,
}

impl MacPrefix {
    fn digits(&self) -> &str {
        &self.digits
    }
}

impl FromStr for MacPrefix {
    type Err = MalformedMac;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = clean(s);
        if digits.is_empty() || digits.len() > MAC_DIGITS || !is_hex(&digits) {
            return Err(MalformedMac::new(s));
        }
        let display = digits
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect::<Vec<_>>()
            .join(":");
        Ok(Self { digits, display })
    }
}

impl fmt::Display for MacPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}
