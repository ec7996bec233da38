//! Entry identity: the 16-octet `entryUUID` that every reconciliation
//! decision (add/modify/rename/delete, present-set membership) keys on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A 16 raw octet entry UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryUuid([u8; 16]);

impl EntryUuid {
    pub fn from_octets(octets: [u8; 16]) -> Self {
        Self(octets)
    }

    pub fn as_octets(&self) -> &[u8; 16] {
        &self.0
    }

    /// Synthesizes an `entryUUID` from a provider's `nsUniqueId`.
    ///
    /// `nsUniqueId` encodes the same 32 hex digits as a UUID but chunked as
    /// four 8-hex-digit blocks (`aaaaaaaa-bbbbbbbb-cccccccc-dddddddd`)
    /// instead of the UUID syntax's `8-4-4-4-12`. We strip the vendor
    /// hyphenation and re-chunk into UUID form before normalizing.
    pub fn from_ns_unique_id(ns_unique_id: &str) -> Result<Self, UuidParseError> {
        let hex: String = ns_unique_id.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return Err(UuidParseError::BadLength(hex.len()));
        }
        let rechunked = format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        );
        Self::from_str(&rechunked)
    }

    /// Lowercased, hyphenated canonical string form.
    pub fn to_hyphenated_string(self) -> String {
        let h = hex_encode(&self.0);
        format!(
            "{}-{}-{}-{}-{}",
            &h[0..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..32]
        )
    }
}

impl fmt::Display for EntryUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hyphenated_string())
    }
}

impl FromStr for EntryUuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return Err(UuidParseError::BadLength(hex.len()));
        }
        let mut octets = [0u8; 16];
        for i in 0..16 {
            octets[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| UuidParseError::NotHex(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum UuidParseError {
    #[error("uuid has {0} hex digits, expected 32")]
    BadLength(usize),
    #[error("uuid contains non-hex characters: {0}")]
    NotHex(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_then_display_round_trips_lowercased() {
        let uuid: EntryUuid = "12345678-1234-1234-1234-123456789ABC".parse().unwrap();
        assert_eq!(uuid.to_hyphenated_string(), "12345678-1234-1234-1234-123456789abc");
    }

    #[test]
    fn from_ns_unique_id_rechunks_8_8_8_8_into_8_4_4_4_12() {
        // 32 hex digits, chunked vendor-style as 8-8-8-8.
        let ns = "12345678-9abcdef0-12345678-9abcdef0";
        let uuid = EntryUuid::from_ns_unique_id(ns).unwrap();
        assert_eq!(
            uuid.to_hyphenated_string(),
            "12345678-9abc-def0-1234-56789abcdef0"
        );
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("1234".parse::<EntryUuid>().is_err());
    }
}
