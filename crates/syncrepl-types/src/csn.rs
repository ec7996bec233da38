//! Change-sequence numbers and server ids.
//!
//! A CSN is an opaque, totally-ordered string: a UTC timestamp, a per-second
//! counter, the originating server id, and a micro-counter that breaks ties
//! within the same tick on the same server. Comparison is lexicographic over
//! the octets of the canonical form -- because every field is fixed-width,
//! that is the same order as comparing the parsed fields, so we derive `Ord`
//! on the parsed tuple rather than keeping the string around for comparisons.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Server id tagging the originating provider of a CSN (3 hex digits, 0..=4095).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sid(u16);

/// Reserved sid marker meaning "unknown" -- cookie entries tagged with it are
/// skipped during a merge (spec: "skip any sid equal to -1").
pub const SID_UNKNOWN: Sid = Sid(0xFFF);

impl Sid {
    pub const MAX: u16 = 0xFFF;

    pub fn new(value: u16) -> Self {
        assert!(value <= Self::MAX, "sid {value} exceeds 3 hex digits");
        Self(value)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_unknown(self) -> bool {
        self == SID_UNKNOWN
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03x}", self.0)
    }
}

impl FromStr for Sid {
    type Err = CsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 3 {
            return Err(CsnParseError::BadSid(s.to_string()));
        }
        let value = u16::from_str_radix(s, 16).map_err(|_| CsnParseError::BadSid(s.to_string()))?;
        Ok(Self(value))
    }
}

/// A change-sequence number: `<timestamp>Z#<counter>#<sid>#<mod>`.
///
/// `timestamp` is `yyyymmddhhmmss.ffffff` (UTC, fixed width), `counter` is a
/// 6-hex-digit per-second sequence number, `sid` is the 3-hex-digit server
/// id, and `mod` is a 6-hex-digit micro-counter used to order CSNs minted in
/// the same tick by the same server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Csn {
    timestamp: [u8; 21], // "yyyymmddhhmmss.ffffff", ASCII
    counter: u32,        // 24-bit, displayed as 6 hex digits
    sid: Sid,
    modn: u32, // 24-bit micro-counter, displayed as 6 hex digits
}

impl Csn {
    pub fn new(timestamp: &str, counter: u32, sid: Sid, modn: u32) -> Result<Self, CsnParseError> {
        let bytes = timestamp.as_bytes();
        if bytes.len() != 21 {
            return Err(CsnParseError::BadTimestamp(timestamp.to_string()));
        }
        let mut ts = [0u8; 21];
        ts.copy_from_slice(bytes);
        if counter > 0xFF_FFFF || modn > 0xFF_FFFF {
            return Err(CsnParseError::CounterOverflow);
        }
        Ok(Self {
            timestamp: ts,
            counter,
            sid,
            modn,
        })
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn timestamp(&self) -> &str {
        std::str::from_utf8(&self.timestamp).expect("timestamp is always ASCII")
    }
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Z#{:06x}#{}#{:06x}",
            self.timestamp(),
            self.counter,
            self.sid,
            self.modn
        )
    }
}

impl FromStr for Csn {
    type Err = CsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, 'Z');
        let timestamp = parts.next().ok_or(CsnParseError::Malformed)?;
        let rest = parts.next().ok_or(CsnParseError::Malformed)?;
        let rest = rest
            .strip_prefix('#')
            .ok_or_else(|| CsnParseError::BadTimestamp(timestamp.to_string()))?;
        let mut fields = rest.split('#');
        let counter = fields.next().ok_or(CsnParseError::Malformed)?;
        let sid = fields.next().ok_or(CsnParseError::Malformed)?;
        let modn = fields.next().ok_or(CsnParseError::Malformed)?;
        if fields.next().is_some() {
            return Err(CsnParseError::Malformed);
        }
        let counter =
            u32::from_str_radix(counter, 16).map_err(|_| CsnParseError::BadCounter(counter.to_string()))?;
        let sid: Sid = sid.parse()?;
        let modn =
            u32::from_str_radix(modn, 16).map_err(|_| CsnParseError::BadCounter(modn.to_string()))?;
        Csn::new(timestamp, counter, sid, modn)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CsnParseError {
    #[error("malformed csn")]
    Malformed,
    #[error("bad csn timestamp field: {0}")]
    BadTimestamp(String),
    #[error("bad csn counter field: {0}")]
    BadCounter(String),
    #[error("bad csn sid field: {0}")]
    BadSid(String),
    #[error("csn counter field overflows 24 bits")]
    CounterOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: &str = "20240101000000.000000";
    const T2: &str = "20240101000001.000000";

    fn csn(ts: &str, counter: u32, sid: u16, modn: u32) -> Csn {
        Csn::new(ts, counter, Sid::new(sid), modn).unwrap()
    }

    #[test]
    fn parse_compose_round_trip() {
        let original = format!("{T1}Z#00000a#001#000003");
        let parsed: Csn = original.parse().unwrap();
        assert_eq!(parsed.to_string(), original);
    }

    #[test]
    fn ordering_matches_lexicographic_string_order() {
        let a = csn(T1, 1, 1, 0);
        let b = csn(T2, 0, 1, 0);
        assert!(a < b);
        assert!(a.to_string() < b.to_string());

        let c = csn(T1, 1, 1, 0);
        let d = csn(T1, 1, 1, 1);
        assert!(c < d);
        assert!(c.to_string() < d.to_string());
    }

    #[test]
    fn sid_round_trip() {
        let sid = Sid::new(0xabc);
        let s = sid.to_string();
        let parsed: Sid = s.parse().unwrap();
        assert_eq!(sid, parsed);
    }

    #[test]
    fn rejects_extra_fields() {
        let bad = format!("{T1}Z#000000#001#000000#extra");
        assert!(bad.parse::<Csn>().is_err());
    }
}
