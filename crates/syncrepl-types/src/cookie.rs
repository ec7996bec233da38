//! The replication cookie: a replica id, an optional server id, and a
//! sid-sorted vector of CSNs.
//!
//! This is the wire-level cookie (spec §3/§6); the mutable, mutex-guarded
//! per-database state that *uses* this vector (`cs_vals`, `cs_pvals`, the
//! refresh gate, ...) lives in `syncrepl-csn`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::csn::{Csn, Sid};
use crate::ids::Rid;

/// A cookie: `rid`, optional `sid`, and a strictly sid-sorted list of CSNs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Cookie {
    pub rid: Option<Rid>,
    pub sid: Option<Sid>,
    /// Strictly increasing by `Sid` (spec invariant 1 in §3).
    entries: Vec<(Sid, Csn)>,
}

impl Cookie {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[(Sid, Csn)] {
        &self.entries
    }

    /// Inserts or replaces the CSN for `sid`, keeping `entries` sorted.
    pub fn set(&mut self, sid: Sid, csn: Csn) {
        match self.entries.binary_search_by_key(&sid, |(s, _)| *s) {
            Ok(idx) => self.entries[idx].1 = csn,
            Err(idx) => self.entries.insert(idx, (sid, csn)),
        }
    }

    pub fn get(&self, sid: Sid) -> Option<Csn> {
        self.entries
            .binary_search_by_key(&sid, |(s, _)| *s)
            .ok()
            .map(|idx| self.entries[idx].1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::with_capacity(2 + self.entries.len());
        if let Some(rid) = self.rid {
            fields.push(format!("rid={rid}"));
        }
        if let Some(sid) = self.sid {
            fields.push(format!("sid={sid}"));
        }
        fields.extend(self.entries.iter().map(|(_, csn)| format!("csn={csn}")));
        write!(f, "{}", fields.join(","))
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CookieParseError {
    #[error("malformed cookie field: {0}")]
    Malformed(String),
    #[error("unknown cookie key: {0}")]
    UnknownKey(String),
    #[error("bad rid field: {0}")]
    BadRid(String),
    #[error(transparent)]
    BadCsn(#[from] crate::csn::CsnParseError),
}

impl FromStr for Cookie {
    type Err = CookieParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cookie = Cookie::empty();
        if s.is_empty() {
            return Ok(cookie);
        }
        for field in s.split(',') {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| CookieParseError::Malformed(field.to_string()))?;
            match key {
                "rid" => {
                    let rid: u16 = value
                        .parse()
                        .map_err(|_| CookieParseError::BadRid(value.to_string()))?;
                    cookie.rid = Some(Rid::new(rid));
                }
                "sid" => {
                    cookie.sid = Some(value.parse()?);
                }
                "csn" => {
                    let csn: Csn = value.parse()?;
                    cookie.set(csn.sid(), csn);
                }
                other => return Err(CookieParseError::UnknownKey(other.to_string())),
            }
        }
        Ok(cookie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csn(sid: u16) -> Csn {
        Csn::new("20240101000000.000000", 0, Sid::new(sid), 0).unwrap()
    }

    #[test]
    fn compose_parse_round_trip() {
        let mut cookie = Cookie::empty();
        cookie.rid = Some(Rid::new(1));
        cookie.set(Sid::new(1), csn(1));
        cookie.set(Sid::new(3), csn(3));
        let text = cookie.to_string();
        let parsed: Cookie = text.parse().unwrap();
        assert_eq!(parsed, cookie);
        assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn empty_cookie_round_trips() {
        let cookie = Cookie::empty();
        let text = cookie.to_string();
        assert_eq!(text, "");
        let parsed: Cookie = text.parse().unwrap();
        assert_eq!(parsed, cookie);
    }

    #[test]
    fn set_keeps_sid_order() {
        let mut cookie = Cookie::empty();
        cookie.set(Sid::new(5), csn(5));
        cookie.set(Sid::new(1), csn(1));
        cookie.set(Sid::new(3), csn(3));
        let sids: Vec<u16> = cookie.entries().iter().map(|(s, _)| s.as_u16()).collect();
        assert_eq!(sids, vec![1, 3, 5]);
    }
}
