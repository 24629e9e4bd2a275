//! Pointer-length slices.
//!
//! A `Pl` is the non-owning `(ptr, len)` view the whole middleware trades in: tag names and leaf
//! values point into the document buffer, hash keys point into messages, and none of them copy.
//! The borrow makes the validity window explicit — a `Pl` handed to a callback is good for the
//! callback only; keeping it longer means copying into a [VPl].

use crate::error::{Error, Result};

/// A borrowed byte slice with the parsing and comparison helpers signaling code keeps reaching
/// for.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Pl<'a> {
    bytes: &'a [u8],
}

impl<'a> Pl<'a> {
    pub fn new(bytes: &'a [u8]) -> Pl<'a> {
        Pl { bytes }
    }

    pub fn from_str(s: &'a str) -> Pl<'a> {
        Pl { bytes: s.as_bytes() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn as_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.bytes).ok()
    }

    /// Decimal conversion with explicit errors: empty input, a non-digit, and overflow all fail.
    pub fn to_u64(&self) -> Result<u64> {
        if self.bytes.is_empty() {
            return Err(Error::ext_invalid("empty numeric field"));
        }
        let mut v: u64 = 0;
        for &b in self.bytes {
            if !b.is_ascii_digit() {
                return Err(Error::ext_invalid(format!(
                    "non-digit 0x{b:02x} in numeric field"
                )));
            }
            v = v
                .checked_mul(10)
                .and_then(|v| v.checked_add((b - b'0') as u64))
                .ok_or_else(|| Error::ext_invalid("numeric field overflows u64"))?;
        }
        Ok(v)
    }

    pub fn to_u32(&self) -> Result<u32> {
        let v = self.to_u64()?;
        u32::try_from(v).map_err(|_| Error::ext_invalid("numeric field overflows u32"))
    }

    /// Hexadecimal conversion, no `0x` prefix, case-insensitive digits.
    pub fn hex_to_u32(&self) -> Result<u32> {
        if self.bytes.is_empty() || self.bytes.len() > 8 {
            return Err(Error::ext_invalid("hex field empty or longer than 8 digits"));
        }
        let mut v: u32 = 0;
        for &b in self.bytes {
            let digit = match b {
                b'0'..=b'9' => b - b'0',
                b'a'..=b'f' => b - b'a' + 10,
                b'A'..=b'F' => b - b'A' + 10,
                _ => {
                    return Err(Error::ext_invalid(format!(
                        "non-hex digit 0x{b:02x} in hex field"
                    )))
                }
            };
            v = (v << 4) | digit as u32;
        }
        Ok(v)
    }

    /// Case-sensitive equality against a str.
    pub fn eq_str(&self, s: &str) -> bool {
        self.bytes == s.as_bytes()
    }

    /// ASCII case-insensitive equality against a str.
    pub fn eq_str_nocase(&self, s: &str) -> bool {
        self.bytes.eq_ignore_ascii_case(s.as_bytes())
    }

    /// ASCII case-insensitive equality against another slice.
    pub fn eq_nocase(&self, other: &Pl<'_>) -> bool {
        self.bytes.eq_ignore_ascii_case(other.bytes)
    }

    /// First occurrence of `needle`, case-sensitive.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        find_sub(self.bytes, needle, false)
    }

    /// First occurrence of `needle`, ASCII case-insensitive.
    pub fn find_nocase(&self, needle: &[u8]) -> Option<usize> {
        find_sub(self.bytes, needle, true)
    }

    /// Drop leading whitespace.
    pub fn trim_top(&self) -> Pl<'a> {
        let start = self
            .bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.bytes.len());
        Pl {
            bytes: &self.bytes[start..],
        }
    }

    /// Drop trailing whitespace.
    pub fn trim_bottom(&self) -> Pl<'a> {
        let end = self
            .bytes
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map(|i| i + 1)
            .unwrap_or(0);
        Pl {
            bytes: &self.bytes[..end],
        }
    }

    pub fn trim(&self) -> Pl<'a> {
        self.trim_top().trim_bottom()
    }

    /// Split at the first occurrence of `delim`; the delimiter belongs to neither half.  None
    /// when the delimiter is absent.
    pub fn split_once(&self, delim: u8) -> Option<(Pl<'a>, Pl<'a>)> {
        let at = self.bytes.iter().position(|&b| b == delim)?;
        Some((
            Pl {
                bytes: &self.bytes[..at],
            },
            Pl {
                bytes: &self.bytes[at + 1..],
            },
        ))
    }

    /// Copy into an owning [VPl].
    pub fn to_owned(&self) -> VPl {
        VPl {
            bytes: self.bytes.to_vec(),
        }
    }
}

impl std::fmt::Debug for Pl<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "Pl({s:?})"),
            None => write!(f, "Pl({:02x?})", self.bytes),
        }
    }
}

impl std::fmt::Display for Pl<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.bytes))
    }
}

/// Owning counterpart of [Pl], for values that must outlive their source buffer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VPl {
    bytes: Vec<u8>,
}

impl VPl {
    pub fn new(bytes: Vec<u8>) -> VPl {
        VPl { bytes }
    }

    pub fn as_pl(&self) -> Pl<'_> {
        Pl { bytes: &self.bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn find_sub(haystack: &[u8], needle: &[u8], nocase: bool) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| {
        if nocase {
            w.eq_ignore_ascii_case(needle)
        } else {
            w == needle
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn numeric_conversion() {
        assert_eq!(Pl::from_str("0").to_u64().unwrap(), 0);
        assert_eq!(Pl::from_str("40075").to_u32().unwrap(), 40075);
        assert!(Pl::from_str("").to_u64().is_err());
        assert!(Pl::from_str("12a").to_u64().is_err());
        assert!(Pl::from_str(" 12").to_u64().is_err());
        assert!(Pl::from_str("18446744073709551616").to_u64().is_err());
        assert!(Pl::from_str("4294967296").to_u32().is_err());
    }

    #[test]
    fn hex_conversion() {
        assert_eq!(Pl::from_str("ff").hex_to_u32().unwrap(), 0xff);
        assert_eq!(Pl::from_str("DeadBeef").hex_to_u32().unwrap(), 0xdeadbeef);
        assert!(Pl::from_str("").hex_to_u32().is_err());
        assert!(Pl::from_str("123456789").hex_to_u32().is_err());
        assert!(Pl::from_str("0x12").hex_to_u32().is_err());
    }

    #[test]
    fn comparison_and_find() {
        let pl = Pl::from_str("Content-Length");
        assert!(pl.eq_str("Content-Length"));
        assert!(!pl.eq_str("content-length"));
        assert!(pl.eq_str_nocase("CONTENT-LENGTH"));
        assert_eq!(pl.find(b"Len"), Some(8));
        assert_eq!(pl.find(b"len"), None);
        assert_eq!(pl.find_nocase(b"len"), Some(8));
        assert_eq!(pl.find(b""), None);
    }

    #[test]
    fn trim_is_independent_per_side() {
        let pl = Pl::from_str("  via  ");
        assert!(pl.trim_top().eq_str("via  "));
        assert!(pl.trim_bottom().eq_str("  via"));
        assert!(pl.trim().eq_str("via"));
        assert!(Pl::from_str("   ").trim().is_empty());
    }

    #[test]
    fn splitting() {
        let (name, value) = Pl::from_str("branch=z9hG4bK").split_once(b'=').unwrap();
        assert!(name.eq_str("branch"));
        assert!(value.eq_str("z9hG4bK"));
        assert!(Pl::from_str("no-delim").split_once(b';').is_none());
    }

    proptest! {
        #[test]
        fn u64_round_trips(v: u64) {
            let s = v.to_string();
            prop_assert_eq!(Pl::from_str(&s).to_u64().unwrap(), v);
        }

        #[test]
        fn trim_never_leaves_edge_whitespace(s in "[ \t]*[a-z0-9 ]*[ \t]*") {
            let trimmed = Pl::from_str(&s).trim();
            let b = trimmed.as_bytes();
            prop_assert!(b.first().map_or(true, |c| !c.is_ascii_whitespace()));
            prop_assert!(b.last().map_or(true, |c| !c.is_ascii_whitespace()));
        }
    }
}
