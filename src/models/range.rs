//! Single byte-range requests (`Range: bytes=start-end`).

use std::{fmt, ops::Range, str::FromStr};

use thiserror::Error;

/// A parsed range expression. `end` is inclusive; `None` reads through the
/// last byte of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed range `{0}`: expected `bytes=start-end`")]
pub struct RangeParseError(String);

impl FromStr for RangeSpec {
    type Err = RangeParseError;

    /// Accepts `bytes=N-` and `bytes=N-M`. Suffix ranges (`bytes=-N`) and
    /// multi-range lists have no numeric start and are rejected.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || RangeParseError(raw.to_string());
        let spec = raw
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(malformed)?
            .trim();
        let (start, end) = spec.split_once('-').ok_or_else(malformed)?;

        let start = start.trim();
        if start.is_empty() || !start.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let start: u64 = start.parse().map_err(|_| malformed())?;

        let end = end.trim();
        let end = if end.is_empty() {
            None
        } else {
            if !end.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            let end: u64 = end.parse().map_err(|_| malformed())?;
            if end < start {
                return Err(malformed());
            }
            Some(end)
        };

        Ok(Self { start, end })
    }
}

impl RangeSpec {
    /// Resolve against an object of `total` bytes, clamping `end` to the last
    /// byte. Returns `None` when the range starts at or past the end.
    pub fn resolve(&self, total: u64) -> Option<ByteRange> {
        if self.start >= total {
            return None;
        }
        let last = total - 1;
        Some(ByteRange {
            start: self.start,
            end: self.end.map_or(last, |end| end.min(last)),
            total,
        })
    }
}

/// A satisfiable, inclusive byte range within an object of `total` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Half-open form used by blob-store range reads.
    pub fn to_exclusive(&self) -> Range<u64> {
        self.start..self.end + 1
    }
}

impl fmt::Display for ByteRange {
    /// `Content-Range` value, e.g. `bytes 2-3/5`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_and_closed_ranges() {
        assert_eq!(
            "bytes=0-".parse::<RangeSpec>(),
            Ok(RangeSpec { start: 0, end: None })
        );
        assert_eq!(
            " bytes=2-3 ".parse::<RangeSpec>(),
            Ok(RangeSpec {
                start: 2,
                end: Some(3)
            })
        );
    }

    #[test]
    fn rejects_expressions_without_numeric_start() {
        for raw in ["bytes=-5", "bytes=a-3", "items=0-1", "bytes=", "bytes=5", "0-1"] {
            assert!(raw.parse::<RangeSpec>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn rejects_inverted_and_multi_ranges() {
        assert!("bytes=4-2".parse::<RangeSpec>().is_err());
        assert!("bytes=0-1,3-4".parse::<RangeSpec>().is_err());
        assert!("bytes=+1-2".parse::<RangeSpec>().is_err());
    }

    #[test]
    fn open_range_covers_whole_object() {
        let range = RangeSpec { start: 0, end: None }.resolve(5).unwrap();
        assert_eq!(range.to_string(), "bytes 0-4/5");
        assert_eq!(range.len(), 5);
    }

    #[test]
    fn open_range_from_offset_reads_to_end() {
        let range = RangeSpec { start: 3, end: None }.resolve(10).unwrap();
        assert_eq!((range.start, range.end, range.len()), (3, 9, 7));
        assert_eq!(range.to_exclusive(), 3..10);
    }

    #[test]
    fn end_is_clamped_to_last_byte() {
        let range = RangeSpec {
            start: 2,
            end: Some(100),
        }
        .resolve(5)
        .unwrap();
        assert_eq!(range.to_string(), "bytes 2-4/5");
    }

    #[test]
    fn start_past_end_is_unsatisfiable() {
        assert_eq!(RangeSpec { start: 5, end: None }.resolve(5), None);
        assert_eq!(RangeSpec { start: 0, end: None }.resolve(0), None);
    }
}
