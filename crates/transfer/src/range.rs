use std::fmt;
use std::str::FromStr;

use crate::TransferError;

/// Placement of one chunk in the final file, parsed from
/// `Content-Range: bytes <start>-<end>/<total|*>`.
///
/// `start` and `end` are inclusive byte offsets. `total` is `None` when the
/// client sent `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeDescriptor {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

impl RangeDescriptor {
    /// Parses and validates a `Content-Range` header value.
    ///
    /// Fails with [`TransferError::InvalidRangeFormat`] when the value does not
    /// match the pattern, and [`TransferError::InvalidRangeBounds`] when
    /// `end < start` or a known total does not cover `end`.
    pub fn parse(value: &str) -> Result<Self, TransferError> {
        let invalid = || TransferError::InvalidRangeFormat(value.to_string());

        let rest = value.trim().strip_prefix("bytes ").ok_or_else(invalid)?;
        let (span, total) = rest.split_once('/').ok_or_else(invalid)?;
        let (start, end) = span.split_once('-').ok_or_else(invalid)?;

        let start = parse_offset(start).ok_or_else(invalid)?;
        let end = parse_offset(end).ok_or_else(invalid)?;
        let total = match total {
            "*" => None,
            t => Some(parse_offset(t).ok_or_else(invalid)?),
        };

        let out_of_bounds =
            end < start || end == u64::MAX || total.is_some_and(|t| end >= t);
        if out_of_bounds {
            return Err(TransferError::InvalidRangeBounds { start, end, total });
        }

        Ok(Self { start, end, total })
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always `false`: a valid range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl FromStr for RangeDescriptor {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RangeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bytes {}-{}/{}",
            self.start,
            self.end,
            format_total(&self.total)
        )
    }
}

/// Plain decimal digits only: no sign, no whitespace.
fn parse_offset(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

pub(crate) fn format_total(total: &Option<u64>) -> String {
    match total {
        Some(t) => t.to_string(),
        None => "*".to_string(),
    }
}
