//! # Transaction Numbers
//!
//! Formatting for the day-scoped sequence behind `TXN-YYYYMMDD-NNNN`.
//! The counter itself lives in apothecary-db and is incremented atomically.

use chrono::{DateTime, Utc};

use crate::TRANSACTION_NUMBER_PREFIX;

/// Counter key for the day of `at`, e.g. `txn-20260314`.
pub fn sequence_key(at: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        TRANSACTION_NUMBER_PREFIX.to_lowercase(),
        at.format("%Y%m%d")
    )
}

/// Formats an issued sequence value, padded to four digits.
///
/// ```rust
/// use apothecary_core::sequence::format_transaction_number;
/// use chrono::{TimeZone, Utc};
///
/// let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
/// assert_eq!(format_transaction_number(at, 7), "TXN-20260314-0007");
/// assert_eq!(format_transaction_number(at, 12345), "TXN-20260314-12345");
/// ```
pub fn format_transaction_number(at: DateTime<Utc>, seq: i64) -> String {
    format!(
        "{}-{}-{:04}",
        TRANSACTION_NUMBER_PREFIX,
        at.format("%Y%m%d"),
        seq
    )
}

/// Sequence part of a transaction number, if it has one.
pub fn parse_sequence(transaction_number: &str) -> Option<i64> {
    let mut parts = transaction_number.splitn(3, '-');
    let prefix = parts.next()?;
    let date = parts.next()?;
    let seq = parts.next()?;
    if prefix != TRANSACTION_NUMBER_PREFIX || date.len() != 8 {
        return None;
    }
    seq.parse().ok()
}
