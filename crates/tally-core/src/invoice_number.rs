//! # Invoice Numbers
//!
//! Formatting and parsing of user-facing invoice ids.
//!
//! ## Formats
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Sequential (normal path)                                              │
//! │    INV-18102026-001         date key DDMMYYYY + zero-padded sequence   │
//! │    INV-18102026-1000        padding is a minimum, not a width          │
//! │                                                                         │
//! │  Timestamp fallback (counter and scan both failed)                     │
//! │    INV-18102026-84512345-042   last 8 digits of epoch ms + 3 random    │
//! │                                                                         │
//! │  Emergency fallback                                                    │
//! │    INV-EMG-1792300000000       epoch ms                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Counter documents are keyed by the ISO date (`2026-10-18`) while the id
//! embeds the DDMMYYYY date key. Both derive from the same business date.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Prefix shared by all invoice ids.
pub const INVOICE_PREFIX: &str = "INV";

/// Minimum digits in the sequence part.
pub const SEQUENCE_WIDTH: usize = 3;

/// The store-local calendar date for `now`.
///
/// `utc_offset_minutes` is the store's offset from UTC; an out-of-range
/// offset is treated as UTC.
pub fn business_date(now: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    match FixedOffset::east_opt(utc_offset_minutes * 60) {
        Some(offset) => now.with_timezone(&offset).date_naive(),
        None => now.date_naive(),
    }
}

/// `DDMMYYYY` key embedded in invoice ids.
///
/// ```rust
/// use chrono::NaiveDate;
/// use tally_core::invoice_number::date_key;
///
/// let d = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
/// assert_eq!(date_key(d), "01012025");
/// ```
pub fn date_key(date: NaiveDate) -> String {
    date.format("%d%m%Y").to_string()
}

/// `INV-{dateKey}-`
pub fn daily_prefix(date_key: &str) -> String {
    format!("{}-{}-", INVOICE_PREFIX, date_key)
}

/// `INV-{dateKey}-{seq:03}`
pub fn format_invoice_id(date_key: &str, sequence: i64) -> String {
    format!(
        "{}{:0width$}",
        daily_prefix(date_key),
        sequence,
        width = SEQUENCE_WIDTH
    )
}

/// Timestamp-derived id used when neither the counter nor the scan works.
///
/// `random` is reduced to three digits.
pub fn timestamp_invoice_id(date_key: &str, epoch_millis: i64, random: u32) -> String {
    let tail = epoch_millis.rem_euclid(100_000_000);
    format!("{}{:08}-{:03}", daily_prefix(date_key), tail, random % 1000)
}

/// Last-resort id.
pub fn emergency_invoice_id(epoch_millis: i64) -> String {
    format!("{}-EMG-{}", INVOICE_PREFIX, epoch_millis)
}

/// Sequence number of a sequential id issued under `date_key`.
///
/// Fallback and emergency ids return `None` so they never inflate the
/// scanned maximum.
pub fn parse_sequence(id: &str, date_key: &str) -> Option<i64> {
    let rest = id.strip_prefix(&daily_prefix(date_key))?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Highest sequence among `ids` for `date_key`, 0 when none.
pub fn max_sequence<'a, I>(ids: I, date_key: &str) -> i64
where
    I: IntoIterator<Item = &'a str>,
{
    ids.into_iter()
        .filter_map(|id| parse_sequence(id, date_key))
        .max()
        .unwrap_or(0)
}

/// Structural classification of an invoice id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceIdKind {
    Sequential { date_key: String, sequence: i64 },
    Timestamp { date_key: String },
    Emergency { epoch_millis: i64 },
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Classifies `id`, returning `None` for anything that is not a known format.
pub fn parse_invoice_id(id: &str) -> Option<InvoiceIdKind> {
    let rest = id.strip_prefix("INV-")?;

    if let Some(millis) = rest.strip_prefix("EMG-") {
        return if all_digits(millis) {
            millis
                .parse()
                .ok()
                .map(|epoch_millis| InvoiceIdKind::Emergency { epoch_millis })
        } else {
            None
        };
    }

    let mut parts = rest.split('-');
    let key = parts.next()?;
    if key.len() != 8 || !all_digits(key) {
        return None;
    }

    match (parts.next(), parts.next(), parts.next()) {
        (Some(seq), None, None) if seq.len() >= SEQUENCE_WIDTH && all_digits(seq) => {
            Some(InvoiceIdKind::Sequential {
                date_key: key.to_string(),
                sequence: seq.parse().ok()?,
            })
        }
        (Some(ts), Some(rnd), None)
            if ts.len() == 8 && all_digits(ts) && rnd.len() == 3 && all_digits(rnd) =>
        {
            Some(InvoiceIdKind::Timestamp {
                date_key: key.to_string(),
            })
        }
        _ => None,
    }
}

/// Whether `id` is in one of the documented formats.
pub fn is_valid_invoice_id(id: &str) -> bool {
    parse_invoice_id(id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_pads_to_three_and_grows() {
        assert_eq!(format_invoice_id("01012025", 1), "INV-01012025-001");
        assert_eq!(format_invoice_id("01012025", 42), "INV-01012025-042");
        assert_eq!(format_invoice_id("01012025", 1234), "INV-01012025-1234");
    }

    #[test]
    fn test_business_date_respects_offset() {
        // 20:30 UTC on Dec 31 is already Jan 1 in Dhaka (UTC+6)
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 20, 30, 0).unwrap();
        assert_eq!(business_date(now, 0), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert_eq!(business_date(now, 360), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(date_key(business_date(now, 360)), "01012025");
    }

    #[test]
    fn test_parse_sequence_ignores_fallback_ids() {
        let key = "01012025";
        assert_eq!(parse_sequence("INV-01012025-007", key), Some(7));
        assert_eq!(parse_sequence("INV-01012025-12345678-123", key), None);
        assert_eq!(parse_sequence("INV-02012025-009", key), None);
        assert_eq!(parse_sequence("INV-EMG-1700000000000", key), None);
    }

    #[test]
    fn test_max_sequence() {
        let ids = ["INV-01012025-003", "INV-01012025-011", "INV-01012025-99999999-001"];
        assert_eq!(max_sequence(ids, "01012025"), 11);
        assert_eq!(max_sequence(Vec::<&str>::new(), "01012025"), 0);
    }

    #[test]
    fn test_fallback_formats_are_recognised() {
        let ts = timestamp_invoice_id("01012025", 1_735_689_612_345, 7);
        assert_eq!(ts, "INV-01012025-89612345-007");
        assert_eq!(
            parse_invoice_id(&ts),
            Some(InvoiceIdKind::Timestamp {
                date_key: "01012025".to_string()
            })
        );

        let emg = emergency_invoice_id(1_735_689_612_345);
        assert_eq!(emg, "INV-EMG-1735689612345");
        assert!(is_valid_invoice_id(&emg));
    }

    #[test]
    fn test_rejects_malformed_ids() {
        assert!(!is_valid_invoice_id("INV-0101202-001"));
        assert!(!is_valid_invoice_id("INV-01012025-01"));
        assert!(!is_valid_invoice_id("BILL-01012025-001"));
        assert!(!is_valid_invoice_id("INV-EMG-"));
    }
}
