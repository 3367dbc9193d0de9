//! # Default Barcodes
//!
//! Stores that don't print their own labels get short sequential codes:
//! `"001"`, `"002"`, ... Only existing codes that are exactly three digits
//! take part in the sequence, so imported EAN codes never disturb it.

/// Width of auto-assigned barcodes.
pub const DEFAULT_BARCODE_WIDTH: usize = 3;

fn is_default_code(code: &str) -> bool {
    code.len() == DEFAULT_BARCODE_WIDTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// Next sequential barcode given every barcode currently in the store.
///
/// ```rust
/// use tally_core::barcode::next_default_barcode;
///
/// assert_eq!(next_default_barcode(["001", "002"]), "003");
/// assert_eq!(next_default_barcode(["5012345678900"]), "001");
/// ```
pub fn next_default_barcode<'a, I>(existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let max = existing
        .into_iter()
        .map(str::trim)
        .filter(|c| is_default_code(c))
        .filter_map(|c| c.parse::<u32>().ok())
        .max()
        .unwrap_or(0);

    format!("{:0width$}", max + 1, width = DEFAULT_BARCODE_WIDTH)
}

/// Fallback barcode: the last six digits of the epoch milliseconds.
pub fn timestamp_barcode(epoch_millis: i64) -> String {
    format!("{:06}", epoch_millis.rem_euclid(1_000_000))
}

/// Trims a barcode and maps blank values to `None`.
pub fn normalize_barcode(barcode: Option<&str>) -> Option<String> {
    barcode
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_skips_non_default_codes() {
        let existing = ["001", "010", "12", "ABC", "1234", " 004 "];
        assert_eq!(next_default_barcode(existing), "011");
    }

    #[test]
    fn test_empty_store_starts_at_one() {
        assert_eq!(next_default_barcode(Vec::<&str>::new()), "001");
    }

    #[test]
    fn test_overflow_grows_past_width() {
        assert_eq!(next_default_barcode(["999"]), "1000");
    }

    #[test]
    fn test_timestamp_barcode() {
        assert_eq!(timestamp_barcode(1_735_689_612_345), "612345");
        assert_eq!(timestamp_barcode(1_000_000_000_042), "000042");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_barcode(Some("  ")), None);
        assert_eq!(normalize_barcode(Some(" 007 ")), Some("007".to_string()));
        assert_eq!(normalize_barcode(None), None);
    }
}
