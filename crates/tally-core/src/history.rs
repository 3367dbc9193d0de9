//! # Stock History Queries
//!
//! Filter values for ledger reads. Date bounds may be given as a bare date
//! (`2025-01-01`) or a full RFC 3339 timestamp. A bare start date means the
//! first millisecond of that day, a bare end date the last millisecond, and
//! both bounds are inclusive.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::StockHistory;

/// Which side of a range a date bound sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    Start,
    End,
}

/// Parses a date bound, expanding bare dates to the start or end of the day.
///
/// ```rust
/// use tally_core::history::{parse_date_bound, BoundSide};
///
/// let end = parse_date_bound("2025-01-31", BoundSide::End).unwrap();
/// assert_eq!(end.to_rfc3339(), "2025-01-31T23:59:59.999+00:00");
/// ```
pub fn parse_date_bound(raw: &str, side: BoundSide) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        ValidationError::InvalidFormat {
            field: "date".to_string(),
            reason: e.to_string(),
        }
    })?;

    let time = match side {
        BoundSide::Start => NaiveTime::MIN,
        BoundSide::End => NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN),
    };
    Ok(date.and_time(time).and_utc())
}

/// Ledger query filter. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockHistoryFilter {
    pub product_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl StockHistoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_product(product_id: impl Into<String>) -> Self {
        StockHistoryFilter {
            product_id: Some(product_id.into()),
            ..Self::default()
        }
    }

    /// Builds a filter from raw date strings as typed into a report form.
    pub fn from_raw(
        product_id: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Self, ValidationError> {
        Ok(StockHistoryFilter {
            product_id: product_id.map(str::to_string),
            start: start.map(|s| parse_date_bound(s, BoundSide::Start)).transpose()?,
            end: end.map(|s| parse_date_bound(s, BoundSide::End)).transpose()?,
        })
    }

    pub fn matches(&self, entry: &StockHistory) -> bool {
        if let Some(ref pid) = self.product_id {
            if &entry.product_id != pid {
                return false;
            }
        }
        if let Some(start) = self.start {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if entry.timestamp > end {
                return false;
            }
        }
        true
    }
}
