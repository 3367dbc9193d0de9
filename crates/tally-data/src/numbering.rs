//! # Invoice Numbering Service
//!
//! Per-store, per-day invoice ids.
//!
//! ## Fallback Chain
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     next_invoice_number(store)                          │
//! │                                                                         │
//! │  1. daily counter   atomic upsert + RETURNING        INV-01012025-004  │
//! │        │ error                                                          │
//! │        ▼                                                                │
//! │  2. invoice scan    max(INV-01012025-NNN) + 1        INV-01012025-004  │
//! │        │ error                                                          │
//! │        ▼                                                                │
//! │  3. timestamp       last 8 ms digits + random        INV-01012025-      │
//! │        │ id taken                                    84512345-042      │
//! │        ▼                                                                │
//! │  4. emergency       epoch millis                     INV-EMG-17357...  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Numbering never fails a sale; each step logs why it fell through.
//! Counter repair and reset are administrative operations guarded by
//! [`Capability::AdministerCounters`].

use chrono::NaiveDate;
use rand::Rng;
use tracing::{debug, error, info, warn};

use tally_core::invoice_number::{
    business_date, daily_prefix, date_key, emergency_invoice_id, format_invoice_id, max_sequence,
    timestamp_invoice_id,
};
use tally_core::{permissions, Capability, DailyCounter, UserRole};
use tally_db::{CounterStamp, Database};

use crate::clock::SharedClock;
use crate::error::DataResult;

#[derive(Debug, Clone)]
pub struct InvoiceNumbering {
    db: Database,
    clock: SharedClock,
    utc_offset_minutes: i32,
}

impl InvoiceNumbering {
    pub fn new(db: Database, clock: SharedClock, utc_offset_minutes: i32) -> Self {
        InvoiceNumbering {
            db,
            clock,
            utc_offset_minutes,
        }
    }

    /// Today's date in the store's time zone.
    pub fn today(&self) -> NaiveDate {
        business_date(self.clock.now(), self.utc_offset_minutes)
    }

    // =========================================================================
    // Issuing
    // =========================================================================

    /// Returns an invoice id not issued before for this store and day.
    pub async fn next_invoice_number(&self, store_id: &str) -> String {
        let now = self.clock.now();
        let date = self.today();
        let key = date_key(date);

        match self.db.daily_counters().increment(store_id, date, &key, now).await {
            Ok(next) => {
                let id = format_invoice_id(&key, next);
                debug!(store_id = %store_id, invoice_id = %id, "Invoice number issued");
                return id;
            }
            Err(e) => {
                warn!(store_id = %store_id, error = %e, "Daily counter failed, scanning invoices");
            }
        }

        match self.scan_max_sequence(store_id, &key).await {
            Ok(max) => {
                let id = format_invoice_id(&key, max + 1);
                info!(store_id = %store_id, invoice_id = %id, "Invoice number from scan");
                return id;
            }
            Err(e) => {
                warn!(store_id = %store_id, error = %e, "Invoice scan failed, using timestamp id");
            }
        }

        let random = rand::thread_rng().gen_range(0..1000);
        let id = timestamp_invoice_id(&key, now.timestamp_millis(), random);

        match self.db.invoices().exists(store_id, &id).await {
            Ok(true) => {
                let id = emergency_invoice_id(now.timestamp_millis());
                error!(store_id = %store_id, invoice_id = %id, "Timestamp id taken, using emergency id");
                id
            }
            Ok(false) | Err(_) => {
                warn!(store_id = %store_id, invoice_id = %id, "Invoice number from timestamp");
                id
            }
        }
    }

    async fn scan_max_sequence(&self, store_id: &str, key: &str) -> DataResult<i64> {
        let ids = self
            .db
            .invoices()
            .ids_with_prefix(store_id, &daily_prefix(key))
            .await?;
        Ok(max_sequence(ids.iter().map(String::as_str), key))
    }

    // =========================================================================
    // Counter Administration
    // =========================================================================

    /// Last number issued today, 0 when none.
    pub async fn today_counter(&self, store_id: &str) -> i64 {
        self.date_counter(store_id, self.today()).await
    }

    /// Last number issued on `date`, 0 when none.
    pub async fn date_counter(&self, store_id: &str, date: NaiveDate) -> i64 {
        match self.db.daily_counters().get(store_id, date).await {
            Ok(counter) => counter.map(|c| c.last_number).unwrap_or(0),
            Err(e) => {
                warn!(store_id = %store_id, date = %date, error = %e, "Could not read counter");
                0
            }
        }
    }

    /// Rebuilds today's counter from the invoices actually stored.
    ///
    /// Returns the repaired value, or 0 if the repair could not run.
    pub async fn fix_today_counter(&self, store_id: &str, role: UserRole) -> DataResult<i64> {
        permissions::require(role, Capability::AdministerCounters)?;

        let now = self.clock.now();
        let date = self.today();
        let key = date_key(date);

        let repaired = match self.scan_max_sequence(store_id, &key).await {
            Ok(max) => max,
            Err(e) => {
                error!(store_id = %store_id, error = %e, "Counter repair scan failed");
                return Ok(0);
            }
        };

        match self
            .db
            .daily_counters()
            .set(store_id, date, &key, repaired, CounterStamp::Fixed, now)
            .await
        {
            Ok(_) => {
                info!(store_id = %store_id, date = %date, last_number = repaired, "Counter repaired");
                Ok(repaired)
            }
            Err(e) => {
                error!(store_id = %store_id, error = %e, "Could not store repaired counter");
                Ok(0)
            }
        }
    }

    /// Every counter of the store, newest date first. Empty on error.
    pub async fn all_counters(&self, store_id: &str) -> Vec<DailyCounter> {
        self.db
            .daily_counters()
            .list(store_id)
            .await
            .unwrap_or_else(|e| {
                warn!(store_id = %store_id, error = %e, "Could not list counters");
                Vec::new()
            })
    }

    /// Sets the counter of `date` so the next id issued is `start_number + 1`.
    pub async fn reset_date_counter(
        &self,
        store_id: &str,
        date: NaiveDate,
        start_number: i64,
        reset_by: &str,
        role: UserRole,
    ) -> DataResult<DailyCounter> {
        permissions::require(role, Capability::AdministerCounters)?;

        let counter = self
            .db
            .daily_counters()
            .set(
                store_id,
                date,
                &date_key(date),
                start_number.max(0),
                CounterStamp::Reset {
                    by: reset_by.to_string(),
                },
                self.clock.now(),
            )
            .await?;

        info!(
            store_id = %store_id,
            date = %date,
            last_number = counter.last_number,
            reset_by = %reset_by,
            "Counter reset"
        );
        Ok(counter)
    }

    /// Store-wide sequence kept in settings before daily counters existed.
    pub async fn current_invoice_number(&self, store_id: &str) -> i64 {
        match self.db.settings().get(store_id).await {
            Ok(settings) => settings.last_invoice_number.unwrap_or(0),
            Err(e) => {
                warn!(store_id = %store_id, error = %e, "Could not read settings");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::Arc;
    use tally_core::invoice_number::{parse_invoice_id, InvoiceIdKind};
    use tally_core::CoreError;
    use tally_db::DbConfig;

    use crate::error::DataError;
    use crate::testing;

    async fn setup() -> (InvoiceNumbering, Database, ManualClock) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap());
        let numbering = InvoiceNumbering::new(db.clone(), Arc::new(clock.clone()), 0);
        (numbering, db, clock)
    }

    #[tokio::test]
    async fn test_burst_of_one_hundred_is_sequential_and_unique() {
        let (numbering, _, _) = setup().await;

        let mut seen = HashSet::new();
        for expected in 1..=100 {
            let id = numbering.next_invoice_number("s1").await;
            assert_eq!(
                parse_invoice_id(&id),
                Some(InvoiceIdKind::Sequential {
                    date_key: "01012025".into(),
                    sequence: expected
                })
            );
            assert!(seen.insert(id));
        }
        assert_eq!(numbering.today_counter("s1").await, 100);
    }

    #[tokio::test]
    async fn test_counters_are_per_store_and_per_day() {
        let (numbering, _, clock) = setup().await;

        assert_eq!(numbering.next_invoice_number("s1").await, "INV-01012025-001");
        assert_eq!(numbering.next_invoice_number("s2").await, "INV-01012025-001");

        clock.advance(chrono::TimeDelta::days(1));
        assert_eq!(numbering.next_invoice_number("s1").await, "INV-02012025-001");

        let counters = numbering.all_counters("s1").await;
        assert_eq!(counters.len(), 2);
        assert_eq!(counters[0].date_key, "02012025");
    }

    #[tokio::test]
    async fn test_business_date_follows_store_offset() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 12, 31, 20, 0, 0).unwrap());
        let numbering = InvoiceNumbering::new(db, Arc::new(clock), 6 * 60);

        assert_eq!(numbering.next_invoice_number("s1").await, "INV-01012025-001");
    }

    #[tokio::test]
    async fn test_scan_fallback_when_counter_unavailable() {
        let (numbering, db, _) = setup().await;
        for id in ["INV-01012025-001", "INV-01012025-007", "INV-01012025-84512345-042"] {
            db.invoices()
                .upsert("s1", &testing::invoice(id, &[]), testing::start())
                .await
                .unwrap();
        }
        sqlx::query("DROP TABLE daily_counters")
            .execute(db.pool())
            .await
            .unwrap();

        assert_eq!(numbering.next_invoice_number("s1").await, "INV-01012025-008");
        assert_eq!(numbering.today_counter("s1").await, 0);
    }

    #[tokio::test]
    async fn test_timestamp_fallback_when_scan_fails() {
        let (numbering, db, _) = setup().await;
        sqlx::query("DROP TABLE daily_counters")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("DROP TABLE invoices")
            .execute(db.pool())
            .await
            .unwrap();

        let id = numbering.next_invoice_number("s1").await;
        assert_eq!(
            parse_invoice_id(&id),
            Some(InvoiceIdKind::Timestamp {
                date_key: "01012025".into()
            })
        );
    }

    #[tokio::test]
    async fn test_fix_today_counter_requires_admin() {
        let (numbering, _, _) = setup().await;

        let err = numbering
            .fix_today_counter("s1", UserRole::Cashier)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Core(CoreError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn test_fix_today_counter_repairs_from_invoices() {
        let (numbering, db, _) = setup().await;
        for _ in 0..5 {
            numbering.next_invoice_number("s1").await;
        }
        db.invoices()
            .upsert("s1", &testing::invoice("INV-01012025-012", &[]), testing::start())
            .await
            .unwrap();

        assert_eq!(numbering.fix_today_counter("s1", UserRole::Admin).await.unwrap(), 12);
        assert_eq!(numbering.today_counter("s1").await, 12);

        let counter = &numbering.all_counters("s1").await[0];
        assert!(counter.fixed_at.is_some());
        assert_eq!(numbering.next_invoice_number("s1").await, "INV-01012025-013");
    }

    #[tokio::test]
    async fn test_reset_date_counter() {
        let (numbering, _, _) = setup().await;
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        numbering.next_invoice_number("s1").await;

        let err = numbering
            .reset_date_counter("s1", date, 50, "Rahim", UserRole::Manager)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Core(CoreError::PermissionDenied { .. })));

        let counter = numbering
            .reset_date_counter("s1", date, 50, "Owner", UserRole::Admin)
            .await
            .unwrap();
        assert_eq!(counter.last_number, 50);
        assert_eq!(counter.reset_by.as_deref(), Some("Owner"));
        assert_eq!(numbering.date_counter("s1", date).await, 50);
        assert_eq!(numbering.next_invoice_number("s1").await, "INV-01012025-051");
    }

    #[tokio::test]
    async fn test_legacy_invoice_number_from_settings() {
        let (numbering, db, clock) = setup().await;
        assert_eq!(numbering.current_invoice_number("s1").await, 0);

        db.settings()
            .merge(
                "s1",
                &tally_core::BusinessSettings {
                    last_invoice_number: Some(230),
                    ..Default::default()
                },
                clock.now(),
            )
            .await
            .unwrap();
        assert_eq!(numbering.current_invoice_number("s1").await, 230);
    }
}
