//! # Settings Repository
//!
//! One JSON settings document per store. Saves merge into the stored
//! document: keys absent from the update keep their stored value, and keys
//! this version of the software doesn't know about are preserved.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use crate::feed::{ChangeEvent, ChangeFeed};
use tally_core::{BusinessSettings, Collection};

/// Document id used in change events.
const SETTINGS_DOCUMENT: &str = "business";

#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        SettingsRepository { pool, feed }
    }

    /// The raw stored document, `{}` when none exists.
    pub async fn get_document(&self, store_id: &str) -> DbResult<Map<String, Value>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT document FROM settings WHERE store_id = ?")
                .bind(store_id)
                .fetch_optional(&self.pool)
                .await?;

        match raw {
            Some(raw) => match serde_json::from_str::<Value>(&raw)? {
                Value::Object(map) => Ok(map),
                _ => Ok(Map::new()),
            },
            None => Ok(Map::new()),
        }
    }

    /// The store's settings; defaults when never saved.
    pub async fn get(&self, store_id: &str) -> DbResult<BusinessSettings> {
        let document = self.get_document(store_id).await?;
        Ok(serde_json::from_value(Value::Object(document))?)
    }

    /// Merges `update` into the stored document and returns the result.
    pub async fn merge(
        &self,
        store_id: &str,
        update: &BusinessSettings,
        now: DateTime<Utc>,
    ) -> DbResult<BusinessSettings> {
        let mut tx = self.pool.begin().await?;

        let raw: Option<String> =
            sqlx::query_scalar("SELECT document FROM settings WHERE store_id = ?")
                .bind(store_id)
                .fetch_optional(&mut *tx)
                .await?;

        let mut document = match raw.map(|r| serde_json::from_str::<Value>(&r)).transpose()? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        if let Value::Object(patch) = serde_json::to_value(update)? {
            for (key, value) in patch {
                if !value.is_null() {
                    document.insert(key, value);
                }
            }
        }

        let merged = Value::Object(document);
        sqlx::query(
            r#"
            INSERT INTO settings (store_id, document, updated_at) VALUES (?, ?, ?)
            ON CONFLICT (store_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(store_id)
        .bind(merged.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(store_id = %store_id, "Settings merged");
        self.feed.publish(ChangeEvent::upserted(
            store_id,
            Collection::Settings,
            SETTINGS_DOCUMENT,
        ));
        Ok(serde_json::from_value(merged)?)
    }
}
