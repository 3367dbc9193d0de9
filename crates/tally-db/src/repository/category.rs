//! # Category Repository

use sqlx::SqlitePool;

use crate::error::DbResult;
use crate::feed::{ChangeEvent, ChangeFeed};
use tally_core::{Category, Collection};

#[derive(Debug, Clone)]
pub struct CategoryRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl CategoryRepository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        CategoryRepository { pool, feed }
    }

    pub async fn list(&self, store_id: &str) -> DbResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT * FROM categories WHERE store_id = ? ORDER BY name COLLATE NOCASE, id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(categories)
    }

    pub async fn upsert(&self, store_id: &str, category: &Category) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO categories (store_id, id, name, description, color)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (store_id, id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                color = excluded.color
            "#,
        )
        .bind(store_id)
        .bind(&category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.color)
        .execute(&self.pool)
        .await?;

        self.feed
            .publish(ChangeEvent::upserted(store_id, Collection::Categories, &category.id));
        Ok(())
    }

    pub async fn delete(&self, store_id: &str, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE store_id = ? AND id = ?")
            .bind(store_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.feed
                .publish(ChangeEvent::deleted(store_id, Collection::Categories, id));
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_categories_sorted_by_name() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.categories();
        for (id, name) in [("c2", "ironing"), ("c1", "Dry Clean")] {
            repo.upsert(
                "s1",
                &Category {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: None,
                    color: Some("#0ea5e9".to_string()),
                },
            )
            .await
            .unwrap();
        }

        let names: Vec<String> = repo
            .list("s1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Dry Clean", "ironing"]);
        assert!(repo.delete("s1", "c2").await.unwrap());
    }
}
