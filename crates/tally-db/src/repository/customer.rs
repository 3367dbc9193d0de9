//! # Customer Repository

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use crate::feed::{ChangeEvent, ChangeFeed};
use tally_core::{Collection, Customer};

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        CustomerRepository { pool, feed }
    }

    /// All customers of a store, sorted by name.
    pub async fn list(&self, store_id: &str) -> DbResult<Vec<Customer>> {
        let customers = sqlx::query_as::<_, Customer>(
            "SELECT * FROM customers WHERE store_id = ? ORDER BY name COLLATE NOCASE, id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(customers)
    }

    pub async fn get(&self, store_id: &str, id: &str) -> DbResult<Option<Customer>> {
        let customer =
            sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE store_id = ? AND id = ?")
                .bind(store_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(customer)
    }

    pub async fn upsert(&self, store_id: &str, customer: &Customer) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (
                store_id, id, name, phone, address, email, nid_card, card_number, total_due_cents
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (store_id, id) DO UPDATE SET
                name = excluded.name,
                phone = excluded.phone,
                address = excluded.address,
                email = excluded.email,
                nid_card = excluded.nid_card,
                card_number = excluded.card_number,
                total_due_cents = excluded.total_due_cents
            "#,
        )
        .bind(store_id)
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(&customer.address)
        .bind(&customer.email)
        .bind(&customer.nid_card)
        .bind(&customer.card_number)
        .bind(customer.total_due_cents)
        .execute(&self.pool)
        .await?;

        debug!(store_id = %store_id, customer_id = %customer.id, "Customer saved");
        self.feed
            .publish(ChangeEvent::upserted(store_id, Collection::Customers, &customer.id));
        Ok(())
    }

    pub async fn delete(&self, store_id: &str, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM customers WHERE store_id = ? AND id = ?")
            .bind(store_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.feed
                .publish(ChangeEvent::deleted(store_id, Collection::Customers, id));
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_customer_crud() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.customers();
        let mut customer = Customer {
            id: "c1".to_string(),
            name: "Nadia".to_string(),
            phone: "01700000000".to_string(),
            address: "Road 4".to_string(),
            email: None,
            nid_card: None,
            card_number: Some("LC-7".to_string()),
            total_due_cents: 0,
        };

        repo.upsert("s1", &customer).await.unwrap();
        customer.total_due_cents = 450;
        repo.upsert("s1", &customer).await.unwrap();

        let stored = repo.get("s1", "c1").await.unwrap().unwrap();
        assert_eq!(stored.total_due_cents, 450);
        assert_eq!(repo.list("s1").await.unwrap().len(), 1);

        assert!(repo.delete("s1", "c1").await.unwrap());
        assert!(repo.get("s1", "c1").await.unwrap().is_none());
    }
}
