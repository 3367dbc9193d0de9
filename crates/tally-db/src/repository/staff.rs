//! # Staff Repository
//!
//! Employees, attendance and salary payments. Plain record keeping; none of
//! it touches stock.

use sqlx::SqlitePool;

use crate::error::DbResult;
use crate::feed::{ChangeEvent, ChangeFeed};
use tally_core::{AttendanceRecord, Collection, Employee, SalaryRecord};

#[derive(Debug, Clone)]
pub struct StaffRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl StaffRepository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        StaffRepository { pool, feed }
    }

    // -------------------------------------------------------------------------
    // Employees
    // -------------------------------------------------------------------------

    pub async fn list_employees(&self, store_id: &str) -> DbResult<Vec<Employee>> {
        let employees = sqlx::query_as::<_, Employee>(
            "SELECT * FROM employees WHERE store_id = ? ORDER BY name COLLATE NOCASE, id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(employees)
    }

    pub async fn upsert_employee(&self, store_id: &str, employee: &Employee) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO employees (store_id, id, name, designation, phone, salary_cents, join_date, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (store_id, id) DO UPDATE SET
                name = excluded.name,
                designation = excluded.designation,
                phone = excluded.phone,
                salary_cents = excluded.salary_cents,
                join_date = excluded.join_date,
                status = excluded.status
            "#,
        )
        .bind(store_id)
        .bind(&employee.id)
        .bind(&employee.name)
        .bind(&employee.designation)
        .bind(&employee.phone)
        .bind(employee.salary_cents)
        .bind(employee.join_date)
        .bind(employee.status)
        .execute(&self.pool)
        .await?;

        self.feed
            .publish(ChangeEvent::upserted(store_id, Collection::Employees, &employee.id));
        Ok(())
    }

    pub async fn delete_employee(&self, store_id: &str, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM employees WHERE store_id = ? AND id = ?")
            .bind(store_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.feed
                .publish(ChangeEvent::deleted(store_id, Collection::Employees, id));
        }
        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Attendance
    // -------------------------------------------------------------------------

    /// Attendance records, most recent day first.
    pub async fn list_attendance(&self, store_id: &str) -> DbResult<Vec<AttendanceRecord>> {
        let records = sqlx::query_as::<_, AttendanceRecord>(
            "SELECT * FROM attendance WHERE store_id = ? ORDER BY date DESC, id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn upsert_attendance(&self, store_id: &str, record: &AttendanceRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO attendance (store_id, id, employee_id, date, status)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (store_id, id) DO UPDATE SET
                employee_id = excluded.employee_id,
                date = excluded.date,
                status = excluded.status
            "#,
        )
        .bind(store_id)
        .bind(&record.id)
        .bind(&record.employee_id)
        .bind(record.date)
        .bind(record.status)
        .execute(&self.pool)
        .await?;

        self.feed
            .publish(ChangeEvent::upserted(store_id, Collection::Attendance, &record.id));
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Salaries
    // -------------------------------------------------------------------------

    pub async fn list_salaries(&self, store_id: &str) -> DbResult<Vec<SalaryRecord>> {
        let records = sqlx::query_as::<_, SalaryRecord>(
            "SELECT * FROM salaries WHERE store_id = ? ORDER BY date DESC, id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn upsert_salary(&self, store_id: &str, record: &SalaryRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO salaries (store_id, id, employee_id, amount_cents, date, month)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (store_id, id) DO UPDATE SET
                employee_id = excluded.employee_id,
                amount_cents = excluded.amount_cents,
                date = excluded.date,
                month = excluded.month
            "#,
        )
        .bind(store_id)
        .bind(&record.id)
        .bind(&record.employee_id)
        .bind(record.amount_cents)
        .bind(record.date)
        .bind(&record.month)
        .execute(&self.pool)
        .await?;

        self.feed
            .publish(ChangeEvent::upserted(store_id, Collection::Salaries, &record.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::NaiveDate;
    use tally_core::{AttendanceStatus, EmployeeStatus};

    #[tokio::test]
    async fn test_staff_records() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.staff();
        let joined = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        repo.upsert_employee(
            "s1",
            &Employee {
                id: "e1".to_string(),
                name: "Karim".to_string(),
                designation: "Presser".to_string(),
                phone: "01800000000".to_string(),
                salary_cents: 1_500_000,
                join_date: joined,
                status: EmployeeStatus::Active,
            },
        )
        .await
        .unwrap();

        for (id, day, status) in [
            ("a1", 1, AttendanceStatus::Present),
            ("a2", 2, AttendanceStatus::HalfDay),
        ] {
            repo.upsert_attendance(
                "s1",
                &AttendanceRecord {
                    id: id.to_string(),
                    employee_id: "e1".to_string(),
                    date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
                    status,
                },
            )
            .await
            .unwrap();
        }

        repo.upsert_salary(
            "s1",
            &SalaryRecord {
                id: "sal1".to_string(),
                employee_id: "e1".to_string(),
                amount_cents: 1_500_000,
                date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
                month: "2025-01".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.list_employees("s1").await.unwrap()[0].join_date, joined);
        let attendance = repo.list_attendance("s1").await.unwrap();
        assert_eq!(attendance[0].status, AttendanceStatus::HalfDay);
        assert_eq!(repo.list_salaries("s1").await.unwrap().len(), 1);
        assert!(repo.delete_employee("s1", "e1").await.unwrap());
    }
}
