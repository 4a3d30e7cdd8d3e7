use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use timeoff_core::domain::employee::{Employee, EmployeeId};

use super::{parse_bool_flag, EmployeeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlEmployeeRepository {
    pool: DbPool,
}

impl SqlEmployeeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EmployeeRepository for SqlEmployeeRepository {
    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let row = sqlx::query("SELECT id, display_name, active FROM employees WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(employee_from_row).transpose()
    }

    async fn save(&self, employee: Employee) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO employees (id, display_name, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&employee.id.0)
        .bind(&employee.display_name)
        .bind(if employee.active { 1_i64 } else { 0_i64 })
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn employee_from_row(row: SqliteRow) -> Result<Employee, RepositoryError> {
    Ok(Employee {
        id: EmployeeId(row.try_get("id")?),
        display_name: row.try_get("display_name")?,
        active: parse_bool_flag("active", row.try_get("active")?)?,
    })
}
