use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use timeoff_core::domain::leave_type::{LeaveType, LeaveTypeId};

use super::{parse_bool_flag, parse_decimal, LeaveTypeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlLeaveTypeRepository {
    pool: DbPool,
}

impl SqlLeaveTypeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeaveTypeRepository for SqlLeaveTypeRepository {
    async fn find_by_id(&self, id: &LeaveTypeId) -> Result<Option<LeaveType>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id, code, name, default_annual_days, carry_forward_allowed,
                max_encashment_days, is_comp_off_type
             FROM leave_types
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(leave_type_from_row).transpose()
    }

    async fn save(&self, leave_type: LeaveType) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO leave_types (
                id, code, name, default_annual_days, carry_forward_allowed,
                max_encashment_days, is_comp_off_type, created_at, updated_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 code = excluded.code,
                 name = excluded.name,
                 default_annual_days = excluded.default_annual_days,
                 carry_forward_allowed = excluded.carry_forward_allowed,
                 max_encashment_days = excluded.max_encashment_days,
                 is_comp_off_type = excluded.is_comp_off_type,
                 updated_at = excluded.updated_at",
        )
        .bind(&leave_type.id.0)
        .bind(&leave_type.code)
        .bind(&leave_type.name)
        .bind(leave_type.default_annual_days.to_string())
        .bind(if leave_type.carry_forward_allowed { 1_i64 } else { 0_i64 })
        .bind(leave_type.max_encashment_days.to_string())
        .bind(if leave_type.is_comp_off_type { 1_i64 } else { 0_i64 })
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn leave_type_from_row(row: SqliteRow) -> Result<LeaveType, RepositoryError> {
    Ok(LeaveType {
        id: LeaveTypeId(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        default_annual_days: parse_decimal("default_annual_days", row.try_get("default_annual_days")?)?,
        carry_forward_allowed: parse_bool_flag(
            "carry_forward_allowed",
            row.try_get("carry_forward_allowed")?,
        )?,
        max_encashment_days: parse_decimal("max_encashment_days", row.try_get("max_encashment_days")?)?,
        is_comp_off_type: parse_bool_flag("is_comp_off_type", row.try_get("is_comp_off_type")?)?,
    })
}
