use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use timeoff_core::domain::balance::{BalanceScope, LeaveBalance};
use timeoff_core::domain::employee::EmployeeId;
use timeoff_core::domain::leave_type::{LeaveType, LeaveTypeId};
use timeoff_core::ledger;

use super::{
    parse_decimal, parse_i32, parse_optional_date, parse_timestamp, parse_u32, BalanceRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlBalanceRepository {
    pool: DbPool,
}

impl SqlBalanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BalanceRepository for SqlBalanceRepository {
    async fn find(&self, scope: &BalanceScope) -> Result<Option<LeaveBalance>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                employee_id, leave_type_id, year, entitled, carried_forward,
                carry_forward_expiry, additional, used, available, state_version,
                created_at, updated_at
             FROM leave_balances
             WHERE employee_id = ? AND leave_type_id = ? AND year = ?",
        )
        .bind(&scope.employee_id.0)
        .bind(&scope.leave_type_id.0)
        .bind(i64::from(scope.year))
        .fetch_optional(&self.pool)
        .await?;

        row.map(balance_from_row).transpose()
    }

    async fn get_or_create(
        &self,
        scope: &BalanceScope,
        leave_type: &LeaveType,
        now: DateTime<Utc>,
    ) -> Result<LeaveBalance, RepositoryError> {
        let seeded = ledger::new_balance(scope.clone(), leave_type, now);

        sqlx::query(
            "INSERT INTO leave_balances (
                employee_id, leave_type_id, year, entitled, carried_forward,
                carry_forward_expiry, additional, used, available, state_version,
                created_at, updated_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(employee_id, leave_type_id, year) DO NOTHING",
        )
        .bind(&scope.employee_id.0)
        .bind(&scope.leave_type_id.0)
        .bind(i64::from(scope.year))
        .bind(seeded.entitled.to_string())
        .bind(seeded.carried_forward.to_string())
        .bind(seeded.carry_forward_expiry.map(|date| date.to_string()))
        .bind(seeded.additional.to_string())
        .bind(seeded.used.to_string())
        .bind(seeded.available.to_string())
        .bind(i64::from(seeded.state_version))
        .bind(seeded.created_at.to_rfc3339())
        .bind(seeded.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find(scope).await?.ok_or_else(|| {
            RepositoryError::Decode(format!(
                "balance row missing after insert for {}/{}/{}",
                scope.employee_id.0, scope.leave_type_id.0, scope.year
            ))
        })
    }

    async fn update_versioned(&self, balance: &LeaveBalance) -> Result<bool, RepositoryError> {
        update_versioned_with(&self.pool, balance).await
    }
}

/// Shared by the repository and the service transaction paths. The write only
/// lands when the stored `state_version` still equals the version the caller
/// read, i.e. `balance.state_version - 1` after the in-memory bump.
pub(crate) async fn update_versioned_with<'e, E>(
    executor: E,
    balance: &LeaveBalance,
) -> Result<bool, RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        "UPDATE leave_balances
         SET entitled = ?, carried_forward = ?, carry_forward_expiry = ?, additional = ?,
             used = ?, available = ?, state_version = ?, updated_at = ?
         WHERE employee_id = ? AND leave_type_id = ? AND year = ? AND state_version = ?",
    )
    .bind(balance.entitled.to_string())
    .bind(balance.carried_forward.to_string())
    .bind(balance.carry_forward_expiry.map(|date| date.to_string()))
    .bind(balance.additional.to_string())
    .bind(balance.used.to_string())
    .bind(balance.available.to_string())
    .bind(i64::from(balance.state_version))
    .bind(balance.updated_at.to_rfc3339())
    .bind(&balance.scope.employee_id.0)
    .bind(&balance.scope.leave_type_id.0)
    .bind(i64::from(balance.scope.year))
    .bind(i64::from(balance.state_version) - 1)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn balance_from_row(row: SqliteRow) -> Result<LeaveBalance, RepositoryError> {
    let scope = BalanceScope {
        employee_id: EmployeeId(row.try_get("employee_id")?),
        leave_type_id: LeaveTypeId(row.try_get("leave_type_id")?),
        year: parse_i32("year", row.try_get("year")?)?,
    };

    Ok(LeaveBalance {
        scope,
        entitled: parse_decimal("entitled", row.try_get("entitled")?)?,
        carried_forward: parse_decimal("carried_forward", row.try_get("carried_forward")?)?,
        carry_forward_expiry: parse_optional_date(
            "carry_forward_expiry",
            row.try_get("carry_forward_expiry")?,
        )?,
        additional: parse_decimal("additional", row.try_get("additional")?)?,
        used: parse_decimal("used", row.try_get("used")?)?,
        available: parse_decimal("available", row.try_get("available")?)?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
