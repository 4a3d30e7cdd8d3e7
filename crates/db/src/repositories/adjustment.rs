use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use timeoff_core::domain::adjustment::{AdjustmentId, AdjustmentKind, BalanceAdjustment};
use timeoff_core::domain::balance::BalanceScope;
use timeoff_core::domain::employee::EmployeeId;
use timeoff_core::domain::leave_request::LeaveRequestId;
use timeoff_core::domain::leave_type::LeaveTypeId;
use timeoff_core::ledger::ChainedAdjustment;

use super::{
    parse_date, parse_decimal, parse_i32, parse_timestamp, parse_u32, AdjustmentRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlAdjustmentRepository {
    pool: DbPool,
}

impl SqlAdjustmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AdjustmentRepository for SqlAdjustmentRepository {
    async fn append(&self, entry: ChainedAdjustment) -> Result<(), RepositoryError> {
        insert_entry(&self.pool, &entry).await
    }

    async fn list_for_scope(
        &self,
        scope: &BalanceScope,
    ) -> Result<Vec<ChainedAdjustment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id, employee_id, leave_type_id, year, kind, days_delta,
                balance_before, balance_after, effective_date, actor_id, reason,
                leave_request_id, correlation_id, chain_version, prev_hash,
                entry_hash, signature, occurred_at
             FROM balance_adjustments
             WHERE employee_id = ? AND leave_type_id = ? AND year = ?
             ORDER BY chain_version ASC",
        )
        .bind(&scope.employee_id.0)
        .bind(&scope.leave_type_id.0)
        .bind(i64::from(scope.year))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn latest_for_scope(
        &self,
        scope: &BalanceScope,
    ) -> Result<Option<ChainedAdjustment>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id, employee_id, leave_type_id, year, kind, days_delta,
                balance_before, balance_after, effective_date, actor_id, reason,
                leave_request_id, correlation_id, chain_version, prev_hash,
                entry_hash, signature, occurred_at
             FROM balance_adjustments
             WHERE employee_id = ? AND leave_type_id = ? AND year = ?
             ORDER BY chain_version DESC
             LIMIT 1",
        )
        .bind(&scope.employee_id.0)
        .bind(&scope.leave_type_id.0)
        .bind(i64::from(scope.year))
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn list_for_request(
        &self,
        request_id: &LeaveRequestId,
    ) -> Result<Vec<ChainedAdjustment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id, employee_id, leave_type_id, year, kind, days_delta,
                balance_before, balance_after, effective_date, actor_id, reason,
                leave_request_id, correlation_id, chain_version, prev_hash,
                entry_hash, signature, occurred_at
             FROM balance_adjustments
             WHERE leave_request_id = ?
             ORDER BY occurred_at ASC, chain_version ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}

/// Append-only insert shared by the repository and the service transaction
/// paths. A replayed chain version trips the per-scope UNIQUE constraint and
/// surfaces as a database error instead of silently rewriting history.
pub(crate) async fn insert_entry<'e, E>(
    executor: E,
    entry: &ChainedAdjustment,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let adjustment = &entry.adjustment;
    sqlx::query(
        "INSERT INTO balance_adjustments (
            id, employee_id, leave_type_id, year, kind, days_delta,
            balance_before, balance_after, effective_date, actor_id, reason,
            leave_request_id, correlation_id, chain_version, prev_hash,
            entry_hash, signature, occurred_at
         )
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&adjustment.id.0)
    .bind(&adjustment.scope.employee_id.0)
    .bind(&adjustment.scope.leave_type_id.0)
    .bind(i64::from(adjustment.scope.year))
    .bind(adjustment.kind.as_str())
    .bind(adjustment.days_delta.to_string())
    .bind(adjustment.balance_before.to_string())
    .bind(adjustment.balance_after.to_string())
    .bind(adjustment.effective_date.to_string())
    .bind(&adjustment.actor_id.0)
    .bind(&adjustment.reason)
    .bind(adjustment.leave_request_id.as_ref().map(|id| id.0.as_str()))
    .bind(&adjustment.correlation_id)
    .bind(i64::from(entry.chain_version))
    .bind(entry.prev_hash.as_deref())
    .bind(&entry.entry_hash)
    .bind(&entry.signature)
    .bind(adjustment.occurred_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

fn entry_from_row(row: SqliteRow) -> Result<ChainedAdjustment, RepositoryError> {
    let raw_kind: String = row.try_get("kind")?;
    let kind = AdjustmentKind::parse(&raw_kind).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown adjustment kind `{raw_kind}`"))
    })?;

    let adjustment = BalanceAdjustment {
        id: AdjustmentId(row.try_get("id")?),
        scope: BalanceScope {
            employee_id: EmployeeId(row.try_get("employee_id")?),
            leave_type_id: LeaveTypeId(row.try_get("leave_type_id")?),
            year: parse_i32("year", row.try_get("year")?)?,
        },
        kind,
        days_delta: parse_decimal("days_delta", row.try_get("days_delta")?)?,
        balance_before: parse_decimal("balance_before", row.try_get("balance_before")?)?,
        balance_after: parse_decimal("balance_after", row.try_get("balance_after")?)?,
        effective_date: parse_date("effective_date", row.try_get("effective_date")?)?,
        actor_id: EmployeeId(row.try_get("actor_id")?),
        reason: row.try_get("reason")?,
        leave_request_id: row
            .try_get::<Option<String>, _>("leave_request_id")?
            .map(LeaveRequestId),
        correlation_id: row.try_get("correlation_id")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    };

    Ok(ChainedAdjustment {
        adjustment,
        chain_version: parse_u32("chain_version", row.try_get("chain_version")?)?,
        prev_hash: row.try_get("prev_hash")?,
        entry_hash: row.try_get("entry_hash")?,
        signature: row.try_get("signature")?,
    })
}
