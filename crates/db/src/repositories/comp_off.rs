use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use timeoff_core::domain::comp_off::{CompOffGrant, CompOffGrantStatus, CompOffId};
use timeoff_core::domain::employee::EmployeeId;
use timeoff_core::domain::leave_request::LeaveRequestId;

use super::{
    parse_bool_flag, parse_date, parse_decimal, parse_optional_date, parse_optional_timestamp,
    parse_timestamp, CompOffRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlCompOffRepository {
    pool: DbPool,
}

impl SqlCompOffRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CompOffRepository for SqlCompOffRepository {
    async fn find_by_id(&self, id: &CompOffId) -> Result<Option<CompOffGrant>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id, employee_id, worked_date, hours_worked, days_granted, expiry_date,
                status, reason, is_used, used_date, leave_request_id, approved_by,
                approved_at, approval_notes, created_at, updated_at
             FROM comp_off_grants
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(grant_from_row).transpose()
    }

    async fn find_by_ids(&self, ids: &[CompOffId]) -> Result<Vec<CompOffGrant>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT
                id, employee_id, worked_date, hours_worked, days_granted, expiry_date,
                status, reason, is_used, used_date, leave_request_id, approved_by,
                approved_at, approval_notes, created_at, updated_at
             FROM comp_off_grants
             WHERE id IN ({placeholders})
             ORDER BY worked_date ASC, id ASC"
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(&id.0);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(grant_from_row).collect()
    }

    async fn list_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<CompOffGrant>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id, employee_id, worked_date, hours_worked, days_granted, expiry_date,
                status, reason, is_used, used_date, leave_request_id, approved_by,
                approved_at, approval_notes, created_at, updated_at
             FROM comp_off_grants
             WHERE employee_id = ?
             ORDER BY worked_date DESC, created_at DESC",
        )
        .bind(&employee_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(grant_from_row).collect()
    }

    async fn save(&self, grant: CompOffGrant) -> Result<(), RepositoryError> {
        upsert_grant(&self.pool, &grant).await
    }
}

/// Shared by the repository and the service transaction paths.
pub(crate) async fn upsert_grant<'e, E>(
    executor: E,
    grant: &CompOffGrant,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO comp_off_grants (
            id, employee_id, worked_date, hours_worked, days_granted, expiry_date,
            status, reason, is_used, used_date, leave_request_id, approved_by,
            approved_at, approval_notes, created_at, updated_at
         )
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             employee_id = excluded.employee_id,
             worked_date = excluded.worked_date,
             hours_worked = excluded.hours_worked,
             days_granted = excluded.days_granted,
             expiry_date = excluded.expiry_date,
             status = excluded.status,
             reason = excluded.reason,
             is_used = excluded.is_used,
             used_date = excluded.used_date,
             leave_request_id = excluded.leave_request_id,
             approved_by = excluded.approved_by,
             approved_at = excluded.approved_at,
             approval_notes = excluded.approval_notes,
             updated_at = excluded.updated_at",
    )
    .bind(&grant.id.0)
    .bind(&grant.employee_id.0)
    .bind(grant.worked_date.to_string())
    .bind(grant.hours_worked.to_string())
    .bind(grant.days_granted.to_string())
    .bind(grant.expiry_date.to_string())
    .bind(grant.status.as_str())
    .bind(grant.reason.as_deref())
    .bind(if grant.is_used { 1_i64 } else { 0_i64 })
    .bind(grant.used_date.map(|date| date.to_string()))
    .bind(grant.leave_request_id.as_ref().map(|id| id.0.as_str()))
    .bind(grant.approved_by.as_ref().map(|id| id.0.as_str()))
    .bind(grant.approved_at.map(|at| at.to_rfc3339()))
    .bind(grant.approval_notes.as_deref())
    .bind(grant.created_at.to_rfc3339())
    .bind(grant.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

fn grant_from_row(row: SqliteRow) -> Result<CompOffGrant, RepositoryError> {
    let raw_status: String = row.try_get("status")?;
    let status = CompOffGrantStatus::parse(&raw_status).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown comp-off grant status `{raw_status}`"))
    })?;

    Ok(CompOffGrant {
        id: CompOffId(row.try_get("id")?),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        worked_date: parse_date("worked_date", row.try_get("worked_date")?)?,
        hours_worked: parse_decimal("hours_worked", row.try_get("hours_worked")?)?,
        days_granted: parse_decimal("days_granted", row.try_get("days_granted")?)?,
        expiry_date: parse_date("expiry_date", row.try_get("expiry_date")?)?,
        status,
        reason: row.try_get("reason")?,
        is_used: parse_bool_flag("is_used", row.try_get("is_used")?)?,
        used_date: parse_optional_date("used_date", row.try_get("used_date")?)?,
        leave_request_id: row.try_get::<Option<String>, _>("leave_request_id")?.map(LeaveRequestId),
        approved_by: row.try_get::<Option<String>, _>("approved_by")?.map(EmployeeId),
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        approval_notes: row.try_get("approval_notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
