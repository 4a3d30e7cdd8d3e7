use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use timeoff_core::domain::comp_off::CompOffId;
use timeoff_core::domain::employee::EmployeeId;
use timeoff_core::domain::leave_request::{
    HalfDaySlot, LeaveRequest, LeaveRequestId, LeaveRequestStatus,
};
use timeoff_core::domain::leave_type::LeaveTypeId;

use super::{
    parse_bool_flag, parse_date, parse_decimal, parse_optional_timestamp, parse_timestamp,
    LeaveRequestRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlLeaveRequestRepository {
    pool: DbPool,
}

impl SqlLeaveRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeaveRequestRepository for SqlLeaveRequestRepository {
    async fn find_by_id(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Option<LeaveRequest>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id, employee_id, leave_type_id, from_date, to_date, is_half_day,
                half_day_slot, total_days, reason, use_comp_off, comp_off_days_used,
                comp_off_ids, status, approved_by, approved_at, rejected_by, rejected_at,
                cancelled_by, cancelled_at, cancel_reason, created_at, updated_at
             FROM leave_requests
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(leave_request_from_row).transpose()
    }

    async fn list_for_employee(
        &self,
        employee_id: &EmployeeId,
        year: Option<i32>,
    ) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let rows = if let Some(year) = year {
            sqlx::query(
                "SELECT
                    id, employee_id, leave_type_id, from_date, to_date, is_half_day,
                    half_day_slot, total_days, reason, use_comp_off, comp_off_days_used,
                    comp_off_ids, status, approved_by, approved_at, rejected_by, rejected_at,
                    cancelled_by, cancelled_at, cancel_reason, created_at, updated_at
                 FROM leave_requests
                 WHERE employee_id = ? AND from_date >= ? AND from_date <= ?
                 ORDER BY from_date DESC, created_at DESC",
            )
            .bind(&employee_id.0)
            .bind(format!("{year:04}-01-01"))
            .bind(format!("{year:04}-12-31"))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT
                    id, employee_id, leave_type_id, from_date, to_date, is_half_day,
                    half_day_slot, total_days, reason, use_comp_off, comp_off_days_used,
                    comp_off_ids, status, approved_by, approved_at, rejected_by, rejected_at,
                    cancelled_by, cancelled_at, cancel_reason, created_at, updated_at
                 FROM leave_requests
                 WHERE employee_id = ?
                 ORDER BY from_date DESC, created_at DESC",
            )
            .bind(&employee_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(leave_request_from_row).collect()
    }

    async fn list_open_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id, employee_id, leave_type_id, from_date, to_date, is_half_day,
                half_day_slot, total_days, reason, use_comp_off, comp_off_days_used,
                comp_off_ids, status, approved_by, approved_at, rejected_by, rejected_at,
                cancelled_by, cancelled_at, cancel_reason, created_at, updated_at
             FROM leave_requests
             WHERE employee_id = ? AND status IN ('pending', 'approved')
             ORDER BY from_date ASC",
        )
        .bind(&employee_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(leave_request_from_row).collect()
    }

    async fn save(&self, request: LeaveRequest) -> Result<(), RepositoryError> {
        upsert_request(&self.pool, &request).await
    }
}

/// Shared by the repository and the service transaction paths.
pub(crate) async fn upsert_request<'e, E>(
    executor: E,
    request: &LeaveRequest,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let comp_off_ids = serde_json::to_string(&request.comp_off_ids).map_err(|error| {
        RepositoryError::Encode(format!("comp_off_ids for `{}`: {error}", request.id.0))
    })?;

    sqlx::query(
        "INSERT INTO leave_requests (
            id, employee_id, leave_type_id, from_date, to_date, is_half_day,
            half_day_slot, total_days, reason, use_comp_off, comp_off_days_used,
            comp_off_ids, status, approved_by, approved_at, rejected_by, rejected_at,
            cancelled_by, cancelled_at, cancel_reason, created_at, updated_at
         )
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             employee_id = excluded.employee_id,
             leave_type_id = excluded.leave_type_id,
             from_date = excluded.from_date,
             to_date = excluded.to_date,
             is_half_day = excluded.is_half_day,
             half_day_slot = excluded.half_day_slot,
             total_days = excluded.total_days,
             reason = excluded.reason,
             use_comp_off = excluded.use_comp_off,
             comp_off_days_used = excluded.comp_off_days_used,
             comp_off_ids = excluded.comp_off_ids,
             status = excluded.status,
             approved_by = excluded.approved_by,
             approved_at = excluded.approved_at,
             rejected_by = excluded.rejected_by,
             rejected_at = excluded.rejected_at,
             cancelled_by = excluded.cancelled_by,
             cancelled_at = excluded.cancelled_at,
             cancel_reason = excluded.cancel_reason,
             updated_at = excluded.updated_at",
    )
    .bind(&request.id.0)
    .bind(&request.employee_id.0)
    .bind(&request.leave_type_id.0)
    .bind(request.from_date.to_string())
    .bind(request.to_date.to_string())
    .bind(if request.is_half_day { 1_i64 } else { 0_i64 })
    .bind(request.half_day_slot.map(|slot| slot.as_str()))
    .bind(request.total_days.to_string())
    .bind(&request.reason)
    .bind(if request.use_comp_off { 1_i64 } else { 0_i64 })
    .bind(request.comp_off_days_used.to_string())
    .bind(comp_off_ids)
    .bind(request.status.as_str())
    .bind(request.approved_by.as_ref().map(|id| id.0.as_str()))
    .bind(request.approved_at.map(|at| at.to_rfc3339()))
    .bind(request.rejected_by.as_ref().map(|id| id.0.as_str()))
    .bind(request.rejected_at.map(|at| at.to_rfc3339()))
    .bind(request.cancelled_by.as_ref().map(|id| id.0.as_str()))
    .bind(request.cancelled_at.map(|at| at.to_rfc3339()))
    .bind(request.cancel_reason.as_deref())
    .bind(request.created_at.to_rfc3339())
    .bind(request.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

fn leave_request_from_row(row: SqliteRow) -> Result<LeaveRequest, RepositoryError> {
    let raw_status: String = row.try_get("status")?;
    let status = LeaveRequestStatus::parse(&raw_status).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown leave request status `{raw_status}`"))
    })?;

    let half_day_slot = row
        .try_get::<Option<String>, _>("half_day_slot")?
        .map(|raw| {
            HalfDaySlot::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown half-day slot `{raw}`")))
        })
        .transpose()?;

    let comp_off_ids_json: String = row.try_get("comp_off_ids")?;
    let comp_off_ids: Vec<CompOffId> = serde_json::from_str(&comp_off_ids_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid comp_off_ids JSON: {error}")))?;

    Ok(LeaveRequest {
        id: LeaveRequestId(row.try_get("id")?),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        leave_type_id: LeaveTypeId(row.try_get("leave_type_id")?),
        from_date: parse_date("from_date", row.try_get("from_date")?)?,
        to_date: parse_date("to_date", row.try_get("to_date")?)?,
        is_half_day: parse_bool_flag("is_half_day", row.try_get("is_half_day")?)?,
        half_day_slot,
        total_days: parse_decimal("total_days", row.try_get("total_days")?)?,
        reason: row.try_get("reason")?,
        use_comp_off: parse_bool_flag("use_comp_off", row.try_get("use_comp_off")?)?,
        comp_off_days_used: parse_decimal("comp_off_days_used", row.try_get("comp_off_days_used")?)?,
        comp_off_ids,
        status,
        approved_by: row.try_get::<Option<String>, _>("approved_by")?.map(EmployeeId),
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        rejected_by: row.try_get::<Option<String>, _>("rejected_by")?.map(EmployeeId),
        rejected_at: parse_optional_timestamp("rejected_at", row.try_get("rejected_at")?)?,
        cancelled_by: row.try_get::<Option<String>, _>("cancelled_by")?.map(EmployeeId),
        cancelled_at: parse_optional_timestamp("cancelled_at", row.try_get("cancelled_at")?)?,
        cancel_reason: row.try_get("cancel_reason")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
