use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use timeoff_core::domain::leave_request::{LeaveRequestId, LeaveRequestStatus};
use timeoff_core::domain::resolution::{OperationKey, ResolutionRecord};

use super::{parse_timestamp, parse_u32, RepositoryError, ResolutionRepository};
use crate::DbPool;

pub struct SqlResolutionRepository {
    pool: DbPool,
}

impl SqlResolutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ResolutionRepository for SqlResolutionRepository {
    async fn find(&self, key: &OperationKey) -> Result<Option<ResolutionRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                operation_key, leave_request_id, outcome_status, first_applied_at,
                attempt_count
             FROM resolution_ledger
             WHERE operation_key = ?",
        )
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn save(&self, record: ResolutionRecord) -> Result<(), RepositoryError> {
        insert_record(&self.pool, &record).await
    }

    async fn record_duplicate(
        &self,
        key: &OperationKey,
    ) -> Result<ResolutionRecord, RepositoryError> {
        sqlx::query(
            "UPDATE resolution_ledger
             SET attempt_count = attempt_count + 1
             WHERE operation_key = ?",
        )
        .bind(&key.0)
        .execute(&self.pool)
        .await?;

        self.find(key).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("resolution record missing for `{}`", key.0))
        })
    }
}

/// Shared by the repository and the service transaction paths.
pub(crate) async fn insert_record<'e, E>(
    executor: E,
    record: &ResolutionRecord,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO resolution_ledger (
            operation_key, leave_request_id, outcome_status, first_applied_at,
            attempt_count
         )
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&record.operation_key.0)
    .bind(&record.leave_request_id.0)
    .bind(record.outcome_status.as_str())
    .bind(record.first_applied_at.to_rfc3339())
    .bind(i64::from(record.attempt_count))
    .execute(executor)
    .await?;

    Ok(())
}

fn record_from_row(row: SqliteRow) -> Result<ResolutionRecord, RepositoryError> {
    let raw_status: String = row.try_get("outcome_status")?;
    let outcome_status = LeaveRequestStatus::parse(&raw_status).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown resolution outcome status `{raw_status}`"))
    })?;

    Ok(ResolutionRecord {
        operation_key: OperationKey(row.try_get("operation_key")?),
        leave_request_id: LeaveRequestId(row.try_get("leave_request_id")?),
        outcome_status,
        first_applied_at: parse_timestamp("first_applied_at", row.try_get("first_applied_at")?)?,
        attempt_count: parse_u32("attempt_count", row.try_get("attempt_count")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use timeoff_core::domain::leave_request::{LeaveRequestId, LeaveRequestStatus};
    use timeoff_core::domain::resolution::{OperationKey, ResolutionRecord};

    use crate::repositories::ResolutionRepository;
    use crate::{connect_with_settings, migrations};

    use super::SqlResolutionRepository;

    async fn setup_pool() -> crate::DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to in-memory sqlite");
        migrations::run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO employees (id, display_name, active, created_at, updated_at)
             VALUES ('emp-1', 'Asha Rao', 1, '2025-01-01T00:00:00+00:00', '2025-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("seed employee");

        sqlx::query(
            "INSERT INTO leave_types (
                id, code, name, default_annual_days, carry_forward_allowed,
                max_encashment_days, is_comp_off_type, created_at, updated_at
             )
             VALUES ('lt-annual', 'ANNUAL', 'Annual Leave', '24', 1, '10', 0,
                     '2025-01-01T00:00:00+00:00', '2025-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("seed leave type");

        sqlx::query(
            "INSERT INTO leave_requests (
                id, employee_id, leave_type_id, from_date, to_date, is_half_day,
                half_day_slot, total_days, reason, use_comp_off, comp_off_days_used,
                comp_off_ids, status, created_at, updated_at
             )
             VALUES ('req-1', 'emp-1', 'lt-annual', '2025-03-10', '2025-03-12', 0,
                     NULL, '3', 'family travel', 0, '0', '[]', 'approved',
                     '2025-03-01T09:00:00+00:00', '2025-03-01T09:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("seed leave request");

        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid timestamp").with_timezone(&Utc)
    }

    fn approved_record() -> ResolutionRecord {
        ResolutionRecord {
            operation_key: OperationKey::terminal(
                &LeaveRequestId("req-1".to_string()),
                LeaveRequestStatus::Approved,
            ),
            leave_request_id: LeaveRequestId("req-1".to_string()),
            outcome_status: LeaveRequestStatus::Approved,
            first_applied_at: parse_ts("2025-03-02T10:00:00Z"),
            attempt_count: 1,
        }
    }

    #[tokio::test]
    async fn round_trips_a_resolution_record() {
        let pool = setup_pool().await;
        let repo = SqlResolutionRepository::new(pool.clone());

        let record = approved_record();
        repo.save(record.clone()).await.expect("save record");
        let found = repo.find(&record.operation_key).await.expect("find record");

        assert_eq!(found, Some(record));
        pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_resolutions_bump_the_attempt_count() {
        let pool = setup_pool().await;
        let repo = SqlResolutionRepository::new(pool.clone());

        let record = approved_record();
        repo.save(record.clone()).await.expect("save record");

        let second = repo.record_duplicate(&record.operation_key).await.expect("second attempt");
        assert_eq!(second.attempt_count, 2);

        let third = repo.record_duplicate(&record.operation_key).await.expect("third attempt");
        assert_eq!(third.attempt_count, 3);
        assert_eq!(third.outcome_status, LeaveRequestStatus::Approved);

        pool.close().await;
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let pool = setup_pool().await;
        let repo = SqlResolutionRepository::new(pool.clone());

        let found = repo
            .find(&OperationKey("req-unknown:approved".to_string()))
            .await
            .expect("lookup");

        assert_eq!(found, None);
        pool.close().await;
    }
}
