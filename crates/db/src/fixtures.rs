use crate::connection::DbPool;
use crate::repositories::RepositoryError;
use rust_decimal::Decimal;
use sqlx::Executor;
use std::str::FromStr;
use timeoff_core::comp_off_ledger::CompOffPolicy;

/// Canonical E2E seeds and verification contract for the three core leave
/// flows.
const SEED_FLOWS: &[SeedFlowContract] = &[
    SeedFlowContract {
        flow_type: "approval_pending",
        employee_id: "emp-seed-asha",
        request_id: Some("req-seed-annual-001"),
        leave_type_id: Some("lt-seed-annual"),
        request_status: Some("pending"),
        total_days: Some("3"),
        comp_off_days_used: Some("1"),
        comp_off_ids: &["co-seed-100"],
        balance_year: Some(2025),
        grant_id: None,
        grant_status: None,
        description: "Three-day annual request with one comp-off day of cover, awaiting resolution",
    },
    SeedFlowContract {
        flow_type: "half_day_pending",
        employee_id: "emp-seed-rohan",
        request_id: Some("req-seed-half-002"),
        leave_type_id: Some("lt-seed-casual"),
        request_status: Some("pending"),
        total_days: Some("0.5"),
        comp_off_days_used: Some("0"),
        comp_off_ids: &[],
        balance_year: Some(2025),
        grant_id: None,
        grant_status: None,
        description: "First-half casual request worth half a day, awaiting resolution",
    },
    SeedFlowContract {
        flow_type: "comp_off_claim",
        employee_id: "emp-seed-rohan",
        request_id: None,
        leave_type_id: None,
        request_status: None,
        total_days: None,
        comp_off_days_used: None,
        comp_off_ids: &[],
        balance_year: None,
        grant_id: Some("co-seed-201"),
        grant_status: Some("pending"),
        description: "Weekend-shift comp-off claim awaiting manager approval",
    },
];

const SEED_EMPLOYEE_IDS: &[&str] = &["emp-seed-asha", "emp-seed-rohan", "emp-seed-meera"];

const SEED_LEAVE_TYPE_IDS: &[&str] = &["lt-seed-annual", "lt-seed-casual", "lt-seed-compoff"];

const SEED_REQUEST_IDS: &[&str] = &["req-seed-annual-001", "req-seed-half-002"];

const SEED_GRANT_IDS: &[&str] = &["co-seed-100", "co-seed-201"];

/// E2E seed dataset for the three core leave flows.
///
/// Provides deterministic fixtures for:
/// 1. A pending annual request with comp-off cover
/// 2. A pending half-day casual request
/// 3. A pending comp-off claim
///
/// Balances are seeded untouched at state_version 1 and no adjustment rows
/// are included, so every hash chain starts with the first live consumption.
pub struct E2ESeedDataset;

impl E2ESeedDataset {
    /// SQL fixture content for E2E seed data.
    pub const SQL: &str = include_str!("../../../config/fixtures/e2e_seed_data.sql");

    /// Load E2E seed dataset into the database.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let flows_seeded = SEED_FLOWS
            .iter()
            .map(|flow| FlowSeedInfo {
                flow_type: flow.flow_type,
                employee_id: flow.employee_id,
                description: flow.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { flows_seeded })
    }

    /// Verify that seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let quoted_employees = sql_array_from_ids(SEED_EMPLOYEE_IDS);
        let active_employees: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM employees WHERE id IN {quoted_employees} AND active = 1"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("employees-active", active_employees == SEED_EMPLOYEE_IDS.len() as i64));

        let quoted_types = sql_array_from_ids(SEED_LEAVE_TYPE_IDS);
        let type_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM leave_types WHERE id IN {quoted_types}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("leave-types", type_count == SEED_LEAVE_TYPE_IDS.len() as i64));

        let comp_off_type: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM leave_types WHERE id = 'lt-seed-compoff' AND is_comp_off_type = 1)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("comp-off-leave-type", comp_off_type == 1));

        for flow in SEED_FLOWS {
            if let (Some(request_id), Some(status)) = (flow.request_id, flow.request_status) {
                let request_ok: i64 = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM leave_requests WHERE id = ?1 AND status = ?2)",
                )
                .bind(request_id)
                .bind(status)
                .fetch_one(pool)
                .await?;
                checks.push((flow.request_label(), request_ok == 1));

                checks.push((flow.day_figures_label(), Self::verify_day_figures(pool, flow).await?));
                checks
                    .push((flow.comp_off_ids_label(), Self::verify_comp_off_ids(pool, flow).await?));
            }

            if let Some(year) = flow.balance_year {
                let balance_ok: i64 = sqlx::query_scalar(
                    "SELECT EXISTS(
                        SELECT 1 FROM leave_balances
                        WHERE employee_id = ?1 AND leave_type_id = ?2 AND year = ?3
                          AND state_version = 1 AND used = '0' AND available = entitled
                     )",
                )
                .bind(flow.employee_id)
                .bind(flow.leave_type_id.unwrap_or_default())
                .bind(year)
                .fetch_one(pool)
                .await?;
                checks.push((flow.balance_label(), balance_ok == 1));
            }

            if let (Some(grant_id), Some(status)) = (flow.grant_id, flow.grant_status) {
                let grant_ok: i64 = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM comp_off_grants WHERE id = ?1 AND status = ?2 AND is_used = 0)",
                )
                .bind(grant_id)
                .bind(status)
                .fetch_one(pool)
                .await?;
                checks.push((flow.grant_label(), grant_ok == 1));
            }
        }

        checks.push(("grant-conversions", Self::verify_grant_conversions(pool).await?));

        let quoted_requests = sql_array_from_ids(SEED_REQUEST_IDS);
        let adjustment_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM balance_adjustments WHERE employee_id IN {quoted_employees}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("adjustment-chains-empty", adjustment_count == 0));

        let resolution_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM resolution_ledger WHERE leave_request_id IN {quoted_requests}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("resolution-ledger-empty", resolution_count == 0));

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    async fn verify_day_figures(
        pool: &DbPool,
        flow: &SeedFlowContract,
    ) -> Result<bool, RepositoryError> {
        let Some(request_id) = flow.request_id else {
            return Ok(false);
        };
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT total_days, comp_off_days_used FROM leave_requests WHERE id = ?",
        )
        .bind(request_id)
        .fetch_one(pool)
        .await?;
        let (total_days, comp_off_days_used) = row;

        if Some(total_days.as_str()) != flow.total_days {
            return Ok(false);
        }
        Ok(Some(comp_off_days_used.as_str()) == flow.comp_off_days_used)
    }

    async fn verify_comp_off_ids(
        pool: &DbPool,
        flow: &SeedFlowContract,
    ) -> Result<bool, RepositoryError> {
        let Some(request_id) = flow.request_id else {
            return Ok(false);
        };
        let comp_off_ids_json: String =
            sqlx::query_scalar("SELECT comp_off_ids FROM leave_requests WHERE id = ?")
                .bind(request_id)
                .fetch_one(pool)
                .await?;
        let comp_off_ids: Vec<String> = serde_json::from_str(&comp_off_ids_json)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        Ok(json_string_list_matches(&comp_off_ids, flow.comp_off_ids))
    }

    /// Seeded grant day figures must match what the default conversion policy
    /// would produce for the seeded hours.
    async fn verify_grant_conversions(pool: &DbPool) -> Result<bool, RepositoryError> {
        let quoted_grants = sql_array_from_ids(SEED_GRANT_IDS);
        let rows = sqlx::query_as::<_, (String, String)>(&format!(
            "SELECT hours_worked, days_granted FROM comp_off_grants WHERE id IN {quoted_grants}"
        ))
        .fetch_all(pool)
        .await?;

        if rows.len() != SEED_GRANT_IDS.len() {
            return Ok(false);
        }

        let policy = CompOffPolicy::default();
        for (hours_worked, days_granted) in rows {
            let hours = Decimal::from_str(&hours_worked)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            let days = Decimal::from_str(&days_granted)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            if policy.days_for_hours(hours) != days {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Clean up seeded fixtures from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_employees = sql_array_from_ids(SEED_EMPLOYEE_IDS);
        let quoted_types = sql_array_from_ids(SEED_LEAVE_TYPE_IDS);
        let quoted_requests = sql_array_from_ids(SEED_REQUEST_IDS);
        let quoted_grants = sql_array_from_ids(SEED_GRANT_IDS);

        sqlx::query(&format!(
            "DELETE FROM resolution_ledger WHERE leave_request_id IN {quoted_requests}"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "DELETE FROM balance_adjustments WHERE employee_id IN {quoted_employees}"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM comp_off_grants WHERE id IN {quoted_grants}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM leave_requests WHERE id IN {quoted_requests}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "DELETE FROM leave_balances WHERE employee_id IN {quoted_employees}"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM leave_types WHERE id IN {quoted_types}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM employees WHERE id IN {quoted_employees}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedFlowContract {
    flow_type: &'static str,
    employee_id: &'static str,
    request_id: Option<&'static str>,
    leave_type_id: Option<&'static str>,
    request_status: Option<&'static str>,
    total_days: Option<&'static str>,
    comp_off_days_used: Option<&'static str>,
    comp_off_ids: &'static [&'static str],
    balance_year: Option<i64>,
    grant_id: Option<&'static str>,
    grant_status: Option<&'static str>,
    description: &'static str,
}

impl SeedFlowContract {
    fn request_label(&self) -> &'static str {
        match self.flow_type {
            "approval_pending" => "flow-approval-request",
            "half_day_pending" => "flow-halfday-request",
            _ => "flow-compoff-request",
        }
    }

    fn day_figures_label(&self) -> &'static str {
        match self.flow_type {
            "approval_pending" => "flow-approval-day-figures",
            "half_day_pending" => "flow-halfday-day-figures",
            _ => "flow-compoff-day-figures",
        }
    }

    fn comp_off_ids_label(&self) -> &'static str {
        match self.flow_type {
            "approval_pending" => "flow-approval-comp-off-ids",
            "half_day_pending" => "flow-halfday-comp-off-ids",
            _ => "flow-compoff-comp-off-ids",
        }
    }

    fn balance_label(&self) -> &'static str {
        match self.flow_type {
            "approval_pending" => "flow-approval-balance",
            "half_day_pending" => "flow-halfday-balance",
            _ => "flow-compoff-balance",
        }
    }

    fn grant_label(&self) -> &'static str {
        match self.flow_type {
            "approval_pending" => "flow-approval-grant",
            "half_day_pending" => "flow-halfday-grant",
            _ => "flow-compoff-grant",
        }
    }
}

fn json_string_list_matches(actual: &[String], expected: &[&str]) -> bool {
    actual.len() == expected.len() && actual.iter().zip(expected).all(|(a, b)| a == b)
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub flows_seeded: Vec<FlowSeedInfo>,
}

#[derive(Debug)]
pub struct FlowSeedInfo {
    pub flow_type: &'static str,
    pub employee_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
