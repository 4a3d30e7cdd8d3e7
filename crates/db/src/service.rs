//! Application service over the leave engine. Each operation loads the
//! aggregates, runs one core transition, and persists the outcome inside a
//! single transaction; audit events are emitted only after commit.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use timeoff_core::approvals::{
    ApprovalCallout, ApprovalDecision, ApprovalHandle, ApprovalWorkflow,
};
use timeoff_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use timeoff_core::comp_off_ledger::{self, GrantRequest};
use timeoff_core::domain::balance::{BalanceScope, LeaveBalance};
use timeoff_core::domain::comp_off::{CompOffGrant, CompOffId};
use timeoff_core::domain::employee::EmployeeId;
use timeoff_core::domain::leave_request::{LeaveRequest, LeaveRequestId, LeaveRequestStatus};
use timeoff_core::domain::leave_type::LeaveTypeId;
use timeoff_core::domain::resolution::{OperationKey, ResolutionRecord};
use timeoff_core::errors::{ApplicationError, DomainError};
use timeoff_core::ledger::{AdjustmentChain, ChainVerification, ChainedAdjustment};
use timeoff_core::overlap;
use timeoff_core::request_engine::{CancellationCommand, LeaveRequestDraft, RequestEngine};

use crate::repositories::{
    adjustment, balance, comp_off, leave_request, resolution, AdjustmentRepository,
    BalanceRepository, CompOffRepository, EmployeeRepository, LeaveRequestRepository,
    LeaveTypeRepository, RepositoryError, ResolutionRepository, SqlAdjustmentRepository,
    SqlBalanceRepository, SqlCompOffRepository, SqlEmployeeRepository, SqlLeaveRequestRepository,
    SqlLeaveTypeRepository, SqlResolutionRepository,
};
use crate::DbPool;

/// Outcome of a submission. `workflow` is `None` when routing could not be
/// initiated; the request is Pending either way and the failure is audited.
#[derive(Clone, Debug)]
pub struct SubmitReceipt {
    pub request: LeaveRequest,
    pub workflow: Option<ApprovalHandle>,
    pub correlation_id: String,
}

/// Outcome of a terminal resolve. `applied` is `false` when the resolution
/// ledger absorbed a duplicate delivery and nothing changed.
#[derive(Clone, Debug)]
pub struct ResolveReceipt {
    pub request: LeaveRequest,
    pub applied: bool,
    pub attempt_count: u32,
}

#[derive(Clone, Debug)]
pub struct CancelReceipt {
    pub request: LeaveRequest,
    pub restored_days: Option<Decimal>,
    pub released: Vec<CompOffId>,
}

/// Balance row plus the derived figures callers show next to it.
#[derive(Clone, Debug)]
pub struct BalanceSummary {
    pub balance: LeaveBalance,
    pub pending_days: Decimal,
    pub comp_off_available: Decimal,
}

pub struct LeaveService {
    pool: DbPool,
    engine: RequestEngine,
    chain: AdjustmentChain,
    workflow: Arc<dyn ApprovalWorkflow>,
    audit: Arc<dyn AuditSink>,
    employees: SqlEmployeeRepository,
    leave_types: SqlLeaveTypeRepository,
    requests: SqlLeaveRequestRepository,
    balances: SqlBalanceRepository,
    grants: SqlCompOffRepository,
    adjustments: SqlAdjustmentRepository,
    resolutions: SqlResolutionRepository,
}

impl LeaveService {
    pub fn new(
        pool: DbPool,
        engine: RequestEngine,
        chain: AdjustmentChain,
        workflow: Arc<dyn ApprovalWorkflow>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            engine,
            chain,
            workflow,
            audit,
            employees: SqlEmployeeRepository::new(pool.clone()),
            leave_types: SqlLeaveTypeRepository::new(pool.clone()),
            requests: SqlLeaveRequestRepository::new(pool.clone()),
            balances: SqlBalanceRepository::new(pool.clone()),
            grants: SqlCompOffRepository::new(pool.clone()),
            adjustments: SqlAdjustmentRepository::new(pool.clone()),
            resolutions: SqlResolutionRepository::new(pool.clone()),
            pool,
        }
    }

    /// Validate and persist a new Pending request, then initiate approval
    /// routing. The commit happens before the callout: a routing failure
    /// never rolls the submission back, it only leaves `workflow` empty.
    pub async fn submit(
        &self,
        draft: LeaveRequestDraft,
        correlation_id: Option<String>,
    ) -> Result<SubmitReceipt, ApplicationError> {
        let correlation = correlation_id.unwrap_or_else(mint_correlation_id);
        let now = Utc::now();
        let today = now.date_naive();

        let employee = self
            .employees
            .find_by_id(&draft.employee_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                DomainError::Validation(format!("unknown employee {}", draft.employee_id.0))
            })?;
        if !employee.active {
            return Err(DomainError::Validation(format!(
                "employee {} is inactive",
                employee.id.0
            ))
            .into());
        }

        let leave_type = self
            .leave_types
            .find_by_id(&draft.leave_type_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                DomainError::Validation(format!("unknown leave type {}", draft.leave_type_id.0))
            })?;

        let scope = BalanceScope {
            employee_id: draft.employee_id.clone(),
            leave_type_id: draft.leave_type_id.clone(),
            year: draft.from_date.year(),
        };
        let balance =
            self.balances.get_or_create(&scope, &leave_type, now).await.map_err(persistence)?;
        let open =
            self.requests.list_open_for_employee(&draft.employee_id).await.map_err(persistence)?;
        let grants = if draft.use_comp_off {
            self.grants.find_by_ids(&draft.comp_off_ids).await.map_err(persistence)?
        } else {
            Vec::new()
        };

        let prepared = self.engine.prepare_submission(
            draft,
            &open,
            &balance,
            &grants,
            today,
            now,
            &correlation,
        )?;

        let mut tx = self.pool.begin().await.map_err(database)?;
        leave_request::upsert_request(&mut *tx, &prepared.request).await.map_err(persistence)?;
        tx.commit().await.map_err(database)?;

        self.emit_all(prepared.events);

        let callout = ApprovalCallout::leave(
            prepared.request.id.clone(),
            prepared.request.employee_id.clone(),
            correlation.clone(),
        );
        let handle = match self.workflow.request_approval(callout).await {
            Ok(handle) => {
                self.audit.emit(
                    AuditEvent::new(
                        Some(prepared.request.id.clone()),
                        Some(prepared.request.employee_id.clone()),
                        correlation.clone(),
                        "workflow.approval_requested",
                        AuditCategory::Workflow,
                        prepared.request.employee_id.0.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("workflow_ref", handle.workflow_ref.clone()),
                );
                Some(handle)
            }
            Err(error) => {
                self.audit.emit(
                    AuditEvent::new(
                        Some(prepared.request.id.clone()),
                        Some(prepared.request.employee_id.clone()),
                        correlation.clone(),
                        "workflow.approval_requested",
                        AuditCategory::Workflow,
                        prepared.request.employee_id.0.clone(),
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                None
            }
        };

        Ok(SubmitReceipt { request: prepared.request, workflow: handle, correlation_id: correlation })
    }

    /// Apply an approval delivered by the workflow callback. Redelivery of an
    /// already-applied approval is a recorded no-op keyed by
    /// `request_id:approved` in the resolution ledger.
    pub async fn resolve_approve(
        &self,
        request_id: &LeaveRequestId,
        decision: ApprovalDecision,
        correlation_id: Option<String>,
    ) -> Result<ResolveReceipt, ApplicationError> {
        let correlation = correlation_id.unwrap_or_else(mint_correlation_id);
        let request = self.load_request(request_id).await?;

        let key = OperationKey::terminal(&request.id, LeaveRequestStatus::Approved);
        if let Some(existing) = self.resolutions.find(&key).await.map_err(persistence)? {
            return self.absorb_duplicate(request, existing, &decision, &correlation).await;
        }

        let scope = request.balance_scope();
        let balance = self.load_balance(&scope).await?;
        let grants =
            self.grants.find_by_ids(&request.comp_off_ids).await.map_err(persistence)?;

        let outcome = self.engine.approve(request, balance, grants, &decision, &correlation)?;

        let chained = match &outcome.adjustment {
            Some(adjustment) => {
                let latest =
                    self.adjustments.latest_for_scope(&scope).await.map_err(persistence)?;
                Some(self.chain.extend(latest.as_ref(), adjustment.clone()))
            }
            None => None,
        };
        let record = ResolutionRecord {
            operation_key: key,
            leave_request_id: outcome.request.id.clone(),
            outcome_status: LeaveRequestStatus::Approved,
            first_applied_at: Utc::now(),
            attempt_count: 1,
        };

        let mut tx = self.pool.begin().await.map_err(database)?;
        leave_request::upsert_request(&mut *tx, &outcome.request).await.map_err(persistence)?;
        if let Some(entry) = &chained {
            let updated = balance::update_versioned_with(&mut *tx, &outcome.balance)
                .await
                .map_err(persistence)?;
            if !updated {
                return Err(DomainError::Conflict(
                    "balance changed while the approval was in flight".to_string(),
                )
                .into());
            }
            adjustment::insert_entry(&mut *tx, entry).await.map_err(persistence)?;
        }
        for grant in &outcome.grants {
            comp_off::upsert_grant(&mut *tx, grant).await.map_err(persistence)?;
        }
        resolution::insert_record(&mut *tx, &record).await.map_err(persistence)?;
        tx.commit().await.map_err(database)?;

        self.emit_all(outcome.events);

        Ok(ResolveReceipt { request: outcome.request, applied: true, attempt_count: 1 })
    }

    /// Apply a rejection delivered by the workflow callback. Nothing was
    /// consumed for a pending request, so only comp-off holds are released.
    pub async fn resolve_reject(
        &self,
        request_id: &LeaveRequestId,
        decision: ApprovalDecision,
        correlation_id: Option<String>,
    ) -> Result<ResolveReceipt, ApplicationError> {
        let correlation = correlation_id.unwrap_or_else(mint_correlation_id);
        let request = self.load_request(request_id).await?;

        let key = OperationKey::terminal(&request.id, LeaveRequestStatus::Rejected);
        if let Some(existing) = self.resolutions.find(&key).await.map_err(persistence)? {
            return self.absorb_duplicate(request, existing, &decision, &correlation).await;
        }

        let grants =
            self.grants.find_by_ids(&request.comp_off_ids).await.map_err(persistence)?;

        let outcome = self.engine.reject(request, grants, &decision, &correlation)?;
        let record = ResolutionRecord {
            operation_key: key,
            leave_request_id: outcome.request.id.clone(),
            outcome_status: LeaveRequestStatus::Rejected,
            first_applied_at: Utc::now(),
            attempt_count: 1,
        };

        let mut tx = self.pool.begin().await.map_err(database)?;
        leave_request::upsert_request(&mut *tx, &outcome.request).await.map_err(persistence)?;
        for grant in &outcome.grants {
            comp_off::upsert_grant(&mut *tx, grant).await.map_err(persistence)?;
        }
        resolution::insert_record(&mut *tx, &record).await.map_err(persistence)?;
        tx.commit().await.map_err(database)?;

        self.emit_all(outcome.events);

        Ok(ResolveReceipt { request: outcome.request, applied: true, attempt_count: 1 })
    }

    /// Employee or admin cancellation of an open request that has not yet
    /// started. Unlike the resolve operations this is caller-initiated, so
    /// there is no resolution ledger entry; a repeat attempt is an
    /// InvalidTransition.
    pub async fn cancel(
        &self,
        request_id: &LeaveRequestId,
        command: CancellationCommand,
        correlation_id: Option<String>,
    ) -> Result<CancelReceipt, ApplicationError> {
        let correlation = correlation_id.unwrap_or_else(mint_correlation_id);
        let request = self.load_request(request_id).await?;

        let scope = request.balance_scope();
        let balance = self.load_balance(&scope).await?;
        let grants =
            self.grants.find_by_ids(&request.comp_off_ids).await.map_err(persistence)?;

        let outcome = self.engine.cancel(request, balance, grants, command, &correlation)?;

        let chained = match &outcome.adjustment {
            Some(adjustment) => {
                let latest =
                    self.adjustments.latest_for_scope(&scope).await.map_err(persistence)?;
                Some(self.chain.extend(latest.as_ref(), adjustment.clone()))
            }
            None => None,
        };

        let mut tx = self.pool.begin().await.map_err(database)?;
        leave_request::upsert_request(&mut *tx, &outcome.request).await.map_err(persistence)?;
        if let Some(entry) = &chained {
            let updated = balance::update_versioned_with(&mut *tx, &outcome.balance)
                .await
                .map_err(persistence)?;
            if !updated {
                return Err(DomainError::Conflict(
                    "balance changed while the cancellation was in flight".to_string(),
                )
                .into());
            }
            adjustment::insert_entry(&mut *tx, entry).await.map_err(persistence)?;
        }
        for grant in &outcome.grants {
            comp_off::upsert_grant(&mut *tx, grant).await.map_err(persistence)?;
        }
        tx.commit().await.map_err(database)?;

        self.emit_all(outcome.events);

        Ok(CancelReceipt {
            request: outcome.request,
            restored_days: outcome.adjustment.map(|adjustment| adjustment.days_delta),
            released: outcome.released,
        })
    }

    /// File a comp-off claim for extra hours worked. Grants start Pending
    /// and become consumable only once approved.
    pub async fn create_grant(
        &self,
        request: GrantRequest,
        correlation_id: Option<String>,
    ) -> Result<CompOffGrant, ApplicationError> {
        let correlation = correlation_id.unwrap_or_else(mint_correlation_id);
        let now = Utc::now();
        let today = now.date_naive();

        let employee = self
            .employees
            .find_by_id(&request.employee_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                DomainError::Validation(format!("unknown employee {}", request.employee_id.0))
            })?;
        if !employee.active {
            return Err(DomainError::Validation(format!(
                "employee {} is inactive",
                employee.id.0
            ))
            .into());
        }

        let existing =
            self.grants.list_for_employee(&request.employee_id).await.map_err(persistence)?;
        let grant =
            comp_off_ledger::new_grant(self.engine.comp_off(), request, &existing, today, now)?;
        self.grants.save(grant.clone()).await.map_err(persistence)?;

        self.audit.emit(
            AuditEvent::new(
                None,
                Some(grant.employee_id.clone()),
                correlation,
                "comp_off.granted",
                AuditCategory::CompOff,
                grant.employee_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("grant_id", grant.id.0.clone())
            .with_metadata("worked_date", grant.worked_date.to_string())
            .with_metadata("hours_worked", grant.hours_worked.to_string())
            .with_metadata("days_granted", grant.days_granted.to_string())
            .with_metadata("expiry_date", grant.expiry_date.to_string()),
        );

        Ok(grant)
    }

    pub async fn approve_grant(
        &self,
        grant_id: &CompOffId,
        decided_by: EmployeeId,
        notes: Option<String>,
        correlation_id: Option<String>,
    ) -> Result<CompOffGrant, ApplicationError> {
        let correlation = correlation_id.unwrap_or_else(mint_correlation_id);
        let mut grant = self.load_grant(grant_id).await?;

        comp_off_ledger::approve_grant(&mut grant, decided_by.clone(), notes, Utc::now())?;
        self.grants.save(grant.clone()).await.map_err(persistence)?;

        self.audit.emit(
            AuditEvent::new(
                None,
                Some(grant.employee_id.clone()),
                correlation,
                "comp_off.approved",
                AuditCategory::CompOff,
                decided_by.0,
                AuditOutcome::Success,
            )
            .with_metadata("grant_id", grant.id.0.clone())
            .with_metadata("days_granted", grant.days_granted.to_string()),
        );

        Ok(grant)
    }

    pub async fn reject_grant(
        &self,
        grant_id: &CompOffId,
        decided_by: EmployeeId,
        notes: Option<String>,
        correlation_id: Option<String>,
    ) -> Result<CompOffGrant, ApplicationError> {
        let correlation = correlation_id.unwrap_or_else(mint_correlation_id);
        let mut grant = self.load_grant(grant_id).await?;

        comp_off_ledger::reject_grant(&mut grant, decided_by.clone(), notes, Utc::now())?;
        self.grants.save(grant.clone()).await.map_err(persistence)?;

        self.audit.emit(
            AuditEvent::new(
                None,
                Some(grant.employee_id.clone()),
                correlation,
                "comp_off.rejected",
                AuditCategory::CompOff,
                decided_by.0,
                AuditOutcome::Rejected,
            )
            .with_metadata("grant_id", grant.id.0.clone()),
        );

        Ok(grant)
    }

    /// Balance row for the scope, materialized on first read with the leave
    /// type's defaults.
    pub async fn get_balance(
        &self,
        employee_id: &EmployeeId,
        leave_type_id: &LeaveTypeId,
        year: i32,
    ) -> Result<LeaveBalance, ApplicationError> {
        let leave_type = self
            .leave_types
            .find_by_id(leave_type_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                DomainError::Validation(format!("unknown leave type {}", leave_type_id.0))
            })?;

        let scope = BalanceScope {
            employee_id: employee_id.clone(),
            leave_type_id: leave_type_id.clone(),
            year,
        };
        self.balances.get_or_create(&scope, &leave_type, Utc::now()).await.map_err(persistence)
    }

    /// Balance row plus pending regular days and the comp-off balance. The
    /// pending figure counts only the regular-day portion of Pending
    /// requests, the part that would come out of `available` on approval.
    pub async fn balance_summary(
        &self,
        employee_id: &EmployeeId,
        leave_type_id: &LeaveTypeId,
        year: i32,
        today: NaiveDate,
    ) -> Result<BalanceSummary, ApplicationError> {
        let balance = self.get_balance(employee_id, leave_type_id, year).await?;

        let requests =
            self.requests.list_for_employee(employee_id, Some(year)).await.map_err(persistence)?;
        let pending_days: Decimal = requests
            .iter()
            .filter(|request| request.leave_type_id == *leave_type_id)
            .filter(|request| request.status == LeaveRequestStatus::Pending)
            .map(|request| request.regular_days())
            .sum();

        let grants = self.grants.list_for_employee(employee_id).await.map_err(persistence)?;
        let comp_off_available = comp_off_ledger::available_days(&grants, today);

        Ok(BalanceSummary { balance, pending_days, comp_off_available })
    }

    pub async fn comp_off_balance(
        &self,
        employee_id: &EmployeeId,
        today: NaiveDate,
    ) -> Result<Decimal, ApplicationError> {
        let grants = self.grants.list_for_employee(employee_id).await.map_err(persistence)?;
        Ok(comp_off_ledger::available_days(&grants, today))
    }

    pub async fn list_requests(
        &self,
        employee_id: &EmployeeId,
        year: Option<i32>,
    ) -> Result<Vec<LeaveRequest>, ApplicationError> {
        self.requests.list_for_employee(employee_id, year).await.map_err(persistence)
    }

    pub async fn list_grants(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<CompOffGrant>, ApplicationError> {
        self.grants.list_for_employee(employee_id).await.map_err(persistence)
    }

    pub async fn list_adjustments(
        &self,
        scope: &BalanceScope,
    ) -> Result<Vec<ChainedAdjustment>, ApplicationError> {
        self.adjustments.list_for_scope(scope).await.map_err(persistence)
    }

    /// Walk the stored adjustment chain for a scope and report the first
    /// break, if any.
    pub async fn verify_chain(
        &self,
        scope: &BalanceScope,
    ) -> Result<ChainVerification, ApplicationError> {
        let entries = self.adjustments.list_for_scope(scope).await.map_err(persistence)?;
        Ok(self.chain.verify(scope, &entries))
    }

    pub fn total_days(
        &self,
        from_date: NaiveDate,
        to_date: NaiveDate,
        is_half_day: bool,
    ) -> Decimal {
        self.engine.total_days(from_date, to_date, is_half_day)
    }

    /// Whether any open request for the employee intersects the range.
    /// Advisory: submission runs its own overlap check.
    pub async fn has_overlapping_leave(
        &self,
        employee_id: &EmployeeId,
        from_date: NaiveDate,
        to_date: NaiveDate,
        exclude: Option<&LeaveRequestId>,
    ) -> Result<bool, ApplicationError> {
        let open =
            self.requests.list_open_for_employee(employee_id).await.map_err(persistence)?;
        Ok(overlap::has_overlapping_leave(&open, employee_id, from_date, to_date, exclude))
    }

    async fn absorb_duplicate(
        &self,
        request: LeaveRequest,
        existing: ResolutionRecord,
        decision: &ApprovalDecision,
        correlation: &str,
    ) -> Result<ResolveReceipt, ApplicationError> {
        let record = self
            .resolutions
            .record_duplicate(&existing.operation_key)
            .await
            .map_err(persistence)?;

        self.audit.emit(
            AuditEvent::new(
                Some(request.id.clone()),
                Some(request.employee_id.clone()),
                correlation,
                "resolution.duplicate_ignored",
                AuditCategory::Persistence,
                decision.decided_by.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("outcome_status", record.outcome_status.as_str())
            .with_metadata("attempt_count", record.attempt_count.to_string()),
        );

        Ok(ResolveReceipt { request, applied: false, attempt_count: record.attempt_count })
    }

    async fn load_request(
        &self,
        request_id: &LeaveRequestId,
    ) -> Result<LeaveRequest, ApplicationError> {
        self.requests.find_by_id(request_id).await.map_err(persistence)?.ok_or_else(|| {
            DomainError::Validation(format!("unknown leave request {}", request_id.0)).into()
        })
    }

    async fn load_balance(&self, scope: &BalanceScope) -> Result<LeaveBalance, ApplicationError> {
        self.balances.find(scope).await.map_err(persistence)?.ok_or_else(|| {
            ApplicationError::Persistence(format!(
                "balance row missing for {}/{}/{}",
                scope.employee_id.0, scope.leave_type_id.0, scope.year
            ))
        })
    }

    async fn load_grant(&self, grant_id: &CompOffId) -> Result<CompOffGrant, ApplicationError> {
        self.grants.find_by_id(grant_id).await.map_err(persistence)?.ok_or_else(|| {
            DomainError::Validation(format!("unknown comp-off grant {}", grant_id.0)).into()
        })
    }

    fn emit_all(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.audit.emit(event);
        }
    }
}

fn mint_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

fn database(error: sqlx::Error) -> ApplicationError {
    ApplicationError::Persistence(format!("database error: {error}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use timeoff_core::approvals::{ApprovalDecision, RecordingApprovalWorkflow};
    use timeoff_core::audit::{AuditOutcome, InMemoryAuditSink};
    use timeoff_core::comp_off_ledger::{CompOffPolicy, GrantRequest};
    use timeoff_core::domain::balance::BalanceScope;
    use timeoff_core::domain::comp_off::CompOffGrantStatus;
    use timeoff_core::domain::employee::EmployeeId;
    use timeoff_core::domain::leave_request::{LeaveRequestId, LeaveRequestStatus};
    use timeoff_core::domain::leave_type::LeaveTypeId;
    use timeoff_core::daycount::DayCountPolicy;
    use timeoff_core::errors::{ApplicationError, DomainError};
    use timeoff_core::ledger::AdjustmentChain;
    use timeoff_core::request_engine::{CancellationCommand, LeaveRequestDraft, RequestEngine};

    use crate::repositories::{BalanceRepository, ResolutionRepository};
    use crate::{connect_with_settings, migrations};

    use super::LeaveService;

    struct Harness {
        pool: crate::DbPool,
        service: LeaveService,
        workflow: RecordingApprovalWorkflow,
        audit: InMemoryAuditSink,
    }

    async fn setup() -> Harness {
        setup_with_workflow(RecordingApprovalWorkflow::default()).await
    }

    async fn setup_with_workflow(workflow: RecordingApprovalWorkflow) -> Harness {
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
             VALUES ('lt-annual', 'ANNUAL', 'Annual Leave', '10', 1, '10', 0,
                     '2025-01-01T00:00:00+00:00', '2025-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("seed leave type");

        let audit = InMemoryAuditSink::default();
        let comp_off = CompOffPolicy {
            hours_per_day: Decimal::from(8),
            min_days: Decimal::new(5, 1),
            max_days: Decimal::from(5),
            expiry_months: 120,
        };
        let service = LeaveService::new(
            pool.clone(),
            RequestEngine::new(DayCountPolicy::default(), comp_off),
            AdjustmentChain::new("test-signing-key"),
            Arc::new(workflow.clone()),
            Arc::new(audit.clone()),
        );

        Harness { pool, service, workflow, audit }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid timestamp").with_timezone(&Utc)
    }

    fn draft(from: NaiveDate, to: NaiveDate) -> LeaveRequestDraft {
        LeaveRequestDraft {
            employee_id: EmployeeId("emp-1".to_string()),
            leave_type_id: LeaveTypeId("lt-annual".to_string()),
            from_date: from,
            to_date: to,
            is_half_day: false,
            half_day_slot: None,
            reason: "family travel".to_string(),
            use_comp_off: false,
            comp_off_ids: Vec::new(),
        }
    }

    fn decision() -> ApprovalDecision {
        ApprovalDecision {
            decided_by: EmployeeId("mgr-1".to_string()),
            notes: None,
            decided_at: parse_ts("2025-03-02T10:00:00Z"),
        }
    }

    fn cancel_command() -> CancellationCommand {
        CancellationCommand {
            actor_id: EmployeeId("emp-1".to_string()),
            reason: Some("plans changed".to_string()),
            by_admin: false,
            requested_at: parse_ts("2025-03-05T08:00:00Z"),
        }
    }

    fn scope() -> BalanceScope {
        BalanceScope {
            employee_id: EmployeeId("emp-1".to_string()),
            leave_type_id: LeaveTypeId("lt-annual".to_string()),
            year: 2025,
        }
    }

    #[tokio::test]
    async fn submit_then_approve_consumes_and_chains_one_adjustment() {
        let harness = setup().await;

        let receipt = harness
            .service
            .submit(draft(date(2025, 3, 10), date(2025, 3, 12)), Some("corr-1".to_string()))
            .await
            .expect("submit");
        assert_eq!(receipt.request.status, LeaveRequestStatus::Pending);
        assert_eq!(receipt.request.total_days, Decimal::from(3));
        assert!(receipt.workflow.is_some());
        assert_eq!(harness.workflow.callouts().len(), 1);

        let resolved = harness
            .service
            .resolve_approve(&receipt.request.id, decision(), Some("corr-2".to_string()))
            .await
            .expect("approve");
        assert!(resolved.applied);
        assert_eq!(resolved.request.status, LeaveRequestStatus::Approved);

        let balance = harness
            .service
            .balance_summary(
                &EmployeeId("emp-1".to_string()),
                &LeaveTypeId("lt-annual".to_string()),
                2025,
                date(2025, 3, 2),
            )
            .await
            .expect("summary")
            .balance;
        assert_eq!(balance.available, Decimal::from(7));
        assert_eq!(balance.used, Decimal::from(3));
        assert_eq!(balance.state_version, 2);

        let entries = harness.service.list_adjustments(&scope()).await.expect("adjustments");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].adjustment.days_delta, Decimal::from(-3));
        assert_eq!(entries[0].chain_version, 1);

        let verification = harness.service.verify_chain(&scope()).await.expect("verify");
        assert!(verification.valid);

        let events = harness.audit.events();
        let event_types: Vec<&str> =
            events.iter().map(|event| event.event_type.as_str()).collect();
        assert!(event_types.contains(&"request.submitted"));
        assert!(event_types.contains(&"workflow.approval_requested"));
        assert!(event_types.contains(&"request.approved"));
        assert!(event_types.contains(&"balance.consumed"));

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn cancel_after_approval_restores_and_extends_the_chain() {
        let harness = setup().await;

        let receipt = harness
            .service
            .submit(draft(date(2025, 3, 10), date(2025, 3, 12)), None)
            .await
            .expect("submit");
        harness
            .service
            .resolve_approve(&receipt.request.id, decision(), None)
            .await
            .expect("approve");

        let cancelled = harness
            .service
            .cancel(&receipt.request.id, cancel_command(), None)
            .await
            .expect("cancel");
        assert_eq!(cancelled.request.status, LeaveRequestStatus::Cancelled);
        assert_eq!(cancelled.restored_days, Some(Decimal::from(3)));

        let balance = harness
            .service
            .balances
            .find(&scope())
            .await
            .expect("find balance")
            .expect("balance exists");
        assert_eq!(balance.available, Decimal::from(10));
        assert_eq!(balance.used, Decimal::ZERO);
        assert_eq!(balance.state_version, 3);

        let entries = harness.service.list_adjustments(&scope()).await.expect("adjustments");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].adjustment.days_delta, Decimal::from(3));
        assert_eq!(entries[1].prev_hash, Some(entries[0].entry_hash.clone()));

        let verification = harness.service.verify_chain(&scope()).await.expect("verify");
        assert!(verification.valid);
        assert_eq!(verification.verified_entries, 2);

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_approval_is_a_recorded_no_op() {
        let harness = setup().await;

        let receipt = harness
            .service
            .submit(draft(date(2025, 3, 10), date(2025, 3, 12)), None)
            .await
            .expect("submit");
        harness
            .service
            .resolve_approve(&receipt.request.id, decision(), None)
            .await
            .expect("first approve");

        let second = harness
            .service
            .resolve_approve(&receipt.request.id, decision(), None)
            .await
            .expect("second approve");
        assert!(!second.applied);
        assert_eq!(second.attempt_count, 2);
        assert_eq!(second.request.status, LeaveRequestStatus::Approved);

        let entries = harness.service.list_adjustments(&scope()).await.expect("adjustments");
        assert_eq!(entries.len(), 1);

        let balance = harness
            .service
            .balances
            .find(&scope())
            .await
            .expect("find balance")
            .expect("balance exists");
        assert_eq!(balance.available, Decimal::from(7));
        assert_eq!(balance.state_version, 2);

        assert!(harness
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "resolution.duplicate_ignored"));

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn comp_off_cover_round_trip_marks_and_releases_grants() {
        let harness = setup().await;

        let first = harness
            .service
            .create_grant(
                GrantRequest {
                    employee_id: EmployeeId("emp-1".to_string()),
                    worked_date: date(2025, 1, 11),
                    hours_worked: Decimal::from(8),
                    reason: Some("release weekend".to_string()),
                },
                None,
            )
            .await
            .expect("first grant");
        let second = harness
            .service
            .create_grant(
                GrantRequest {
                    employee_id: EmployeeId("emp-1".to_string()),
                    worked_date: date(2025, 1, 18),
                    hours_worked: Decimal::from(8),
                    reason: None,
                },
                None,
            )
            .await
            .expect("second grant");
        assert_eq!(first.days_granted, Decimal::ONE);

        for grant in [&first, &second] {
            let approved = harness
                .service
                .approve_grant(&grant.id, EmployeeId("mgr-1".to_string()), None, None)
                .await
                .expect("approve grant");
            assert_eq!(approved.status, CompOffGrantStatus::Approved);
        }

        let mut input = draft(date(2025, 3, 10), date(2025, 3, 14));
        input.use_comp_off = true;
        input.comp_off_ids = vec![first.id.clone(), second.id.clone()];
        let receipt = harness.service.submit(input, None).await.expect("submit");
        assert_eq!(receipt.request.total_days, Decimal::from(5));
        assert_eq!(receipt.request.comp_off_days_used, Decimal::from(2));
        assert_eq!(receipt.request.regular_days(), Decimal::from(3));

        harness
            .service
            .resolve_approve(&receipt.request.id, decision(), None)
            .await
            .expect("approve");

        let grants = harness
            .service
            .list_grants(&EmployeeId("emp-1".to_string()))
            .await
            .expect("list grants");
        assert!(grants.iter().all(|grant| grant.is_used));
        assert!(grants
            .iter()
            .all(|grant| grant.leave_request_id.as_ref() == Some(&receipt.request.id)));

        let cancelled = harness
            .service
            .cancel(&receipt.request.id, cancel_command(), None)
            .await
            .expect("cancel");
        assert_eq!(cancelled.released.len(), 2);

        let grants = harness
            .service
            .list_grants(&EmployeeId("emp-1".to_string()))
            .await
            .expect("list grants");
        assert!(grants.iter().all(|grant| !grant.is_used));
        assert!(grants.iter().all(|grant| grant.leave_request_id.is_none()));

        let balance = harness
            .service
            .balances
            .find(&scope())
            .await
            .expect("find balance")
            .expect("balance exists");
        assert_eq!(balance.available, Decimal::from(10));

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn overlapping_submission_is_refused() {
        let harness = setup().await;

        harness
            .service
            .submit(draft(date(2025, 3, 10), date(2025, 3, 12)), None)
            .await
            .expect("first submit");

        let error = harness
            .service
            .submit(draft(date(2025, 3, 11), date(2025, 3, 13)), None)
            .await
            .expect_err("overlap should be refused");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Conflict(_))
        ));

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn approval_fails_when_balance_shrank_since_submission() {
        let harness = setup().await;

        let receipt = harness
            .service
            .submit(draft(date(2025, 3, 10), date(2025, 3, 12)), None)
            .await
            .expect("submit");

        // Another writer drains the balance while the approval is pending.
        let mut drained = harness
            .service
            .balances
            .find(&scope())
            .await
            .expect("find balance")
            .expect("balance exists");
        drained.used = Decimal::from(9);
        drained.available = Decimal::ONE;
        drained.state_version += 1;
        assert!(harness
            .service
            .balances
            .update_versioned(&drained)
            .await
            .expect("versioned update"));

        let error = harness
            .service
            .resolve_approve(&receipt.request.id, decision(), None)
            .await
            .expect_err("approval should fail");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::InsufficientBalance { .. })
        ));

        let stored = harness
            .service
            .load_request(&receipt.request.id)
            .await
            .expect("request still present");
        assert_eq!(stored.status, LeaveRequestStatus::Pending);

        let key = timeoff_core::domain::resolution::OperationKey::terminal(
            &receipt.request.id,
            LeaveRequestStatus::Approved,
        );
        let record = harness.service.resolutions.find(&key).await.expect("lookup");
        assert!(record.is_none());

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn workflow_outage_still_persists_the_pending_request() {
        let harness =
            setup_with_workflow(RecordingApprovalWorkflow::failing("router offline")).await;

        let receipt = harness
            .service
            .submit(draft(date(2025, 3, 10), date(2025, 3, 12)), None)
            .await
            .expect("submit survives the outage");
        assert!(receipt.workflow.is_none());

        let stored = harness
            .service
            .load_request(&receipt.request.id)
            .await
            .expect("request persisted");
        assert_eq!(stored.status, LeaveRequestStatus::Pending);

        let failed = harness
            .audit
            .events()
            .into_iter()
            .find(|event| event.event_type == "workflow.approval_requested")
            .expect("callout audited");
        assert_eq!(failed.outcome, AuditOutcome::Failed);

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn rejection_releases_holds_and_records_the_resolution() {
        let harness = setup().await;

        let grant = harness
            .service
            .create_grant(
                GrantRequest {
                    employee_id: EmployeeId("emp-1".to_string()),
                    worked_date: date(2025, 1, 11),
                    hours_worked: Decimal::from(8),
                    reason: None,
                },
                None,
            )
            .await
            .expect("create grant");
        harness
            .service
            .approve_grant(&grant.id, EmployeeId("mgr-1".to_string()), None, None)
            .await
            .expect("approve grant");

        let mut input = draft(date(2025, 3, 10), date(2025, 3, 11));
        input.use_comp_off = true;
        input.comp_off_ids = vec![grant.id.clone()];
        let receipt = harness.service.submit(input, None).await.expect("submit");

        let resolved = harness
            .service
            .resolve_reject(&receipt.request.id, decision(), None)
            .await
            .expect("reject");
        assert!(resolved.applied);
        assert_eq!(resolved.request.status, LeaveRequestStatus::Rejected);

        let duplicate = harness
            .service
            .resolve_reject(&receipt.request.id, decision(), None)
            .await
            .expect("duplicate reject");
        assert!(!duplicate.applied);
        assert_eq!(duplicate.attempt_count, 2);

        let entries = harness.service.list_adjustments(&scope()).await.expect("adjustments");
        assert!(entries.is_empty());

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn balance_summary_reports_pending_and_comp_off_figures() {
        let harness = setup().await;

        let grant = harness
            .service
            .create_grant(
                GrantRequest {
                    employee_id: EmployeeId("emp-1".to_string()),
                    worked_date: date(2025, 1, 11),
                    hours_worked: Decimal::from(12),
                    reason: None,
                },
                None,
            )
            .await
            .expect("create grant");
        harness
            .service
            .approve_grant(&grant.id, EmployeeId("mgr-1".to_string()), None, None)
            .await
            .expect("approve grant");

        harness
            .service
            .submit(draft(date(2025, 3, 10), date(2025, 3, 12)), None)
            .await
            .expect("submit");

        let summary = harness
            .service
            .balance_summary(
                &EmployeeId("emp-1".to_string()),
                &LeaveTypeId("lt-annual".to_string()),
                2025,
                date(2025, 3, 1),
            )
            .await
            .expect("summary");

        assert_eq!(summary.balance.available, Decimal::from(10));
        assert_eq!(summary.pending_days, Decimal::from(3));
        assert_eq!(summary.comp_off_available, Decimal::new(15, 1));

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn first_balance_read_materializes_the_row() {
        let harness = setup().await;
        let employee = EmployeeId("emp-1".to_string());
        let leave_type = LeaveTypeId("lt-annual".to_string());

        let balance = harness
            .service
            .get_balance(&employee, &leave_type, 2025)
            .await
            .expect("first read");
        assert_eq!(balance.entitled, Decimal::from(10));
        assert_eq!(balance.available, Decimal::from(10));
        assert_eq!(balance.state_version, 1);

        let again = harness
            .service
            .get_balance(&employee, &leave_type, 2025)
            .await
            .expect("second read");
        assert_eq!(again, balance);

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn overlap_query_flags_open_requests() {
        let harness = setup().await;

        let receipt = harness
            .service
            .submit(draft(date(2025, 3, 10), date(2025, 3, 12)), None)
            .await
            .expect("submit");

        let employee = EmployeeId("emp-1".to_string());
        assert!(harness
            .service
            .has_overlapping_leave(&employee, date(2025, 3, 12), date(2025, 3, 14), None)
            .await
            .expect("overlap query"));
        assert!(!harness
            .service
            .has_overlapping_leave(&employee, date(2025, 3, 13), date(2025, 3, 14), None)
            .await
            .expect("disjoint query"));
        assert!(!harness
            .service
            .has_overlapping_leave(
                &employee,
                date(2025, 3, 12),
                date(2025, 3, 14),
                Some(&receipt.request.id),
            )
            .await
            .expect("self-excluded query"));

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn inactive_employee_cannot_submit() {
        let harness = setup().await;

        sqlx::query("UPDATE employees SET active = 0 WHERE id = 'emp-1'")
            .execute(&harness.pool)
            .await
            .expect("deactivate employee");

        let error = harness
            .service
            .submit(draft(date(2025, 3, 10), date(2025, 3, 12)), None)
            .await
            .expect_err("inactive employee should be refused");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Validation(_))
        ));
        assert!(harness.workflow.callouts().is_empty());

        harness.pool.close().await;
    }

    #[tokio::test]
    async fn cancel_of_unknown_request_is_a_validation_error() {
        let harness = setup().await;

        let error = harness
            .service
            .cancel(&LeaveRequestId("req-missing".to_string()), cancel_command(), None)
            .await
            .expect_err("unknown request");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Validation(_))
        ));

        harness.pool.close().await;
    }
}
