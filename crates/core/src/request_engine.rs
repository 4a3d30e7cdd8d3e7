//! Leave request transitions orchestrated against the balance and comp-off
//! ledgers. Every operation is pure in-memory logic: the caller loads the
//! aggregates, runs one transition, and persists whatever comes back inside
//! a single storage transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::approvals::ApprovalDecision;
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
use crate::comp_off_ledger::{self, CompOffPolicy, MarkUsedOutcome};
use crate::daycount::DayCountPolicy;
use crate::domain::adjustment::BalanceAdjustment;
use crate::domain::balance::LeaveBalance;
use crate::domain::comp_off::{CompOffGrant, CompOffId};
use crate::domain::employee::EmployeeId;
use crate::domain::leave_request::{
    HalfDaySlot, LeaveRequest, LeaveRequestId, LeaveRequestStatus,
};
use crate::domain::leave_type::LeaveTypeId;
use crate::errors::DomainError;
use crate::ledger::{self, AdjustmentContext};
use crate::overlap;

/// Caller-supplied fields for a new request. Day totals and comp-off cover
/// are derived here, never trusted from input.
#[derive(Clone, Debug, PartialEq)]
pub struct LeaveRequestDraft {
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub is_half_day: bool,
    pub half_day_slot: Option<HalfDaySlot>,
    pub reason: String,
    pub use_comp_off: bool,
    pub comp_off_ids: Vec<CompOffId>,
}

#[derive(Clone, Debug)]
pub struct PreparedSubmission {
    pub request: LeaveRequest,
    pub events: Vec<AuditEvent>,
}

/// Cancellation input from either the employee or an admin.
#[derive(Clone, Debug, PartialEq)]
pub struct CancellationCommand {
    pub actor_id: EmployeeId,
    pub reason: Option<String>,
    pub by_admin: bool,
    pub requested_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ApprovalOutcome {
    pub request: LeaveRequest,
    pub balance: LeaveBalance,
    pub grants: Vec<CompOffGrant>,
    pub adjustment: Option<BalanceAdjustment>,
    pub mark_used: MarkUsedOutcome,
    pub events: Vec<AuditEvent>,
}

#[derive(Clone, Debug)]
pub struct RejectionOutcome {
    pub request: LeaveRequest,
    pub grants: Vec<CompOffGrant>,
    pub released: Vec<CompOffId>,
    pub events: Vec<AuditEvent>,
}

/// Balance comes back untouched unless `adjustment` is set; callers persist
/// it only in that case.
#[derive(Clone, Debug)]
pub struct CancellationOutcome {
    pub request: LeaveRequest,
    pub balance: LeaveBalance,
    pub grants: Vec<CompOffGrant>,
    pub adjustment: Option<BalanceAdjustment>,
    pub released: Vec<CompOffId>,
    pub events: Vec<AuditEvent>,
}

pub struct RequestEngine {
    day_count: DayCountPolicy,
    comp_off: CompOffPolicy,
}

impl Default for RequestEngine {
    fn default() -> Self {
        Self::new(DayCountPolicy::default(), CompOffPolicy::default())
    }
}

impl RequestEngine {
    pub fn new(day_count: DayCountPolicy, comp_off: CompOffPolicy) -> Self {
        Self { day_count, comp_off }
    }

    pub fn day_count(&self) -> &DayCountPolicy {
        &self.day_count
    }

    pub fn comp_off(&self) -> &CompOffPolicy {
        &self.comp_off
    }

    pub fn total_days(&self, from_date: NaiveDate, to_date: NaiveDate, is_half_day: bool) -> Decimal {
        self.day_count.total_days(from_date, to_date, is_half_day)
    }

    /// Validates a draft against the employee's open requests, balance, and
    /// comp-off grants, and mints the Pending request. Half-day drafts are
    /// forced to a single date; comp-off cover is derived from the listed
    /// grants and capped at the total.
    pub fn prepare_submission(
        &self,
        draft: LeaveRequestDraft,
        existing_requests: &[LeaveRequest],
        balance: &LeaveBalance,
        grants: &[CompOffGrant],
        today: NaiveDate,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<PreparedSubmission, DomainError> {
        let (from_date, to_date, half_day_slot) = if draft.is_half_day {
            let Some(slot) = draft.half_day_slot else {
                return Err(DomainError::Validation(
                    "half-day requests must pick a first or second half".to_string(),
                ));
            };
            (draft.from_date, draft.from_date, Some(slot))
        } else {
            if draft.from_date > draft.to_date {
                return Err(DomainError::Validation(
                    "from date must not be after to date".to_string(),
                ));
            }
            (draft.from_date, draft.to_date, None)
        };

        let total_days = self.day_count.total_days(from_date, to_date, draft.is_half_day);
        if total_days <= Decimal::ZERO {
            return Err(DomainError::Validation(
                "requested range contains no working days".to_string(),
            ));
        }

        if overlap::has_overlapping_leave(
            existing_requests,
            &draft.employee_id,
            from_date,
            to_date,
            None,
        ) {
            return Err(DomainError::Conflict(format!(
                "an open leave request already covers part of {from_date} to {to_date}"
            )));
        }

        let (comp_off_days_used, comp_off_ids) = if draft.use_comp_off {
            resolve_comp_off_cover(&draft, grants, total_days, today)?
        } else {
            if !draft.comp_off_ids.is_empty() {
                return Err(DomainError::Validation(
                    "comp-off grants were listed without enabling comp-off use".to_string(),
                ));
            }
            (Decimal::ZERO, Vec::new())
        };

        let regular_days = total_days - comp_off_days_used;
        if regular_days > balance.available {
            return Err(DomainError::InsufficientBalance {
                requested: regular_days,
                available: balance.available,
            });
        }

        let request = LeaveRequest {
            id: LeaveRequestId(Uuid::new_v4().to_string()),
            employee_id: draft.employee_id,
            leave_type_id: draft.leave_type_id,
            from_date,
            to_date,
            is_half_day: draft.is_half_day,
            half_day_slot,
            total_days,
            reason: draft.reason,
            use_comp_off: draft.use_comp_off,
            comp_off_days_used,
            comp_off_ids,
            status: LeaveRequestStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            cancelled_by: None,
            cancelled_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };

        let event = AuditEvent::new(
            Some(request.id.clone()),
            Some(request.employee_id.clone()),
            correlation_id,
            "request.submitted",
            AuditCategory::Request,
            request.employee_id.0.clone(),
            AuditOutcome::Success,
        )
        .with_metadata("from_date", from_date.to_string())
        .with_metadata("to_date", to_date.to_string())
        .with_metadata("total_days", total_days.to_string())
        .with_metadata("regular_days", regular_days.to_string())
        .with_metadata("comp_off_days_used", comp_off_days_used.to_string());

        Ok(PreparedSubmission { request, events: vec![event] })
    }

    /// Terminal resolve from the approval workflow. Consumes the regular-day
    /// portion from the balance (skipped entirely when comp-off covers the
    /// whole request) and flips the referenced grants to used.
    pub fn approve(
        &self,
        mut request: LeaveRequest,
        mut balance: LeaveBalance,
        mut grants: Vec<CompOffGrant>,
        decision: &ApprovalDecision,
        correlation_id: &str,
    ) -> Result<ApprovalOutcome, DomainError> {
        if !request.can_transition_to(LeaveRequestStatus::Approved) {
            return Err(DomainError::InvalidTransition {
                from: request.status,
                to: LeaveRequestStatus::Approved,
            });
        }

        let regular_days = request.regular_days();
        let mut adjustment = None;
        if regular_days > Decimal::ZERO {
            if regular_days > balance.available {
                return Err(DomainError::InsufficientBalance {
                    requested: regular_days,
                    available: balance.available,
                });
            }
            let context = AdjustmentContext {
                actor_id: decision.decided_by.clone(),
                reason: format!("leave request {} approved", request.id.0),
                leave_request_id: Some(request.id.clone()),
                correlation_id: correlation_id.to_string(),
                effective_date: request.from_date,
            };
            adjustment =
                Some(ledger::consume(&mut balance, regular_days, &context, decision.decided_at));
        }

        request.transition_to(LeaveRequestStatus::Approved)?;
        request.approved_by = Some(decision.decided_by.clone());
        request.approved_at = Some(decision.decided_at);
        request.updated_at = decision.decided_at;

        let mark_used = if request.use_comp_off {
            comp_off_ledger::mark_used(
                &mut grants,
                &request.comp_off_ids,
                &request.id,
                decision.decided_at.date_naive(),
                decision.decided_at,
            )
        } else {
            MarkUsedOutcome::default()
        };

        let context = AuditContext::new(
            Some(request.id.clone()),
            Some(request.employee_id.clone()),
            correlation_id,
            decision.decided_by.0.clone(),
        );
        let mut events = vec![AuditEvent::from_context(
            &context,
            "request.approved",
            AuditCategory::Request,
            AuditOutcome::Success,
        )
        .with_metadata("total_days", request.total_days.to_string())
        .with_metadata("regular_days", regular_days.to_string())];

        if let Some(adjustment) = &adjustment {
            events.push(
                AuditEvent::from_context(
                    &context,
                    "balance.consumed",
                    AuditCategory::Balance,
                    AuditOutcome::Success,
                )
                .with_metadata("days_delta", adjustment.days_delta.to_string())
                .with_metadata("balance_before", adjustment.balance_before.to_string())
                .with_metadata("balance_after", adjustment.balance_after.to_string()),
            );
        }

        if request.use_comp_off {
            events.push(
                AuditEvent::from_context(
                    &context,
                    "comp_off.marked_used",
                    AuditCategory::CompOff,
                    AuditOutcome::Success,
                )
                .with_metadata("marked", join_ids(&mark_used.marked))
                .with_metadata("skipped", join_ids(&mark_used.skipped)),
            );
        }

        Ok(ApprovalOutcome { request, balance, grants, adjustment, mark_used, events })
    }

    /// Terminal resolve from the approval workflow. Nothing was ever
    /// consumed for a pending request, so only comp-off holds are released.
    pub fn reject(
        &self,
        mut request: LeaveRequest,
        mut grants: Vec<CompOffGrant>,
        decision: &ApprovalDecision,
        correlation_id: &str,
    ) -> Result<RejectionOutcome, DomainError> {
        request.transition_to(LeaveRequestStatus::Rejected)?;
        request.rejected_by = Some(decision.decided_by.clone());
        request.rejected_at = Some(decision.decided_at);
        request.updated_at = decision.decided_at;

        let released = if request.use_comp_off {
            comp_off_ledger::release(&mut grants, &request.comp_off_ids, decision.decided_at)
        } else {
            Vec::new()
        };

        let context = AuditContext::new(
            Some(request.id.clone()),
            Some(request.employee_id.clone()),
            correlation_id,
            decision.decided_by.0.clone(),
        );
        let mut events = vec![AuditEvent::from_context(
            &context,
            "request.rejected",
            AuditCategory::Request,
            AuditOutcome::Rejected,
        )];
        if !released.is_empty() {
            events.push(
                AuditEvent::from_context(
                    &context,
                    "comp_off.released",
                    AuditCategory::CompOff,
                    AuditOutcome::Success,
                )
                .with_metadata("released", join_ids(&released)),
            );
        }

        Ok(RejectionOutcome { request, grants, released, events })
    }

    /// Cancels a pending or approved request that has not yet started. A
    /// previously approved request restores its regular-day portion; comp-off
    /// holds are released regardless of prior status.
    pub fn cancel(
        &self,
        mut request: LeaveRequest,
        mut balance: LeaveBalance,
        mut grants: Vec<CompOffGrant>,
        command: CancellationCommand,
        correlation_id: &str,
    ) -> Result<CancellationOutcome, DomainError> {
        let target = if command.by_admin {
            LeaveRequestStatus::CancelledByAdmin
        } else {
            LeaveRequestStatus::Cancelled
        };
        if !request.can_transition_to(target) {
            return Err(DomainError::InvalidTransition { from: request.status, to: target });
        }
        if !request.can_be_cancelled(command.requested_at.date_naive()) {
            return Err(DomainError::Validation(format!(
                "leave starting {} can no longer be cancelled",
                request.from_date
            )));
        }

        let prior_status = request.status;
        request.transition_to(target)?;
        request.cancelled_by = Some(command.actor_id.clone());
        request.cancelled_at = Some(command.requested_at);
        request.cancel_reason = command.reason.clone();
        request.updated_at = command.requested_at;

        let regular_days = request.regular_days();
        let mut adjustment = None;
        if prior_status == LeaveRequestStatus::Approved && regular_days > Decimal::ZERO {
            let context = AdjustmentContext {
                actor_id: command.actor_id.clone(),
                reason: format!("leave request {} cancelled", request.id.0),
                leave_request_id: Some(request.id.clone()),
                correlation_id: correlation_id.to_string(),
                effective_date: request.from_date,
            };
            adjustment =
                Some(ledger::restore(&mut balance, regular_days, &context, command.requested_at));
        }

        let released = if request.use_comp_off {
            comp_off_ledger::release(&mut grants, &request.comp_off_ids, command.requested_at)
        } else {
            Vec::new()
        };

        let context = AuditContext::new(
            Some(request.id.clone()),
            Some(request.employee_id.clone()),
            correlation_id,
            command.actor_id.0.clone(),
        );
        let mut events = vec![AuditEvent::from_context(
            &context,
            "request.cancelled",
            AuditCategory::Request,
            AuditOutcome::Success,
        )
        .with_metadata("by_admin", command.by_admin.to_string())
        .with_metadata("prior_status", prior_status.as_str())];

        if let Some(adjustment) = &adjustment {
            events.push(
                AuditEvent::from_context(
                    &context,
                    "balance.restored",
                    AuditCategory::Balance,
                    AuditOutcome::Success,
                )
                .with_metadata("days_delta", adjustment.days_delta.to_string())
                .with_metadata("balance_before", adjustment.balance_before.to_string())
                .with_metadata("balance_after", adjustment.balance_after.to_string()),
            );
        }
        if !released.is_empty() {
            events.push(
                AuditEvent::from_context(
                    &context,
                    "comp_off.released",
                    AuditCategory::CompOff,
                    AuditOutcome::Success,
                )
                .with_metadata("released", join_ids(&released)),
            );
        }

        Ok(CancellationOutcome { request, balance, grants, adjustment, released, events })
    }
}

fn resolve_comp_off_cover(
    draft: &LeaveRequestDraft,
    grants: &[CompOffGrant],
    total_days: Decimal,
    today: NaiveDate,
) -> Result<(Decimal, Vec<CompOffId>), DomainError> {
    if draft.comp_off_ids.is_empty() {
        return Err(DomainError::Validation(
            "comp-off use requires at least one grant".to_string(),
        ));
    }

    let mut cover = Decimal::ZERO;
    let mut resolved = Vec::with_capacity(draft.comp_off_ids.len());
    for id in &draft.comp_off_ids {
        if resolved.contains(id) {
            return Err(DomainError::Validation(format!(
                "comp-off grant {} is listed more than once",
                id.0
            )));
        }
        let Some(grant) = grants.iter().find(|grant| &grant.id == id) else {
            return Err(DomainError::Validation(format!("unknown comp-off grant {}", id.0)));
        };
        if grant.employee_id != draft.employee_id {
            return Err(DomainError::Validation(format!(
                "comp-off grant {} belongs to a different employee",
                id.0
            )));
        }
        if !grant.can_be_used(today) {
            return Err(DomainError::Validation(format!(
                "comp-off grant {} is not usable (unapproved, expired, or already used)",
                id.0
            )));
        }
        cover += grant.days_granted;
        resolved.push(id.clone());
    }

    Ok((cover.min(total_days), resolved))
}

fn join_ids(ids: &[CompOffId]) -> String {
    ids.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(",")
}
