//! Comp-off grant ledger: hours-to-days conversion, grant lifecycle, and the
//! used/unused flag that keeps grants synchronized with leave consumption.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::domain::comp_off::{CompOffGrant, CompOffGrantStatus, CompOffId};
use crate::domain::employee::EmployeeId;
use crate::domain::leave_request::LeaveRequestId;
use crate::errors::DomainError;

/// Longest shift a single grant request may claim.
const MAX_GRANT_HOURS: Decimal = Decimal::from_parts(24, 0, 0, false, 0);
/// Shortest claimable stretch of extra work.
const MIN_GRANT_HOURS: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Conversion and expiry policy for comp-off grants.
#[derive(Clone, Debug, PartialEq)]
pub struct CompOffPolicy {
    /// Worked hours that equal one full comp-off day.
    pub hours_per_day: Decimal,
    /// Floor for a single grant.
    pub min_days: Decimal,
    /// Cap for a single grant.
    pub max_days: Decimal,
    /// Grants expire this many months after the worked date.
    pub expiry_months: u32,
}

impl Default for CompOffPolicy {
    fn default() -> Self {
        Self {
            hours_per_day: Decimal::new(8, 0),
            min_days: Decimal::new(5, 1),
            max_days: Decimal::new(5, 0),
            expiry_months: 3,
        }
    }
}

impl CompOffPolicy {
    /// days = round(hours / hours_per_day to the nearest 0.5, half up),
    /// clamped to [min_days, max_days].
    pub fn days_for_hours(&self, hours_worked: Decimal) -> Decimal {
        let ratio = hours_worked / self.hours_per_day;
        let half_steps = (ratio * Decimal::TWO)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        (half_steps / Decimal::TWO).clamp(self.min_days, self.max_days)
    }

    pub fn expiry_for(&self, worked_date: NaiveDate) -> NaiveDate {
        worked_date.checked_add_months(Months::new(self.expiry_months)).unwrap_or(worked_date)
    }
}

/// Inputs for a new grant request.
#[derive(Clone, Debug, PartialEq)]
pub struct GrantRequest {
    pub employee_id: EmployeeId,
    pub worked_date: NaiveDate,
    pub hours_worked: Decimal,
    pub reason: Option<String>,
}

/// Validate and build a Pending grant. `existing` is the employee's current
/// grant list, used to refuse duplicate claims for the same worked date.
pub fn new_grant(
    policy: &CompOffPolicy,
    request: GrantRequest,
    existing: &[CompOffGrant],
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<CompOffGrant, DomainError> {
    if request.worked_date > today {
        return Err(DomainError::Validation("worked date cannot be in the future".to_string()));
    }
    if request.hours_worked < MIN_GRANT_HOURS || request.hours_worked > MAX_GRANT_HOURS {
        return Err(DomainError::Validation(format!(
            "hours worked must be between {MIN_GRANT_HOURS} and {MAX_GRANT_HOURS}"
        )));
    }

    let duplicate = existing.iter().any(|grant| {
        grant.worked_date == request.worked_date
            && matches!(grant.status, CompOffGrantStatus::Pending | CompOffGrantStatus::Approved)
    });
    if duplicate {
        return Err(DomainError::Conflict(format!(
            "a comp-off claim for {} already exists",
            request.worked_date
        )));
    }

    Ok(CompOffGrant {
        id: CompOffId(Uuid::new_v4().to_string()),
        employee_id: request.employee_id,
        worked_date: request.worked_date,
        hours_worked: request.hours_worked,
        days_granted: policy.days_for_hours(request.hours_worked),
        expiry_date: policy.expiry_for(request.worked_date),
        status: CompOffGrantStatus::Pending,
        reason: request.reason,
        is_used: false,
        used_date: None,
        leave_request_id: None,
        approved_by: None,
        approved_at: None,
        approval_notes: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn approve_grant(
    grant: &mut CompOffGrant,
    decided_by: EmployeeId,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    grant.transition_to(CompOffGrantStatus::Approved)?;
    grant.approved_by = Some(decided_by);
    grant.approved_at = Some(now);
    grant.approval_notes = notes;
    grant.updated_at = now;
    Ok(())
}

pub fn reject_grant(
    grant: &mut CompOffGrant,
    decided_by: EmployeeId,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    grant.transition_to(CompOffGrantStatus::Rejected)?;
    grant.approved_by = Some(decided_by);
    grant.approved_at = Some(now);
    grant.approval_notes = notes;
    grant.updated_at = now;
    Ok(())
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkUsedOutcome {
    pub marked: Vec<CompOffId>,
    pub skipped: Vec<CompOffId>,
}

/// Best-effort consumption: listed grants that are not usable today (pending,
/// rejected, expired, already used, or unknown) are skipped and reported, not
/// failed.
pub fn mark_used(
    grants: &mut [CompOffGrant],
    ids: &[CompOffId],
    request_id: &LeaveRequestId,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> MarkUsedOutcome {
    let mut outcome = MarkUsedOutcome::default();
    for id in ids {
        let Some(grant) = grants.iter_mut().find(|grant| &grant.id == id) else {
            outcome.skipped.push(id.clone());
            continue;
        };
        if !grant.can_be_used(today) {
            outcome.skipped.push(id.clone());
            continue;
        }

        grant.is_used = true;
        grant.used_date = Some(today);
        grant.leave_request_id = Some(request_id.clone());
        grant.updated_at = now;
        outcome.marked.push(id.clone());
    }
    outcome
}

/// Unconditional reset of the listed grants; the caller already holds the
/// authoritative id list for the request being unwound.
pub fn release(grants: &mut [CompOffGrant], ids: &[CompOffId], now: DateTime<Utc>) -> Vec<CompOffId> {
    let mut released = Vec::new();
    for id in ids {
        if let Some(grant) = grants.iter_mut().find(|grant| &grant.id == id) {
            grant.is_used = false;
            grant.used_date = None;
            grant.leave_request_id = None;
            grant.updated_at = now;
            released.push(id.clone());
        }
    }
    released
}

/// Sum of days over grants consumable today.
pub fn available_days(grants: &[CompOffGrant], today: NaiveDate) -> Decimal {
    grants.iter().filter(|grant| grant.can_be_used(today)).map(|grant| grant.days_granted).sum()
}
