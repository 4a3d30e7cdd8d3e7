use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::employee::EmployeeId;
use crate::domain::leave_request::LeaveRequestId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompOffId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompOffGrantStatus {
    Pending,
    Approved,
    Rejected,
}

impl CompOffGrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Compensatory time earned from extra hours worked, consumable by leave
/// requests until the expiry date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompOffGrant {
    pub id: CompOffId,
    pub employee_id: EmployeeId,
    pub worked_date: NaiveDate,
    pub hours_worked: Decimal,
    pub days_granted: Decimal,
    pub expiry_date: NaiveDate,
    pub status: CompOffGrantStatus,
    pub reason: Option<String>,
    pub is_used: bool,
    pub used_date: Option<NaiveDate>,
    pub leave_request_id: Option<LeaveRequestId>,
    pub approved_by: Option<EmployeeId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approval_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompOffGrant {
    pub fn can_transition_to(&self, next: CompOffGrantStatus) -> bool {
        matches!(
            (self.status, next),
            (CompOffGrantStatus::Pending, CompOffGrantStatus::Approved)
                | (CompOffGrantStatus::Pending, CompOffGrantStatus::Rejected)
        )
    }

    pub fn transition_to(&mut self, next: CompOffGrantStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidGrantTransition { from: self.status, to: next })
    }

    /// Approved, never consumed, and not past expiry.
    pub fn can_be_used(&self, today: NaiveDate) -> bool {
        self.status == CompOffGrantStatus::Approved && !self.is_used && self.expiry_date >= today
    }
}
