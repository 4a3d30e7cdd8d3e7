use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::balance::BalanceScope;
use crate::domain::comp_off::CompOffId;
use crate::domain::employee::EmployeeId;
use crate::domain::leave_type::LeaveTypeId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaveRequestId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalfDaySlot {
    FirstHalf,
    SecondHalf,
}

impl HalfDaySlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstHalf => "first_half",
            Self::SecondHalf => "second_half",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first_half" => Some(Self::FirstHalf),
            "second_half" => Some(Self::SecondHalf),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveRequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    CancelledByAdmin,
}

impl LeaveRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::CancelledByAdmin => "cancelled_by_admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "cancelled_by_admin" => Some(Self::CancelledByAdmin),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::CancelledByAdmin)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: LeaveRequestId,
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub is_half_day: bool,
    pub half_day_slot: Option<HalfDaySlot>,
    /// Recomputed from the dates on every save, never trusted from input.
    pub total_days: Decimal,
    pub reason: String,
    pub use_comp_off: bool,
    pub comp_off_days_used: Decimal,
    pub comp_off_ids: Vec<CompOffId>,
    pub status: LeaveRequestStatus,
    pub approved_by: Option<EmployeeId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<EmployeeId>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<EmployeeId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaveRequest {
    pub fn can_transition_to(&self, next: LeaveRequestStatus) -> bool {
        matches!(
            (self.status, next),
            (LeaveRequestStatus::Pending, LeaveRequestStatus::Approved)
                | (LeaveRequestStatus::Pending, LeaveRequestStatus::Rejected)
                | (LeaveRequestStatus::Pending, LeaveRequestStatus::Cancelled)
                | (LeaveRequestStatus::Pending, LeaveRequestStatus::CancelledByAdmin)
                | (LeaveRequestStatus::Approved, LeaveRequestStatus::Cancelled)
                | (LeaveRequestStatus::Approved, LeaveRequestStatus::CancelledByAdmin)
        )
    }

    pub fn transition_to(&mut self, next: LeaveRequestStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidTransition { from: self.status, to: next })
    }

    /// Cancellation window: the request is still live and the leave has not started.
    pub fn can_be_cancelled(&self, today: NaiveDate) -> bool {
        matches!(self.status, LeaveRequestStatus::Pending | LeaveRequestStatus::Approved)
            && self.from_date > today
    }

    /// Days charged against the regular balance (total minus comp-off cover).
    pub fn regular_days(&self) -> Decimal {
        self.total_days - self.comp_off_days_used
    }

    pub fn year(&self) -> i32 {
        self.from_date.year()
    }

    pub fn balance_scope(&self) -> BalanceScope {
        BalanceScope {
            employee_id: self.employee_id.clone(),
            leave_type_id: self.leave_type_id.clone(),
            year: self.year(),
        }
    }
}
