use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::balance::BalanceScope;
use crate::domain::employee::EmployeeId;
use crate::domain::leave_request::LeaveRequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdjustmentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Consume,
    Restore,
    Manual,
}

impl AdjustmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consume => "consume",
            Self::Restore => "restore",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "consume" => Some(Self::Consume),
            "restore" => Some(Self::Restore),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// One append-only audit record of a balance mutation. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceAdjustment {
    pub id: AdjustmentId,
    pub scope: BalanceScope,
    pub kind: AdjustmentKind,
    /// Signed change to `available`: negative for consume, positive for restore.
    pub days_delta: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub effective_date: NaiveDate,
    pub actor_id: EmployeeId,
    pub reason: String,
    pub leave_request_id: Option<LeaveRequestId>,
    pub correlation_id: String,
    pub occurred_at: DateTime<Utc>,
}
