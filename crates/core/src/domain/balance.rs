use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::employee::EmployeeId;
use crate::domain::leave_type::LeaveTypeId;

/// Key of one balance row: employee x leave type x calendar year.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceScope {
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub year: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaveBalance {
    pub scope: BalanceScope,
    pub entitled: Decimal,
    pub carried_forward: Decimal,
    pub carry_forward_expiry: Option<NaiveDate>,
    pub additional: Decimal,
    pub used: Decimal,
    pub available: Decimal,
    /// Optimistic-concurrency counter; bumped on every persisted mutation.
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaveBalance {
    pub fn total_allotment(&self) -> Decimal {
        self.entitled + self.carried_forward + self.additional
    }
}
