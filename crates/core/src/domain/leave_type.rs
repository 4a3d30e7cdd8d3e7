use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaveTypeId(pub String);

/// Read-only leave-type configuration consumed by the balance engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaveType {
    pub id: LeaveTypeId,
    pub code: String,
    pub name: String,
    pub default_annual_days: Decimal,
    pub carry_forward_allowed: bool,
    pub max_encashment_days: Decimal,
    pub is_comp_off_type: bool,
}
