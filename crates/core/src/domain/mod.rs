pub mod adjustment;
pub mod balance;
pub mod comp_off;
pub mod employee;
pub mod leave_request;
pub mod leave_type;
pub mod resolution;

pub use adjustment::{AdjustmentId, AdjustmentKind, BalanceAdjustment};
pub use balance::{BalanceScope, LeaveBalance};
pub use comp_off::{CompOffGrant, CompOffGrantStatus, CompOffId};
pub use employee::{Employee, EmployeeId};
pub use leave_request::{HalfDaySlot, LeaveRequest, LeaveRequestId, LeaveRequestStatus};
pub use leave_type::{LeaveType, LeaveTypeId};
pub use resolution::{OperationKey, ResolutionRecord};
