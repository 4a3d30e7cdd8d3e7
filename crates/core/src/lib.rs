pub mod approvals;
pub mod audit;
pub mod comp_off_ledger;
pub mod config;
pub mod daycount;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod overlap;
pub mod request_engine;

pub use approvals::{
    ApprovalCallout, ApprovalDecision, ApprovalHandle, ApprovalWorkflow,
    RecordingApprovalWorkflow, WorkflowError,
};
pub use comp_off_ledger::{CompOffPolicy, GrantRequest, MarkUsedOutcome};
pub use daycount::DayCountPolicy;
pub use domain::adjustment::{AdjustmentKind, BalanceAdjustment};
pub use domain::balance::{BalanceScope, LeaveBalance};
pub use domain::comp_off::{CompOffGrant, CompOffGrantStatus, CompOffId};
pub use domain::employee::{Employee, EmployeeId};
pub use domain::leave_request::{HalfDaySlot, LeaveRequest, LeaveRequestId, LeaveRequestStatus};
pub use domain::leave_type::{LeaveType, LeaveTypeId};
pub use domain::resolution::{OperationKey, ResolutionRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use ledger::{AdjustmentChain, ChainVerification, ChainedAdjustment};
pub use request_engine::{CancellationCommand, LeaveRequestDraft, RequestEngine};
