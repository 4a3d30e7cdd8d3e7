use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::leave_request::{LeaveRequestId, LeaveRequestStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey(pub String);

impl OperationKey {
    /// One terminal resolution per request and target status.
    pub fn terminal(request_id: &LeaveRequestId, target: LeaveRequestStatus) -> Self {
        Self(format!("{}:{}", request_id.0, target.as_str()))
    }
}

/// Idempotency record for the approval workflow's terminal callbacks. The
/// first resolve under an operation key writes it; duplicates only bump
/// `attempt_count`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub operation_key: OperationKey,
    pub leave_request_id: LeaveRequestId,
    pub outcome_status: LeaveRequestStatus,
    pub first_applied_at: DateTime<Utc>,
    pub attempt_count: u32,
}
