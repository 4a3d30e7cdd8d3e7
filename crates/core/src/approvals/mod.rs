//! Seam to the external approval-routing subsystem. The engine initiates
//! routing on submission and reacts to terminal decisions delivered through
//! the resolve operations; it never implements routing itself.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::employee::EmployeeId;
use crate::domain::leave_request::LeaveRequestId;

/// Routing envelope handed to the workflow when a request is submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalCallout {
    pub domain: String,
    pub request_id: LeaveRequestId,
    pub requester: EmployeeId,
    pub correlation_id: String,
}

impl ApprovalCallout {
    pub fn leave(
        request_id: LeaveRequestId,
        requester: EmployeeId,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            domain: "leave".to_string(),
            request_id,
            requester,
            correlation_id: correlation_id.into(),
        }
    }
}

/// Acknowledgement that routing has started. The engine keeps nothing from
/// it beyond logging; decisions arrive via callback, never by polling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalHandle {
    pub workflow_ref: String,
    pub accepted_at: DateTime<Utc>,
}

/// Terminal decision payload delivered by the workflow's callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub decided_by: EmployeeId,
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("approval workflow unavailable: {0}")]
    Unavailable(String),
    #[error("approval workflow refused the callout: {0}")]
    RefusedCallout(String),
}

#[async_trait]
pub trait ApprovalWorkflow: Send + Sync {
    /// Fire-and-continue: initiate routing for a submitted request.
    async fn request_approval(
        &self,
        callout: ApprovalCallout,
    ) -> Result<ApprovalHandle, WorkflowError>;
}

/// Test double that records callouts and acknowledges immediately.
#[derive(Clone, Default)]
pub struct RecordingApprovalWorkflow {
    callouts: Arc<Mutex<Vec<ApprovalCallout>>>,
    failure: Option<String>,
}

impl RecordingApprovalWorkflow {
    pub fn failing(message: impl Into<String>) -> Self {
        Self { callouts: Arc::default(), failure: Some(message.into()) }
    }

    pub fn callouts(&self) -> Vec<ApprovalCallout> {
        match self.callouts.lock() {
            Ok(callouts) => callouts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ApprovalWorkflow for RecordingApprovalWorkflow {
    async fn request_approval(
        &self,
        callout: ApprovalCallout,
    ) -> Result<ApprovalHandle, WorkflowError> {
        if let Some(message) = &self.failure {
            return Err(WorkflowError::Unavailable(message.clone()));
        }

        let workflow_ref = format!("wf-{}", callout.request_id.0);
        match self.callouts.lock() {
            Ok(mut callouts) => callouts.push(callout),
            Err(poisoned) => poisoned.into_inner().push(callout),
        }

        Ok(ApprovalHandle { workflow_ref, accepted_at: Utc::now() })
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::employee::EmployeeId;
    use crate::domain::leave_request::LeaveRequestId;

    use super::{ApprovalCallout, ApprovalWorkflow, RecordingApprovalWorkflow, WorkflowError};

    #[tokio::test]
    async fn recording_workflow_acknowledges_and_stores_callouts() {
        let workflow = RecordingApprovalWorkflow::default();
        let callout = ApprovalCallout::leave(
            LeaveRequestId("req-1".to_string()),
            EmployeeId("emp-1".to_string()),
            "corr-1",
        );

        let handle =
            workflow.request_approval(callout.clone()).await.expect("callout should be accepted");

        assert_eq!(handle.workflow_ref, "wf-req-1");
        let callouts = workflow.callouts();
        assert_eq!(callouts.len(), 1);
        assert_eq!(callouts[0], callout);
        assert_eq!(callouts[0].domain, "leave");
    }

    #[tokio::test]
    async fn failing_workflow_surfaces_unavailability() {
        let workflow = RecordingApprovalWorkflow::failing("router offline");
        let callout = ApprovalCallout::leave(
            LeaveRequestId("req-1".to_string()),
            EmployeeId("emp-1".to_string()),
            "corr-1",
        );

        let error =
            workflow.request_approval(callout).await.expect_err("callout should be refused");

        assert_eq!(error, WorkflowError::Unavailable("router offline".to_string()));
        assert!(workflow.callouts().is_empty());
    }
}
