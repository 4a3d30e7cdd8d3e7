use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use timeoff_core::domain::balance::{BalanceScope, LeaveBalance};
use timeoff_core::domain::comp_off::{CompOffGrant, CompOffId};
use timeoff_core::domain::employee::{Employee, EmployeeId};
use timeoff_core::domain::leave_request::{LeaveRequest, LeaveRequestId, LeaveRequestStatus};
use timeoff_core::domain::leave_type::{LeaveType, LeaveTypeId};
use timeoff_core::domain::resolution::{OperationKey, ResolutionRecord};
use timeoff_core::ledger::{self, ChainedAdjustment};

use super::{
    AdjustmentRepository, BalanceRepository, CompOffRepository, EmployeeRepository,
    LeaveRequestRepository, LeaveTypeRepository, RepositoryError, ResolutionRepository,
};

/// One fake store backing every repository trait, so a test (or the smoke
/// check) can run a whole request lifecycle without a database. Ordering and
/// uniqueness rules mirror the SQL implementations.
#[derive(Default)]
pub struct InMemoryLeaveStore {
    employees: RwLock<HashMap<String, Employee>>,
    leave_types: RwLock<HashMap<String, LeaveType>>,
    requests: RwLock<HashMap<String, LeaveRequest>>,
    balances: RwLock<HashMap<String, LeaveBalance>>,
    grants: RwLock<HashMap<String, CompOffGrant>>,
    adjustments: RwLock<HashMap<String, Vec<ChainedAdjustment>>>,
    resolutions: RwLock<HashMap<String, ResolutionRecord>>,
}

fn scope_key(scope: &BalanceScope) -> String {
    format!("{}|{}|{}", scope.employee_id.0, scope.leave_type_id.0, scope.year)
}

#[async_trait::async_trait]
impl EmployeeRepository for InMemoryLeaveStore {
    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let employees = self.employees.read().await;
        Ok(employees.get(&id.0).cloned())
    }

    async fn save(&self, employee: Employee) -> Result<(), RepositoryError> {
        let mut employees = self.employees.write().await;
        employees.insert(employee.id.0.clone(), employee);
        Ok(())
    }
}

#[async_trait::async_trait]
impl LeaveTypeRepository for InMemoryLeaveStore {
    async fn find_by_id(&self, id: &LeaveTypeId) -> Result<Option<LeaveType>, RepositoryError> {
        let leave_types = self.leave_types.read().await;
        Ok(leave_types.get(&id.0).cloned())
    }

    async fn save(&self, leave_type: LeaveType) -> Result<(), RepositoryError> {
        let mut leave_types = self.leave_types.write().await;
        leave_types.insert(leave_type.id.0.clone(), leave_type);
        Ok(())
    }
}

#[async_trait::async_trait]
impl LeaveRequestRepository for InMemoryLeaveStore {
    async fn find_by_id(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Option<LeaveRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn list_for_employee(
        &self,
        employee_id: &EmployeeId,
        year: Option<i32>,
    ) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut matched: Vec<LeaveRequest> = requests
            .values()
            .filter(|request| request.employee_id == *employee_id)
            .filter(|request| year.map_or(true, |wanted| request.year() == wanted))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.from_date.cmp(&a.from_date).then(b.created_at.cmp(&a.created_at))
        });
        Ok(matched)
    }

    async fn list_open_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut matched: Vec<LeaveRequest> = requests
            .values()
            .filter(|request| request.employee_id == *employee_id)
            .filter(|request| {
                matches!(
                    request.status,
                    LeaveRequestStatus::Pending | LeaveRequestStatus::Approved
                )
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.from_date.cmp(&b.from_date));
        Ok(matched)
    }

    async fn save(&self, request: LeaveRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BalanceRepository for InMemoryLeaveStore {
    async fn find(&self, scope: &BalanceScope) -> Result<Option<LeaveBalance>, RepositoryError> {
        let balances = self.balances.read().await;
        Ok(balances.get(&scope_key(scope)).cloned())
    }

    async fn get_or_create(
        &self,
        scope: &BalanceScope,
        leave_type: &LeaveType,
        now: DateTime<Utc>,
    ) -> Result<LeaveBalance, RepositoryError> {
        let mut balances = self.balances.write().await;
        let balance = balances
            .entry(scope_key(scope))
            .or_insert_with(|| ledger::new_balance(scope.clone(), leave_type, now));
        Ok(balance.clone())
    }

    async fn update_versioned(&self, balance: &LeaveBalance) -> Result<bool, RepositoryError> {
        let mut balances = self.balances.write().await;
        match balances.get_mut(&scope_key(&balance.scope)) {
            Some(stored) if stored.state_version + 1 == balance.state_version => {
                *stored = balance.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl CompOffRepository for InMemoryLeaveStore {
    async fn find_by_id(&self, id: &CompOffId) -> Result<Option<CompOffGrant>, RepositoryError> {
        let grants = self.grants.read().await;
        Ok(grants.get(&id.0).cloned())
    }

    async fn find_by_ids(&self, ids: &[CompOffId]) -> Result<Vec<CompOffGrant>, RepositoryError> {
        let grants = self.grants.read().await;
        let mut matched: Vec<CompOffGrant> =
            ids.iter().filter_map(|id| grants.get(&id.0).cloned()).collect();
        matched.sort_by(|a, b| a.worked_date.cmp(&b.worked_date).then(a.id.0.cmp(&b.id.0)));
        Ok(matched)
    }

    async fn list_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<CompOffGrant>, RepositoryError> {
        let grants = self.grants.read().await;
        let mut matched: Vec<CompOffGrant> =
            grants.values().filter(|grant| grant.employee_id == *employee_id).cloned().collect();
        matched.sort_by(|a, b| {
            b.worked_date.cmp(&a.worked_date).then(b.created_at.cmp(&a.created_at))
        });
        Ok(matched)
    }

    async fn save(&self, grant: CompOffGrant) -> Result<(), RepositoryError> {
        let mut grants = self.grants.write().await;
        grants.insert(grant.id.0.clone(), grant);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AdjustmentRepository for InMemoryLeaveStore {
    async fn append(&self, entry: ChainedAdjustment) -> Result<(), RepositoryError> {
        let mut adjustments = self.adjustments.write().await;
        let entries = adjustments.entry(scope_key(&entry.adjustment.scope)).or_default();
        if entries.iter().any(|existing| existing.chain_version == entry.chain_version) {
            return Err(RepositoryError::Conflict(format!(
                "chain version {} already recorded for {}",
                entry.chain_version,
                scope_key(&entry.adjustment.scope)
            )));
        }
        entries.push(entry);
        entries.sort_by_key(|existing| existing.chain_version);
        Ok(())
    }

    async fn list_for_scope(
        &self,
        scope: &BalanceScope,
    ) -> Result<Vec<ChainedAdjustment>, RepositoryError> {
        let adjustments = self.adjustments.read().await;
        Ok(adjustments.get(&scope_key(scope)).cloned().unwrap_or_default())
    }

    async fn latest_for_scope(
        &self,
        scope: &BalanceScope,
    ) -> Result<Option<ChainedAdjustment>, RepositoryError> {
        let adjustments = self.adjustments.read().await;
        Ok(adjustments.get(&scope_key(scope)).and_then(|entries| entries.last().cloned()))
    }

    async fn list_for_request(
        &self,
        request_id: &LeaveRequestId,
    ) -> Result<Vec<ChainedAdjustment>, RepositoryError> {
        let adjustments = self.adjustments.read().await;
        let mut matched: Vec<ChainedAdjustment> = adjustments
            .values()
            .flatten()
            .filter(|entry| entry.adjustment.leave_request_id.as_ref() == Some(request_id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.adjustment
                .occurred_at
                .cmp(&b.adjustment.occurred_at)
                .then(a.chain_version.cmp(&b.chain_version))
        });
        Ok(matched)
    }
}

#[async_trait::async_trait]
impl ResolutionRepository for InMemoryLeaveStore {
    async fn find(&self, key: &OperationKey) -> Result<Option<ResolutionRecord>, RepositoryError> {
        let resolutions = self.resolutions.read().await;
        Ok(resolutions.get(&key.0).cloned())
    }

    async fn save(&self, record: ResolutionRecord) -> Result<(), RepositoryError> {
        let mut resolutions = self.resolutions.write().await;
        if resolutions.contains_key(&record.operation_key.0) {
            return Err(RepositoryError::Conflict(format!(
                "resolution already recorded for `{}`",
                record.operation_key.0
            )));
        }
        resolutions.insert(record.operation_key.0.clone(), record);
        Ok(())
    }

    async fn record_duplicate(
        &self,
        key: &OperationKey,
    ) -> Result<ResolutionRecord, RepositoryError> {
        let mut resolutions = self.resolutions.write().await;
        let record = resolutions.get_mut(&key.0).ok_or_else(|| {
            RepositoryError::Decode(format!("resolution record missing for `{}`", key.0))
        })?;
        record.attempt_count += 1;
        Ok(record.clone())
    }
}
