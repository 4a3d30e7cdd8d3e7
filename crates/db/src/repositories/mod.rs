use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use timeoff_core::domain::balance::{BalanceScope, LeaveBalance};
use timeoff_core::domain::comp_off::{CompOffGrant, CompOffId};
use timeoff_core::domain::employee::{Employee, EmployeeId};
use timeoff_core::domain::leave_request::{LeaveRequest, LeaveRequestId};
use timeoff_core::domain::leave_type::{LeaveType, LeaveTypeId};
use timeoff_core::domain::resolution::{OperationKey, ResolutionRecord};
use timeoff_core::ledger::ChainedAdjustment;

pub mod adjustment;
pub mod balance;
pub mod comp_off;
pub mod employee;
pub mod leave_request;
pub mod leave_type;
pub mod memory;
pub mod resolution;

pub use adjustment::SqlAdjustmentRepository;
pub use balance::SqlBalanceRepository;
pub use comp_off::SqlCompOffRepository;
pub use employee::SqlEmployeeRepository;
pub use leave_request::SqlLeaveRequestRepository;
pub use leave_type::SqlLeaveTypeRepository;
pub use memory::InMemoryLeaveStore;
pub use resolution::SqlResolutionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait EmployeeRepository: Send + Sync {
    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError>;
    async fn save(&self, employee: Employee) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait LeaveTypeRepository: Send + Sync {
    async fn find_by_id(&self, id: &LeaveTypeId) -> Result<Option<LeaveType>, RepositoryError>;
    async fn save(&self, leave_type: LeaveType) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait LeaveRequestRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Option<LeaveRequest>, RepositoryError>;

    /// Newest-first by from_date; `year` filters on the leave's start year.
    async fn list_for_employee(
        &self,
        employee_id: &EmployeeId,
        year: Option<i32>,
    ) -> Result<Vec<LeaveRequest>, RepositoryError>;

    /// Pending and Approved requests only, the set overlap checks run against.
    async fn list_open_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, RepositoryError>;

    async fn save(&self, request: LeaveRequest) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait BalanceRepository: Send + Sync {
    async fn find(&self, scope: &BalanceScope) -> Result<Option<LeaveBalance>, RepositoryError>;

    /// Idempotent under concurrent first-use: the insert tolerates a
    /// concurrent winner and the stored row is re-read either way.
    async fn get_or_create(
        &self,
        scope: &BalanceScope,
        leave_type: &LeaveType,
        now: DateTime<Utc>,
    ) -> Result<LeaveBalance, RepositoryError>;

    /// Version-guarded write: the row is only updated when its stored
    /// `state_version` equals `balance.state_version - 1`. Returns `false`
    /// when the guard did not match and nothing was written.
    async fn update_versioned(&self, balance: &LeaveBalance) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait CompOffRepository: Send + Sync {
    async fn find_by_id(&self, id: &CompOffId) -> Result<Option<CompOffGrant>, RepositoryError>;

    /// Unknown ids are simply absent from the result; callers decide whether
    /// that is an error.
    async fn find_by_ids(&self, ids: &[CompOffId]) -> Result<Vec<CompOffGrant>, RepositoryError>;

    async fn list_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<CompOffGrant>, RepositoryError>;

    async fn save(&self, grant: CompOffGrant) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AdjustmentRepository: Send + Sync {
    async fn append(&self, entry: ChainedAdjustment) -> Result<(), RepositoryError>;

    /// Ascending chain version, the order `AdjustmentChain::verify` expects.
    async fn list_for_scope(
        &self,
        scope: &BalanceScope,
    ) -> Result<Vec<ChainedAdjustment>, RepositoryError>;

    async fn latest_for_scope(
        &self,
        scope: &BalanceScope,
    ) -> Result<Option<ChainedAdjustment>, RepositoryError>;

    async fn list_for_request(
        &self,
        request_id: &LeaveRequestId,
    ) -> Result<Vec<ChainedAdjustment>, RepositoryError>;
}

#[async_trait]
pub trait ResolutionRepository: Send + Sync {
    async fn find(&self, key: &OperationKey) -> Result<Option<ResolutionRecord>, RepositoryError>;

    async fn save(&self, record: ResolutionRecord) -> Result<(), RepositoryError>;

    /// Bump the attempt counter for an already-applied operation and return
    /// the updated record.
    async fn record_duplicate(
        &self,
        key: &OperationKey,
    ) -> Result<ResolutionRecord, RepositoryError>;
}

// Column decoders shared by the SQL repositories. The schema stores decimals,
// dates, and timestamps as TEXT and booleans as 0/1 INTEGER columns.

pub(crate) fn parse_i32(column: &str, value: i64) -> Result<i32, RepositoryError> {
    i32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("value out of range for `{column}`: {value}"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("value out of range for `{column}`: {value}"))
    })
}

pub(crate) fn parse_bool_flag(column: &str, value: i64) -> Result<bool, RepositoryError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        raw => Err(RepositoryError::Decode(format!("invalid boolean flag for `{column}`: {raw}"))),
    }
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_optional_date(
    column: &str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, RepositoryError> {
    value.map(|raw| parse_date(column, raw)).transpose()
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| parse_timestamp(column, raw)).transpose()
}
