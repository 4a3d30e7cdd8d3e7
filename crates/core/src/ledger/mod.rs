//! Balance ledger arithmetic. Every mutation of a `LeaveBalance` goes through
//! here and yields exactly one `BalanceAdjustment` audit record capturing the
//! before/after snapshot.

pub mod chain;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::adjustment::{AdjustmentId, AdjustmentKind, BalanceAdjustment};
use crate::domain::balance::{BalanceScope, LeaveBalance};
use crate::domain::employee::EmployeeId;
use crate::domain::leave_request::LeaveRequestId;
use crate::domain::leave_type::LeaveType;

pub use chain::{AdjustmentChain, ChainVerification, ChainedAdjustment};

/// Attribution for one ledger mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct AdjustmentContext {
    pub actor_id: EmployeeId,
    pub reason: String,
    pub leave_request_id: Option<LeaveRequestId>,
    pub correlation_id: String,
    pub effective_date: NaiveDate,
}

/// Fresh balance row for first use of a scope. Seeded from the leave-type
/// configuration: entitled and available start at the annual default,
/// everything else at zero.
pub fn new_balance(scope: BalanceScope, leave_type: &LeaveType, now: DateTime<Utc>) -> LeaveBalance {
    LeaveBalance {
        scope,
        entitled: leave_type.default_annual_days,
        carried_forward: Decimal::ZERO,
        carry_forward_expiry: None,
        additional: Decimal::ZERO,
        used: Decimal::ZERO,
        available: leave_type.default_annual_days,
        state_version: 1,
        created_at: now,
        updated_at: now,
    }
}

/// used += days; available floors at zero. The floor is not an overdraw
/// policy: callers must refuse operations that would overdraw before getting
/// here.
pub fn consume(
    balance: &mut LeaveBalance,
    days: Decimal,
    context: &AdjustmentContext,
    now: DateTime<Utc>,
) -> BalanceAdjustment {
    let before = balance.available;
    balance.used += days;
    balance.available = (balance.available - days).max(Decimal::ZERO);
    touch(balance, now);

    adjustment(balance, AdjustmentKind::Consume, -days, before, context, now)
}

/// Exact inverse of `consume` for the same amount: used floors at zero,
/// available grows back.
pub fn restore(
    balance: &mut LeaveBalance,
    days: Decimal,
    context: &AdjustmentContext,
    now: DateTime<Utc>,
) -> BalanceAdjustment {
    let before = balance.available;
    balance.used = (balance.used - days).max(Decimal::ZERO);
    balance.available += days;
    touch(balance, now);

    adjustment(balance, AdjustmentKind::Restore, days, before, context, now)
}

fn touch(balance: &mut LeaveBalance, now: DateTime<Utc>) {
    balance.state_version += 1;
    balance.updated_at = now;
}

fn adjustment(
    balance: &LeaveBalance,
    kind: AdjustmentKind,
    days_delta: Decimal,
    balance_before: Decimal,
    context: &AdjustmentContext,
    now: DateTime<Utc>,
) -> BalanceAdjustment {
    BalanceAdjustment {
        id: AdjustmentId(Uuid::new_v4().to_string()),
        scope: balance.scope.clone(),
        kind,
        days_delta,
        balance_before,
        balance_after: balance.available,
        effective_date: context.effective_date,
        actor_id: context.actor_id.clone(),
        reason: context.reason.clone(),
        leave_request_id: context.leave_request_id.clone(),
        correlation_id: context.correlation_id.clone(),
        occurred_at: now,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use crate::domain::adjustment::AdjustmentKind;
    use crate::domain::balance::BalanceScope;
    use crate::domain::employee::EmployeeId;
    use crate::domain::leave_type::{LeaveType, LeaveTypeId};

    use super::{consume, new_balance, restore, AdjustmentContext};

    fn annual_type() -> LeaveType {
        LeaveType {
            id: LeaveTypeId("lt-annual".to_string()),
            code: "annual".to_string(),
            name: "Annual Leave".to_string(),
            default_annual_days: Decimal::new(10, 0),
            carry_forward_allowed: true,
            max_encashment_days: Decimal::new(5, 0),
            is_comp_off_type: false,
        }
    }

    fn scope() -> BalanceScope {
        BalanceScope {
            employee_id: EmployeeId("emp-1".to_string()),
            leave_type_id: LeaveTypeId("lt-annual".to_string()),
            year: 2025,
        }
    }

    fn context() -> AdjustmentContext {
        AdjustmentContext {
            actor_id: EmployeeId("mgr-1".to_string()),
            reason: "leave approval".to_string(),
            leave_request_id: None,
            correlation_id: "corr-1".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
        }
    }

    #[test]
    fn new_balance_seeds_entitlement_from_leave_type() {
        let balance = new_balance(scope(), &annual_type(), Utc::now());

        assert_eq!(balance.entitled, Decimal::new(10, 0));
        assert_eq!(balance.available, Decimal::new(10, 0));
        assert_eq!(balance.used, Decimal::ZERO);
        assert_eq!(balance.carried_forward, Decimal::ZERO);
        assert_eq!(balance.additional, Decimal::ZERO);
        assert_eq!(balance.state_version, 1);
    }

    #[test]
    fn consume_moves_days_from_available_to_used() {
        let mut balance = new_balance(scope(), &annual_type(), Utc::now());
        let entry = consume(&mut balance, Decimal::new(3, 0), &context(), Utc::now());

        assert_eq!(balance.available, Decimal::new(7, 0));
        assert_eq!(balance.used, Decimal::new(3, 0));
        assert_eq!(balance.state_version, 2);

        assert_eq!(entry.kind, AdjustmentKind::Consume);
        assert_eq!(entry.days_delta, Decimal::new(-3, 0));
        assert_eq!(entry.balance_before, Decimal::new(10, 0));
        assert_eq!(entry.balance_after, Decimal::new(7, 0));
    }

    #[test]
    fn restore_is_the_exact_inverse_of_consume() {
        let mut balance = new_balance(scope(), &annual_type(), Utc::now());
        consume(&mut balance, Decimal::new(3, 0), &context(), Utc::now());
        let entry = restore(&mut balance, Decimal::new(3, 0), &context(), Utc::now());

        assert_eq!(balance.available, Decimal::new(10, 0));
        assert_eq!(balance.used, Decimal::ZERO);

        assert_eq!(entry.kind, AdjustmentKind::Restore);
        assert_eq!(entry.days_delta, Decimal::new(3, 0));
        assert_eq!(entry.balance_before, Decimal::new(7, 0));
        assert_eq!(entry.balance_after, Decimal::new(10, 0));
    }

    #[test]
    fn consume_floors_available_at_zero() {
        let mut balance = new_balance(scope(), &annual_type(), Utc::now());
        consume(&mut balance, Decimal::new(12, 0), &context(), Utc::now());

        assert_eq!(balance.available, Decimal::ZERO);
        assert_eq!(balance.used, Decimal::new(12, 0));
    }

    #[test]
    fn restore_floors_used_at_zero() {
        let mut balance = new_balance(scope(), &annual_type(), Utc::now());
        let entry = restore(&mut balance, Decimal::new(2, 0), &context(), Utc::now());

        assert_eq!(balance.used, Decimal::ZERO);
        assert_eq!(balance.available, Decimal::new(12, 0));
        assert_eq!(entry.days_delta, Decimal::new(2, 0));
    }

    #[test]
    fn half_day_amounts_stay_exact() {
        let mut balance = new_balance(scope(), &annual_type(), Utc::now());
        consume(&mut balance, Decimal::new(5, 1), &context(), Utc::now());

        assert_eq!(balance.available, Decimal::new(95, 1));
        assert_eq!(balance.used, Decimal::new(5, 1));
    }

    #[test]
    fn adjustment_carries_attribution() {
        let mut balance = new_balance(scope(), &annual_type(), Utc::now());
        let entry = consume(&mut balance, Decimal::ONE, &context(), Utc::now());

        assert_eq!(entry.actor_id, EmployeeId("mgr-1".to_string()));
        assert_eq!(entry.reason, "leave approval");
        assert_eq!(entry.correlation_id, "corr-1");
        assert_eq!(entry.scope, scope());
        assert!(!entry.id.0.is_empty());
    }
}
