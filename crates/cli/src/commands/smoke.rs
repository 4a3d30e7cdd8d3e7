use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{CommandResult, TracingAuditSink};
use timeoff_core::approvals::ApprovalDecision;
use timeoff_core::audit::AuditSink;
use timeoff_core::config::{AppConfig, LoadOptions};
use timeoff_core::domain::balance::BalanceScope;
use timeoff_core::domain::employee::{Employee, EmployeeId};
use timeoff_core::domain::leave_type::{LeaveType, LeaveTypeId};
use timeoff_core::ledger::{AdjustmentChain, ChainedAdjustment};
use timeoff_core::request_engine::{CancellationCommand, LeaveRequestDraft, RequestEngine};
use timeoff_db::repositories::{
    AdjustmentRepository, BalanceRepository, EmployeeRepository, InMemoryLeaveStore,
    LeaveRequestRepository, LeaveTypeRepository,
};
use timeoff_db::{connect_with_settings, migrations};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("engine_round_trip"));
            checks.push(skipped("adjustment_chain_verify"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("engine_round_trip"));
            checks.push(skipped("adjustment_chain_verify"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(async {
        connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
    });

    match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected using `{}`", config.database.url),
            });

            let migration_started = Instant::now();
            let migration_result =
                runtime.block_on(async { migrations::run_pending(&pool).await });
            runtime.block_on(async {
                pool.close().await;
            });

            match migration_result {
                Ok(()) => checks.push(SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Pass,
                    elapsed_ms: migration_started.elapsed().as_millis() as u64,
                    message: "migrations are visible and executable".to_string(),
                }),
                Err(error) => checks.push(SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Fail,
                    elapsed_ms: migration_started.elapsed().as_millis() as u64,
                    message: format!("migration execution failed: {error}"),
                }),
            }
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
        }
    }

    // The engine checks run against the in-memory store and only need the
    // loaded config, so a database outage does not mask them.
    let engine_started = Instant::now();
    let trip_result = runtime.block_on(engine_round_trip(&config));
    let engine_elapsed = engine_started.elapsed().as_millis() as u64;

    match trip_result {
        Ok(trip) => {
            checks.push(SmokeCheck {
                name: "engine_round_trip",
                status: SmokeStatus::Pass,
                elapsed_ms: engine_elapsed,
                message: format!(
                    "submitted, approved, and cancelled a {}-day request in memory",
                    trip.days
                ),
            });

            let chain_started = Instant::now();
            let verification = trip.chain.verify(&trip.scope, &trip.entries);
            let chain_elapsed = chain_started.elapsed().as_millis() as u64;
            if verification.valid {
                checks.push(SmokeCheck {
                    name: "adjustment_chain_verify",
                    status: SmokeStatus::Pass,
                    elapsed_ms: chain_elapsed,
                    message: format!("verified {} signed entries", verification.verified_entries),
                });
            } else {
                checks.push(SmokeCheck {
                    name: "adjustment_chain_verify",
                    status: SmokeStatus::Fail,
                    elapsed_ms: chain_elapsed,
                    message: verification
                        .failure_reason
                        .unwrap_or_else(|| "chain verification failed".to_string()),
                });
            }
        }
        Err(message) => {
            checks.push(SmokeCheck {
                name: "engine_round_trip",
                status: SmokeStatus::Fail,
                elapsed_ms: engine_elapsed,
                message,
            });
            checks.push(skipped("adjustment_chain_verify"));
        }
    }

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

struct RoundTrip {
    chain: AdjustmentChain,
    scope: BalanceScope,
    entries: Vec<ChainedAdjustment>,
    days: Decimal,
}

/// Drives one submit, approve, and cancel pass through the engine against the
/// in-memory store, using the policies and signing key from live config. The
/// probe dates are fixed so the Monday-to-Friday count and the
/// cancellable-in-the-future rule hold on any run date.
async fn engine_round_trip(config: &AppConfig) -> Result<RoundTrip, String> {
    let (day_count, comp_off) = config.engine_policies();
    let one_day = comp_off.days_for_hours(comp_off.hours_per_day);
    if one_day < comp_off.min_days || one_day > comp_off.max_days {
        return Err(format!(
            "conversion for {} hours produced {one_day} days, outside the policy bounds",
            comp_off.hours_per_day
        ));
    }
    let engine = RequestEngine::new(day_count, comp_off);
    let chain = AdjustmentChain::new(config.audit.signing_key.expose_secret());
    let store = InMemoryLeaveStore::default();
    let sink = TracingAuditSink;
    let now = Utc::now();

    let employee = Employee {
        id: EmployeeId("smoke-emp".to_string()),
        display_name: "Smoke Probe".to_string(),
        active: true,
    };
    let leave_type = LeaveType {
        id: LeaveTypeId("smoke-annual".to_string()),
        code: "SMOKE_ANNUAL".to_string(),
        name: "Smoke Annual Leave".to_string(),
        default_annual_days: Decimal::from(10),
        carry_forward_allowed: false,
        max_encashment_days: Decimal::ZERO,
        is_comp_off_type: false,
    };
    EmployeeRepository::save(&store, employee.clone()).await.map_err(|e| e.to_string())?;
    LeaveTypeRepository::save(&store, leave_type.clone()).await.map_err(|e| e.to_string())?;

    let today = probe_date(2025, 6, 2)?;
    let from = probe_date(2025, 6, 9)?;
    let to = probe_date(2025, 6, 13)?;
    let scope = BalanceScope {
        employee_id: employee.id.clone(),
        leave_type_id: leave_type.id.clone(),
        year: 2025,
    };

    let balance =
        store.get_or_create(&scope, &leave_type, now).await.map_err(|e| e.to_string())?;
    let available_before = balance.available;
    let existing =
        store.list_open_for_employee(&employee.id).await.map_err(|e| e.to_string())?;

    let draft = LeaveRequestDraft {
        employee_id: employee.id.clone(),
        leave_type_id: leave_type.id,
        from_date: from,
        to_date: to,
        is_half_day: false,
        half_day_slot: None,
        reason: "connectivity probe".to_string(),
        use_comp_off: false,
        comp_off_ids: Vec::new(),
    };
    let prepared = engine
        .prepare_submission(draft, &existing, &balance, &[], today, now, "smoke")
        .map_err(|e| e.to_string())?;
    let days = prepared.request.total_days;
    if days != Decimal::from(5) {
        return Err(format!("expected a five-day Monday-to-Friday count, computed {days}"));
    }
    LeaveRequestRepository::save(&store, prepared.request.clone())
        .await
        .map_err(|e| e.to_string())?;
    for event in prepared.events {
        sink.emit(event);
    }

    let decision = ApprovalDecision {
        decided_by: EmployeeId("smoke-mgr".to_string()),
        notes: None,
        decided_at: probe_instant(2025, 6, 3)?,
    };
    let outcome = engine
        .approve(prepared.request, balance, Vec::new(), &decision, "smoke")
        .map_err(|e| e.to_string())?;
    if outcome.balance.used != days {
        return Err(format!(
            "expected {days} used days after approval, found {}",
            outcome.balance.used
        ));
    }
    if !store.update_versioned(&outcome.balance).await.map_err(|e| e.to_string())? {
        return Err("versioned balance write after approval was not applied".to_string());
    }
    let adjustment =
        outcome.adjustment.ok_or_else(|| "approval produced no balance adjustment".to_string())?;
    let consume_entry = chain.extend(None, adjustment);
    store.append(consume_entry.clone()).await.map_err(|e| e.to_string())?;
    for event in outcome.events {
        sink.emit(event);
    }

    let command = CancellationCommand {
        actor_id: employee.id.clone(),
        reason: Some("connectivity probe complete".to_string()),
        by_admin: false,
        requested_at: probe_instant(2025, 6, 4)?,
    };
    let cancelled = engine
        .cancel(outcome.request, outcome.balance, outcome.grants, command, "smoke")
        .map_err(|e| e.to_string())?;
    if cancelled.balance.used != Decimal::ZERO || cancelled.balance.available != available_before {
        return Err(format!(
            "expected the cancellation to restore {available_before} available days, found {} used and {} available",
            cancelled.balance.used, cancelled.balance.available
        ));
    }
    if !store.update_versioned(&cancelled.balance).await.map_err(|e| e.to_string())? {
        return Err("versioned balance write after cancellation was not applied".to_string());
    }
    let adjustment = cancelled
        .adjustment
        .ok_or_else(|| "cancellation produced no balance adjustment".to_string())?;
    let restore_entry = chain.extend(Some(&consume_entry), adjustment);
    store.append(restore_entry).await.map_err(|e| e.to_string())?;
    LeaveRequestRepository::save(&store, cancelled.request).await.map_err(|e| e.to_string())?;
    for event in cancelled.events {
        sink.emit(event);
    }

    let entries = store.list_for_scope(&scope).await.map_err(|e| e.to_string())?;
    Ok(RoundTrip { chain, scope, entries, days })
}

fn probe_date(year: i32, month: u32, day: u32) -> Result<NaiveDate, String> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| format!("invalid probe date {year}-{month:02}-{day:02}"))
}

fn probe_instant(year: i32, month: u32, day: u32) -> Result<DateTime<Utc>, String> {
    let date = probe_date(year, month, day)?;
    date.and_hms_opt(9, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid probe instant {year}-{month:02}-{day:02}"))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due to previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
