use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use timeoff_cli::commands::{config, doctor, migrate, seed, smoke};

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("TIMEOFF_DATABASE_URL", "sqlite::memory:?cache=shared")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_reports_config_failure_for_unsupported_url() {
    with_env(&[("TIMEOFF_DATABASE_URL", "postgres://not-supported")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_returns_success_with_valid_env() {
    with_env(&[("TIMEOFF_DATABASE_URL", "sqlite::memory:?cache=shared")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected successful seed run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_returns_deterministic_flow_summary() {
    with_env(&[("TIMEOFF_DATABASE_URL", "sqlite::memory:?cache=shared")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected deterministic seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        let approval_line = "  - approval_pending: emp-seed-asha (Three-day annual request with one comp-off day of cover, awaiting resolution)";
        let half_day_line = "  - half_day_pending: emp-seed-rohan (First-half casual request worth half a day, awaiting resolution)";
        let claim_line = "  - comp_off_claim: emp-seed-rohan (Weekend-shift comp-off claim awaiting manager approval)";
        assert!(message.contains(approval_line));
        assert!(message.contains(half_day_line));
        assert!(message.contains(claim_line));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_env(&[("TIMEOFF_DATABASE_URL", "sqlite::memory:?cache=shared")], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(second_payload["command"], "seed");
        assert_eq!(second_payload["status"], "ok");

        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn smoke_returns_success_report_with_valid_env() {
    with_env(&[("TIMEOFF_DATABASE_URL", "sqlite::memory:?cache=shared")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "expected successful smoke report");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");

        let names: Vec<&str> = payload["checks"]
            .as_array()
            .expect("smoke report should list checks")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "config_validation",
                "db_connectivity",
                "migration_visibility",
                "engine_round_trip",
                "adjustment_chain_verify",
            ]
        );
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[("TIMEOFF_DATABASE_URL", "postgres://not-supported")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");

        let checks = payload["checks"].as_array().expect("smoke report should list checks");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_reports_pass_with_valid_env() {
    with_env(&[("TIMEOFF_DATABASE_URL", "sqlite::memory:?cache=shared")], || {
        let output = doctor::run(true);
        let payload = parse_payload(&output);
        assert_eq!(payload["overall_status"], "pass");

        let checks = payload["checks"].as_array().expect("doctor report should list checks");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[1]["name"], "signing_key_readiness");
        assert_eq!(checks[2]["name"], "database_connectivity");
    });
}

#[test]
fn config_output_redacts_signing_key_and_attributes_env() {
    with_env(&[("TIMEOFF_LOG_LEVEL", "debug")], || {
        let output = config::run();

        assert!(output.starts_with("effective config (source precedence: env > file > default):"));
        assert!(output.contains("- audit.signing_key = timeoff-*** (source: default)"));
        assert!(!output.contains("timeoff-dev-signing-key"));
        assert!(output.contains("- logging.level = debug (source: env (TIMEOFF_LOG_LEVEL))"));
        assert!(output.contains("- database.url = sqlite://timeoff.db (source: default)"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "TIMEOFF_DATABASE_URL",
        "TIMEOFF_DATABASE_MAX_CONNECTIONS",
        "TIMEOFF_DATABASE_TIMEOUT_SECS",
        "TIMEOFF_ENGINE_HOURS_PER_COMP_OFF_DAY",
        "TIMEOFF_ENGINE_COMP_OFF_MIN_DAYS",
        "TIMEOFF_ENGINE_COMP_OFF_MAX_DAYS",
        "TIMEOFF_ENGINE_COMP_OFF_EXPIRY_MONTHS",
        "TIMEOFF_ENGINE_COUNT_WEEKENDS",
        "TIMEOFF_AUDIT_SIGNING_KEY",
        "TIMEOFF_LOGGING_LEVEL",
        "TIMEOFF_LOGGING_FORMAT",
        "TIMEOFF_LOG_LEVEL",
        "TIMEOFF_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
