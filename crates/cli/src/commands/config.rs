use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use timeoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        field_source(
            "database.url",
            &["TIMEOFF_DATABASE_URL"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        field_source(
            "database.max_connections",
            &["TIMEOFF_DATABASE_MAX_CONNECTIONS"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        field_source(
            "database.timeout_secs",
            &["TIMEOFF_DATABASE_TIMEOUT_SECS"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));

    lines.push(render_line(
        "engine.hours_per_comp_off_day",
        &config.engine.hours_per_comp_off_day.to_string(),
        field_source(
            "engine.hours_per_comp_off_day",
            &["TIMEOFF_ENGINE_HOURS_PER_COMP_OFF_DAY"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "engine.comp_off_min_days",
        &config.engine.comp_off_min_days.to_string(),
        field_source(
            "engine.comp_off_min_days",
            &["TIMEOFF_ENGINE_COMP_OFF_MIN_DAYS"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "engine.comp_off_max_days",
        &config.engine.comp_off_max_days.to_string(),
        field_source(
            "engine.comp_off_max_days",
            &["TIMEOFF_ENGINE_COMP_OFF_MAX_DAYS"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "engine.comp_off_expiry_months",
        &config.engine.comp_off_expiry_months.to_string(),
        field_source(
            "engine.comp_off_expiry_months",
            &["TIMEOFF_ENGINE_COMP_OFF_EXPIRY_MONTHS"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "engine.count_weekends",
        &config.engine.count_weekends.to_string(),
        field_source(
            "engine.count_weekends",
            &["TIMEOFF_ENGINE_COUNT_WEEKENDS"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));

    let signing_key = redact_token(config.audit.signing_key.expose_secret());
    lines.push(render_line(
        "audit.signing_key",
        &signing_key,
        field_source(
            "audit.signing_key",
            &["TIMEOFF_AUDIT_SIGNING_KEY"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        field_source(
            "logging.level",
            &["TIMEOFF_LOGGING_LEVEL", "TIMEOFF_LOG_LEVEL"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        field_source(
            "logging.format",
            &["TIMEOFF_LOGGING_FORMAT", "TIMEOFF_LOG_FORMAT"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("timeoff.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/timeoff.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    for env_key in env_keys {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
