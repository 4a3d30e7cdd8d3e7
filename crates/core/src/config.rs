use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::comp_off_ledger::CompOffPolicy;
use crate::daycount::DayCountPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Day-count and comp-off policy knobs. Everything here has a sane default
/// so a bare deployment behaves like the standard five-day-week policy.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub hours_per_comp_off_day: u32,
    pub comp_off_min_days: Decimal,
    pub comp_off_max_days: Decimal,
    pub comp_off_expiry_months: u32,
    pub count_weekends: bool,
}

#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub signing_key: SecretString,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub audit_signing_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://timeoff.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            engine: EngineConfig {
                hours_per_comp_off_day: 8,
                comp_off_min_days: Decimal::new(5, 1),
                comp_off_max_days: Decimal::from(5),
                comp_off_expiry_months: 3,
                count_weekends: false,
            },
            audit: AuditConfig { signing_key: "timeoff-dev-signing-key".to_string().into() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("timeoff.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Policies for the request engine, derived from the `[engine]` section.
    pub fn engine_policies(&self) -> (DayCountPolicy, CompOffPolicy) {
        let day_count = if self.engine.count_weekends {
            DayCountPolicy::with_weekend_days(Vec::new())
        } else {
            DayCountPolicy::default()
        };
        let comp_off = CompOffPolicy {
            hours_per_day: Decimal::from(self.engine.hours_per_comp_off_day),
            min_days: self.engine.comp_off_min_days,
            max_days: self.engine.comp_off_max_days,
            expiry_months: self.engine.comp_off_expiry_months,
        };
        (day_count, comp_off)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(hours_per_comp_off_day) = engine.hours_per_comp_off_day {
                self.engine.hours_per_comp_off_day = hours_per_comp_off_day;
            }
            if let Some(comp_off_min_days) = engine.comp_off_min_days {
                self.engine.comp_off_min_days = comp_off_min_days;
            }
            if let Some(comp_off_max_days) = engine.comp_off_max_days {
                self.engine.comp_off_max_days = comp_off_max_days;
            }
            if let Some(comp_off_expiry_months) = engine.comp_off_expiry_months {
                self.engine.comp_off_expiry_months = comp_off_expiry_months;
            }
            if let Some(count_weekends) = engine.count_weekends {
                self.engine.count_weekends = count_weekends;
            }
        }

        if let Some(audit) = patch.audit {
            if let Some(signing_key_value) = audit.signing_key {
                self.audit.signing_key = secret_value(signing_key_value);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TIMEOFF_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TIMEOFF_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("TIMEOFF_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TIMEOFF_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TIMEOFF_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TIMEOFF_ENGINE_HOURS_PER_COMP_OFF_DAY") {
            self.engine.hours_per_comp_off_day =
                parse_u32("TIMEOFF_ENGINE_HOURS_PER_COMP_OFF_DAY", &value)?;
        }
        if let Some(value) = read_env("TIMEOFF_ENGINE_COMP_OFF_MIN_DAYS") {
            self.engine.comp_off_min_days =
                parse_decimal("TIMEOFF_ENGINE_COMP_OFF_MIN_DAYS", &value)?;
        }
        if let Some(value) = read_env("TIMEOFF_ENGINE_COMP_OFF_MAX_DAYS") {
            self.engine.comp_off_max_days =
                parse_decimal("TIMEOFF_ENGINE_COMP_OFF_MAX_DAYS", &value)?;
        }
        if let Some(value) = read_env("TIMEOFF_ENGINE_COMP_OFF_EXPIRY_MONTHS") {
            self.engine.comp_off_expiry_months =
                parse_u32("TIMEOFF_ENGINE_COMP_OFF_EXPIRY_MONTHS", &value)?;
        }
        if let Some(value) = read_env("TIMEOFF_ENGINE_COUNT_WEEKENDS") {
            self.engine.count_weekends = parse_bool("TIMEOFF_ENGINE_COUNT_WEEKENDS", &value)?;
        }

        if let Some(value) = read_env("TIMEOFF_AUDIT_SIGNING_KEY") {
            self.audit.signing_key = secret_value(value);
        }

        let log_level = read_env("TIMEOFF_LOGGING_LEVEL").or_else(|| read_env("TIMEOFF_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TIMEOFF_LOGGING_FORMAT").or_else(|| read_env("TIMEOFF_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(audit_signing_key) = overrides.audit_signing_key {
            self.audit.signing_key = secret_value(audit_signing_key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_engine(&self.engine)?;
        validate_audit(&self.audit)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("timeoff.toml"), PathBuf::from("config/timeoff.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.hours_per_comp_off_day == 0 || engine.hours_per_comp_off_day > 24 {
        return Err(ConfigError::Validation(
            "engine.hours_per_comp_off_day must be in range 1..=24".to_string(),
        ));
    }

    if engine.comp_off_min_days <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "engine.comp_off_min_days must be greater than zero".to_string(),
        ));
    }

    if engine.comp_off_max_days < engine.comp_off_min_days {
        return Err(ConfigError::Validation(
            "engine.comp_off_max_days must not be below engine.comp_off_min_days".to_string(),
        ));
    }

    if engine.comp_off_expiry_months == 0 || engine.comp_off_expiry_months > 24 {
        return Err(ConfigError::Validation(
            "engine.comp_off_expiry_months must be in range 1..=24".to_string(),
        ));
    }

    Ok(())
}

fn validate_audit(audit: &AuditConfig) -> Result<(), ConfigError> {
    if audit.signing_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation("audit.signing_key must not be empty".to_string()));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value.parse::<Decimal>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    engine: Option<EnginePatch>,
    audit: Option<AuditPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    hours_per_comp_off_day: Option<u32>,
    comp_off_min_days: Option<Decimal>,
    comp_off_max_days: Option<Decimal>,
    comp_off_expiry_months: Option<u32>,
    count_weekends: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AuditPatch {
    signing_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_AUDIT_SIGNING_KEY", "interpolated-signing-key");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("timeoff.toml");
            fs::write(
                &path,
                r#"
[audit]
signing_key = "${TEST_AUDIT_SIGNING_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.audit.signing_key.expose_secret() == "interpolated-signing-key",
                "signing key should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_AUDIT_SIGNING_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIMEOFF_LOG_LEVEL", "warn");
        env::set_var("TIMEOFF_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["TIMEOFF_LOG_LEVEL", "TIMEOFF_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIMEOFF_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("TIMEOFF_ENGINE_COMP_OFF_EXPIRY_MONTHS", "6");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("timeoff.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[engine]
comp_off_max_days = 4

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.engine.comp_off_max_days == Decimal::from(4),
                "file comp-off cap should win over the default",
            )?;
            ensure(
                config.engine.comp_off_expiry_months == 6,
                "env expiry months should win over the default",
            )?;
            Ok(())
        })();

        clear_vars(&["TIMEOFF_DATABASE_URL", "TIMEOFF_ENGINE_COMP_OFF_EXPIRY_MONTHS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIMEOFF_DATABASE_URL", "postgres://not-supported");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("database.url")
            );
            ensure(has_message, "validation failure should mention database.url")
        })();

        clear_vars(&["TIMEOFF_DATABASE_URL"]);
        result
    }

    #[test]
    fn out_of_range_engine_values_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIMEOFF_ENGINE_HOURS_PER_COMP_OFF_DAY", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("engine.hours_per_comp_off_day")
            );
            ensure(has_message, "validation failure should mention the engine knob")
        })();

        clear_vars(&["TIMEOFF_ENGINE_HOURS_PER_COMP_OFF_DAY"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIMEOFF_AUDIT_SIGNING_KEY", "super-secret-signing-key");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-signing-key"),
                "debug output should not contain the signing key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["TIMEOFF_AUDIT_SIGNING_KEY"]);
        result
    }

    #[test]
    fn engine_policies_reflect_configuration() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIMEOFF_ENGINE_COUNT_WEEKENDS", "true");
        env::set_var("TIMEOFF_ENGINE_HOURS_PER_COMP_OFF_DAY", "6");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let (day_count, comp_off) = config.engine_policies();

            let saturday = chrono::NaiveDate::from_ymd_opt(2025, 3, 15)
                .ok_or_else(|| "invalid date".to_string())?;
            let sunday = chrono::NaiveDate::from_ymd_opt(2025, 3, 16)
                .ok_or_else(|| "invalid date".to_string())?;
            ensure(
                day_count.total_days(saturday, sunday, false) == Decimal::from(2),
                "weekends should count when the policy says so",
            )?;
            ensure(
                comp_off.days_for_hours(Decimal::from(6)) == Decimal::ONE,
                "six worked hours should equal one comp-off day at the configured ratio",
            )?;
            Ok(())
        })();

        clear_vars(&["TIMEOFF_ENGINE_COUNT_WEEKENDS", "TIMEOFF_ENGINE_HOURS_PER_COMP_OFF_DAY"]);
        result
    }
}
