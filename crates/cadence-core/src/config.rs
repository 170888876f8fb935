use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CadenceError, Result};
use crate::types::{RetryPolicy, ScheduleSpec};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CADENCE_CONFIG";
/// Prefix for per-key environment overrides (`CADENCE_RETRY__MAX_ATTEMPTS=5`).
pub const ENV_PREFIX: &str = "CADENCE_";

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// IANA zone name for the schedule. Detected from the host when unset.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub schedule: ScheduleSpec,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// The external command run on every attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    /// Per-attempt timeout enforced by the task itself, not the engine.
    pub timeout_secs: Option<u64>,
}

/// Outgoing webhook notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Disabled when unset.
    pub webhook_url: Option<String>,
    /// HMAC-SHA256 signing key for the request body.
    pub secret: Option<String>,
    /// Also notify on successful runs (failures are always notified).
    #[serde(default)]
    pub on_success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `$CADENCE_CONFIG`
    ///   3. ~/.cadence/cadence.toml
    ///
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(default_config_path);
        debug!(path = %path, exists = std::path::Path::new(&path).exists(), "loading config");

        Self::figment(&path)
            .extract::<CadenceConfig>()
            .map_err(|e| CadenceError::Config(e.to_string()))
            .and_then(|config| {
                config.validate()?;
                Ok(config)
            })
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["config"]))
    }

    /// Reject values that would make the engine misbehave.
    ///
    /// Schedule format is intentionally not checked here: the engine's
    /// `start()` fails closed on a malformed schedule.
    pub fn validate(&self) -> Result<()> {
        self.retry.check().map_err(CadenceError::Config)?;
        if let Some(url) = &self.notify.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(CadenceError::Config(format!(
                    "notify.webhook_url must be an http(s) URL (got {url})"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = CadenceConfig::load(Some("/nonexistent/cadence.toml")).unwrap();
        assert!(config.schedule.enabled);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn toml_sections_are_parsed() {
        let file = write_config(
            r#"
            timezone = "Europe/Berlin"

            [schedule]
            daily_time = "07:45"
            [schedule.jitter]
            enabled = true
            min_minutes_before = 5
            max_minutes_after = 10

            [retry]
            max_attempts = 4
            base_delay_ms = 1000

            [task]
            command = "/bin/true"
            args = ["-x"]
            "#,
        );

        let config = CadenceConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(config.schedule.daily_time.as_deref(), Some("07:45"));
        assert!(config.schedule.jitter.enabled);
        assert_eq!(config.schedule.jitter.min_minutes_before, 5);
        assert_eq!(config.schedule.jitter.max_minutes_after, 10);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay.as_millis(), 1000);
        assert_eq!(config.task.command, "/bin/true");
        assert_eq!(config.task.args, vec!["-x".to_string()]);
    }

    #[test]
    fn invalid_retry_policy_is_rejected() {
        let file = write_config("[retry]\nmax_attempts = 0\n");
        let err = CadenceConfig::load(file.path().to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn non_http_webhook_is_rejected() {
        let file = write_config("[notify]\nwebhook_url = \"ftp://example.com\"\n");
        assert!(CadenceConfig::load(file.path().to_str()).is_err());
    }
}
