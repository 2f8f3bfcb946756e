use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::config::schema::{Config, MIN_TURN_BUDGET};

#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
pub(crate) static CONFIG_TEST_ENV_LOCK: Mutex<()> = Mutex::new(());

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file contains invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error(
        "server.request_timeout_secs ({request_secs}s) leaves {budget_secs}s for model rounds \
         after {reserve_secs}s of store and transcript work; at least {min_secs}s is required"
    )]
    TurnBudget {
        request_secs: u64,
        reserve_secs: u64,
        budget_secs: u64,
        min_secs: u64,
    },
}

/// Values given on the command line; they win over every other layer
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Builds the effective configuration: defaults, then the JSON file, then the environment,
/// then CLI flags
pub fn load_config(overrides: &CliOverrides) -> Result<Config> {
    tracing::debug!("Loading configuration");

    let mut config = Config::default();

    let config_file = overrides
        .config_path
        .clone()
        .or_else(get_default_config_path);
    if let Some(ref path) = config_file {
        if path.exists() {
            tracing::debug!(config_path = %path.display(), "Loading configuration from file");
            config = load_config_file(path)?;
        } else if overrides.config_path.is_some() {
            anyhow::bail!("Config file not found: {}", path.display());
        } else {
            tracing::debug!(config_path = %path.display(), "Config file not found, using defaults");
        }
    }

    merge_env_variables(&mut config);
    apply_cli_overrides(&mut config, overrides);
    check_turn_budget(&config)?;

    let summary = config.get_safe_summary();
    tracing::debug!(
        bind = %summary.bind,
        model = %summary.model,
        api_key_configured = summary.api_key_configured,
        redis_configured = summary.redis_configured,
        notifier_configured = summary.notifier_configured,
        transcript = summary.transcript_backend,
        session_ttl_secs = summary.session_ttl_secs,
        rate_limit = %summary.rate_limit,
        "Configuration loaded successfully"
    );

    Ok(config)
}

/// The turn deadline must leave room for the apology before the HTTP timeout fires
fn check_turn_budget(config: &Config) -> std::result::Result<(), ConfigError> {
    let budget = config.turn_budget();
    if budget < MIN_TURN_BUDGET {
        return Err(ConfigError::TurnBudget {
            request_secs: config.server.request_timeout().as_secs(),
            reserve_secs: config.turn_reserve().as_secs(),
            budget_secs: budget.as_secs(),
            min_secs: MIN_TURN_BUDGET.as_secs(),
        });
    }

    let call_budget = config.model.call_budget();
    if call_budget > budget {
        tracing::warn!(
            call_budget_secs = call_budget.as_secs(),
            turn_budget_secs = budget.as_secs(),
            "A single model call with retries can outlast the turn deadline"
        );
    }
    Ok(())
}

fn get_default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".parley").join("config.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    warn_if_world_readable(path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config: Config = serde_json::from_str(&content)
        .map_err(ConfigError::InvalidJson)
        .with_context(|| format!("Invalid config file: {:?}", path))?;
    Ok(config)
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = fs::metadata(path) {
        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            tracing::warn!(
                config_path = %path.display(),
                mode = format!("{:o}", mode),
                "Config file is readable by other users; it may hold API keys, consider chmod 600"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses a numeric variable; unparsable values are ignored with a warning
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

fn set_from<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn merge_env_variables(config: &mut Config) {
    set_from(&mut config.server.host, env_string("API_HOST"));
    set_from(&mut config.server.port, env_parse("API_PORT"));

    if let Some(key) = env_string("OPENAI_API_KEY") {
        config.model.api_key = Some(key);
    }
    if let Some(url) = env_string("OPENAI_BASE_URL") {
        config.model.base_url = Some(url);
    }
    set_from(&mut config.model.model, env_string("OPENAI_MODEL"));
    set_from(&mut config.model.timeout_secs, env_parse("OPENAI_TIMEOUT_SECONDS"));
    set_from(&mut config.model.max_retries, env_parse("OPENAI_MAX_RETRIES"));
    set_from(&mut config.model.max_tool_rounds, env_parse("MAX_TOOL_ROUNDS"));

    set_from(&mut config.rate_limit.window_secs, env_parse("RATE_LIMIT_WINDOW_SECONDS"));
    set_from(&mut config.rate_limit.max_requests, env_parse("RATE_LIMIT_MAX_REQUESTS"));

    set_from(&mut config.session.ttl_secs, env_parse("SESSION_TTL_SECONDS"));
    if let Some(url) = env_string("REDIS_URL") {
        config.session.redis_url = Some(url);
    }

    if let Some(token) = env_string("PUSHOVER_TOKEN") {
        config.notifier.pushover_token = Some(token);
    }
    if let Some(user) = env_string("PUSHOVER_USER") {
        config.notifier.pushover_user = Some(user);
    }
    set_from(&mut config.notifier.timeout_secs, env_parse("PUSHOVER_TIMEOUT_SECONDS"));

    if let Some(path) = env_string("TRANSCRIPT_PATH") {
        config.transcript.path = Some(PathBuf::from(path));
    }
    if let Some(url) = env_string("TRANSCRIPT_WEBHOOK_URL") {
        config.transcript.webhook_url = Some(url);
    }
    set_from(&mut config.transcript.timeout_secs, env_parse("TRANSCRIPT_TIMEOUT_SECONDS"));

    set_from(&mut config.persona.name, env_string("PERSONA_NAME"));
    if let Some(path) = env_string("PERSONA_SUMMARY_PATH") {
        config.persona.summary_path = Some(PathBuf::from(path));
    }
    if let Some(path) = env_string("PERSONA_PROFILE_PATH") {
        config.persona.profile_path = Some(PathBuf::from(path));
    }
}

fn apply_cli_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(ref host) = overrides.host {
        tracing::debug!(host = %host, "Applying CLI host override");
        config.server.host = host.clone();
    }
    if let Some(port) = overrides.port {
        tracing::debug!(port = port, "Applying CLI port override");
        config.server.port = port;
    }
}

#[cfg(test)]
pub(crate) const ENV_VARS: &[&str] = &[
    "API_HOST",
    "API_PORT",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    "OPENAI_MODEL",
    "OPENAI_TIMEOUT_SECONDS",
    "OPENAI_MAX_RETRIES",
    "MAX_TOOL_ROUNDS",
    "RATE_LIMIT_WINDOW_SECONDS",
    "RATE_LIMIT_MAX_REQUESTS",
    "SESSION_TTL_SECONDS",
    "REDIS_URL",
    "PUSHOVER_TOKEN",
    "PUSHOVER_USER",
    "PUSHOVER_TIMEOUT_SECONDS",
    "TRANSCRIPT_PATH",
    "TRANSCRIPT_WEBHOOK_URL",
    "TRANSCRIPT_TIMEOUT_SECONDS",
    "PERSONA_NAME",
    "PERSONA_SUMMARY_PATH",
    "PERSONA_PROFILE_PATH",
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    fn clear_env() {
        for name in ENV_VARS {
            unsafe {
                env::remove_var(name);
            }
        }
    }

    fn overrides_for(path: PathBuf) -> CliOverrides {
        CliOverrides {
            config_path: Some(path),
            ..CliOverrides::default()
        }
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();

        let result = load_config(&overrides_for(temp_dir.path().join("absent.json")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"server": {"port": 8080}, "rate_limit": {"max_requests": 2}}"#,
        )
        .unwrap();

        let config = load_config(&overrides_for(path)).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.max_requests, 2);
        assert_eq!(config.rate_limit.window_secs, 60);
    }

    #[test]
    fn test_request_timeout_too_short_for_turn_is_rejected() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"server": {"request_timeout_secs": 8}}"#).unwrap();

        let err = load_config(&overrides_for(path)).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("request_timeout_secs (8s)"), "{message}");
        assert!(message.contains("at least 5s"), "{message}");
    }

    #[test]
    fn test_default_turn_budget_is_accepted() {
        assert!(check_turn_budget(&Config::default()).is_ok());
    }

    #[test]
    fn test_load_config_invalid_json() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "not valid json").unwrap();

        let err = load_config(&overrides_for(path)).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid JSON"));
    }

    #[test]
    fn test_env_overrides_file() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"server": {"port": 8080}, "session": {"ttl_secs": 120}}"#).unwrap();

        unsafe {
            env::set_var("API_PORT", "9090");
            env::set_var("SESSION_TTL_SECONDS", "10");
            env::set_var("RATE_LIMIT_MAX_REQUESTS", "0");
            env::set_var("OPENAI_API_KEY", "sk-test");
            env::set_var("TRANSCRIPT_PATH", "/tmp/parley.jsonl");
        }
        let config = load_config(&overrides_for(path)).unwrap();
        clear_env();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.session.ttl_secs, 10);
        assert_eq!(config.session.ttl().as_secs(), 60);
        assert_eq!(config.rate_limit.max_requests, 0);
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(
            config.transcript.path,
            Some(PathBuf::from("/tmp/parley.jsonl"))
        );
    }

    #[test]
    fn test_unparsable_env_value_is_ignored() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{}").unwrap();

        unsafe {
            env::set_var("RATE_LIMIT_WINDOW_SECONDS", "a minute");
        }
        let config = load_config(&overrides_for(path)).unwrap();
        clear_env();

        assert_eq!(config.rate_limit.window_secs, 60);
    }

    #[test]
    fn test_cli_overrides_env() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{}").unwrap();

        unsafe {
            env::set_var("API_HOST", "10.0.0.1");
            env::set_var("API_PORT", "9090");
        }
        let overrides = CliOverrides {
            config_path: Some(path),
            host: Some("127.0.0.1".to_string()),
            port: Some(7000),
        };
        let config = load_config(&overrides).unwrap();
        clear_env();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7000);
    }
}
