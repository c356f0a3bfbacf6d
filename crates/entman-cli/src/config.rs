// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use entman_app::StateFilter;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_VERSION: i64 = 1;
const DEFAULT_TOKEN_ENV: &str = "HASS_TOKEN";
const DEFAULT_TIMEOUT: &str = "10s";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default)]
    pub hass: Hass,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub ui: Ui,
    #[serde(default)]
    pub log: Log,
}

const fn default_version() -> i64 {
    CONFIG_VERSION
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hass {
    pub url: Option<String>,
    pub token: Option<String>,
    pub token_env: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Storage {
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ui {
    pub default_view: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Log {
    pub level: Option<String>,
    pub file: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("ENTMAN_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set ENTMAN_CONFIG_PATH to the config file")
        })?;

        let app_dir = config_root.join(entman_db::APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                version: CONFIG_VERSION,
                ..Self::default()
            });
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} is not versioned. Add `version = 1` and put values under [hass], [storage], [ui], and [log]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(url) = &self.hass.url {
            entman_hass::websocket_url(url)
                .with_context(|| format!("hass.url in {} is not usable", path.display()))?;
        }

        if let Some(timeout) = &self.hass.timeout {
            let parsed = parse_duration(timeout)?;
            if parsed <= Duration::ZERO {
                bail!(
                    "hass.timeout in {} must be positive, got {}",
                    path.display(),
                    timeout
                );
            }
        }

        if let Some(db_path) = &self.storage.db_path {
            entman_db::validate_db_path(db_path)?;
        }

        if let Some(view) = &self.ui.default_view
            && StateFilter::parse(view).is_none()
        {
            bail!(
                "ui.default_view in {} must be one of all, enabled, disabled; got {view:?}",
                path.display()
            );
        }

        Ok(())
    }

    pub fn hass_url(&self) -> Result<&str> {
        self.hass
            .url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                anyhow!("no Home Assistant URL configured; set [hass].url (or run with --demo)")
            })
    }

    /// Inline `token` wins over the environment variable named by `token_env`.
    pub fn token(&self) -> Result<String> {
        if let Some(token) = self.hass.token.as_deref().filter(|token| !token.is_empty()) {
            return Ok(token.to_owned());
        }
        let name = self.token_env();
        match env::var(name) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_owned()),
            _ => bail!(
                "no access token found; export {name} with a long-lived access token or set [hass].token"
            ),
        }
    }

    pub fn token_env(&self) -> &str {
        self.hass.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV)
    }

    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(self.hass.timeout.as_deref().unwrap_or(DEFAULT_TIMEOUT))
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => entman_db::default_db_path(),
        }
    }

    pub fn default_view(&self) -> StateFilter {
        self.ui
            .default_view
            .as_deref()
            .and_then(StateFilter::parse)
            .unwrap_or_default()
    }

    pub fn log_level(&self) -> &str {
        self.log.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_file(&self) -> Result<PathBuf> {
        if let Some(file) = &self.log.file {
            return Ok(PathBuf::from(file));
        }
        let data_root = dirs::data_local_dir().ok_or_else(|| {
            anyhow!("cannot resolve data directory; set [log].file to a writable path")
        })?;
        Ok(data_root.join(entman_db::APP_NAME).join("entman.log"))
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# entman config\n# Place this file at: {}\n\nversion = 1\n\n[hass]\nurl = \"http://homeassistant.local:8123\"\n# Name of the environment variable holding a long-lived access token.\ntoken_env = \"{}\"\n# token = \"...\"\ntimeout = \"{}\"\n\n[storage]\n# Optional. Default is platform data dir (for example ~/.local/share/entman/entman.db)\n# db_path = \"/absolute/path/to/entman.db\"\n\n[ui]\ndefault_view = \"all\"\n\n[log]\nlevel = \"{}\"\n# file = \"/absolute/path/to/entman.log\"\n",
            path.display(),
            DEFAULT_TOKEN_ENV,
            DEFAULT_TIMEOUT,
            DEFAULT_LOG_LEVEL,
        )
    }
}

pub fn parse_duration(raw: &str) -> Result<Duration> {
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        let secs = mins.checked_mul(60).ok_or_else(|| {
            anyhow!("timeout duration {raw:?} is too large; use a value such as 30s or 5m")
        })?;
        return Ok(Duration::from_secs(secs));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 500ms or 10s)")
}

#[cfg(test)]
mod tests {
    use super::{Config, parse_duration};
    use anyhow::Result;
    use entman_app::StateFilter;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    fn write_config(content: &str) -> Result<(tempfile::TempDir, PathBuf)> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, content)?;
        Ok((temp, path))
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[test]
    fn missing_config_uses_defaults() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let config = Config::load(&temp.path().join("missing.toml"))?;
        assert_eq!(config.version, 1);
        assert_eq!(config.default_view(), StateFilter::All);
        assert_eq!(config.timeout()?, Duration::from_secs(10));
        assert_eq!(config.token_env(), "HASS_TOKEN");
        assert_eq!(config.log_level(), "info");
        assert!(config.hass_url().is_err());
        Ok(())
    }

    #[test]
    fn unversioned_config_is_rejected_with_actionable_message() -> Result<()> {
        let (_temp, path) = write_config("[hass]\nurl = \"http://ha.local:8123\"\n")?;
        let error = Config::load(&path).expect_err("unversioned config should fail");
        let message = error.to_string();
        assert!(message.contains("version = 1"));
        assert!(message.contains("[hass], [storage], [ui], and [log]"));
        Ok(())
    }

    #[test]
    fn v1_config_parses() -> Result<()> {
        let (_temp, path) = write_config(
            "version = 1\n[hass]\nurl = \"https://ha.example.com/\"\ntoken_env = \"MY_TOKEN\"\ntimeout = \"2500ms\"\n[ui]\ndefault_view = \"disabled\"\n[log]\nlevel = \"entman=debug\"\nfile = \"/tmp/entman-test.log\"\n",
        )?;

        let config = Config::load(&path)?;
        assert_eq!(config.hass_url()?, "https://ha.example.com");
        assert_eq!(config.token_env(), "MY_TOKEN");
        assert_eq!(config.timeout()?, Duration::from_millis(2500));
        assert_eq!(config.default_view(), StateFilter::Disabled);
        assert_eq!(config.log_level(), "entman=debug");
        assert_eq!(config.log_file()?, PathBuf::from("/tmp/entman-test.log"));
        Ok(())
    }

    #[test]
    fn malformed_config_returns_parse_error() -> Result<()> {
        let (_temp, path) = write_config("{{not toml")?;
        let error = Config::load(&path).expect_err("malformed config should fail");
        assert!(error.to_string().contains("parse TOML config"));
        Ok(())
    }

    #[test]
    fn unsupported_config_version_is_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 2\n")?;
        let error = Config::load(&path).expect_err("v2 config should fail");
        assert!(error.to_string().contains("unsupported config version 2"));
        Ok(())
    }

    #[test]
    fn non_http_url_is_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 1\n[hass]\nurl = \"ftp://ha.local\"\n")?;
        let error = Config::load(&path).expect_err("ftp url should fail");
        assert!(format!("{error:#}").contains("hass.url"));
        Ok(())
    }

    #[test]
    fn unknown_default_view_is_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 1\n[ui]\ndefault_view = \"hidden\"\n")?;
        let error = Config::load(&path).expect_err("unknown view should fail");
        assert!(error.to_string().contains("ui.default_view"));
        Ok(())
    }

    #[test]
    fn zero_timeout_is_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 1\n[hass]\ntimeout = \"0s\"\n")?;
        let error = Config::load(&path).expect_err("zero timeout should fail");
        assert!(error.to_string().contains("must be positive"));
        Ok(())
    }

    #[test]
    fn timeout_parses_ms_seconds_and_minutes() -> Result<()> {
        assert_eq!(parse_duration("500ms")?, Duration::from_millis(500));
        assert_eq!(parse_duration("5s")?, Duration::from_secs(5));
        assert_eq!(parse_duration("2m")?, Duration::from_secs(120));
        Ok(())
    }

    #[test]
    fn timeout_rejects_invalid_duration() {
        let error = parse_duration("oops").expect_err("invalid duration should fail");
        let message = error.to_string();
        assert!(
            message.contains("invalid duration") || message.contains("invalid timeout duration"),
            "unexpected message: {message}"
        );
    }

    #[test]
    fn timeout_rejects_minutes_that_overflow() {
        let error = parse_duration(&format!("{}m", u64::MAX / 60 + 1))
            .expect_err("overflowing minutes should fail");
        assert!(error.to_string().contains("too large"));
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)).ok(),
            Some(Duration::from_secs(u64::MAX / 60 * 60))
        );
    }

    #[test]
    fn inline_token_wins_over_environment() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) = write_config(
            "version = 1\n[hass]\ntoken = \"inline\"\ntoken_env = \"ENTMAN_TEST_TOKEN_A\"\n",
        )?;
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("ENTMAN_TEST_TOKEN_A", "from-env");
        }
        let config = Config::load(&path)?;
        let token = config.token()?;
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("ENTMAN_TEST_TOKEN_A");
        }
        assert_eq!(token, "inline");
        Ok(())
    }

    #[test]
    fn token_reads_named_environment_variable() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) =
            write_config("version = 1\n[hass]\ntoken_env = \"ENTMAN_TEST_TOKEN_B\"\n")?;
        let config = Config::load(&path)?;

        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::remove_var("ENTMAN_TEST_TOKEN_B");
        }
        let error = config.token().expect_err("missing token should fail");
        assert!(error.to_string().contains("export ENTMAN_TEST_TOKEN_B"));

        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("ENTMAN_TEST_TOKEN_B", " secret \n");
        }
        let token = config.token()?;
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("ENTMAN_TEST_TOKEN_B");
        }
        assert_eq!(token, "secret");
        Ok(())
    }

    #[test]
    fn default_path_honors_env_override() -> Result<()> {
        let _guard = env_lock();
        let temp = tempfile::tempdir()?;
        let override_path = temp.path().join("custom-config.toml");
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("ENTMAN_CONFIG_PATH", &override_path);
        }
        let resolved = Config::default_path()?;
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("ENTMAN_CONFIG_PATH");
        }
        assert_eq!(resolved, override_path);
        Ok(())
    }

    #[test]
    fn db_path_prefers_storage_config_over_env_override() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) =
            write_config("version = 1\n[storage]\ndb_path = \"/explicit/from-config.db\"\n")?;
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("ENTMAN_DB_PATH", "/from/env.db");
        }
        let config = Config::load(&path)?;
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("ENTMAN_DB_PATH");
        }
        assert_eq!(config.db_path()?, PathBuf::from("/explicit/from-config.db"));
        Ok(())
    }

    #[test]
    fn db_path_rejects_uri_style_storage_value() -> Result<()> {
        let (_temp, path) =
            write_config("version = 1\n[storage]\ndb_path = \"https://evil.example/entman.db\"\n")?;
        let error = Config::load(&path).expect_err("URI db_path should fail validation");
        assert!(error.to_string().contains("looks like a URI"));
        Ok(())
    }

    #[test]
    fn example_config_loads_cleanly() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        let example = Config::example_config(&path);
        for section in ["version = 1", "[hass]", "[storage]", "[ui]", "[log]"] {
            assert!(example.contains(section), "missing {section}");
        }
        std::fs::write(&path, &example)?;
        let config = Config::load(&path)?;
        assert_eq!(config.hass_url()?, "http://homeassistant.local:8123");
        Ok(())
    }
}
