// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Overrides `[log].level` when set.
const LOG_ENV: &str = "ENTMAN_LOG";

/// Routes tracing output to `file`; the terminal belongs to the TUI.
pub fn init(level: &str, file: &Path) -> Result<()> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log.level {level:?}; use a filter such as info or entman_hass=debug"))?,
    };

    if let Some(parent) = file.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let writer = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .with_context(|| format!("open log file {}; set [log].file to a writable path", file.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(writer))
        .try_init()
        .map_err(|error| anyhow!("install log subscriber: {error}"))
}

#[cfg(test)]
mod tests {
    use super::init;
    use anyhow::Result;

    #[test]
    fn invalid_level_is_reported_before_touching_the_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("logs").join("entman.log");
        let error = init("entman=bogus", &file).expect_err("bad filter should fail");
        assert!(error.to_string().contains("invalid log.level"));
        assert!(!file.exists());
        Ok(())
    }
}
