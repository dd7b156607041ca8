use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::UserId;

use crate::relay::ReconnectPolicy;

pub const DEFAULT_SETTINGS_FILE: &str = "inbox.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxSettings {
    /// REST root, e.g. `http://localhost:5001/api`.
    pub api_url: String,
    pub relay_url: String,
    pub user_id: Option<UserId>,
    pub token: Option<String>,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for InboxSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5001/api".into(),
            relay_url: "http://localhost:5001".into(),
            user_id: None,
            token: None,
            reconnect_attempts: 0,
            reconnect_delay_ms: 1_000,
        }
    }
}

impl InboxSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.relay_url.trim().is_empty() {
            bail!("relay_url must not be empty");
        }
        if self.api_url.trim().is_empty() {
            bail!("api_url must not be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    relay_url: Option<String>,
    user_id: Option<String>,
    token: Option<String>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
}

/// Defaults, then `inbox.toml` from the working directory, then `APP__*` variables.
pub fn load_settings() -> anyhow::Result<InboxSettings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<InboxSettings> {
    let mut settings = InboxSettings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;
    }

    apply_env(&mut settings, env)?;
    Ok(settings)
}

fn apply_file(settings: &mut InboxSettings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.api_url {
        settings.api_url = v;
    }
    if let Some(v) = file_cfg.relay_url {
        settings.relay_url = v;
    }
    if let Some(v) = file_cfg.user_id {
        settings.user_id = Some(UserId(v));
    }
    if let Some(v) = file_cfg.token {
        settings.token = Some(v);
    }
    if let Some(v) = file_cfg.reconnect_attempts {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = file_cfg.reconnect_delay_ms {
        settings.reconnect_delay_ms = v;
    }
    Ok(())
}

fn apply_env(
    settings: &mut InboxSettings,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = env("APP__API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = env("APP__RELAY_URL") {
        settings.relay_url = v;
    }
    if let Some(v) = env("APP__USER_ID") {
        settings.user_id = Some(UserId(v));
    }
    if let Some(v) = env("APP__TOKEN") {
        settings.token = Some(v);
    }
    if let Some(v) = env("APP__RECONNECT_ATTEMPTS") {
        settings.reconnect_attempts = v
            .parse()
            .with_context(|| format!("APP__RECONNECT_ATTEMPTS is not a number: {v}"))?;
    }
    if let Some(v) = env("APP__RECONNECT_DELAY_MS") {
        settings.reconnect_delay_ms = v
            .parse()
            .with_context(|| format!("APP__RECONNECT_DELAY_MS is not a number: {v}"))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
