use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use shared::domain::UserId;

pub const SETTINGS_FILE: &str = "board_sync.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub server_url: String,
    /// Derived from `server_url` when unset.
    pub push_url: Option<String>,
    pub user_id: Option<UserId>,
    pub readiness_poll_ms: u64,
    pub event_capacity: usize,
    pub request_timeout_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            push_url: None,
            user_id: None,
            readiness_poll_ms: 100,
            event_capacity: 256,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    push_url: Option<String>,
    user_id: Option<i64>,
    readiness_poll_ms: Option<u64>,
    event_capacity: Option<usize>,
    request_timeout_ms: Option<u64>,
}

impl SyncSettings {
    pub fn push_url(&self) -> Result<String> {
        if let Some(push_url) = &self.push_url {
            return Ok(push_url.clone());
        }
        let server_url = self.server_url.trim_end_matches('/');
        let ws_url = if let Some(rest) = server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(anyhow!("server_url must start with http:// or https://"));
        };
        Ok(format!("{ws_url}/ws"))
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Defaults, then `board_sync.toml` in the working directory, then the
/// environment.
pub fn load_settings() -> SyncSettings {
    let settings = load_settings_from(Path::new(SETTINGS_FILE)).unwrap_or_else(|err| {
        tracing::warn!("config: ignoring {SETTINGS_FILE}: {err:#}");
        SyncSettings::default()
    });
    apply_env_overrides(settings, |key| std::env::var(key).ok())
}

/// A missing file yields the defaults; a malformed one is an error.
pub fn load_settings_from(path: &Path) -> Result<SyncSettings> {
    let mut settings = SyncSettings::default();
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(settings),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    let file_cfg: FileSettings =
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;

    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.push_url {
        settings.push_url = Some(v);
    }
    if let Some(v) = file_cfg.user_id {
        settings.user_id = Some(UserId(v));
    }
    if let Some(v) = file_cfg.readiness_poll_ms {
        settings.readiness_poll_ms = v;
    }
    if let Some(v) = file_cfg.event_capacity {
        settings.event_capacity = v;
    }
    if let Some(v) = file_cfg.request_timeout_ms {
        settings.request_timeout_ms = v;
    }
    Ok(settings)
}

pub fn apply_env_overrides(
    mut settings: SyncSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> SyncSettings {
    if let Some(v) = lookup("BOARD_SYNC_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = lookup("APP__PUSH_URL") {
        settings.push_url = Some(v);
    }

    if let Some(v) = lookup("APP__USER_ID") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.user_id = Some(UserId(parsed));
        }
    }

    if let Some(v) = lookup("APP__READINESS_POLL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.readiness_poll_ms = parsed;
        }
    }
    if let Some(v) = lookup("APP__EVENT_CAPACITY") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.event_capacity = parsed;
        }
    }
    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_ms = parsed;
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
