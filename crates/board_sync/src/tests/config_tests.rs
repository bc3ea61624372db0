use std::{collections::HashMap, path::PathBuf};

use super::*;

fn scratch_file(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("board_sync_config_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create scratch dir");
    let path = dir.join(name);
    fs::write(&path, contents).expect("write scratch file");
    path
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn missing_file_yields_defaults() {
    let path = std::env::temp_dir().join("board_sync_config_absent/none.toml");
    let settings = load_settings_from(&path).expect("defaults");

    assert_eq!(settings, SyncSettings::default());
    assert_eq!(settings.readiness_poll_interval(), Duration::from_millis(100));
    assert_eq!(settings.request_timeout(), Duration::from_secs(10));
}

#[test]
fn file_values_override_defaults() {
    let path = scratch_file(
        "full.toml",
        r#"
server_url = "https://boards.example.test"
user_id = 42
readiness_poll_ms = 0
event_capacity = 32
"#,
    );

    let settings = load_settings_from(&path).expect("parse");

    assert_eq!(settings.server_url, "https://boards.example.test");
    assert_eq!(settings.user_id, Some(UserId(42)));
    assert_eq!(settings.event_capacity, 32);
    assert_eq!(settings.request_timeout_ms, 10_000);
    // A zero poll interval would spin; it is clamped.
    assert_eq!(settings.readiness_poll_interval(), Duration::from_millis(1));
}

#[test]
fn malformed_file_is_an_error() {
    let path = scratch_file("broken.toml", "user_id = \"forty two\"\n");
    let err = load_settings_from(&path).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse"));
}

#[test]
fn environment_wins_over_file_and_ignores_garbage() {
    let settings = apply_env_overrides(
        SyncSettings::default(),
        env(&[
            ("BOARD_SYNC_SERVER_URL", "http://legacy:1"),
            ("APP__SERVER_URL", "http://boards:8080"),
            ("APP__USER_ID", "7"),
            ("APP__EVENT_CAPACITY", "lots"),
            ("APP__REQUEST_TIMEOUT_MS", "2500"),
        ]),
    );

    assert_eq!(settings.server_url, "http://boards:8080");
    assert_eq!(settings.user_id, Some(UserId(7)));
    assert_eq!(settings.event_capacity, 256);
    assert_eq!(settings.request_timeout(), Duration::from_millis(2500));
}

#[test]
fn push_url_is_derived_from_server_url() {
    let mut settings = SyncSettings {
        server_url: "https://boards.example.test/".into(),
        ..SyncSettings::default()
    };
    assert_eq!(
        settings.push_url().expect("derived"),
        "wss://boards.example.test/ws"
    );

    settings.server_url = "http://127.0.0.1:8443".into();
    assert_eq!(settings.push_url().expect("derived"), "ws://127.0.0.1:8443/ws");

    settings.push_url = Some("ws://push.example.test/live".into());
    assert_eq!(
        settings.push_url().expect("explicit"),
        "ws://push.example.test/live"
    );

    let bad = SyncSettings {
        server_url: "ftp://boards".into(),
        ..SyncSettings::default()
    };
    assert!(bad.push_url().is_err());
}
