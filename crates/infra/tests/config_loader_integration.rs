//! Config files on disk feed the loader and its validation.

use std::path::PathBuf;

use tallysync_domain::TallySyncError;
use tallysync_infra::config::{apply_env_overrides, load_from_file};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("config file written");
    path
}

#[test]
fn full_toml_file_round_trips_into_config() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "tallysync.toml",
        r#"
[database]
path = "/var/lib/tallysync/yard.db"
pool_size = 4

[sync]
batch_size = 50
poll_interval_ms = 15000
max_attempts = 12

[sync.backoff]
base_delay_ms = 250
max_delay_ms = 20000

[realtime]
url = "wss://tally.example.com/socket/websocket"
topic = "tally:yard-7"

[remote]
base_url = "https://tally.example.com/api"
request_timeout_ms = 8000

[logging]
level = "debug"
json = true
"#,
    );

    let config = load_from_file(Some(path)).expect("config loads");
    config.validate().expect("config is valid");

    assert_eq!(config.database.pool_size, 4);
    assert_eq!(config.sync.max_attempts, Some(12));
    assert_eq!(config.sync.backoff.base_delay_ms, 250);
    assert_eq!(config.realtime.topic, "tally:yard-7");
    assert_eq!(config.remote.request_timeout_ms, 8000);
    assert!(config.logging.json);
}

#[test]
fn validation_catches_values_from_the_environment() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "config.json", r#"{"sync": {"batch_size": 10}}"#);
    let mut config = load_from_file(Some(path)).unwrap();

    apply_env_overrides(&mut config, |key| {
        (key == "TALLYSYNC_SYNC_BATCH_SIZE").then(|| "0".to_owned())
    })
    .unwrap();

    assert!(matches!(config.validate(), Err(TallySyncError::Config(_))));
}

#[test]
fn blank_topic_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "tallysync.json", r#"{"realtime": {"topic": "  "}}"#);

    let config = load_from_file(Some(path)).unwrap();
    assert!(config.validate().is_err());
}
