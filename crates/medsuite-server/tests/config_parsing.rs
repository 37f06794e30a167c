use std::time::Duration;
use std::{env, fs};

use medsuite_notifications::ReminderCategory;
use medsuite_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("medsuite.toml");

    let toml_content = r#"
[service]
name = "notifications"

[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 4096

[logging]
level = "debug"

[auth]
jwt_secret = "file-secret-0123456789"
session_ttl = "12h"
max_sessions_per_user = 3

[redis]
url = "redis://cache:6379"
pool_size = 4

[postgres]
host = "db"
database = "notifications"
password = "pw"

[events]
consumer = "notifications-7"
block_ms = 2000

[scheduler]
interval = "10m"
lookahead = "48h"
categories = ["appointment", "payment_due"]

[services]
gateway_url = "http://gateway:8000"
max_attempts = 4

[services.urls]
users = "http://users:8001"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.auth.session_ttl, Duration::from_secs(12 * 3600));
    assert_eq!(cfg.auth.max_sessions_per_user, 3);
    assert!(cfg.auth.trusted_headers);
    assert_eq!(cfg.redis.pool_size, 4);
    assert_eq!(
        cfg.postgres.as_ref().map(|pg| pg.connection_url()).as_deref(),
        Some("postgres://postgres:pw@db:5432/notifications")
    );
    assert_eq!(cfg.events.consumer, "notifications-7");
    assert_eq!(cfg.events.group, "notification_service");
    assert_eq!(cfg.events.stream, "healthcare_events");
    assert_eq!(cfg.scheduler.interval, Duration::from_secs(600));
    assert_eq!(
        cfg.scheduler.settings().unwrap().categories,
        vec![ReminderCategory::Appointment, ReminderCategory::PaymentDue]
    );
    assert_eq!(cfg.services.max_attempts, 4);
    assert_eq!(cfg.services.urls["users"], "http://users:8001");

    // 2) Env override should win over file
    unsafe {
        env::set_var("MEDSUITE__SERVER__PORT", "9090");
        env::set_var("MEDSUITE__AUTH__JWT_SECRET", "env-secret-0123456789");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9090);
    assert_eq!(cfg_env.auth.jwt_secret, "env-secret-0123456789");
    unsafe {
        env::remove_var("MEDSUITE__SERVER__PORT");
        env::remove_var("MEDSUITE__AUTH__JWT_SECRET");
    }

    // 3) The signing secret has no default
    let no_secret = dir.path().join("no_secret.toml");
    fs::write(&no_secret, "[server]\nport = 8082\n").expect("write toml");
    let err = load_config(no_secret.to_str()).expect_err("expected validation error");
    assert!(err.contains("jwt_secret"));

    // 4) Unknown reminder category
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[auth]
jwt_secret = "file-secret-0123456789"

[scheduler]
categories = ["appointment", "haircut"]
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("scheduler.categories"));
}
