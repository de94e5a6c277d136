use super::*;
use serde_json::json;

#[test]
fn test_defaults_are_valid() {
    let config = GatewayConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.probe_timeout(), Duration::from_secs(5));
    assert_eq!(config.auth_timeout(), Duration::from_secs(10));
    assert_eq!(config.teardown_timeout(), Duration::from_secs(3));
    assert!(!config.execution.local_enabled);
    assert_eq!(config.execution.remote_temp_dir, "/tmp");
}

#[test]
fn test_partial_section_fills_defaults() {
    let config: GatewayConfig = serde_json::from_value(json!({
        "auth_timeout_secs": 20,
        "pty": { "cols": 120 },
        "default_target": {
            "name": "lab",
            "host": "lab.internal",
            "username": "ops",
            "password": "pw"
        }
    }))
    .unwrap();

    assert_eq!(config.auth_timeout_secs, 20);
    assert_eq!(config.probe_timeout_secs, 5);
    let pty = config.pty.to_request();
    assert_eq!(pty.size, PtySize { cols: 120, rows: 24 });
    assert_eq!(pty.term, "xterm-256color");
    assert_eq!(config.default_target.unwrap().port, 22);
}

#[test]
fn test_rejects_zero_timeouts() {
    let config = GatewayConfig {
        teardown_timeout_secs: 0,
        ..Default::default()
    };
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("teardown_timeout_secs"));
}

#[test]
fn test_rejects_relative_remote_dir() {
    let mut config = GatewayConfig::default();
    config.execution.remote_temp_dir = "tmp".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_local_dir_falls_back_to_os_temp() {
    let config = ExecutionConfig::default();
    assert_eq!(config.local_dir(), std::env::temp_dir());
}
