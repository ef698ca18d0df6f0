//! Integration tests for configuration loading and precedence.

use clap::Parser;
use herakles_fpm_exporter::cli::{Args, ConfigFormat, LogFormat};
use herakles_fpm_exporter::config::{
    load_config, render_config, resolve_config, validate_effective_config, Config,
};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

const YAML: &str = r#"
logging:
  level: debug
  format: json
phpfpm:
  autodiscover: false
  poll_interval_ms: 500
  pools:
    - socket: unix:///run/php/www.sock
      status_path: /status
    - socket: tcp://127.0.0.1:9001
      status_socket: tcp://127.0.0.1:9002
      status_path: /fpm-status
      poll_interval_ms: 5000
      timeout_ms: 300
php:
  binary: /usr/bin/php8.2
"#;

#[test]
fn test_yaml_file_is_loaded() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("fpm-exporter.yaml");
    fs::write(&path, YAML).unwrap();

    let config = load_config(path.to_str()).unwrap();
    assert_eq!(config.logging.format, Some(LogFormat::Json));
    assert!(!config.autodiscover());
    assert_eq!(config.poll_interval(), Duration::from_millis(500));
    // unset sections keep defaults
    assert_eq!(config.pool_timeout(), Duration::from_secs(2));
    assert_eq!(config.php_binary(), "/usr/bin/php8.2");

    let pools = &config.phpfpm.pools;
    assert_eq!(pools.len(), 2);
    assert_eq!(pools[0].status_socket(), "unix:///run/php/www.sock");
    assert_eq!(pools[1].status_socket(), "tcp://127.0.0.1:9002");
    assert_eq!(
        pools[1].poll_interval(config.poll_interval()),
        Duration::from_secs(5)
    );
    assert_eq!(
        pools[1].timeout(config.pool_timeout()),
        Duration::from_millis(300)
    );
    assert!(validate_effective_config(&config).is_ok());
}

#[test]
fn test_cli_overrides_file() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("fpm-exporter.yaml");
    fs::write(&path, YAML).unwrap();

    let args = Args::parse_from([
        "herakles-fpm-exporter",
        "--config",
        path.to_str().unwrap(),
        "--poll-interval-ms",
        "100",
        "--php-binary",
        "php8.3",
        "--log-format",
        "text",
    ]);
    let config = resolve_config(&args).unwrap();
    assert_eq!(config.poll_interval(), Duration::from_millis(100));
    assert_eq!(config.php_binary(), "php8.3");
    assert_eq!(config.logging.format, Some(LogFormat::Text));
}

#[test]
fn test_no_config_uses_defaults() {
    let args = Args::parse_from(["herakles-fpm-exporter", "--no-config", "--no-autodiscover"]);
    let config = resolve_config(&args).unwrap();
    assert!(!config.autodiscover());
    assert!(config.phpfpm.pools.is_empty());
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
}

#[test]
fn test_invalid_pool_is_rejected() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bad.json");
    fs::write(
        &path,
        r#"{"phpfpm": {"pools": [{"socket": "www-pool", "status_path": "/status"}]}}"#,
    )
    .unwrap();

    let config = load_config(path.to_str()).unwrap();
    assert!(validate_effective_config(&config).is_err());
}

#[test]
fn test_rendered_config_loads_back() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("effective.json");

    let mut config = Config::default();
    config.phpfpm.poll_interval_ms = Some(750);
    fs::write(&path, render_config(&config, ConfigFormat::Json).unwrap()).unwrap();

    assert_eq!(load_config(path.to_str()).unwrap(), config);
}
