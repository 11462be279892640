//! Unit tests for the configuration loading logic (`Config::from_env`).
//! These tests modify environment variables, so they serialize on `ENV_LOCK`.

use super::Config;
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const VARS: &[&str] = &[
    "MAIL_WARDEN_HOSTNAME",
    "MAIL_WARDEN_BANNER",
    "MAIL_WARDEN_BIND_ADDRESS",
    "MAIL_WARDEN_PORT",
    "MAIL_WARDEN_TIMEOUT_SECS",
    "MAIL_WARDEN_MAX_SIZE",
    "MAIL_WARDEN_REQUIRE_AUTH",
    "MAIL_WARDEN_VALIDATE_SENDER",
    "MAIL_WARDEN_VALIDATE_RECIPIENTS",
    "MAIL_WARDEN_IGNORE_TLS",
    "MAIL_WARDEN_DISABLE_DNS_VALIDATION",
    "MAIL_WARDEN_SECURE_CONNECTION",
    "MAIL_WARDEN_DISABLE_EHLO",
    "MAIL_WARDEN_TLS_CERT",
    "MAIL_WARDEN_TLS_KEY",
    "MAIL_WARDEN_AUTH_USERNAME",
    "MAIL_WARDEN_AUTH_PASSWORD",
];

fn clear_test_env_vars() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_config_default_values() {
    let _lock = ENV_LOCK.lock().unwrap();
    clear_test_env_vars();

    let config = Config::from_env().expect("Config loading failed with no vars set");

    assert!(!config.hostname.is_empty());
    assert_eq!(config.banner, "ESMTP mail-warden");
    assert_eq!(config.smtp_bind_address, "0.0.0.0", "Default SMTP bind address mismatch");
    assert_eq!(config.smtp_port, 2525, "Default SMTP port mismatch");
    assert_eq!(config.timeout_secs, 60);
    assert_eq!(config.max_size, None);
    assert!(!config.require_authentication);
    assert!(!config.validate_sender);
    assert!(!config.validate_recipients);
    assert!(!config.ignore_tls);
    assert!(config.requires_tls());
    assert!(!config.disable_dns_validation);
    assert!(!config.secure_connection);
    assert!(!config.disable_ehlo);
    assert!(config.tls_cert_path.is_none());
    assert!(config.auth_username.is_none());
}

#[test]
fn test_config_from_env_all_set() {
    let _lock = ENV_LOCK.lock().unwrap();
    clear_test_env_vars();

    env::set_var("MAIL_WARDEN_HOSTNAME", "mx.example.org");
    env::set_var("MAIL_WARDEN_BANNER", "ESMTP test");
    env::set_var("MAIL_WARDEN_BIND_ADDRESS", "127.0.0.1");
    env::set_var("MAIL_WARDEN_PORT", "3000");
    env::set_var("MAIL_WARDEN_TIMEOUT_SECS", "5");
    env::set_var("MAIL_WARDEN_MAX_SIZE", "5000");
    env::set_var("MAIL_WARDEN_REQUIRE_AUTH", "true");
    env::set_var("MAIL_WARDEN_VALIDATE_SENDER", "1");
    env::set_var("MAIL_WARDEN_VALIDATE_RECIPIENTS", "YES");
    env::set_var("MAIL_WARDEN_IGNORE_TLS", "on");
    env::set_var("MAIL_WARDEN_DISABLE_DNS_VALIDATION", "true");
    env::set_var("MAIL_WARDEN_SECURE_CONNECTION", "false");
    env::set_var("MAIL_WARDEN_DISABLE_EHLO", "0");
    env::set_var("MAIL_WARDEN_TLS_CERT", "/etc/mail/cert.pem");
    env::set_var("MAIL_WARDEN_TLS_KEY", "/etc/mail/key.pem");
    env::set_var("MAIL_WARDEN_AUTH_USERNAME", "test1");
    env::set_var("MAIL_WARDEN_AUTH_PASSWORD", "test2");

    let config = Config::from_env().expect("Config loading failed when all vars were set");

    assert_eq!(config.hostname, "mx.example.org");
    assert_eq!(config.banner, "ESMTP test");
    assert_eq!(config.smtp_bind_address, "127.0.0.1");
    assert_eq!(config.smtp_port, 3000);
    assert_eq!(config.timeout_secs, 5);
    assert_eq!(config.max_size, Some(5000));
    assert!(config.require_authentication);
    assert!(config.validate_sender);
    assert!(config.validate_recipients);
    assert!(config.ignore_tls);
    assert!(!config.requires_tls());
    assert!(config.disable_dns_validation);
    assert!(!config.secure_connection);
    assert!(!config.disable_ehlo);
    assert_eq!(config.tls_cert_path.as_deref(), Some("/etc/mail/cert.pem"));
    assert_eq!(config.tls_key_path.as_deref(), Some("/etc/mail/key.pem"));
    assert_eq!(config.auth_username.as_deref(), Some("test1"));
    assert_eq!(config.auth_password.as_deref(), Some("test2"));

    clear_test_env_vars();
}

#[test]
fn test_config_invalid_port_values() {
    let _lock = ENV_LOCK.lock().unwrap();
    clear_test_env_vars();

    env::set_var("MAIL_WARDEN_PORT", "not-a-port");
    let err = Config::from_env().expect_err("Expected error for invalid SMTP port");
    let err_msg = err.to_string();
    assert!(err_msg.contains("MAIL_WARDEN_PORT"));
    assert!(err_msg.contains("not-a-port"));

    env::set_var("MAIL_WARDEN_PORT", "2525");
    env::set_var("MAIL_WARDEN_MAX_SIZE", "-1");
    let err = Config::from_env().expect_err("Expected error for invalid max size");
    assert!(err.to_string().contains("MAIL_WARDEN_MAX_SIZE"));

    clear_test_env_vars();
}

#[test]
fn test_config_invalid_flag() {
    let _lock = ENV_LOCK.lock().unwrap();
    clear_test_env_vars();

    env::set_var("MAIL_WARDEN_REQUIRE_AUTH", "maybe");
    let err = Config::from_env().expect_err("Expected error for invalid boolean");
    let err_msg = err.to_string();
    assert!(err_msg.contains("MAIL_WARDEN_REQUIRE_AUTH"));
    assert!(err_msg.contains("maybe"));

    clear_test_env_vars();
}

#[test]
fn test_config_tls_paths_must_be_paired() {
    let _lock = ENV_LOCK.lock().unwrap();
    clear_test_env_vars();

    env::set_var("MAIL_WARDEN_TLS_CERT", "/etc/mail/cert.pem");
    let err = Config::from_env().expect_err("Expected error for a cert without a key");
    assert!(err.to_string().contains("MAIL_WARDEN_TLS_KEY"));

    clear_test_env_vars();
}
