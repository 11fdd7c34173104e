//! Service configuration.
//!
//! Read from the process environment after loading a `.env` file when one
//! is present. The Mollie API key may live in the OS keyring instead of the
//! environment.

use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::mollie::client::DEFAULT_BASE_URL;
use crate::storage;
use crate::terminal::protocol::PollSettings;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub http_timeout: Duration,
    /// Public base URL Mollie reaches the webhook on.
    pub webhook_base_url: String,
    pub webhook_port: u16,
    /// POS session that bus notifications are addressed to.
    pub session_key: String,
    pub poll: PollSettings,
    pub qr_poll_interval: Duration,
    pub qr_max_polls: Option<u32>,
    pub accepted_currencies: Vec<String>,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub sync_on_start: bool,
}

/// Load `.env`, then read the configuration from the environment.
pub fn load() -> Result<AppConfig> {
    dotenvy::dotenv().ok();
    from_env()
}

/// Read the configuration from the environment as it is.
pub fn from_env() -> Result<AppConfig> {
    let api_key = match var("MOLLIE_TERMINAL_API_KEY") {
        Some(key) => key,
        None => storage::get_api_key().ok_or_else(|| {
            anyhow!("MOLLIE_TERMINAL_API_KEY is not set and no API key is stored in the keyring")
        })?,
    };

    let defaults = PollSettings::default();
    let poll = PollSettings {
        interval: Duration::from_millis(parse_var(
            "MOLLIE_POLL_INTERVAL_MS",
            defaults.interval.as_millis() as u64,
        )?),
        retries: parse_var("MOLLIE_POLL_RETRIES", defaults.retries)?,
        request_timeout: Duration::from_millis(parse_var(
            "MOLLIE_STATUS_TIMEOUT_MS",
            defaults.request_timeout.as_millis() as u64,
        )?),
        max_wait: Duration::from_secs(parse_var(
            "MOLLIE_MAX_WAIT_SECS",
            defaults.max_wait.as_secs(),
        )?),
    };
    if poll.interval.is_zero() {
        bail!("MOLLIE_POLL_INTERVAL_MS must be greater than zero");
    }

    let data_dir = var("MOLLIE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"));
    let log_dir = var("MOLLIE_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("logs"));

    let accepted_currencies: Vec<String> = var("MOLLIE_ACCEPTED_CURRENCIES")
        .unwrap_or_else(|| "EUR".to_string())
        .split(',')
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();

    Ok(AppConfig {
        api_key,
        api_base_url: var("MOLLIE_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        http_timeout: Duration::from_secs(parse_var("MOLLIE_HTTP_TIMEOUT_SECS", 60)?),
        webhook_base_url: required("MOLLIE_WEBHOOK_BASE_URL")?,
        webhook_port: parse_var("MOLLIE_WEBHOOK_PORT", 8069)?,
        session_key: required("MOLLIE_POS_SESSION_KEY")?,
        poll,
        qr_poll_interval: Duration::from_millis(parse_var("MOLLIE_QR_POLL_INTERVAL_MS", 5000)?),
        qr_max_polls: var("MOLLIE_QR_MAX_POLLS")
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("MOLLIE_QR_MAX_POLLS is invalid")?,
        accepted_currencies,
        data_dir,
        log_dir,
        sync_on_start: parse_bool("MOLLIE_SYNC_ON_START")?,
    })
}

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String> {
    var(name).ok_or_else(|| anyhow!("{name} is not set"))
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{name} is invalid ({raw}): {e}")),
        None => Ok(default),
    }
}

fn parse_bool(name: &str) -> Result<bool> {
    match var(name).map(|v| v.to_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => bail!("{name} is invalid ({other}): expected true or false"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: &[&str] = &[
        "MOLLIE_TERMINAL_API_KEY",
        "MOLLIE_API_BASE_URL",
        "MOLLIE_HTTP_TIMEOUT_SECS",
        "MOLLIE_WEBHOOK_BASE_URL",
        "MOLLIE_WEBHOOK_PORT",
        "MOLLIE_POS_SESSION_KEY",
        "MOLLIE_POLL_INTERVAL_MS",
        "MOLLIE_POLL_RETRIES",
        "MOLLIE_STATUS_TIMEOUT_MS",
        "MOLLIE_MAX_WAIT_SECS",
        "MOLLIE_QR_POLL_INTERVAL_MS",
        "MOLLIE_QR_MAX_POLLS",
        "MOLLIE_ACCEPTED_CURRENCIES",
        "MOLLIE_DATA_DIR",
        "MOLLIE_LOG_DIR",
        "MOLLIE_SYNC_ON_START",
    ];

    fn reset_env(vars: &[(&str, &str)]) {
        for name in ALL_VARS {
            env::remove_var(name);
        }
        for (name, value) in vars {
            env::set_var(name, value);
        }
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("MOLLIE_TERMINAL_API_KEY", "test_abc"),
            ("MOLLIE_WEBHOOK_BASE_URL", "https://pos.example.com"),
            ("MOLLIE_POS_SESSION_KEY", "config-1"),
        ]
    }

    #[test]
    #[serial]
    fn test_defaults() {
        reset_env(&minimal());
        let cfg = from_env().unwrap();

        assert_eq!(cfg.api_key, "test_abc");
        assert_eq!(cfg.api_base_url, "https://api.mollie.com/");
        assert_eq!(cfg.http_timeout, Duration::from_secs(60));
        assert_eq!(cfg.webhook_port, 8069);
        assert_eq!(cfg.poll, PollSettings::default());
        assert_eq!(cfg.qr_poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.qr_max_polls, None);
        assert_eq!(cfg.accepted_currencies, vec!["EUR".to_string()]);
        assert_eq!(cfg.log_dir, PathBuf::from("data").join("logs"));
        assert!(!cfg.sync_on_start);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        let mut vars = minimal();
        vars.extend([
            ("MOLLIE_POLL_INTERVAL_MS", "1000"),
            ("MOLLIE_POLL_RETRIES", "2"),
            ("MOLLIE_MAX_WAIT_SECS", "90"),
            ("MOLLIE_QR_MAX_POLLS", "12"),
            ("MOLLIE_ACCEPTED_CURRENCIES", "eur, gbp ,"),
            ("MOLLIE_DATA_DIR", "/var/lib/mollie-pos"),
            ("MOLLIE_SYNC_ON_START", "yes"),
        ]);
        reset_env(&vars);
        let cfg = from_env().unwrap();

        assert_eq!(cfg.poll.interval, Duration::from_secs(1));
        assert_eq!(cfg.poll.retries, 2);
        assert_eq!(cfg.poll.max_wait, Duration::from_secs(90));
        assert_eq!(cfg.qr_max_polls, Some(12));
        assert_eq!(cfg.accepted_currencies, vec!["EUR", "GBP"]);
        assert_eq!(cfg.log_dir, PathBuf::from("/var/lib/mollie-pos/logs"));
        assert!(cfg.sync_on_start);
    }

    #[test]
    #[serial]
    fn test_required_and_invalid_values() {
        reset_env(&[
            ("MOLLIE_TERMINAL_API_KEY", "test_abc"),
            ("MOLLIE_POS_SESSION_KEY", "config-1"),
        ]);
        let err = from_env().unwrap_err().to_string();
        assert!(err.contains("MOLLIE_WEBHOOK_BASE_URL"), "{err}");

        let mut vars = minimal();
        vars.push(("MOLLIE_WEBHOOK_PORT", "not-a-port"));
        reset_env(&vars);
        let err = from_env().unwrap_err().to_string();
        assert!(err.contains("MOLLIE_WEBHOOK_PORT"), "{err}");

        let mut vars = minimal();
        vars.push(("MOLLIE_SYNC_ON_START", "maybe"));
        reset_env(&vars);
        assert!(from_env().is_err());
    }
}
