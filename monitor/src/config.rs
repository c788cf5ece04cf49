//! Configuration module for Filedrop Monitor.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `FILEDROP_WATCH_DIR` | Yes | - | Root directory to watch (recursively) |
//! | `FILEDROP_KEEP_DIR` | Yes | - | Archive directory for transferred files |
//! | `FILEDROP_FILTER` | No | `*` | File name glob (e.g. `*.xml`) |
//! | `FILEDROP_SFTP_HOST` | Yes | - | SFTP server host |
//! | `FILEDROP_SFTP_PORT` | No | 22 | SFTP server port |
//! | `FILEDROP_SFTP_USERNAME` | Yes | - | SFTP username |
//! | `FILEDROP_SFTP_PASSWORD` | Yes | - | SFTP password |
//! | `FILEDROP_SFTP_WORKING_PATH` | No | (empty) | Remote directory files are uploaded into |
//! | `FILEDROP_SFTP_TIMEOUT_SECS` | No | 30 | Connect and I/O timeout for the session |
//! | `FILEDROP_QUIESCENCE_MS` | No | 2000 | Quiet period before a batch is flushed |
//! | `FILEDROP_RETRY_LIMIT` | No | 3 | Transfer attempts per file (1-10) |
//!
//! # Example
//!
//! ```no_run
//! use filedrop_monitor::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Watching: {}", config.watch_dir.display());
//! ```

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use zeroize::Zeroizing;

/// Default file name filter (every file).
pub const DEFAULT_FILTER: &str = "*";

/// Default SFTP port.
pub const DEFAULT_SFTP_PORT: u16 = 22;

/// Default session timeout in seconds.
const DEFAULT_SFTP_TIMEOUT_SECS: u64 = 30;

/// Default quiescence duration in milliseconds.
pub const DEFAULT_QUIESCENCE_MS: u64 = 2000;

/// Default number of transfer attempts per file.
pub const DEFAULT_RETRY_LIMIT: u8 = 3;

/// Minimum allowed retry limit.
const MIN_RETRY_LIMIT: u8 = 1;

/// Maximum allowed retry limit.
const MAX_RETRY_LIMIT: u8 = 10;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Connection parameters for the remote SFTP endpoint.
#[derive(Clone)]
pub struct SftpConfig {
    /// Server host name or address.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Login name.
    pub username: String,

    /// Login password. Wiped from memory when dropped.
    pub password: Zeroizing<String>,

    /// Remote directory prefix. Uploaded files land at
    /// `working_path/<file name>`.
    pub working_path: String,

    /// Connect and per-operation timeout.
    pub timeout: Duration,
}

impl SftpConfig {
    /// Returns `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("working_path", &self.working_path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Configuration for the Filedrop Monitor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory watched for written files.
    pub watch_dir: PathBuf,

    /// Directory transferred files are moved into.
    pub keep_dir: PathBuf,

    /// File name glob a written file must match to be queued.
    pub filter: String,

    /// Remote endpoint parameters.
    pub sftp: SftpConfig,

    /// Quiet period that must elapse after the last event before a flush.
    pub quiescence: Duration,

    /// Transfer attempts per file before it is dead-lettered.
    pub retry_limit: u8,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - A required variable (`FILEDROP_WATCH_DIR`, `FILEDROP_KEEP_DIR`,
    ///   `FILEDROP_SFTP_HOST`, `FILEDROP_SFTP_USERNAME`, `FILEDROP_SFTP_PASSWORD`)
    ///   is not set
    /// - A numeric variable cannot be parsed or is out of range
    pub fn from_env() -> Result<Self, ConfigError> {
        let watch_dir = PathBuf::from(required("FILEDROP_WATCH_DIR")?);
        let keep_dir = PathBuf::from(required("FILEDROP_KEEP_DIR")?);

        let filter = env::var("FILEDROP_FILTER")
            .ok()
            .map(|val| val.trim().to_string())
            .filter(|val| !val.is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        let host = required("FILEDROP_SFTP_HOST")?;
        let username = required("FILEDROP_SFTP_USERNAME")?;
        let password = Zeroizing::new(required("FILEDROP_SFTP_PASSWORD")?);

        let port = match env::var("FILEDROP_SFTP_PORT") {
            Ok(val) => {
                let port = val.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                    key: "FILEDROP_SFTP_PORT".to_string(),
                    message: format!("expected port number, got '{val}'"),
                })?;
                if port == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "FILEDROP_SFTP_PORT".to_string(),
                        message: "port must be greater than 0".to_string(),
                    });
                }
                port
            }
            Err(_) => DEFAULT_SFTP_PORT,
        };

        let working_path = env::var("FILEDROP_SFTP_WORKING_PATH").unwrap_or_default();

        let timeout = Duration::from_secs(positive_u64(
            "FILEDROP_SFTP_TIMEOUT_SECS",
            DEFAULT_SFTP_TIMEOUT_SECS,
        )?);

        let quiescence =
            Duration::from_millis(positive_u64("FILEDROP_QUIESCENCE_MS", DEFAULT_QUIESCENCE_MS)?);

        let retry_limit = match env::var("FILEDROP_RETRY_LIMIT") {
            Ok(val) => {
                let limit = val.parse::<u8>().map_err(|_| ConfigError::InvalidValue {
                    key: "FILEDROP_RETRY_LIMIT".to_string(),
                    message: format!("expected integer 1-10, got '{val}'"),
                })?;
                if !(MIN_RETRY_LIMIT..=MAX_RETRY_LIMIT).contains(&limit) {
                    return Err(ConfigError::InvalidValue {
                        key: "FILEDROP_RETRY_LIMIT".to_string(),
                        message: format!(
                            "retry limit must be between {MIN_RETRY_LIMIT} and {MAX_RETRY_LIMIT}, got {limit}"
                        ),
                    });
                }
                limit
            }
            Err(_) => DEFAULT_RETRY_LIMIT,
        };

        Ok(Self {
            watch_dir,
            keep_dir,
            filter,
            sftp: SftpConfig {
                host,
                port,
                username,
                password,
                working_path,
                timeout,
            },
            quiescence,
            retry_limit,
        })
    }
}

/// Reads a required, non-empty environment variable.
fn required(key: &str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

/// Reads an optional positive integer, falling back to `default` when unset.
fn positive_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    let Ok(val) = env::var(key) else {
        return Ok(default);
    };
    let parsed = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected positive integer, got '{val}'"),
    })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value must be greater than 0".to_string(),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to run tests with isolated environment variables.
    /// Clears all FILEDROP_* vars before the test and restores them after.
    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved_vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with("FILEDROP_"))
            .collect();

        for (key, _) in &saved_vars {
            env::remove_var(key);
        }

        let result = f();

        for (key, _) in env::vars().filter(|(k, _)| k.starts_with("FILEDROP_")) {
            env::remove_var(key);
        }
        for (key, value) in saved_vars {
            env::set_var(key, value);
        }

        result
    }

    fn set_required() {
        env::set_var("FILEDROP_WATCH_DIR", "/data/outbox");
        env::set_var("FILEDROP_KEEP_DIR", "/data/keep");
        env::set_var("FILEDROP_SFTP_HOST", "sftp.example.com");
        env::set_var("FILEDROP_SFTP_USERNAME", "customs");
        env::set_var("FILEDROP_SFTP_PASSWORD", "hunter2");
    }

    #[test]
    #[serial]
    fn test_missing_watch_dir() {
        with_clean_env(|| {
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(ref s) if s == "FILEDROP_WATCH_DIR"));
        });
    }

    #[test]
    #[serial]
    fn test_missing_password() {
        with_clean_env(|| {
            set_required();
            env::remove_var("FILEDROP_SFTP_PASSWORD");

            let err = Config::from_env().unwrap_err();
            assert!(
                matches!(err, ConfigError::MissingEnvVar(ref s) if s == "FILEDROP_SFTP_PASSWORD")
            );
        });
    }

    #[test]
    #[serial]
    fn test_blank_required_value_is_missing() {
        with_clean_env(|| {
            set_required();
            env::set_var("FILEDROP_SFTP_HOST", "   ");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(ref s) if s == "FILEDROP_SFTP_HOST"));
        });
    }

    #[test]
    #[serial]
    fn test_minimal_config_defaults() {
        with_clean_env(|| {
            set_required();

            let config = Config::from_env().expect("should parse minimal config");

            assert_eq!(config.watch_dir, PathBuf::from("/data/outbox"));
            assert_eq!(config.keep_dir, PathBuf::from("/data/keep"));
            assert_eq!(config.filter, DEFAULT_FILTER);
            assert_eq!(config.sftp.port, DEFAULT_SFTP_PORT);
            assert_eq!(config.sftp.working_path, "");
            assert_eq!(config.sftp.timeout, Duration::from_secs(30));
            assert_eq!(config.quiescence, Duration::from_millis(2000));
            assert_eq!(config.retry_limit, DEFAULT_RETRY_LIMIT);
            assert_eq!(config.sftp.address(), "sftp.example.com:22");
        });
    }

    #[test]
    #[serial]
    fn test_full_config() {
        with_clean_env(|| {
            set_required();
            env::set_var("FILEDROP_FILTER", "*.xml");
            env::set_var("FILEDROP_SFTP_PORT", "2222");
            env::set_var("FILEDROP_SFTP_WORKING_PATH", "/inbound/");
            env::set_var("FILEDROP_SFTP_TIMEOUT_SECS", "5");
            env::set_var("FILEDROP_QUIESCENCE_MS", "750");
            env::set_var("FILEDROP_RETRY_LIMIT", "5");

            let config = Config::from_env().expect("should parse full config");

            assert_eq!(config.filter, "*.xml");
            assert_eq!(config.sftp.port, 2222);
            assert_eq!(config.sftp.username, "customs");
            assert_eq!(config.sftp.password.as_str(), "hunter2");
            assert_eq!(config.sftp.working_path, "/inbound/");
            assert_eq!(config.sftp.timeout, Duration::from_secs(5));
            assert_eq!(config.quiescence, Duration::from_millis(750));
            assert_eq!(config.retry_limit, 5);
        });
    }

    #[test]
    #[serial]
    fn test_invalid_port() {
        with_clean_env(|| {
            set_required();
            env::set_var("FILEDROP_SFTP_PORT", "ssh");

            let err = Config::from_env().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "FILEDROP_SFTP_PORT")
            );
        });
    }

    #[test]
    #[serial]
    fn test_zero_quiescence_rejected() {
        with_clean_env(|| {
            set_required();
            env::set_var("FILEDROP_QUIESCENCE_MS", "0");

            let err = Config::from_env().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "FILEDROP_QUIESCENCE_MS")
            );
        });
    }

    #[test]
    #[serial]
    fn test_retry_limit_out_of_range() {
        with_clean_env(|| {
            set_required();
            env::set_var("FILEDROP_RETRY_LIMIT", "11");

            let err = Config::from_env().unwrap_err();
            assert_eq!(
                err.to_string(),
                "invalid value for FILEDROP_RETRY_LIMIT: retry limit must be between 1 and 10, got 11"
            );
        });
    }

    #[test]
    #[serial]
    fn test_blank_filter_falls_back_to_default() {
        with_clean_env(|| {
            set_required();
            env::set_var("FILEDROP_FILTER", "  ");

            let config = Config::from_env().unwrap();
            assert_eq!(config.filter, DEFAULT_FILTER);
        });
    }

    #[test]
    fn test_debug_redacts_password() {
        let sftp = SftpConfig {
            host: "h".to_string(),
            port: 22,
            username: "u".to_string(),
            password: Zeroizing::new("topsecret".to_string()),
            working_path: String::new(),
            timeout: Duration::from_secs(1),
        };

        let rendered = format!("{sftp:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("<redacted>"));
    }
}
