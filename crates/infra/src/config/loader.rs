//! Configuration loader
//!
//! Loads worker configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, applies any `POSTGATE_*` environment variables to the defaults
//! 2. If none are set, falls back to loading from a file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//! 5. With no variables and no file, the defaults are used
//!
//! ## Environment Variables
//! - `POSTGATE_RATE_LIMIT_ENABLED`: Whether the limiter is enabled
//! - `POSTGATE_RATE_LIMIT_BASE_DELAY_MS`: Minimum spacing per principal
//! - `POSTGATE_RATE_LIMIT_MAX_DELAY_MS`: Ceiling for the adaptive delay
//! - `POSTGATE_RATE_LIMIT_JITTER_PERCENT`: Jitter fraction (0.0 - 1.0)
//! - `POSTGATE_CIRCUIT_ENABLED`: Whether the circuit breaker is enabled
//! - `POSTGATE_CIRCUIT_FAILURE_THRESHOLD`: Failures that open a circuit
//! - `POSTGATE_CIRCUIT_OPEN_DURATION_MS`: Time a circuit stays open
//! - `POSTGATE_CIRCUIT_HALF_OPEN_MAX_ATTEMPTS`: Probes allowed in half-open
//! - `POSTGATE_METRICS_ENABLED`: Whether metrics are collected
//! - `POSTGATE_METRICS_FLUSH_INTERVAL_MS`: Period of the shared-store flush
//! - `POSTGATE_METRICS_RETENTION_MS`: Timeline retention in the shared store
//! - `POSTGATE_PUBLISH_TIMEOUT_MS`: Upper bound on one publish call
//! - `POSTGATE_RETRY_JITTER_PERCENT`: Jitter fraction on retry delays
//! - `POSTGATE_WORKER_CONCURRENCY`: Jobs processed in parallel
//! - `POSTGATE_WORKER_POLL_INTERVAL_MS`: Idle wait between empty polls
//! - `POSTGATE_WORKER_SHUTDOWN_TIMEOUT_MS`: Grace period for in-flight jobs
//! - `POSTGATE_LOG_LEVEL`: Default tracing filter when `RUST_LOG` is unset
//! - `POSTGATE_LOG_JSON`: Emit JSON log lines (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./postgate.toml` or `./postgate.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use postgate_domain::{PostgateError, Result};

use super::PostgateConfig;
use crate::errors::InfraError;

const CONFIG_FILE_NAMES: [&str; 4] =
    ["postgate.toml", "postgate.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// Environment variables win when at least one is set. Otherwise the first
/// config file found by [`probe_config_paths`] is used, and with no file the
/// defaults apply.
///
/// # Errors
/// Returns `PostgateError::Config` if a variable or file is present but
/// invalid.
pub fn load() -> Result<PostgateConfig> {
    match load_from_env()? {
        Some(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        None => match probe_config_paths() {
            Some(path) => load_from_file(Some(path)),
            None => {
                tracing::info!("No configuration found, using defaults");
                Ok(PostgateConfig::default())
            }
        },
    }
}

/// Load configuration from environment variables
///
/// Returns `Ok(None)` when no `POSTGATE_*` variable is set. Unset variables
/// keep their defaults.
///
/// # Errors
/// Returns `PostgateError::Config` if a variable has an invalid value or the
/// resulting configuration fails validation.
pub fn load_from_env() -> Result<Option<PostgateConfig>> {
    let mut config = PostgateConfig::default();
    let mut found = false;

    let limiter = &mut config.rate_limiter;
    found |= apply(&mut limiter.enabled, env_bool("POSTGATE_RATE_LIMIT_ENABLED"));
    found |= apply(&mut limiter.base_delay, env_millis("POSTGATE_RATE_LIMIT_BASE_DELAY_MS")?);
    found |= apply(&mut limiter.max_delay, env_millis("POSTGATE_RATE_LIMIT_MAX_DELAY_MS")?);
    found |= apply(&mut limiter.jitter_percent, env_parse("POSTGATE_RATE_LIMIT_JITTER_PERCENT")?);

    let breaker = &mut config.circuit_breaker;
    found |= apply(&mut breaker.enabled, env_bool("POSTGATE_CIRCUIT_ENABLED"));
    found |= apply(&mut breaker.failure_threshold, env_parse("POSTGATE_CIRCUIT_FAILURE_THRESHOLD")?);
    found |= apply(&mut breaker.open_duration, env_millis("POSTGATE_CIRCUIT_OPEN_DURATION_MS")?);
    found |= apply(
        &mut breaker.half_open_max_attempts,
        env_parse("POSTGATE_CIRCUIT_HALF_OPEN_MAX_ATTEMPTS")?,
    );

    let metrics = &mut config.metrics;
    found |= apply(&mut metrics.enabled, env_bool("POSTGATE_METRICS_ENABLED"));
    found |= apply(&mut metrics.flush_interval, env_millis("POSTGATE_METRICS_FLUSH_INTERVAL_MS")?);
    found |= apply(&mut metrics.retention, env_millis("POSTGATE_METRICS_RETENTION_MS")?);

    let orchestrator = &mut config.orchestrator;
    found |= apply(&mut orchestrator.publish_timeout, env_millis("POSTGATE_PUBLISH_TIMEOUT_MS")?);
    found |= apply(
        &mut orchestrator.retry_jitter_percent,
        env_parse("POSTGATE_RETRY_JITTER_PERCENT")?,
    );

    let worker = &mut config.worker;
    found |= apply(&mut worker.concurrency, env_parse("POSTGATE_WORKER_CONCURRENCY")?);
    found |= apply(&mut worker.poll_interval, env_millis("POSTGATE_WORKER_POLL_INTERVAL_MS")?);
    found |=
        apply(&mut worker.shutdown_timeout, env_millis("POSTGATE_WORKER_SHUTDOWN_TIMEOUT_MS")?);

    let logging = &mut config.logging;
    found |= apply(&mut logging.level, std::env::var("POSTGATE_LOG_LEVEL").ok());
    found |= apply(&mut logging.json, env_bool("POSTGATE_LOG_JSON"));

    if !found {
        return Ok(None);
    }

    config.validate()?;
    Ok(Some(config))
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `PostgateError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - A setting fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<PostgateConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(PostgateError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            PostgateError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path).map_err(InfraError::from)?;
    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<PostgateConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => Ok(toml::from_str(contents).map_err(InfraError::from)?),
        "json" => Ok(serde_json::from_str(contents).map_err(InfraError::from)?),
        _ => Err(PostgateError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

fn apply<T>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) => {
            *slot = value;
            true
        }
        None => false,
    }
}

/// Parse an optional environment variable
///
/// # Errors
/// Returns `PostgateError::Config` if the variable is set but does not parse.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| PostgateError::Config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
