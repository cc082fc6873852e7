//! Bridge settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::paths::get_settings_path;
use crate::dispatch::{default_worker_threads, DispatchConfig, DEFAULT_THREAD_NAME};
use crate::native::Curve;

/// Environment variable overriding `worker_threads`
pub const ENV_WORKERS: &str = "CRYPTO_BRIDGE_WORKERS";

/// Environment variable overriding `debug`
pub const ENV_DEBUG: &str = "CRYPTO_BRIDGE_DEBUG";

/// Bridge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Worker threads in the dispatch pool
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Name given to worker threads
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// How long the runtime waits for a promise before giving up
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_ms: u64,

    /// How long shutdown waits for running work items
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Curve used when a caller does not name one
    #[serde(default = "default_curve")]
    pub default_curve: String,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

fn default_thread_name() -> String {
    DEFAULT_THREAD_NAME.to_string()
}

fn default_delivery_timeout() -> u64 {
    30_000
}

fn default_shutdown_timeout() -> u64 {
    5_000
}

fn default_curve() -> String {
    "secp256k1".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
            delivery_timeout_ms: default_delivery_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            default_curve: default_curve(),
            debug: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the config directory.
    ///
    /// A missing file yields defaults. Environment overrides are applied and
    /// invalid values replaced by defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => get_settings_path(),
        };

        let mut settings = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read settings file {}", config_path.display()))?;
            Self::from_toml_str(&content)?
        } else {
            tracing::warn!(
                path = %config_path.display(),
                "Settings file not found, using defaults"
            );
            Self::default()
        };

        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.normalize();
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse settings file")
    }

    /// Write settings as TOML, creating parent directories
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;

        tokio::fs::write(path, content)
            .await
            .context("Failed to write settings file")?;

        Ok(())
    }

    /// Apply overrides read through `lookup` (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_WORKERS) {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.worker_threads = n,
                Err(_) => tracing::warn!(value = %raw, var = ENV_WORKERS, "Ignoring invalid override"),
            }
        }
        if let Some(raw) = lookup(ENV_DEBUG) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.debug = true,
                "0" | "false" | "no" | "off" | "" => self.debug = false,
                _ => tracing::warn!(value = %raw, var = ENV_DEBUG, "Ignoring invalid override"),
            }
        }
    }

    /// Replace out-of-range values with defaults
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            tracing::warn!("worker_threads must be at least 1, using default");
            self.worker_threads = default_worker_threads();
        }
        if self.thread_name.trim().is_empty() {
            tracing::warn!("thread_name is empty, using default");
            self.thread_name = default_thread_name();
        }
        if self.delivery_timeout_ms == 0 {
            tracing::warn!("delivery_timeout_ms must be positive, using default");
            self.delivery_timeout_ms = default_delivery_timeout();
        }
        if Curve::from_name(&self.default_curve).is_none() {
            tracing::warn!(curve = %self.default_curve, "Unknown default_curve, using default");
            self.default_curve = default_curve();
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            worker_threads: self.worker_threads,
            thread_name: self.thread_name.clone(),
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
