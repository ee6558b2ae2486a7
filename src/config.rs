//! Configuration management for the head panel
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub subscriber: SubscriberConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub parties: HashMap<String, PartyConfig>,
}

/// Engine timings. Defaults are the protocol constants the panel is tuned for.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub instance_id: String,
    pub status_poll_interval_ms: u64,
    pub utxo_poll_interval_ms: u64,
    /// A poll younger than this shields an `Open` status from push events
    pub stale_push_window_ms: u64,
    pub fetch_debounce_ms: u64,
    pub stuck_fetch_timeout_ms: u64,
    pub burst_interval_ms: u64,
    pub burst_count: u32,
    pub commit_retry_delay_ms: u64,
    pub event_channel_capacity: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            instance_id: "headwatch".to_string(),
            status_poll_interval_ms: 1000,
            utxo_poll_interval_ms: 1000,
            stale_push_window_ms: 3000,
            fetch_debounce_ms: 100,
            stuck_fetch_timeout_ms: 5000,
            burst_interval_ms: 200,
            burst_count: 10,
            commit_retry_delay_ms: 3000,
            event_channel_capacity: 1024,
        }
    }
}

impl PanelConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn utxo_poll_interval(&self) -> Duration {
        Duration::from_millis(self.utxo_poll_interval_ms)
    }

    pub fn stale_push_window(&self) -> Duration {
        Duration::from_millis(self.stale_push_window_ms)
    }

    pub fn fetch_debounce(&self) -> Duration {
        Duration::from_millis(self.fetch_debounce_ms)
    }

    pub fn stuck_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.stuck_fetch_timeout_ms)
    }

    pub fn burst_interval(&self) -> Duration {
        Duration::from_millis(self.burst_interval_ms)
    }

    pub fn commit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.commit_retry_delay_ms)
    }
}

/// Push channel reconnection policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub max_reconnect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// One party's node endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct PartyConfig {
    pub name: String,
    /// Base URL of the node's HTTP API
    pub api_url: String,
    /// Push channel; derived from `api_url` when absent
    pub ws_url: Option<String>,
    /// Address that receives transfers sent to this party
    pub address: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl PartyConfig {
    pub fn ws_url(&self) -> String {
        self.ws_url.clone().unwrap_or_else(|| {
            self.api_url
                .replace("http://", "ws://")
                .replace("https://", "wss://")
        })
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("HEADWATCH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_parties().is_empty() {
            anyhow::bail!("At least one party must be enabled");
        }

        for (key, party) in &self.parties {
            if party.enabled {
                if party.api_url.is_empty() {
                    anyhow::bail!("Party {} has no API URL configured", key);
                }
                if party.address.is_empty() {
                    anyhow::bail!("Party {} has no address configured", key);
                }
            }
        }

        if self.panel.burst_interval_ms == 0
            || self.panel.utxo_poll_interval_ms == 0
            || self.panel.status_poll_interval_ms == 0
        {
            anyhow::bail!("Poll intervals must be non-zero");
        }

        if self.panel.event_channel_capacity == 0 {
            anyhow::bail!("Event channel capacity must be non-zero");
        }

        Ok(())
    }

    /// Enabled parties, sorted by key for a stable display order
    pub fn enabled_parties(&self) -> Vec<(&String, &PartyConfig)> {
        let mut parties: Vec<_> = self.parties.iter().filter(|(_, p)| p.enabled).collect();
        parties.sort_by(|a, b| a.0.cmp(b.0));
        parties
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
