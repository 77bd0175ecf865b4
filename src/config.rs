//! Experiment-wide settings loaded from an optional TOML file

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mode::{EvasionConfig, Mode};
use crate::session::ProxyProvider;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "PROXY_API_KEY";

/// Tunables of one measurement run. Every field has a default so a partial
/// file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
	/// Proxy provider API key
	pub api_key: String,
	/// SOCKS5 gateway host of the provider
	pub gateway_host: String,
	/// Base URL of the provider's session and inventory API
	pub api_base: String,
	/// Worker `n` connects through gateway port `port_base + n`
	pub port_base: u16,
	/// Gateway port used for inventory calls
	pub inventory_port: u16,
	/// Per-request timeout in seconds
	pub timeout_secs: u64,
	/// Maximum concurrent workers
	pub pool_size: usize,
	/// Per-country cap on collected IPs
	pub max_num_ip: u32,
	/// Number of full passes over the country list
	pub rep_count: u32,
	/// Pause between passes in seconds
	pub interval_secs: u64,
	/// Chance (percent) that a validity check uses GET instead of HEAD
	pub probe_get_percent: u32,
	/// Chance (percent) of a validity check before each query
	pub probe_between_percent: u32,
	/// Verify resolver certificates. Only honored by baseline-only runs
	pub verify_tls: bool,
	/// Countries to measure; empty means every country the provider offers
	pub countries: Vec<String>,
}

impl Default for ExperimentConfig {
	fn default() -> Self {
		Self {
			api_key: String::new(),
			gateway_host: "premium.residential.proxyrack.net".to_string(),
			api_base: "http://api.proxyrack.net".to_string(),
			port_base: 10000,
			inventory_port: 9000,
			timeout_secs: 50,
			pool_size: 100,
			max_num_ip: 5000,
			rep_count: 3,
			interval_secs: 600,
			probe_get_percent: 50,
			probe_between_percent: 10,
			verify_tls: true,
			countries: Vec::new(),
		}
	}
}

impl ExperimentConfig {
	/// Load configuration from a TOML file
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path)
			.map_err(|e| ConfigError::Invalid(format!("failed to read {}: {}", path.display(), e)))?;
		Self::from_toml(&content)
	}

	pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
		toml::from_str(content)
			.map_err(|e| ConfigError::Invalid(format!("failed to parse config: {}", e)))
	}

	/// Fill the API key from the environment if the file left it empty.
	pub fn apply_env(&mut self) {
		if self.api_key.is_empty() {
			if let Ok(key) = std::env::var(API_KEY_ENV) {
				self.api_key = key;
			}
		}
	}

	/// Reject settings no run could use.
	pub fn validate(&self) -> Result<(), ConfigError> {
		for (name, value) in [
			("probe_get_percent", self.probe_get_percent),
			("probe_between_percent", self.probe_between_percent),
		] {
			if value > 100 {
				return Err(ConfigError::Percentage { name, value });
			}
		}
		if self.pool_size == 0 {
			return Err(ConfigError::Invalid("pool_size must be at least 1".to_string()));
		}
		if self.timeout_secs == 0 {
			return Err(ConfigError::Invalid("timeout_secs must be greater than 0".to_string()));
		}
		if self.api_key.is_empty() {
			return Err(ConfigError::Invalid(format!(
				"no proxy API key: set api_key in the config file or {}", API_KEY_ENV,
			)));
		}
		Ok(())
	}

	/// Turn certificate verification off when any evasion mode is planned;
	/// those handshakes present certificates for another name. Returns
	/// whether the setting changed.
	pub fn fit_tls_to(&mut self, modes: &[EvasionConfig]) -> bool {
		let evasive = modes.iter().any(|m| m.mode() != Mode::Baseline);
		if evasive && self.verify_tls {
			self.verify_tls = false;
			return true;
		}
		false
	}

	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}

	pub fn interval(&self) -> Duration {
		Duration::from_secs(self.interval_secs)
	}

	pub fn provider(&self) -> ProxyProvider {
		ProxyProvider {
			api_key: self.api_key.clone(),
			gateway_host: self.gateway_host.clone(),
			api_base: self.api_base.clone(),
			port_base: self.port_base,
			inventory_port: self.inventory_port,
			timeout: self.timeout(),
		}
	}
}
