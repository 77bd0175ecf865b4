use std::path::PathBuf;

use thiserror::Error;

/// Contradictory or out-of-range settings. Always fatal before any worker starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error(
		"invalid evasion parameters (pinned ip: {pinned_ip}, shadow host: {shadow_host}, \
		 shadow ip: {shadow_ip}, sni: {sni})"
	)]
	InvalidCombination {
		pinned_ip: bool,
		shadow_host: bool,
		shadow_ip: bool,
		sni: bool,
	},

	#[error("{name} must be between 0 and 100, got {value}")]
	Percentage { name: &'static str, value: u32 },

	#[error("{0}")]
	Invalid(String),
}

/// Malformed domain or wire serialization failure for a single query.
#[derive(Error, Debug)]
pub enum EncodingError {
	#[error("invalid domain name '{domain}': {reason}")]
	Domain { domain: String, reason: String },

	#[error("failed to serialize DNS query: {0}")]
	Serialize(String),
}

/// Network failure on any HTTP call. Recoverable: callers degrade it to a sentinel.
#[derive(Error, Debug)]
pub enum TransportError {
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("TLS setup failed: {0}")]
	Tls(#[from] rustls::Error),

	#[error("could not resolve destination '{host}': {reason}")]
	Resolve { host: String, reason: String },

	#[error("invalid header '{name}': {reason}")]
	Header { name: String, reason: String },

	#[error("invalid URL: {0}")]
	Url(String),

	#[error("connection failed: {0}")]
	Io(#[from] std::io::Error),

	#[error("SOCKS5 proxy: {0}")]
	Socks(String),

	#[error("invalid TLS server name '{0}'")]
	ServerName(String),

	#[error("HTTP/2 error: {0}")]
	H2(#[from] h2::Error),

	#[error("malformed request: {0}")]
	Request(#[from] http::Error),

	#[error("timed out after {0:?}")]
	Timeout(std::time::Duration),
}

/// Failures of the on-disk result layout.
#[derive(Error, Debug)]
pub enum StoreError {
	/// Another worker already claimed this directory. Expected under concurrency.
	#[error("duplicate ip: {0}")]
	Duplicate(String),

	#[error("experiment directory already exists: {0}")]
	ExperimentExists(PathBuf),

	#[error("IO error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

impl StoreError {
	pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		StoreError::Io { path: path.into(), source }
	}
}
