use std::net::IpAddr;

use clap::Parser;

use crate::browser::BrowserProfile;
use crate::config::ExperimentConfig;
use crate::mode::EvasionParams;
use crate::transport::HttpMethod;

/// DoH blocking measurement through residential proxies
#[derive(Parser, Debug)]
#[command(name = "doh-fingerprint-probe")]
#[command(about = "Measure DoH resolver blocking with browser-exact queries from residential vantage points")]
pub struct Cli {
	/// Experiment directory to create (must not exist yet)
	pub experiment: String,

	/// Hostname of the DoH resolver under test
	pub resolver: String,

	/// Connect to this resolver address instead of resolving the hostname
	#[arg(long = "resolver-ip")]
	pub resolver_ip: Option<IpAddr>,

	/// Alternate hostname serving the same resolver
	#[arg(long = "shadow-resolver")]
	pub shadow_resolver: Option<String>,

	/// Address of the shadow resolver (requires --shadow-resolver)
	#[arg(long = "shadow-resolver-ip")]
	pub shadow_resolver_ip: Option<IpAddr>,

	/// Server name to advertise in the TLS ClientHello
	#[arg(long = "sni")]
	pub sni: Option<String>,

	/// Domain list: "example" for the built-in list, or a file path
	#[arg(short = 'd', long = "domains", default_value = "example")]
	pub domains: String,

	/// HTTP method carrying the DNS message (POST or GET)
	#[arg(short = 'm', long = "method", default_value = "POST")]
	pub method: HttpMethod,

	/// Browser to emulate (firefox or chromium)
	#[arg(short = 'b', long = "browser", default_value = "firefox")]
	pub browser: BrowserProfile,

	/// Only run the baseline mode
	#[arg(long = "baseline-only")]
	pub baseline_only: bool,

	/// TOML configuration file
	#[arg(short = 'c', long = "config")]
	pub config: Option<String>,

	/// Proxy provider API key (overrides the config file and PROXY_API_KEY)
	#[arg(long = "api-key")]
	pub api_key: Option<String>,

	/// Countries to measure, comma separated (default: all the provider offers)
	#[arg(long = "countries", value_delimiter = ',')]
	pub countries: Vec<String>,

	/// Number of passes over the country list
	#[arg(short = 'n', long = "rep-count")]
	pub rep_count: Option<u32>,

	/// Maximum concurrent workers
	#[arg(short = 'p', long = "pool-size")]
	pub pool_size: Option<usize>,

	/// Request timeout in seconds
	#[arg(short = 't', long = "timeout")]
	pub timeout: Option<u64>,

	/// Per-country cap on collected IPs
	#[arg(long = "max-ips")]
	pub max_ips: Option<u32>,

	/// Skip certificate verification of resolvers
	#[arg(long = "insecure")]
	pub insecure: bool,

	/// Output CSV file path for worker outcomes
	#[arg(short = 'o', long = "output")]
	pub output: Option<String>,
}

impl Cli {
	pub fn evasion_params(&self) -> EvasionParams {
		EvasionParams {
			pinned_ip: self.resolver_ip,
			shadow_host: self.shadow_resolver.clone(),
			shadow_ip: self.shadow_resolver_ip,
			spoofed_sni: self.sni.clone(),
		}
	}

	/// Let command-line flags take precedence over file and defaults.
	pub fn apply_overrides(&self, config: &mut ExperimentConfig) {
		if let Some(key) = &self.api_key {
			config.api_key = key.clone();
		}
		if !self.countries.is_empty() {
			config.countries = self.countries.iter()
				.map(|c| c.trim().to_ascii_uppercase())
				.collect();
		}
		if let Some(n) = self.rep_count {
			config.rep_count = n;
		}
		if let Some(n) = self.pool_size {
			config.pool_size = n;
		}
		if let Some(secs) = self.timeout {
			config.timeout_secs = secs;
		}
		if let Some(n) = self.max_ips {
			config.max_num_ip = n;
		}
		if self.insecure {
			config.verify_tls = false;
		}
	}
}
