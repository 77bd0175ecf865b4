use std::fmt;
use std::net::IpAddr;

use crate::error::ConfigError;

/// Optional evasion parameters as supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvasionParams {
	/// Literal address to connect to instead of resolving the resolver host
	pub pinned_ip: Option<IpAddr>,
	/// Alternate hostname that serves the same resolver
	pub shadow_host: Option<String>,
	/// Address of the shadow host
	pub shadow_ip: Option<IpAddr>,
	/// Server name to advertise in the TLS ClientHello
	pub spoofed_sni: Option<String>,
}

/// Tag of the six evasion modes, numbered as in the result layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
	Baseline = 0,
	DirectIp = 1,
	ShadowIp = 2,
	ShadowSni = 3,
	DirectIpAndShadowIp = 4,
	DirectIpAndShadowSni = 5,
}

impl Mode {
	pub const ALL: [Mode; 6] = [
		Mode::Baseline,
		Mode::DirectIp,
		Mode::ShadowIp,
		Mode::ShadowSni,
		Mode::DirectIpAndShadowIp,
		Mode::DirectIpAndShadowSni,
	];

	/// Sub-directory holding this mode's trial files
	pub fn subdir(self) -> &'static str {
		match self {
			Mode::Baseline => "bl",
			Mode::DirectIp => "rr",
			Mode::ShadowIp => "sr",
			Mode::ShadowSni => "sni",
			Mode::DirectIpAndShadowIp => "rrsr",
			Mode::DirectIpAndShadowSni => "rrsni",
		}
	}
}

impl fmt::Display for Mode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Mode::Baseline => "baseline",
			Mode::DirectIp => "direct-ip",
			Mode::ShadowIp => "shadow-ip",
			Mode::ShadowSni => "shadow-sni",
			Mode::DirectIpAndShadowIp => "direct-ip+shadow-ip",
			Mode::DirectIpAndShadowSni => "direct-ip+shadow-sni",
		};
		f.write_str(name)
	}
}

/// A validated evasion configuration. Each variant carries exactly the
/// parameters its mode uses, so an invalid combination cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvasionConfig {
	Baseline,
	DirectIp { pinned_ip: IpAddr },
	ShadowIp { shadow_host: String },
	ShadowSni { spoofed_sni: String },
	DirectIpAndShadowIp { shadow_host: String, shadow_ip: IpAddr },
	DirectIpAndShadowSni { pinned_ip: IpAddr, spoofed_sni: String },
}

impl EvasionConfig {
	pub fn mode(&self) -> Mode {
		match self {
			EvasionConfig::Baseline => Mode::Baseline,
			EvasionConfig::DirectIp { .. } => Mode::DirectIp,
			EvasionConfig::ShadowIp { .. } => Mode::ShadowIp,
			EvasionConfig::ShadowSni { .. } => Mode::ShadowSni,
			EvasionConfig::DirectIpAndShadowIp { .. } => Mode::DirectIpAndShadowIp,
			EvasionConfig::DirectIpAndShadowSni { .. } => Mode::DirectIpAndShadowSni,
		}
	}
}

/// Classify a parameter set into exactly one of the six modes.
///
/// Presence of each parameter drives the match; any combination outside the
/// six rows is rejected rather than coerced.
pub fn resolve_mode(params: &EvasionParams) -> Result<EvasionConfig, ConfigError> {
	let EvasionParams { pinned_ip, shadow_host, shadow_ip, spoofed_sni } = params;

	let config = match (pinned_ip, shadow_host, shadow_ip, spoofed_sni) {
		(None, None, None, None) => EvasionConfig::Baseline,
		(Some(ip), None, None, None) => EvasionConfig::DirectIp { pinned_ip: *ip },
		(None, Some(host), None, None) => EvasionConfig::ShadowIp {
			shadow_host: host.clone(),
		},
		(None, None, None, Some(sni)) => EvasionConfig::ShadowSni {
			spoofed_sni: sni.clone(),
		},
		(None, Some(host), Some(ip), None) => EvasionConfig::DirectIpAndShadowIp {
			shadow_host: host.clone(),
			shadow_ip: *ip,
		},
		(Some(ip), None, None, Some(sni)) => EvasionConfig::DirectIpAndShadowSni {
			pinned_ip: *ip,
			spoofed_sni: sni.clone(),
		},
		_ => {
			return Err(ConfigError::InvalidCombination {
				pinned_ip: pinned_ip.is_some(),
				shadow_host: shadow_host.is_some(),
				shadow_ip: shadow_ip.is_some(),
				sni: spoofed_sni.is_some(),
			});
		}
	};
	Ok(config)
}

/// Derive the ordered list of configurations one worker runs from the
/// experiment-wide parameters.
///
/// Baseline always runs; every other mode runs when all of its parameters were
/// supplied. Each entry goes through `resolve_mode` on its own subset.
pub fn plan_modes(params: &EvasionParams, baseline_only: bool) -> Result<Vec<EvasionConfig>, ConfigError> {
	if params.shadow_ip.is_some() && params.shadow_host.is_none() {
		return Err(ConfigError::Invalid(
			"a shadow resolver IP requires a shadow resolver hostname".to_string(),
		));
	}

	let mut subsets = vec![EvasionParams::default()];
	if !baseline_only {
		if let Some(ip) = params.pinned_ip {
			subsets.push(EvasionParams { pinned_ip: Some(ip), ..Default::default() });
		}
		if let Some(host) = &params.shadow_host {
			subsets.push(EvasionParams { shadow_host: Some(host.clone()), ..Default::default() });
		}
		if let Some(sni) = &params.spoofed_sni {
			subsets.push(EvasionParams { spoofed_sni: Some(sni.clone()), ..Default::default() });
		}
		if let (Some(host), Some(ip)) = (&params.shadow_host, params.shadow_ip) {
			subsets.push(EvasionParams {
				shadow_host: Some(host.clone()),
				shadow_ip: Some(ip),
				..Default::default()
			});
		}
		if let (Some(ip), Some(sni)) = (params.pinned_ip, &params.spoofed_sni) {
			subsets.push(EvasionParams {
				pinned_ip: Some(ip),
				spoofed_sni: Some(sni.clone()),
				..Default::default()
			});
		}
	}

	subsets.iter().map(resolve_mode).collect()
}
