//! Browser-exact DoH request shaping.
//!
//! Every request is described by three independent choices: where the
//! connection goes and which TLS name it advertises (decided by the evasion
//! mode), and which header template is sent (decided by profile, method and
//! mode). Both profiles share the routing table; only header selection differs.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::dns::{build_query, QueryShape};
use crate::error::EncodingError;
use crate::mode::{EvasionConfig, Mode};
use crate::transport::{encode_dns_param, Authority, HttpMethod, HttpRequestSpec, Payload};

/// Substring that marks the public resolver given camouflage treatment
pub const PUBLIC_PROVIDER_MARKER: &str = "cloudflare";
/// Canonical hostname of that resolver
pub const PUBLIC_PROVIDER_HOST: &str = "cloudflare-dns.com";
/// Canonical anycast address of that resolver
pub const PUBLIC_PROVIDER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));

pub const DNS_MESSAGE: &str = "application/dns-message";

/// Browser whose DoH client is emulated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserProfile {
	Firefox,
	Chromium,
}

impl FromStr for BrowserProfile {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"firefox" => Ok(BrowserProfile::Firefox),
			"chromium" | "chrome" => Ok(BrowserProfile::Chromium),
			other => Err(format!("unknown browser profile '{}', expected firefox or chromium", other)),
		}
	}
}

impl fmt::Display for BrowserProfile {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BrowserProfile::Firefox => f.write_str("firefox"),
			BrowserProfile::Chromium => f.write_str("chromium"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderTemplate {
	/// Sent by Chromium everywhere and by Firefox on GET and on POSTs from
	/// mode 2 onward
	Chromium,
	/// Firefox's native POST fingerprint
	FirefoxPost,
}

/// Destination, SNI override and whether `host` is sent, for one mode
#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
	destination: Authority,
	sni: Option<String>,
	send_host: bool,
}

fn is_public_provider(resolver: &str) -> bool {
	resolver.contains(PUBLIC_PROVIDER_MARKER)
}

fn route(config: &EvasionConfig, resolver: &str) -> Route {
	let resolver_host = Authority::Host(resolver.to_string());
	let resolver_sni = Some(resolver.to_string());

	match config {
		EvasionConfig::Baseline => Route {
			destination: resolver_host,
			sni: None,
			send_host: true,
		},
		EvasionConfig::DirectIp { pinned_ip } => Route {
			destination: Authority::Ip(*pinned_ip),
			sni: resolver_sni,
			send_host: true,
		},
		EvasionConfig::ShadowIp { shadow_host } => Route {
			destination: Authority::Host(shadow_host.clone()),
			sni: resolver_sni,
			send_host: true,
		},
		EvasionConfig::ShadowSni { spoofed_sni } => {
			let public = is_public_provider(resolver);
			Route {
				destination: if public {
					Authority::Host(PUBLIC_PROVIDER_HOST.to_string())
				} else {
					resolver_host
				},
				sni: Some(spoofed_sni.clone()),
				send_host: !public,
			}
		}
		EvasionConfig::DirectIpAndShadowIp { shadow_ip, .. } => Route {
			destination: Authority::Ip(*shadow_ip),
			sni: resolver_sni,
			send_host: true,
		},
		EvasionConfig::DirectIpAndShadowSni { pinned_ip, spoofed_sni } => {
			let public = is_public_provider(resolver);
			Route {
				destination: Authority::Ip(if public { PUBLIC_PROVIDER_IP } else { *pinned_ip }),
				sni: Some(spoofed_sni.clone()),
				send_host: !public,
			}
		}
	}
}

fn header_template(profile: BrowserProfile, method: HttpMethod, mode: Mode) -> HeaderTemplate {
	match (profile, method, mode) {
		(BrowserProfile::Firefox, HttpMethod::Post, Mode::Baseline | Mode::DirectIp) => HeaderTemplate::FirefoxPost,
		_ => HeaderTemplate::Chromium,
	}
}

fn render_headers(template: HeaderTemplate, host: Option<&str>) -> Vec<(&'static str, String)> {
	let mut headers = Vec::with_capacity(7);
	if let Some(host) = host {
		headers.push(("host", host.to_string()));
	}

	match template {
		HeaderTemplate::Chromium => {
			headers.push(("accept", DNS_MESSAGE.to_string()));
			headers.push(("content-type", DNS_MESSAGE.to_string()));
			headers.push(("accept-language", "*".to_string()));
			headers.push(("user-agent", "Chrome".to_string()));
			headers.push(("accept-encoding", "identity".to_string()));
		}
		HeaderTemplate::FirefoxPost => {
			headers.push(("accept", DNS_MESSAGE.to_string()));
			// empty on purpose: no compression is negotiated
			headers.push(("accept-encoding", String::new()));
			headers.push(("content-type", DNS_MESSAGE.to_string()));
			headers.push(("cache-control", "no-store, no-cache".to_string()));
			headers.push(("pragma", "no-cache".to_string()));
			headers.push(("te", "trailers".to_string()));
		}
	}
	headers
}

impl BrowserProfile {
	/// EDNS layout this browser uses for the given method
	pub fn query_shape(self, method: HttpMethod) -> QueryShape {
		QueryShape::for_request(self, method)
	}

	/// Shape the HTTP request carrying `wire` to `resolver` under `config`.
	pub fn encode(
		self,
		config: &EvasionConfig,
		resolver: &str,
		wire: &[u8],
		method: HttpMethod,
	) -> HttpRequestSpec {
		let route = route(config, resolver);
		let template = header_template(self, method, config.mode());
		let host = route.send_host.then_some(resolver);

		let payload = match method {
			HttpMethod::Post => Payload::Body(wire.to_vec()),
			HttpMethod::Get => Payload::DnsParam(encode_dns_param(wire)),
		};

		HttpRequestSpec {
			destination: route.destination,
			sni: route.sni,
			headers: render_headers(template, host),
			// Firefox's POST path never carries the client's own user agent
			strip_user_agent: self == BrowserProfile::Firefox && method == HttpMethod::Post,
			payload,
		}
	}

	/// Build the DNS query for `domain` and shape the request that carries it.
	pub fn build_request(
		self,
		config: &EvasionConfig,
		resolver: &str,
		domain: &str,
		method: HttpMethod,
	) -> Result<HttpRequestSpec, EncodingError> {
		let wire = build_query(domain, &self.query_shape(method))?;
		Ok(self.encode(config, resolver, &wire, method))
	}
}
