use std::future::Future;

use rand::Rng;
use tracing::{debug, error};

use crate::error::TransportError;
use crate::transport::DohClient;

/// First site checked for connectivity
pub const PRIMARY_SITE: &str = "https://www.yahoo.com/";
/// Site checked when the first one fails
pub const FALLBACK_SITE: &str = "https://www.bing.com/";

/// Outcome of a connectivity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
	Valid,
	NotValid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
	Head,
	Get,
}

/// Something that can fetch the status code of a URL
pub trait StatusProbe {
	fn status(&self, method: ProbeMethod, url: &str)
		-> impl Future<Output = Result<u16, TransportError>> + Send;
}

impl StatusProbe for DohClient {
	async fn status(&self, method: ProbeMethod, url: &str) -> Result<u16, TransportError> {
		let client = self.http();
		let request = match method {
			ProbeMethod::Head => client.head(url),
			ProbeMethod::Get => client.get(url),
		};
		let response = request.headers(self.default_headers().clone()).send().await?;
		Ok(response.status().as_u16())
	}
}

/// HEAD with probability `1 - get_percent/100`, GET otherwise.
pub fn choose_method<R: Rng + ?Sized>(rng: &mut R, get_percent: u32) -> ProbeMethod {
	if rng.gen_range(1..=100) > get_percent {
		ProbeMethod::Head
	} else {
		ProbeMethod::Get
	}
}

/// Whether to run an extra check before the next query.
pub fn should_probe<R: Rng + ?Sized>(rng: &mut R, percent: u32) -> bool {
	rng.gen_range(1..=100) <= percent
}

/// Check that the current vantage point can reach the web at all.
///
/// A status of 400 or above, or any transport failure, on the primary site is
/// inconclusive and falls back to the second site under the same method
/// policy. Only a failure there too yields `NotValid`.
pub async fn check_validity<P, R>(probe: &P, get_percent: u32, rng: &mut R) -> Validity
where
	P: StatusProbe + ?Sized,
	R: Rng + ?Sized,
{
	let method = choose_method(rng, get_percent);
	if probe_site(probe, method, PRIMARY_SITE).await {
		return Validity::Valid;
	}

	let method = choose_method(rng, get_percent);
	if probe_site(probe, method, FALLBACK_SITE).await {
		Validity::Valid
	} else {
		Validity::NotValid
	}
}

async fn probe_site<P: StatusProbe + ?Sized>(probe: &P, method: ProbeMethod, site: &str) -> bool {
	match probe.status(method, site).await {
		Ok(status) if status < 400 => true,
		Ok(status) => {
			debug!("validity check {:?} {} returned {}", method, site, status);
			false
		}
		Err(e) => {
			error!("during the validity check against {}: {}", site, e);
			false
		}
	}
}
