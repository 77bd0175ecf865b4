use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::browser::BrowserProfile;
use crate::config::ExperimentConfig;
use crate::error::{StoreError, TransportError};
use crate::logging::{FAILURE, PROGRESS};
use crate::mode::{EvasionConfig, Mode};
use crate::probe::{check_validity, should_probe, Validity};
use crate::session::{Attribution, ProxyProvider};
use crate::store::{ExperimentStore, IpClaim};
use crate::transport::{ClientSettings, DohClient, HttpMethod, HttpRequestSpec};

/// Resolver whose service is unreachable from China, so `CN` is skipped for it
const CN_EXCLUDED_RESOLVER: &str = "dns.google";
/// Pause before asking the provider for its country list again
const COUNTRY_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// What every worker of a run measures
#[derive(Debug, Clone)]
pub struct ExperimentPlan {
	pub resolver: String,
	pub browser: BrowserProfile,
	pub method: HttpMethod,
	pub modes: Vec<EvasionConfig>,
	pub domains: Vec<String>,
	/// Chance (percent) of a validity check before each query
	pub probe_between_percent: u32,
}

impl ExperimentPlan {
	fn mode_tags(&self) -> Vec<Mode> {
		self.modes.iter().map(EvasionConfig::mode).collect()
	}
}

/// Result of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
	Success(String),
	NotValid,
	IpNotFound,
	DuplicateIp(String),
}

impl WorkerOutcome {
	/// Short machine-readable tag used in the CSV export
	pub fn tag(&self) -> &'static str {
		match self {
			WorkerOutcome::Success(_) => "success",
			WorkerOutcome::NotValid => "not_valid",
			WorkerOutcome::IpNotFound => "ip_not_found",
			WorkerOutcome::DuplicateIp(_) => "duplicate_ip",
		}
	}

	pub fn ip(&self) -> Option<&str> {
		match self {
			WorkerOutcome::Success(ip) | WorkerOutcome::DuplicateIp(ip) => Some(ip),
			_ => None,
		}
	}
}

impl fmt::Display for WorkerOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			WorkerOutcome::Success(ip) => write!(f, "{}", ip),
			WorkerOutcome::NotValid => write!(f, "Not valid"),
			WorkerOutcome::IpNotFound => write!(f, "IP not found"),
			WorkerOutcome::DuplicateIp(ip) => write!(f, "Duplicated IP, {}", ip),
		}
	}
}

/// One worker slot as seen after collection. `outcome` is `None` when the
/// worker failed or its collection timed out.
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
	pub repetition: u32,
	pub country: String,
	pub port: u16,
	pub outcome: Option<WorkerOutcome>,
}

/// A network vantage point: the proxied session a worker measures through
pub trait Vantage {
	fn check_validity(&mut self) -> impl Future<Output = Validity> + Send;
	fn attribution(&mut self) -> impl Future<Output = Option<Attribution>> + Send;
	fn query(&mut self, spec: &HttpRequestSpec) -> impl Future<Output = Vec<u8>> + Send;
}

/// Residential proxy session behind one gateway port
pub struct ProxyVantage {
	client: DohClient,
	provider: ProxyProvider,
	country: String,
	port: u16,
	get_percent: u32,
	rng: StdRng,
}

impl ProxyVantage {
	pub fn new(
		config: &ExperimentConfig,
		provider: ProxyProvider,
		country: &str,
		port: u16,
	) -> Result<Self, TransportError> {
		let client = DohClient::new(ClientSettings {
			proxy: Some(provider.gateway_url(country, port)),
			timeout: config.timeout(),
			verify_tls: config.verify_tls,
			http2_only: true,
		})?;
		Ok(ProxyVantage {
			client,
			provider,
			country: country.to_string(),
			port,
			get_percent: config.probe_get_percent,
			rng: StdRng::from_entropy(),
		})
	}
}

impl Vantage for ProxyVantage {
	async fn check_validity(&mut self) -> Validity {
		check_validity(&self.client, self.get_percent, &mut self.rng).await
	}

	async fn attribution(&mut self) -> Option<Attribution> {
		self.provider.lookup_session(&self.country, self.port).await
	}

	async fn query(&mut self, spec: &HttpRequestSpec) -> Vec<u8> {
		self.client.query(spec).await
	}
}

/// Measure every planned mode and domain through one vantage point.
///
/// The vantage must be valid before and after the queries (and at random
/// checks in between); otherwise everything recorded for it is discarded.
pub async fn run_worker<V, R>(
	vantage: &mut V,
	plan: &ExperimentPlan,
	store: &ExperimentStore,
	country: &str,
	rng: &mut R,
) -> Result<WorkerOutcome, StoreError>
where
	V: Vantage + Send,
	R: Rng + Send,
{
	if vantage.check_validity().await == Validity::NotValid {
		return Ok(WorkerOutcome::NotValid);
	}

	let Some(attribution) = vantage.attribution().await else {
		return Ok(WorkerOutcome::IpNotFound);
	};

	let claim = match store.claim(country, &attribution.ip, &plan.mode_tags()) {
		Ok(claim) => claim,
		Err(StoreError::Duplicate(ip)) => return Ok(WorkerOutcome::DuplicateIp(ip)),
		Err(e) => return Err(e),
	};

	// a half-written directory must not count as collected
	let recorded = match record_trials(vantage, plan, &claim, &attribution.isp, rng).await {
		Ok(validity) => validity,
		Err(e) => {
			if let Err(cleanup) = claim.release() {
				warn!("could not discard {}: {}", attribution.ip, cleanup);
			}
			return Err(e);
		}
	};

	if recorded == Validity::NotValid || vantage.check_validity().await == Validity::NotValid {
		claim.release()?;
		return Ok(WorkerOutcome::NotValid);
	}

	Ok(WorkerOutcome::Success(attribution.ip))
}

/// Query every mode and domain into `claim`, then mark the ISP. Stops early
/// with `NotValid` when a check between queries fails.
async fn record_trials<V, R>(
	vantage: &mut V,
	plan: &ExperimentPlan,
	claim: &IpClaim,
	isp: &str,
	rng: &mut R,
) -> Result<Validity, StoreError>
where
	V: Vantage + Send,
	R: Rng + Send,
{
	for config in &plan.modes {
		for (trial, domain) in plan.domains.iter().enumerate() {
			if should_probe(rng, plan.probe_between_percent)
				&& vantage.check_validity().await == Validity::NotValid
			{
				return Ok(Validity::NotValid);
			}

			let response = match plan.browser.build_request(config, &plan.resolver, domain, plan.method) {
				Ok(spec) => vantage.query(&spec).await,
				Err(e) => {
					error!("while encoding a query for {}: {}", domain, e);
					Vec::new()
				}
			};
			claim.write_trial(config.mode(), trial, &response)?;
		}
	}

	claim.write_isp_marker(isp)?;
	Ok(Validity::Valid)
}

/// Whether `country` should be measured against `resolver` at all.
pub fn eligible(country: &str, resolver: &str) -> bool {
	country.chars().count() == 2 && !(country == "CN" && resolver == CN_EXCLUDED_RESOLVER)
}

/// Sorted, de-duplicated countries that have not yet hit the cap.
pub fn remaining_countries(countries: Vec<String>, saturated: &BTreeSet<String>) -> Vec<String> {
	countries.into_iter()
		.collect::<BTreeSet<_>>()
		.difference(saturated)
		.cloned()
		.collect()
}

/// Number of workers to launch for a country, or `None` once it is saturated.
pub fn worker_budget(available: u32, collected: usize, cap: u32) -> Option<u32> {
	let collected = u32::try_from(collected).unwrap_or(u32::MAX);
	if collected >= cap {
		None
	} else {
		Some(available.min(cap - collected))
	}
}

/// Drives the repetition and country loops of one measurement run
pub struct Experiment {
	config: Arc<ExperimentConfig>,
	plan: Arc<ExperimentPlan>,
	store: ExperimentStore,
	provider: ProxyProvider,
	semaphore: Arc<Semaphore>,
}

impl Experiment {
	pub fn new(config: ExperimentConfig, plan: ExperimentPlan, store: ExperimentStore) -> Self {
		let provider = config.provider();
		let semaphore = Arc::new(Semaphore::new(config.pool_size));
		Experiment {
			config: Arc::new(config),
			plan: Arc::new(plan),
			store,
			provider,
			semaphore,
		}
	}

	/// Run all repetitions and return every collected worker outcome.
	pub async fn run(&self) -> Result<Vec<OutcomeRecord>, StoreError> {
		let rep_count = self.config.rep_count;
		let mut saturated = BTreeSet::new();
		let mut records = Vec::new();

		for repetition in 1..=rep_count {
			info!(target: PROGRESS, "Experiment {} / {} now begins", repetition, rep_count);

			let countries = remaining_countries(self.country_list().await, &saturated);
			if countries.is_empty() {
				info!("No available countries left");
				break;
			}

			for country in countries {
				if !eligible(&country, &self.plan.resolver) {
					continue;
				}
				if let Some(done) = self.run_country(repetition, &country, &mut saturated).await? {
					records.extend(done);
				}
			}

			info!(target: PROGRESS, "Experiment {} / {} has ended", repetition, rep_count);

			if repetition < rep_count {
				info!("Sleeping {} seconds before the next repetition", self.config.interval_secs);
				tokio::time::sleep(self.config.interval()).await;
			}
		}

		Ok(records)
	}

	async fn country_list(&self) -> Vec<String> {
		if !self.config.countries.is_empty() {
			return self.config.countries.clone();
		}
		loop {
			match self.provider.countries().await {
				Ok(countries) => return countries,
				Err(e) => {
					error!("during getting the country list: {}", e);
					tokio::time::sleep(COUNTRY_RETRY_PAUSE).await;
				}
			}
		}
	}

	/// Measure one country. Returns `None` when the country was skipped.
	async fn run_country(
		&self,
		repetition: u32,
		country: &str,
		saturated: &mut BTreeSet<String>,
	) -> Result<Option<Vec<OutcomeRecord>>, StoreError> {
		let started = Instant::now();

		let available = match self.provider.available_ips(country).await {
			Ok(n) => n,
			Err(e) => {
				error!("during getting the IP count of {}: {}", country, e);
				return Ok(None);
			}
		};
		if available == 0 {
			info!("No available IP: {}", country);
			return Ok(None);
		}

		let collected_before = self.store.collected(country)?;
		let Some(num_ip) = worker_budget(available, collected_before, self.config.max_num_ip) else {
			info!(target: PROGRESS, "{} hits the limit", country);
			saturated.insert(country.to_string());
			return Ok(None);
		};
		self.store.ensure_country(country)?;

		info!(target: PROGRESS, "{} will try to get {} IPs", country, num_ip);
		let records = self.run_pool(repetition, country, num_ip).await;

		info!(
			target: PROGRESS,
			"{} with {} IPs took {:.1} seconds",
			country, num_ip, started.elapsed().as_secs_f64(),
		);

		let gained = self.store.collected(country)?.saturating_sub(collected_before);
		let missing = (num_ip as usize).saturating_sub(gained);
		info!(target: FAILURE, "{}-{}", country, missing);

		Ok(Some(records))
	}

	/// Spawn one worker per gateway port, at most `pool_size` at a time, and
	/// collect them in spawn order.
	async fn run_pool(&self, repetition: u32, country: &str, num_ip: u32) -> Vec<OutcomeRecord> {
		let mut handles = Vec::new();

		for n in 1..=num_ip {
			let Ok(n) = u16::try_from(n) else { break };
			let port = self.provider.worker_port(n);
			let sem = self.semaphore.clone();
			let config = self.config.clone();
			let plan = self.plan.clone();
			let store = self.store.clone();
			let provider = self.provider.clone();
			let country = country.to_string();

			handles.push((port, tokio::spawn(async move {
				let _permit = sem.acquire_owned().await?;
				let mut vantage = ProxyVantage::new(&config, provider, &country, port)?;
				let mut rng = StdRng::from_entropy();
				let outcome = run_worker(&mut vantage, &plan, &store, &country, &mut rng).await?;
				anyhow::Ok(outcome)
			})));
		}

		let collect_timeout = self.config.timeout() * 3;
		let mut records = Vec::with_capacity(handles.len());
		for (port, handle) in handles {
			let outcome = match tokio::time::timeout(collect_timeout, handle).await {
				Ok(Ok(Ok(outcome))) => {
					info!("Finished case: {}", outcome);
					Some(outcome)
				}
				Ok(Ok(Err(e))) => {
					error!("worker on port {} failed: {}", port, e);
					None
				}
				Ok(Err(e)) => {
					error!("worker task on port {} aborted: {}", port, e);
					None
				}
				Err(_) => {
					warn!("collection of the worker on port {} timed out", port);
					info!(target: PROGRESS, "Timed out waiting for the worker on port {}", port);
					None
				}
			};
			records.push(OutcomeRecord {
				repetition,
				country: country.to_string(),
				port,
				outcome,
			});
		}
		records
	}
}
