mod browser;
mod cli;
mod config;
mod dns;
mod domains;
mod error;
mod experiment;
mod logging;
mod mode;
mod output;
mod probe;
mod session;
mod socks;
mod store;
mod transport;

use clap::Parser;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::ExperimentConfig;
use crate::experiment::{Experiment, ExperimentPlan};
use crate::store::ExperimentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	// Settings: defaults, then file, then environment, then flags
	let mut config = match &cli.config {
		Some(path) => ExperimentConfig::load(path)?,
		None => ExperimentConfig::default(),
	};
	config.apply_env();
	cli.apply_overrides(&mut config);
	config.validate()?;

	let modes = mode::plan_modes(&cli.evasion_params(), cli.baseline_only)?;
	let tls_relaxed = config.fit_tls_to(&modes);
	let domains = domains::load_domains(&cli.domains)?;

	let plan = ExperimentPlan {
		resolver: cli.resolver.clone(),
		browser: cli.browser,
		method: cli.method,
		modes,
		domains,
		probe_between_percent: config.probe_between_percent,
	};

	// Refuse to mix results with an earlier run
	let store = ExperimentStore::create(&cli.experiment)?;
	logging::init(store.root())?;
	if tls_relaxed {
		warn!("Certificate verification disabled: evasion modes present mismatched certificates");
	}

	output::print_config_summary(&cli.experiment, &plan, &config);

	let experiment = Experiment::new(config, plan, store);
	let records = experiment.run().await?;
	info!("Experiment finished with {} worker outcomes", records.len());

	output::print_outcome_table(&records);

	if let Some(path) = &cli.output {
		output::write_csv(path, &records)?;
	}

	Ok(())
}
