use std::collections::BTreeMap;

use comfy_table::{Table, ContentArrangement, presets::UTF8_FULL};

use anyhow::Result;

use crate::config::ExperimentConfig;
use crate::experiment::{ExperimentPlan, OutcomeRecord, WorkerOutcome};

/// Print a summary of the run configuration before starting.
pub fn print_config_summary(experiment: &str, plan: &ExperimentPlan, config: &ExperimentConfig) {
	println!("DoH Blocking Measurement");
	println!("========================");
	println!("Experiment:     {}", experiment);
	println!("Resolver:       {}", plan.resolver);
	println!("Browser:        {}", plan.browser);
	println!("Method:         {}", plan.method);
	println!("Modes:          {}", plan.modes.len());
	for entry in &plan.modes {
		let mode = entry.mode();
		println!("  - {} ({})", mode, mode.subdir());
	}
	println!("Domains:        {}", plan.domains.len());
	if config.countries.is_empty() {
		println!("Countries:      all offered");
	} else {
		println!("Countries:      {}", config.countries.join(", "));
	}
	println!("Repetitions:    {} ({} s apart)", config.rep_count, config.interval_secs);
	println!("Pool size:      {}", config.pool_size);
	println!("Timeout:        {} s", config.timeout_secs);
	println!("IP cap:         {} per country", config.max_num_ip);
	let verify_label = if config.verify_tls { "yes" } else { "no" };
	println!("Verify TLS:     {}", verify_label);
	println!();
}

/// Worker outcome counts for one country
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CountryTally {
	pub success: usize,
	pub not_valid: usize,
	pub ip_not_found: usize,
	pub duplicate: usize,
	pub unfinished: usize,
}

impl CountryTally {
	fn add(&mut self, outcome: Option<&WorkerOutcome>) {
		match outcome {
			Some(WorkerOutcome::Success(_)) => self.success += 1,
			Some(WorkerOutcome::NotValid) => self.not_valid += 1,
			Some(WorkerOutcome::IpNotFound) => self.ip_not_found += 1,
			Some(WorkerOutcome::DuplicateIp(_)) => self.duplicate += 1,
			None => self.unfinished += 1,
		}
	}

	pub fn total(&self) -> usize {
		self.success + self.not_valid + self.ip_not_found + self.duplicate + self.unfinished
	}
}

/// Count outcomes per country, countries in sorted order.
pub fn tally(records: &[OutcomeRecord]) -> BTreeMap<String, CountryTally> {
	let mut tallies: BTreeMap<String, CountryTally> = BTreeMap::new();
	for r in records {
		tallies.entry(r.country.clone())
			.or_default()
			.add(r.outcome.as_ref());
	}
	tallies
}

/// Print the per-country outcome table.
pub fn print_outcome_table(records: &[OutcomeRecord]) {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec![
		"Country", "Workers", "Success",
		"Not valid", "IP not found", "Duplicate",
		"Unfinished",
	]);

	for (country, t) in tally(records) {
		table.add_row(vec![
			country,
			t.total().to_string(),
			t.success.to_string(),
			t.not_valid.to_string(),
			t.ip_not_found.to_string(),
			t.duplicate.to_string(),
			t.unfinished.to_string(),
		]);
	}

	println!("\nWorker Outcomes");
	println!("===============\n");
	println!("{table}");
}

/// Write one row per worker outcome to a CSV file.
pub fn write_csv(path: &str, records: &[OutcomeRecord]) -> Result<()> {
	let mut writer = csv::Writer::from_path(path)?;

	writer.write_record(["repetition", "country", "port", "outcome", "ip"])?;

	for r in records {
		let outcome = r.outcome.as_ref();
		writer.write_record([
			r.repetition.to_string(),
			r.country.clone(),
			r.port.to_string(),
			outcome.map_or("unfinished", WorkerOutcome::tag).to_string(),
			outcome.and_then(WorkerOutcome::ip).unwrap_or("").to_string(),
		])?;
	}

	writer.flush()?;
	println!("\nOutcomes written to: {}", path);
	Ok(())
}
