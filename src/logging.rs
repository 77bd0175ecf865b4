use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing::{Level, Subscriber};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::StoreError;

/// Target of per-country progress lines (`progress.log`)
pub const PROGRESS: &str = "progress";
/// Target of per-country shortfall lines (`fail.log`)
pub const FAILURE: &str = "failure";

fn log_file(dir: &Path, name: &str) -> Result<Mutex<File>, StoreError> {
	let path = dir.join(name);
	let file = File::create(&path).map_err(|e| StoreError::io(path, e))?;
	Ok(Mutex::new(file))
}

/// Subscriber writing the three experiment logs into `dir`, plus the console
/// when `console` is set (filtered by `RUST_LOG`, default `info`).
///
/// `exceptions.log` takes warnings and errors from every target,
/// `progress.log` and `fail.log` only their own target.
pub fn subscriber(dir: &Path, console: bool) -> Result<impl Subscriber + Send + Sync, StoreError> {
	let console_layer = console.then(|| {
		let filter = EnvFilter::try_from_default_env()
			.unwrap_or_else(|_| EnvFilter::new("info"));
		fmt::layer().with_target(false).with_filter(filter)
	});

	let exceptions = fmt::layer()
		.with_ansi(false)
		.with_writer(log_file(dir, "exceptions.log")?)
		.with_filter(LevelFilter::WARN);

	let progress = fmt::layer()
		.with_ansi(false)
		.with_target(false)
		.with_writer(log_file(dir, "progress.log")?)
		.with_filter(Targets::new().with_target(PROGRESS, Level::INFO));

	// bare "<CC>-<missing>" lines
	let failure = fmt::layer()
		.with_ansi(false)
		.without_time()
		.with_level(false)
		.with_target(false)
		.with_writer(log_file(dir, "fail.log")?)
		.with_filter(Targets::new().with_target(FAILURE, Level::INFO));

	Ok(tracing_subscriber::registry()
		.with(console_layer)
		.with(exceptions)
		.with(progress)
		.with(failure))
}

/// Install the experiment subscriber as the process-wide default.
pub fn init(dir: &Path) -> anyhow::Result<()> {
	subscriber(dir, true)?.try_init()?;
	Ok(())
}
