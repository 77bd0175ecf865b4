use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::StoreError;
use crate::mode::Mode;

/// On-disk tree of one experiment:
/// `<root>/<country>/<ip>/<mode-subdir>/<trial>` plus `<ip>/isp_<label>`.
#[derive(Debug, Clone)]
pub struct ExperimentStore {
	root: PathBuf,
}

impl ExperimentStore {
	/// Create the experiment directory. Fails if it already exists so two runs
	/// never mix results.
	pub fn create(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let root = root.into();
		match fs::create_dir(&root) {
			Ok(()) => Ok(ExperimentStore { root }),
			Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::ExperimentExists(root)),
			Err(e) => Err(StoreError::io(root, e)),
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn country_dir(&self, country: &str) -> PathBuf {
		self.root.join(country)
	}

	/// Create the country directory if missing.
	pub fn ensure_country(&self, country: &str) -> Result<(), StoreError> {
		let dir = self.country_dir(country);
		match fs::create_dir(&dir) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
			Err(e) => Err(StoreError::io(dir, e)),
		}
	}

	/// Number of IP directories already collected for `country`.
	pub fn collected(&self, country: &str) -> Result<usize, StoreError> {
		let dir = self.country_dir(country);
		match fs::read_dir(&dir) {
			Ok(entries) => Ok(entries.filter_map(Result::ok).count()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
			Err(e) => Err(StoreError::io(dir, e)),
		}
	}

	/// Atomically claim `<country>/<ip>` and lay out one sub-directory per mode.
	///
	/// Directory creation is the lock: exactly one concurrent caller succeeds,
	/// every other gets `StoreError::Duplicate` and has created nothing.
	pub fn claim(&self, country: &str, ip: &str, modes: &[Mode]) -> Result<IpClaim, StoreError> {
		let dir = self.country_dir(country).join(single_component(ip)?);

		match fs::create_dir(&dir) {
			Ok(()) => {}
			Err(e) if e.kind() == ErrorKind::AlreadyExists => {
				return Err(StoreError::Duplicate(ip.to_string()));
			}
			Err(e) => return Err(StoreError::io(dir, e)),
		}

		let claim = IpClaim { dir, ip: ip.to_string() };
		for mode in modes {
			let sub = claim.dir.join(mode.subdir());
			if let Err(e) = fs::create_dir(&sub) {
				// we own the directory, so nothing else can be inside it yet
				let _ = fs::remove_dir_all(&claim.dir);
				return Err(StoreError::io(sub, e));
			}
		}
		Ok(claim)
	}
}

fn single_component(name: &str) -> Result<&str, StoreError> {
	let mut components = Path::new(name).components();
	match (components.next(), components.next()) {
		(Some(Component::Normal(_)), None) => Ok(name),
		_ => Err(StoreError::io(
			name,
			std::io::Error::new(ErrorKind::InvalidInput, "not a single path component"),
		)),
	}
}

/// Exclusive ownership of one `<country>/<ip>` result directory
#[derive(Debug)]
pub struct IpClaim {
	dir: PathBuf,
	ip: String,
}

impl IpClaim {
	/// Persist the raw response of trial `trial` under `mode`.
	pub fn write_trial(&self, mode: Mode, trial: usize, bytes: &[u8]) -> Result<(), StoreError> {
		let path = self.dir.join(mode.subdir()).join(trial.to_string());
		fs::write(&path, bytes).map_err(|e| StoreError::io(path, e))
	}

	/// Empty `isp_<label>` marker file.
	pub fn write_isp_marker(&self, isp: &str) -> Result<(), StoreError> {
		let path = self.dir.join(format!("isp_{}", isp));
		fs::write(&path, b"").map_err(|e| StoreError::io(path, e))
	}

	/// Drop everything recorded for this IP (the vantage point went dead).
	pub fn release(self) -> Result<(), StoreError> {
		debug!("discarding results of {}", self.ip);
		fs::remove_dir_all(&self.dir).map_err(|e| StoreError::io(self.dir.clone(), e))
	}
}

#[cfg(test)]
impl IpClaim {
	pub fn ip(&self) -> &str {
		&self.ip
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Barrier};
	use std::thread;

	fn store() -> (tempfile::TempDir, ExperimentStore) {
		let tmp = tempfile::tempdir().unwrap();
		let store = ExperimentStore::create(tmp.path().join("TFC_TEST")).unwrap();
		store.ensure_country("KZ").unwrap();
		(tmp, store)
	}

	#[test]
	fn test_create_twice_fails() {
		let (_tmp, store) = store();
		let again = ExperimentStore::create(store.root());
		assert!(matches!(again, Err(StoreError::ExperimentExists(_))));
	}

	#[test]
	fn test_layout() {
		let (_tmp, store) = store();
		let claim = store.claim("KZ", "203.0.113.9", &[Mode::Baseline, Mode::ShadowSni]).unwrap();
		claim.write_trial(Mode::Baseline, 0, b"\x00\x00\x81\x80").unwrap();
		claim.write_trial(Mode::ShadowSni, 3, b"").unwrap();
		claim.write_isp_marker("Kazakhtelecom_JSC").unwrap();

		let dir = store.country_dir("KZ").join("203.0.113.9");
		assert_eq!(fs::read(dir.join("bl").join("0")).unwrap(), b"\x00\x00\x81\x80");
		assert_eq!(fs::read(dir.join("sni").join("3")).unwrap(), b"");
		assert!(dir.join("isp_Kazakhtelecom_JSC").is_file());
		assert!(!dir.join("rr").exists());
		assert_eq!(store.collected("KZ").unwrap(), 1);
	}

	#[test]
	fn test_duplicate_claim() {
		let (_tmp, store) = store();
		let _first = store.claim("KZ", "198.51.100.4", &[Mode::Baseline]).unwrap();
		let second = store.claim("KZ", "198.51.100.4", &[Mode::Baseline]);
		assert!(matches!(second, Err(StoreError::Duplicate(ip)) if ip == "198.51.100.4"));
	}

	#[test]
	fn test_release_removes_directory() {
		let (_tmp, store) = store();
		let claim = store.claim("KZ", "198.51.100.4", &[Mode::Baseline]).unwrap();
		claim.write_trial(Mode::Baseline, 0, b"x").unwrap();
		let dir = claim.dir().to_path_buf();
		claim.release().unwrap();
		assert!(!dir.exists());
		assert_eq!(store.collected("KZ").unwrap(), 0);
	}

	#[test]
	fn test_collected_missing_country() {
		let (_tmp, store) = store();
		assert_eq!(store.collected("ZW").unwrap(), 0);
	}

	#[test]
	fn test_rejects_path_like_ip() {
		let (_tmp, store) = store();
		assert!(store.claim("KZ", "../escape", &[]).is_err());
		assert!(store.claim("KZ", "..", &[]).is_err());
	}

	#[test]
	fn test_concurrent_claims_single_winner() {
		let (_tmp, store) = store();
		let workers = 16;
		let barrier = Arc::new(Barrier::new(workers));
		let modes = Mode::ALL;

		let handles: Vec<_> = (0..workers)
			.map(|_| {
				let store = store.clone();
				let barrier = barrier.clone();
				thread::spawn(move || {
					barrier.wait();
					store.claim("KZ", "192.0.2.55", &modes).map(|c| c.ip().to_string())
				})
			})
			.collect();

		let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
		let winners = results.iter().filter(|r| r.is_ok()).count();
		let duplicates = results.iter()
			.filter(|r| matches!(r, Err(StoreError::Duplicate(_))))
			.count();
		assert_eq!(winners, 1);
		assert_eq!(duplicates, workers - 1);

		let dir = store.country_dir("KZ").join("192.0.2.55");
		for mode in Mode::ALL {
			assert!(dir.join(mode.subdir()).is_dir());
		}
	}
}
