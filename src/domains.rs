use anyhow::{anyhow, Result};

/// Name that selects the built-in list instead of a file
pub const EXAMPLE_LIST: &str = "example";

/// Built-in test list: a control domain plus sites commonly filtered at the
/// DNS layer (news, social, messaging, circumvention).
pub fn example_domains() -> Vec<String> {
	vec![
		"example.com",
		"wikipedia.org",
		"google.com",
		"youtube.com",
		"facebook.com",
		"instagram.com",
		"twitter.com",
		"telegram.org",
		"signal.org",
		"whatsapp.com",
		"bbc.com",
		"nytimes.com",
		"dw.com",
		"rferl.org",
		"amnesty.org",
		"hrw.org",
		"torproject.org",
		"psiphon.ca",
		"protonvpn.com",
		"github.com",
	].into_iter().map(String::from).collect()
}

/// Read domains from a file, one per line.
///
/// Blank lines and lines starting with '#' are skipped.
pub fn read_domain_file(path: &str) -> Result<Vec<String>> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| anyhow!("failed to read domain file '{}': {}", path, e))?;
	let domains: Vec<String> = content.lines()
		.map(|line| line.trim().to_string())
		.filter(|line| !line.is_empty() && !line.starts_with('#'))
		.collect();
	Ok(domains)
}

/// Resolve the `--domains` argument: the built-in list or a file path.
pub fn load_domains(source: &str) -> Result<Vec<String>> {
	let domains = if source == EXAMPLE_LIST {
		example_domains()
	} else {
		read_domain_file(source)?
	};
	if domains.is_empty() {
		return Err(anyhow!("domain list '{}' is empty", source));
	}
	Ok(domains)
}
