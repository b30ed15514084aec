//! Build-info reporting (§10.6), surfaced by the CLI's `--version` flag.

/// The crate version baked in at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A one-line `name version` string suitable for `--version` output.
pub fn long_version() -> String {
	format!("{} {}", env!("CARGO_PKG_NAME"), VERSION)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn long_version_includes_the_crate_version() {
		assert!(long_version().contains(VERSION));
	}
}
