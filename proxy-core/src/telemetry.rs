//! Logging initialization (§10.1): a `tracing-subscriber` `fmt` layer driven
//! by `RUST_LOG`, defaulting to `info`, writing structured lines to stderr.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. Must be called once, as early
/// as possible in the process's lifetime (idempotent calls after the first
/// are a programming error and will panic, matching `tracing`'s own
/// contract).
pub fn init() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();
}
