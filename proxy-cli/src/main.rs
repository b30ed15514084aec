//! Thin CLI entrypoint (§10.6): argument parsing, logging init, signal
//! handling, and mapping typed startup errors to a process exit code. All
//! proxy logic lives in `proxy_core`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use proxy_core::{config, telemetry, version};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "proxy-cli", about, version = version::VERSION)]
struct Args {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Runs the reverse proxy until SIGTERM/SIGINT.
	ReverseProxy {
		#[arg(short, long, value_name = "file", default_value = "config.yaml")]
		config: PathBuf,
	},
	/// Loads and validates configuration, printing the sanitized, merged YAML.
	DumpConfig {
		#[arg(short, long, value_name = "file", default_value = "config.yaml")]
		config: PathBuf,
	},
}

fn main() -> ExitCode {
	telemetry::init();

	let args = Args::parse();
	let result = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("failed to build the tokio runtime")
		.block_on(run(args));

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!(error = %err, "exiting with an error");
			ExitCode::FAILURE
		},
	}
}

async fn run(args: Args) -> anyhow::Result<()> {
	match args.command {
		Command::ReverseProxy { config: path } => reverse_proxy(path).await,
		Command::DumpConfig { config: path } => dump_config(path),
	}
}

async fn reverse_proxy(path: PathBuf) -> anyhow::Result<()> {
	let contents = std::fs::read_to_string(&path)
		.map_err(|err| anyhow::anyhow!("reading config {path:?}: {err}"))?;
	let cfg = config::load(&contents)?;

	let cancel = CancellationToken::new();
	let shutdown = cancel.clone();
	tokio::spawn(async move {
		wait_for_shutdown_signal().await;
		info!("shutdown signal received");
		shutdown.cancel();
	});

	info!(version = %version::long_version(), "starting");
	proxy_core::run(Some(cfg), cancel).await?;
	Ok(())
}

fn dump_config(path: PathBuf) -> anyhow::Result<()> {
	let contents = std::fs::read_to_string(&path)
		.map_err(|err| anyhow::anyhow!("reading config {path:?}: {err}"))?;
	let cfg = config::load(&contents)?;
	println!("{}", config::dump_sanitized(&cfg)?);
	Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
	let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
	tokio::select! {
		_ = sigterm.recv() => {},
		_ = sigint.recv() => {},
	}
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
}
