//! Server orchestrator (§4.1, C6): builds proxychains, listeners and
//! backends from a validated [`Config`] and runs them until cancelled.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backend::Backend;
use crate::config::{Config, ListenerType};
use crate::error::ServerError;
use crate::listener::HttpEdgeListener;
use crate::proxychain::{self, Dialer};
use crate::trie::Matcher;

/// Runs the proxy until `cancel` fires. Returns `Ok(())` on clean shutdown,
/// or the first startup error encountered while wiring the configuration
/// (§4.1's fail-fast algorithm — nothing partially started is left running).
pub async fn run(config: Option<Config>, cancel: CancellationToken) -> Result<(), ServerError> {
	let config = config.ok_or(ServerError::NilConfig)?;

	let dialers = build_proxychains(&config)?;
	check_listener_keys(&config)?;
	let mut matchers = wire_sites(&config, &dialers)?;

	let mut handles: Vec<JoinHandle<std::io::Result<()>>> = Vec::new();
	for (name, listener_config) in &config.listeners {
		let sites = Arc::new(matchers.remove(name).unwrap_or_default());
		let addr = listener_config.listen_addr.host_port();
		match listener_config.listen_type {
			ListenerType::HttpEdge => {
				let listener = match HttpEdgeListener::bind(name.clone(), &addr, sites).await {
					Ok(listener) => listener,
					Err(source) => {
						// Fail fast: nothing partially started is left running (§4.1).
						for handle in &handles {
							handle.abort();
						}
						return Err(ServerError::ListenerBindFailed {
							name: name.clone(),
							addr,
							source,
						});
					},
				};
				let token = cancel.clone();
				handles.push(tokio::spawn(async move { listener.serve(token).await }));
			},
		}
	}

	info!(listeners = handles.len(), "server started");
	cancel.cancelled().await;

	for handle in handles {
		match handle.await {
			Ok(Ok(())) => {},
			Ok(Err(err)) => error!(error = %err, "listener exited with an I/O error"),
			Err(join_err) => error!(error = %join_err, "listener task panicked"),
		}
	}

	Ok(())
}

fn build_proxychains(config: &Config) -> Result<HashMap<String, Arc<dyn Dialer>>, ServerError> {
	let mut dialers = HashMap::new();
	for (name, hops) in &config.proxychains {
		let urls: Vec<_> = hops.iter().map(|h| h.proxy.clone()).collect();
		let dialer = proxychain::build(&urls)?;
		dialers.insert(name.clone(), dialer);
	}
	Ok(dialers)
}

/// Enforces invariant 1 (§3): every `(addr, network)` key used by a listener
/// must be unique, and two names cannot disagree about the type bound there.
fn check_listener_keys(config: &Config) -> Result<(), ServerError> {
	let mut keys: HashMap<(String, String), (String, ListenerType)> = HashMap::new();
	for (name, listener_config) in &config.listeners {
		let key = (
			listener_config.listen_addr.host_port(),
			listener_config.listen_addr.network.clone(),
		);
		if let Some((existing_name, existing_type)) = keys.get(&key) {
			let reason = if *existing_type != listener_config.listen_type {
				format!("listener {existing_name:?} and {name:?} bind the same address with different types")
			} else {
				format!("listener {existing_name:?} and {name:?} both bind {key:?}")
			};
			return Err(ServerError::DuplicateListeners {
				key: format!("{}/{}", key.0, key.1),
				reason,
			});
		}
		keys.insert(key, (name.clone(), listener_config.listen_type));
	}
	Ok(())
}

/// Builds one backend per site and attaches it to the trie of every listener
/// the site names, enforcing invariants 2-4 (§3).
fn wire_sites(
	config: &Config,
	dialers: &HashMap<String, Arc<dyn Dialer>>,
) -> Result<HashMap<String, Matcher<Backend>>, ServerError> {
	let mut matchers: HashMap<String, Matcher<Backend>> = HashMap::new();
	let mut seen_host_listener: HashSet<(String, String)> = HashSet::new();

	for site in &config.sites {
		let dialer = dialers
			.get(&site.proxychain)
			.ok_or_else(|| ServerError::ProxychainNotFound {
				name: site.proxychain.clone(),
			})?
			.clone();

		let backend = Arc::new(Backend::new(site.host.clone(), site.backend.clone(), dialer));

		for listener_name in &site.listeners {
			if !config.listeners.contains_key(listener_name) {
				return Err(ServerError::ListenerNotFound {
					name: listener_name.clone(),
				});
			}

			let clash_key = (listener_name.clone(), site.host.clone());
			if !seen_host_listener.insert(clash_key) {
				return Err(ServerError::HostListenerClash {
					listener: listener_name.clone(),
					host: site.host.clone(),
				});
			}

			matchers
				.entry(listener_name.clone())
				.or_default()
				.insert(&site.host, backend.clone());
		}
	}

	Ok(matchers)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::load;

	fn config(yaml: &str) -> Config {
		load(yaml).unwrap()
	}

	#[tokio::test]
	async fn nil_config_is_rejected() {
		let cancel = CancellationToken::new();
		let err = run(None, cancel).await.unwrap_err();
		assert!(matches!(err, ServerError::NilConfig));
	}

	#[tokio::test]
	async fn missing_proxychain_is_rejected() {
		let cfg = config(
			r#"
listeners:
  edge:
    listen_addr: "127.0.0.1:0"
    listen_type: http-edge
sites:
  - listener: [edge]
    host: example.test
    proxychain: nonexistent
    backend:
      target: "127.0.0.1:9001"
"#,
		);
		let cancel = CancellationToken::new();
		let err = run(Some(cfg), cancel).await.unwrap_err();
		assert!(matches!(err, ServerError::ProxychainNotFound { .. }));
	}

	#[tokio::test]
	async fn missing_listener_is_rejected() {
		let cfg = config(
			r#"
proxychains:
  direct:
    - proxy: direct
sites:
  - listener: [nonexistent]
    host: example.test
    proxychain: direct
    backend:
      target: "127.0.0.1:9001"
"#,
		);
		let cancel = CancellationToken::new();
		let err = run(Some(cfg), cancel).await.unwrap_err();
		assert!(matches!(err, ServerError::ListenerNotFound { .. }));
	}

	#[tokio::test]
	async fn duplicate_host_listener_pair_is_rejected() {
		let cfg = config(
			r#"
proxychains:
  direct:
    - proxy: direct
listeners:
  edge:
    listen_addr: "127.0.0.1:0"
    listen_type: http-edge
sites:
  - listener: [edge]
    host: example.test
    proxychain: direct
    backend:
      target: "127.0.0.1:9001"
  - listener: [edge]
    host: example.test
    proxychain: direct
    backend:
      target: "127.0.0.1:9002"
"#,
		);
		let cancel = CancellationToken::new();
		let err = run(Some(cfg), cancel).await.unwrap_err();
		assert!(matches!(err, ServerError::HostListenerClash { .. }));
	}

	#[test]
	fn duplicate_listener_address_is_rejected() {
		let cfg = config(
			r#"
listeners:
  a:
    listen_addr: "127.0.0.1:9000"
    listen_type: http-edge
  b:
    listen_addr: "127.0.0.1:9000"
    listen_type: http-edge
"#,
		);
		assert!(matches!(
			check_listener_keys(&cfg),
			Err(ServerError::DuplicateListeners { .. })
		));
	}
}
