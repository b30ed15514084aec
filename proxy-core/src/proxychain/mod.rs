//! Proxy-chain dialers (§4.2): composes a `direct`/`environment`/explicit-URL
//! chain spec into a single context-aware dialer used to reach a backend's
//! target address.

mod direct;
mod environment;
mod http_connect;
mod socks5;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::config::ProxyUrl;

pub use direct::DirectDialer;
pub use environment::EnvironmentDialer;
pub use http_connect::HttpConnectDialer;
pub use socks5::Socks5Dialer;

#[derive(Debug, thiserror::Error)]
pub enum ProxychainError {
	#[error("direct connection does not make sense as a non-first member of a proxychain")]
	DirectProxyAfterNonDirectProxy,
	#[error("invalid proxy url {url:?}: {reason}")]
	InvalidProxySpec { url: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
	#[error("connecting to {target}: {source}")]
	Connect {
		target: String,
		source: std::io::Error,
	},
	#[error("proxy handshake with {proxy} failed: {reason}")]
	Handshake { proxy: String, reason: String },
}

/// A dialer that knows how to reach an arbitrary `host:port` target, possibly
/// by tunneling through one or more upstream proxies.
#[async_trait]
pub trait Dialer: Send + Sync {
	async fn dial(&self, target: &str) -> Result<TcpStream, DialError>;
}

/// Builds the composed dialer for a single proxychain definition, folding
/// each hop onto the previous dialer in order (§4.2, C2).
///
/// `direct` is only meaningful as the first hop (it is the implicit starting
/// point); any later occurrence is rejected, matching the original's guard
/// against a nonsensical "become direct again" mid-chain.
pub fn build(hops: &[ProxyUrl]) -> Result<Arc<dyn Dialer>, ProxychainError> {
	let mut current: Arc<dyn Dialer> = Arc::new(DirectDialer);

	for (idx, hop) in hops.iter().enumerate() {
		match hop {
			ProxyUrl::Direct => {
				if idx == 0 {
					continue;
				}
				return Err(ProxychainError::DirectProxyAfterNonDirectProxy);
			},
			ProxyUrl::Environment => {
				current = Arc::new(EnvironmentDialer::new(current));
			},
			ProxyUrl::Explicit(url) => {
				current = wrap_explicit(current, url)?;
			},
		}
	}

	Ok(current)
}

fn wrap_explicit(inner: Arc<dyn Dialer>, url: &url::Url) -> Result<Arc<dyn Dialer>, ProxychainError> {
	let host = url.host_str().ok_or_else(|| ProxychainError::InvalidProxySpec {
		url: url.to_string(),
		reason: "missing host".to_string(),
	})?;
	let auth = if url.username().is_empty() {
		None
	} else {
		Some((url.username().to_string(), url.password().unwrap_or("").to_string()))
	};

	match url.scheme() {
		"http" | "https" => {
			let port = url.port().unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
			Ok(Arc::new(HttpConnectDialer::new(
				inner,
				format!("{host}:{port}"),
				auth,
			)))
		},
		"socks5" | "socks5h" => {
			let port = url.port().ok_or_else(|| ProxychainError::InvalidProxySpec {
				url: url.to_string(),
				reason: "socks5 proxy url must specify a port".to_string(),
			})?;
			Ok(Arc::new(Socks5Dialer::new(inner, format!("{host}:{port}"), auth)))
		},
		other => Err(ProxychainError::InvalidProxySpec {
			url: url.to_string(),
			reason: format!("unsupported proxy scheme {other:?}"),
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn direct_only_chain_builds() {
		build(&[ProxyUrl::Direct]).unwrap();
	}

	#[test]
	fn direct_after_other_hop_is_rejected() {
		let hops = vec![
			ProxyUrl::Explicit(url::Url::parse("http://proxy.test:3128").unwrap()),
			ProxyUrl::Direct,
		];
		assert!(matches!(
			build(&hops),
			Err(ProxychainError::DirectProxyAfterNonDirectProxy)
		));
	}

	#[test]
	fn unsupported_scheme_is_rejected() {
		let hops = vec![ProxyUrl::Explicit(url::Url::parse("ftp://proxy.test:21").unwrap())];
		assert!(matches!(build(&hops), Err(ProxychainError::InvalidProxySpec { .. })));
	}

	#[test]
	fn socks5_without_port_is_rejected() {
		let hops = vec![ProxyUrl::Explicit(
			url::Url::parse("socks5://proxy.test").unwrap(),
		)];
		assert!(matches!(build(&hops), Err(ProxychainError::InvalidProxySpec { .. })));
	}
}
