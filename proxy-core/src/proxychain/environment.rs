use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{DialError, Dialer, HttpConnectDialer};

/// Wraps `inner`, consulting `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` (and their
/// lowercase forms) at dial time to decide whether to tunnel through an
/// environment-configured proxy or fall through to `inner` directly.
pub struct EnvironmentDialer {
	inner: Arc<dyn Dialer>,
}

impl EnvironmentDialer {
	pub fn new(inner: Arc<dyn Dialer>) -> Self {
		EnvironmentDialer { inner }
	}
}

fn env_var(names: &[&str]) -> Option<String> {
	names.iter().find_map(|n| std::env::var(n).ok()).filter(|v| !v.is_empty())
}

fn no_proxy_matches(host: &str) -> bool {
	let Some(raw) = env_var(&["NO_PROXY", "no_proxy"]) else {
		return false;
	};
	raw.split(',').map(str::trim).filter(|s| !s.is_empty()).any(|pattern| {
		let pattern = pattern.trim_start_matches('.');
		host == pattern || host.ends_with(&format!(".{pattern}"))
	})
}

#[async_trait]
impl Dialer for EnvironmentDialer {
	async fn dial(&self, target: &str) -> Result<TcpStream, DialError> {
		let host = target.rsplit_once(':').map(|(h, _)| h).unwrap_or(target);
		let is_tls_port = target.ends_with(":443");

		if no_proxy_matches(host) {
			return self.inner.dial(target).await;
		}

		let proxy_url = if is_tls_port {
			env_var(&["HTTPS_PROXY", "https_proxy"]).or_else(|| env_var(&["HTTP_PROXY", "http_proxy"]))
		} else {
			env_var(&["HTTP_PROXY", "http_proxy"])
		};

		let Some(proxy_url) = proxy_url else {
			return self.inner.dial(target).await;
		};

		let url = url::Url::parse(&proxy_url).map_err(|e| DialError::Handshake {
			proxy: proxy_url.clone(),
			reason: format!("invalid proxy url in environment: {e}"),
		})?;
		let proxy_host = url.host_str().ok_or_else(|| DialError::Handshake {
			proxy: proxy_url.clone(),
			reason: "missing host".to_string(),
		})?;
		let proxy_port = url.port().unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
		let auth = if url.username().is_empty() {
			None
		} else {
			Some((url.username().to_string(), url.password().unwrap_or("").to_string()))
		};

		let dialer = HttpConnectDialer::new(self.inner.clone(), format!("{proxy_host}:{proxy_port}"), auth);
		dialer.dial(target).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_proxy_matches_suffix_and_exact() {
		std::env::set_var("NO_PROXY", "internal.test,.corp.example");
		assert!(no_proxy_matches("internal.test"));
		assert!(no_proxy_matches("svc.corp.example"));
		assert!(!no_proxy_matches("public.example"));
		std::env::remove_var("NO_PROXY");
	}
}
