//! HTTP backend forwarding (§4.4, C4): applies header edits, resolves the
//! target via the configured selector, dials it through the site's
//! proxychain (optionally wrapping the connection in TLS), and streams the
//! response back.

use std::sync::Arc;

use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use rustls_pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};

use crate::config::{BackendConfig, TlsConfig};
use crate::error::ProxyError;
use crate::proxychain::Dialer;
use crate::selector::select_target;

pub type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, hyper::Error>;

/// A single configured backend: target selection, header edits, and TLS
/// settings, bound to one proxychain dialer.
pub struct Backend {
	name: String,
	config: BackendConfig,
	dialer: Arc<dyn Dialer>,
}

impl Backend {
	pub fn new(name: String, config: BackendConfig, dialer: Arc<dyn Dialer>) -> Self {
		Backend {
			name,
			config,
			dialer,
		}
	}

	/// Forwards `request` to the origin, returning the origin's response or a
	/// client-visible `502 Bad Gateway` — per §4.4/§7, a forwarding failure is
	/// never propagated to the caller as an `Err`.
	#[instrument(skip_all, fields(backend = %self.name))]
	pub async fn serve(&self, mut request: Request<Incoming>) -> Response<BoxBody> {
		apply_set_headers(&self.config.headers.set_headers, request.headers_mut());
		apply_del_headers(&self.config.headers.del_headers, request.headers_mut());

		match self.forward(request).await {
			Ok(resp) => resp,
			Err(err) => {
				debug!(backend = %self.name, error = %err, "forwarding request failed");
				bad_gateway()
			},
		}
	}

	async fn forward(&self, mut request: Request<Incoming>) -> Result<Response<BoxBody>, ProxyError> {
		let Some(target) = select_target(&self.config, &mut request) else {
			return Err(ProxyError::NoTarget);
		};
		let target_host = target.rsplit_once(':').map(|(h, _)| h).unwrap_or(&target).to_string();

		let tcp = self.dialer.dial(&target).await?;

		let sender = if self.config.tls.enable {
			let tls_stream = connect_tls(&self.config.tls, &target_host, tcp)
				.await
				.map_err(ProxyError::TlsHandshake)?;
			handshake(TokioIo::new(tls_stream)).await?
		} else {
			handshake(TokioIo::new(tcp)).await?
		};

		let outbound = rebuild_request(request);
		let response = sender
			.send_request(outbound)
			.await
			.map_err(|e| ProxyError::Http(e.to_string()))?;

		Ok(response.map(BodyExt::boxed))
	}
}

type Sender = hyper::client::conn::http1::SendRequest<BoxBody>;

async fn handshake<IO>(io: IO) -> Result<Sender, ProxyError>
where
	IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
	let (sender, conn) = hyper::client::conn::http1::handshake(io)
		.await
		.map_err(|e| ProxyError::Http(e.to_string()))?;
	tokio::spawn(async move {
		if let Err(err) = conn.await {
			debug!(error = %err, "backend connection closed with error");
		}
	});
	Ok(sender)
}

/// Derives a per-connection TLS client config so the per-request SNI
/// override never mutates shared state (§5, §9).
async fn connect_tls(
	tls: &TlsConfig,
	target_host: &str,
	tcp: tokio::net::TcpStream,
) -> Result<tokio_rustls::client::TlsStream<tokio::net::TcpStream>, String> {
	let builder = rustls::ClientConfig::builder();
	let client_config = if tls.no_verify {
		builder
			.dangerous()
			.with_custom_certificate_verifier(Arc::new(crate::tls_verify::NoVerifier))
			.with_no_client_auth()
	} else {
		let roots = if tls.ca_certs.store.is_empty() {
			crate::config::CertPool::from_entries(vec!["system".to_string()])
				.map_err(|e| e.to_string())?
				.store
				.as_ref()
				.clone()
		} else {
			tls.ca_certs.store.as_ref().clone()
		};
		builder.with_root_certificates(roots).with_no_client_auth()
	};

	let sni = tls.sni_name.as_deref().unwrap_or(target_host);
	let server_name = ServerName::try_from(sni.to_string()).map_err(|e| e.to_string())?;

	let connector = TlsConnector::from(Arc::new(client_config));
	connector.connect(server_name, tcp).await.map_err(|e| e.to_string())
}

/// Converts the incoming request's body into a `BoxBody` for forwarding.
/// Headers are left exactly as `apply_set_headers`/`apply_del_headers` left
/// them — per §4.4, nothing else touches the request past that point.
fn rebuild_request(request: Request<Incoming>) -> Request<BoxBody> {
	let (parts, body) = request.into_parts();
	Request::from_parts(parts, body.boxed())
}

fn apply_set_headers(set: &std::collections::HashMap<String, Vec<String>>, headers: &mut http::HeaderMap) {
	for (name, values) in set {
		let Ok(header_name) = http::HeaderName::from_bytes(name.as_bytes()) else {
			continue;
		};
		headers.remove(&header_name);
		for value in values {
			if let Ok(v) = HeaderValue::from_str(value) {
				headers.append(&header_name, v);
			}
		}
	}
}

fn apply_del_headers(del: &[String], headers: &mut http::HeaderMap) {
	for name in del {
		if let Ok(header_name) = http::HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) {
			headers.remove(&header_name);
		}
	}
}

pub fn bad_gateway() -> Response<BoxBody> {
	Response::builder()
		.status(StatusCode::BAD_GATEWAY)
		.body(Empty::new().map_err(|never| match never {}).boxed())
		.expect("building a 502 response cannot fail")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn set_headers_overwrite_existing() {
		let mut headers = http::HeaderMap::new();
		headers.insert("authorization", HeaderValue::from_static("old"));
		let mut set = std::collections::HashMap::new();
		set.insert("Authorization".to_string(), vec!["new".to_string()]);
		apply_set_headers(&set, &mut headers);
		assert_eq!(headers.get("authorization").unwrap(), "new");
	}

	#[test]
	fn del_headers_are_case_insensitive() {
		let mut headers = http::HeaderMap::new();
		headers.insert("Authorization", HeaderValue::from_static("secret"));
		apply_del_headers(&["authorization".to_string()], &mut headers);
		assert!(headers.get("authorization").is_none());
	}

	#[test]
	fn set_headers_support_multiple_values() {
		let mut headers = http::HeaderMap::new();
		let mut set = std::collections::HashMap::new();
		set.insert("X-Multi".to_string(), vec!["a".to_string(), "b".to_string()]);
		apply_set_headers(&set, &mut headers);
		let values: Vec<_> = headers.get_all("x-multi").iter().collect();
		assert_eq!(values.len(), 2);
	}
}
