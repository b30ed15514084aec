//! HTTP edge listener (§4.5, C5): accepts connections on a bound socket,
//! resolves each request's `Host` against the attached trie, and dispatches
//! to the matched backend.

use std::sync::Arc;

use http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BoxBody, bad_gateway};
use crate::trie::Matcher;

/// Strips a port suffix from a `Host` header value, per §4.5.
fn host_without_port(host_header: &str) -> &str {
	if let Some(rest) = host_header.strip_prefix('[') {
		return match rest.find(']') {
			Some(end) => &host_header[..end + 2],
			None => host_header,
		};
	}
	match host_header.rfind(':') {
		Some(idx) => &host_header[..idx],
		None => host_header,
	}
}

/// Serves HTTP requests on an already-bound socket, dispatching by `Host`.
///
/// The socket is bound up front by the orchestrator (§4.1 step 4) so a bind
/// failure surfaces as a synchronous startup error rather than only showing
/// up once the accept loop is scheduled.
pub struct HttpEdgeListener {
	name: String,
	listener: TcpListener,
	sites: Arc<Matcher<Backend>>,
}

impl HttpEdgeListener {
	/// Binds `addr`, returning the unstarted listener.
	pub async fn bind(name: String, addr: &str, sites: Arc<Matcher<Backend>>) -> std::io::Result<Self> {
		let listener = TcpListener::bind(addr).await?;
		info!(listener = %name, addr, "listener bound");
		Ok(HttpEdgeListener { name, listener, sites })
	}

	/// Serves accepted connections until `token` is cancelled.
	pub async fn serve(self, token: CancellationToken) -> std::io::Result<()> {
		let listener = self.listener;
		let sites = self.sites.clone();
		let name = self.name.clone();

		loop {
			tokio::select! {
				_ = token.cancelled() => {
					info!(listener = %name, "shutting down");
					break;
				}
				accepted = listener.accept() => {
					let (stream, peer) = match accepted {
						Ok(pair) => pair,
						Err(err) => {
							warn!(listener = %name, error = %err, "accept failed");
							continue;
						}
					};
					debug!(listener = %name, peer = %peer, "accepted connection");
					let sites = sites.clone();
					let name = name.clone();
					let conn_token = token.clone();
					tokio::spawn(async move {
						serve_connection(stream, sites, name, conn_token).await;
					});
				}
			}
		}

		Ok(())
	}
}

async fn serve_connection(
	stream: tokio::net::TcpStream,
	sites: Arc<Matcher<Backend>>,
	name: String,
	token: CancellationToken,
) {
	let io = TokioIo::new(stream);
	let service = hyper::service::service_fn(move |req: Request<Incoming>| {
		let sites = sites.clone();
		async move { Ok::<_, std::convert::Infallible>(route(&sites, req).await) }
	});

	let conn = auto::Builder::new(TokioExecutor::new()).serve_connection(io, service);
	tokio::select! {
		res = conn => {
			if let Err(err) = res {
				debug!(listener = %name, error = %err, "connection closed with error");
			}
		}
		_ = token.cancelled() => {}
	}
}

async fn route(sites: &Matcher<Backend>, request: Request<Incoming>) -> Response<BoxBody> {
	let host_header = request
		.headers()
		.get(http::header::HOST)
		.and_then(|h| h.to_str().ok())
		.unwrap_or_default();
	let host = host_without_port(host_header);

	match sites.lookup(host) {
		Some(backend) => backend.serve(request).await,
		None => {
			debug!(host = %host, "no site matched this host");
			bad_gateway()
		},
	}
}
