//! Per-request target selection (§4.3): computing the upstream `host:port`
//! a request should be forwarded to, and optionally mutating the request in
//! the process.

use http::Request;

use crate::config::{BackendConfig, TargetSelect};

/// Resolves the upstream address for a single request against a backend.
///
/// Returns `None` when no target could be determined (e.g. a path-index
/// selector whose configured index is out of range) — callers should treat
/// this as equivalent to a dial failure (502).
pub fn select_target<B>(backend: &BackendConfig, request: &mut Request<B>) -> Option<String> {
	match &backend.target_select {
		TargetSelect::Default => default_target(backend, request),
		TargetSelect::PathIndex { index } => path_index_target(backend, request, *index),
	}
}

fn default_target<B>(backend: &BackendConfig, request: &Request<B>) -> Option<String> {
	let target_host = if !backend.target.host.is_empty() {
		backend.target.host.clone()
	} else {
		request
			.headers()
			.get(http::header::HOST)
			.and_then(|h| h.to_str().ok())
			.map(|h| h.split(':').next().unwrap_or(h).to_string())
			.or_else(|| request.uri().host().map(str::to_string))?
	};
	Some(format!("{}:{}", target_host, backend.target.port))
}

/// Splits `request.uri()`'s path on `/`, pulls the segment at `index` out as
/// a `host[:port]`, removes that segment from the path, and returns the
/// resulting target. A backend-configured port always wins over one parsed
/// out of the path segment.
fn path_index_target<B>(backend: &BackendConfig, request: &mut Request<B>, index: usize) -> Option<String> {
	let path = request.uri().path().to_string();
	let mut parts: Vec<&str> = path.split('/').collect();
	if parts.len() < index + 1 {
		return None;
	}

	let segment = parts[index];
	let (seg_host, seg_port) = match segment.rsplit_once(':') {
		Some((h, p)) => (h, p.parse::<u16>().unwrap_or(0)),
		None => (segment, 0),
	};
	let target_port = if backend.target.port != 0 {
		backend.target.port
	} else {
		seg_port
	};
	let target_host = seg_host.to_string();

	parts.remove(index);
	let new_path = parts.join("/");

	let mut uri_parts = request.uri().clone().into_parts();
	let new_pq = match request.uri().query() {
		Some(q) => format!("{new_path}?{q}"),
		None => new_path,
	};
	uri_parts.path_and_query = Some(new_pq.parse().ok()?);
	if let Ok(new_uri) = http::Uri::from_parts(uri_parts) {
		*request.uri_mut() = new_uri;
	}

	Some(format!("{target_host}:{target_port}"))
}
