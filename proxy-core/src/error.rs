//! Typed error families (§7, §10.2).
//!
//! `ServerError` covers startup/wiring failures and is fatal to [`crate::server::run`].
//! `ProxyError` is the best-effort runtime family used by the backend
//! forwarder; it never escapes `serve` — every variant maps to a 502.

use crate::proxychain::ProxychainError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error("configuration is required")]
	NilConfig,
	#[error("duplicate listener key {key}: {reason}")]
	DuplicateListeners { key: String, reason: String },
	#[error("listener {name:?} has an unknown listen_type")]
	UnknownListenerType { name: String },
	#[error("site references unknown listener {name:?}")]
	ListenerNotFound { name: String },
	#[error("site references unknown proxychain {name:?}")]
	ProxychainNotFound { name: String },
	#[error("failed to initialize backend for site {host:?}: {source}")]
	BackendInitFailed {
		host: String,
		#[source]
		source: Box<dyn std::error::Error + Send + Sync>,
	},
	#[error(transparent)]
	InvalidProxySpec(#[from] ProxychainError),
	#[error("duplicate (listener, host) pair: listener {listener:?}, host {host:?}")]
	HostListenerClash { listener: String, host: String },
	#[error("failed to attach site for host {host:?} to listener {listener:?}: {reason}")]
	AttachSiteToListenerFailed {
		listener: String,
		host: String,
		reason: String,
	},
	#[error("failed to bind listener {name:?} on {addr}: {source}")]
	ListenerBindFailed {
		name: String,
		addr: String,
		#[source]
		source: std::io::Error,
	},
}

/// Runtime failure while forwarding a single request. Always mapped to a
/// `502 Bad Gateway` at the client boundary (§4.4, §7); kept typed only so
/// the backend can log a meaningful reason at `debug`.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
	#[error("no target could be determined for this request")]
	NoTarget,
	#[error("dialing origin: {0}")]
	Dial(#[from] crate::proxychain::DialError),
	#[error("tls handshake with origin failed: {0}")]
	TlsHandshake(String),
	#[error("http protocol error: {0}")]
	Http(String),
	#[error("request was cancelled")]
	Cancelled,
}
