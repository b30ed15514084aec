use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SYSTEM: &str = "system";
/// Entries longer than this are assumed to be inline PEM and truncated when
/// the config is re-dumped, mirroring the original's log-sample truncation.
const SANITIZE_SAMPLE_LEN: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum CertPoolError {
	#[error("could not read certificate file {path:?}: {source}")]
	ReadFile {
		path: String,
		source: std::io::Error,
	},
	#[error("entry {index} could not be parsed as PEM: {source}")]
	InvalidPem { index: usize, source: std::io::Error },
	#[error("could not load system certificate pool: {0}")]
	SystemPool(std::io::Error),
}

/// A certificate pool built from a list of `"system"` / file-path / inline-PEM
/// entries (see `BackendConfig.tls.ca_certs` in the configuration schema).
#[derive(Debug, Clone)]
pub struct CertPool {
	pub store: Arc<RootCertStore>,
	entries: Vec<String>,
}

impl Default for CertPool {
	fn default() -> Self {
		CertPool {
			store: Arc::new(RootCertStore::empty()),
			entries: Vec::new(),
		}
	}
}

impl CertPool {
	pub fn from_entries(entries: Vec<String>) -> Result<Self, CertPoolError> {
		let mut store = RootCertStore::empty();
		for entry in &entries {
			if entry == SYSTEM {
				let native = rustls_native_certs::load_native_certs();
				for err in native.errors {
					tracing::warn!(err = %err, "error loading a native certificate, continuing anyway");
				}
				for cert in native.certs {
					// A handful of platform roots fail strict parsing; skip them rather
					// than fail the whole pool, matching the original's best-effort load.
					let _ = store.add(cert);
				}
				continue;
			}
			let pem_bytes = if Path::new(entry).is_file() {
				std::fs::read(entry).map_err(|source| CertPoolError::ReadFile {
					path: entry.clone(),
					source,
				})?
			} else {
				entry.clone().into_bytes()
			};
			let mut cursor = std::io::Cursor::new(pem_bytes);
			for (index, cert) in rustls_pemfile::certs(&mut cursor).enumerate() {
				let cert = cert.map_err(|source| CertPoolError::InvalidPem { index, source })?;
				let _ = store.add(cert);
			}
		}
		Ok(CertPool {
			store: Arc::new(store),
			entries,
		})
	}
}

impl<'de> Deserialize<'de> for CertPool {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let entries = Vec::<String>::deserialize(deserializer)?;
		CertPool::from_entries(entries).map_err(D::Error::custom)
	}
}

/// Per-backend TLS settings used when dialing the origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
	#[serde(default)]
	pub enable: bool,
	#[serde(default)]
	pub no_verify: bool,
	#[serde(default)]
	pub sni_name: Option<String>,
	#[serde(default)]
	pub ca_certs: CertPool,
}

impl Serialize for CertPool {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let sanitized: Vec<String> = self
			.entries
			.iter()
			.map(|e| {
				if e == SYSTEM || Path::new(e).is_file() {
					e.clone()
				} else if e.len() > SANITIZE_SAMPLE_LEN {
					format!("{}…<redacted>", &e[..SANITIZE_SAMPLE_LEN])
				} else {
					e.clone()
				}
			})
			.collect();
		sanitized.serialize(serializer)
	}
}
