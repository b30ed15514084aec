//! The YAML configuration schema (§3/§6) and its loading pipeline (§10.3).

mod host_spec;
mod proxy_url;
mod tls;

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use host_spec::{HostSpec, HostSpecParseError};
pub use proxy_url::ProxyUrl;
pub use tls::{CertPool, CertPoolError, TlsConfig};

const DEFAULT_CONFIG: &str = include_str!("default_config.yaml");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to parse configuration yaml: {0}")]
	Yaml(#[from] serde_yaml::Error),
	#[error(transparent)]
	HostSpec(#[from] HostSpecParseError),
	#[error(transparent)]
	CertPool(#[from] CertPoolError),
	#[error(
		"backend for site {site:?} uses the default target selector but target.port is 0; set an explicit port, or use target_select: path-index"
	)]
	InvalidTargetSelect { site: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyHop {
	pub proxy: ProxyUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerType {
	HttpEdge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
	pub listen_addr: HostSpec,
	pub listen_type: ListenerType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderEdit {
	#[serde(default)]
	pub set_headers: HashMap<String, Vec<String>>,
	#[serde(default)]
	pub del_headers: Vec<String>,
}

/// Per-request strategy for computing the upstream `host:port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
	tag = "target_select",
	content = "target_select_params",
	rename_all = "kebab-case",
	deny_unknown_fields
)]
pub enum TargetSelect {
	Default,
	PathIndex {
		#[serde(rename = "Index")]
		index: usize,
	},
}

impl Default for TargetSelect {
	fn default() -> Self {
		TargetSelect::Default
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
	#[serde(default)]
	pub target: HostSpec,
	#[serde(default)]
	pub tls: TlsConfig,
	#[serde(default, rename = "http_headers")]
	pub headers: HeaderEdit,
	#[serde(flatten)]
	pub target_select: TargetSelect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
	#[serde(rename = "listener")]
	pub listeners: Vec<String>,
	pub host: String,
	pub proxychain: String,
	pub backend: BackendConfig,
	/// Reserved; unused by the core (see Design Notes open questions).
	#[serde(default)]
	pub method: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
	#[serde(default)]
	pub global: GlobalConfig,
	#[serde(default)]
	pub proxychains: IndexMap<String, Vec<ProxyHop>>,
	#[serde(default)]
	pub listeners: IndexMap<String, ListenerConfig>,
	#[serde(default)]
	pub sites: Vec<SiteConfig>,
}

impl Config {
	fn validate(&self) -> Result<(), ConfigError> {
		for site in &self.sites {
			if matches!(site.backend.target_select, TargetSelect::Default) && site.backend.target.port == 0
			{
				return Err(ConfigError::InvalidTargetSelect {
					site: site.host.clone(),
				});
			}
		}
		Ok(())
	}
}

/// Recursively merges `right` on top of `left`: maps are merged key-by-key,
/// any other value on the right (including lists) replaces the left value.
/// Mirrors the original's `configMapMerge`.
fn merge_yaml(left: &serde_yaml::Value, right: &serde_yaml::Value) -> serde_yaml::Value {
	match (left, right) {
		(serde_yaml::Value::Mapping(l), serde_yaml::Value::Mapping(r)) => {
			let mut merged = l.clone();
			for (k, rv) in r {
				let combined = match merged.get(k) {
					Some(lv) => merge_yaml(lv, rv),
					None => rv.clone(),
				};
				merged.insert(k.clone(), combined);
			}
			serde_yaml::Value::Mapping(merged)
		},
		(_, right) => right.clone(),
	}
}

/// Parses a configuration document, merging it on top of the embedded
/// defaults and rejecting unknown keys in a single strict pass (§10.3).
pub fn load(contents: &str) -> Result<Config, ConfigError> {
	let defaults: serde_yaml::Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
	let user: serde_yaml::Value = serde_yaml::from_str(contents)?;
	let merged = merge_yaml(&defaults, &user);
	let cfg: Config = serde_yaml::from_value(merged)?;
	cfg.validate()?;
	Ok(cfg)
}

/// Re-serializes an already-validated config, redacting embedded secrets
/// (proxy URL userinfo, long inline PEM blobs).
pub fn dump_sanitized(cfg: &Config) -> Result<String, ConfigError> {
	Ok(serde_yaml::to_string(cfg)?)
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r#"
proxychains:
  direct:
    - proxy: direct
listeners:
  edge:
    listen_addr: "0.0.0.0:8080"
    listen_type: http-edge
sites:
  - listener: [edge]
    host: example.test
    proxychain: direct
    backend:
      target: "127.0.0.1:9001"
"#;

	#[test]
	fn loads_sample_config() {
		let cfg = load(SAMPLE).unwrap();
		assert_eq!(cfg.sites.len(), 1);
		assert_eq!(cfg.sites[0].host, "example.test");
		assert_eq!(cfg.listeners["edge"].listen_addr.port, 8080);
	}

	#[test]
	fn rejects_unknown_keys() {
		let bad = SAMPLE.replace("host: example.test", "host: example.test\n    bogus: 1");
		assert!(load(&bad).is_err());
	}

	#[test]
	fn rejects_zero_port_default_selector() {
		let bad = SAMPLE.replace("target: \"127.0.0.1:9001\"", "target: \"127.0.0.1:0\"");
		assert!(matches!(
			load(&bad),
			Err(ConfigError::InvalidTargetSelect { .. })
		));
	}

	#[test]
	fn round_trip_is_idempotent() {
		let cfg = load(SAMPLE).unwrap();
		let dumped = dump_sanitized(&cfg).unwrap();
		let reparsed = load(&dumped).unwrap();
		assert_eq!(cfg.sites.len(), reparsed.sites.len());
		assert_eq!(cfg.sites[0].host, reparsed.sites[0].host);
	}

	#[test]
	fn path_index_allows_zero_port() {
		let cfg = SAMPLE.replace(
			"target: \"127.0.0.1:9001\"",
			"target: \":0\"\n      target_select: path-index\n      target_select_params:\n        Index: 1",
		);
		assert!(load(&cfg).is_ok());
	}
}
