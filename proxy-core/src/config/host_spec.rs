use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A parsed `host:port[/network]` textual address.
///
/// An empty `host` together with `port == 0` means "inherit from the
/// request" (used for a backend's `target` and a site's unset port).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostSpec {
	pub host: String,
	pub port: u16,
	pub network: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HostSpecParseError {
	#[error("host:port spec {0:?} is missing a ':' separator")]
	MissingColon(String),
	#[error("port {0:?} is not a valid u16")]
	InvalidPort(String),
}

impl HostSpec {
	/// Returns `host:port`, or the empty string when both are unset.
	pub fn host_port(&self) -> String {
		if self.host.is_empty() && self.port == 0 {
			return String::new();
		}
		format!("{}:{}", self.host, self.port)
	}
}

impl FromStr for HostSpec {
	type Err = HostSpecParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (hostport, network) = match s.split_once('/') {
			Some((hp, net)) => (hp, net.to_string()),
			None => (s, "tcp".to_string()),
		};
		let (host, port) = hostport
			.rsplit_once(':')
			.ok_or_else(|| HostSpecParseError::MissingColon(s.to_string()))?;
		let port: u16 = port
			.parse()
			.map_err(|_| HostSpecParseError::InvalidPort(port.to_string()))?;
		Ok(HostSpec {
			host: host.to_string(),
			port,
			network,
		})
	}
}

impl fmt::Display for HostSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.network == "tcp" {
			write!(f, "{}:{}", self.host, self.port)
		} else {
			write!(f, "{}:{}/{}", self.host, self.port, self.network)
		}
	}
}

impl<'de> Deserialize<'de> for HostSpec {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(D::Error::custom)
	}
}

impl Serialize for HostSpec {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_string())
	}
}
