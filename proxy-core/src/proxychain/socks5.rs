use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{DialError, Dialer};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV4: u8 = 0x01;
const ATYP_IPV6: u8 = 0x04;

/// Tunnels to `target` through an upstream SOCKS5 proxy (RFC 1928), with
/// optional username/password authentication (RFC 1929).
pub struct Socks5Dialer {
	inner: Arc<dyn Dialer>,
	proxy_addr: String,
	auth: Option<(String, String)>,
}

impl Socks5Dialer {
	pub fn new(inner: Arc<dyn Dialer>, proxy_addr: String, auth: Option<(String, String)>) -> Self {
		Socks5Dialer {
			inner,
			proxy_addr,
			auth,
		}
	}

	fn handshake_err(&self, reason: impl Into<String>) -> DialError {
		DialError::Handshake {
			proxy: self.proxy_addr.clone(),
			reason: reason.into(),
		}
	}
}

#[async_trait]
impl Dialer for Socks5Dialer {
	async fn dial(&self, target: &str) -> Result<TcpStream, DialError> {
		let mut stream = self.inner.dial(&self.proxy_addr).await?;

		let offer_auth = self.auth.is_some();
		let methods: &[u8] = if offer_auth {
			&[METHOD_NO_AUTH, METHOD_USER_PASS]
		} else {
			&[METHOD_NO_AUTH]
		};
		let mut greeting = vec![VERSION, methods.len() as u8];
		greeting.extend_from_slice(methods);
		write(&mut stream, &greeting, &self.proxy_addr).await?;

		let mut reply = [0u8; 2];
		read_exact(&mut stream, &mut reply, &self.proxy_addr).await?;
		if reply[0] != VERSION {
			return Err(self.handshake_err(format!("unexpected socks version {}", reply[0])));
		}
		match reply[1] {
			METHOD_NO_AUTH => {},
			METHOD_USER_PASS => self.authenticate(&mut stream).await?,
			METHOD_NONE_ACCEPTABLE => return Err(self.handshake_err("proxy rejected all auth methods")),
			other => return Err(self.handshake_err(format!("unsupported auth method {other}"))),
		}

		self.connect(&mut stream, target).await?;
		Ok(stream)
	}
}

impl Socks5Dialer {
	async fn authenticate(&self, stream: &mut TcpStream) -> Result<(), DialError> {
		let (user, pass) = self.auth.as_ref().expect("auth checked by caller");
		let mut req = vec![0x01u8, user.len() as u8];
		req.extend_from_slice(user.as_bytes());
		req.push(pass.len() as u8);
		req.extend_from_slice(pass.as_bytes());
		write(stream, &req, &self.proxy_addr).await?;

		let mut resp = [0u8; 2];
		read_exact(stream, &mut resp, &self.proxy_addr).await?;
		if resp[1] != 0x00 {
			return Err(self.handshake_err("socks5 username/password authentication failed"));
		}
		Ok(())
	}

	async fn connect(&self, stream: &mut TcpStream, target: &str) -> Result<(), DialError> {
		let (host, port) = target
			.rsplit_once(':')
			.ok_or_else(|| self.handshake_err(format!("target {target:?} is missing a port")))?;
		let port: u16 = port
			.parse()
			.map_err(|_| self.handshake_err(format!("target {target:?} has an invalid port")))?;

		let mut req = vec![VERSION, CMD_CONNECT, 0x00];
		if let Ok(ip) = host.parse::<std::net::Ipv4Addr>() {
			req.push(ATYP_IPV4);
			req.extend_from_slice(&ip.octets());
		} else if let Ok(ip) = host.parse::<std::net::Ipv6Addr>() {
			req.push(ATYP_IPV6);
			req.extend_from_slice(&ip.octets());
		} else {
			if host.len() > 255 {
				return Err(self.handshake_err("target hostname too long for socks5"));
			}
			req.push(ATYP_DOMAIN);
			req.push(host.len() as u8);
			req.extend_from_slice(host.as_bytes());
		}
		req.extend_from_slice(&port.to_be_bytes());
		write(stream, &req, &self.proxy_addr).await?;

		let mut head = [0u8; 4];
		read_exact(stream, &mut head, &self.proxy_addr).await?;
		if head[0] != VERSION {
			return Err(self.handshake_err("unexpected socks version in CONNECT reply"));
		}
		if head[1] != 0x00 {
			return Err(self.handshake_err(format!("socks5 CONNECT failed with code {}", head[1])));
		}

		// Drain the bound-address field so the stream is positioned at the
		// start of the tunneled data.
		let addr_len = match head[3] {
			ATYP_IPV4 => 4,
			ATYP_IPV6 => 16,
			ATYP_DOMAIN => {
				let mut len_byte = [0u8; 1];
				read_exact(stream, &mut len_byte, &self.proxy_addr).await?;
				len_byte[0] as usize
			},
			other => return Err(self.handshake_err(format!("unsupported bound address type {other}"))),
		};
		let mut discard = vec![0u8; addr_len + 2];
		read_exact(stream, &mut discard, &self.proxy_addr).await?;

		Ok(())
	}
}

async fn write(stream: &mut TcpStream, buf: &[u8], proxy: &str) -> Result<(), DialError> {
	stream
		.write_all(buf)
		.await
		.map_err(|source| DialError::Connect {
			target: proxy.to_string(),
			source,
		})
}

async fn read_exact(stream: &mut TcpStream, buf: &mut [u8], proxy: &str) -> Result<(), DialError> {
	stream
		.read_exact(buf)
		.await
		.map_err(|source| DialError::Connect {
			target: proxy.to_string(),
			source,
		})
}
