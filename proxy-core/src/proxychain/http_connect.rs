use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{DialError, Dialer};

/// Tunnels to `target` through an upstream proxy speaking HTTP `CONNECT`.
pub struct HttpConnectDialer {
	inner: Arc<dyn Dialer>,
	proxy_addr: String,
	auth: Option<(String, String)>,
}

impl HttpConnectDialer {
	pub fn new(inner: Arc<dyn Dialer>, proxy_addr: String, auth: Option<(String, String)>) -> Self {
		HttpConnectDialer {
			inner,
			proxy_addr,
			auth,
		}
	}
}

#[async_trait]
impl Dialer for HttpConnectDialer {
	async fn dial(&self, target: &str) -> Result<TcpStream, DialError> {
		let mut stream = self.inner.dial(&self.proxy_addr).await?;

		let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
		if let Some((user, pass)) = &self.auth {
			let creds = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
			request.push_str(&format!("Proxy-Authorization: Basic {creds}\r\n"));
		}
		request.push_str("\r\n");

		stream
			.write_all(request.as_bytes())
			.await
			.map_err(|source| DialError::Connect {
				target: self.proxy_addr.clone(),
				source,
			})?;

		let status_line = read_status_line(&mut stream).await?;
		if !status_line.contains(" 200 ") {
			return Err(DialError::Handshake {
				proxy: self.proxy_addr.clone(),
				reason: format!("unexpected CONNECT response: {status_line:?}"),
			});
		}

		Ok(stream)
	}
}

/// Reads bytes one at a time until the blank line terminating the response
/// headers, returning just the status line. Simple and allocation-light
/// enough for a handshake that runs once per connection.
async fn read_status_line(stream: &mut TcpStream) -> Result<String, DialError> {
	let proxy_err = |reason: String| DialError::Handshake {
		proxy: "upstream proxy".to_string(),
		reason,
	};

	let mut buf = Vec::new();
	let mut byte = [0u8; 1];
	loop {
		let n = stream
			.read(&mut byte)
			.await
			.map_err(|e| proxy_err(format!("reading CONNECT response: {e}")))?;
		if n == 0 {
			return Err(proxy_err("connection closed before CONNECT response completed".into()));
		}
		buf.push(byte[0]);
		if buf.ends_with(b"\r\n\r\n") {
			break;
		}
		if buf.len() > 64 * 1024 {
			return Err(proxy_err("CONNECT response headers too large".into()));
		}
	}

	let text = String::from_utf8_lossy(&buf);
	let status_line = text.lines().next().unwrap_or_default().to_string();
	Ok(status_line)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::AsyncReadExt as _;
	use tokio::net::TcpListener;

	#[tokio::test]
	async fn successful_connect_returns_tunnel() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		let server = tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.unwrap();
			let mut buf = [0u8; 1024];
			let n = sock.read(&mut buf).await.unwrap();
			let req = String::from_utf8_lossy(&buf[..n]);
			assert!(req.starts_with("CONNECT origin.test:443 HTTP/1.1"));
			sock
				.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
				.await
				.unwrap();
		});

		let dialer = HttpConnectDialer::new(Arc::new(super::super::DirectDialer), addr.to_string(), None);
		dialer.dial("origin.test:443").await.unwrap();
		server.await.unwrap();
	}

	#[tokio::test]
	async fn non_200_is_rejected() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		let server = tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.unwrap();
			let mut buf = [0u8; 1024];
			let _ = sock.read(&mut buf).await.unwrap();
			sock
				.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
				.await
				.unwrap();
		});

		let dialer = HttpConnectDialer::new(Arc::new(super::super::DirectDialer), addr.to_string(), None);
		let err = dialer.dial("origin.test:443").await.unwrap_err();
		assert!(matches!(err, DialError::Handshake { .. }));
		server.await.unwrap();
	}
}
