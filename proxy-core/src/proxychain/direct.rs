use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{DialError, Dialer};

/// Dials `target` directly with no intermediate hop. The starting point of
/// every chain.
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
	async fn dial(&self, target: &str) -> Result<TcpStream, DialError> {
		TcpStream::connect(target)
			.await
			.map_err(|source| DialError::Connect {
				target: target.to_string(),
				source,
			})
	}
}
