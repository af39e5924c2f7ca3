//! Protocol Classifier (`4.C`): peeks the client's first bytes within a
//! bounded timeout and decides whether this is a TLS ClientHello or plaintext
//! NMDC.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("read error while classifying connection: {0}")]
	Read(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
	/// Client spoke plaintext, or sent nothing within the detect window
	/// (quiet plain NMDC clients don't speak first).
	Plain,
	/// First two peeked bytes are `0x16 0x03` - a TLS record header.
	Tls,
}

/// Outcome of classification: the protocol kind and how many bytes were
/// peeked into the caller's buffer (at the offset the caller chose).
#[derive(Debug, Clone, Copy)]
pub struct Classification {
	pub kind: Kind,
	pub peeked: usize,
}

/// Peeks into `buf`, reading at most `buf.len()` bytes with a `wait` deadline.
/// If `tls_enabled` is false or `wait` is zero, classification is
/// unconditionally `Plain` with no bytes read (detection is skipped
/// entirely - `4.C`, first paragraph).
pub async fn classify(
	socket: &mut TcpStream,
	buf: &mut [u8],
	wait: Duration,
	tls_enabled: bool,
) -> Result<Classification, Error> {
	if !tls_enabled || wait.is_zero() {
		return Ok(Classification {
			kind: Kind::Plain,
			peeked: 0,
		});
	}

	match tokio::time::timeout(wait, socket.read(buf)).await {
		Err(_elapsed) => Ok(Classification {
			kind: Kind::Plain,
			peeked: 0,
		}),
		Ok(Err(e)) => Err(Error::Read(e)),
		Ok(Ok(n)) => {
			let kind = if n >= 2 && buf[0] == 0x16 && buf[1] == 0x03 {
				Kind::Tls
			} else {
				Kind::Plain
			};
			Ok(Classification { kind, peeked: n })
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::AsyncWriteExt;
	use tokio::net::TcpListener;

	async fn loopback_pair() -> (TcpStream, TcpStream) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let client = TcpStream::connect(addr).await.unwrap();
		let (server, _) = listener.accept().await.unwrap();
		(client, server)
	}

	#[tokio::test]
	async fn classifies_tls_client_hello() {
		let (mut client, mut server) = loopback_pair().await;
		client.write_all(&[0x16, 0x03, 0x01, 0x00, 0x05]).await.unwrap();
		let mut buf = [0u8; 1024];
		let result = classify(&mut server, &mut buf, Duration::from_millis(500), true)
			.await
			.unwrap();
		assert_eq!(result.kind, Kind::Tls);
		assert_eq!(result.peeked, 5);
	}

	#[tokio::test]
	async fn classifies_one_byte_as_plain() {
		let (mut client, mut server) = loopback_pair().await;
		client.write_all(b"$").await.unwrap();
		let mut buf = [0u8; 1024];
		let result = classify(&mut server, &mut buf, Duration::from_millis(500), true)
			.await
			.unwrap();
		assert_eq!(result.kind, Kind::Plain);
		assert_eq!(result.peeked, 1);
	}

	#[tokio::test]
	async fn classifies_plaintext_nmdc() {
		let (mut client, mut server) = loopback_pair().await;
		client.write_all(b"$MyNick foo|").await.unwrap();
		let mut buf = [0u8; 1024];
		let result = classify(&mut server, &mut buf, Duration::from_millis(500), true)
			.await
			.unwrap();
		assert_eq!(result.kind, Kind::Plain);
		assert_eq!(result.peeked, 12);
	}

	#[tokio::test]
	async fn timeout_with_silent_client_classifies_plain() {
		let (_client, mut server) = loopback_pair().await;
		let mut buf = [0u8; 1024];
		let result = classify(&mut server, &mut buf, Duration::from_millis(50), true)
			.await
			.unwrap();
		assert_eq!(result.kind, Kind::Plain);
		assert_eq!(result.peeked, 0);
	}

	#[tokio::test]
	async fn detection_disabled_skips_read() {
		let (_client, mut server) = loopback_pair().await;
		let mut buf = [0u8; 1024];
		let result = classify(&mut server, &mut buf, Duration::from_millis(500), false)
			.await
			.unwrap();
		assert_eq!(result.kind, Kind::Plain);
		assert_eq!(result.peeked, 0);
	}
}
