//! TLS Terminator (`4.D`): hands the classifier's peeked bytes and the live
//! socket to rustls as a single replayed stream, then maps the negotiated
//! version to the ASCII digit written into the preamble.

use std::fs;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use crate::config::TlsVersion;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to load certificate chain from {0:?}: {1}")]
	LoadCert(String, String),
	#[error("failed to load private key from {0:?}: {1}")]
	LoadKey(String, String),
	#[error("failed to build TLS server configuration: {0}")]
	Config(#[from] rustls::Error),
	#[error("TLS handshake failed: {0}")]
	Handshake(#[source] std::io::Error),
	#[error("server did not report a negotiated protocol version")]
	NoNegotiatedVersion,
}

/// The fixed ALPN label this proxy advertises; the hub must be reachable over
/// plain NMDC once TLS is terminated, so only one protocol is ever offered.
const ALPN_NMDC: &[u8] = b"nmdc";

/// Process-wide immutable TLS server configuration (`3. TLS Context`).
pub struct TlsContext {
	acceptor: TlsAcceptor,
}

impl TlsContext {
	pub fn load(cert_path: &str, key_path: &str, min_version: TlsVersion) -> Result<Self, Error> {
		let cert_pem = fs::read(cert_path).map_err(|e| Error::LoadCert(cert_path.to_string(), e.to_string()))?;
		let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut Cursor::new(&cert_pem))
			.collect::<Result<_, _>>()
			.map_err(|e| Error::LoadCert(cert_path.to_string(), e.to_string()))?;
		if chain.is_empty() {
			return Err(Error::LoadCert(cert_path.to_string(), "no certificates found".to_string()));
		}

		let key_pem = fs::read(key_path).map_err(|e| Error::LoadKey(key_path.to_string(), e.to_string()))?;
		let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut Cursor::new(&key_pem))
			.map_err(|e| Error::LoadKey(key_path.to_string(), e.to_string()))?
			.ok_or_else(|| Error::LoadKey(key_path.to_string(), "no private key found".to_string()))?;

		let mut config = rustls::ServerConfig::builder_with_protocol_versions(min_version.to_rustls_versions())
			.with_no_client_auth()
			.with_single_cert(chain, key)?;
		config.alpn_protocols = vec![ALPN_NMDC.to_vec()];

		Ok(Self {
			acceptor: TlsAcceptor::from(Arc::new(config)),
		})
	}

	/// Performs a server-side handshake over a stream that first replays
	/// `peeked` (the bytes the classifier already consumed from the socket)
	/// before reading further from `socket`. Returns the secured stream and
	/// the ASCII digit for the negotiated minor version.
	pub async fn handshake(
		&self,
		socket: TcpStream,
		peeked: Vec<u8>,
	) -> Result<(TlsStream<ReplayThenSocket>, u8), Error> {
		let replay = ReplayThenSocket::new(peeked, socket);
		let stream = self.acceptor.accept(replay).await.map_err(Error::Handshake)?;
		let version = stream
			.get_ref()
			.1
			.protocol_version()
			.ok_or(Error::NoNegotiatedVersion)?;
		Ok((stream, version_to_digit(version)))
	}
}

/// Maps a negotiated `rustls::ProtocolVersion` to the single ASCII digit the
/// preamble expects at offset `i-2`. `1.0` is permissible but never actually
/// negotiated since rustls only implements 1.2 and 1.3 (see `TlsVersion`).
fn version_to_digit(version: rustls::ProtocolVersion) -> u8 {
	match version {
		rustls::ProtocolVersion::SSLv2 | rustls::ProtocolVersion::SSLv3 => b'0',
		rustls::ProtocolVersion::TLSv1_0 => b'0',
		rustls::ProtocolVersion::TLSv1_1 => b'1',
		rustls::ProtocolVersion::TLSv1_2 => b'2',
		rustls::ProtocolVersion::TLSv1_3 => b'3',
		_ => b'0',
	}
}

/// Composes a byte slice (the classifier's peeked bytes) with a live socket
/// and presents both as a single `AsyncRead` - the "replay-then-socket"
/// idiom: classification must be non-destructive, and the handshake needs to
/// see the full TLS record including the two bytes already consumed.
pub struct ReplayThenSocket {
	replay: Vec<u8>,
	replay_pos: usize,
	socket: TcpStream,
}

impl ReplayThenSocket {
	pub fn new(replay: Vec<u8>, socket: TcpStream) -> Self {
		Self {
			replay,
			replay_pos: 0,
			socket,
		}
	}
}

impl AsyncRead for ReplayThenSocket {
	fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
		if self.replay_pos < self.replay.len() {
			let remaining = &self.replay[self.replay_pos..];
			let n = remaining.len().min(buf.remaining());
			buf.put_slice(&remaining[..n]);
			self.replay_pos += n;
			return Poll::Ready(Ok(()));
		}
		Pin::new(&mut self.socket).poll_read(cx, buf)
	}
}

impl AsyncWrite for ReplayThenSocket {
	fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
		Pin::new(&mut self.socket).poll_write(cx, buf)
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		Pin::new(&mut self.socket).poll_flush(cx)
	}

	fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		Pin::new(&mut self.socket).poll_shutdown(cx)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_known_versions_to_digits() {
		assert_eq!(version_to_digit(rustls::ProtocolVersion::TLSv1_0), b'0');
		assert_eq!(version_to_digit(rustls::ProtocolVersion::TLSv1_1), b'1');
		assert_eq!(version_to_digit(rustls::ProtocolVersion::TLSv1_2), b'2');
		assert_eq!(version_to_digit(rustls::ProtocolVersion::TLSv1_3), b'3');
	}
}
