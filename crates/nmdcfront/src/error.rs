use std::net::SocketAddr;

use crate::{certs, classify, relay, tls};

/// Startup-fatal errors: binding a listener, or certificate bootstrap failure.
/// Per-connection failures never surface here - see [`relay::Error`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("certificate bootstrap failed: {0}")]
	Certs(#[from] certs::Error),

	#[error("failed to bind listener on {addr}: {source}")]
	Bind {
		addr: String,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid TLS minimum version selector: {0}")]
	InvalidTlsVersion(u8),

	#[error("invalid network family: {0:?} (expected tcp4, tcp6, tcp or unix)")]
	InvalidNetwork(String),

	#[error("no listen hosts configured")]
	NoHosts,
}

/// Per-connection errors. Always recovered by tearing down the one connection;
/// never propagated past the connection task.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
	#[error("protocol detection failed: {0}")]
	Classify(#[from] classify::Error),

	#[error("TLS handshake with {peer} failed: {source}")]
	Handshake {
		peer: SocketAddr,
		#[source]
		source: tls::Error,
	},

	#[error(transparent)]
	Relay(#[from] relay::Error),
}
