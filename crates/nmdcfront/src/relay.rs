//! Relay Engine (`4.E`): builds the `$MyIP` preamble, dials the hub, and pumps
//! bytes between the client and the hub until either side closes.

use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use crate::config::{Config, Network};
use crate::io::Duplex;
use crate::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to resolve hub address {0:?}")]
	Resolve(String),
	#[error("failed to dial hub at {addr:?}: {source}")]
	Dial {
		addr: String,
		#[source]
		source: std::io::Error,
	},
	#[error("i/o error relaying connection: {0}")]
	Io(#[source] std::io::Error),
}

/// Maximum size of the `$MyIP ... 0.0|` preamble buffer. Real preambles never
/// approach this; it only bounds the textual IP representation.
const PREAMBLE_CAP: usize = 1024;

/// The literal tail written after the address: a plaintext flag digit, a dot,
/// a TLS-version digit, then the NMDC command terminator.
const TAIL: &[u8] = b" 0.0|";

/// Offsets (from the end of the preamble) of the two marker digits the TLS
/// Terminator overwrites once a handshake completes: `i-4` is the "secure"
/// flag, `i-2` is the negotiated minor version.
const SECURE_FLAG_OFFSET_FROM_END: usize = 4;
const VERSION_DIGIT_OFFSET_FROM_END: usize = 2;

/// The `$MyIP` preamble this proxy injects ahead of the hub's own banter, so
/// the hub can see the client's real address and (once TLS terminates) the
/// negotiated version, exactly as if the client had connected to it directly
/// over plaintext.
pub struct Preamble {
	buf: [u8; PREAMBLE_CAP],
	len: usize,
}

impl Preamble {
	/// Builds `$MyIP <addr> 0.0|` for `addr`'s preferred textual form
	/// (dotted-quad for IPv4, including IPv4-mapped IPv6 addresses; colon form
	/// otherwise).
	pub fn build(addr: IpAddr) -> Self {
		let text = format!("$MyIP {}", preferred_text(addr));
		let mut buf = [0u8; PREAMBLE_CAP];
		let mut len = text.len().min(PREAMBLE_CAP - TAIL.len());
		buf[..len].copy_from_slice(&text.as_bytes()[..len]);
		buf[len..len + TAIL.len()].copy_from_slice(TAIL);
		len += TAIL.len();
		Self { buf, len }
	}

	/// Overwrites the secure-flag and TLS-version marker digits in place.
	/// Called only when the connection went through the TLS Terminator; plain
	/// connections leave the `0.0` default untouched.
	pub fn mark_tls(&mut self, version_digit: u8) {
		self.buf[self.len - SECURE_FLAG_OFFSET_FROM_END] = b'1';
		self.buf[self.len - VERSION_DIGIT_OFFSET_FROM_END] = version_digit;
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.buf[..self.len]
	}
}

fn preferred_text(addr: IpAddr) -> String {
	match addr {
		IpAddr::V4(v4) => v4.to_string(),
		IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
			Some(v4) => v4.to_string(),
			None => v6.to_string(),
		},
	}
}

/// Relays one already-classified (and, if applicable, already TLS-terminated)
/// client stream to the configured hub: writes the preamble and any leftover
/// application bytes first, then pumps both directions until either closes.
pub async fn serve(
	client: Box<dyn Duplex>,
	preamble: Preamble,
	leftover: Vec<u8>,
	peer: SocketAddr,
	config: &Config,
	metrics: &Metrics,
) -> Result<(), Error> {
	let mut upstream = dial(config.hub_network, &config.hub_address).await?;

	// NoSendIP suppresses the injected preamble outright; any bytes the
	// client already sent before classification still go through untouched.
	if !config.no_send_ip {
		upstream.write_all(preamble.as_bytes()).await.map_err(Error::Io)?;
	}
	if !leftover.is_empty() {
		upstream.write_all(&leftover).await.map_err(Error::Io)?;
	}

	tracing::debug!(%peer, hub = %config.hub_address, "relaying connection");
	pump(client, upstream, config.buffer_bytes(), metrics).await
}

async fn dial(network: Network, address: &str) -> Result<Box<dyn Duplex>, Error> {
	if network == Network::Unix {
		let stream = UnixStream::connect(address).await.map_err(|source| Error::Dial {
			addr: address.to_string(),
			source,
		})?;
		return Ok(Box::new(stream));
	}

	let mut addrs: Vec<SocketAddr> = tokio::net::lookup_host(address)
		.await
		.map_err(|source| Error::Dial {
			addr: address.to_string(),
			source,
		})?
		.collect();
	match network {
		Network::Tcp4 => addrs.retain(SocketAddr::is_ipv4),
		Network::Tcp6 => addrs.retain(SocketAddr::is_ipv6),
		Network::Tcp | Network::Unix => {},
	}
	if addrs.is_empty() {
		return Err(Error::Resolve(address.to_string()));
	}

	let mut last_err = None;
	for candidate in addrs {
		match TcpStream::connect(candidate).await {
			Ok(stream) => {
				let _ = stream.set_nodelay(true);
				return Ok(Box::new(stream));
			},
			Err(e) => last_err = Some(e),
		}
	}
	Err(Error::Dial {
		addr: address.to_string(),
		source: last_err.expect("addrs non-empty implies at least one connect attempt"),
	})
}

/// Runs both copy directions concurrently and closes the whole connection the
/// moment either one finishes (EOF or error) - a client or hub that goes away
/// must not leave the other side's read blocked forever.
async fn pump(client: Box<dyn Duplex>, upstream: Box<dyn Duplex>, buf_size: usize, metrics: &Metrics) -> Result<(), Error> {
	let (client_rx, client_tx) = tokio::io::split(client);
	let (upstream_rx, upstream_tx) = tokio::io::split(upstream);

	let rx_bytes = metrics.conn_rx_bytes.clone();
	let tx_bytes = metrics.conn_tx_bytes.clone();

	let client_to_hub = tokio::spawn(copy_loop(client_rx, upstream_tx, buf_size, rx_bytes));
	let hub_to_client = tokio::spawn(copy_loop(upstream_rx, client_tx, buf_size, tx_bytes));

	let result = tokio::select! {
		r = client_to_hub => { hub_to_client.abort(); r }
		r = hub_to_client => { client_to_hub.abort(); r }
	};

	match result {
		Ok(inner) => inner,
		Err(_join_error) => Ok(()),
	}
}

/// One direction of the relay: read a chunk, write it out in full, repeat
/// until EOF. `AsyncWriteExt::write_all` already treats a stalled write
/// (`WriteZero`) as an error, so a short write and a broken pipe surface the
/// same way.
async fn copy_loop<R, W>(mut src: R, mut dst: W, buf_size: usize, counted: prometheus_client::metrics::counter::Counter) -> Result<(), Error>
where
	R: tokio::io::AsyncRead + Unpin,
	W: tokio::io::AsyncWrite + Unpin,
{
	let mut buf = vec![0u8; buf_size.max(1)];
	loop {
		let n = src.read(&mut buf).await.map_err(Error::Io)?;
		if n == 0 {
			return Ok(());
		}
		dst.write_all(&buf[..n]).await.map_err(Error::Io)?;
		counted.inc_by(n as u64);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn preamble_defaults_to_plaintext_markers() {
		let p = Preamble::build("203.0.113.7".parse().unwrap());
		let text = std::str::from_utf8(p.as_bytes()).unwrap();
		assert_eq!(text, "$MyIP 203.0.113.7 0.0|");
	}

	#[test]
	fn mark_tls_overwrites_flag_and_version_digits() {
		let mut p = Preamble::build("203.0.113.7".parse().unwrap());
		p.mark_tls(b'3');
		let text = std::str::from_utf8(p.as_bytes()).unwrap();
		assert_eq!(text, "$MyIP 203.0.113.7 1.3|");
	}

	#[test]
	fn ipv6_uses_colon_form() {
		let p = Preamble::build("2001:db8::1".parse().unwrap());
		let text = std::str::from_utf8(p.as_bytes()).unwrap();
		assert_eq!(text, "$MyIP 2001:db8::1 0.0|");
	}

	#[test]
	fn ipv4_mapped_ipv6_prefers_dotted_quad() {
		let mapped: IpAddr = "::ffff:203.0.113.7".parse().unwrap();
		let p = Preamble::build(mapped);
		let text = std::str::from_utf8(p.as_bytes()).unwrap();
		assert_eq!(text, "$MyIP 203.0.113.7 0.0|");
	}
}
