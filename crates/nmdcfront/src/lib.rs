//! An NMDC-aware TCP/TLS front-end proxy: accepts client connections, peeks
//! their first bytes to tell plaintext NMDC from a TLS ClientHello, optionally
//! terminates TLS, and relays to a single upstream hub behind an injected
//! `$MyIP` preamble.
//!
//! The five components: [`certs`] (Certificate Manager), [`listener`]
//! (Listener Set), [`classify`] (Protocol Classifier), [`tls`] (TLS
//! Terminator) and [`relay`] (Relay Engine). [`Proxy`] wires them together.

pub mod certs;
pub mod classify;
pub mod config;
mod error;
pub mod io;
pub mod listener;
pub mod metrics;
pub mod relay;
pub mod tls;

pub use config::Config;
pub use error::{ConnectionError, Error};
pub use metrics::Metrics;

use std::net::SocketAddr;
use std::sync::Arc;

use prometheus_client::registry::Registry;
use tokio::net::TcpStream;
use tokio::sync::watch;

use listener::ListenerSet;
use tls::TlsContext;

/// Runtime state shared by every connection task.
struct Shared {
	config: Config,
	tls: Option<TlsContext>,
	metrics: Metrics,
}

/// The assembled proxy. [`Proxy::new`] performs all startup-fatal work
/// (certificate bootstrap, TLS context construction, binding); [`Proxy::run`]
/// drives every listener's accept loop until [`Proxy::close`] is called.
pub struct Proxy {
	shared: Arc<Shared>,
	listeners: ListenerSet,
	close_tx: watch::Sender<bool>,
	close_rx: watch::Receiver<bool>,
	pub registry: Registry,
}

impl Proxy {
	/// Validates `config`, ensures a usable certificate/key pair exists,
	/// builds the TLS context (skipped entirely when `wait == 0`, since
	/// detection never runs and the cert would sit unused), binds every
	/// configured host, and assembles the metrics registry.
	pub async fn new(config: Config) -> Result<Self, Error> {
		config.validate()?;
		ignore_sigpipe();

		let fingerprints = certs::ensure(&config.cert_path, &config.key_path, &config.cert_subject)?;
		for fp in &fingerprints {
			tracing::info!(fingerprint = %fp, "certificate fingerprint");
		}

		let tls = if config.wait.is_zero() {
			None
		} else {
			Some(TlsContext::load(&config.cert_path, &config.key_path, config.min_tls_version)?)
		};

		let listeners = ListenerSet::bind(&config.hosts).await.map_err(|e| match e {
			listener::Error::Bind { addr, source } => Error::Bind { addr, source },
		})?;

		let mut registry = Registry::default();
		let metrics = Metrics::new(&mut registry);

		let (close_tx, close_rx) = watch::channel(false);

		Ok(Self {
			shared: Arc::new(Shared { config, tls, metrics }),
			listeners,
			close_tx,
			close_rx,
			registry,
		})
	}

	pub fn config(&self) -> &Config {
		&self.shared.config
	}

	/// Runs every listener's accept loop until [`Proxy::close`] is called.
	/// Each accepted connection is handled on its own task and never blocks
	/// the accept loop it came from. Takes `&self` so the caller can still
	/// call [`Proxy::close`] from another branch of a `select!` while this
	/// future is in flight.
	pub async fn run(&self) {
		let shared = self.shared.clone();
		let log_errors = shared.config.log_errors;
		let close_rx = self.close_rx.clone();

		let handles = self.listeners.serve(log_errors, close_rx, move |socket, peer| {
			let shared = shared.clone();
			tokio::spawn(async move {
				shared.metrics.conn_accepted.inc();
				shared.metrics.conn_open.inc();
				if let Err(e) = handle_connection(shared.clone(), socket, peer).await {
					shared.metrics.conn_error.inc();
					if shared.config.log_errors {
						tracing::warn!(%peer, error = %e, "connection failed");
					}
				}
				shared.metrics.conn_open.dec();
			});
		});

		for handle in handles {
			let _ = handle.await;
		}
	}

	/// Signals every accept loop to stop taking new connections. Connections
	/// already being relayed are left to finish on their own.
	pub fn close(&self) {
		let _ = self.close_tx.send(true);
	}
}

/// Classifies, optionally terminates TLS on, and relays one accepted
/// connection. Never panics on a hostile or silent peer; every failure path
/// becomes a [`ConnectionError`] the caller logs and discards.
async fn handle_connection(shared: Arc<Shared>, mut socket: TcpStream, peer: SocketAddr) -> Result<(), ConnectionError> {
	let mut buf = vec![0u8; 1024];
	let tls_enabled = shared.tls.is_some();
	let classification = classify::classify(&mut socket, &mut buf, shared.config.wait, tls_enabled).await?;
	buf.truncate(classification.peeked);

	let mut preamble = relay::Preamble::build(peer.ip());

	let (client, leftover): (Box<dyn io::Duplex>, Vec<u8>) = match classification.kind {
		classify::Kind::Plain => {
			shared.metrics.conn_insecure.inc();
			shared.metrics.conn_insecure_open.inc();
			(Box::new(socket), buf)
		},
		classify::Kind::Tls => {
			let tls_ctx = shared.tls.as_ref().expect("tls_enabled implies a TLS context was built");
			let started = std::time::Instant::now();
			let (stream, version_digit) = tls_ctx
				.handshake(socket, buf)
				.await
				.map_err(|source| ConnectionError::Handshake { peer, source })?;
			shared.metrics.conn_tls_handshake_seconds.observe(started.elapsed().as_secs_f64());
			shared.metrics.conn_tls.inc();
			shared.metrics.conn_tls_open.inc();
			preamble.mark_tls(version_digit);
			(Box::new(stream), Vec::new())
		},
	};

	let result = relay::serve(client, preamble, leftover, peer, &shared.config, &shared.metrics).await;

	match classification.kind {
		classify::Kind::Plain => shared.metrics.conn_insecure_open.dec(),
		classify::Kind::Tls => shared.metrics.conn_tls_open.dec(),
	};

	Ok(result?)
}

#[cfg(unix)]
fn ignore_sigpipe() {
	unsafe {
		libc::signal(libc::SIGPIPE, libc::SIG_IGN);
	}
}

#[cfg(not(unix))]
fn ignore_sigpipe() {}
