//! Listener Set (`4.B`): one bound TCP listener per configured host, each
//! running its own accept loop until told to close.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to bind listener on {addr}: {source}")]
	Bind {
		addr: String,
		#[source]
		source: std::io::Error,
	},
}

/// One bound listener, tied to the host string it was configured with - kept
/// around for logging, since the spec addresses listeners by configured host
/// rather than resolved local address.
pub struct Listener {
	pub host: String,
	inner: TcpListener,
}

impl Listener {
	pub async fn bind(host: &str) -> Result<Self, Error> {
		let inner = TcpListener::bind(host).await.map_err(|source| Error::Bind {
			addr: host.to_string(),
			source,
		})?;
		Ok(Self {
			host: host.to_string(),
			inner,
		})
	}
}

/// A bound listener per configured host. A connection accepted on any one of
/// them is handled identically.
pub struct ListenerSet {
	listeners: Vec<Arc<Listener>>,
}

impl ListenerSet {
	pub async fn bind(hosts: &[String]) -> Result<Self, Error> {
		let mut listeners = Vec::with_capacity(hosts.len());
		for host in hosts {
			listeners.push(Arc::new(Listener::bind(host).await?));
		}
		Ok(Self { listeners })
	}

	/// Runs every listener's accept loop until `close` fires. Each accepted
	/// connection is handed to `on_accept`, which owns spawning its own task;
	/// a failed accept is logged (gated by `log_errors`) and the loop
	/// continues rather than tearing the listener down. Borrows `self` so the
	/// caller can keep issuing `close` signals while the returned handles run.
	pub fn serve<F>(&self, log_errors: bool, close: watch::Receiver<bool>, on_accept: F) -> Vec<tokio::task::JoinHandle<()>>
	where
		F: Fn(TcpStream, SocketAddr) + Clone + Send + Sync + 'static,
	{
		self.listeners
			.iter()
			.cloned()
			.map(|listener| {
				let mut close = close.clone();
				let on_accept = on_accept.clone();
				tokio::spawn(async move {
					loop {
						tokio::select! {
							biased;
							_ = close.changed() => {
								tracing::info!(host = %listener.host, "listener closing");
								return;
							}
							accepted = listener.inner.accept() => {
								match accepted {
									Ok((socket, peer)) => on_accept(socket, peer),
									Err(e) => {
										if log_errors {
											tracing::warn!(host = %listener.host, error = %e, "accept failed");
										}
									},
								}
							}
						}
					}
				})
			})
			.collect()
	}
}
