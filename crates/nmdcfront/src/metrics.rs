//! Metrics sinks (`6.` External interfaces - metrics): one
//! `prometheus_client::registry::Registry` of counters/gauges/histograms,
//! constructed once and shared by every connection task.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// All instruments the proxy exposes. Cloning any field is cheap - each
/// instrument is an `Arc` around an atomic - so connection tasks hold their
/// own clones rather than a shared `&Metrics`.
#[derive(Clone)]
pub struct Metrics {
	pub conn_accepted: Counter,
	pub conn_error: Counter,
	pub conn_open: Gauge,
	pub conn_insecure: Counter,
	pub conn_insecure_open: Gauge,
	pub conn_tls: Counter,
	pub conn_tls_open: Gauge,
	pub conn_tls_handshake_seconds: Histogram,
	pub conn_rx_bytes: Counter,
	pub conn_tx_bytes: Counter,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let conn_accepted = Counter::default();
		let conn_error = Counter::default();
		let conn_open = Gauge::default();
		let conn_insecure = Counter::default();
		let conn_insecure_open = Gauge::default();
		let conn_tls = Counter::default();
		let conn_tls_open = Gauge::default();
		let conn_tls_handshake_seconds = Histogram::new(prometheus_client::metrics::histogram::exponential_buckets(0.001, 2.0, 12));
		let conn_rx_bytes = Counter::default();
		let conn_tx_bytes = Counter::default();

		registry.register("conn_accepted", "Connections accepted by the listener set", conn_accepted.clone());
		registry.register("conn_error", "Connections that failed classification, handshake or relay", conn_error.clone());
		registry.register("conn_open", "Connections currently being relayed", conn_open.clone());
		registry.register("conn_insecure", "Connections classified as plaintext NMDC", conn_insecure.clone());
		registry.register("conn_insecure_open", "Plaintext connections currently being relayed", conn_insecure_open.clone());
		registry.register("conn_tls", "Connections that completed a TLS handshake", conn_tls.clone());
		registry.register("conn_tls_open", "TLS connections currently being relayed", conn_tls_open.clone());
		registry.register(
			"conn_tls_handshake_seconds",
			"TLS handshake duration",
			conn_tls_handshake_seconds.clone(),
		);
		registry.register("conn_rx_bytes", "Bytes relayed from client to hub", conn_rx_bytes.clone());
		registry.register("conn_tx_bytes", "Bytes relayed from hub to client", conn_tx_bytes.clone());

		Self {
			conn_accepted,
			conn_error,
			conn_open,
			conn_insecure,
			conn_insecure_open,
			conn_tls,
			conn_tls_open,
			conn_tls_handshake_seconds,
			conn_rx_bytes,
			conn_tx_bytes,
		}
	}
}
