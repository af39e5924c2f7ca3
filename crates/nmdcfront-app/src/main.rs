//! CLI entry point: parses flags, builds a [`nmdcfront::Config`], and runs the
//! proxy until `SIGINT`/`SIGTERM`.

use std::time::Duration;

use clap::Parser;
use nmdcfront::config::{CertSubject, Network, TlsVersion};
use nmdcfront::Config;
use nmdcfront_core::logging::{self, LogFormat};

/// An NMDC-aware TCP/TLS front-end proxy.
#[derive(Parser, Debug)]
#[command(name = "nmdcfront", version)]
struct Args {
	/// Space-separated listen addresses, each `host:port`.
	#[arg(long = "host", default_value = ":411")]
	host: String,

	/// Hub address to relay to, `host:port` or a Unix socket path.
	#[arg(long = "hub", default_value = "127.0.0.1:411")]
	hub: String,

	/// Network family used to dial the hub: tcp4, tcp6, tcp or unix.
	#[arg(long = "net", default_value = "tcp4")]
	net: String,

	/// How long to wait for the client's first bytes before classifying the
	/// connection as plaintext, Go duration syntax (e.g. "600ms"). A value of
	/// "0" disables TLS detection entirely.
	#[arg(long = "wait", default_value = "600ms")]
	wait: String,

	/// Relay buffer size per direction, in kilobytes.
	#[arg(long = "buf", default_value_t = 10)]
	buf: usize,

	/// Minimum negotiable TLS version: 0 (1.0) through 3 (1.3).
	#[arg(long = "ver", default_value_t = 2)]
	ver: u8,

	/// Path to the PEM certificate chain. Regenerated as a self-signed
	/// RSA-2048 pair when missing, unreadable or expired.
	#[arg(long = "cert", default_value = "hub.crt")]
	cert: String,

	/// Path to the PEM private key.
	#[arg(long = "key", default_value = "hub.key")]
	key: String,

	/// Organization name used when (re)generating a self-signed certificate.
	#[arg(long = "cert-org", default_value = "Verlihub")]
	cert_org: String,

	/// Contact email used when (re)generating a self-signed certificate.
	#[arg(long = "cert-mail", default_value = "verlihub@localhost")]
	cert_mail: String,

	/// Space-separated subject alternative name hosts used when
	/// (re)generating a self-signed certificate.
	#[arg(long = "cert-host", default_value = "localhost")]
	cert_host: String,

	/// Inject the `$MyIP` preamble carrying the client's real address. Disable
	/// to relay silently (NoSendIP).
	#[arg(long = "ip", default_value_t = true, action = clap::ArgAction::Set)]
	ip: bool,

	/// Log per-connection errors (classification, handshake, relay failures).
	#[arg(long = "log", default_value_t = false)]
	log: bool,

	/// Log output format.
	#[arg(long = "log-format", default_value = "text")]
	log_format: String,
}

impl Args {
	fn into_config(self) -> anyhow::Result<Config> {
		let wait = nmdcfront_core::duration::parse(&self.wait).map_err(anyhow::Error::msg)?;
		let hosts = self.host.split_whitespace().map(str::to_string).collect();
		let cert_hosts = self.cert_host.split_whitespace().map(str::to_string).collect();
		Ok(Config {
			hosts,
			hub_network: Network::parse(&self.net)?,
			hub_address: self.hub,
			cert_path: self.cert,
			key_path: self.key,
			cert_subject: CertSubject {
				org: self.cert_org,
				mail: self.cert_mail,
				hosts: cert_hosts,
			},
			wait,
			buffer_kb: self.buf,
			min_tls_version: TlsVersion::from_selector(self.ver)?,
			no_send_ip: !self.ip,
			log_errors: self.log,
		})
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	let log_format = match args.log_format.as_str() {
		"json" => LogFormat::Json,
		_ => LogFormat::Text,
	};
	logging::init(log_format);

	let config = args.into_config()?;
	let proxy = nmdcfront::Proxy::new(config).await?;

	let mut sigterm = signal_stream();
	let run = proxy.run();
	tokio::pin!(run);
	tokio::select! {
		_ = &mut run => {},
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received interrupt, closing listeners");
			proxy.close();
		}
		_ = sigterm.recv() => {
			tracing::info!("received SIGTERM, closing listeners");
			proxy.close();
		}
	}
	run.await;

	Ok(())
}

#[cfg(unix)]
fn signal_stream() -> tokio::signal::unix::Signal {
	tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler")
}

#[cfg(not(unix))]
struct NeverSignal;

#[cfg(not(unix))]
impl NeverSignal {
	async fn recv(&mut self) -> Option<()> {
		std::future::pending().await
	}
}

#[cfg(not(unix))]
fn signal_stream() -> NeverSignal {
	NeverSignal
}
