use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Network family used to dial the upstream hub. Listeners are always
/// TCP/IPv4-or-dual-stack per the host string given; this selector only
/// governs the upstream dial (see `4.B Listener Set`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	Tcp4,
	Tcp6,
	Tcp,
	Unix,
}

impl Network {
	pub fn parse(s: &str) -> Result<Self, Error> {
		match s {
			"tcp4" => Ok(Network::Tcp4),
			"tcp6" => Ok(Network::Tcp6),
			"tcp" => Ok(Network::Tcp),
			"unix" => Ok(Network::Unix),
			other => Err(Error::InvalidNetwork(other.to_string())),
		}
	}
}

/// Minimum negotiable TLS protocol version, `0..=3` mapping to `1.0..=1.3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TlsVersion(u8);

impl TlsVersion {
	pub fn from_selector(v: u8) -> Result<Self, Error> {
		if v > 3 {
			return Err(Error::InvalidTlsVersion(v));
		}
		Ok(TlsVersion(v))
	}

	/// The set of protocol versions rustls should be willing to negotiate,
	/// given this minimum. rustls only implements TLS 1.2 and 1.3, so
	/// selectors 0/1 (TLS 1.0/1.1) floor at 1.2 rather than being rejected -
	/// recorded as an implementation decision in DESIGN.md.
	pub fn to_rustls_versions(self) -> &'static [&'static rustls::SupportedProtocolVersion] {
		if self.0 >= 3 {
			&[&rustls::version::TLS13]
		} else {
			&[&rustls::version::TLS12, &rustls::version::TLS13]
		}
	}
}

impl Default for TlsVersion {
	fn default() -> Self {
		TlsVersion(2)
	}
}

/// Certificate subject fields used when (re)generating the self-signed pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CertSubject {
	pub org: String,
	pub mail: String,
	pub hosts: Vec<String>,
}

impl Default for CertSubject {
	fn default() -> Self {
		Self {
			org: "Verlihub".to_string(),
			mail: "verlihub@localhost".to_string(),
			hosts: vec!["localhost".to_string()],
		}
	}
}

/// Immutable-after-validation proxy configuration. Constructed by the CLI
/// binary or the C ABI shim and handed to [`crate::Proxy::new`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
	pub hosts: Vec<String>,
	pub hub_network: Network,
	pub hub_address: String,
	pub cert_path: String,
	pub key_path: String,
	pub cert_subject: CertSubject,
	pub wait: Duration,
	pub buffer_kb: usize,
	pub min_tls_version: TlsVersion,
	pub no_send_ip: bool,
	pub log_errors: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			hosts: vec![":411".to_string()],
			hub_network: Network::Tcp4,
			hub_address: "127.0.0.1:411".to_string(),
			cert_path: "hub.crt".to_string(),
			key_path: "hub.key".to_string(),
			cert_subject: CertSubject::default(),
			wait: Duration::from_millis(600),
			buffer_kb: 10,
			min_tls_version: TlsVersion::default(),
			no_send_ip: false,
			log_errors: false,
		}
	}
}

impl Config {
	pub fn validate(&self) -> Result<(), Error> {
		if self.hosts.is_empty() {
			return Err(Error::NoHosts);
		}
		Ok(())
	}

	/// Buffer size for each direction's copy loop, in bytes. A zero-producing
	/// `buffer_kb` is clamped to 1 byte so the copy loop still makes progress
	/// (`8.` Boundary behaviours - Buffer clamp).
	pub fn buffer_bytes(&self) -> usize {
		(self.buffer_kb * 1024).max(1)
	}

	/// Advisory mutator: the spec leaves `SetBuf`/`SetWait`/`SetLog` as racy
	/// operations meant to be called only while the proxy is quiescent. Taking
	/// `&mut self` makes that a structural guarantee instead of a runtime one -
	/// no caller can hold a shared `&Config` (as every live connection does via
	/// `Arc<Config>`) and call these at the same time.
	pub fn set_buf(&mut self, kb: usize) {
		self.buffer_kb = kb;
	}

	pub fn set_wait(&mut self, wait: Duration) {
		self.wait = wait;
	}

	pub fn set_log_errors(&mut self, enabled: bool) {
		self.log_errors = enabled;
	}
}
