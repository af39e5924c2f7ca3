//! C ABI shim (`6.` External interfaces - C ABI): `NewConfig`, `Start`,
//! `Stop`, `LastError`. Exactly one proxy instance runs per process, driven by
//! its own Tokio runtime on a dedicated thread - callers never see async Rust.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use nmdcfront::config::{CertSubject, Network, TlsVersion};
use nmdcfront::{Config, Proxy};

/// Mirrors the CLI flags for C callers. `hosts`/`cert_hosts` are
/// comma-separated; `wait_ms` is an integer millisecond count. Obtained from
/// [`NewConfig`], filled in by the caller, then handed to [`Start`].
#[repr(C)]
pub struct CConfig {
	pub hosts: *mut c_char,
	pub hub_network: *mut c_char,
	pub hub_address: *mut c_char,
	pub cert_path: *mut c_char,
	pub key_path: *mut c_char,
	pub cert_org: *mut c_char,
	pub cert_mail: *mut c_char,
	pub cert_hosts: *mut c_char,
	pub wait_ms: u64,
	pub buffer_kb: u64,
	pub min_tls_version: u8,
	pub no_send_ip: c_int,
	pub log_errors: c_int,
}

struct Running {
	proxy: std::sync::Arc<Proxy>,
	join: std::thread::JoinHandle<()>,
}

static RUNNING: Lazy<Mutex<Option<Running>>> = Lazy::new(|| Mutex::new(None));
static LAST_ERROR: Lazy<Mutex<Option<CString>>> = Lazy::new(|| Mutex::new(None));

fn set_last_error(message: impl std::fmt::Display) {
	let message = message.to_string();
	tracing::error!(%message, "nmdcfront C ABI error");
	if let Ok(cstring) = CString::new(message) {
		*LAST_ERROR.lock().unwrap() = Some(cstring);
	}
}

/// Borrows a C string; empty on a null pointer or invalid UTF-8.
unsafe fn borrow_str<'a>(ptr: *const c_char) -> &'a str {
	if ptr.is_null() {
		return "";
	}
	unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}

fn split_csv(s: &str) -> Vec<String> {
	s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Allocates a zeroed [`CConfig`] on the heap for the caller to fill in. The
/// caller owns every string field it subsequently sets; [`Start`] only frees
/// the outer struct, never the strings it points to.
#[unsafe(no_mangle)]
pub extern "C" fn NewConfig() -> *mut CConfig {
	Box::into_raw(Box::new(CConfig {
		hosts: std::ptr::null_mut(),
		hub_network: std::ptr::null_mut(),
		hub_address: std::ptr::null_mut(),
		cert_path: std::ptr::null_mut(),
		key_path: std::ptr::null_mut(),
		cert_org: std::ptr::null_mut(),
		cert_mail: std::ptr::null_mut(),
		cert_hosts: std::ptr::null_mut(),
		wait_ms: 0,
		buffer_kb: 0,
		min_tls_version: 0,
		no_send_ip: 0,
		log_errors: 0,
	}))
}

unsafe fn config_from_c(c: &CConfig) -> Result<Config, nmdcfront::Error> {
	let hosts = split_csv(unsafe { borrow_str(c.hosts) });
	let cert_hosts = split_csv(unsafe { borrow_str(c.cert_hosts) });
	Ok(Config {
		hosts,
		hub_network: Network::parse(unsafe { borrow_str(c.hub_network) })?,
		hub_address: unsafe { borrow_str(c.hub_address) }.to_string(),
		cert_path: unsafe { borrow_str(c.cert_path) }.to_string(),
		key_path: unsafe { borrow_str(c.key_path) }.to_string(),
		cert_subject: CertSubject {
			org: unsafe { borrow_str(c.cert_org) }.to_string(),
			mail: unsafe { borrow_str(c.cert_mail) }.to_string(),
			hosts: cert_hosts,
		},
		wait: std::time::Duration::from_millis(c.wait_ms),
		buffer_kb: c.buffer_kb as usize,
		min_tls_version: TlsVersion::from_selector(c.min_tls_version)?,
		no_send_ip: c.no_send_ip != 0,
		log_errors: c.log_errors != 0,
	})
}

/// Starts the proxy from `config` (as returned by [`NewConfig`] and filled in
/// by the caller). Returns `1` on success, `0` on failure - see
/// [`LastError`]. The outer `CConfig` struct is freed either way; its string
/// fields remain the caller's to free.
///
/// # Safety
/// `config` must be a valid pointer returned by [`NewConfig`], not yet freed
/// or passed to `Start` before. Every non-null string field must point to a
/// NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Start(config: *mut CConfig) -> c_int {
	if config.is_null() {
		set_last_error("Start called with a null config");
		return 0;
	}
	let boxed = unsafe { Box::from_raw(config) };

	let mut guard = RUNNING.lock().unwrap();
	if guard.is_some() {
		set_last_error("proxy is already running");
		return 0;
	}

	let config = match unsafe { config_from_c(&boxed) } {
		Ok(c) => c,
		Err(e) => {
			set_last_error(e);
			return 0;
		},
	};
	drop(boxed);

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(rt) => rt,
		Err(e) => {
			set_last_error(e);
			return 0;
		},
	};

	let proxy = match runtime.block_on(Proxy::new(config)) {
		Ok(p) => std::sync::Arc::new(p),
		Err(e) => {
			set_last_error(e);
			return 0;
		},
	};

	let running_proxy = proxy.clone();
	let join = std::thread::spawn(move || {
		runtime.block_on(running_proxy.run());
	});

	*guard = Some(Running { proxy, join });
	1
}

/// Signals the running proxy to stop accepting new connections and blocks
/// until its runtime thread exits. A no-op if no proxy is running.
#[unsafe(no_mangle)]
pub extern "C" fn Stop() {
	let running = match RUNNING.lock().unwrap().take() {
		Some(r) => r,
		None => {
			set_last_error("no proxy is running");
			return;
		},
	};
	running.proxy.close();
	let _ = running.join.join();
}

/// Returns the last error message set by [`Start`] or [`Stop`], or null if
/// none has occurred yet. The slot is a single process-wide value: it is
/// never cleared on success and is overwritten by the next failure, so
/// callers must copy it out promptly. The returned pointer is valid until the
/// next call that fails.
#[unsafe(no_mangle)]
pub extern "C" fn LastError() -> *const c_char {
	match LAST_ERROR.lock().unwrap().as_ref() {
		Some(s) => s.as_ptr(),
		None => std::ptr::null(),
	}
}
