use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format for the terminal log layer. JSON is useful when the process
/// is run under a log collector; plain text is nicer on an interactive TTY.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

/// Installs a global `tracing` subscriber. The core library never does this
/// itself - only the binary entry points (`nmdcfront-app`, and optionally a
/// C ABI host) own the decision of where logs go.
pub fn init(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Text => {
			registry.with(tracing_subscriber::fmt::layer()).init();
		},
		LogFormat::Json => {
			registry
				.with(tracing_subscriber::fmt::layer().json())
				.init();
		},
	}
}
