//! Ambient plumbing shared by the proxy core, the CLI binary and the C ABI shim:
//! Go-style duration parsing/formatting (so `-wait` accepts `"600ms"`) and
//! tracing subscriber bootstrap.

pub mod duration;
pub mod logging;
