use tokio::io::{AsyncRead, AsyncWrite};

/// A socket-like type, regardless of whether it's a raw TCP stream, a TLS
/// stream wrapping a [`crate::tls::ReplayThenSocket`], or a Unix domain
/// stream. Lets the Relay Engine treat the client side and the upstream side
/// uniformly once classification/handshake is done.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}
