use std::{io, net::SocketAddr};

/// The reliable datagram transport a connection runs on. RakNet is the usual
/// implementation; the connection only needs ordered delivery of discrete
/// messages, so anything message shaped works.
///
/// Batches must arrive whole: one `send` on one side is one `recv` on the
/// other, in order. The transport owns reliability, ordering and MTU
/// handling.
pub trait Transport: Send + Sync {
  /// Sends one batch to the other side.
  fn send(&self, batch: &[u8]) -> io::Result<()>;

  /// Blocks until the next inbound batch arrives. Once [`close`](Self::close)
  /// has been called, this must return an error rather than block forever, so
  /// the connection's reader can exit.
  fn recv(&self) -> io::Result<Vec<u8>>;

  fn local_addr(&self) -> SocketAddr;
  fn remote_addr(&self) -> SocketAddr;

  /// Closes the transport. Wakes any blocked [`recv`](Self::recv).
  fn close(&self) -> io::Result<()>;
}
