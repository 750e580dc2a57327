//! Transport abstraction (component C, spec §4.C): endpoint kinds,
//! socket readiness bits, and the `Addrd<T>` wrapper pairing a value with
//! the peer address it came from or is headed to.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// Data paired with the socket address it was received from, or should be
/// sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  pub fn data(&self) -> &T {
    &self.0
  }

  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  pub fn unwrap(self) -> T {
    self.0
  }

  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(&self.0, self.1)
  }

  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  pub fn fold<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> R {
    f(self.0, self.1)
  }
}

/// Which wire protocol (and security posture) a session's transport uses
/// (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
  Udp,
  DtlsOverUdp,
  Tcp,
  TlsOverTcp,
}

impl Transport {
  pub fn is_reliable(&self) -> bool {
    matches!(self, Transport::Tcp | Transport::TlsOverTcp)
  }

  pub fn is_secure(&self) -> bool {
    matches!(self, Transport::DtlsOverUdp | Transport::TlsOverTcp)
  }

  /// UDP framings carry a message id; TCP framings never do (spec §3, §4.A).
  pub fn framing(&self) -> crate::msg::codec::Framing {
    match self {
      | Transport::Udp | Transport::DtlsOverUdp => crate::msg::codec::Framing::Udp,
      | Transport::Tcp | Transport::TlsOverTcp => crate::msg::codec::Framing::Tcp,
    }
  }
}

/// Readiness bits the scheduler consults before performing I/O on a
/// socket (spec §4.C, §4.J `prepare_io`/`do_io`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
  pub want_read: bool,
  pub want_write: bool,
  pub want_accept: bool,
  pub want_connect: bool,
  pub can_read: bool,
  pub can_write: bool,
  pub can_accept: bool,
  pub can_connect: bool,
}

impl Readiness {
  pub fn wants_anything(&self) -> bool {
    self.want_read || self.want_write || self.want_accept || self.want_connect
  }

  pub fn can_do_anything(&self) -> bool {
    self.can_read || self.can_write || self.can_accept || self.can_connect
  }
}

/// Non-blocking send/recv capability the integrator supplies per context
/// (spec §4.C). Mirrors `std::net::UdpSocket`'s shape so the concrete
/// `std` implementation is a thin wrapper; `std::io::ErrorKind::WouldBlock`
/// stands in for `nb`'s `WouldBlock` in a std-only crate.
pub trait Socket: Sized {
  fn local_addr(&self) -> io::Result<SocketAddr>;
  fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self>;
  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<usize>;
  fn recv(&self, buf: &mut [u8]) -> io::Result<Addrd<usize>>;
  fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
  /// Bound how long the readiness driver's wait step may block on this
  /// socket (spec §4.J `prepare_io`/`do_io`); `None` blocks indefinitely.
  fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Socket for UdpSocket {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    UdpSocket::local_addr(self)
  }

  fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
    // Left in blocking mode: the scheduler's readiness driver bounds each
    // wait with `set_read_timeout` rather than spinning on `WouldBlock`.
    UdpSocket::bind(addr)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<usize> {
    self.send_to(msg.0, msg.1)
  }

  fn recv(&self, buf: &mut [u8]) -> io::Result<Addrd<usize>> {
    let (n, addr) = self.recv_from(buf)?;
    Ok(Addrd(n, addr))
  }

  fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
    UdpSocket::set_nonblocking(self, nonblocking)
  }

  fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
    UdpSocket::set_read_timeout(self, timeout)
  }
}

/// `true` iff `err` is the would-block/timed-out condition a `Socket` is
/// expected to report when a bounded wait elapsed with nothing to do —
/// covers both non-blocking sockets (`WouldBlock`) and blocking sockets
/// with `set_read_timeout` set (`TimedOut`, the kind platforms disagree
/// on reporting for an expired `SO_RCVTIMEO`).
pub fn would_block(err: &io::Error) -> bool {
  matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn addrd_map_preserves_address() {
    let addr: SocketAddr = "127.0.0.1:5683".parse().unwrap();
    let a = Addrd(3u8, addr).map(|n| n * 2);
    assert_eq!(a.unwrap(), 6);
    assert_eq!(a.1, addr);
  }

  #[test]
  fn transport_framing() {
    assert_eq!(Transport::Udp.framing(), crate::msg::codec::Framing::Udp);
    assert_eq!(Transport::Tcp.framing(), crate::msg::codec::Framing::Tcp);
    assert!(Transport::TlsOverTcp.is_secure());
    assert!(Transport::Tcp.is_reliable());
  }
}
