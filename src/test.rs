//! Shared test fixtures used across this crate's `#[cfg(test)]` modules,
//! grounded on the teacher's own `src/test.rs` (`ClockMock`/`SockMock`):
//! a deterministic fake clock and an in-memory socket pair standing in
//! for two real UDP sockets, so unit tests don't need real network I/O
//! or wall-clock sleeps.

#![cfg(test)]
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use crate::io_driver::IoDriver;
use crate::net::{Addrd, Socket};

pub use crate::time::test::FakeClock;

/// An in-memory loopback pair standing in for two UDP sockets.
#[derive(Clone)]
pub struct FakeSocket {
  self_addr: SocketAddr,
  pub inbox: Rc<RefCell<VecDeque<(Vec<u8>, SocketAddr)>>>,
  pub outbox: Rc<RefCell<VecDeque<(Vec<u8>, SocketAddr)>>>,
}

impl Socket for FakeSocket {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    Ok(self.self_addr)
  }

  fn bind<A: std::net::ToSocketAddrs>(_addr: A) -> io::Result<Self> {
    unreachable!("tests construct FakeSocket pairs directly")
  }

  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<usize> {
    self.outbox.borrow_mut().push_back((msg.0.to_vec(), msg.1));
    Ok(msg.0.len())
  }

  fn recv(&self, buf: &mut [u8]) -> io::Result<Addrd<usize>> {
    match self.inbox.borrow_mut().pop_front() {
      | Some((bytes, from)) => {
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(Addrd(bytes.len(), from))
      },
      | None => Err(io::Error::new(io::ErrorKind::WouldBlock, "empty")),
    }
  }

  fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
    Ok(())
  }

  fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
    Ok(())
  }
}

/// An [`IoDriver`] that never blocks, for tests that step time manually.
pub struct NoopDriver;

impl IoDriver<FakeSocket> for NoopDriver {
  fn wait(&mut self, _socket: &FakeSocket, _timeout: Option<Duration>) -> io::Result<()> {
    Ok(())
  }
}

/// Build two [`FakeSocket`]s, `a` and `b`, with independent inbox/outbox
/// queues so [`deliver`] can move bytes from one side's outbox into the
/// other's inbox without aliasing a queue with itself.
pub fn socket_pair(a: SocketAddr, b: SocketAddr) -> (FakeSocket, FakeSocket) {
  let a_out = Rc::new(RefCell::new(VecDeque::new()));
  let b_out = Rc::new(RefCell::new(VecDeque::new()));
  let a_in = Rc::new(RefCell::new(VecDeque::new()));
  let b_in = Rc::new(RefCell::new(VecDeque::new()));
  (FakeSocket { self_addr: a, inbox: a_in, outbox: a_out },
   FakeSocket { self_addr: b, inbox: b_in, outbox: b_out })
}

/// Drain everything queued in `from`'s outbox into `to`'s inbox.
pub fn deliver(from: &FakeSocket, to: &FakeSocket) {
  loop {
    let next = from.outbox.borrow_mut().pop_front();
    match next {
      | Some((bytes, _)) => to.inbox.borrow_mut().push_back((bytes, from.self_addr)),
      | None => break,
    }
  }
}
