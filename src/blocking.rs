//! A synchronous poll-loop wrapper around [`Context`](crate::scheduler::Context),
//! for callers who'd rather block on a request than drive the event loop
//! themselves.
//!
//! Grounded on the teacher's `blocking::client::Client`, which wraps the
//! non-blocking `Core` in exactly this shape: build a request, hand it to
//! the runtime, then `nb::block!` on the matching response. This crate has
//! no `nb` dependency (the teacher only pulls it in for the embedded/no_std
//! targets this crate doesn't target), so the block loop is spelled out
//! directly against [`Context::process`].

use std::cell::RefCell;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;
use std::time::Duration;

use crate::config::Config;
use crate::io_driver::PosixDriver;
use crate::msg::{Message, Token};
use crate::net::Transport;
use crate::scheduler::{Context, COAP_IO_NO_WAIT, COAP_IO_WAIT};
use crate::time::SystemClock;

/// A blocking CoAP request client running over a plain UDP socket.
pub struct Client {
  ctx: Context<UdpSocket, SystemClock, PosixDriver>,
  responses: Rc<RefCell<Vec<(usize, Message)>>>,
}

impl Client {
  /// Bind a new client to `addr` (use `"0.0.0.0:0"` for an ephemeral port).
  pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
    Self::bind_config(addr, Config::default())
  }

  pub fn bind_config<A: ToSocketAddrs>(addr: A, config: Config) -> io::Result<Self> {
    let sock = UdpSocket::bind(addr)?;
    let mut ctx = Context::new(sock, SystemClock::new(), PosixDriver, config, Transport::Udp);
    let responses = Rc::new(RefCell::new(Vec::new()));
    let responses2 = responses.clone();
    ctx.handlers.on_response = Some(Box::new(move |session, msg| {
                                  responses2.borrow_mut().push((session, msg.clone()));
                                }));
    Ok(Client { ctx, responses })
  }

  /// Send a request and block until the matching response arrives or
  /// `timeout` elapses.
  pub fn send(&mut self, addr: SocketAddr, req: Message, confirmable: bool, timeout: Duration)
              -> io::Result<Option<Message>> {
    let token = self.send_request(addr, req, confirmable)?;
    self.poll_for(token, timeout)
  }

  /// Hand `req` to the underlying [`Context`] without waiting for a
  /// reply; pair with [`poll_once`](Self::poll_once) and
  /// [`try_take`](Self::try_take) to interleave with another
  /// [`Context`] (e.g. a server under test) on the same thread.
  pub fn send_request(&mut self, addr: SocketAddr, req: Message, confirmable: bool) -> io::Result<Token> {
    Ok(self.ctx.send_request(addr, req, confirmable)?.token)
  }

  /// Drive one non-blocking iteration of the underlying [`Context`].
  pub fn poll_once(&mut self) {
    self.ctx.process(COAP_IO_NO_WAIT);
  }

  /// Remove and return the buffered response matching `token`, if any
  /// has arrived since the last poll.
  pub fn try_take(&mut self, token: Token) -> Option<Message> {
    let mut responses = self.responses.borrow_mut();
    let pos = responses.iter().position(|(_, m)| m.token == token)?;
    Some(responses.remove(pos).1)
  }

  /// Ping `addr` and block until the pong arrives or `timeout` elapses.
  pub fn ping(&mut self, addr: SocketAddr, timeout: Duration) -> io::Result<bool> {
    let ponged = Rc::new(RefCell::new(false));
    let ponged2 = ponged.clone();
    self.ctx.handlers.on_pong = Some(Box::new(move |_session| *ponged2.borrow_mut() = true));
    self.ctx.ping(addr)?;

    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
      self.ctx.process(COAP_IO_WAIT);
      if *ponged.borrow() {
        return Ok(true);
      }
    }
    Ok(false)
  }

  fn poll_for(&mut self, token: Token, timeout: Duration) -> io::Result<Option<Message>> {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
      self.ctx.process(COAP_IO_WAIT);
      if let Some(resp) = self.try_take(token) {
        return Ok(Some(resp));
      }
    }
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::msg::code::method;
  use crate::msg::{Id, Type};
  use crate::server::resource::Method;
  use crate::server::Resource;

  #[test]
  fn blocking_request_response_roundtrip() {
    let mut server_ctx =
      Context::new(UdpSocket::bind("127.0.0.1:0").unwrap(), SystemClock::new(), PosixDriver, Config::default(),
                    Transport::Udp);
    let mut r = Resource::new("hello");
    r.on(Method::Get, |req| {
      let mut resp = req.ack(crate::msg::code::resp::CONTENT);
      resp.payload = b"world".to_vec();
      resp
    });
    server_ctx.resources.add(r);
    let server_addr = server_ctx.local_addr().unwrap();

    let mut client = Client::bind("127.0.0.1:0").unwrap();
    let mut req = Message::new(Type::Con, method::GET, Id(0), Token::EMPTY);
    req.set_path("hello");
    let token = client.send_request(server_addr, req, true).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut resp = None;
    while resp.is_none() && std::time::Instant::now() < deadline {
      server_ctx.process(0);
      client.poll_once();
      resp = client.try_take(token);
    }
    assert_eq!(resp.map(|m| m.payload), Some(b"world".to_vec()));
  }
}
