//! Cooperative single-threaded event loop (component J, spec §4.J).
//!
//! `Context::process` is the sole integration point: `prepare_io` figures
//! out how long we can afford to wait, the driver blocks for that long,
//! then `do_io` drains whatever arrived and services the send queue. All
//! context-owned state (send queue, sessions, resources, cache) is only
//! ever touched from inside `process` (spec §5 "no internal locks are
//! taken on the hot path").

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::block::{self, Kind as BlockKind, Reassembly};
use crate::cache::{Cache, Lookup};
use crate::config::Config;
use crate::dedup::{Dedup, MatchResult, Outcome};
use crate::io_driver::IoDriver;
use crate::msg::code::{method, resp};
use crate::msg::codec;
use crate::msg::{Block, Id, Message, Token, Type};
use crate::net::{would_block, Addrd, Socket, Transport};
use crate::retry::Strategy;
use crate::security::SecurityProvider;
use crate::sendqueue::{NackReason, PollResult, SendQueue};
use crate::server::{self, ObserveRegistry, ResourceRegistry};
use crate::session::Session;
use crate::time::{Clock, Millis};

/// Block size (spec §4.G) used for outbound server responses and
/// inbound request bodies when a session hasn't negotiated one yet —
/// 1024 bytes, SZX 6, matching spec §8 scenario 4.
const DEFAULT_BLOCK_SIZE: u16 = 1024;

/// `Max-Age` (spec §4.I) applied to a freshly-cached GET response that
/// didn't advertise its own.
const DEFAULT_CACHE_MAX_AGE_SECONDS: u32 = 60;

/// Block until the next scheduled action (spec §4.J `COAP_IO_WAIT`).
pub const COAP_IO_WAIT: i64 = -1;
/// Drain whatever's ready and return immediately (spec §4.J `COAP_IO_NO_WAIT`).
pub const COAP_IO_NO_WAIT: i64 = 0;

/// Application-facing callbacks (spec §6: "registration hooks for
/// response/NACK/ping/pong/event handlers"). Held by value, per spec §9's
/// redesign note that callback pointers become trait/closure values
/// owned by the context rather than raw addresses.
#[derive(Default)]
pub struct Handlers {
  pub on_response: Option<Box<dyn FnMut(usize, &Message)>>,
  pub on_nack: Option<Box<dyn FnMut(usize, Option<Id>, NackReason)>>,
  pub on_pong: Option<Box<dyn FnMut(usize)>>,
  pub on_event: Option<Box<dyn FnMut(&str)>>,
}

/// Everything a context needs to track per outstanding client request, so
/// an inbound response/notification can be routed and (if Block2) quietly
/// reassembled before reaching the application.
struct Pending {
  path: Vec<String>,
  observe: bool,
  confirmable: bool,
}

/// A CoAP runtime: one socket, its sessions, and all the context-owned
/// engines the scheduler drives (spec §3 "Context").
pub struct Context<S: Socket, C: Clock, D: IoDriver<S>> {
  socket: S,
  clock: C,
  driver: D,
  config: Config,
  transport: Transport,

  sessions: Vec<Session>,
  session_by_addr: HashMap<SocketAddr, usize>,

  send_queue: SendQueue,
  dedup: Dedup,
  block2_in: Reassembly,
  /// Server-side inbound Block1 reassembly (large request bodies).
  block1_in: Reassembly,
  /// Server-side outbound Block2 staging: the blocks of a response still
  /// waiting to be requested, once the first one exceeded the negotiated
  /// block size (spec §4.G: "Subsequent pieces are sent on the client's
  /// explicit request").
  block2_out: HashMap<(usize, Token), VecDeque<(Block, Vec<u8>)>>,
  pending: HashMap<(usize, Token), Pending>,

  pub resources: ResourceRegistry,
  pub observers: ObserveRegistry,
  pub cache: Cache,
  pub handlers: Handlers,

  /// The injected DTLS/TLS capability (spec §6), consulted only for
  /// sessions whose transport reports [`Transport::is_secure`]. `None`
  /// for a plaintext context — no handshake is ever attempted.
  security: Option<Box<dyn SecurityProvider>>,

  cancelled: bool,
}

impl<S: Socket, C: Clock, D: IoDriver<S>> Context<S, C, D> {
  pub fn new(socket: S, clock: C, driver: D, config: Config, transport: Transport) -> Self {
    Context { socket,
              clock,
              driver,
              config,
              transport,
              sessions: Vec::new(),
              session_by_addr: HashMap::new(),
              send_queue: SendQueue::new(),
              dedup: Dedup::new(),
              block2_in: Reassembly::new(),
              block1_in: Reassembly::new(),
              block2_out: HashMap::new(),
              pending: HashMap::new(),
              resources: ResourceRegistry::new(),
              observers: ObserveRegistry::new(),
              cache: Cache::new(Default::default()),
              handlers: Handlers::default(),
              security: None,
              cancelled: false }
  }

  /// Configure the DTLS/TLS provider for this context (spec §6). Only
  /// takes effect for sessions whose transport is secure
  /// ([`Transport::DtlsOverUdp`]/[`Transport::TlsOverTcp`]); a context
  /// over a plaintext transport never calls into it.
  pub fn with_security(mut self, provider: impl SecurityProvider + 'static) -> Self {
    self.security = Some(Box::new(provider));
    self
  }

  /// Cooperative cancellation: the *next* `process` call returns without
  /// doing any I/O (spec §4.J).
  pub fn cancel(&mut self) {
    self.cancelled = true;
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.socket.local_addr()
  }

  fn session_id_for(&mut self, addr: SocketAddr) -> usize {
    if let Some(&id) = self.session_by_addr.get(&addr) {
      return id;
    }
    let id = self.sessions.len();
    let mut session = Session::new(self.transport, self.config.msg.token_seed, &self.clock);
    if self.transport.is_secure() {
      if let Some(provider) = &self.security {
        session.begin_handshake(provider.new_client_session(addr));
      }
    }
    self.sessions.push(session);
    self.session_by_addr.insert(addr, id);
    id
  }

  /// Step every session currently mid-handshake (spec §4.D HANDSHAKE
  /// state, spec §6 `handshake(handle)`). A provider-reported failure
  /// aborts the session and raises `TLSFailed` (spec §7).
  fn drive_handshakes(&mut self) {
    for id in 0..self.sessions.len() {
      if self.sessions[id].state != crate::session::State::Handshake {
        continue;
      }
      match self.sessions[id].drive_handshake() {
        | Ok(_) => {},
        | Err(reason) => {
          let _ = self.sessions[id].transition(crate::session::State::Disconnected);
          if let Some(on_event) = &mut self.handlers.on_event {
            on_event(&format!("TLS handshake failed for session {id}: {reason}"));
          }
          if let Some(on_nack) = &mut self.handlers.on_nack {
            on_nack(id, None, NackReason::TlsFailed);
          }
        },
      }
    }
  }

  fn session_addr(&self, session: usize) -> Option<SocketAddr> {
    self.session_by_addr.iter().find(|(_, &id)| id == session).map(|(addr, _)| *addr)
  }

  /// Send a request to `addr`, assigning a fresh id/token from the
  /// session and — if `confirmable` — enqueueing it for retransmission.
  /// Returns the outbound message as actually sent, so the caller can
  /// correlate the eventual response by its token.
  pub fn send_request(&mut self, addr: SocketAddr, mut req: Message, confirmable: bool) -> io::Result<Message> {
    let now = self.clock.now_ms();
    let session = self.session_id_for(addr);
    {
      let s = &mut self.sessions[session];
      req.id = s.new_message_id();
      if req.token.is_empty() {
        req.token = s.new_token(8);
      }
      req.ty = if confirmable { Type::Con } else { Type::Non };
      s.touch(now);
    }

    let path = req.path().ok().map(|p| p.into_iter().map(String::from).collect()).unwrap_or_default();
    let observe = req.observe().is_some();
    self.pending.insert((session, req.token), Pending { path, observe, confirmable });

    let bytes = codec::encode(&req, self.transport.framing()).map_err(to_io_error)?;
    self.socket.send(Addrd(&bytes, addr))?;

    if confirmable {
      let strategy = Strategy::Exponential { init_min: *self.config.msg.con.unacked_retry_strategy.range().start(),
                                              init_max: *self.config.msg.con.unacked_retry_strategy.range().end() };
      self.send_queue.insert(session, req.clone(), strategy, self.config.msg.con.max_attempts, &self.clock);
    }

    Ok(req)
  }

  /// Send a ping (Empty CON on UDP) and arrange for `on_pong` to fire
  /// when the matching Empty RST arrives (spec §8 scenario 1).
  pub fn ping(&mut self, addr: SocketAddr) -> io::Result<Id> {
    let now = self.clock.now_ms();
    let session = self.session_id_for(addr);
    let id = {
      let s = &mut self.sessions[session];
      let id = s.new_message_id();
      s.touch(now);
      s.ping_sent();
      id
    };
    let req = Message::new(Type::Con, crate::msg::code::Code::new(0, 0), id, crate::msg::Token::EMPTY);
    let bytes = codec::encode(&req, self.transport.framing()).map_err(to_io_error)?;
    self.socket.send(Addrd(&bytes, addr))?;
    self.send_queue.insert(session, req, self.config.msg.con.unacked_retry_strategy, self.config.msg.con.max_attempts,
                            &self.clock);
    Ok(id)
  }

  /// Ask the peer for the next Block2 fragment of a response already
  /// underway (spec §4.G), keeping the original request's token so the
  /// server can match it against its own staged blocks.
  fn request_next_block2(&mut self, session: usize, token: Token, path: &[String], next: Block, confirmable: bool) {
    let Some(addr) = self.session_addr(session) else { return };
    let now = self.clock.now_ms();
    let id = {
      let s = &mut self.sessions[session];
      let id = s.new_message_id();
      s.touch(now);
      id
    };
    let mut req = Message::new(if confirmable { Type::Con } else { Type::Non },
                                crate::msg::code::method::GET,
                                id,
                                token);
    req.set_path(path.join("/"));
    req.set_block2(next);
    if let Ok(bytes) = codec::encode(&req, self.transport.framing()) {
      let _ = self.socket.send(Addrd(&bytes, addr));
    }
    if confirmable {
      self.send_queue.insert(session, req, self.config.msg.con.unacked_retry_strategy,
                              self.config.msg.con.max_attempts, &self.clock);
    }
  }

  /// Push a fresh notification to every observer of `path` (spec §4.H).
  pub fn notify(&mut self, path: &[String], build: impl Fn(u32) -> Message) -> io::Result<()> {
    let seq = self.observers.next_seq(path);
    let subscribers: Vec<_> = self.observers.subscribers(path).to_vec();
    for sub in subscribers {
      let Some(addr) = self.session_addr(sub.session) else { continue };
      let mut note = build(seq);
      note.token = sub.token;
      note.set_observe_seq(seq);
      let now = self.clock.now_ms();
      let id = {
        let s = &mut self.sessions[sub.session];
        let id = s.new_message_id();
        s.touch(now);
        id
      };
      note.id = id;
      note.ty = Type::Con;
      let bytes = codec::encode(&note, self.transport.framing()).map_err(to_io_error)?;
      self.socket.send(Addrd(&bytes, addr))?;
      self.send_queue.insert(sub.session, note, self.config.msg.con.unacked_retry_strategy,
                              self.config.msg.con.max_attempts, &self.clock);
    }
    Ok(())
  }

  /// Figure out how long the next wait may safely block (spec §4.J step 1).
  fn prepare_io(&self, now: Millis) -> Option<Millis> {
    self.send_queue.next_due_at().map(|due| due.saturating_sub(now))
  }

  /// One iteration of the event loop (spec §4.J).
  ///
  /// `timeout_ms` follows the [`COAP_IO_WAIT`]/[`COAP_IO_NO_WAIT`]
  /// convention: negative blocks until the next scheduled action, `0`
  /// never blocks, positive bounds the wait. Returns milliseconds elapsed,
  /// or `0` if cancellation was requested (spec §4.J).
  pub fn process(&mut self, timeout_ms: i64) -> i64 {
    if self.cancelled {
      return 0;
    }

    let start = self.clock.now_ms();
    let next_timer = self.prepare_io(start);

    let wait = match timeout_ms {
      | COAP_IO_WAIT => next_timer.unwrap_or(60_000),
      | ms if ms <= 0 => 0,
      | ms => next_timer.map(|t| t.min(ms as u64)).unwrap_or(ms as u64),
    };

    if self.driver.wait(&self.socket, Some(Duration::from_millis(wait.max(1)))).is_err() {
      // A timeout/would-block error here just means nothing arrived in
      // the window; real I/O errors surface from `do_io` below instead.
    }

    let now = self.clock.now_ms();
    self.do_io(now);
    now.saturating_sub(start) as i64
  }

  /// Drain inbound datagrams and service the send queue (spec §4.J step 3).
  fn do_io(&mut self, now: Millis) {
    self.drive_handshakes();

    let mut buf = [0u8; 2048];
    loop {
      match self.socket.recv(&mut buf) {
        | Ok(Addrd(n, addr)) => {
          log::trace!("recv {n} bytes from {addr}");
          self.handle_datagram(&buf[..n], addr, now);
        },
        | Err(e) if would_block(&e) => break,
        | Err(e) => {
          if let Some(on_event) = &mut self.handlers.on_event {
            on_event(&format!("socket recv error: {e}"));
          }
          break;
        },
      }
    }

    while let Some(result) = self.send_queue.poll_due(now, &self.clock) {
      match result {
        | PollResult::Retransmit { session, msg } => {
          log::trace!("session {session}: retransmitting mid={:?}", msg.id);
          if let Some(addr) = self.session_addr(session) {
            if let Ok(bytes) = codec::encode(&msg, self.transport.framing()) {
              let _ = self.socket.send(Addrd(&bytes, addr));
            }
          }
        },
        | PollResult::Nack { session, id, token, reason } => {
          log::error!("session {session}: NACK mid={id:?} token={token:?} reason={reason:?}");
          self.pending.remove(&(session, token));
          // A notification that never got ACKed counts against the
          // subscriber's `MAX_FAIL` budget (spec §4.H).
          if let Some(path) = self.observers.path_for(session, token).map(<[String]>::to_vec) {
            self.observers.record_fail(&path, session, token, self.config.observe_max_fail);
          }
          if let Some(on_nack) = &mut self.handlers.on_nack {
            on_nack(session, None, reason);
          }
        },
      }
    }

    self.cache.evict_expired(now);
  }

  fn handle_datagram(&mut self, bytes: &[u8], addr: SocketAddr, now: Millis) {
    let msg = match codec::decode(bytes, self.transport.framing()) {
      | Ok(m) => m,
      | Err(e) => {
        log::warn!("dropping malformed datagram from {addr}: {e:?}");
        if let Some(on_event) = &mut self.handlers.on_event {
          on_event(&format!("malformed datagram from {addr}: {e:?}"));
        }
        return;
      },
    };
    let session = self.session_id_for(addr);
    self.sessions[session].touch(now);

    match msg.ty {
      | Type::Reset if msg.is_empty() => self.handle_pong_or_nack(session, &msg),
      | Type::Con if msg.is_empty() => self.handle_ping(session, &msg, addr),
      | Type::Ack | Type::Reset => self.handle_ack_or_reset(session, &msg),
      | Type::Con | Type::Non if msg.code.is_request() => self.handle_request(session, &msg, addr, now),
      | _ => self.handle_response(session, &msg, now),
    }
  }

  fn handle_ping(&mut self, session: usize, msg: &Message, addr: SocketAddr) {
    let reset = msg.reset();
    if let Ok(bytes) = codec::encode(&reset, self.transport.framing()) {
      let _ = self.socket.send(Addrd(&bytes, addr));
    }
    let _ = session;
  }

  fn handle_pong_or_nack(&mut self, session: usize, msg: &Message) {
    let dequeued = self.send_queue.remove_by_mid(session, msg.id);
    log::trace!("session {session}: matching Empty RST mid={:?} against send queue", msg.id);
    if let MatchResult::Reset = MatchResult::from_dequeue(dequeued.is_some(), msg.ty) {
      if let Some(on_pong) = &mut self.handlers.on_pong {
        on_pong(session);
      }
    }
  }

  fn handle_ack_or_reset(&mut self, session: usize, msg: &Message) {
    let dequeued = self.send_queue.remove_by_mid(session, msg.id);
    log::trace!("session {session}: matching {:?} mid={:?} against send queue", msg.ty, msg.id);
    match MatchResult::from_dequeue(dequeued.is_some(), msg.ty) {
      | MatchResult::Reset => {
        self.pending.remove(&(session, msg.token));
        // RST to a notification deregisters the observer (spec §4.H).
        if let Some(path) = self.observers.path_for(session, msg.token).map(<[String]>::to_vec) {
          self.observers.deregister(&path, session, msg.token);
        }
        log::error!("session {session}: RST for mid={:?}, raising NACK", msg.id);
        if let Some(on_nack) = &mut self.handlers.on_nack {
          on_nack(session, Some(msg.id), NackReason::Rst);
        }
        return;
      },
      | MatchResult::Acked => {
        if let Some(path) = self.observers.path_for(session, msg.token).map(<[String]>::to_vec) {
          self.observers.record_success(&path, session, msg.token);
        }
      },
      | MatchResult::NoMatch => {},
    }
    if !msg.is_empty() {
      self.handle_response(session, msg, self.clock.now_ms());
    }
  }

  /// Dispatch a cacheable (GET) request through the request-coalescing
  /// cache (component I, spec §4.I); anything else goes straight to the
  /// resource registry.
  fn dispatch_and_cache(&mut self, req: &Message, now: Millis) -> Message {
    if req.code != method::GET {
      return server::dispatch(&self.resources, req);
    }

    let fp = self.cache.fingerprint(req);
    match self.cache.lookup(fp, now) {
      | Lookup::Hit(cached) => cached.clone(),
      | Lookup::InFlight => {
        // `dispatch` is synchronous, so within one `process()` call a
        // build always finishes before the next duplicate is read off
        // the socket — this path is only reachable if a previous build
        // was abandoned mid-flight. Degrade to a fresh dispatch rather
        // than stall (spec §7: "cache errors degrade to a cache-miss").
        server::dispatch(&self.resources, req)
      },
      | Lookup::Miss => {
        self.cache.begin_build(fp);
        let response = server::dispatch(&self.resources, req);
        let max_age = response.max_age().unwrap_or(DEFAULT_CACHE_MAX_AGE_SECONDS);
        let expires_at = now + u64::from(max_age) * 1000;
        self.cache.complete(fp, response.clone(), expires_at);
        response
      },
    }
  }

  fn handle_request(&mut self, session: usize, msg: &Message, addr: SocketAddr, now: Millis) {
    let is_con = msg.ty == Type::Con;

    if is_con {
      let cached = match self.dedup.check(session, msg.id, now, self.config.exchange_lifetime_millis()) {
        | Outcome::New => None,
        | Outcome::Duplicate(reply) => {
          log::trace!("session {session}: duplicate CON mid={:?}, replaying cached reply", msg.id);
          Some(reply.cloned())
        },
      };
      if let Some(cached) = cached {
        if let Some(reply) = cached {
          if let Ok(bytes) = codec::encode(&reply, self.transport.framing()) {
            let _ = self.socket.send(Addrd(&bytes, addr));
          }
        }
        return;
      }
    }

    let mut effective = msg.clone();

    // Block1 inbound reassembly: a request body spanning multiple
    // datagrams (spec §4.G).
    if let Some(block1) = msg.block1() {
      match self.block1_in.feed(session, msg.token, BlockKind::Block1, block1, &msg.payload) {
        | block::Progress::Pending => {
          let mut reply = msg.ack(resp::CONTINUE);
          reply.set_block1(block1);
          reply.ty = if is_con { Type::Ack } else { Type::Non };
          if let Ok(bytes) = codec::encode(&reply, self.transport.framing()) {
            let _ = self.socket.send(Addrd(&bytes, addr));
          }
          if is_con {
            self.dedup.record_reply(session, msg.id, reply);
          }
          return;
        },
        | block::Progress::Complete(full) => effective.payload = full,
        | block::Progress::OutOfOrder | block::Progress::IllegalUpgrade => {
          self.block1_in.abandon(session, msg.token, BlockKind::Block1);
          let mut reply = msg.ack(resp::REQUEST_ENTITY_INCOMPLETE);
          reply.ty = if is_con { Type::Ack } else { Type::Non };
          if let Ok(bytes) = codec::encode(&reply, self.transport.framing()) {
            let _ = self.socket.send(Addrd(&bytes, addr));
          }
          if is_con {
            self.dedup.record_reply(session, msg.id, reply);
          }
          return;
        },
      }
    }

    if effective.observe() == Some(0) {
      let path: Vec<String> =
        effective.path().ok().map(|p| p.into_iter().map(String::from).collect()).unwrap_or_default();
      self.observers.register(path, session, effective.token);
    } else if effective.observe() == Some(1) {
      let path: Vec<String> =
        effective.path().ok().map(|p| p.into_iter().map(String::from).collect()).unwrap_or_default();
      self.observers.deregister(&path, session, effective.token);
    }

    // A Block2 request with NUM > 0 is a client pulling the next piece
    // of a response we already split; serve it from the staging queue
    // instead of re-invoking the resource handler.
    let continuation = effective.block2().filter(|b| b.num > 0);
    let mut response = if let Some(requested) = continuation {
      match self.block2_out.get_mut(&(session, effective.token)) {
        | Some(queue) => match queue.pop_front() {
          | Some((block, chunk)) if block.num == requested.num => {
            let mut resp = effective.ack(resp::CONTENT);
            resp.payload = chunk;
            resp.set_block2(block);
            if queue.is_empty() {
              self.block2_out.remove(&(session, effective.token));
            }
            resp
          },
          | _ => {
            self.block2_out.remove(&(session, effective.token));
            effective.ack(resp::REQUEST_ENTITY_INCOMPLETE)
          },
        },
        | None => self.dispatch_and_cache(&effective, now),
      }
    } else {
      self.dispatch_and_cache(&effective, now)
    };

    // Block2 outbound splitting: a response too large for one datagram
    // gets Block2-annotated and its remaining pieces staged for the
    // client's subsequent requests (spec §4.G).
    if continuation.is_none() && response.block2().is_none() && response.payload.len() > DEFAULT_BLOCK_SIZE as usize {
      let total = response.payload.len() as u32;
      let mut blocks = block::split(&response.payload, DEFAULT_BLOCK_SIZE);
      let (first_block, first_chunk) = blocks.remove(0);
      response.payload = first_chunk;
      block::annotate_block2(&mut response, first_block, Some(total));
      if !blocks.is_empty() {
        self.block2_out.insert((session, effective.token), blocks.into_iter().collect());
      }
    }

    response.id = msg.id;
    response.token = msg.token;
    response.ty = if is_con { Type::Ack } else { Type::Non };

    if let Ok(bytes) = codec::encode(&response, self.transport.framing()) {
      let _ = self.socket.send(Addrd(&bytes, addr));
    }
    if is_con {
      self.dedup.record_reply(session, msg.id, response);
    }
  }

  fn handle_response(&mut self, session: usize, msg: &Message, _now: Millis) {
    self.send_queue.remove_by_mid(session, msg.id);

    let key = (session, msg.token);
    let payload = if let Some(block2) = msg.block2() {
      match self.block2_in.feed(session, msg.token, BlockKind::Block2, block2, &msg.payload) {
        | crate::block::Progress::Complete(full) => Some(full),
        | crate::block::Progress::Pending => {
          // Automatically pull the next piece (spec §4.G: "Subsequent
          // pieces are sent on the client's explicit request (Block2)").
          if let Some(pending) = self.pending.get(&key) {
            let next = Block { num: block2.num + 1, more: false, szx: block2.szx };
            let path = pending.path.clone();
            let confirmable = pending.confirmable;
            self.request_next_block2(session, msg.token, &path, next, confirmable);
          }
          return;
        },
        | crate::block::Progress::OutOfOrder | crate::block::Progress::IllegalUpgrade => {
          self.block2_in.abandon(session, msg.token, BlockKind::Block2);
          return;
        },
      }
    } else {
      None
    };

    let mut delivered = msg.clone();
    if let Some(full) = payload {
      delivered.payload = full;
    }

    if let Some(pending) = self.pending.get(&key) {
      if pending.observe && msg.observe().is_none() {
        // observer's subscription ended server-side; nothing more to track
        self.pending.remove(&key);
      }
    }

    if let Some(on_response) = &mut self.handlers.on_response {
      on_response(session, &delivered);
    }

    if msg.observe().is_none() {
      self.pending.remove(&key);
    }
  }
}

fn to_io_error(e: impl std::fmt::Debug) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}"))
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::net::SocketAddr;
  use std::rc::Rc;

  use super::*;
  use crate::config::Config;
  use crate::msg::code::method;
  use crate::server::resource::Method;
  use crate::server::Resource;
  use crate::test::{deliver, socket_pair, FakeClock, NoopDriver};

  #[test]
  fn ping_pong_spec_scenario_1() {
    let client_addr: SocketAddr = "127.0.0.1:1000".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:2000".parse().unwrap();
    let (client_sock, server_sock) = socket_pair(client_addr, server_addr);

    let clock = FakeClock::new(0);
    let mut client = Context::new(client_sock.clone(), clock.clone(), NoopDriver, Config::default(), Transport::Udp);

    let pongs = Rc::new(RefCell::new(0));
    let pongs2 = pongs.clone();
    client.handlers.on_pong = Some(Box::new(move |_session| *pongs2.borrow_mut() += 1));

    client.ping(server_addr).unwrap();
    deliver(&client_sock, &server_sock);

    let mut server =
      Context::new(server_sock.clone(), clock.clone(), NoopDriver, Config::default(), Transport::Udp);
    server.process(COAP_IO_NO_WAIT);
    deliver(&server_sock, &client_sock);

    client.process(COAP_IO_NO_WAIT);
    assert_eq!(*pongs.borrow(), 1);
    assert!(client.send_queue.is_empty());
  }

  #[test]
  fn get_time_piggybacked_spec_scenario_2() {
    let client_addr: SocketAddr = "127.0.0.1:1001".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:2001".parse().unwrap();
    let (client_sock, server_sock) = socket_pair(client_addr, server_addr);
    let clock = FakeClock::new(0);

    let mut server =
      Context::new(server_sock.clone(), clock.clone(), NoopDriver, Config::default(), Transport::Udp);
    let mut r = Resource::new("time");
    r.on(Method::Get, |req| {
      let mut resp = req.ack(resp::CONTENT);
      resp.payload = b"1234".to_vec();
      resp
    });
    server.resources.add(r);

    let mut client = Context::new(client_sock.clone(), clock.clone(), NoopDriver, Config::default(), Transport::Udp);
    let responses = Rc::new(RefCell::new(Vec::new()));
    let responses2 = responses.clone();
    client.handlers.on_response = Some(Box::new(move |_s, m| responses2.borrow_mut().push(m.payload.clone())));

    let mut req = Message::new(Type::Con, method::GET, Id(0), Token::EMPTY);
    req.set_path("time");
    client.send_request(server_addr, req, true).unwrap();
    deliver(&client_sock, &server_sock);

    server.process(COAP_IO_NO_WAIT);
    deliver(&server_sock, &client_sock);

    client.process(COAP_IO_NO_WAIT);

    assert_eq!(responses.borrow().as_slice(), &[b"1234".to_vec()]);
    assert!(client.send_queue.is_empty());
  }

  #[test]
  fn duplicate_request_delivers_once_spec_scenario_6() {
    let client_addr: SocketAddr = "127.0.0.1:1002".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:2002".parse().unwrap();
    let (client_sock, server_sock) = socket_pair(client_addr, server_addr);
    let clock = FakeClock::new(0);

    let mut server =
      Context::new(server_sock.clone(), clock.clone(), NoopDriver, Config::default(), Transport::Udp);
    let mut r = Resource::new("time");
    let hits = Rc::new(RefCell::new(0));
    let hits2 = hits.clone();
    r.on(Method::Get, move |req| {
      *hits2.borrow_mut() += 1;
      req.ack(resp::CONTENT)
    });
    server.resources.add(r);

    let mut req = Message::new(Type::Con, method::GET, Id(7), Token::opaque(b"dup"));
    req.set_path("time");
    let bytes = codec::encode(&req, Transport::Udp.framing()).unwrap();

    client_sock.inbox.borrow_mut(); // no-op, keep client_sock alive for symmetry
    server_sock.inbox.borrow_mut().push_back((bytes.clone(), client_addr));
    server_sock.inbox.borrow_mut().push_back((bytes, client_addr));

    server.process(COAP_IO_NO_WAIT);
    assert_eq!(*hits.borrow(), 1);

    let replies: Vec<_> = server_sock.outbox.borrow_mut().drain(..).collect();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].0, replies[1].0);
  }

  /// A provider whose handshake always fails, for exercising spec §7
  /// `TLSFailed` NACK delivery (spec §6 `handshake(handle) -> Failed`).
  struct AlwaysFailsHandshake;

  #[derive(Debug)]
  struct FailingHandle;

  impl crate::security::SecureHandle for FailingHandle {
    fn handshake_step(&mut self) -> crate::security::HandshakeStep {
      crate::security::HandshakeStep::Failed("no shared cipher suite".into())
    }

    fn encrypt(&mut self, plain: &[u8]) -> Result<Vec<u8>, String> {
      Ok(plain.to_vec())
    }

    fn decrypt(&mut self, cipher: &[u8]) -> Result<Vec<u8>, String> {
      Ok(cipher.to_vec())
    }

    fn close(&mut self) {}

    fn get_timeout(&self) -> Option<Millis> {
      None
    }
  }

  impl SecurityProvider for AlwaysFailsHandshake {
    fn new_client_session(&self, _addr: SocketAddr) -> Box<dyn crate::security::SecureHandle> {
      Box::new(FailingHandle)
    }

    fn new_server_session(&self, _peer: SocketAddr) -> Box<dyn crate::security::SecureHandle> {
      Box::new(FailingHandle)
    }
  }

  #[test]
  fn handshake_failure_raises_tls_failed_nack() {
    let client_addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:5001".parse().unwrap();
    let (client_sock, _server_sock) = socket_pair(client_addr, server_addr);
    let clock = FakeClock::new(0);

    let mut client = Context::new(client_sock, clock, NoopDriver, Config::default(), Transport::DtlsOverUdp)
      .with_security(AlwaysFailsHandshake);

    let nacked = Rc::new(RefCell::new(None));
    let nacked2 = nacked.clone();
    client.handlers.on_nack = Some(Box::new(move |_session, _id, reason| *nacked2.borrow_mut() = Some(reason)));

    // Force session creation (and therefore handshake kickoff) without
    // requiring a real DTLS handshake round-trip on the wire.
    let _ = client.session_id_for(server_addr);
    client.process(COAP_IO_NO_WAIT);

    assert_eq!(*nacked.borrow(), Some(NackReason::TlsFailed));
    assert_eq!(client.sessions[0].state, crate::session::State::Disconnected);
  }
}
