//! Per-peer session state (component D, spec §4.D): transmission
//! parameters, token/message-id generators, and the connection-lifecycle
//! state machine.

use rand::{RngCore, SeedableRng};

use crate::msg::{Id, Token};
use crate::net::Transport;
use crate::security::SecureHandle;
use crate::time::{Clock, Millis};

/// Lifecycle state of a [`Session`] (spec §3 Session attributes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  None,
  Connecting,
  Handshake,
  Established,
  Closing,
  Disconnected,
}

impl State {
  /// Valid forward transitions (spec §4.D); used defensively by
  /// [`Session::transition`] rather than trusted blindly.
  fn can_go_to(self, next: State) -> bool {
    use State::*;
    matches!((self, next),
             (None, Connecting)
             | (Connecting, Handshake)
             | (Connecting, Established)
             | (Handshake, Established)
             | (Handshake, Disconnected)
             | (Established, Closing)
             | (Closing, Disconnected)
             | (_, Disconnected))
  }
}

/// A session's view of a peer: one per (transport, remote address).
pub struct Session {
  pub transport: Transport,
  pub state: State,
  next_mid: Id,
  token_rng: rand_chacha::ChaCha8Rng,
  pub last_activity_ms: Millis,
  /// Negotiated block size (SZX), starts unset until the first
  /// block-wise exchange (spec §4.G).
  pub block_szx: Option<u8>,
  /// `ping_timeout`: 0 disables keepalive (spec §4.D).
  pub ping_timeout_millis: Millis,
  pending_ping: bool,
  /// The handshake/record-layer handle for a secured session (spec §6),
  /// present only once [`Transport::is_secure`] requested one and a
  /// [`crate::security::SecurityProvider`] was configured on the owning
  /// context. `None` for plaintext UDP/TCP sessions.
  pub secure: Option<Box<dyn SecureHandle>>,
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
     .field("transport", &self.transport)
     .field("state", &self.state)
     .field("last_activity_ms", &self.last_activity_ms)
     .field("block_szx", &self.block_szx)
     .field("secure", &self.secure)
     .finish()
  }
}

impl Session {
  pub fn new(transport: Transport, token_seed: u16, clock: &impl Clock) -> Self {
    Session { transport,
              state: State::None,
              next_mid: Id(0),
              token_rng: rand_chacha::ChaCha8Rng::seed_from_u64(token_seed as u64),
              last_activity_ms: clock.now_ms(),
              block_szx: None,
              ping_timeout_millis: 0,
              pending_ping: false,
              secure: None }
  }

  /// Attach a handshake handle from a [`crate::security::SecurityProvider`]
  /// and move into the HANDSHAKE state (spec §4.D/§6). A no-op for
  /// sessions whose [`Transport`] isn't secure.
  pub fn begin_handshake(&mut self, handle: Box<dyn SecureHandle>) {
    self.secure = Some(handle);
    let _ = self.transition(State::Connecting);
    let _ = self.transition(State::Handshake);
  }

  /// Drive the handshake one step. Returns `Ok(true)` once the handshake
  /// completes (session moves to ESTABLISHED), `Ok(false)` if it's still
  /// in progress, or the provider's failure reason (spec §6
  /// `{Done, WantRead, WantWrite, Failed}`; spec §7 `TLSFailed`).
  pub fn drive_handshake(&mut self) -> Result<bool, String> {
    use crate::security::HandshakeStep;
    let Some(handle) = self.secure.as_mut() else { return Ok(true) };
    match handle.handshake_step() {
      | HandshakeStep::Done => {
        let _ = self.transition(State::Established);
        Ok(true)
      },
      | HandshakeStep::WantRead | HandshakeStep::WantWrite => Ok(false),
      | HandshakeStep::Failed(reason) => Err(reason),
    }
  }

  /// Monotonically incremented 16-bit message id. Wraparound is
  /// permitted; uniqueness is required only across currently-outstanding
  /// CONs (spec §4.D).
  pub fn new_message_id(&mut self) -> Id {
    let id = self.next_mid;
    self.next_mid = self.next_mid.next();
    id
  }

  /// A random token of the requested length (0-8 bytes, default 8).
  pub fn new_token(&mut self, len: u8) -> Token {
    let len = len.min(8);
    let mut bytes = [0u8; 8];
    self.token_rng.fill_bytes(&mut bytes[..len as usize]);
    Token::opaque(&bytes[..len as usize])
  }

  pub fn touch(&mut self, now: Millis) {
    self.last_activity_ms = now;
    self.pending_ping = false;
  }

  pub fn transition(&mut self, next: State) -> Result<(), State> {
    if self.state.can_go_to(next) {
      log::debug!("session transition {:?} -> {:?}", self.state, next);
      self.state = next;
      Ok(())
    } else {
      Err(self.state)
    }
  }

  /// Has `session_timeout` elapsed with no traffic and nothing
  /// outstanding? If so the caller should move CLOSING -> DISCONNECTED
  /// (spec §4.D).
  pub fn is_inactive(&self, now: Millis, session_timeout_millis: Millis) -> bool {
    now.saturating_sub(self.last_activity_ms) >= session_timeout_millis
  }

  /// Should a keepalive probe (Empty CON on UDP, 7.02 Ping on TCP) be
  /// sent right now?
  pub fn should_ping(&self, now: Millis) -> bool {
    self.ping_timeout_millis > 0
    && !self.pending_ping
    && now.saturating_sub(self.last_activity_ms) >= self.ping_timeout_millis
  }

  pub fn ping_sent(&mut self) {
    self.pending_ping = true;
  }

  /// A pong/ack never arrived within the keepalive's own retransmit
  /// budget — the session dies and a NACK should be raised (spec §4.D).
  pub fn ping_failed(&self, now: Millis, budget_millis: Millis) -> bool {
    self.pending_ping && now.saturating_sub(self.last_activity_ms) >= self.ping_timeout_millis + budget_millis
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::time::test::FakeClock;

  #[test]
  fn message_ids_increment_and_wrap() {
    let clock = FakeClock::new(0);
    let mut s = Session::new(Transport::Udp, 0, &clock);
    assert_eq!(s.new_message_id(), Id(0));
    assert_eq!(s.new_message_id(), Id(1));

    for _ in 0..u16::MAX {
      s.new_message_id();
    }
    assert_eq!(s.new_message_id(), Id(1));
  }

  #[test]
  fn tokens_default_to_eight_bytes() {
    let clock = FakeClock::new(0);
    let mut s = Session::new(Transport::Udp, 7, &clock);
    assert_eq!(s.new_token(8).len(), 8);
    assert_eq!(s.new_token(0).len(), 0);
  }

  #[test]
  fn state_machine_rejects_invalid_transitions() {
    let clock = FakeClock::new(0);
    let mut s = Session::new(Transport::Udp, 0, &clock);
    assert!(s.transition(State::Established).is_err());
    assert!(s.transition(State::Connecting).is_ok());
    assert!(s.transition(State::Established).is_ok());
    assert!(s.transition(State::Disconnected).is_ok());
  }

  #[test]
  fn inactivity_and_keepalive() {
    let clock = FakeClock::new(0);
    let mut s = Session::new(Transport::Udp, 0, &clock);
    s.ping_timeout_millis = 1000;
    s.touch(0);

    assert!(!s.should_ping(500));
    assert!(s.should_ping(1000));

    s.ping_sent();
    assert!(!s.should_ping(1500));
    assert!(!s.ping_failed(1500, 1000));
    assert!(s.ping_failed(2000, 1000));

    assert!(!s.is_inactive(10_000, 120_000));
    assert!(s.is_inactive(130_000, 120_000));
  }
}
