//! Security provider boundary (spec §6 "Security provider interface").
//!
//! The concrete DTLS/TLS backend is explicitly out of scope for this
//! crate (spec §1): the provider is an injected capability, the same way
//! the teacher funnels a secured UDP socket through its own `Socket`
//! trait rather than baking a particular TLS library into `core::Core`.
//! This module defines the *contract* a provider implements — a
//! state-machine handshake plus `encrypt`/`decrypt`/`close`/`get_timeout`
//! and the PSK callbacks spec §6 names — so [`crate::session::Session`]
//! and [`crate::scheduler::Context`] can drive a handshake without
//! knowing which TLS library backs it. No provider ships with this
//! crate; [`Insecure`] is a no-op stand-in for plaintext transports and
//! for tests.

use std::fmt;
use std::net::SocketAddr;

/// One step of progress through a handshake (spec §6 `handshake(handle)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
  Done,
  WantRead,
  WantWrite,
  Failed(String),
}

/// A single secured session's handshake/record-layer state, returned by
/// [`SecurityProvider::new_client_session`]/`new_server_session`.
///
/// Kept as a trait object behind the provider rather than an associated
/// type: the scheduler stores one per [`crate::session::Session`] without
/// needing to be generic over the concrete TLS library, matching spec
/// §6's "handle" vocabulary.
pub trait SecureHandle: fmt::Debug {
  fn handshake_step(&mut self) -> HandshakeStep;
  fn encrypt(&mut self, plain: &[u8]) -> Result<Vec<u8>, String>;
  fn decrypt(&mut self, cipher: &[u8]) -> Result<Vec<u8>, String>;
  fn close(&mut self);
  /// Ticks until this handle's own retransmission/handshake timer should
  /// next be serviced, independent of the session's CoAP-level
  /// retransmit schedule (spec §6 `get_timeout`).
  fn get_timeout(&self) -> Option<crate::time::Millis>;
}

/// Pre-shared-key callbacks an integrator supplies (spec §6 "PSK
/// callbacks"). Boxed `Fn` rather than function pointers so a closure can
/// close over a key store.
pub type GetClientPsk = Box<dyn Fn(&SocketAddr) -> Option<Vec<u8>>>;
pub type GetServerPsk = Box<dyn Fn(&[u8]) -> Option<Vec<u8>>>;
pub type GetServerHint = Box<dyn Fn() -> Vec<u8>>;

/// The integrator-supplied capability that turns a plaintext session into
/// a DTLS/TLS one (spec §6). A context holds at most one provider; it is
/// consulted only for sessions whose [`crate::net::Transport`] reports
/// [`crate::net::Transport::is_secure`].
pub trait SecurityProvider {
  fn new_client_session(&self, addr: SocketAddr) -> Box<dyn SecureHandle>;
  fn new_server_session(&self, peer: SocketAddr) -> Box<dyn SecureHandle>;
}

/// A provider for transports that never secure anything. Plugged in by
/// default so `Context`s over [`crate::net::Transport::Udp`]/`Tcp` never
/// pay for a handshake state machine they don't use.
#[derive(Debug, Default)]
pub struct Insecure;

#[derive(Debug, Default)]
struct InsecureHandle;

impl SecureHandle for InsecureHandle {
  fn handshake_step(&mut self) -> HandshakeStep {
    HandshakeStep::Done
  }

  fn encrypt(&mut self, plain: &[u8]) -> Result<Vec<u8>, String> {
    Ok(plain.to_vec())
  }

  fn decrypt(&mut self, cipher: &[u8]) -> Result<Vec<u8>, String> {
    Ok(cipher.to_vec())
  }

  fn close(&mut self) {}

  fn get_timeout(&self) -> Option<crate::time::Millis> {
    None
  }
}

impl SecurityProvider for Insecure {
  fn new_client_session(&self, _addr: SocketAddr) -> Box<dyn SecureHandle> {
    Box::new(InsecureHandle)
  }

  fn new_server_session(&self, _peer: SocketAddr) -> Box<dyn SecureHandle> {
    Box::new(InsecureHandle)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn insecure_handshake_completes_immediately() {
    let provider = Insecure;
    let mut handle = provider.new_client_session("127.0.0.1:5684".parse().unwrap());
    assert_eq!(handle.handshake_step(), HandshakeStep::Done);
    assert_eq!(handle.encrypt(b"hi").unwrap(), b"hi");
    assert_eq!(handle.decrypt(b"hi").unwrap(), b"hi");
  }
}
