//! Observe subscriptions (RFC 7641, spec §4.H).
//!
//! Grounded on the teacher's `step/observe.rs` `Observe<P,S,B>` /
//! `requests_similar` shape, reimplemented concretely: a plain
//! `HashMap`-keyed subscriber table in place of the teacher's generic
//! `Stem<B>` storage, and a free `requests_similar` function in place of
//! its `RequestsSimilar<P>` closure wrapper.

use std::collections::HashMap;

use crate::msg::{Message, Token};

/// One registered observer of a resource path.
#[derive(Debug, Clone)]
pub struct Subscriber {
  pub session: usize,
  pub token: Token,
  pub fails: u8,
}

/// Per-resource observe state: the current sequence number and the set
/// of sessions/tokens subscribed to it.
#[derive(Debug, Default)]
struct Subscription {
  seq: u32,
  subscribers: Vec<Subscriber>,
}

/// Tracks observers per resource path and hands out monotonically
/// increasing 24-bit sequence numbers for notifications (spec §4.H).
#[derive(Debug, Default)]
pub struct ObserveRegistry {
  by_path: HashMap<Vec<String>, Subscription>,
  /// Reverse index so a NACK or ACK arriving for a `(session, token)` can
  /// be attributed to the resource path it's observing, without the
  /// scheduler having to track that itself.
  by_subscriber: HashMap<(usize, Token), Vec<String>>,
}

impl ObserveRegistry {
  pub fn new() -> Self {
    ObserveRegistry::default()
  }

  /// Register a session's subscription to a path (Observe = 0 on a GET).
  pub fn register(&mut self, path: Vec<String>, session: usize, token: Token) {
    let sub = self.by_path.entry(path.clone()).or_default();
    if !sub.subscribers.iter().any(|s| s.session == session && s.token == token) {
      log::debug!("session {session}: registered observer on {path:?} token={token:?}");
      sub.subscribers.push(Subscriber { session, token, fails: 0 });
    }
    self.by_subscriber.insert((session, token), path);
  }

  /// Deregister (Observe = 1, a matching RST, or `MAX_FAIL` NACKs).
  pub fn deregister(&mut self, path: &[String], session: usize, token: Token) {
    log::debug!("session {session}: deregistered observer on {path:?} token={token:?}");
    if let Some(sub) = self.by_path.get_mut(path) {
      sub.subscribers.retain(|s| !(s.session == session && s.token == token));
    }
    self.by_subscriber.remove(&(session, token));
  }

  /// Which resource path, if any, `(session, token)` is subscribed to —
  /// lets the scheduler attribute a NACK/ACK on an arbitrary message to
  /// the observe subscription it belongs to.
  pub fn path_for(&self, session: usize, token: Token) -> Option<&[String]> {
    self.by_subscriber.get(&(session, token)).map(Vec::as_slice)
  }

  pub fn subscribers(&self, path: &[String]) -> &[Subscriber] {
    self.by_path.get(path).map(|s| s.subscribers.as_slice()).unwrap_or(&[])
  }

  /// Allocate the next sequence number for a notification on `path`,
  /// wrapping at 2^24 (spec §4.H).
  pub fn next_seq(&mut self, path: &[String]) -> u32 {
    let sub = self.by_path.entry(path.to_vec()).or_default();
    sub.seq = (sub.seq + 1) & 0x00FF_FFFF;
    sub.seq
  }

  /// Record a failed (NACKed) notification delivery; returns `true` once
  /// the subscriber has exceeded `max_fail` and should be evicted.
  pub fn record_fail(&mut self, path: &[String], session: usize, token: Token, max_fail: u8) -> bool {
    let Some(sub) = self.by_path.get_mut(path) else { return false };
    let Some(s) = sub.subscribers.iter_mut().find(|s| s.session == session && s.token == token) else {
      return false;
    };
    s.fails += 1;
    let evict = s.fails > max_fail;
    if evict {
      sub.subscribers.retain(|s| !(s.session == session && s.token == token));
      self.by_subscriber.remove(&(session, token));
    }
    evict
  }

  pub fn record_success(&mut self, path: &[String], session: usize, token: Token) {
    if let Some(sub) = self.by_path.get_mut(path) {
      if let Some(s) = sub.subscribers.iter_mut().find(|s| s.session == session && s.token == token) {
        s.fails = 0;
      }
    }
  }
}

/// RFC 7641 §3.4 sequence comparison: is `v2` a fresher notification than
/// `v1`, accounting for 24-bit wraparound? (spec §4.H: "V2 >: V1 iff
/// (V1 < V2 and V2 − V1 < 2^23) or (V1 > V2 and V1 − V2 > 2^23)").
pub fn is_fresher(v1: u32, v2: u32) -> bool {
  (v1 < v2 && v2 - v1 < (1 << 23)) || (v1 > v2 && v1 - v2 > (1 << 23))
}

/// Whether two GETs count as "the same observation" for the purposes of
/// re-registering vs. starting a fresh subscription — compares type,
/// Accept, path and query, mirroring the teacher's `requests_similar`.
pub fn requests_similar(a: &Message, b: &Message) -> bool {
  a.ty == b.ty && a.accept() == b.accept() && a.path().ok() == b.path().ok() && a.query().ok() == b.query().ok()
}
