//! Reliability and deduplication (component F, spec §4.F).
//!
//! Inbound Confirmable messages are deduplicated by `(session, message
//! id)` over a window of `EXCHANGE_LIFETIME`; a duplicate replays the
//! cached reply rather than re-invoking the application handler (spec §5
//! "Inbound deduplication preserves the first response").

use std::collections::HashMap;

use crate::msg::{Id, Message};
use crate::time::Millis;

#[derive(Debug, Clone)]
struct Entry {
  reply: Option<Message>,
  expires_at: Millis,
}

/// Tracks recently-seen inbound `(session, mid)` pairs so a retransmitted
/// CON doesn't re-trigger application logic.
#[derive(Debug, Default)]
pub struct Dedup {
  seen: HashMap<(usize, Id), Entry>,
}

/// What the caller should do with an inbound CON, per spec §4.F.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<'a> {
  /// First time seeing this `(session, mid)` — process it normally.
  New,
  /// A duplicate; here's the cached reply to resend, if one was already
  /// produced (spec: "replays the cached ACK/response if one was
  /// generated; otherwise it is silently dropped").
  Duplicate(Option<&'a Message>),
}

impl Dedup {
  pub fn new() -> Self {
    Dedup::default()
  }

  /// Record/check an inbound CON. Call exactly once per received
  /// message, before invoking any application handler — the returned
  /// [`Outcome`] tells the caller whether to process the message or
  /// replay a cached reply (spec §4.F).
  pub fn check(&mut self, session: usize, id: Id, now: Millis, exchange_lifetime_millis: Millis) -> Outcome<'_> {
    self.evict_expired(now);
    let key = (session, id);
    match self.seen.entry(key) {
      | std::collections::hash_map::Entry::Occupied(e) => Outcome::Duplicate(e.into_mut().reply.as_ref()),
      | std::collections::hash_map::Entry::Vacant(e) => {
        e.insert(Entry { reply: None, expires_at: now + exchange_lifetime_millis });
        Outcome::New
      },
    }
  }

  /// Record the reply generated for a `(session, mid)` so future
  /// duplicates can replay it verbatim.
  pub fn record_reply(&mut self, session: usize, id: Id, reply: Message) {
    if let Some(e) = self.seen.get_mut(&(session, id)) {
      e.reply = Some(reply);
    }
  }

  fn evict_expired(&mut self, now: Millis) {
    self.seen.retain(|_, e| e.expires_at > now);
  }

  pub fn len(&self) -> usize {
    self.seen.len()
  }

  pub fn is_empty(&self) -> bool {
    self.seen.is_empty()
  }
}

/// Result of matching an inbound ACK/RST against the send queue
/// (spec §4.F: "Inbound ACK/RST matches a queued CON by (session,
/// message_id)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
  /// ACK matched and the CON was dequeued.
  Acked,
  /// RST matched; dequeue and emit NACK reason RST.
  Reset,
  /// No outstanding CON with this (session, mid) — stray ACK/RST,
  /// ignore it.
  NoMatch,
}

impl MatchResult {
  /// Classify the result of a `SendQueue::remove_by_mid` lookup against
  /// the inbound message's type (spec §4.F).
  pub fn from_dequeue(dequeued: bool, ty: crate::msg::Type) -> Self {
    match (dequeued, ty) {
      | (false, _) => MatchResult::NoMatch,
      | (true, crate::msg::Type::Reset) => MatchResult::Reset,
      | (true, _) => MatchResult::Acked,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::msg::code::method;
  use crate::msg::Type;
  use crate::time::test::FakeClock;
  use crate::time::Clock;

  #[test]
  fn first_copy_is_new_second_is_duplicate() {
    let clock = FakeClock::new(0);
    let mut d = Dedup::new();
    assert_eq!(d.check(1, Id(42), clock.now_ms(), 247_000), Outcome::New);
    assert_eq!(d.check(1, Id(42), clock.now_ms(), 247_000), Outcome::Duplicate(None));
  }

  #[test]
  fn duplicate_replays_cached_reply() {
    let clock = FakeClock::new(0);
    let mut d = Dedup::new();
    assert_eq!(d.check(1, Id(1), clock.now_ms(), 247_000), Outcome::New);
    let reply = Message::new(Type::Ack, method::GET, Id(1), crate::msg::Token::EMPTY);
    d.record_reply(1, Id(1), reply.clone());

    assert_eq!(d.check(1, Id(1), clock.now_ms(), 247_000), Outcome::Duplicate(Some(&reply)));
  }

  #[test]
  fn entries_expire_after_exchange_lifetime() {
    let clock = FakeClock::new(0);
    let mut d = Dedup::new();
    assert_eq!(d.check(1, Id(1), 0, 1_000), Outcome::New);
    clock.advance(1_001);
    assert_eq!(d.check(1, Id(1), clock.now_ms(), 1_000), Outcome::New);
  }

  #[test]
  fn different_sessions_do_not_collide() {
    let clock = FakeClock::new(0);
    let mut d = Dedup::new();
    assert_eq!(d.check(1, Id(1), clock.now_ms(), 247_000), Outcome::New);
    assert_eq!(d.check(2, Id(1), clock.now_ms(), 247_000), Outcome::New);
  }

  #[test]
  fn match_result_classifies_ack_rst_and_stray() {
    assert_eq!(MatchResult::from_dequeue(true, Type::Ack), MatchResult::Acked);
    assert_eq!(MatchResult::from_dequeue(true, Type::Reset), MatchResult::Reset);
    assert_eq!(MatchResult::from_dequeue(false, Type::Ack), MatchResult::NoMatch);
  }
}
