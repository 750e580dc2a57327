//! Send queue & retransmit engine (component E, spec §4.E).
//!
//! The teacher's manual linked list is replaced with a binary heap keyed
//! on absolute send tick, per spec §9's own redesign note — this removes
//! the O(n) insert while keeping `peek`/`pop`/`adjust_basetime` semantics
//! identical.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::msg::{Id, Message, Token};
use crate::retry::{Attempts, RetryTimer, Strategy, YouShould};
use crate::time::{Clock, Millis};

/// Why a queued transmission was dropped without being ACKed, or — more
/// broadly — why a context-level NACK was raised for a session (spec §7:
/// `Timeout`, `RST`, `TLSFailed` all terminate in the same `on_nack`
/// handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
  Timeout,
  Rst,
  Cancelled,
  /// The security provider reported a handshake or teardown failure
  /// (spec §7 `TLSFailed`); the failure reason itself is reported
  /// separately through `on_event`, since `NackReason` stays `Copy`.
  TlsFailed,
}

/// A pending Confirmable transmission (spec §3 Send-queue entry).
#[derive(Debug)]
pub struct SendQueueEntry {
  pub session: usize,
  pub id: Id,
  pub token: Token,
  pub msg: Message,
  retry: RetryTimer,
  due_at: Millis,
  seq: u64,
}

impl SendQueueEntry {
  pub fn new(session: usize, msg: Message, strategy: Strategy, max_attempts: Attempts, clock: &impl Clock, seq: u64)
             -> Self {
    let retry = RetryTimer::new(clock, strategy, max_attempts);
    let due_at = clock.now_ms() + strategy_first_wait(&strategy);
    SendQueueEntry { session, id: msg.id, token: msg.token, msg, retry, due_at, seq }
  }
}

fn strategy_first_wait(strategy: &Strategy) -> Millis {
  *strategy.range().start()
}

// Ordered by ascending `due_at`, ties broken by insertion order (`seq`) —
// BinaryHeap is a max-heap, so we invert the comparison to get a min-heap.
impl PartialEq for SendQueueEntry {
  fn eq(&self, other: &Self) -> bool {
    self.due_at == other.due_at && self.seq == other.seq
  }
}
impl Eq for SendQueueEntry {}

impl PartialOrd for SendQueueEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for SendQueueEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    other.due_at.cmp(&self.due_at).then_with(|| other.seq.cmp(&self.seq))
  }
}

/// The single ordered queue of pending CON transmissions per context
/// (spec §4.E, §5 "Send-queue drain is strictly ordered by scheduled
/// tick; ties by insertion order").
#[derive(Debug, Default)]
pub struct SendQueue {
  heap: BinaryHeap<SendQueueEntry>,
  next_seq: u64,
}

impl SendQueue {
  pub fn new() -> Self {
    SendQueue::default()
  }

  pub fn insert(&mut self, session: usize, msg: Message, strategy: Strategy, max_attempts: Attempts,
                clock: &impl Clock)
                -> Id {
    let id = msg.id;
    let seq = self.next_seq;
    self.next_seq += 1;
    self.heap.push(SendQueueEntry::new(session, msg, strategy, max_attempts, clock, seq));
    id
  }

  pub fn peek(&self) -> Option<&SendQueueEntry> {
    self.heap.peek()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }

  /// Absolute tick of the next scheduled fire, if any — used by the
  /// scheduler to bound its readiness wait (spec §4.J).
  pub fn next_due_at(&self) -> Option<Millis> {
    self.heap.peek().map(|e| e.due_at)
  }

  /// Pop and re-schedule the head entry if it is due, per the
  /// exponential backoff in spec §4.E. Returns the message to
  /// retransmit, or a [`NackReason::Timeout`] if attempts are exhausted.
  pub fn poll_due(&mut self, now: Millis, clock: &impl Clock) -> Option<PollResult> {
    let due = self.heap.peek()?.due_at;
    if due > now {
      return None;
    }
    let mut entry = self.heap.pop().unwrap();

    match entry.retry.what_should_i_do(clock.now_ms()) {
      | Some(YouShould::Retry) => {
        entry.due_at = entry.retry.next_due_at();
        let msg = entry.msg.clone();
        let session = entry.session;
        self.heap.push(entry);
        Some(PollResult::Retransmit { session, msg })
      },
      | Some(YouShould::Cry) | None => Some(PollResult::Nack { session: entry.session,
                                                                id: entry.id,
                                                                token: entry.token,
                                                                reason: NackReason::Timeout }),
    }
  }

  /// ACK/RST matched a queued CON by (session, mid) — dequeue it (spec §4.F).
  pub fn remove_by_mid(&mut self, session: usize, id: Id) -> Option<Message> {
    self.retain_remove(|e| e.session == session && e.id == id).map(|e| e.msg)
  }

  pub fn cancel_by_mid(&mut self, session: usize, id: Id) -> Option<NackReason> {
    self.retain_remove(|e| e.session == session && e.id == id).map(|_| NackReason::Cancelled)
  }

  /// Cancel all queued entries sharing `token` for a session — always
  /// emits a NACK (spec §4.E, §5 `cancel_all_messages`).
  pub fn cancel_by_token(&mut self, session: usize, token: Token) -> usize {
    self.retain_remove_all(|e| e.session == session && e.token == token)
  }

  /// Cancel every entry for a session (spec §5 `cancel_session_messages`).
  pub fn cancel_session(&mut self, session: usize) -> usize {
    self.retain_remove_all(|e| e.session == session)
  }

  /// Rebase all entries' absolute tick to `now`, preserving relative
  /// ordering, and report how many have already fired (spec §4.E
  /// `adjust_basetime`).
  pub fn adjust_basetime(&mut self, now: Millis) -> usize {
    let min_due = match self.heap.iter().map(|e| e.due_at).min() {
      | Some(m) => m,
      | None => return 0,
    };
    let shift = now.saturating_sub(min_due);
    let mut fired = 0;
    let entries: Vec<_> = self.heap
                              .drain()
                              .map(|mut e| {
                                e.due_at += shift;
                                if e.due_at <= now {
                                  fired += 1;
                                }
                                e
                              })
                              .collect();
    self.heap = entries.into_iter().collect();
    fired
  }

  fn retain_remove(&mut self, pred: impl Fn(&SendQueueEntry) -> bool) -> Option<SendQueueEntry> {
    let mut found = None;
    let kept: Vec<_> = self.heap
                           .drain()
                           .filter_map(|e| {
                             if found.is_none() && pred(&e) {
                               found = Some(e);
                               None
                             } else {
                               Some(e)
                             }
                           })
                           .collect();
    self.heap = kept.into_iter().collect();
    found
  }

  fn retain_remove_all(&mut self, pred: impl Fn(&SendQueueEntry) -> bool) -> usize {
    let mut removed = 0;
    let kept: Vec<_> = self.heap
                           .drain()
                           .filter(|e| {
                             if pred(e) {
                               removed += 1;
                               false
                             } else {
                               true
                             }
                           })
                           .collect();
    self.heap = kept.into_iter().collect();
    removed
  }
}

#[derive(Debug)]
pub enum PollResult {
  Retransmit { session: usize, msg: Message },
  Nack { session: usize, id: Id, token: Token, reason: NackReason },
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::msg::{code::method, Type};
  use crate::time::test::FakeClock;

  fn msg(id: u16) -> Message {
    Message::new(Type::Con, method::GET, Id(id), Token::EMPTY)
  }

  #[test]
  fn orders_by_due_tick_then_insertion() {
    let clock = FakeClock::new(0);
    let mut q = SendQueue::new();
    let strategy = Strategy::Delay { min: 100, max: 100 };
    q.insert(1, msg(1), strategy, Attempts(5), &clock);
    q.insert(1, msg(2), strategy, Attempts(5), &clock);
    assert_eq!(q.peek().unwrap().id, Id(1));
  }

  #[test]
  fn remove_by_mid_dequeues_acked_entry() {
    let clock = FakeClock::new(0);
    let mut q = SendQueue::new();
    q.insert(1, msg(1), Strategy::Delay { min: 100, max: 100 }, Attempts(5), &clock);
    let removed = q.remove_by_mid(1, Id(1));
    assert!(removed.is_some());
    assert!(q.is_empty());
  }

  #[test]
  fn adjust_basetime_preserves_count_and_order() {
    let clock = FakeClock::new(0);
    let mut q = SendQueue::new();
    q.insert(1, msg(1), Strategy::Delay { min: 100, max: 100 }, Attempts(5), &clock);
    q.insert(1, msg(2), Strategy::Delay { min: 200, max: 200 }, Attempts(5), &clock);
    let before_len = q.len();
    q.adjust_basetime(1_000_000);
    assert_eq!(q.len(), before_len);
    assert_eq!(q.peek().unwrap().id, Id(1));
  }

  #[test]
  fn cancel_by_token_removes_all_matching() {
    let clock = FakeClock::new(0);
    let mut q = SendQueue::new();
    let tok = Token::opaque(b"abc");
    let mut m1 = msg(1);
    m1.token = tok;
    let mut m2 = msg(2);
    m2.token = tok;
    q.insert(1, m1, Strategy::Delay { min: 100, max: 100 }, Attempts(5), &clock);
    q.insert(1, m2, Strategy::Delay { min: 100, max: 100 }, Attempts(5), &clock);
    assert_eq!(q.cancel_by_token(1, tok), 2);
    assert!(q.is_empty());
  }
}
