//! Request-coalescing cache (component I, spec §4.I).
//!
//! Grounded on the teacher's `retry.rs`/`dedup`-style "tick-keyed table with
//! eviction" shape, generalized to a fingerprint key. Single-flight
//! coalescing is expressed without futures or locks, matching the
//! cooperative single-threaded scheduler (spec §4.J: "no internal locks are
//! taken on the hot path") — a second request for an in-flight fingerprint
//! just registers as a waiter and is notified once the build completes.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::msg::{Id, Message, OptNumber, Token};
use crate::time::Millis;

/// A canonical request fingerprint: hash over method, path, sorted query,
/// Accept, ETag (if present), and cache-key options outside the ignore
/// set (spec §4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
  pub fn of(req: &Message, ignore: &HashSet<OptNumber>) -> Self {
    let mut h = DefaultHasher::new();
    req.code.hash(&mut h);
    if let Ok(path) = req.path() {
      path.hash(&mut h);
    }
    if let Ok(mut query) = req.query() {
      query.sort_unstable();
      query.hash(&mut h);
    }
    req.accept().map(u16::from).hash(&mut h);
    req.etags().hash(&mut h);

    use crate::msg::opt::known;
    for (number, values) in req.opts.iter() {
      if number.is_no_cache_key() || ignore.contains(number) {
        continue;
      }
      // Path, query and Accept are already folded in canonically above
      // (path in declared order, query sorted) — skip them here to avoid
      // hashing query options twice in two different orders.
      if *number == known::URI_PATH || *number == known::URI_QUERY || *number == known::ACCEPT {
        continue;
      }
      number.hash(&mut h);
      values.hash(&mut h);
    }

    Fingerprint(h.finish())
  }
}

/// A waiting request for a fingerprint whose response is still being
/// built; notified with the same response once it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
  pub session: usize,
  pub id: Id,
  pub token: Token,
}

#[derive(Debug)]
struct Entry {
  response: Message,
  expires_at: Millis,
  generation: u64,
}

#[derive(Debug, Default)]
struct Build {
  waiters: Vec<Waiter>,
}

/// Result of a cache lookup (spec §4.I).
#[derive(Debug)]
pub enum Lookup<'a> {
  Hit(&'a Message),
  Miss,
  /// A build for this fingerprint is already in flight; the caller should
  /// call [`Cache::join`] to attach as a waiter instead of starting one.
  InFlight,
}

/// Fingerprint-keyed response cache with at-most-one-concurrent-build
/// coalescing (spec §4.I).
#[derive(Debug, Default)]
pub struct Cache {
  entries: HashMap<Fingerprint, Entry>,
  in_flight: HashMap<Fingerprint, Build>,
  ignore_set: HashSet<OptNumber>,
  next_generation: u64,
}

impl Cache {
  pub fn new(ignore_set: HashSet<OptNumber>) -> Self {
    Cache { entries: HashMap::new(), in_flight: HashMap::new(), ignore_set, next_generation: 0 }
  }

  pub fn fingerprint(&self, req: &Message) -> Fingerprint {
    Fingerprint::of(req, &self.ignore_set)
  }

  pub fn lookup(&mut self, fp: Fingerprint, now: Millis) -> Lookup<'_> {
    if let Some(entry) = self.entries.get(&fp) {
      if entry.expires_at > now {
        return Lookup::Hit(&self.entries.get(&fp).unwrap().response);
      }
      self.entries.remove(&fp);
    }
    if self.in_flight.contains_key(&fp) {
      Lookup::InFlight
    } else {
      Lookup::Miss
    }
  }

  /// Start a build for `fp`; subsequent lookups report `InFlight` until
  /// [`Cache::complete`] is called.
  pub fn begin_build(&mut self, fp: Fingerprint) {
    self.in_flight.entry(fp).or_default();
  }

  /// Attach a waiter to an in-progress build. Returns `false` if no build
  /// is in flight for `fp` (the caller should start one instead).
  pub fn join(&mut self, fp: Fingerprint, waiter: Waiter) -> bool {
    match self.in_flight.get_mut(&fp) {
      | Some(build) => {
        build.waiters.push(waiter);
        true
      },
      | None => false,
    }
  }

  /// Finish a build: cache the response until `expires_at` and return the
  /// waiters to notify with it (spec §4.I "attaches as a waiter ... and
  /// receives the same response").
  pub fn complete(&mut self, fp: Fingerprint, response: Message, expires_at: Millis) -> Vec<Waiter> {
    let waiters = self.in_flight.remove(&fp).map(|b| b.waiters).unwrap_or_default();
    let generation = self.next_generation;
    self.next_generation += 1;
    self.entries.insert(fp, Entry { response, expires_at, generation });
    waiters
  }

  /// Abandon an in-progress build without caching anything — every
  /// waiter gets nothing and must retry (spec §7: "cache errors degrade
  /// to cache-miss silently").
  pub fn abandon(&mut self, fp: Fingerprint) -> Vec<Waiter> {
    self.in_flight.remove(&fp).map(|b| b.waiters).unwrap_or_default()
  }

  pub fn evict_expired(&mut self, now: Millis) {
    self.entries.retain(|_, e| e.expires_at > now);
  }

  pub fn generation(&self, fp: Fingerprint) -> Option<u64> {
    self.entries.get(&fp).map(|e| e.generation)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::msg::code::{method, resp};
  use crate::msg::{Id, Type};

  fn req(path: &str) -> Message {
    let mut m = Message::new(Type::Con, method::GET, Id(1), Token::EMPTY);
    m.set_path(path);
    m
  }

  #[test]
  fn identical_requests_fingerprint_identically() {
    let c = Cache::new(HashSet::new());
    assert_eq!(c.fingerprint(&req("a/b")), c.fingerprint(&req("a/b")));
    assert_ne!(c.fingerprint(&req("a/b")), c.fingerprint(&req("a/c")));
  }

  #[test]
  fn query_order_does_not_affect_fingerprint() {
    let c = Cache::new(HashSet::new());
    let mut r1 = req("a");
    r1.add_query("x=1");
    r1.add_query("y=2");
    let mut r2 = req("a");
    r2.add_query("y=2");
    r2.add_query("x=1");
    assert_eq!(c.fingerprint(&r1), c.fingerprint(&r2));
  }

  #[test]
  fn miss_then_in_flight_then_hit() {
    let mut c = Cache::new(HashSet::new());
    let fp = c.fingerprint(&req("time"));

    assert!(matches!(c.lookup(fp, 0), Lookup::Miss));
    c.begin_build(fp);
    assert!(matches!(c.lookup(fp, 0), Lookup::InFlight));

    let waiter = Waiter { session: 1, id: Id(2), token: Token::EMPTY };
    assert!(c.join(fp, waiter));

    let response = req("time").ack(resp::CONTENT);
    let notified = c.complete(fp, response, 1_000);
    assert_eq!(notified, vec![waiter]);

    match c.lookup(fp, 500) {
      | Lookup::Hit(r) => assert_eq!(r.code, resp::CONTENT),
      | other => panic!("expected Hit, got {other:?}"),
    }
  }

  #[test]
  fn entry_expires_and_reverts_to_miss() {
    let mut c = Cache::new(HashSet::new());
    let fp = c.fingerprint(&req("time"));
    c.complete(fp, req("time").ack(resp::CONTENT), 100);
    assert!(matches!(c.lookup(fp, 200), Lookup::Miss));
  }

  #[test]
  fn no_cache_key_options_are_excluded_from_fingerprint() {
    let c = Cache::new(HashSet::new());
    let mut r1 = req("time");
    r1.set_size1(10);
    let mut r2 = req("time");
    r2.set_size1(999);
    assert_eq!(c.fingerprint(&r1), c.fingerprint(&r2));
  }
}
