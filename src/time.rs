//! The tick source (spec §6 "Tick source") and timestamped values built on
//! top of it.
//!
//! The scheduler never reads the wall clock directly — every timed
//! decision (retransmit, keepalive, cache expiry, observe refresh) goes
//! through a [`Clock`] so tests can drive time deterministically instead
//! of sleeping.

use std::time::Instant as StdInstant;

/// A duration in milliseconds. All time arithmetic in this crate happens
/// in ticks at millisecond resolution (spec §6: `COAP_TICKS_PER_SECOND`).
pub type Millis = u64;

/// An injected monotonic clock, so the engine's notion of "now" is
/// swappable in tests (spec §9: "Global tick source is an injected
/// capability, not a process-global").
pub trait Clock {
  fn now_ms(&self) -> Millis;
}

/// The real clock, backed by [`std::time::Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
  epoch: StdInstant,
}

impl SystemClock {
  pub fn new() -> Self {
    SystemClock { epoch: StdInstant::now() }
  }
}

impl Default for SystemClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for SystemClock {
  fn now_ms(&self) -> Millis {
    self.epoch.elapsed().as_millis() as u64
  }
}

/// Timeout configuration allowing "never" as a first-class option, used
/// by session keepalive and cache expiry (spec §4.D, §4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Timeout {
  Millis(Millis),
  Never,
}

/// A value paired with the tick it was recorded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamped<T> {
  pub value: T,
  pub at: Millis,
}

impl<T> Stamped<T> {
  pub fn new(value: T, at: Millis) -> Self {
    Stamped { value, at }
  }

  pub fn age(&self, now: Millis) -> Millis {
    now.saturating_sub(self.at)
  }
}
