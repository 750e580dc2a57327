//! Exponential-backoff retransmission timing (spec §4.E).
//!
//! `T0 = ACK_TIMEOUT * (1 + (ACK_RANDOM_FACTOR - 1) * R)`, doubling on each
//! subsequent attempt, is expressed here as [`Strategy::Exponential`] with
//! `init_min`/`init_max` bracketing the jittered first timeout — the same
//! shape as the CON/NON retry strategies in [`crate::config`].

use std::ops::RangeInclusive;

use rand::{Rng, SeedableRng};

use crate::time::{Clock, Millis};

/// A number of retransmit attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

impl std::ops::Sub for Attempts {
  type Output = Attempts;

  fn sub(self, rhs: Attempts) -> Attempts {
    Attempts(self.0.saturating_sub(rhs.0))
  }
}

/// What a [`RetryTimer`] tells its caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YouShould {
  /// Retransmit now.
  Retry,
  /// Attempts are exhausted; give up (spec: NACK reason `TIMEOUT`).
  Cry,
}

/// The backoff strategy to use for a class of outbound message
/// (unacked CON, acked CON, NON — spec §4.E, §3 transmission parameters).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
  /// Jittered delay that doubles on each attempt:
  /// `init` is drawn uniformly from `init_min..=init_max`, then attempt
  /// `n` waits `init * 2^(n-1)` from the timer's start.
  Exponential { init_min: Millis, init_max: Millis },
  /// Jittered delay that does *not* grow between attempts.
  Delay { min: Millis, max: Millis },
}

impl Strategy {
  pub fn has_jitter(&self) -> bool {
    let r = self.range();
    r.start() != r.end()
  }

  pub fn range(&self) -> RangeInclusive<Millis> {
    match *self {
      | Strategy::Exponential { init_min, init_max } => init_min..=init_max,
      | Strategy::Delay { min, max } => min..=max,
    }
  }

  /// Total elapsed time if `attempts` retries have all failed.
  pub fn max_time(&self, attempts: Attempts) -> Millis {
    match *self {
      | Strategy::Exponential { init_max, .. } => Self::total_delay_exp(init_max, attempts.0),
      | Strategy::Delay { max, .. } => max.saturating_mul(attempts.0 as u64),
    }
  }

  const fn total_delay_exp(init: Millis, attempt: u16) -> Millis {
    if attempt == 0 {
      return 0;
    }
    init * (1u64 << (attempt - 1))
  }
}

/// A non-blocking timer tracking when the next retransmit of some pending
/// CON is due. Does not own the message itself — see
/// [`crate::sendqueue::SendQueueEntry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer {
  start: Millis,
  init: Millis,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

impl RetryTimer {
  pub fn new(clock: &impl Clock, strategy: Strategy, max_attempts: Attempts) -> Self {
    let start = clock.now_ms();
    let init = if strategy.has_jitter() {
      let range = strategy.range();
      let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(start ^ *range.start());
      rng.gen_range(range)
    } else {
      *strategy.range().start()
    };

    RetryTimer { start, init, strategy, max_attempts, attempts: Attempts(1) }
  }

  /// Is a retry (or giving up) due yet? Returns `None` while we should
  /// keep waiting.
  pub fn what_should_i_do(&mut self, now: Millis) -> Option<YouShould> {
    if self.attempts >= self.max_attempts {
      return Some(YouShould::Cry);
    }

    if self.is_ready(now.saturating_sub(self.start), self.attempts.0) {
      self.attempts.0 += 1;
      Some(YouShould::Retry)
    } else {
      None
    }
  }

  fn is_ready(&self, elapsed: Millis, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }
    match self.strategy {
      | Strategy::Delay { .. } => elapsed >= self.init * attempts as u64,
      | Strategy::Exponential { .. } => elapsed >= Strategy::total_delay_exp(self.init, attempts),
    }
  }

  pub fn attempts(&self) -> Attempts {
    self.attempts
  }

  /// Absolute tick at which the *next* retry becomes due, given the
  /// attempt count as it stands right now.
  pub fn next_due_at(&self) -> Millis {
    let wait = match self.strategy {
      | Strategy::Delay { .. } => self.init * self.attempts.0.max(1) as u64,
      | Strategy::Exponential { .. } => Strategy::total_delay_exp(self.init, self.attempts.0.max(1)),
    };
    self.start + wait
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::time::test::FakeClock;

  #[test]
  fn delay_retrier() {
    let clock = FakeClock::new(0);
    let mut retry = RetryTimer::new(&clock, Strategy::Delay { min: 1000, max: 1000 }, Attempts(5));

    clock.set(999);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), None);

    clock.set(1000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    clock.set(1999);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), None);

    clock.set(2000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    clock.set(10_000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Cry));
  }

  #[test]
  fn exponential_retrier_matches_spec_scenario_3() {
    // spec §8 scenario 3: CON retransmits roughly double at 2s, 4s, 8s, 16s.
    let clock = FakeClock::new(0);
    let mut retry =
      RetryTimer::new(&clock, Strategy::Exponential { init_min: 2000, init_max: 2000 }, Attempts(5));

    for (ms, expect) in [(1999, None),
                         (2000, Some(YouShould::Retry)),
                         (3999, None),
                         (4000, Some(YouShould::Retry)),
                         (8000, Some(YouShould::Retry)),
                         (16_000, Some(YouShould::Retry)),
                         (16_001, Some(YouShould::Cry))]
    {
      clock.set(ms);
      assert_eq!(retry.what_should_i_do(clock.now_ms()), expect, "at t={ms}");
    }
  }

  #[test]
  fn exp_calculation() {
    assert_eq!(Strategy::total_delay_exp(100, 1), 100);
    assert_eq!(Strategy::total_delay_exp(100, 2), 200);
    assert_eq!(Strategy::total_delay_exp(100, 3), 400);
  }
}
