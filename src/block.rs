//! Block-wise transfer engine (component G, spec §4.G, RFC 7959).
//!
//! Outbound: splits a payload exceeding the negotiated block size into
//! Block1 (request body) / Block2 (response body) pieces. Inbound:
//! reassembles a sequence keyed by `(session, token, kind)` into a single
//! logical payload, rejecting out-of-order pieces with 4.08.

use std::collections::HashMap;

use crate::msg::opt::szx_for_size;
use crate::msg::{Block, Message, Token};

/// Which of the two block options a transfer concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
  Block1,
  Block2,
}

/// Split `payload` into consecutively-numbered blocks of `block_size`
/// bytes (spec §4.G). `block_size` must be one of the SZX-representable
/// sizes (16..=1024); non-exact sizes are rounded down via
/// [`szx_for_size`].
pub fn split(payload: &[u8], block_size: u16) -> Vec<(Block, Vec<u8>)> {
  let szx = szx_for_size(block_size);
  let size = 1usize << (szx as u32 + 4);

  if payload.is_empty() {
    return vec![(Block { num: 0, more: false, szx }, Vec::new())];
  }

  payload.chunks(size)
         .enumerate()
         .map(|(i, chunk)| {
           let more = (i + 1) * size < payload.len();
           (Block { num: i as u32, more, szx }, chunk.to_vec())
         })
         .collect()
}

/// Total size implied by a `Size1`/`Size2` option, if present, else the
/// sum of what's been received so far.
#[derive(Debug, Default)]
struct Accumulator {
  blocks: HashMap<u32, Vec<u8>>,
  next_expected: u32,
  szx: Option<u8>,
  done: bool,
}

/// Outcome of feeding one inbound block into the reassembly engine.
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
  /// More blocks are expected; nothing to deliver yet.
  Pending,
  /// The final block (`M=0`) arrived; here's the assembled payload.
  Complete(Vec<u8>),
  /// A block arrived out of order (spec: "rejected with 4.08 Request
  /// Entity Incomplete").
  OutOfOrder,
  /// The block upgraded SZX mid-transfer, which is never allowed
  /// (spec: "it never upgrades mid-transfer").
  IllegalUpgrade,
}

/// Accumulates inbound block sequences, keyed by `(session, token, kind)`
/// so a fresh token always starts a new, independent transfer (spec: "The
/// engine is restartable").
#[derive(Debug, Default)]
pub struct Reassembly {
  in_progress: HashMap<(usize, Token, Kind), Accumulator>,
}

impl Reassembly {
  pub fn new() -> Self {
    Reassembly::default()
  }

  pub fn feed(&mut self, session: usize, token: Token, kind: Kind, block: Block, chunk: &[u8]) -> Progress {
    let key = (session, token, kind);
    let acc = self.in_progress.entry(key).or_default();

    if let Some(prev_szx) = acc.szx {
      if block.szx > prev_szx {
        return Progress::IllegalUpgrade;
      }
    }

    if block.num != acc.next_expected {
      return Progress::OutOfOrder;
    }

    acc.blocks.insert(block.num, chunk.to_vec());
    acc.szx = Some(block.szx);
    acc.next_expected += 1;

    if !block.more {
      acc.done = true;
      let mut out = Vec::new();
      for i in 0..acc.next_expected {
        out.extend_from_slice(&acc.blocks[&i]);
      }
      self.in_progress.remove(&key);
      Progress::Complete(out)
    } else {
      Progress::Pending
    }
  }

  pub fn abandon(&mut self, session: usize, token: Token, kind: Kind) {
    self.in_progress.remove(&(session, token, kind));
  }

  pub fn in_progress(&self, session: usize, token: Token, kind: Kind) -> bool {
    self.in_progress.contains_key(&(session, token, kind))
  }
}

/// Attach a Block2 option (+ Size2 on the first block) to an outbound
/// response fragment.
pub fn annotate_block2(msg: &mut Message, block: Block, total_size: Option<u32>) {
  msg.set_block2(block);
  if block.num == 0 {
    if let Some(size) = total_size {
      msg.set_size2(size);
    }
  }
}

/// Attach a Block1 option (+ Size1 on the first block) to an outbound
/// request fragment.
pub fn annotate_block1(msg: &mut Message, block: Block, total_size: Option<u32>) {
  msg.set_block1(block);
  if block.num == 0 {
    if let Some(size) = total_size {
      msg.set_size1(size);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn splits_into_expected_block_count() {
    let payload = vec![0u8; 2048];
    let blocks = split(&payload, 1024);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].0.num, 0);
    assert!(blocks[0].0.more);
    assert!(!blocks[1].0.more);
    assert_eq!(blocks[1].0.num, 1);
  }

  #[test]
  fn reassembles_block2_response_spec_scenario_4() {
    let mut r = Reassembly::new();
    let tok = Token::opaque(b"t");

    let block0 = Block { num: 0, more: true, szx: 6 };
    assert_eq!(r.feed(1, tok, Kind::Block2, block0, &[1u8; 1024]), Progress::Pending);

    let block1 = Block { num: 1, more: false, szx: 6 };
    let result = r.feed(1, tok, Kind::Block2, block1, &[2u8; 1024]);
    match result {
      | Progress::Complete(payload) => assert_eq!(payload.len(), 2048),
      | other => panic!("expected Complete, got {other:?}"),
    }
    assert!(!r.in_progress(1, tok, Kind::Block2));
  }

  #[test]
  fn out_of_order_block_is_rejected() {
    let mut r = Reassembly::new();
    let tok = Token::opaque(b"t");
    let block1 = Block { num: 1, more: false, szx: 6 };
    assert_eq!(r.feed(1, tok, Kind::Block2, block1, &[0u8; 16]), Progress::OutOfOrder);
  }

  #[test]
  fn downgrade_allowed_upgrade_rejected() {
    let mut r = Reassembly::new();
    let tok = Token::opaque(b"t");
    let block0 = Block { num: 0, more: true, szx: 6 };
    r.feed(1, tok, Kind::Block2, block0, &[0u8; 1024]);

    let downgraded = Block { num: 1, more: false, szx: 4 };
    assert_ne!(r.feed(1, tok, Kind::Block2, downgraded, &[0u8; 16]), Progress::IllegalUpgrade);

    let mut r2 = Reassembly::new();
    r2.feed(1, tok, Kind::Block2, Block { num: 0, more: true, szx: 4 }, &[0u8; 16]);
    let upgraded = Block { num: 1, more: false, szx: 6 };
    assert_eq!(r2.feed(1, tok, Kind::Block2, upgraded, &[0u8; 1024]), Progress::IllegalUpgrade);
  }

  #[test]
  fn fresh_token_starts_new_transfer() {
    let mut r = Reassembly::new();
    let tok_a = Token::opaque(b"a");
    let tok_b = Token::opaque(b"b");
    r.feed(1, tok_a, Kind::Block2, Block { num: 0, more: true, szx: 6 }, &[0u8; 1024]);
    // tok_b is unrelated and starts fresh at num=0
    assert_eq!(r.feed(1, tok_b, Kind::Block2, Block { num: 0, more: false, szx: 6 }, &[9u8; 8]),
               Progress::Complete(vec![9u8; 8]));
  }
}
