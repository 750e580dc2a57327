/// 16-bit message id, present only in the UDP framing.
///
/// Used to deduplicate retransmitted Confirmable messages and to match
/// an inbound ACK/RST to the outstanding CON that provoked it. Uniqueness
/// is only required across currently-outstanding CONs for a given session
/// (spec §3 Message invariants), so wraparound is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id(pub u16);

impl Id {
  pub(crate) fn next(self) -> Id {
    Id(self.0.wrapping_add(1))
  }
}

impl From<Id> for [u8; 2] {
  fn from(Id(id): Id) -> Self {
    id.to_be_bytes()
  }
}

impl From<[u8; 2]> for Id {
  fn from(b: [u8; 2]) -> Self {
    Id(u16::from_be_bytes(b))
  }
}
