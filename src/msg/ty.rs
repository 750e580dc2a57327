use super::MessageParseError;

/// The four message types a CoAP PDU can carry over UDP framings.
///
/// TCP framings never set this to anything but [`Type::Con`]-equivalent
/// semantics; TCP has no notion of confirmability since the transport
/// itself guarantees delivery. See `msg::codec` for the framing split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
  /// Confirmable. The sender expects an ACK (or a response that acts as
  /// one) and will retransmit with exponential backoff until one arrives.
  Con,
  /// Non-confirmable. Fire-and-forget; no ACK is expected.
  Non,
  /// Acknowledgement of a Confirmable message.
  Ack,
  /// Reset. Sent when a recipient cannot process a message at all
  /// (e.g. it has no idea what Message ID this is, or rejects a
  /// notification it's no longer interested in).
  Reset,
}

impl TryFrom<u8> for Type {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    match b {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | n => Err(MessageParseError::InvalidMessageType(n)),
    }
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> Self {
    match t {
      | Type::Con => 0,
      | Type::Non => 1,
      | Type::Ack => 2,
      | Type::Reset => 3,
    }
  }
}
