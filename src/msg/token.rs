/// Up to 8 opaque bytes correlating a response to the request that
/// provoked it, independent of the message id (which may change across
/// retransmissions of a deferred response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token {
  bytes: [u8; 8],
  len: u8,
}

impl Token {
  /// An empty (zero-length) token, used on Empty messages (ACK/RST/ping).
  pub const EMPTY: Token = Token { bytes: [0; 8], len: 0 };

  /// Build a token from a byte slice, truncating anything past 8 bytes.
  pub fn opaque(bytes: &[u8]) -> Self {
    let len = bytes.len().min(8);
    let mut out = [0u8; 8];
    out[..len].copy_from_slice(&bytes[..len]);
    Token { bytes: out, len: len as u8 }
  }

  pub fn len(&self) -> u8 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes[..self.len as usize]
  }
}

impl AsRef<[u8]> for Token {
  fn as_ref(&self) -> &[u8] {
    self.as_bytes()
  }
}
