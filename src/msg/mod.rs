//! Low-level representation of CoAP messages (component A, spec §4.A).
//!
//! [`Message`] is the in-memory PDU: header fields plus an ordered option
//! map plus a payload. It is deliberately framing-agnostic — [`codec`]
//! is what knows how to turn a `Message` into UDP or TCP bytes and back.

pub mod code;
pub mod codec;
pub mod id;
pub mod opt;
pub mod parse_error;
pub mod token;
pub mod ty;

pub use code::Code;
pub use id::Id;
pub use opt::{Block, ContentFormat, ObserveAction, OptNumber, OptValue};
pub use parse_error::{MessageEncodeError, MessageParseError};
pub use token::Token;
pub use ty::Type;

use std::str::Utf8Error;

use opt::OptionMap;

/// A single CoAP PDU: header, token, options and payload.
///
/// `ver` is always 1 on the wire, but is kept so a decoded message can be
/// round-tripped byte-for-byte even in the face of a future version bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  pub id: Id,
  pub ty: Type,
  pub ver: u8,
  pub token: Token,
  pub code: Code,
  pub opts: OptionMap,
  pub payload: Vec<u8>,
}

impl Message {
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Message { id, ty, ver: 1, token, code, opts: OptionMap::new(), payload: Vec::new() }
  }

  /// Build an ACK for this message (spec §4.F: inbound CON with a response
  /// causes an ACK to be sent). The caller supplies the id — a plain ACK
  /// reuses the request's id; a piggybacked response ACK does too.
  pub fn ack(&self, code: Code) -> Self {
    Message { id: self.id, token: self.token, ver: 1, ty: Type::Ack, code, opts: OptionMap::new(), payload: Vec::new() }
  }

  /// Build a Reset reply (e.g. answering a ping, or rejecting an unknown
  /// critical option on an inbound response, spec §4.B / §7).
  pub fn reset(&self) -> Self {
    Message { id: self.id, token: Token::EMPTY, ver: 1, ty: Type::Reset, code: Code::new(0, 0), opts: OptionMap::new(), payload: Vec::new() }
  }

  pub fn is_empty(&self) -> bool {
    self.code == Code::new(0, 0)
  }

  fn add(&mut self, n: OptNumber, v: OptValue) {
    self.opts.entry(n).or_default().push(v);
  }

  fn set(&mut self, n: OptNumber, v: OptValue) -> Option<Vec<OptValue>> {
    let old = self.opts.remove(&n);
    self.add(n, v);
    old
  }

  pub fn get(&self, n: OptNumber) -> Option<&[OptValue]> {
    self.opts.get(&n).map(Vec::as_slice)
  }

  pub fn get_first(&self, n: OptNumber) -> Option<&OptValue> {
    self.get(n).and_then(|vs| vs.first())
  }

  pub fn get_str(&self, n: OptNumber) -> Result<Option<&str>, Utf8Error> {
    match self.get_first(n) {
      | Some(v) => std::str::from_utf8(&v.0).map(Some),
      | None => Ok(None),
    }
  }

  pub fn get_strs(&self, n: OptNumber) -> Result<Vec<&str>, Utf8Error> {
    match self.get(n) {
      | Some(vs) => vs.iter().map(|v| std::str::from_utf8(&v.0)).collect(),
      | None => Ok(Vec::new()),
    }
  }

  pub fn get_u8(&self, n: OptNumber) -> Option<u8> {
    self.get_first(n).filter(|v| v.0.len() == 1).map(|v| v.0[0])
  }

  pub fn get_u16(&self, n: OptNumber) -> Option<u16> {
    self.get_first(n).filter(|v| v.0.len() == 2).map(|v| u16::from_be_bytes([v.0[0], v.0[1]]))
  }

  pub fn get_u32(&self, n: OptNumber) -> Option<u32> {
    self.get_first(n).and_then(|v| {
                        let mut b = [0u8; 4];
                        let off = 4usize.checked_sub(v.0.len())?;
                        b[off..].copy_from_slice(&v.0);
                        (v.0.len() <= 4).then_some(u32::from_be_bytes(b))
                      })
  }

  pub fn get_u64(&self, n: OptNumber) -> Option<u64> {
    self.get_first(n).and_then(|v| {
                        let mut b = [0u8; 8];
                        let off = 8usize.checked_sub(v.0.len())?;
                        b[off..].copy_from_slice(&v.0);
                        (v.0.len() <= 8).then_some(u64::from_be_bytes(b))
                      })
  }

  pub fn remove(&mut self, n: OptNumber) -> Option<Vec<OptValue>> {
    self.opts.remove(&n)
  }

  // -- typed convenience accessors, mirroring the teacher's MessageOptions --

  pub fn set_host<S: AsRef<str>>(&mut self, host: S) {
    self.set(opt::known::URI_HOST, OptValue(host.as_ref().as_bytes().to_vec()));
  }

  pub fn host(&self) -> Result<Option<&str>, Utf8Error> {
    self.get_str(opt::known::URI_HOST)
  }

  pub fn set_port(&mut self, port: u16) {
    self.set(opt::known::URI_PORT, OptValue(port.to_be_bytes().to_vec()));
  }

  pub fn port(&self) -> Option<u16> {
    self.get_u16(opt::known::URI_PORT)
  }

  pub fn set_path<S: AsRef<str>>(&mut self, path: S) {
    self.remove(opt::known::URI_PATH);
    for seg in path.as_ref().split('/').filter(|s| !s.is_empty()) {
      self.add(opt::known::URI_PATH, OptValue(seg.as_bytes().to_vec()));
    }
  }

  pub fn path(&self) -> Result<Vec<&str>, Utf8Error> {
    self.get_strs(opt::known::URI_PATH)
  }

  pub fn path_string(&self) -> Result<String, Utf8Error> {
    Ok(self.path()?.join("/"))
  }

  pub fn add_query<S: AsRef<str>>(&mut self, q: S) {
    self.add(opt::known::URI_QUERY, OptValue(q.as_ref().as_bytes().to_vec()));
  }

  pub fn query(&self) -> Result<Vec<&str>, Utf8Error> {
    self.get_strs(opt::known::URI_QUERY)
  }

  pub fn set_content_format(&mut self, f: ContentFormat) {
    self.set(opt::known::CONTENT_FORMAT, OptValue(u16::from(f).to_be_bytes().to_vec()));
  }

  pub fn content_format(&self) -> Option<ContentFormat> {
    self.get_u16(opt::known::CONTENT_FORMAT).map(ContentFormat::from)
  }

  pub fn set_accept(&mut self, f: ContentFormat) {
    self.set(opt::known::ACCEPT, OptValue(u16::from(f).to_be_bytes().to_vec()));
  }

  pub fn accept(&self) -> Option<ContentFormat> {
    self.get_u16(opt::known::ACCEPT).map(ContentFormat::from)
  }

  pub fn set_observe(&mut self, a: ObserveAction) {
    self.set(opt::known::OBSERVE, OptValue(a.value().to_be_bytes()[1..].to_vec()));
  }

  /// The raw Observe sequence number (0..2^24), not just register/deregister.
  pub fn set_observe_seq(&mut self, seq: u32) {
    let b = seq.to_be_bytes();
    self.set(opt::known::OBSERVE, OptValue(b[1..].to_vec()));
  }

  pub fn observe(&self) -> Option<u32> {
    self.get_first(opt::known::OBSERVE).map(|v| {
                                          let mut b = [0u8; 4];
                                          let off = 4 - v.0.len().min(4);
                                          b[off..].copy_from_slice(&v.0[..v.0.len().min(4)]);
                                          u32::from_be_bytes(b)
                                        })
  }

  pub fn block1(&self) -> Option<Block> {
    self.get_u32(opt::known::BLOCK1).map(Block::from)
  }

  pub fn set_block1(&mut self, b: Block) {
    self.set(opt::known::BLOCK1, OptValue(u32::from(b).to_be_bytes().to_vec()));
  }

  pub fn block2(&self) -> Option<Block> {
    self.get_u32(opt::known::BLOCK2).map(Block::from)
  }

  pub fn set_block2(&mut self, b: Block) {
    self.set(opt::known::BLOCK2, OptValue(u32::from(b).to_be_bytes().to_vec()));
  }

  pub fn set_size1(&mut self, n: u32) {
    self.set(opt::known::SIZE1, OptValue(n.to_be_bytes().to_vec()));
  }

  pub fn size1(&self) -> Option<u32> {
    self.get_u32(opt::known::SIZE1)
  }

  pub fn set_size2(&mut self, n: u32) {
    self.set(opt::known::SIZE2, OptValue(n.to_be_bytes().to_vec()));
  }

  pub fn size2(&self) -> Option<u32> {
    self.get_u32(opt::known::SIZE2)
  }

  pub fn set_max_age(&mut self, secs: u32) {
    self.set(opt::known::MAX_AGE, OptValue(secs.to_be_bytes().to_vec()));
  }

  pub fn max_age(&self) -> Option<u32> {
    self.get_u32(opt::known::MAX_AGE)
  }

  pub fn set_proxy_uri<S: AsRef<str>>(&mut self, uri: S) {
    self.set(opt::known::PROXY_URI, OptValue(uri.as_ref().as_bytes().to_vec()));
  }

  pub fn proxy_uri(&self) -> Result<Option<&str>, Utf8Error> {
    self.get_str(opt::known::PROXY_URI)
  }

  pub fn add_etag(&mut self, tag: &[u8]) {
    self.add(opt::known::ETAG, OptValue(tag.to_vec()));
  }

  pub fn etags(&self) -> Option<&[OptValue]> {
    self.get(opt::known::ETAG)
  }

  pub fn add_if_match(&mut self, tag: &[u8]) {
    self.add(opt::known::IF_MATCH, OptValue(tag.to_vec()));
  }

  pub fn if_match(&self) -> Option<&[OptValue]> {
    self.get(opt::known::IF_MATCH)
  }

  pub fn set_if_none_match(&mut self) {
    self.set(opt::known::IF_NONE_MATCH, OptValue::default());
  }

  pub fn if_none_match(&self) -> bool {
    self.get_first(opt::known::IF_NONE_MATCH).is_some()
  }

  pub fn add_location_path<S: AsRef<str>>(&mut self, seg: S) {
    self.add(opt::known::LOCATION_PATH, OptValue(seg.as_ref().as_bytes().to_vec()));
  }

  pub fn location_path(&self) -> Result<Vec<&str>, Utf8Error> {
    self.get_strs(opt::known::LOCATION_PATH)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn path_roundtrip() {
    let mut m = Message::new(Type::Con, code::method::GET, Id(1), Token::opaque(b"tok"));
    m.set_path("foo/bar/baz");
    assert_eq!(m.path().unwrap(), vec!["foo", "bar", "baz"]);
    assert_eq!(m.path_string().unwrap(), "foo/bar/baz");
  }

  #[test]
  fn typed_options() {
    let mut m = Message::new(Type::Con, code::method::GET, Id(1), Token::EMPTY);
    m.set_content_format(ContentFormat::Json);
    assert_eq!(m.content_format(), Some(ContentFormat::Json));

    m.set_block1(Block::new(64, 2, true));
    assert_eq!(m.block1(), Some(Block::new(64, 2, true)));

    m.set_observe_seq(0x7fffff);
    assert_eq!(m.observe(), Some(0x7fffff));
  }

  #[test]
  fn ack_reuses_id_and_token() {
    let req = Message::new(Type::Con, code::method::GET, Id(42), Token::opaque(b"abc"));
    let ack = req.ack(code::resp::CONTENT);
    assert_eq!(ack.id, req.id);
    assert_eq!(ack.token, req.token);
    assert_eq!(ack.ty, Type::Ack);
  }
}
