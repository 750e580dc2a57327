//! Flat resource registry keyed by exact URI-path match (spec §4.H).

use std::collections::HashMap;

use crate::msg::code::{method, resp};
use crate::msg::Message;

/// A request method a resource can have a handler registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
  Fetch,
  Patch,
  IPatch,
}

impl Method {
  fn from_code(code: crate::msg::Code) -> Option<Self> {
    match code {
      | method::GET => Some(Method::Get),
      | method::POST => Some(Method::Post),
      | method::PUT => Some(Method::Put),
      | method::DELETE => Some(Method::Delete),
      | method::FETCH => Some(Method::Fetch),
      | method::PATCH => Some(Method::Patch),
      | method::IPATCH => Some(Method::IPatch),
      | _ => None,
    }
  }
}

type Handler = Box<dyn Fn(&Message) -> Message>;

/// One flat-namespace resource: a path, its registered method handlers,
/// and the attributes it advertises in `.well-known/core` (spec §4.H).
pub struct Resource {
  pub path: Vec<String>,
  pub observable: bool,
  /// `.well-known/core` attributes, e.g. `rt="temperature"`.
  pub attributes: Vec<(String, String)>,
  handlers: HashMap<Method, Handler>,
}

impl Resource {
  pub fn new(path: &str) -> Self {
    Resource { path: split_path(path), observable: false, attributes: Vec::new(), handlers: HashMap::new() }
  }

  pub fn observable(mut self) -> Self {
    self.observable = true;
    self
  }

  pub fn attribute(mut self, key: &str, value: &str) -> Self {
    self.attributes.push((key.to_string(), value.to_string()));
    self
  }

  pub fn on(&mut self, method: Method, handler: impl Fn(&Message) -> Message + 'static) {
    self.handlers.insert(method, Box::new(handler));
  }

  /// Invoke the handler registered for `req`'s method, or reply
  /// 4.05 Method Not Allowed if none is registered (spec §4.H).
  pub fn handle(&self, req: &Message) -> Message {
    match Method::from_code(req.code).and_then(|m| self.handlers.get(&m)) {
      | Some(handler) => handler(req),
      | None => req.ack(resp::METHOD_NOT_ALLOWED),
    }
  }
}

fn split_path(path: &str) -> Vec<String> {
  path.split('/').filter(|s| !s.is_empty()).map(String::from).collect()
}

/// The set of resources a server exposes, plus the two wildcard handlers
/// (spec §4.H: "an 'unknown-URI' handler and a 'proxy-URI' handler").
#[derive(Default)]
pub struct ResourceRegistry {
  resources: HashMap<Vec<String>, Resource>,
  unknown: Option<Handler>,
  proxy: Option<Handler>,
}

impl ResourceRegistry {
  pub fn new() -> Self {
    ResourceRegistry::default()
  }

  pub fn add(&mut self, resource: Resource) {
    self.resources.insert(resource.path.clone(), resource);
  }

  pub fn find(&self, path: &[String]) -> Option<&Resource> {
    self.resources.get(path)
  }

  pub fn resources(&self) -> impl Iterator<Item = &Resource> {
    self.resources.values()
  }

  pub fn set_unknown_handler(&mut self, handler: impl Fn(&Message) -> Message + 'static) {
    self.unknown = Some(Box::new(handler));
  }

  pub fn set_proxy_handler(&mut self, handler: impl Fn(&Message) -> Message + 'static) {
    self.proxy = Some(Box::new(handler));
  }

  pub fn unknown_handler(&self) -> Option<&Handler> {
    self.unknown.as_ref()
  }

  pub fn proxy_handler(&self) -> Option<&Handler> {
    self.proxy.as_ref()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::msg::{Id, Token, Type};

  #[test]
  fn method_not_allowed_when_no_handler_registered() {
    let mut r = Resource::new("time");
    r.on(Method::Get, |req| req.ack(resp::CONTENT));
    let mut req = Message::new(Type::Con, method::POST, Id(1), Token::EMPTY);
    req.set_path("time");
    assert_eq!(r.handle(&req).code, resp::METHOD_NOT_ALLOWED);
  }

  #[test]
  fn registry_finds_exact_path_only() {
    let mut reg = ResourceRegistry::new();
    reg.add(Resource::new("a/b"));
    assert!(reg.find(&["a".into(), "b".into()]).is_some());
    assert!(reg.find(&["a".into()]).is_none());
  }
}
