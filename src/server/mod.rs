//! Server resource dispatch (component H, spec §4.H): URI-path routing,
//! method handlers, `.well-known/core` discovery, and observe
//! subscriptions.
//!
//! The teacher's applicative `Ap` routing DSL is replaced with ordinary
//! path-segment matching and closure-based handlers — spec §5's Non-goal
//! of "no application-layer framework" and §9's redesign notes both point
//! away from carrying that generality forward into a std-only crate.

pub mod link_format;
pub mod observe;
pub mod resource;

pub use observe::ObserveRegistry;
pub use resource::{Method, Resource, ResourceRegistry};

use crate::msg::code::resp;
use crate::msg::{ContentFormat, Message};

/// The well-known discovery path every server answers (spec §4.H,
/// RFC 6690 §1.2.1).
pub const WELL_KNOWN_CORE: &[&str] = &[".well-known", "core"];

/// Dispatch an inbound request per spec §4.H: `.well-known/core`, then
/// exact-path match, then the unknown-URI handler, then the proxy-URI
/// handler, else 4.04.
pub fn dispatch(registry: &ResourceRegistry, req: &Message) -> Message {
  let path: Vec<String> =
    req.path().ok().map(|segs| segs.into_iter().map(String::from).collect()).unwrap_or_default();

  if path.iter().map(String::as_str).eq(WELL_KNOWN_CORE.iter().copied()) {
    return well_known_core(registry, req);
  }
  if let Some(resource) = registry.find(&path) {
    return resource.handle(req);
  }
  if let Some(handler) = registry.unknown_handler() {
    return handler(req);
  }
  if let Some(handler) = registry.proxy_handler() {
    return handler(req);
  }

  req.ack(resp::NOT_FOUND)
}

/// Synthesize the Link-Format discovery document (spec §4.H: "The
/// response is synthesized each call unless present in the cache" — the
/// cache side of that is the scheduler's request-coalescing cache,
/// component I, which this dispatch function is oblivious to).
fn well_known_core(registry: &ResourceRegistry, req: &Message) -> Message {
  let mut resp = req.ack(resp::CONTENT);
  resp.set_content_format(ContentFormat::LinkFormat);
  resp.payload = link_format::render(registry.resources()).into_bytes();
  resp
}
