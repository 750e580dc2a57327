//! RFC 6690 Link-Format serialization for `.well-known/core` (spec §4.H).

use crate::server::resource::Resource;

/// Render every resource's path and attributes as a Link-Format document,
/// e.g. `</time>;obs,</sensors/temp>;rt="temperature"`.
pub fn render<'a>(resources: impl Iterator<Item = &'a Resource>) -> String {
  resources.map(render_one).collect::<Vec<_>>().join(",")
}

fn render_one(r: &Resource) -> String {
  let mut out = format!("</{}>", r.path.join("/"));
  if r.observable {
    out.push_str(";obs");
  }
  for (key, value) in &r.attributes {
    out.push(';');
    out.push_str(key);
    out.push('=');
    if needs_quoting(value) {
      out.push('"');
      out.push_str(value);
      out.push('"');
    } else {
      out.push_str(value);
    }
  }
  out
}

fn needs_quoting(value: &str) -> bool {
  !value.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::server::resource::ResourceRegistry;

  #[test]
  fn renders_observable_and_quoted_attribute() {
    let mut reg = ResourceRegistry::new();
    reg.add(Resource::new("time").observable());
    reg.add(Resource::new("sensors/temp").attribute("rt", "temperature"));

    let doc = render(reg.resources());
    assert!(doc.contains("</time>;obs"));
    assert!(doc.contains("</sensors/temp>;rt=\"temperature\""));
  }

  #[test]
  fn numeric_attribute_is_unquoted() {
    let mut r = Resource::new("a");
    r = r.attribute("sz", "42");
    assert_eq!(render_one(&r), "</a>;sz=42");
  }
}
