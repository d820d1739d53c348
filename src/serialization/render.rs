//! Renders a [`Value`] tree as deterministic, human-readable text.
//!
//! ```text
//! {
//!   Id: 7,
//!   Lines: [
//!     {
//!       Sku: A
//!     }
//!   ]
//! }
//! ```
//!
//! Strings are bare. Nested strings escape `\r` and `\n` so one member stays on one line; a
//! top-level string is written unchanged.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::diagnostics::Result;
use crate::registry::format_float;
use crate::settings::{MemberOrder, SerializationSettings};
use crate::value::Value;

/// Written in place of a node that is already being rendered further up the current path.
pub const CYCLE_MARKER: &str = "<cycle reference>";

const INDENT: &str = "  ";

/// Renders `value` under `settings`.
pub fn render(value: &Value, settings: &SerializationSettings) -> Result<String> {
    let mut renderer = Renderer {
        settings,
        path: HashSet::new(),
    };
    let mut out = String::new();
    if let Value::String(s) = value {
        out.push_str(s);
        return Ok(out);
    }
    renderer.write(value, 0, &mut out)?;
    Ok(out)
}

/// Placeholder text for binary content inside textual output.
pub fn describe_binary(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("<binary {} bytes sha256={}>", bytes.len(), hex)
}

struct Renderer<'a> {
    settings: &'a SerializationSettings,
    /// Ids of shared nodes on the path from the root to the node being written.
    path: HashSet<usize>,
}

impl Renderer<'_> {
    fn write(&mut self, value: &Value, depth: usize, out: &mut String) -> Result<()> {
        match value {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f, f.to_string())),
            Value::String(s) => push_escaped(out, s),
            Value::Bytes(bytes) => out.push_str(&describe_binary(bytes)),
            Value::List(items) => {
                if items.is_empty() {
                    out.push_str("[]");
                    return Ok(());
                }
                out.push_str("[\n");
                for (i, item) in items.iter().enumerate() {
                    push_indent(out, depth + 1);
                    self.write(item, depth + 1, out)?;
                    out.push_str(if i + 1 < items.len() { ",\n" } else { "\n" });
                }
                push_indent(out, depth);
                out.push(']');
            }
            Value::Map(entries) => {
                let mut sorted: Vec<&(String, Value)> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                self.write_members(&sorted, depth, out)?;
            }
            Value::Object { type_name, members } => {
                if let Some(converter) = type_name
                    .as_deref()
                    .and_then(|name| self.settings.converter(name))
                {
                    out.push_str(&converter(value)?);
                    return Ok(());
                }
                let mut kept: Vec<&(String, Value)> = members
                    .iter()
                    .filter(|(name, member)| !self.is_omitted(name, member))
                    .collect();
                if self.settings.member_order == MemberOrder::Alphabetical {
                    kept.sort_by(|a, b| a.0.cmp(&b.0));
                }
                self.write_members(&kept, depth, out)?;
            }
            Value::Shared(node) => {
                let id = node.id();
                if !self.path.insert(id) {
                    out.push_str(CYCLE_MARKER);
                    return Ok(());
                }
                let written = node.with(|inner| self.write(inner, depth, out));
                self.path.remove(&id);
                written?;
            }
        }
        Ok(())
    }

    fn write_members(
        &mut self,
        members: &[&(String, Value)],
        depth: usize,
        out: &mut String,
    ) -> Result<()> {
        if members.is_empty() {
            out.push_str("{}");
            return Ok(());
        }
        out.push_str("{\n");
        for (i, (name, member)) in members.iter().map(|m| (&m.0, &m.1)).enumerate() {
            push_indent(out, depth + 1);
            out.push_str(name);
            out.push_str(": ");
            self.write(member, depth + 1, out)?;
            out.push_str(if i + 1 < members.len() { ",\n" } else { "\n" });
        }
        push_indent(out, depth);
        out.push('}');
        Ok(())
    }

    fn is_omitted(&self, name: &str, member: &Value) -> bool {
        if self.settings.is_member_ignored(name) {
            return true;
        }
        match member {
            Value::Null => self.settings.ignore_nulls,
            Value::List(_) | Value::Map(_) => {
                self.settings.ignore_empty_collections && member.is_empty_collection()
            }
            Value::Object {
                type_name: Some(type_name),
                ..
            } => self.settings.is_type_ignored(type_name),
            // Look one level through the node; a node holding another node is kept.
            Value::Shared(node) => node.with(|inner| match inner {
                Value::Shared(_) => false,
                other => self.is_omitted(name, other),
            }),
            _ => false,
        }
    }
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SharedValue;

    fn rendered(value: &Value) -> String {
        render(value, &SerializationSettings::default()).unwrap()
    }

    #[test]
    fn members_sort_alphabetically_by_default() {
        let value = Value::named_object(
            "Person",
            [("Name", Value::from("Ann")), ("Age", Value::from(30i64))],
        );
        assert_eq!(rendered(&value), "{\n  Age: 30,\n  Name: Ann\n}");
    }

    #[test]
    fn declaration_order_is_kept_when_configured() {
        let mut settings = SerializationSettings::default();
        settings.member_order = MemberOrder::Declaration;
        let value = Value::object([("b", Value::from(true)), ("a", Value::from(false))]);
        assert_eq!(
            render(&value, &settings).unwrap(),
            "{\n  b: true,\n  a: false\n}"
        );
    }

    #[test]
    fn nulls_and_empty_collections_are_omitted() {
        let value = Value::object([
            ("gone", Value::Null),
            ("none", Value::List(vec![])),
            ("kept", Value::List(vec![Value::from(1i64)])),
        ]);
        assert_eq!(rendered(&value), "{\n  kept: [\n    1\n  ]\n}");
    }

    #[test]
    fn ignored_members_and_types_are_omitted() {
        let mut settings = SerializationSettings::default();
        settings.ignore_member("secret").ignore_members_of_type("Audit");
        let value = Value::object([
            ("secret", Value::from("x")),
            ("audit", Value::named_object("Audit", [("by", Value::from("me"))])),
            ("id", Value::from(1i64)),
        ]);
        assert_eq!(render(&value, &settings).unwrap(), "{\n  id: 1\n}");
    }

    #[test]
    fn nested_strings_escape_newlines() {
        let value = Value::object([("text", Value::from("a\r\nb"))]);
        assert_eq!(rendered(&value), "{\n  text: a\\r\\nb\n}");
        assert_eq!(rendered(&Value::from("a\nb")), "a\nb");
    }

    #[test]
    fn registered_converter_replaces_structural_walk() {
        let mut settings = SerializationSettings::default();
        settings.add_converter("Money", |value| {
            let Value::Object { members, .. } = value else {
                return Ok(String::new());
            };
            Ok(format!("{:?} units", members.len()))
        });
        let value = Value::object([(
            "price",
            Value::named_object("Money", [("amount", Value::from(5i64))]),
        )]);
        assert_eq!(render(&value, &settings).unwrap(), "{\n  price: 1 units\n}");
    }

    #[test]
    fn self_reference_renders_marker() {
        let node = SharedValue::new(Value::Null);
        node.set(Value::object([
            ("name", Value::from("root")),
            ("me", Value::Shared(node.clone())),
        ]));
        assert_eq!(
            rendered(&Value::Shared(node.clone())),
            format!("{{\n  me: {CYCLE_MARKER},\n  name: root\n}}")
        );
        // Break the cycle so the allocation is released.
        node.set(Value::Null);
    }

    #[test]
    fn shared_node_reached_twice_without_cycle_renders_fully() {
        let leaf = SharedValue::new(Value::from(1i64));
        let value = Value::object([
            ("a", Value::Shared(leaf.clone())),
            ("b", Value::Shared(leaf)),
        ]);
        assert_eq!(rendered(&value), "{\n  a: 1,\n  b: 1\n}");
    }

    #[test]
    fn binary_placeholder_includes_length_and_digest() {
        let text = describe_binary(b"abc");
        assert!(text.starts_with("<binary 3 bytes sha256=ba7816bf"));
    }

    #[test]
    fn special_floats_use_fixed_tokens() {
        let value = Value::List(vec![Value::Float(f64::NAN), Value::Float(f64::NEG_INFINITY)]);
        assert_eq!(rendered(&value), "[\n  NaN,\n  -Infinity\n]");
    }
}
