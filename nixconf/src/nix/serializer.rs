//! Value to Nix expression text.

use serde_json::{Map, Value};

use crate::{attribute::nix_attr_name, definition::SerializationError};

/// Turns evaluated values back into source syntax.
pub trait ExpressionSerializer {
    /// Render `value` as expression text.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] when the value has no literal form.
    fn serialize(&self, value: &Value) -> Result<String, SerializationError>;
}

/// Single-line Nix literal syntax.
///
/// `{ "_type": "literalExpression", "text": ... }` markers, as found in
/// option defaults, are written as their text. Other `_type` markers and
/// derivations cannot be written back.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixSerializer;

impl ExpressionSerializer for NixSerializer {
    fn serialize(&self, value: &Value) -> Result<String, SerializationError> {
        let mut out = String::new();
        write_value(&mut out, value, false)?;
        Ok(out)
    }
}

/// Quote `s` as a Nix string literal.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn write_value(out: &mut String, value: &Value, in_list: bool) -> Result<(), SerializationError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let text = match n.as_f64() {
                Some(f) if n.is_f64() => {
                    let s = f.to_string();
                    if s.contains(['.', 'e', 'E']) { s } else { format!("{s}.0") }
                }
                _ => n.to_string(),
            };
            if in_list && text.starts_with('-') {
                out.push_str(&format!("({text})"));
            } else {
                out.push_str(&text);
            }
        }
        Value::String(s) => out.push_str(&quote_string(s)),
        Value::Array(items) if items.is_empty() => out.push_str("[ ]"),
        Value::Array(items) => {
            out.push('[');
            for item in items {
                out.push(' ');
                write_value(out, item, true)?;
            }
            out.push_str(" ]");
        }
        Value::Object(map) => write_object(out, map, in_list)?,
    }
    Ok(())
}

fn write_object(
    out: &mut String,
    map: &Map<String, Value>,
    in_list: bool,
) -> Result<(), SerializationError> {
    if let Some(marker) = map.get("_type") {
        let kind = marker.as_str().unwrap_or_default();
        return match (kind, map.get("text").and_then(Value::as_str)) {
            ("literalExpression" | "literalExample", Some(text)) => {
                if in_list {
                    out.push_str(&format!("({text})"));
                } else {
                    out.push_str(text);
                }
                Ok(())
            }
            _ => Err(SerializationError {
                reason: format!("values of type `{marker}` cannot be written back"),
            }),
        };
    }
    if map.get("type").and_then(Value::as_str) == Some("derivation") {
        return Err(SerializationError {
            reason: "derivations cannot be written as literals".to_string(),
        });
    }

    if map.is_empty() {
        out.push_str("{ }");
        return Ok(());
    }
    out.push('{');
    for (key, value) in map {
        out.push(' ');
        out.push_str(&nix_attr_name(key));
        out.push_str(" = ");
        write_value(out, value, false)?;
        out.push(';');
    }
    out.push_str(" }");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ser(v: Value) -> String {
        NixSerializer.serialize(&v).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(ser(json!(null)), "null");
        assert_eq!(ser(json!(false)), "false");
        assert_eq!(ser(json!(42)), "42");
        assert_eq!(ser(json!(-1)), "-1");
        assert_eq!(ser(json!(1.0)), "1.0");
        assert_eq!(ser(json!(0.25)), "0.25");
        assert_eq!(ser(json!("newvalue")), "\"newvalue\"");
        assert_eq!(
            ser(json!("a \"b\" \\ ${c} $d\n")),
            r#""a \"b\" \\ \${c} $d\n""#
        );
    }

    #[test]
    fn test_collections() {
        assert_eq!(ser(json!([80, 443])), "[ 80 443 ]");
        assert_eq!(ser(json!([])), "[ ]");
        assert_eq!(ser(json!({})), "{ }");
        assert_eq!(ser(json!([1, -2])), "[ 1 (-2) ]");
        assert_eq!(
            ser(json!({"enable": true, "net.ipv4": 1, "ports": [22]})),
            r#"{ enable = true; "net.ipv4" = 1; ports = [ 22 ]; }"#
        );
    }

    #[test]
    fn test_literal_expression_marker() {
        assert_eq!(
            ser(json!({"_type": "literalExpression", "text": "pkgs.vim"})),
            "pkgs.vim"
        );
        assert_eq!(
            ser(json!([{"_type": "literalExpression", "text": "lib.mkDefault 1"}])),
            "[ (lib.mkDefault 1) ]"
        );
    }

    #[test]
    fn test_unrepresentable() {
        let err = NixSerializer
            .serialize(&json!({"_type": "lambda"}))
            .unwrap_err();
        assert!(err.reason.contains("lambda"));
        assert!(
            NixSerializer
                .serialize(&json!({"ports": [{"type": "derivation"}]}))
                .is_err()
        );
    }
}
