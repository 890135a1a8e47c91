//! Option types.
//!
//! [`OptionType`] is the closed set of value shapes an option may declare.
//! Types are usually parsed from the evaluator's type descriptions
//! (`"list of signed integer"`, `"null or string"`, ...), checked against
//! evaluated values with [`OptionType::matches`], and mapped to the editors
//! able to handle them with [`OptionType::candidate_handlers`].

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde_json::Value;
use thiserror::Error;

use crate::attribute::Attribute;

/// A type description with no corresponding [`OptionType`] variant.
///
/// This indicates a schema produced by a newer module system than this
/// crate understands and is fatal for tree construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported option type `{descriptor}`")]
pub struct UnsupportedTypeError {
    /// The unrecognised type description.
    pub descriptor: String,
}

/// Shape of the values an option accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionType {
    /// Only `null`.
    Null,
    /// `true` or `false`.
    Bool,
    /// Any string.
    Str,
    /// Whole numbers.
    Int,
    /// Floating point numbers.
    Float,
    /// Filesystem paths.
    Path,
    /// Derivations.
    Package,
    /// Functions; these have no evaluated literal form.
    Function,
    /// One of a fixed, ordered set of literal choices.
    OneOf(Vec<Value>),
    /// A list whose elements all have the given type.
    ListOf(Box<OptionType>),
    /// A set with arbitrary keys whose values all have the given type.
    AttrsOf(Box<OptionType>),
    /// A set with named fields of their own types.
    Attrs {
        /// Declared fields.
        fields: BTreeMap<String, OptionType>,
        /// Whether undeclared fields are rejected.
        closed: bool,
    },
    /// A nested option schema, keyed relative to the submodule.
    Submodule(BTreeMap<Attribute, OptionType>),
    /// Any one of the alternatives, tried in declaration order.
    Either(Vec<OptionType>),
    /// Unconstrained; the alternatives only guide editor selection.
    Anything(Vec<OptionType>),
    /// The schema declares no type.
    Unspecified,
}

/// Editor capability applicable to a type.
///
/// The first four variants redirect navigation into the option's children
/// instead of editing the value in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Navigate into list elements.
    ListOf,
    /// Navigate into an open attribute set.
    AttrsOf,
    /// Navigate into fixed fields.
    Attrs,
    /// Navigate into a submodule.
    Submodule,
    /// No typed editor; the option declares no type.
    Undefined,
    /// Null editor.
    Null,
    /// Toggle.
    Boolean,
    /// Text entry.
    Text,
    /// Integer entry.
    Integer,
    /// Float entry.
    Float,
    /// Choice selector.
    OneOf,
    /// Known type without a dedicated editor.
    Unsupported,
    /// Raw expression editor, available for every option.
    Expression,
    /// Reference to another option, available for every option.
    Reference,
}

impl Capability {
    /// Whether this capability navigates instead of editing.
    pub fn is_redirect(self) -> bool {
        matches!(
            self,
            Capability::ListOf | Capability::AttrsOf | Capability::Attrs | Capability::Submodule
        )
    }
}

impl OptionType {
    /// The `anything` type with its default editor alternatives.
    pub fn anything() -> Self {
        OptionType::Anything(vec![
            OptionType::Null,
            OptionType::Bool,
            OptionType::Int,
            OptionType::Float,
            OptionType::Str,
            OptionType::ListOf(Box::new(OptionType::Unspecified)),
            OptionType::AttrsOf(Box::new(OptionType::Unspecified)),
        ])
    }

    /// Parse an evaluator type description.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedTypeError`] when any part of the description
    /// has no corresponding variant.
    pub fn from_descriptor(descriptor: &str) -> Result<Self, UnsupportedTypeError> {
        parse_descriptor(descriptor).ok_or_else(|| UnsupportedTypeError {
            descriptor: descriptor.to_string(),
        })
    }

    /// Whether `value` has this type, checked recursively.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            OptionType::Null => value.is_null(),
            OptionType::Bool => value.is_boolean(),
            OptionType::Str => value.is_string(),
            OptionType::Int => value.is_i64() || value.is_u64(),
            OptionType::Float => value.is_number(),
            OptionType::Path => value.as_str().is_some_and(|s| s.starts_with('/')),
            OptionType::Package => match value {
                Value::String(s) => s.starts_with("/nix/store/"),
                Value::Object(map) => map.get("type").and_then(Value::as_str) == Some("derivation"),
                _ => false,
            },
            OptionType::Function => false,
            OptionType::OneOf(choices) => choices.contains(value),
            OptionType::ListOf(elem) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| elem.matches(v))),
            OptionType::AttrsOf(elem) => value
                .as_object()
                .is_some_and(|map| map.values().all(|v| elem.matches(v))),
            OptionType::Attrs { fields, closed } => {
                let Some(map) = value.as_object() else {
                    return false;
                };
                let declared_ok = fields.iter().all(|(name, ty)| match map.get(name) {
                    Some(v) => ty.matches(v),
                    None => ty.matches(&Value::Null),
                });
                declared_ok && (!closed || map.keys().all(|k| fields.contains_key(k)))
            }
            OptionType::Submodule(options) => {
                let Some(map) = value.as_object() else {
                    return false;
                };
                options.iter().all(|(attr, ty)| {
                    lookup(map, attr.segments()).is_none_or(|v| ty.matches(v))
                })
            }
            OptionType::Either(alternatives) => alternatives.iter().any(|t| t.matches(value)),
            OptionType::Anything(_) | OptionType::Unspecified => true,
        }
    }

    /// The most specific type accepting `value`.
    ///
    /// Alternatives of [`OptionType::Either`] and [`OptionType::Anything`]
    /// are tried in declaration order and the first match wins.
    pub fn resolve(&self, value: &Value) -> Option<&OptionType> {
        match self {
            OptionType::Either(alternatives) => alternatives.iter().find_map(|t| t.resolve(value)),
            OptionType::Anything(alternatives) => {
                Some(alternatives.iter().find_map(|t| t.resolve(value)).unwrap_or(self))
            }
            _ if self.matches(value) => Some(self),
            _ => None,
        }
    }

    /// Editor capabilities for this type, in order of preference.
    ///
    /// Unions collect the capabilities of every alternative, keeping the
    /// first occurrence of each.
    pub fn candidate_handlers(&self) -> Vec<Capability> {
        let single = match self {
            OptionType::ListOf(_) => Capability::ListOf,
            OptionType::AttrsOf(_) => Capability::AttrsOf,
            OptionType::Attrs { .. } => Capability::Attrs,
            OptionType::Submodule(_) => Capability::Submodule,
            OptionType::Unspecified => Capability::Undefined,
            OptionType::Null => Capability::Null,
            OptionType::Bool => Capability::Boolean,
            OptionType::Str => Capability::Text,
            OptionType::Int => Capability::Integer,
            OptionType::Float => Capability::Float,
            OptionType::OneOf(_) => Capability::OneOf,
            OptionType::Path | OptionType::Package | OptionType::Function => {
                Capability::Unsupported
            }
            OptionType::Either(alternatives) | OptionType::Anything(alternatives) => {
                let mut caps = Vec::new();
                for cap in alternatives.iter().flat_map(OptionType::candidate_handlers) {
                    if !caps.contains(&cap) {
                        caps.push(cap);
                    }
                }
                return caps;
            }
        };
        vec![single]
    }

    /// [`candidate_handlers`](Self::candidate_handlers) followed by the
    /// editors every option supports.
    pub fn field_capabilities(&self) -> Vec<Capability> {
        let mut caps = self.candidate_handlers();
        caps.extend([Capability::Expression, Capability::Reference]);
        caps
    }

    /// Element type of children created under this type, if it has open keys.
    pub fn attrs_element(&self) -> Option<&OptionType> {
        match self {
            OptionType::AttrsOf(elem) => Some(elem),
            _ => None,
        }
    }
}

fn lookup<'a>(map: &'a serde_json::Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let value = map.get(first)?;
    if rest.is_empty() {
        Some(value)
    } else {
        lookup(value.as_object()?, rest)
    }
}

fn parse_descriptor(desc: &str) -> Option<OptionType> {
    let desc = desc.trim();
    // coercedTo: "<final type> or <coerced type> convertible to it"
    let desc = strip_parens(desc.strip_suffix(" convertible to it").unwrap_or(desc));
    // passwdEntry and friends: "string, not containing newlines or colons"
    let desc = split_top_level(desc, ", not containing ")
        .first()
        .map_or(desc, |head| head.trim_end());

    let alternatives = split_top_level(desc, " or ");
    if alternatives.len() > 1 {
        return alternatives
            .into_iter()
            .map(parse_descriptor)
            .collect::<Option<Vec<_>>>()
            .map(OptionType::Either);
    }

    if let Some(rest) = desc.strip_prefix("non-empty ") {
        return parse_descriptor(rest);
    }
    if let Some(rest) = desc.strip_prefix("list of ") {
        return Some(OptionType::ListOf(Box::new(parse_descriptor(rest)?)));
    }
    if let Some(rest) = desc
        .strip_prefix("attribute set of ")
        .or_else(|| desc.strip_prefix("lazy attribute set of "))
    {
        return Some(OptionType::AttrsOf(Box::new(parse_descriptor(rest)?)));
    }
    if let Some(rest) = desc.strip_prefix("one of ") {
        return Some(OptionType::OneOf(parse_choices(rest)));
    }
    if desc.starts_with("function") {
        return Some(OptionType::Function);
    }
    if let Some(choice) = desc
        .strip_prefix("value ")
        .and_then(|rest| rest.strip_suffix(" (singular enum)"))
    {
        return Some(OptionType::OneOf(parse_choices(choice)));
    }

    let ty = match desc {
        "null" => OptionType::Null,
        "boolean" => OptionType::Bool,
        "path" | "absolute path" => OptionType::Path,
        "package" => OptionType::Package,
        "anything" | "raw value" | "JSON value" => OptionType::anything(),
        "unspecified value" | "unspecified" => OptionType::Unspecified,
        "attribute set" => OptionType::AttrsOf(Box::new(OptionType::Unspecified)),
        "number" => OptionType::Float,
        "module" | "deferred module" => OptionType::Submodule(BTreeMap::new()),
        // pkgs.formats: "TOML value", "YAML value", "INI atom value", ...
        _ if desc.ends_with(" value") => OptionType::anything(),
        // "shell package", "Python package", ...
        _ if desc.ends_with(" package") => OptionType::Package,
        _ if desc.starts_with("submodule") || desc.starts_with("open submodule") => {
            OptionType::Submodule(BTreeMap::new())
        }
        _ if desc.starts_with("floating point number") => OptionType::Float,
        _ if desc.starts_with("path") || desc.ends_with(" path") => OptionType::Path,
        _ if desc.starts_with("string") || desc.ends_with(" string") => OptionType::Str,
        _ if desc.contains("integer") => OptionType::Int,
        _ => return None,
    };
    Some(ty)
}

/// Strip parentheses that wrap the whole description.
fn strip_parens(desc: &str) -> &str {
    let Some(inner) = desc.strip_prefix('(').and_then(|d| d.strip_suffix(')')) else {
        return desc;
    };
    // "(a) or (b)" starts and ends with parens without being wrapped
    if balanced(inner) {
        strip_parens(inner.trim())
    } else {
        desc
    }
}

fn balanced(s: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Split on `sep` outside parentheses and double quotes.
fn split_top_level<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;
    let mut i = 0;
    while i < s.len() {
        let c = s[i..].chars().next().unwrap_or_default();
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if depth == 0 && s[i..].starts_with(sep) {
            parts.push(&s[start..i]);
            i += sep.len();
            start = i;
            continue;
        } else {
            match c {
                '"' => in_string = true,
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
        }
        i += c.len_utf8();
    }
    parts.push(&s[start..]);
    parts
}

fn parse_choices(list: &str) -> Vec<Value> {
    split_top_level(list, ",")
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            serde_json::from_str(item).unwrap_or_else(|_| Value::String(item.to_string()))
        })
        .collect()
}

impl FromStr for OptionType {
    type Err = UnsupportedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_descriptor(s)
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let element = |t: &OptionType| match t {
            OptionType::Either(_) => format!("({t})"),
            _ => t.to_string(),
        };
        let alternative = |t: &OptionType| match t {
            OptionType::Either(_) | OptionType::ListOf(_) | OptionType::AttrsOf(_) => {
                format!("({t})")
            }
            _ => t.to_string(),
        };
        match self {
            OptionType::Null => write!(f, "null"),
            OptionType::Bool => write!(f, "boolean"),
            OptionType::Str => write!(f, "string"),
            OptionType::Int => write!(f, "signed integer"),
            OptionType::Float => write!(f, "floating point number"),
            OptionType::Path => write!(f, "path"),
            OptionType::Package => write!(f, "package"),
            OptionType::Function => write!(f, "function"),
            OptionType::OneOf(choices) => {
                let rendered: Vec<_> = choices.iter().map(Value::to_string).collect();
                write!(f, "one of {}", rendered.join(", "))
            }
            OptionType::ListOf(elem) => write!(f, "list of {}", element(elem)),
            OptionType::AttrsOf(elem) => write!(f, "attribute set of {}", element(elem)),
            OptionType::Attrs { .. } => write!(f, "attribute set"),
            OptionType::Submodule(_) => write!(f, "submodule"),
            OptionType::Either(alternatives) => {
                let rendered: Vec<_> = alternatives.iter().map(alternative).collect();
                write!(f, "{}", rendered.join(" or "))
            }
            OptionType::Anything(_) => write!(f, "anything"),
            OptionType::Unspecified => write!(f, "unspecified value"),
        }
    }
}
