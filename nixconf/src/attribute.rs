//! Attribute paths.
//!
//! An [`Attribute`] is the key used everywhere in the option tree: an ordered
//! list of name segments such as `networking.firewall.allowedTCPPorts`.
//! Segments that contain the separator, a quote or a backslash are written
//! in double quotes, so `boot.kernel.sysctl."net.ipv4.ip_forward"` is a
//! three-segment path.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SEPARATOR: char = '.';

/// A dot-path string that could not be parsed into an [`Attribute`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed attribute `{input}`: {reason}")]
pub struct MalformedAttributeError {
    /// The rejected input.
    pub input: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

/// Ordered path of name segments identifying one option.
///
/// Equality and ordering are structural over the segments, which gives a
/// stable key for maps and a deterministic enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Attribute {
    segments: Vec<String>,
}

impl Attribute {
    /// The empty path, parent of every top-level option.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build an attribute from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a dot-joined path.
    ///
    /// The empty string parses to [`Attribute::root`].
    ///
    /// # Errors
    ///
    /// Returns [`MalformedAttributeError`] for empty unquoted segments
    /// (`a..b`, `.a`, `a.`), unterminated quotes, or stray characters after
    /// a quoted segment.
    pub fn parse(input: &str) -> Result<Self, MalformedAttributeError> {
        let fail = |reason| MalformedAttributeError {
            input: input.to_string(),
            reason,
        };

        if input.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        let mut chars = input.chars().peekable();
        loop {
            let mut segment = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => segment.push(chars.next().ok_or_else(|| fail("dangling escape"))?),
                        '"' => {
                            closed = true;
                            break;
                        }
                        c => segment.push(c),
                    }
                }
                if !closed {
                    return Err(fail("unterminated quoted segment"));
                }
            } else {
                while let Some(&c) = chars.peek() {
                    match c {
                        SEPARATOR => break,
                        '"' | '\\' => return Err(fail("quote or backslash in unquoted segment")),
                        c => segment.push(c),
                    }
                    chars.next();
                }
                if segment.is_empty() {
                    return Err(fail("empty segment"));
                }
            }
            segments.push(segment);

            match chars.next() {
                None => break,
                Some(SEPARATOR) => {}
                Some(_) => return Err(fail("expected `.` after quoted segment")),
            }
        }

        Ok(Self { segments })
    }

    /// The segments of this path, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, if any.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Path with the last segment removed; `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.to_vec(),
        })
    }

    /// New attribute with one segment appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Whether `self`'s segments are a prefix of `other`'s.
    ///
    /// Every attribute is its own ancestor; the root is an ancestor of all.
    pub fn is_ancestor_of(&self, other: &Attribute) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Segments of `self` below `ancestor`, if `ancestor` is one.
    pub fn strip_prefix(&self, ancestor: &Attribute) -> Option<&[String]> {
        self.segments.strip_prefix(ancestor.segments.as_slice())
    }

    /// Proper ancestors, from the root down to the parent.
    pub fn ancestors(&self) -> impl Iterator<Item = Attribute> + '_ {
        (0..self.segments.len()).map(|n| Self {
            segments: self.segments[..n].to_vec(),
        })
    }

    /// Render as a Nix attribute path, quoting segments that are not plain
    /// identifiers.
    pub fn to_nix(&self) -> String {
        self.segments
            .iter()
            .map(|s| nix_attr_name(s))
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Quote `name` for use as a Nix attribute name unless it is an identifier.
pub(crate) fn nix_attr_name(name: &str) -> String {
    let mut chars = name.chars();
    let is_ident = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '\'' | '-'))
        }
        _ => false,
    };
    // keywords cannot be bare attribute names
    let is_keyword = matches!(
        name,
        "if" | "then" | "else" | "assert" | "with" | "let" | "in" | "rec" | "inherit" | "or"
    );
    if is_ident && !is_keyword {
        name.to_string()
    } else {
        crate::nix::serializer::quote_string(name)
    }
}

fn needs_quotes(segment: &str) -> bool {
    segment.is_empty() || segment.contains([SEPARATOR, '"', '\\'])
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            if needs_quotes(segment) {
                write!(f, "\"")?;
                for c in segment.chars() {
                    if matches!(c, '"' | '\\') {
                        write!(f, "\\")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "\"")?;
            } else {
                write!(f, "{segment}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Attribute {
    type Err = MalformedAttributeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Attribute {
    type Error = MalformedAttributeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Attribute> for String {
    fn from(value: Attribute) -> Self {
        value.to_string()
    }
}
