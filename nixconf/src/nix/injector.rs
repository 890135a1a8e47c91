//! Targeted rewriting of module source text.
//!
//! Only the bytes of edited bindings change. Everything else, including
//! comments, formatting and bindings with dynamic names, is
//! copied through untouched.

use std::{collections::BTreeMap, ops::Range};

use super::syntax::{AttrSet, parse_module};
use crate::{
    attribute::Attribute,
    error::{Error, Result},
};

/// Rewrites the assignments of selected attributes.
pub trait Injector {
    /// Apply `edits` to `source`. `Some(text)` assigns the expression
    /// text, `None` removes the assignment.
    ///
    /// # Errors
    ///
    /// Fails without producing output when any edit cannot be placed.
    fn inject(&self, source: &str, edits: &BTreeMap<Attribute, Option<String>>) -> Result<String>;
}

/// [`Injector`] for Nix module files.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixInjector;

#[derive(Debug)]
struct Patch {
    range: Range<usize>,
    text: String,
}

impl Injector for NixInjector {
    fn inject(&self, source: &str, edits: &BTreeMap<Attribute, Option<String>>) -> Result<String> {
        let body = parse_module(source)?;
        let mut patches = Vec::new();
        for (attribute, edit) in edits {
            if attribute.is_root() {
                return Err(Error::syntax(body.open, "cannot assign the module itself"));
            }
            plan(
                source,
                &body,
                attribute,
                attribute.segments(),
                edit.as_deref(),
                &mut patches,
            )?;
        }
        debug!("rewriting {} span(s) for {} edit(s)", patches.len(), edits.len());

        patches.sort_by_key(|p| (p.range.start, p.range.end));
        for pair in patches.windows(2) {
            if pair[0].range.end > pair[1].range.start {
                return Err(Error::syntax(pair[1].range.start, "overlapping edits"));
            }
        }

        let mut out = String::with_capacity(source.len());
        let mut pos = 0;
        for patch in &patches {
            out.push_str(&source[pos..patch.range.start]);
            out.push_str(&patch.text);
            pos = patch.range.end;
        }
        out.push_str(&source[pos..]);
        Ok(out)
    }
}

fn plan(
    source: &str,
    set: &AttrSet,
    attribute: &Attribute,
    rel: &[String],
    edit: Option<&str>,
    patches: &mut Vec<Patch>,
) -> Result<()> {
    let mut found = false;
    for binding in &set.bindings {
        let path = binding.path.segments();
        if path == rel {
            patches.push(match edit {
                Some(text) => Patch {
                    range: binding.value.clone(),
                    text: text.to_string(),
                },
                None => removal(source, &binding.span),
            });
            found = true;
        } else if let Some(rest) = rel.strip_prefix(path) {
            return match &binding.body {
                Some(body) => plan(source, body, attribute, rest, edit, patches),
                None => Err(Error::syntax(
                    binding.value.start,
                    format!("`{attribute}` lies inside a non-literal definition"),
                )),
            };
        } else if path.starts_with(rel) {
            // the edited attribute is a set already populated binding by binding
            match edit {
                Some(_) => {
                    return Err(Error::syntax(
                        binding.span.start,
                        format!("`{attribute}` is already partially defined"),
                    ));
                }
                None => {
                    patches.push(removal(source, &binding.span));
                    found = true;
                }
            }
        }
    }
    if let (false, Some(text)) = (found, edit) {
        patches.push(insertion(source, set, rel, text));
    }
    Ok(())
}

fn line_start(source: &str, pos: usize) -> usize {
    source[..pos].rfind('\n').map_or(0, |i| i + 1)
}

/// Range covering a binding plus trailing blanks, or its whole line when it
/// stands alone on it.
fn removal(source: &str, span: &Range<usize>) -> Patch {
    let start = line_start(source, span.start);
    let rest = &source[span.end..];
    let end = span.end + (rest.len() - rest.trim_start_matches([' ', '\t']).len());
    let alone = source[start..span.start].trim().is_empty();
    let range = if alone && source[end..].starts_with('\n') {
        start..end + 1
    } else if alone && end == source.len() {
        start..end
    } else {
        span.start..end
    };
    Patch {
        range,
        text: String::new(),
    }
}

fn insertion(source: &str, set: &AttrSet, rel: &[String], text: &str) -> Patch {
    let binding = format!("{} = {};", Attribute::new(rel.iter().cloned()).to_nix(), text);
    let close_line = line_start(source, set.close);
    let closing_indent = &source[close_line..set.close];

    if close_line > set.open && closing_indent.trim().is_empty() {
        let sibling_indent = set.bindings.last().and_then(|b| {
            let prefix = &source[line_start(source, b.span.start)..b.span.start];
            prefix.trim().is_empty().then_some(prefix.to_string())
        });
        let indent = sibling_indent.unwrap_or_else(|| format!("{closing_indent}  "));
        Patch {
            range: close_line..close_line,
            text: format!("{indent}{binding}\n"),
        }
    } else {
        let pad = if source[..set.close].ends_with(char::is_whitespace) {
            ""
        } else {
            " "
        };
        Patch {
            range: set.close..set.close,
            text: format!("{pad}{binding} "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inject(source: &str, edits: &[(&str, Option<&str>)]) -> Result<String> {
        let edits: BTreeMap<Attribute, Option<String>> = edits
            .iter()
            .map(|(a, e)| (a.parse().unwrap(), e.map(str::to_string)))
            .collect();
        NixInjector.inject(source, &edits)
    }

    const SOURCE: &str = "{ config, pkgs, ... }:\n\n{\n  # keep me\n  foo.baz = 1;\n  foo.bar = \"old\";\n  networking = {\n    hostName = \"nixos\";\n  };\n}\n";

    #[test]
    fn test_replace_preserves_other_bytes() {
        let out = inject(SOURCE, &[("foo.bar", Some("\"newvalue\""))]).unwrap();
        assert_eq!(out, SOURCE.replace("\"old\"", "\"newvalue\""));
        assert!(out.contains("  foo.baz = 1;\n"));
    }

    #[test]
    fn test_insert_top_level_and_nested() {
        let out = inject(
            SOURCE,
            &[
                ("networking.firewall.enable", Some("true")),
                ("services.openssh.enable", Some("true")),
            ],
        )
        .unwrap();
        assert_eq!(
            out,
            "{ config, pkgs, ... }:\n\n{\n  # keep me\n  foo.baz = 1;\n  foo.bar = \"old\";\n  networking = {\n    hostName = \"nixos\";\n    firewall.enable = true;\n  };\n  services.openssh.enable = true;\n}\n"
        );
    }

    #[test]
    fn test_insert_inline() {
        assert_eq!(
            inject("{ foo.baz = 1; }", &[("foo.bar", Some("\"newvalue\""))]).unwrap(),
            "{ foo.baz = 1; foo.bar = \"newvalue\"; }"
        );
        assert_eq!(
            inject("{}", &[("boot.kernel.sysctl.\"net.ipv4.ip_forward\"", Some("1"))]).unwrap(),
            "{ boot.kernel.sysctl.\"net.ipv4.ip_forward\" = 1; }"
        );
        assert_eq!(
            inject("{\n}", &[("a", Some("1"))]).unwrap(),
            "{\n  a = 1;\n}"
        );
    }

    #[test]
    fn test_remove() {
        let out = inject(SOURCE, &[("foo.bar", None), ("networking", None)]).unwrap();
        assert_eq!(
            out,
            "{ config, pkgs, ... }:\n\n{\n  # keep me\n  foo.baz = 1;\n}\n"
        );
        assert_eq!(inject("{ a = 1; b = 2; }", &[("a", None)]).unwrap(), "{ b = 2; }");
        // removing what is not there changes nothing
        assert_eq!(inject(SOURCE, &[("nope", None)]).unwrap(), SOURCE);
    }

    #[test]
    fn test_rejected_edits() {
        for (source, attr) in [("{ a = import ./a.nix; }", "a.b"), ("{ a.b = 1; }", "a")] {
            assert!(
                matches!(inject(source, &[(attr, Some("2"))]), Err(Error::Syntax { .. })),
                "{source} / {attr}"
            );
        }
        // a whole literal set can still be replaced, but not together with
        // an edit inside it
        assert_eq!(
            inject("{ a = { b = 1; }; }", &[("a", Some("2"))]).unwrap(),
            "{ a = 2; }"
        );
        assert!(matches!(
            inject("{ a = { b = 1; }; }", &[("a", Some("{ }")), ("a.c", Some("3"))]),
            Err(Error::Syntax { .. })
        ));
        assert!(inject("not a module", &[("a", Some("1"))]).is_err());
    }
}
