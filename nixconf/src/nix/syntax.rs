//! Module file structure on top of the `rnix` syntax tree.
//!
//! Only attribute set literals are looked into. Every other bound
//! expression is kept as a byte range over the original text, so callers
//! can copy it or replace it without disturbing its surroundings.

use std::ops::Range;

use rnix::{
    SyntaxKind, SyntaxNode,
    ast::{self, AstNode, HasEntry},
};
use serde_json::{Map, Number, Value};

use crate::{
    attribute::Attribute,
    error::{Error, Result},
};

/// One `path = expr;` binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Attribute path relative to the enclosing set.
    pub path: Attribute,
    /// Whole binding, from the first path byte through the `;`.
    pub span: Range<usize>,
    /// Bound expression without surrounding trivia.
    pub value: Range<usize>,
    /// Bindings of the value when it is an attribute set literal.
    pub body: Option<AttrSet>,
}

/// An attribute set literal.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrSet {
    /// Offset of `{`.
    pub open: usize,
    /// Offset of `}`.
    pub close: usize,
    /// Static bindings in source order. `inherit` and dynamic bindings are
    /// not recorded.
    pub bindings: Vec<Binding>,
}

impl AttrSet {
    /// Every binding whose value is not itself a set literal, with its
    /// full path below this set.
    pub fn leaves(&self) -> Vec<(Attribute, &Binding)> {
        self.walk()
            .into_iter()
            .filter(|(_, binding)| {
                binding
                    .body
                    .as_ref()
                    .is_none_or(|body| body.bindings.is_empty())
            })
            .collect()
    }

    /// Every binding at every depth, parents before their members.
    pub fn walk(&self) -> Vec<(Attribute, &Binding)> {
        let mut out = Vec::new();
        self.collect(&Attribute::root(), &mut out);
        out
    }

    fn collect<'a>(&'a self, prefix: &Attribute, out: &mut Vec<(Attribute, &'a Binding)>) {
        for binding in &self.bindings {
            let mut path = prefix.clone();
            for segment in binding.path.segments() {
                path = path.child(segment.clone());
            }
            out.push((path.clone(), binding));
            if let Some(body) = &binding.body {
                body.collect(&path, out);
            }
        }
    }
}

/// Parse a module file and return its body attribute set.
///
/// Accepted layout: optional lambda headers (`{ config, pkgs, ... }:`),
/// optional `let ... in`, `with ...;` and `assert ...;` prefixes, then a
/// (possibly `rec`) attribute set literal and nothing else.
///
/// # Errors
///
/// Returns [`Error::Syntax`] when the text does not parse or its body is
/// not an attribute set literal.
pub fn parse_module(src: &str) -> Result<AttrSet> {
    let root = parse_root(src)?;
    let mut expr = root
        .expr()
        .ok_or_else(|| Error::syntax(0, "empty module"))?;
    loop {
        let next = match expr {
            ast::Expr::Lambda(lambda) => lambda.body(),
            ast::Expr::LetIn(let_in) => let_in.body(),
            ast::Expr::With(with) => with.body(),
            ast::Expr::Assert(assert) => assert.body(),
            ast::Expr::Paren(paren) => paren.expr(),
            ast::Expr::AttrSet(set) => return attr_set(&set),
            other => {
                return Err(Error::syntax(
                    trimmed(other.syntax()).start,
                    "module body is not an attribute set literal",
                ));
            }
        };
        expr = next.ok_or_else(|| Error::syntax(src.len(), "incomplete module"))?;
    }
}

/// Evaluate a literal expression: `null`, booleans, numbers, strings
/// without interpolation, and lists and attribute sets of literals.
///
/// Returns `None` for anything else, including references to variables.
pub fn parse_literal(src: &str) -> Option<Value> {
    literal(&parse_root(src).ok()?.expr()?)
}

fn parse_root(src: &str) -> Result<ast::Root> {
    let parse = rnix::Root::parse(src);
    let root = parse.tree();
    match parse.errors().first() {
        Some(err) => {
            let offset = root
                .syntax()
                .descendants_with_tokens()
                .find(|e| matches!(e.kind(), SyntaxKind::NODE_ERROR | SyntaxKind::TOKEN_ERROR))
                .map_or(src.len(), |e| usize::from(e.text_range().start()));
            Err(Error::syntax(offset, err.to_string()))
        }
        None => Ok(root),
    }
}

fn is_trivia(kind: SyntaxKind) -> bool {
    matches!(kind, SyntaxKind::TOKEN_WHITESPACE | SyntaxKind::TOKEN_COMMENT)
}

/// Byte range of `node` without leading or trailing whitespace and comments.
fn trimmed(node: &SyntaxNode) -> Range<usize> {
    let mut tokens = node
        .descendants_with_tokens()
        .filter_map(|e| e.into_token())
        .filter(|t| !is_trivia(t.kind()));
    let range = node.text_range();
    let Some(first) = tokens.next() else {
        return range.start().into()..range.end().into();
    };
    let last = tokens.last().unwrap_or_else(|| first.clone());
    first.text_range().start().into()..last.text_range().end().into()
}

fn attr_set(set: &ast::AttrSet) -> Result<AttrSet> {
    let range = set.syntax().text_range();
    let open = set
        .l_curly_token()
        .ok_or_else(|| Error::syntax(range.start().into(), "expected `{`"))?;
    let close = set
        .r_curly_token()
        .ok_or_else(|| Error::syntax(range.end().into(), "expected `}`"))?;

    let mut bindings = Vec::new();
    for entry in set.attrpath_values() {
        let (Some(attrpath), Some(value)) = (entry.attrpath(), entry.value()) else {
            continue;
        };
        let Some(path) = static_path(&attrpath) else {
            debug!("skipping dynamic binding `{}`", attrpath.syntax().text());
            continue;
        };
        let start = trimmed(attrpath.syntax()).start;
        let end = entry
            .syntax()
            .children_with_tokens()
            .filter_map(|e| e.into_token())
            .find(|t| t.kind() == SyntaxKind::TOKEN_SEMICOLON)
            .map_or_else(|| trimmed(entry.syntax()).end, |t| t.text_range().end().into());
        let body = match &value {
            ast::Expr::AttrSet(inner) if inner.rec_token().is_none() => Some(attr_set(inner)?),
            _ => None,
        };
        bindings.push(Binding {
            path,
            span: start..end,
            value: trimmed(value.syntax()),
            body,
        });
    }

    Ok(AttrSet {
        open: open.text_range().start().into(),
        close: close.text_range().start().into(),
        bindings,
    })
}

fn static_path(attrpath: &ast::Attrpath) -> Option<Attribute> {
    attrpath
        .attrs()
        .map(|attr| match attr {
            ast::Attr::Ident(ident) => Some(ident.ident_token()?.text().to_string()),
            ast::Attr::Str(s) => static_string(&s),
            ast::Attr::Dynamic(_) => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(Attribute::new)
}

fn static_string(s: &ast::Str) -> Option<String> {
    let mut out = String::new();
    for part in s.normalized_parts() {
        match part {
            ast::InterpolPart::Literal(text) => out.push_str(&text),
            ast::InterpolPart::Interpolation(_) => return None,
        }
    }
    Some(out)
}

fn number(text: &str) -> Option<Value> {
    if let Ok(int) = text.parse::<i64>() {
        return Some(Value::from(int));
    }
    Number::from_f64(text.parse().ok()?).map(Value::Number)
}

fn literal(expr: &ast::Expr) -> Option<Value> {
    match expr {
        ast::Expr::Ident(ident) => match ident.ident_token()?.text() {
            "null" => Some(Value::Null),
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ast::Expr::Literal(lit) => number(&lit.syntax().text().to_string()),
        ast::Expr::UnaryOp(op) if matches!(op.operator(), Some(ast::UnaryOpKind::Negate)) => {
            let Value::Number(n) = literal(&op.expr()?)? else {
                return None;
            };
            match n.as_i64() {
                Some(int) => Some(Value::from(int.checked_neg()?)),
                None => Number::from_f64(-n.as_f64()?).map(Value::Number),
            }
        }
        ast::Expr::Paren(paren) => literal(&paren.expr()?),
        ast::Expr::Str(s) => static_string(s).map(Value::String),
        ast::Expr::List(list) => list
            .items()
            .map(|item| literal(&item))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        ast::Expr::AttrSet(set) => {
            if set.rec_token().is_some() || set.inherits().next().is_some() {
                return None;
            }
            let mut map = Map::new();
            for entry in set.attrpath_values() {
                let path = static_path(&entry.attrpath()?)?;
                let value = literal(&entry.value()?)?;
                insert_path(&mut map, path.segments(), value)?;
            }
            Some(Value::Object(map))
        }
        _ => None,
    }
}

/// Insert `value` at `path`, merging with sets bound through other paths.
/// Binding the same name twice yields `None`.
fn insert_path(map: &mut Map<String, Value>, path: &[String], value: Value) -> Option<()> {
    let (first, rest) = path.split_first()?;
    if rest.is_empty() {
        return match (map.get_mut(first), value) {
            (None, value) => {
                map.insert(first.clone(), value);
                Some(())
            }
            (Some(Value::Object(existing)), Value::Object(new)) => {
                for (key, value) in new {
                    insert_path(existing, std::slice::from_ref(&key), value)?;
                }
                Some(())
            }
            _ => None,
        };
    }
    let entry = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    insert_path(entry.as_object_mut()?, rest, value)
}
