//! Schema and value extraction through `nix-instantiate`.

use std::{
    collections::BTreeMap,
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{command::Command, serializer::quote_string, syntax::parse_literal};
use crate::{
    config::EvaluatorConfig,
    definition::EvaluationError,
    error::{Error, Result},
};

/// Evaluates Nix: the whole option universe of a configuration, or a
/// single expression.
pub trait Evaluator {
    /// Option records keyed by dot-path (`<name>` marks free keys).
    ///
    /// # Errors
    ///
    /// Any failure here is fatal for tree construction.
    fn option_records(&self, source: &Path) -> Result<BTreeMap<String, OptionRecord>>;

    /// Evaluate one expression to a value.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError`] carrying `expression` and the diagnostic.
    fn eval_expression(&self, expression: &str) -> Result<Value, EvaluationError>;
}

/// One entry of the evaluator's option listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionRecord {
    /// Type descriptor, e.g. `"list of signed integer"`.
    #[serde(rename = "type")]
    pub type_descriptor: String,
    /// Declared default. `Some(Value::Null)` is a declared `null`;
    /// `None` means no default exists.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,
    /// Description, either plain text or a `{ _type, text }` document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
}

impl OptionRecord {
    /// Record with only a type.
    pub fn new(type_descriptor: impl Into<String>) -> Self {
        Self {
            type_descriptor: type_descriptor.into(),
            ..Self::default()
        }
    }

    /// Set the declared default.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<Value>) -> Self {
        self.description = Some(description.into());
        self
    }
}

fn present<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

/// [`Evaluator`] backed by the `nix-instantiate` binary.
#[derive(Debug, Clone)]
pub struct NixEvaluator {
    program: String,
    timeout: Duration,
    nix_path: Option<String>,
}

impl NixEvaluator {
    /// Build from the evaluator section of the editor configuration.
    pub fn new(config: &EvaluatorConfig) -> Self {
        Self {
            program: config.program.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            nix_path: config.nix_path.clone(),
        }
    }

    fn eval_json(&self, expression: &str) -> Result<Value> {
        let mut cmd = Command::new(&self.program, self.timeout);
        cmd.args(["--eval", "--strict", "--json", "--expr", expression]);
        if let Some(nix_path) = &self.nix_path {
            cmd.env("NIX_PATH", nix_path);
        }
        let stdout = cmd.output_with_timeout()?;
        Ok(serde_json::from_slice(&stdout)?)
    }
}

/// Expression listing every visible option of the configuration at `source`.
pub(crate) fn options_expression(source: &Path) -> String {
    let path = quote_string(&source.to_string_lossy());
    format!(
        r#"let
  nixos = import <nixpkgs/nixos> {{ configuration = /. + {path}; }};
  lib = nixos.pkgs.lib;
  visible = builtins.filter
    (o: (o.visible or true) != false && !(o.internal or false))
    (lib.optionAttrSetToDocList nixos.options);
  record = o: {{ type = o.type or "unspecified value"; }}
    // lib.optionalAttrs (o ? default) {{ inherit (o) default; }}
    // lib.optionalAttrs (o ? description) {{ inherit (o) description; }};
in builtins.listToAttrs (map (o: {{ name = o.name; value = record o; }}) visible)"#
    )
}

/// Wrap a configured expression so the usual module arguments resolve.
pub(crate) fn value_expression(expression: &str) -> String {
    format!("let pkgs = import <nixpkgs> {{ }}; lib = pkgs.lib; in ({expression}\n)")
}

impl Evaluator for NixEvaluator {
    fn option_records(&self, source: &Path) -> Result<BTreeMap<String, OptionRecord>> {
        let source = source.canonicalize()?;
        info!("extracting options for {}", source.display());
        let value = self.eval_json(&options_expression(&source))?;
        let records: BTreeMap<String, OptionRecord> = serde_json::from_value(value)?;
        debug!("evaluator listed {} options", records.len());
        Ok(records)
    }

    fn eval_expression(&self, expression: &str) -> Result<Value, EvaluationError> {
        if let Some(value) = parse_literal(expression) {
            return Ok(value);
        }
        self.eval_json(&value_expression(expression))
            .map_err(|err| EvaluationError {
                expression: expression.to_string(),
                diagnostic: match err {
                    Error::Subprocess { stderr, .. } if !stderr.is_empty() => stderr,
                    other => other.to_string(),
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_default_presence() {
        let records: BTreeMap<String, OptionRecord> = serde_json::from_value(json!({
            "a": { "type": "boolean", "default": false },
            "b": { "type": "null or string", "default": null },
            "c": { "type": "string", "description": "Host name." },
        }))
        .unwrap();
        assert_eq!(records["a"].default, Some(json!(false)));
        assert_eq!(records["b"].default, Some(Value::Null));
        assert_eq!(records["c"].default, None);
        assert_eq!(records["c"].description, Some(json!("Host name.")));
        assert_eq!(
            records["a"],
            OptionRecord::new("boolean").with_default(false)
        );
    }

    #[test]
    fn test_literals_skip_the_subprocess() {
        let evaluator = NixEvaluator::new(&EvaluatorConfig {
            program: "/nonexistent/nix-instantiate".into(),
            ..EvaluatorConfig::default()
        });
        assert_eq!(
            evaluator.eval_expression("[ 80 443 ]").unwrap(),
            json!([80, 443])
        );
        let err = evaluator.eval_expression("pkgs.vim").unwrap_err();
        assert_eq!(err.expression, "pkgs.vim");
        assert!(!err.diagnostic.is_empty());
    }

    #[test]
    fn test_generated_expressions() {
        let expr = options_expression(Path::new("/etc/nixos/configuration.nix"));
        assert!(expr.contains(r#"configuration = /. + "/etc/nixos/configuration.nix";"#));
        assert!(expr.contains("optionAttrSetToDocList"));
        assert!(value_expression("with pkgs; [ vim ]").ends_with("(with pkgs; [ vim ]\n)"));
    }
}
